use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tracker::types::{Ticket, TicketComment};

/// Upper bound on tester runs before the Router stops sending work back to the Tester.
pub const MAX_TEST_ITERATIONS: u32 = 3;

/// The next step chosen by the Router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Planner,
    Implementer,
    Tester,
    Reporter,
    Done,
}

impl Route {
    pub const ALL: [Route; 5] = [
        Route::Planner,
        Route::Implementer,
        Route::Tester,
        Route::Reporter,
        Route::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Route::Planner => "planner",
            Route::Implementer => "implementer",
            Route::Tester => "tester",
            Route::Reporter => "reporter",
            Route::Done => "done",
        }
    }

    /// Case-insensitive lookup; surrounding whitespace is ignored.
    pub fn parse(name: &str) -> Option<Route> {
        let name = name.trim().to_lowercase();
        Route::ALL.into_iter().find(|r| r.as_str() == name)
    }

    /// The status the workflow enters when this route is taken.
    pub fn target_status(self) -> Status {
        match self {
            Route::Planner => Status::Planning,
            Route::Implementer => Status::Implementing,
            Route::Tester => Status::Testing,
            Route::Reporter => Status::Reporting,
            Route::Done => Status::Done,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse lifecycle marker for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Planning,
    Implementing,
    Testing,
    Reporting,
    Done,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Planning => "planning",
            Status::Implementing => "implementing",
            Status::Testing => "testing",
            Status::Reporting => "reporting",
            Status::Done => "done",
            Status::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Failed)
    }

    /// The validated transition table. Any non-terminal status may fail.
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Planning)
                | (Planning, Planning)
                | (Planning, Implementing)
                | (Implementing, Implementing)
                | (Implementing, Testing)
                | (Implementing, Reporting)
                | (Testing, Testing)
                | (Testing, Implementing)
                | (Testing, Reporting)
                | (Reporting, Done)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-phase confidence scores in `[0, 1]` plus their weighted overall score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub routing: f64,
    pub planning: f64,
    pub implementation: f64,
    pub testing: f64,
    pub overall: f64,
}

impl Confidence {
    const WEIGHTS: [f64; 4] = [0.1, 0.2, 0.3, 0.4];

    /// Clamp every phase score and recompute `overall`, rounded to 3 decimals.
    pub fn refresh_overall(&mut self) {
        for score in [
            &mut self.routing,
            &mut self.planning,
            &mut self.implementation,
            &mut self.testing,
        ] {
            *score = clamp_unit(*score);
        }

        let weighted = Self::WEIGHTS[0] * self.routing
            + Self::WEIGHTS[1] * self.planning
            + Self::WEIGHTS[2] * self.implementation
            + Self::WEIGHTS[3] * self.testing;
        self.overall = clamp_unit(round_to(weighted, 3));
    }
}

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Ticket fields plus the comments fetched alongside them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketDetails {
    #[serde(flatten)]
    pub ticket: Ticket,
    #[serde(default)]
    pub recent_comments: Vec<TicketComment>,
}

/// What an earlier attempt left behind on a pre-existing branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExistingContext {
    pub commits: String,
    pub pr_comments: String,
    pub review_comments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Modify,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeAction::Create => f.write_str("create"),
            ChangeAction::Modify => f.write_str("modify"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file_path: String,
    pub content: String,
    pub action: ChangeAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub success: bool,
    pub passed: u32,
    pub failed: u32,
    /// The last 2000 characters of combined stdout and stderr.
    pub output: String,
    pub summary: String,
    /// Set when the suite could not be run at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The single record threaded through every step of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub ticket_id: String,
    pub ticket_details: Option<TicketDetails>,
    pub branch_name: String,
    pub implementation_plan: String,
    pub repo_path: Option<PathBuf>,
    pub branch_exists: bool,
    pub existing_context: Option<ExistingContext>,
    pub skip_implementation: bool,
    pub code_changes: Vec<CodeChange>,
    pub test_results: Option<TestResults>,
    pub test_iterations: u32,
    pub fix_suggestions: Option<String>,
    pub pr_url: Option<String>,
    pub pr_number: Option<u64>,
    pub route: Option<Route>,
    pub status: Status,
    pub error: Option<String>,
    pub confidence: Confidence,
}

impl WorkflowState {
    pub fn new(ticket_id: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            ..Self::default()
        }
    }

    pub fn has_plan(&self) -> bool {
        !self.implementation_plan.is_empty()
    }

    pub fn tests_passed(&self) -> bool {
        self.test_results.as_ref().is_some_and(|r| r.success)
    }

    pub fn tests_failed(&self) -> bool {
        self.test_results.as_ref().is_some_and(|r| !r.success)
    }

    pub fn summary(&self) -> &str {
        self.ticket_details
            .as_ref()
            .map(|d| d.ticket.summary.as_str())
            .unwrap_or_default()
    }

    /// Move to `next`, logging when the move is outside the transition table.
    pub fn set_status(&mut self, next: Status) {
        if self.status != next && !self.status.can_transition_to(next) {
            tracing::warn!(
                ticket = %self.ticket_id,
                from = %self.status,
                to = %next,
                "Unexpected status transition"
            );
        }
        self.status = next;
    }

    /// Record an unrecoverable failure; the Router ends the run on the next decision.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(ticket = %self.ticket_id, error = %message, "Step failed");
        self.error = Some(message);
        self.status = Status::Failed;
    }

    pub fn succeeded(&self) -> bool {
        self.status == Status::Done && self.error.is_none()
    }
}
