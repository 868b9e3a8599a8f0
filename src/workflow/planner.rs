use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::CompletionProvider;
use crate::tracker::{transition_matching, TicketTracker};
use crate::workflow::state::{round_to, Status, TicketDetails, WorkflowState};
use crate::workflow::{ask, prompts, Collaborators, Step};

const RECENT_COMMENTS: usize = 5;

/// Fetches the ticket and produces an implementation plan.
pub struct Planner {
    tracker: Arc<dyn TicketTracker>,
    llm: Option<Arc<dyn CompletionProvider>>,
}

impl Planner {
    pub fn new(collaborators: &Collaborators) -> Self {
        Self {
            tracker: collaborators.tracker.clone(),
            llm: collaborators.llm.clone(),
        }
    }

    async fn plan(&self, state: &mut WorkflowState) -> Result<()> {
        let ticket = self.tracker.get_issue(&state.ticket_id).await?;
        let comments = self
            .tracker
            .get_comments(&state.ticket_id, RECENT_COMMENTS)
            .await?;
        tracing::info!(
            ticket = %state.ticket_id,
            summary = %ticket.summary,
            comments = comments.len(),
            "Fetched ticket"
        );

        transition_matching(self.tracker.as_ref(), &state.ticket_id, "progress").await;

        let plan = match &self.llm {
            Some(llm) => {
                let attachments: Vec<String> =
                    ticket.attachments.iter().map(|a| a.filename.clone()).collect();
                let prompt = prompts::planning_prompt(
                    &state.ticket_id,
                    &ticket.summary,
                    ticket.description.as_deref(),
                    &ticket.status,
                    ticket.priority.as_deref().unwrap_or("None"),
                    &attachments,
                    &comments,
                );
                let plan = ask(llm.as_ref(), prompts::PLANNER_SYSTEM, prompt).await?;
                if plan.is_empty() {
                    tracing::warn!(ticket = %state.ticket_id, "Empty plan from provider, using template");
                    prompts::default_plan(&ticket.summary, ticket.description.as_deref())
                } else {
                    plan
                }
            }
            None => prompts::default_plan(&ticket.summary, ticket.description.as_deref()),
        };

        let confidence = planning_confidence(
            &ticket.summary,
            ticket.description.as_deref().unwrap_or_default(),
            comments.len(),
            &plan,
        );

        state.branch_name = state.ticket_id.clone();
        state.ticket_details = Some(TicketDetails {
            ticket,
            recent_comments: comments,
        });
        state.implementation_plan = plan;
        state.confidence.planning = confidence;
        state.set_status(Status::Planning);

        tracing::info!(ticket = %state.ticket_id, confidence, "Plan ready");
        Ok(())
    }
}

/// Heuristic score for how much the plan had to go on.
pub fn planning_confidence(summary: &str, description: &str, comments: usize, plan: &str) -> f64 {
    let mut score: f64 = 0.5;

    if summary.chars().count() > 10 {
        score += 0.1;
    }

    let description_len = description.chars().count();
    if description_len > 50 {
        score += 0.15;
    } else if description_len > 20 {
        score += 0.08;
    }

    if comments > 0 {
        score += 0.05;
        if comments >= 3 {
            score += 0.05;
        }
    }

    if plan.chars().count() > 200 {
        score += 0.1;
    }

    let lowered = plan.to_lowercase();
    if ["test", "component", "file"].iter().any(|k| lowered.contains(k)) {
        score += 0.05;
    }

    round_to(score, 2).min(1.0)
}

#[async_trait]
impl Step for Planner {
    fn name(&self) -> &'static str {
        "planner"
    }

    async fn run(&self, mut state: WorkflowState) -> WorkflowState {
        if let Err(e) = self.plan(&mut state).await {
            state.fail(format!("Planner error: {e}"));
        }
        state
    }
}
