use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::error::{AppError, Result};
use crate::notify::{Notifier, Severity};
use crate::platform::types::{CreatePullRequest, PrState, PullRequest};
use crate::platform::{find_by_head, SourceHost};
use crate::tracker::{transition_matching, TicketTracker};
use crate::workflow::parsers::head_chars;
use crate::workflow::state::{ChangeAction, Status, WorkflowState};
use crate::workflow::{Collaborators, Step, WorkflowSettings};
use crate::workspace::Workspace;

static SUITES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Test Suites:\s*(\d+)\s*passed.*?(\d+)\s*total").expect("static regex")
});

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Time:\s*([\d.]+)\s*s").expect("static regex"));

const PR_FILES: usize = 10;
const TICKET_FILES: usize = 8;
const NOTIFY_FILES: usize = 5;

/// Publishes the branch, opens or updates the pull request and tells everyone.
pub struct Reporter {
    tracker: Arc<dyn TicketTracker>,
    host: Arc<dyn SourceHost>,
    notifier: Arc<dyn Notifier>,
    workspace: Arc<dyn Workspace>,
    base_branch: String,
}

impl Reporter {
    pub fn new(collaborators: &Collaborators, settings: &WorkflowSettings) -> Self {
        Self {
            tracker: collaborators.tracker.clone(),
            host: collaborators.host.clone(),
            notifier: collaborators.notifier.clone(),
            workspace: collaborators.workspace.clone(),
            base_branch: settings.base_branch.clone(),
        }
    }

    async fn report(&self, state: &mut WorkflowState) -> Result<()> {
        state.set_status(Status::Reporting);
        let repo = state
            .repo_path
            .clone()
            .ok_or_else(|| AppError::Workspace("no working copy to publish".to_string()))?;

        let sha = self
            .workspace
            .commit_all_allow_empty(&repo, &commit_title(state))
            .await?;
        self.workspace.force_push(&repo, &state.branch_name).await?;
        tracing::info!(ticket = %state.ticket_id, branch = %state.branch_name, commit = %sha, "Pushed branch");

        let pr = self.publish_pull_request(state).await?;
        state.pr_url = Some(pr.url.clone());
        state.pr_number = Some(pr.number);

        if let Err(e) = self
            .tracker
            .add_comment(&state.ticket_id, &ticket_comment(state))
            .await
        {
            tracing::warn!(ticket = %state.ticket_id, error = %e, "Failed to comment on ticket");
        }
        transition_matching(self.tracker.as_ref(), &state.ticket_id, "review").await;

        let message = format!("{}: {}", state.ticket_id, display_summary(state));
        if let Err(e) = self
            .notifier
            .notify(severity(state), &message, Some(&notification_details(state)))
            .await
        {
            tracing::warn!(ticket = %state.ticket_id, error = %e, "Failed to send notification");
        }

        state.set_status(Status::Done);
        Ok(())
    }

    /// Reuse the open pull request for the branch, or open one.
    async fn publish_pull_request(&self, state: &WorkflowState) -> Result<PullRequest> {
        if let Some(pr) = find_by_head(self.host.as_ref(), PrState::Open, &state.branch_name).await? {
            tracing::info!(ticket = %state.ticket_id, pr = pr.number, "Updating existing pull request");
            if let Err(e) = self.host.add_pr_comment(pr.number, &update_comment(state)).await {
                tracing::warn!(pr = pr.number, error = %e, "Failed to comment on pull request");
            }
            return Ok(pr);
        }

        let request = CreatePullRequest {
            title: commit_title(state),
            body: pull_request_body(state),
            head_branch: state.branch_name.clone(),
            base_branch: self.base_branch.clone(),
        };
        let pr = self.host.create_pull_request(&request).await?;
        tracing::info!(ticket = %state.ticket_id, pr = pr.number, url = %pr.url, "Opened pull request");
        Ok(pr)
    }
}

fn display_summary(state: &WorkflowState) -> &str {
    match state.summary() {
        "" => "Implementation",
        s => s,
    }
}

fn commit_title(state: &WorkflowState) -> String {
    format!("feat({}): {}", state.ticket_id, display_summary(state))
}

fn counts(state: &WorkflowState) -> (u32, u32) {
    state
        .test_results
        .as_ref()
        .map(|r| (r.passed, r.failed))
        .unwrap_or((0, 0))
}

fn severity(state: &WorkflowState) -> Severity {
    let (_, failed) = counts(state);
    if failed > 0 {
        Severity::Warning
    } else if state.pr_url.is_some() {
        Severity::Success
    } else {
        Severity::Info
    }
}

fn file_lines(state: &WorkflowState, limit: usize, line: impl Fn(&str, ChangeAction) -> String) -> String {
    if state.code_changes.is_empty() {
        return "- No file changes (existing code already covers the ticket)".to_string();
    }
    let mut lines: Vec<String> = state
        .code_changes
        .iter()
        .take(limit)
        .map(|c| line(&c.file_path, c.action))
        .collect();
    if state.code_changes.len() > limit {
        lines.push(format!("- ... and {} more", state.code_changes.len() - limit));
    }
    lines.join("\n")
}

fn pull_request_body(state: &WorkflowState) -> String {
    let (passed, failed) = counts(state);
    let plan = head_chars(&state.implementation_plan, 500);
    let ellipsis = if state.implementation_plan.chars().count() > 500 {
        "..."
    } else {
        ""
    };

    format!(
        r#"## Summary
Automated implementation of **{ticket}**: {summary}

## Implementation Plan
{plan}{ellipsis}

## Test Results
- Passed: {passed}
- Failed: {failed}
- Iterations: {iterations}

## Files Changed
{files}
"#,
        ticket = state.ticket_id,
        summary = display_summary(state),
        iterations = state.test_iterations,
        files = file_lines(state, PR_FILES, |path, action| format!("- `{path}` ({action})")),
    )
}

fn update_comment(state: &WorkflowState) -> String {
    let (passed, failed) = counts(state);
    format!(
        "## Branch updated\n\n- Tests: {passed} passed, {failed} failed\n- Test iterations: {}\n- Files changed: {}",
        state.test_iterations,
        state.code_changes.len()
    )
}

/// `Test Suites` and `Time` lines from Jest output, when present.
fn jest_summary(output: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(caps) = SUITES_RE.captures(output) {
        lines.push(format!("Test suites: {} passed of {} total", &caps[1], &caps[2]));
    }
    if let Some(caps) = TIME_RE.captures(output) {
        lines.push(format!("Time: {}s", &caps[1]));
    }
    lines
}

fn ticket_comment(state: &WorkflowState) -> String {
    let files = file_lines(state, TICKET_FILES, |path, action| {
        let verb = match action {
            ChangeAction::Create => "Created",
            ChangeAction::Modify => "Updated",
        };
        format!("- {verb} {path}")
    });

    let mut tests = match &state.test_results {
        Some(r) => vec![format!("Tests: {}", r.summary)],
        None => vec!["Tests: not run".to_string()],
    };
    if let Some(r) = &state.test_results {
        tests.extend(jest_summary(&r.output));
    }

    let implemented = if state.skip_implementation {
        "2. Implementation skipped: existing code already covers the ticket"
    } else {
        "2. Implemented code changes"
    };

    format!(
        r#"Automated implementation pushed to branch {branch}.

Files:
{files}

Pull request: {pr}

{tests}

Workflow steps:
1. Planned the implementation
{implemented}
3. Ran tests ({iterations} iteration(s))
4. Opened or updated the pull request"#,
        branch = state.branch_name,
        pr = state.pr_url.as_deref().unwrap_or("(none)"),
        tests = tests.join("\n"),
        iterations = state.test_iterations,
    )
}

fn notification_details(state: &WorkflowState) -> String {
    let (passed, failed) = counts(state);
    let files = file_lines(state, NOTIFY_FILES, |path, _| format!("- {path}"));
    format!(
        "Ticket: {}\nPR: {}\nTests: {passed} passed, {failed} failed\nFiles:\n{files}",
        state.ticket_id,
        state.pr_url.as_deref().unwrap_or("(none)"),
    )
}

#[async_trait]
impl Step for Reporter {
    fn name(&self) -> &'static str {
        "reporter"
    }

    async fn run(&self, mut state: WorkflowState) -> WorkflowState {
        if let Err(e) = self.report(&mut state).await {
            state.fail(format!("Reporter error: {e}"));
        }
        state
    }
}
