use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::llm::CompletionProvider;
use crate::platform::types::PrState;
use crate::platform::{find_by_head, SourceHost};
use crate::workflow::parsers::{head_chars, parse_code_response, parse_completion_check, tail_chars};
use crate::workflow::state::{ChangeAction, CodeChange, ExistingContext, Status, WorkflowState};
use crate::workflow::{ask, prompts, Collaborators, Step, WorkflowSettings};
use crate::workspace::Workspace;

const CONTEXT_COMMITS: usize = 10;
const CONTEXT_COMMENTS: usize = 5;
const SAMPLE_FILES: usize = 5;
const SAMPLE_LINES: usize = 50;

const PLACEHOLDER_PATH: &str = "src/components/Feature.jsx";
const PLACEHOLDER_COMPONENT: &str = r#"import React from 'react';
import PropTypes from 'prop-types';

const Feature = ({ title }) => {
  return (
    <div className="feature">
      <h2>{title}</h2>
      <p>Feature implementation goes here.</p>
    </div>
  );
};

Feature.propTypes = {
  title: PropTypes.string,
};

Feature.defaultProps = {
  title: 'New Feature',
};

export default Feature;
"#;

/// Prepares the branch and writes code for the plan.
pub struct Implementer {
    host: Arc<dyn SourceHost>,
    workspace: Arc<dyn Workspace>,
    llm: Option<Arc<dyn CompletionProvider>>,
    settings: WorkflowSettings,
}

impl Implementer {
    pub fn new(collaborators: &Collaborators, settings: WorkflowSettings) -> Self {
        Self {
            host: collaborators.host.clone(),
            workspace: collaborators.workspace.clone(),
            llm: collaborators.llm.clone(),
            settings,
        }
    }

    /// Fresh clone, branch checkout and dependency install.
    async fn setup_repository(&self, state: &mut WorkflowState) -> Result<PathBuf> {
        let repo = self.workspace.prepare(&state.ticket_id).await?;
        state.repo_path = Some(repo.clone());

        let exists = self
            .workspace
            .remote_branch_exists(&repo, &state.branch_name)
            .await?;
        self.workspace
            .checkout_or_create_branch(&repo, &state.branch_name, exists)
            .await?;
        state.branch_exists = exists;
        tracing::info!(
            ticket = %state.ticket_id,
            branch = %state.branch_name,
            existing = exists,
            "Branch ready"
        );

        let install = self.settings.install_command.trim();
        if !install.is_empty() {
            let output = self
                .workspace
                .run(install, &repo, self.settings.install_timeout)
                .await?;
            if !output.success() {
                return Err(AppError::Shell(format!(
                    "`{install}` exited with {}: {}",
                    output.exit_code,
                    tail_chars(&output.stderr, 500)
                )));
            }
        }

        Ok(repo)
    }

    /// What a previous attempt left on the branch. Every lookup is best-effort.
    async fn gather_context(&self, repo: &Path, branch: &str) -> ExistingContext {
        let mut context = ExistingContext::default();

        match self.workspace.commit_log(repo, CONTEXT_COMMITS).await {
            Ok(lines) => context.commits = head_chars(&lines.join("\n"), 1000),
            Err(e) => tracing::warn!(branch, error = %e, "Failed to read commit history"),
        }

        let pr = match find_by_head(self.host.as_ref(), PrState::All, branch).await {
            Ok(pr) => pr,
            Err(e) => {
                tracing::warn!(branch, error = %e, "Failed to look up pull request");
                None
            }
        };
        let Some(pr) = pr else {
            return context;
        };

        match self.host.get_pr_comments(pr.number, CONTEXT_COMMENTS).await {
            Ok(comments) => {
                context.pr_comments = comments
                    .iter()
                    .map(|c| format!("- {}: {}", c.author, c.body))
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            Err(e) => tracing::warn!(pr = pr.number, error = %e, "Failed to read PR comments"),
        }

        match self.host.get_review_comments(pr.number, CONTEXT_COMMENTS).await {
            Ok(comments) => {
                context.review_comments = comments
                    .iter()
                    .map(|c| format!("- {} on {}: {}", c.author, c.path, c.body))
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            Err(e) => tracing::warn!(pr = pr.number, error = %e, "Failed to read review comments"),
        }

        context
    }

    /// Ask whether the code already on the branch covers the ticket.
    /// Anything short of a clear yes counts as no.
    async fn already_complete(
        &self,
        llm: &dyn CompletionProvider,
        state: &WorkflowState,
        repo: &Path,
    ) -> bool {
        let samples = match self
            .workspace
            .sample_sources(repo, SAMPLE_FILES, SAMPLE_LINES)
            .await
        {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(ticket = %state.ticket_id, error = %e, "Failed to sample sources");
                Vec::new()
            }
        };
        let existing_code: String = samples
            .iter()
            .map(|s| format!("\n--- {} ---\n{}", s.path, head_chars(&s.content, 500)))
            .collect();
        let commits = state
            .existing_context
            .as_ref()
            .map(|c| c.commits.as_str())
            .unwrap_or_default();

        let prompt = prompts::completion_check_prompt(
            &state.ticket_id,
            state.summary(),
            state
                .ticket_details
                .as_ref()
                .and_then(|d| d.ticket.description.as_deref()),
            &existing_code,
            commits,
        );

        match ask(llm, prompts::REVIEWER_SYSTEM, prompt).await {
            Ok(reply) => {
                let (complete, reason) = parse_completion_check(&reply);
                tracing::info!(ticket = %state.ticket_id, complete, reason = %reason, "Completion check");
                complete
            }
            Err(e) => {
                tracing::warn!(ticket = %state.ticket_id, error = %e, "Completion check failed");
                false
            }
        }
    }

    async fn generate_changes(&self, state: &WorkflowState) -> Result<Vec<CodeChange>> {
        let Some(llm) = &self.llm else {
            return Ok(vec![placeholder_change()]);
        };

        let context = prompts::implementation_context(state);
        let prompt = prompts::implementation_prompt(state, &context);
        let reply = ask(llm.as_ref(), prompts::IMPLEMENTER_SYSTEM, prompt).await?;

        let changes = parse_code_response(&reply);
        if changes.is_empty() {
            tracing::warn!(ticket = %state.ticket_id, "No file blocks in reply, writing placeholder");
            return Ok(vec![placeholder_change()]);
        }
        Ok(changes)
    }

    async fn implement(&self, state: &mut WorkflowState, repo: &Path) -> Result<()> {
        if state.branch_exists {
            state.existing_context = Some(self.gather_context(repo, &state.branch_name).await);

            if let Some(llm) = &self.llm {
                if self.already_complete(llm.as_ref(), state, repo).await {
                    tracing::info!(ticket = %state.ticket_id, "Existing code covers the ticket, skipping implementation");
                    state.skip_implementation = true;
                    state.confidence.implementation = 0.9;
                    state.set_status(Status::Implementing);
                    return Ok(());
                }
            }
        }

        let mut changes = self.generate_changes(state).await?;
        state.fix_suggestions = None;

        for change in &mut changes {
            let replaced = self
                .workspace
                .write_file(repo, &change.file_path, &change.content)
                .await?;
            if replaced {
                change.action = ChangeAction::Modify;
            }
            tracing::debug!(file = %change.file_path, action = %change.action, "Wrote file");
        }

        tracing::info!(ticket = %state.ticket_id, files = changes.len(), "Code changes written");
        state.code_changes = changes;
        state.skip_implementation = false;
        state.confidence.implementation = 0.7;
        state.set_status(Status::Implementing);
        Ok(())
    }
}

fn placeholder_change() -> CodeChange {
    CodeChange {
        file_path: PLACEHOLDER_PATH.to_string(),
        content: PLACEHOLDER_COMPONENT.to_string(),
        action: ChangeAction::Create,
    }
}

#[async_trait]
impl Step for Implementer {
    fn name(&self) -> &'static str {
        "implementer"
    }

    async fn run(&self, mut state: WorkflowState) -> WorkflowState {
        let repo = match self.setup_repository(&mut state).await {
            Ok(repo) => repo,
            Err(e) => {
                state.fail(format!("Implementer error: repository setup failed: {e}"));
                return state;
            }
        };

        if let Err(e) = self.implement(&mut state, &repo).await {
            state.fail(format!("Implementer error: {e}"));
        }
        state
    }
}
