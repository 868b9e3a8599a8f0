use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::llm::CompletionProvider;
use crate::workflow::parsers::{head_chars, parse_test_counts, tail_chars};
use crate::workflow::state::{round_to, Status, TestResults, WorkflowState};
use crate::workflow::{ask, prompts, Collaborators, Step, WorkflowSettings};
use crate::workspace::Workspace;

const STORED_OUTPUT_CHARS: usize = 2000;
const STORED_FIX_CHARS: usize = 3000;

/// Runs the test suite and, on failure, asks for fix suggestions.
pub struct Tester {
    workspace: Arc<dyn Workspace>,
    llm: Option<Arc<dyn CompletionProvider>>,
    settings: WorkflowSettings,
}

impl Tester {
    pub fn new(collaborators: &Collaborators, settings: WorkflowSettings) -> Self {
        Self {
            workspace: collaborators.workspace.clone(),
            llm: collaborators.llm.clone(),
            settings,
        }
    }

    async fn run_suite(&self, state: &WorkflowState) -> Result<TestResults> {
        let repo = state
            .repo_path
            .as_deref()
            .ok_or_else(|| AppError::Workspace("no working copy to test".to_string()))?;

        tracing::info!(
            ticket = %state.ticket_id,
            command = %self.settings.test_command,
            "Running tests"
        );
        let output = self
            .workspace
            .run(&self.settings.test_command, repo, self.settings.test_timeout)
            .await?;

        let combined = format!("{}{}", output.stdout, output.stderr);
        let (passed, failed) = parse_test_counts(&combined);

        Ok(TestResults {
            success: output.success() && failed == 0,
            passed,
            failed,
            output: tail_chars(&combined, STORED_OUTPUT_CHARS),
            summary: format!("{passed} passed, {failed} failed"),
            error: None,
        })
    }

    async fn suggest_fixes(&self, llm: &dyn CompletionProvider, state: &mut WorkflowState) {
        let Some(results) = &state.test_results else {
            return;
        };
        let prompt = prompts::fix_prompt(&results.output, &results.summary, &state.code_changes);

        match ask(llm, prompts::DEBUGGER_SYSTEM, prompt).await {
            Ok(reply) => state.fix_suggestions = Some(head_chars(&reply, STORED_FIX_CHARS)),
            Err(e) => tracing::warn!(ticket = %state.ticket_id, error = %e, "Fix suggestion request failed"),
        }
    }
}

/// Confidence in the latest run, penalised for every retry it took to get here.
pub fn testing_confidence(success: bool, passed: u32, failed: u32, iterations: u32) -> f64 {
    let total = passed + failed;

    let base = if success {
        let mut score = 0.85;
        if total > 0 {
            score += 0.1;
        }
        if total >= 5 {
            score += 0.05;
        }
        score
    } else if total == 0 {
        0.3
    } else {
        0.3 + f64::from(passed) / f64::from(total) * 0.4
    };

    let penalty = f64::from(iterations.saturating_sub(1)) * 0.1;
    round_to(base - penalty, 2).clamp(0.1, 1.0)
}

#[async_trait]
impl Step for Tester {
    fn name(&self) -> &'static str {
        "tester"
    }

    async fn run(&self, mut state: WorkflowState) -> WorkflowState {
        let results = match self.run_suite(&state).await {
            Ok(results) => results,
            Err(e) => {
                let message = format!("Tester error: {e}");
                state.test_results = Some(TestResults {
                    success: false,
                    error: Some(message.clone()),
                    ..TestResults::default()
                });
                state.fail(message);
                return state;
            }
        };

        state.test_iterations += 1;
        state.confidence.testing = testing_confidence(
            results.success,
            results.passed,
            results.failed,
            state.test_iterations,
        );
        tracing::info!(
            ticket = %state.ticket_id,
            iteration = state.test_iterations,
            success = results.success,
            summary = %results.summary,
            "Test run finished"
        );

        let success = results.success;
        state.test_results = Some(results);
        state.set_status(Status::Testing);

        if !success && state.test_iterations < self.settings.max_test_iterations {
            if let Some(llm) = &self.llm {
                self.suggest_fixes(llm.as_ref(), &mut state).await;
            }
        }

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::workflow::state::{ChangeAction, CodeChange};
    use crate::workflow::testing::{Fakes, ScriptedLlm};
    use crate::workspace::CommandOutput;

    fn implemented_state(ticket: &str) -> WorkflowState {
        let mut state = WorkflowState::new(ticket);
        state.repo_path = Some(PathBuf::from("/fake/repo"));
        state.status = Status::Implementing;
        state.code_changes.push(CodeChange {
            file_path: "src/Login.jsx".to_string(),
            content: "export {};".to_string(),
            action: ChangeAction::Create,
        });
        state
    }

    fn output(exit_code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_confidence_on_success() {
        assert_eq!(testing_confidence(true, 0, 0, 1), 0.85);
        assert_eq!(testing_confidence(true, 3, 0, 1), 0.95);
        assert_eq!(testing_confidence(true, 12, 0, 1), 1.0);
        assert_eq!(testing_confidence(true, 12, 0, 2), 0.9);
    }

    #[test]
    fn test_confidence_on_failure() {
        assert_eq!(testing_confidence(false, 0, 0, 1), 0.3);
        assert_eq!(testing_confidence(false, 3, 1, 1), 0.6);
        assert_eq!(testing_confidence(false, 0, 4, 3), 0.1);
        assert_eq!(testing_confidence(false, 1, 1, 9), 0.1);
    }

    #[tokio::test]
    async fn test_counts_and_success() {
        let fakes = Fakes::new("DP-1");
        fakes.workspace.push_test_output(output(0, "Tests: 12 passed, 0 failed"));
        let tester = Tester::new(&fakes.collaborators(None), WorkflowSettings::default());

        let state = tester.run(implemented_state("DP-1")).await;
        let results = state.test_results.as_ref().unwrap();

        assert!(results.success);
        assert_eq!((results.passed, results.failed), (12, 0));
        assert_eq!(results.summary, "12 passed, 0 failed");
        assert_eq!(state.test_iterations, 1);
        assert_eq!(state.status, Status::Testing);
    }

    #[tokio::test]
    async fn test_failed_count_overrides_zero_exit() {
        let fakes = Fakes::new("DP-1");
        fakes.workspace.push_test_output(output(0, "Tests: 3 passed, 2 failed"));
        let tester = Tester::new(&fakes.collaborators(None), WorkflowSettings::default());

        let state = tester.run(implemented_state("DP-1")).await;

        assert!(!state.test_results.unwrap().success);
        assert!(state.fix_suggestions.is_none());
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        let fakes = Fakes::new("DP-1");
        fakes.workspace.push_test_output(output(0, &"x".repeat(5000)));
        let tester = Tester::new(&fakes.collaborators(None), WorkflowSettings::default());

        let state = tester.run(implemented_state("DP-1")).await;
        let stored = state.test_results.unwrap().output;

        assert_eq!(stored.chars().count(), 2000);
        assert_eq!(tail_chars(&stored, 2000), stored);
    }

    #[tokio::test]
    async fn test_failure_requests_fix_suggestions() {
        let fakes = Fakes::new("DP-1");
        fakes.workspace.push_test_output(output(1, "Tests: 1 passed, 1 failed"));
        let llm = Arc::new(ScriptedLlm::always(&"f".repeat(4000)));
        let tester = Tester::new(&fakes.collaborators(Some(llm.clone())), WorkflowSettings::default());

        let state = tester.run(implemented_state("DP-1")).await;

        assert_eq!(state.fix_suggestions.as_ref().map(|f| f.len()), Some(3000));
        assert!(llm.prompts()[0].contains("File: src/Login.jsx"));
        assert_eq!(state.confidence.testing, 0.5);
    }

    #[tokio::test]
    async fn test_no_fix_suggestions_at_iteration_cap() {
        let fakes = Fakes::new("DP-1");
        fakes.workspace.push_test_output(output(1, "Tests: 0 passed, 1 failed"));
        let llm = Arc::new(ScriptedLlm::always("fix it"));
        let tester = Tester::new(&fakes.collaborators(Some(llm.clone())), WorkflowSettings::default());

        let mut state = implemented_state("DP-1");
        state.test_iterations = 2;
        let state = tester.run(state).await;

        assert_eq!(state.test_iterations, 3);
        assert!(state.fix_suggestions.is_none());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fix_request_failure_is_only_a_warning() {
        let fakes = Fakes::new("DP-1");
        fakes.workspace.push_test_output(output(1, "Tests: 0 passed, 1 failed"));
        let tester = Tester::new(
            &fakes.collaborators(Some(Arc::new(ScriptedLlm::failing()))),
            WorkflowSettings::default(),
        );

        let state = tester.run(implemented_state("DP-1")).await;

        assert_eq!(state.status, Status::Testing);
        assert!(state.error.is_none());
        assert!(state.fix_suggestions.is_none());
    }

    #[tokio::test]
    async fn test_run_failure_does_not_count_iteration() {
        let fakes = Fakes::new("DP-1");
        fakes.workspace.fail_commands();
        let tester = Tester::new(&fakes.collaborators(None), WorkflowSettings::default());

        let state = tester.run(implemented_state("DP-1")).await;

        assert_eq!(state.status, Status::Failed);
        assert_eq!(state.test_iterations, 0);
        let results = state.test_results.unwrap();
        assert!(!results.success);
        assert!(results.error.unwrap().starts_with("Tester error:"));
    }
}
