use std::future::Future;
use std::sync::Arc;

use crate::workflow::checkpoint::Checkpointer;
use crate::workflow::implementer::Implementer;
use crate::workflow::planner::Planner;
use crate::workflow::reporter::Reporter;
use crate::workflow::router::Router;
use crate::workflow::state::{Route, Status, WorkflowState};
use crate::workflow::tester::Tester;
use crate::workflow::{Collaborators, Step, WorkflowSettings};

/// Runs the Router and the four work steps until the Router says `done`
/// or a step fails.
pub struct Orchestrator {
    router: Router,
    planner: Planner,
    implementer: Implementer,
    tester: Tester,
    reporter: Reporter,
    checkpointer: Arc<dyn Checkpointer>,
    max_steps: u32,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        settings: WorkflowSettings,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        Self {
            router: Router::new(collaborators.llm.clone(), settings.max_test_iterations),
            planner: Planner::new(&collaborators),
            implementer: Implementer::new(&collaborators, settings.clone()),
            tester: Tester::new(&collaborators, settings.clone()),
            reporter: Reporter::new(&collaborators, &settings),
            checkpointer,
            max_steps: settings.max_steps,
        }
    }

    fn step_for(&self, route: Route) -> Option<&dyn Step> {
        match route {
            Route::Planner => Some(&self.planner),
            Route::Implementer => Some(&self.implementer),
            Route::Tester => Some(&self.tester),
            Route::Reporter => Some(&self.reporter),
            Route::Done => None,
        }
    }

    /// Resume `thread_id` from its last non-terminal snapshot, or start fresh.
    async fn initial_state(&self, ticket_id: &str, thread_id: &str) -> WorkflowState {
        match self.checkpointer.load(thread_id).await {
            Ok(Some(saved)) if saved.ticket_id == ticket_id && !saved.status.is_terminal() => {
                tracing::info!(
                    ticket = ticket_id,
                    thread = thread_id,
                    status = %saved.status,
                    "Resuming from checkpoint"
                );
                saved
            }
            Ok(Some(saved)) => {
                tracing::info!(
                    ticket = ticket_id,
                    thread = thread_id,
                    status = %saved.status,
                    "Checkpoint not resumable, starting fresh"
                );
                WorkflowState::new(ticket_id)
            }
            Ok(None) => WorkflowState::new(ticket_id),
            Err(e) => {
                tracing::warn!(thread = thread_id, error = %e, "Failed to load checkpoint");
                WorkflowState::new(ticket_id)
            }
        }
    }

    async fn commit(&self, thread_id: &str, state: &mut WorkflowState) {
        state.confidence.refresh_overall();
        if let Err(e) = self.checkpointer.save(thread_id, state).await {
            tracing::warn!(thread = thread_id, error = %e, "Failed to save checkpoint");
        }
    }

    /// Drive one ticket to completion.
    ///
    /// - `thread_id`: checkpoint key; defaults to a fresh id, which never resumes.
    /// - `is_cancelled`: checked before every graph transition.
    pub async fn run<F, Fut>(
        &self,
        ticket_id: &str,
        thread_id: Option<&str>,
        is_cancelled: F,
    ) -> WorkflowState
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let thread_id = thread_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut state = self.initial_state(ticket_id, &thread_id).await;

        tracing::info!(ticket = ticket_id, thread = %thread_id, "Workflow started");

        // `None` means the Router decides next.
        let mut pending: Option<Route> = None;

        for transition in 0..self.max_steps {
            if is_cancelled().await {
                tracing::info!(ticket = ticket_id, "Workflow cancelled");
                state.fail("Orchestrator error: run cancelled");
                self.commit(&thread_id, &mut state).await;
                return state;
            }

            match pending.take() {
                None => {
                    state = self.router.run(state).await;
                    self.commit(&thread_id, &mut state).await;

                    let route = state.route.unwrap_or(Route::Done);
                    if route == Route::Done || state.status == Status::Failed {
                        tracing::info!(
                            ticket = ticket_id,
                            status = %state.status,
                            transitions = transition + 1,
                            overall = state.confidence.overall,
                            pr = state.pr_url.as_deref().unwrap_or("-"),
                            "Workflow finished"
                        );
                        return state;
                    }
                    pending = Some(route);
                }
                Some(route) => {
                    let Some(step) = self.step_for(route) else {
                        continue;
                    };
                    tracing::info!(ticket = ticket_id, step = step.name(), "Running step");
                    state = step.run(state).await;
                    self.commit(&thread_id, &mut state).await;
                }
            }
        }

        state.fail(format!(
            "Orchestrator error: step limit of {} transitions reached",
            self.max_steps
        ));
        self.commit(&thread_id, &mut state).await;
        state
    }
}
