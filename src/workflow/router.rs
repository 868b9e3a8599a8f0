use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::CompletionProvider;
use crate::workflow::parsers::{parse_route_decision, RouteDecision};
use crate::workflow::prompts;
use crate::workflow::state::{clamp_unit, Route, WorkflowState};
use crate::workflow::{ask, Step};

const FALLBACK_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingOutcome {
    pub route: Route,
    pub confidence: f64,
    pub reason: String,
}

/// Picks the next step. Never fails: anything it cannot use from the
/// completion provider degrades to [`fallback_route`].
pub struct Router {
    llm: Option<Arc<dyn CompletionProvider>>,
    max_test_iterations: u32,
}

impl Router {
    pub fn new(llm: Option<Arc<dyn CompletionProvider>>, max_test_iterations: u32) -> Self {
        Self {
            llm,
            max_test_iterations,
        }
    }

    pub async fn decide(&self, state: &WorkflowState) -> RoutingOutcome {
        if state.error.is_some() || state.status.is_terminal() {
            return RoutingOutcome {
                route: Route::Done,
                confidence: 1.0,
                reason: format!("run finished with status {}", state.status),
            };
        }

        let decision = match &self.llm {
            Some(llm) => match ask(llm.as_ref(), prompts::ROUTER_SYSTEM, prompts::routing_prompt(state)).await {
                Ok(reply) => parse_route_decision(&reply),
                Err(e) => {
                    tracing::warn!(ticket = %state.ticket_id, error = %e, "Routing call failed");
                    RouteDecision::Unparsed(String::new())
                }
            },
            None => RouteDecision::Unparsed(String::new()),
        };

        let mut outcome = match decision {
            RouteDecision::Parsed {
                route,
                confidence,
                reason,
            } if state.status.can_transition_to(route.target_status()) => RoutingOutcome {
                route,
                confidence,
                reason,
            },
            RouteDecision::Parsed { route, .. } => {
                tracing::warn!(
                    ticket = %state.ticket_id,
                    %route,
                    status = %state.status,
                    "Route not reachable from current status, using fallback"
                );
                fallback(state, format!("{route} is not reachable from {}", state.status))
            }
            RouteDecision::Unparsed(raw) => {
                if self.llm.is_some() {
                    tracing::warn!(ticket = %state.ticket_id, reply = %raw, "Unusable routing reply, using fallback");
                }
                fallback(state, "fallback routing".to_string())
            }
        };

        if outcome.route == Route::Tester && state.test_iterations >= self.max_test_iterations {
            tracing::warn!(
                ticket = %state.ticket_id,
                iterations = state.test_iterations,
                "Max test iterations reached, routing to reporter"
            );
            outcome.route = Route::Reporter;
            outcome.reason = format!(
                "max test iterations reached ({})",
                self.max_test_iterations
            );
        }

        outcome.confidence = clamp_unit(outcome.confidence);
        outcome
    }
}

fn fallback(state: &WorkflowState, reason: String) -> RoutingOutcome {
    RoutingOutcome {
        route: fallback_route(state),
        confidence: FALLBACK_CONFIDENCE,
        reason,
    }
}

/// Deterministic decision tree used whenever the provider's answer is unusable.
pub fn fallback_route(state: &WorkflowState) -> Route {
    if state.pr_url.is_some() {
        Route::Done
    } else if state.tests_passed() {
        Route::Reporter
    } else if state.skip_implementation {
        Route::Tester
    } else if state.tests_failed() && state.fix_suggestions.is_some() {
        Route::Implementer
    } else if !state.code_changes.is_empty() {
        Route::Tester
    } else if state.has_plan() {
        Route::Implementer
    } else {
        Route::Planner
    }
}

#[async_trait]
impl Step for Router {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn run(&self, mut state: WorkflowState) -> WorkflowState {
        let outcome = self.decide(&state).await;
        tracing::info!(
            ticket = %state.ticket_id,
            route = %outcome.route,
            confidence = outcome.confidence,
            reason = %outcome.reason,
            "Routed"
        );
        state.route = Some(outcome.route);
        state.confidence.routing = outcome.confidence;
        state
    }
}
