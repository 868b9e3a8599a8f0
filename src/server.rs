use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::queue::{CancelOutcome, TaskQueue};
use crate::workflow::{checkpoint, Collaborators, Orchestrator, WorkflowSettings};

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub task_queue: Arc<RwLock<TaskQueue>>,
}

impl AppState {
    pub fn new(config: &AppConfig) -> crate::error::Result<Self> {
        let orchestrator = Orchestrator::new(
            Collaborators::from_config(config)?,
            WorkflowSettings::from_config(config),
            checkpoint::from_config(&config.workflow),
        );

        Ok(Self::with_orchestrator(
            orchestrator,
            TaskQueue::with_retention(config.server.task_retention_secs),
        ))
    }

    pub fn with_orchestrator(orchestrator: Orchestrator, task_queue: TaskQueue) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            task_queue: Arc::new(RwLock::new(task_queue)),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tasks", axum::routing::post(submit_task))
        .route("/tasks/:id", get(get_task).delete(cancel_task))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    ticket_id: String,
}

async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    let ticket_id = request.ticket_id.trim();
    if ticket_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "ticket_id must not be empty"})),
        )
            .into_response();
    }

    let id = state.task_queue.write().await.submit(ticket_id);
    (
        StatusCode::ACCEPTED,
        Json(json!({"id": id, "ticket_id": ticket_id, "state": "pending"})),
    )
        .into_response()
}

async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.task_queue.read().await.poll(id) {
        Some(record) => Json(record).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn cancel_task(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> StatusCode {
    match state.task_queue.write().await.cancel(id) {
        CancelOutcome::NotFound => StatusCode::NOT_FOUND,
        CancelOutcome::Removed | CancelOutcome::Signalled | CancelOutcome::AlreadyFinished => {
            StatusCode::NO_CONTENT
        }
    }
}

async fn health_check() -> &'static str {
    "ok"
}
