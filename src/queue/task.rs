use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::WorkflowState;

pub type TaskHandle = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// What `poll` reports for a submitted ticket run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: TaskHandle,
    pub ticket_id: String,
    pub state: TaskState,
    /// Final workflow state once the run has finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkflowState>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(ticket_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id: ticket_id.to_string(),
            state: TaskState::Pending,
            result: None,
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn description(&self) -> String {
        format!("Run workflow for {} ({})", self.ticket_id, self.id)
    }

    pub(crate) fn finish(&mut self, state: TaskState, result: Option<WorkflowState>) {
        self.state = state;
        self.result = result;
        self.finished_at = Some(Utc::now());
    }
}
