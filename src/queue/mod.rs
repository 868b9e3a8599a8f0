pub mod task;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};

use crate::workflow::{Orchestrator, WorkflowState};

use task::{TaskHandle, TaskRecord, TaskState};

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Pending task dropped from its ticket queue.
    Removed,
    /// Running task flagged; the workflow stops before its next transition.
    Signalled,
    AlreadyFinished,
    NotFound,
}

/// A run handed to the processor: task id, ticket and its cancellation flag.
pub struct ReadyTask {
    pub id: TaskHandle,
    pub ticket_id: String,
    pub cancelled: Arc<AtomicBool>,
}

/// How long a finished task stays pollable by default.
pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Ticket runs, queued per ticket id.
///
/// Runs for one ticket execute one at a time since they share a working copy;
/// different tickets run concurrently. Finished records are evicted once
/// they are older than the retention window.
pub struct TaskQueue {
    records: HashMap<TaskHandle, TaskRecord>,
    retention: chrono::Duration,
    /// Pending task ids per ticket, oldest first.
    pending: HashMap<String, VecDeque<TaskHandle>>,
    /// The running task per ticket.
    running: HashMap<String, TaskHandle>,
    cancel_flags: HashMap<TaskHandle, Arc<AtomicBool>>,
    /// Notification channel for the processor.
    notify: Option<mpsc::UnboundedSender<()>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION_SECS)
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention_secs: u64) -> Self {
        Self {
            records: HashMap::new(),
            retention: chrono::Duration::seconds(i64::try_from(retention_secs).unwrap_or(i64::MAX)),
            pending: HashMap::new(),
            running: HashMap::new(),
            cancel_flags: HashMap::new(),
            notify: None,
        }
    }

    /// Drop finished records whose retention window has passed at `now`.
    pub fn prune_finished(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.retention;
        let before = self.records.len();
        self.records.retain(|_, record| match record.finished_at {
            Some(finished) if record.state.is_finished() => now - finished < retention,
            _ => true,
        });
        let evicted = before - self.records.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished task records");
        }
        evicted
    }

    pub fn set_notifier(&mut self, tx: mpsc::UnboundedSender<()>) {
        self.notify = Some(tx);
    }

    fn wake(&self) {
        if let Some(tx) = &self.notify {
            let _ = tx.send(());
        }
    }

    pub fn submit(&mut self, ticket_id: &str) -> TaskHandle {
        self.prune_finished(Utc::now());

        let record = TaskRecord::new(ticket_id);
        let id = record.id;
        tracing::info!(task = %record.description(), "Enqueuing task");

        self.pending
            .entry(ticket_id.to_string())
            .or_default()
            .push_back(id);
        self.records.insert(id, record);
        self.wake();
        id
    }

    pub fn poll(&self, id: TaskHandle) -> Option<TaskRecord> {
        self.records.get(&id).cloned()
    }

    pub fn cancel(&mut self, id: TaskHandle) -> CancelOutcome {
        let Some(record) = self.records.get_mut(&id) else {
            return CancelOutcome::NotFound;
        };

        match record.state {
            TaskState::Pending => {
                if let Some(queue) = self.pending.get_mut(&record.ticket_id) {
                    queue.retain(|queued| *queued != id);
                    if queue.is_empty() {
                        self.pending.remove(&record.ticket_id);
                    }
                }
                record.finish(TaskState::Cancelled, None);
                tracing::info!(task = %record.description(), "Cancelled pending task");
                CancelOutcome::Removed
            }
            TaskState::Running => {
                if let Some(flag) = self.cancel_flags.get(&id) {
                    flag.store(true, Ordering::SeqCst);
                }
                tracing::info!(task = %record.description(), "Cancellation requested for running task");
                CancelOutcome::Signalled
            }
            _ => CancelOutcome::AlreadyFinished,
        }
    }

    /// Cancel every pending and running task.
    pub fn cancel_all(&mut self) -> usize {
        let ids: Vec<TaskHandle> = self
            .records
            .values()
            .filter(|r| !r.state.is_finished())
            .map(|r| r.id)
            .collect();
        for id in &ids {
            self.cancel(*id);
        }
        ids.len()
    }

    /// Start the oldest pending task of every ticket that has nothing running.
    pub fn take_ready(&mut self) -> Vec<ReadyTask> {
        let idle: Vec<String> = self
            .pending
            .keys()
            .filter(|ticket| !self.running.contains_key(*ticket))
            .cloned()
            .collect();

        let mut ready = Vec::new();
        for ticket_id in idle {
            let Some(id) = self.pending.get_mut(&ticket_id).and_then(|q| q.pop_front()) else {
                continue;
            };
            if self.pending.get(&ticket_id).is_some_and(|q| q.is_empty()) {
                self.pending.remove(&ticket_id);
            }
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            record.state = TaskState::Running;

            let cancelled = Arc::new(AtomicBool::new(false));
            self.cancel_flags.insert(id, cancelled.clone());
            self.running.insert(ticket_id.clone(), id);
            ready.push(ReadyTask {
                id,
                ticket_id,
                cancelled,
            });
        }
        ready
    }

    /// Record the outcome of a run. `None` means the run crashed.
    pub fn finish(&mut self, id: TaskHandle, result: Option<WorkflowState>) {
        let cancelled = self
            .cancel_flags
            .remove(&id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst));

        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        let state = match &result {
            _ if cancelled => TaskState::Cancelled,
            Some(s) if s.succeeded() => TaskState::Succeeded,
            _ => TaskState::Failed,
        };
        record.finish(state, result);
        tracing::info!(task = %record.description(), state = ?state, "Task finished");

        if self.running.get(&record.ticket_id) == Some(&id) {
            self.running.remove(&record.ticket_id);
        }
        self.prune_finished(Utc::now());
        self.wake();
    }
}

/// Run the background queue processor until the queue's sender side is dropped.
pub async fn run_queue_processor(queue: Arc<RwLock<TaskQueue>>, orchestrator: Arc<Orchestrator>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    {
        let mut queue = queue.write().await;
        queue.set_notifier(tx.clone());
    }
    // Pick up anything submitted before the notifier was installed.
    let _ = tx.send(());
    drop(tx);

    tracing::info!("Queue processor started");

    while rx.recv().await.is_some() {
        let ready = queue.write().await.take_ready();

        for task in ready {
            tracing::info!(task = %task.id, ticket = %task.ticket_id, "Processing task");

            let queue = Arc::clone(&queue);
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                let ReadyTask {
                    id,
                    ticket_id,
                    cancelled,
                } = task;
                let thread_id = id.to_string();

                let run = tokio::spawn(async move {
                    orchestrator
                        .run(&ticket_id, Some(&thread_id), || {
                            std::future::ready(cancelled.load(Ordering::SeqCst))
                        })
                        .await
                });

                let result = match run.await {
                    Ok(state) => Some(state),
                    Err(e) => {
                        tracing::error!(task = %id, error = %e, "Task panicked");
                        None
                    }
                };
                queue.write().await.finish(id, result);
            });
        }
    }

    tracing::info!("Queue processor stopped");
}
