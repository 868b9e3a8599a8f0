use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::WorkflowConfig;
use crate::error::{AppError, Result};
use crate::workflow::state::WorkflowState;

/// Persists a state snapshot per thread id after every graph transition.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, thread_id: &str, state: &WorkflowState) -> Result<()>;

    async fn load(&self, thread_id: &str) -> Result<Option<WorkflowState>>;
}

/// File-backed when `checkpoint_dir` is set, in memory otherwise.
pub fn from_config(config: &WorkflowConfig) -> Arc<dyn Checkpointer> {
    match &config.checkpoint_dir {
        Some(dir) => Arc::new(FileCheckpointer::new(dir)),
        None => Arc::new(MemoryCheckpointer::new()),
    }
}

/// Keeps only resumable snapshots: a terminal state drops its thread's entry.
#[derive(Default)]
pub struct MemoryCheckpointer {
    snapshots: Mutex<HashMap<String, WorkflowState>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, thread_id: &str, state: &WorkflowState) -> Result<()> {
        let mut snapshots = self.snapshots.lock().await;
        if state.status.is_terminal() {
            snapshots.remove(thread_id);
        } else {
            snapshots.insert(thread_id.to_string(), state.clone());
        }
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<WorkflowState>> {
        Ok(self.snapshots.lock().await.get(thread_id).cloned())
    }
}

impl MemoryCheckpointer {
    pub async fn len(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// One JSON file per thread id under a directory.
pub struct FileCheckpointer {
    dir: PathBuf,
}

impl FileCheckpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        let safe: String = thread_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| AppError::Checkpoint(format!("Failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| AppError::Checkpoint(format!("Failed to replace {}: {e}", path.display())))
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(&self, thread_id: &str, state: &WorkflowState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::Checkpoint(format!("Failed to create {}: {e}", self.dir.display())))?;
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path_for(thread_id), &bytes).await
    }

    async fn load(&self, thread_id: &str) -> Result<Option<WorkflowState>> {
        let path = self.path_for(thread_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Checkpoint(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}
