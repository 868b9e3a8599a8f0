pub mod git;
pub mod manager;
pub mod shell;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use manager::WorkspaceManager;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The leading lines of one existing source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSample {
    pub path: String,
    pub content: String,
}

/// Working-copy, version-control and shell access for one target repository.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Remove any previous working copy for the ticket, clone afresh and
    /// configure the bot identity. Returns the working-copy path.
    async fn prepare(&self, ticket_id: &str) -> Result<PathBuf>;

    async fn remote_branch_exists(&self, repo: &Path, branch: &str) -> Result<bool>;

    /// Check out `branch` from the remote when `exists`, else create it from HEAD.
    async fn checkout_or_create_branch(&self, repo: &Path, branch: &str, exists: bool)
        -> Result<()>;

    async fn commit_log(&self, repo: &Path, limit: usize) -> Result<Vec<String>>;

    /// Stage and commit everything; commits even when the tree is unchanged.
    async fn commit_all_allow_empty(&self, repo: &Path, message: &str) -> Result<String>;

    async fn force_push(&self, repo: &Path, branch: &str) -> Result<()>;

    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutput>;

    /// Write `content` to `repo/relative`, creating parent directories.
    /// Returns whether an existing file was replaced. Paths escaping the
    /// working copy are rejected.
    async fn write_file(&self, repo: &Path, relative: &str, content: &str) -> Result<bool>;

    /// The first `max_lines` lines of up to `max_files` source files under `src/`.
    async fn sample_sources(
        &self,
        repo: &Path,
        max_files: usize,
        max_lines: usize,
    ) -> Result<Vec<SourceSample>>;
}
