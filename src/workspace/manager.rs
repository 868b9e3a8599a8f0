use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{GitHubConfig, WorkspaceConfig};
use crate::error::{AppError, Result};
use crate::workspace::{git, shell, CommandOutput, SourceSample, Workspace};

const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx"];
const SOURCE_SCAN_LIMIT: usize = 20;
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "build", "dist", "coverage"];

/// Manages per-ticket working copies of the target repository.
pub struct WorkspaceManager {
    base_dir: PathBuf,
    clone_url: String,
    token: String,
    bot_name: String,
    bot_email: String,
}

impl WorkspaceManager {
    pub fn new(workspace: &WorkspaceConfig, github: &GitHubConfig) -> Self {
        Self {
            base_dir: workspace.base_dir.clone(),
            clone_url: github.clone_url(),
            token: github.token.clone(),
            bot_name: workspace.bot_name.clone(),
            bot_email: workspace.bot_email.clone(),
        }
    }

    /// `<base_dir>/project_<ticket>`, with anything outside `[A-Za-z0-9_-]` replaced.
    pub fn workspace_path(&self, ticket_id: &str) -> PathBuf {
        let safe: String = ticket_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_dir.join(format!("project_{safe}"))
    }

    /// Clean up an existing workspace directory and ensure its parent exists.
    async fn prepare_workspace_dir(path: &Path) -> Result<()> {
        if path.exists() {
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to clean workspace: {e}")))?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to create workspace dir: {e}")))?;
        }
        Ok(())
    }

    /// Resolve a path inside the workspace, creating missing parent directories.
    ///
    /// Absolute paths and `..` components are refused before anything touches
    /// the filesystem; symlinks are caught by comparing canonical forms.
    pub fn verify_path(workspace_root: &Path, requested_path: &Path) -> Result<PathBuf> {
        let escapes = requested_path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || requested_path.as_os_str().is_empty() {
            return Err(AppError::Workspace(format!(
                "Path traversal detected: {} is outside workspace",
                requested_path.display()
            )));
        }

        let full_path = workspace_root.join(requested_path);
        let parent = full_path
            .parent()
            .ok_or_else(|| AppError::Workspace("Invalid file path".to_string()))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::Workspace(format!("Failed to create directory: {e}")))?;

        let canonical_parent = parent
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;
        let file_name = full_path
            .file_name()
            .ok_or_else(|| AppError::Workspace("Invalid file name".to_string()))?;
        let canonical = canonical_parent.join(file_name);

        let canonical_root = workspace_root
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve workspace root: {e}")))?;

        if !canonical.starts_with(&canonical_root) {
            return Err(AppError::Workspace(format!(
                "Path traversal detected: {} is outside workspace",
                requested_path.display()
            )));
        }

        Ok(canonical)
    }
}

#[async_trait]
impl Workspace for WorkspaceManager {
    async fn prepare(&self, ticket_id: &str) -> Result<PathBuf> {
        let path = self.workspace_path(ticket_id);
        Self::prepare_workspace_dir(&path).await?;

        tracing::info!(ticket = ticket_id, path = %path.display(), "Cloning repository");
        git::clone(&self.clone_url, &path, &self.token).await?;
        git::configure_identity(&path, &self.bot_name, &self.bot_email).await?;

        Ok(path)
    }

    async fn remote_branch_exists(&self, repo: &Path, branch: &str) -> Result<bool> {
        git::remote_branch_exists(repo, branch).await
    }

    async fn checkout_or_create_branch(
        &self,
        repo: &Path,
        branch: &str,
        exists: bool,
    ) -> Result<()> {
        if exists {
            git::checkout_remote_branch(repo, branch).await
        } else {
            git::create_branch(repo, branch).await
        }
    }

    async fn commit_log(&self, repo: &Path, limit: usize) -> Result<Vec<String>> {
        git::commit_log(repo, limit).await
    }

    async fn commit_all_allow_empty(&self, repo: &Path, message: &str) -> Result<String> {
        git::commit_all(repo, message, &self.bot_name, &self.bot_email).await
    }

    async fn force_push(&self, repo: &Path, branch: &str) -> Result<()> {
        git::force_push(repo, branch, &self.token).await
    }

    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutput> {
        shell::run_command(command, cwd, timeout).await
    }

    async fn write_file(&self, repo: &Path, relative: &str, content: &str) -> Result<bool> {
        let target = Self::verify_path(repo, Path::new(relative))?;
        let existed = target.is_file();
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to write {relative}: {e}")))?;
        Ok(existed)
    }

    async fn sample_sources(
        &self,
        repo: &Path,
        max_files: usize,
        max_lines: usize,
    ) -> Result<Vec<SourceSample>> {
        let repo = repo.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut files = find_sources(&repo.join("src"), SOURCE_SCAN_LIMIT);
            files.sort();

            let mut samples = Vec::new();
            for path in files.into_iter().take(max_files) {
                let Ok(text) = std::fs::read_to_string(&path) else {
                    continue;
                };
                let head = text.lines().take(max_lines).collect::<Vec<_>>().join("\n");
                let relative = path
                    .strip_prefix(&repo)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();
                samples.push(SourceSample {
                    path: relative,
                    content: head,
                });
            }
            Ok(samples)
        })
        .await
        .map_err(|e| AppError::Workspace(format!("Source scan task panicked: {e}")))?
    }
}

/// Depth-first scan for source files, stopping after `limit` hits.
fn find_sources(root: &Path, limit: usize) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        entries.sort();

        for path in entries {
            if path.is_dir() {
                let skipped = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| SKIPPED_DIRS.contains(&n));
                if !skipped {
                    stack.push(path);
                }
                continue;
            }
            let is_source = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e));
            if is_source {
                found.push(path);
                if found.len() >= limit {
                    return found;
                }
            }
        }
    }
    found
}
