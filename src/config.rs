use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub jira: JiraConfig,
    pub discord: DiscordConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds a finished task stays pollable.
    #[serde(default = "default_task_retention")]
    pub task_retention_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            task_retention_secs: default_task_retention(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"[REDACTED]")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("base_branch", &self.base_branch)
            .finish()
    }
}

impl GitHubConfig {
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }
}

#[derive(Deserialize, Clone)]
pub struct JiraConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
}

impl std::fmt::Debug for JiraConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct DiscordConfig {
    #[serde(default)]
    pub webhook_url: String,
}

// The webhook URL embeds its own credential
impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("webhook_url", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    /// Absent key means no completion provider: every step uses its templated fallback.
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_install_command")]
    pub install_command: String,
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_test_command")]
    pub test_command: String,
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default = "default_bot_email")]
    pub bot_email: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_workspace_dir(),
            install_command: default_install_command(),
            install_timeout_secs: default_install_timeout(),
            test_command: default_test_command(),
            test_timeout_secs: default_test_timeout(),
            bot_name: default_bot_name(),
            bot_email: default_bot_email(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_test_iterations")]
    pub max_test_iterations: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Directory for per-thread state snapshots. Unset keeps checkpoints in memory.
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_test_iterations: default_max_test_iterations(),
            max_steps: default_max_steps(),
            checkpoint_dir: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_task_retention() -> u64 {
    crate::queue::DEFAULT_RETENTION_SECS
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_install_command() -> String {
    "npm install".to_string()
}

fn default_install_timeout() -> u64 {
    180
}

fn default_test_command() -> String {
    "npm test -- --watchAll=false --coverage --passWithNoTests".to_string()
}

fn default_test_timeout() -> u64 {
    300
}

fn default_bot_name() -> String {
    "Devflow Bot".to_string()
}

fn default_bot_email() -> String {
    "devflow-bot@users.noreply.github.com".to_string()
}

fn default_max_test_iterations() -> u32 {
    3
}

fn default_max_steps() -> u32 {
    25
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("devflow").required(false));
        }

        // Environment variable overrides with DEVFLOW_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("DEVFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    /// List every missing required setting. An empty list means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.github.token.is_empty() || self.github.owner.is_empty() || self.github.repo.is_empty()
        {
            errors.push("GitHub configuration incomplete (github.token, github.owner, github.repo)".to_string());
        }
        if self.jira.url.is_empty() || self.jira.username.is_empty() || self.jira.api_token.is_empty()
        {
            errors.push("Jira configuration incomplete (jira.url, jira.username, jira.api_token)".to_string());
        }
        if self.discord.webhook_url.is_empty() {
            errors.push("Discord configuration incomplete (discord.webhook_url)".to_string());
        }
        errors
    }

    pub fn llm_api_key(&self) -> Option<&str> {
        self.llm.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let cfg = from_toml(
            r#"
            [github]
            token = "t"
            owner = "acme"
            repo = "web"
            [jira]
            url = "https://acme.atlassian.net"
            username = "bot"
            api_token = "x"
            [discord]
            webhook_url = "https://discord.test/hook"
            "#,
        );

        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.server.task_retention_secs, 3600);
        assert_eq!(cfg.github.base_branch, "main");
        assert_eq!(cfg.workflow.max_test_iterations, 3);
        assert_eq!(cfg.workspace.test_timeout_secs, 300);
        assert!(cfg.llm_api_key().is_none());
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.github.clone_url(), "https://github.com/acme/web.git");
    }

    #[test]
    fn test_validate_reports_missing_sections() {
        let cfg = from_toml(
            r#"
            [github]
            owner = "acme"
            [jira]
            [discord]
            "#,
        );

        let errors = cfg.validate();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("GitHub"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cfg = from_toml(
            r#"
            [github]
            token = "ghp_secret"
            [jira]
            api_token = "jira_secret"
            [discord]
            webhook_url = "https://discord.test/hook/secret"
            [llm]
            api_key = "sk-secret"
            "#,
        );

        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("secret"));
        assert_eq!(cfg.llm_api_key(), Some("sk-secret"));
    }
}
