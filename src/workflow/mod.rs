pub mod checkpoint;
pub mod graph;
pub mod implementer;
pub mod parsers;
pub mod planner;
pub mod prompts;
pub mod reporter;
pub mod router;
pub mod state;
pub mod tester;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::Result;
use crate::llm::claude::ClaudeClient;
use crate::llm::{ChatMessage, CompletionProvider};
use crate::notify::discord::DiscordNotifier;
use crate::notify::Notifier;
use crate::platform::github::GitHubHost;
use crate::platform::SourceHost;
use crate::tracker::jira::JiraTracker;
use crate::tracker::TicketTracker;
use crate::workspace::{Workspace, WorkspaceManager};

pub use graph::Orchestrator;
pub use state::{Route, Status, WorkflowState};

/// One node of the workflow graph: a function from one state snapshot to the next.
///
/// Steps never fail outward. Errors are recorded in the returned state's
/// `error` and `status` fields.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, state: WorkflowState) -> WorkflowState;
}

/// Every external service a run talks to, constructed once at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub tracker: Arc<dyn TicketTracker>,
    pub host: Arc<dyn SourceHost>,
    pub notifier: Arc<dyn Notifier>,
    pub workspace: Arc<dyn Workspace>,
    /// `None` switches every step to its deterministic fallback.
    pub llm: Option<Arc<dyn CompletionProvider>>,
}

impl Collaborators {
    /// Jira, GitHub, Discord, a local git workspace and, when a key is set, Claude.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let llm: Option<Arc<dyn CompletionProvider>> = match config.llm_api_key() {
            Some(key) => Some(Arc::new(ClaudeClient::new(
                key,
                &config.llm.model,
                config.llm.max_tokens,
            )?)),
            None => {
                tracing::warn!("No completion provider configured, using templated fallbacks");
                None
            }
        };

        Ok(Self {
            tracker: Arc::new(JiraTracker::new(&config.jira)?),
            host: Arc::new(GitHubHost::new(&config.github)?),
            notifier: Arc::new(DiscordNotifier::new(&config.discord)?),
            workspace: Arc::new(WorkspaceManager::new(&config.workspace, &config.github)),
            llm,
        })
    }
}

/// Tunables shared by the steps.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub base_branch: String,
    pub install_command: String,
    pub install_timeout: Duration,
    pub test_command: String,
    pub test_timeout: Duration,
    pub max_test_iterations: u32,
    pub max_steps: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            install_command: "npm install".to_string(),
            install_timeout: Duration::from_secs(180),
            test_command: "npm test -- --watchAll=false --coverage --passWithNoTests".to_string(),
            test_timeout: Duration::from_secs(300),
            max_test_iterations: state::MAX_TEST_ITERATIONS,
            max_steps: 25,
        }
    }
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_branch: config.github.base_branch.clone(),
            install_command: config.workspace.install_command.clone(),
            install_timeout: Duration::from_secs(config.workspace.install_timeout_secs),
            test_command: config.workspace.test_command.clone(),
            test_timeout: Duration::from_secs(config.workspace.test_timeout_secs),
            max_test_iterations: config.workflow.max_test_iterations,
            max_steps: config.workflow.max_steps,
        }
    }
}

/// Send a system + user exchange and return the trimmed reply.
pub(crate) async fn ask(
    llm: &dyn CompletionProvider,
    system: &str,
    prompt: String,
) -> Result<String> {
    let reply = llm
        .complete(&[ChatMessage::system(system), ChatMessage::user(prompt)])
        .await?;
    Ok(reply.trim().to_string())
}
