use async_trait::async_trait;
use octocrab::{params, Octocrab};

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::SourceHost;

use super::mapper;

/// GitHub filters pull requests by head as `owner:branch`.
fn head_filter(owner: &str, branch: &str) -> String {
    format!("{owner}:{branch}")
}

/// GitHub repository access through a personal or bot token.
pub struct GitHubHost {
    client: Octocrab,
    owner: String,
    repo: String,
}

impl GitHubHost {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        if config.token.is_empty() {
            return Err(AppError::Config("github.token is not set".to_string()));
        }

        let client = Octocrab::builder()
            .personal_token(config.token.clone())
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self {
            client,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
        })
    }
}

#[async_trait]
impl SourceHost for GitHubHost {
    async fn list_pull_requests(&self, state: PrState, head: Option<&str>) -> Result<Vec<PullRequest>> {
        let state = match state {
            PrState::Open => params::State::Open,
            PrState::Closed => params::State::Closed,
            PrState::All => params::State::All,
        };

        let pulls = self.client.pulls(&self.owner, &self.repo);
        let mut request = pulls.list().state(state).per_page(100);
        if let Some(branch) = head {
            request = request.head(head_filter(&self.owner, branch));
        }
        let first = request.send().await?;
        let items = self.client.all_pages(first).await?;

        Ok(items.iter().map(mapper::map_pull_request).collect())
    }

    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        let created = self
            .client
            .pulls(&self.owner, &self.repo)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .send()
            .await?;

        tracing::info!(number = created.number, head = %pr.head_branch, "Created pull request");
        Ok(mapper::map_pull_request(&created))
    }

    async fn add_pr_comment(&self, number: u64, body: &str) -> Result<()> {
        self.client
            .issues(&self.owner, &self.repo)
            .create_comment(number, body)
            .await?;
        Ok(())
    }

    async fn get_pr_comments(&self, number: u64, limit: usize) -> Result<Vec<PrComment>> {
        let page = self
            .client
            .issues(&self.owner, &self.repo)
            .list_comments(number)
            .per_page(100)
            .send()
            .await?;

        Ok(page
            .items
            .into_iter()
            .take(limit)
            .map(mapper::map_pr_comment)
            .collect())
    }

    async fn get_review_comments(&self, number: u64, limit: usize) -> Result<Vec<ReviewComment>> {
        let url = format!("/repos/{}/{}/pulls/{number}/comments", self.owner, self.repo);
        let comments: Vec<serde_json::Value> = self
            .client
            .get(&url, None::<&()>)
            .await
            .map_err(|e| AppError::GitHubApi(format!("Failed to fetch review comments: {e}")))?;

        Ok(comments
            .iter()
            .take(limit)
            .map(mapper::map_review_comment)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_filter_is_owner_qualified() {
        assert_eq!(head_filter("acme", "DP-123"), "acme:DP-123");
    }

    #[test]
    fn test_requires_token() {
        let config = GitHubConfig {
            token: String::new(),
            owner: "acme".to_string(),
            repo: "web".to_string(),
            base_branch: "main".to_string(),
        };
        assert!(GitHubHost::new(&config).is_err());
    }
}
