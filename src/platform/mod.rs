pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

/// The source-hosting service holding the target repository.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// List every pull request in the given state, narrowed to one head
    /// branch when `head` is set.
    async fn list_pull_requests(&self, state: PrState, head: Option<&str>) -> Result<Vec<PullRequest>>;

    /// Create a pull request.
    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest>;

    /// Post a conversation comment on a pull request.
    async fn add_pr_comment(&self, number: u64, body: &str) -> Result<()>;

    /// Fetch at most `limit` conversation comments on a pull request.
    async fn get_pr_comments(&self, number: u64, limit: usize) -> Result<Vec<PrComment>>;

    /// Fetch at most `limit` inline review comments on a pull request.
    async fn get_review_comments(&self, number: u64, limit: usize) -> Result<Vec<ReviewComment>>;
}

/// First pull request in `state` whose head branch is `branch`.
pub async fn find_by_head(
    host: &dyn SourceHost,
    state: PrState,
    branch: &str,
) -> Result<Option<PullRequest>> {
    let prs = host.list_pull_requests(state, Some(branch)).await?;
    Ok(prs.into_iter().find(|pr| pr.head_ref == branch))
}
