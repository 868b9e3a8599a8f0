use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use crate::config::JiraConfig;
use crate::error::{AppError, Result};
use crate::tracker::types::*;
use crate::tracker::TicketTracker;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_COMMENT_CHARS: usize = 500;

/// Jira REST v2 client authenticated with username + API token.
pub struct JiraTracker {
    client: Client,
    base_url: String,
    username: String,
    api_token: String,
}

impl JiraTracker {
    pub fn new(config: &JiraConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(AppError::Config("jira.url is not set".to_string()));
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: format!("{}/rest/api/2", config.url.trim_end_matches('/')),
            username: config.username.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{endpoint}", self.base_url))
            .basic_auth(&self.username, Some(&self.api_token))
            .header("Accept", "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Tracker(format!("Jira returned {status}: {body}")));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn issue_path(key: &str) -> String {
        format!("/issue/{}", urlencoding::encode(key))
    }

    /// Stream one attachment body to `path`.
    async fn download_to(&self, url: &str, path: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.api_token))
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Tracker(format!(
                "Attachment download from {url} returned {status}"
            )));
        }

        let mut file = tokio::fs::File::create(path).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TicketTracker for JiraTracker {
    async fn get_issue(&self, key: &str) -> Result<Ticket> {
        tracing::info!(ticket = key, "Fetching ticket");
        let data = self
            .send(self.request(Method::GET, &Self::issue_path(key)))
            .await?;
        map_issue(&data)
    }

    async fn get_comments(&self, key: &str, limit: usize) -> Result<Vec<TicketComment>> {
        let endpoint = format!("{}/comment", Self::issue_path(key));
        let data = self.send(self.request(Method::GET, &endpoint)).await?;

        let comments = data["comments"].as_array().cloned().unwrap_or_default();
        let mapped = newest_first(comments.iter().map(map_comment).collect(), limit);
        tracing::info!(ticket = key, count = mapped.len(), "Fetched ticket comments");
        Ok(mapped)
    }

    async fn get_transitions(&self, key: &str) -> Result<Vec<Transition>> {
        let endpoint = format!("{}/transitions", Self::issue_path(key));
        let data = self.send(self.request(Method::GET, &endpoint)).await?;

        Ok(data["transitions"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|t| Transition {
                        id: t["id"].as_str().unwrap_or_default().to_string(),
                        name: t["name"].as_str().unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn apply_transition(&self, key: &str, transition_id: &str) -> Result<String> {
        let endpoint = format!("{}/transitions", Self::issue_path(key));
        self.send(
            self.request(Method::POST, &endpoint)
                .json(&json!({ "transition": { "id": transition_id } })),
        )
        .await?;

        let issue = self.get_issue(key).await?;
        Ok(issue.status)
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        let endpoint = format!("{}/comment", Self::issue_path(key));
        self.send(
            self.request(Method::POST, &endpoint)
                .json(&json!({ "body": body })),
        )
        .await?;
        tracing::info!(ticket = key, length = body.len(), "Added ticket comment");
        Ok(())
    }

    async fn download_attachments(
        &self,
        key: &str,
        kinds: &[AttachmentKind],
        dest: &Path,
    ) -> Result<Vec<PathBuf>> {
        let ticket = self.get_issue(key).await?;
        let wanted = select_attachments(&ticket.attachments, kinds);
        if wanted.is_empty() {
            tracing::info!(ticket = key, "No matching attachments");
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(dest).await?;
        let mut saved = Vec::with_capacity(wanted.len());
        for attachment in wanted {
            if attachment.content_url.is_empty() {
                tracing::warn!(ticket = key, file = %attachment.filename, "Attachment has no content URL");
                continue;
            }
            let path = dest.join(attachment.local_name(key));
            tracing::info!(ticket = key, file = %attachment.filename, path = %path.display(), "Downloading attachment");
            self.download_to(&attachment.content_url, &path).await?;
            saved.push(path);
        }
        Ok(saved)
    }
}

fn map_issue(data: &Value) -> Result<Ticket> {
    let key = data["key"]
        .as_str()
        .ok_or_else(|| AppError::Tracker("Issue payload has no key".to_string()))?;
    let fields = &data["fields"];

    Ok(Ticket {
        key: key.to_string(),
        summary: fields["summary"].as_str().unwrap_or_default().to_string(),
        description: fields["description"].as_str().map(str::to_string),
        status: fields["status"]["name"]
            .as_str()
            .unwrap_or("Unknown")
            .to_string(),
        priority: fields["priority"]["name"].as_str().map(str::to_string),
        attachments: fields["attachment"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|a| Attachment {
                        id: a["id"].as_str().unwrap_or_default().to_string(),
                        filename: a["filename"].as_str().unwrap_or_default().to_string(),
                        mime_type: a["mimeType"].as_str().unwrap_or_default().to_string(),
                        content_url: a["content"].as_str().unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn map_comment(c: &Value) -> TicketComment {
    TicketComment {
        author: c["author"]["displayName"]
            .as_str()
            .unwrap_or("Unknown")
            .to_string(),
        body: c["body"]
            .as_str()
            .unwrap_or_default()
            .chars()
            .take(MAX_COMMENT_CHARS)
            .collect(),
        created: c["created"].as_str().map(str::to_string),
    }
}

/// Jira stores comments oldest-first; keep the last `limit` and reverse them.
fn newest_first(mut comments: Vec<TicketComment>, limit: usize) -> Vec<TicketComment> {
    if comments.len() > limit {
        comments.drain(..comments.len() - limit);
    }
    comments.reverse();
    comments
}
