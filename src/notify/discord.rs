use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::DiscordConfig;
use crate::error::{AppError, Result};
use crate::notify::{Notifier, Severity};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USERNAME: &str = "Devflow";

/// Posts embeds to a Discord incoming webhook.
pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone(),
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, severity: Severity, message: &str, details: Option<&str>) -> Result<()> {
        if self.webhook_url.is_empty() {
            return Err(AppError::Notifier("discord.webhook_url is not set".to_string()));
        }

        let payload = build_payload(severity, message, details, chrono::Utc::now());
        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notifier(format!(
                "Discord returned HTTP {status}: {body}"
            )));
        }

        tracing::info!(severity = %severity, "Sent notification");
        Ok(())
    }
}

fn build_payload(
    severity: Severity,
    message: &str,
    details: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
) -> Value {
    let mut embed = json!({
        "title": format!("{} {} Notification", severity.icon(), severity.title()),
        "description": message,
        "color": severity.color(),
        "timestamp": now.to_rfc3339(),
    });

    if let Some(details) = details {
        embed["fields"] = json!([{ "name": "Details", "value": details, "inline": false }]);
    }

    json!({ "embeds": [embed], "username": USERNAME })
}
