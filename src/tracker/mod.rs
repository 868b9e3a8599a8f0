pub mod jira;
pub mod types;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use types::*;

#[async_trait]
pub trait TicketTracker: Send + Sync {
    /// Fetch a ticket by key.
    async fn get_issue(&self, key: &str) -> Result<Ticket>;

    /// Fetch at most `limit` of the most recent comments, newest first.
    async fn get_comments(&self, key: &str, limit: usize) -> Result<Vec<TicketComment>>;

    /// List the status transitions currently available for a ticket.
    async fn get_transitions(&self, key: &str) -> Result<Vec<Transition>>;

    /// Apply a transition and return the ticket's new status name.
    async fn apply_transition(&self, key: &str, transition_id: &str) -> Result<String>;

    /// Add a comment to a ticket.
    async fn add_comment(&self, key: &str, body: &str) -> Result<()>;

    /// Save the ticket's attachments of the given kinds under `dest` and
    /// return the written paths. An empty `kinds` means images, PDFs and CSVs.
    async fn download_attachments(
        &self,
        key: &str,
        kinds: &[AttachmentKind],
        dest: &Path,
    ) -> Result<Vec<PathBuf>>;
}

/// Move a ticket through the first transition whose name contains `needle`.
///
/// Best-effort: returns the new status, or `None` when no transition matched
/// or the tracker call failed (the failure is logged).
pub async fn transition_matching(
    tracker: &dyn TicketTracker,
    key: &str,
    needle: &str,
) -> Option<String> {
    let transitions = match tracker.get_transitions(key).await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(ticket = key, error = %e, "Failed to list ticket transitions");
            return None;
        }
    };

    let Some(transition) = transitions
        .iter()
        .find(|t| t.name.to_lowercase().contains(needle))
    else {
        tracing::warn!(ticket = key, needle, "No matching ticket transition found");
        return None;
    };

    match tracker.apply_transition(key, &transition.id).await {
        Ok(status) => {
            tracing::info!(ticket = key, transition = %transition.name, status = %status, "Transitioned ticket");
            Some(status)
        }
        Err(e) => {
            tracing::warn!(ticket = key, transition = %transition.name, error = %e, "Failed to transition ticket");
            None
        }
    }
}
