use serde_json::Value;

use crate::platform::types;

pub fn map_pull_request(pr: &octocrab::models::pulls::PullRequest) -> types::PullRequest {
    types::PullRequest {
        number: pr.number,
        head_ref: pr.head.ref_field.clone(),
        base_ref: pr.base.ref_field.clone(),
        url: pr
            .html_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default(),
    }
}

pub fn map_pr_comment(comment: octocrab::models::issues::Comment) -> types::PrComment {
    types::PrComment {
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
    }
}

/// Review comments are fetched as raw JSON; missing fields map to empty strings.
pub fn map_review_comment(c: &Value) -> types::ReviewComment {
    types::ReviewComment {
        author: c["user"]["login"]
            .as_str()
            .unwrap_or("unknown")
            .to_string(),
        path: c["path"].as_str().unwrap_or_default().to_string(),
        body: c["body"].as_str().unwrap_or_default().to_string(),
    }
}
