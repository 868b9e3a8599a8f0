use serde::{Deserialize, Serialize};

/// A ticket as the workflow needs it, independent of the tracker's wire format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub key: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    /// Download URL for the file body.
    #[serde(default)]
    pub content_url: String,
}

impl Attachment {
    /// Local file name: ticket key prefix plus the sanitized original name.
    pub fn local_name(&self, key: &str) -> String {
        let name = if self.filename.is_empty() {
            format!("attachment-{}", if self.id.is_empty() { "unknown" } else { &self.id })
        } else {
            self.filename.clone()
        };
        let safe: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
            .collect();
        format!("{key}-{safe}")
    }
}

/// Attachment families selectable for download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AttachmentKind {
    Image,
    Pdf,
    Csv,
    All,
}

impl AttachmentKind {
    pub const DEFAULTS: [AttachmentKind; 3] =
        [AttachmentKind::Image, AttachmentKind::Pdf, AttachmentKind::Csv];

    const IMAGE_EXTS: [&'static str; 7] = [".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp", ".svg"];

    /// Match on MIME type first, then on file extension.
    pub fn matches(self, attachment: &Attachment) -> bool {
        let name = attachment.filename.to_lowercase();
        let mime = attachment.mime_type.as_str();
        match self {
            AttachmentKind::All => true,
            AttachmentKind::Image => {
                mime.starts_with("image/") || Self::IMAGE_EXTS.iter().any(|ext| name.ends_with(ext))
            }
            AttachmentKind::Pdf => mime.contains("pdf") || name.ends_with(".pdf"),
            AttachmentKind::Csv => mime == "text/csv" || name.ends_with(".csv"),
        }
    }
}

/// Attachments matching any of `kinds`; an empty selection means the defaults.
pub fn select_attachments<'a>(
    attachments: &'a [Attachment],
    kinds: &[AttachmentKind],
) -> Vec<&'a Attachment> {
    let kinds = if kinds.is_empty() {
        &AttachmentKind::DEFAULTS[..]
    } else {
        kinds
    };
    attachments
        .iter()
        .filter(|a| kinds.iter().any(|kind| kind.matches(a)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketComment {
    pub author: String,
    pub body: String,
    pub created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    pub name: String,
}
