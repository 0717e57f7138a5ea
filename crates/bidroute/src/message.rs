//! The normalized inbound message every pipeline stage works on.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid address regex")
});
static RE_REPLY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:re|fwd?)\s*(?:\[\d+\])?\s*:\s*").expect("valid reply prefix regex")
});

/// Threading headers carried over from the raw message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeaders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

/// An inbound message as seen by triage and routing.
///
/// Built once by the mailbox parser (or a test builder) and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// IMAP UID, unique within `mailbox`.
    pub id: u32,
    pub mailbox: String,
    pub subject: String,
    pub sender_display: String,
    /// Bare, lowercased sender address. Empty when the From header had none.
    pub sender_email: String,
    pub received_at: DateTime<Utc>,
    pub headers: MessageHeaders,
    pub body_text: String,
    pub attachment_names: Vec<String>,
}

impl InboundMessage {
    /// Returns true when `In-Reply-To` or `References` is present.
    pub fn has_reply_headers(&self) -> bool {
        let present = |h: &Option<String>| h.as_deref().is_some_and(|v| !v.trim().is_empty());
        present(&self.headers.in_reply_to) || present(&self.headers.references)
    }

    /// Domain part of the sender address, or `""`.
    pub fn sender_domain(&self) -> &str {
        self.sender_email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("")
    }
}

/// Extracts the first `local@domain` token from a From header, lowercased.
pub fn extract_email_address(from: &str) -> Option<String> {
    RE_ADDRESS
        .find(from)
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Returns true when the subject starts with `Re:`, `Fw:` or `Fwd:`.
pub fn has_reply_prefix(subject: &str) -> bool {
    RE_REPLY_PREFIX.is_match(subject)
}

/// Strips any number of leading `Re:` / `Fw:` / `Fwd:` markers.
pub fn strip_reply_prefixes(subject: &str) -> &str {
    let mut rest = subject;
    while let Some(m) = RE_REPLY_PREFIX.find(rest) {
        if m.end() == 0 {
            break;
        }
        rest = &rest[m.end()..];
    }
    rest.trim()
}
