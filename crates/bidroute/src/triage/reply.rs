//! Reply / follow-up detection.
//!
//! A reply about something already in flight must never spawn a new intake
//! record. This check runs before classification and short-circuits it.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ReplyScoring;
use crate::error::CollaboratorError;
use crate::message::{has_reply_prefix, InboundMessage};
use crate::sanitize::redact_address;

use super::patterns::PatternTables;

/// Separator lines after which everything is the quoted original.
static RE_QUOTE_CUTOFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:-{2,}\s*original message\s*-{2,}|on .{1,120} wrote:)\s*$")
        .expect("valid quote cutoff regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveItemKind {
    Quote,
    Order,
    Request,
}

/// An open quote, order or request tied to a counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveItem {
    pub kind: ActiveItemKind,
    pub reference: String,
    pub status: String,
}

/// Read-only view of open items per sender, owned by the CRM side.
pub trait ActiveItemLookup: Send + Sync {
    fn active_items(&self, sender_email: &str) -> Result<Vec<ActiveItem>, CollaboratorError>;
}

/// Lookup that knows of no open items. Disables follow-up detection.
pub struct NoActiveItems;

impl ActiveItemLookup for NoActiveItems {
    fn active_items(&self, _sender_email: &str) -> Result<Vec<ActiveItem>, CollaboratorError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySignal {
    InReplyTo,
    References,
    SubjectPrefix,
}

/// A positive follow-up verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyDetection {
    pub is_followup: bool,
    pub sender_email: String,
    pub reply_signals: Vec<ReplySignal>,
    pub linked_items: Vec<ActiveItem>,
    pub body_score: i32,
}

/// Scores replies against the `reply` pattern table.
pub struct ReplyDetector {
    tables: Arc<PatternTables>,
    scoring: ReplyScoring,
}

impl ReplyDetector {
    pub fn new(tables: Arc<PatternTables>, scoring: ReplyScoring) -> Self {
        Self { tables, scoring }
    }

    pub fn scoring(&self) -> &ReplyScoring {
        &self.scoring
    }

    /// Returns a detection only when the message is a reply, carries no
    /// new-submission attachment, comes from a sender with open items, and
    /// its body scores at or above the threshold.
    pub fn detect(
        &self,
        message: &InboundMessage,
        lookup: &dyn ActiveItemLookup,
    ) -> Option<ReplyDetection> {
        let signals = reply_signals(message);
        if signals.is_empty() {
            return None;
        }

        let relevant = self.tables.relevant_attachments(&message.attachment_names);
        if let Some(name) = relevant
            .iter()
            .find(|n| self.tables.reply.new_submission_attachments.is_match(n))
        {
            debug!(uid = message.id, attachment = %name, "Reply carries a new submission form");
            return None;
        }

        if message.sender_email.is_empty() {
            return None;
        }

        let linked_items = match lookup.active_items(&message.sender_email) {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    sender = %redact_address(&message.sender_email),
                    "Active item lookup failed, treating as no open items: {}", e
                );
                Vec::new()
            }
        };
        if linked_items.is_empty() {
            debug!(uid = message.id, "Reply from sender without open items");
            return None;
        }

        let body_score = self.body_score(&message.body_text, relevant.is_empty());
        if body_score < self.scoring.threshold {
            debug!(uid = message.id, body_score, "Reply body reads like new business");
            return None;
        }

        Some(ReplyDetection {
            is_followup: true,
            sender_email: message.sender_email.clone(),
            reply_signals: signals,
            linked_items,
            body_score,
        })
    }

    /// Scores how conversational a reply body is.
    pub fn body_score(&self, body: &str, no_relevant_attachments: bool) -> i32 {
        let window: String = body.chars().take(self.scoring.body_window_chars).collect();
        let own_lines = unquoted_lines(&window);
        let own_text = own_lines.join("\n");

        let mut score = 0;
        if own_text.chars().count() < self.scoring.short_body_chars {
            score += self.scoring.short_body_points;
        }
        if self.tables.reply.phrases.is_match(&own_text) {
            score += self.scoring.phrase_points;
        }
        if no_relevant_attachments {
            score += self.scoring.no_attachment_points;
        }
        if own_lines
            .iter()
            .any(|line| self.tables.reply.new_business_phrases.is_match(line))
        {
            score -= self.scoring.new_business_penalty;
        }
        score
    }
}

fn reply_signals(message: &InboundMessage) -> Vec<ReplySignal> {
    let present = |h: &Option<String>| h.as_deref().is_some_and(|v| !v.trim().is_empty());

    let mut signals = Vec::new();
    if present(&message.headers.in_reply_to) {
        signals.push(ReplySignal::InReplyTo);
    }
    if present(&message.headers.references) {
        signals.push(ReplySignal::References);
    }
    if has_reply_prefix(&message.subject) {
        signals.push(ReplySignal::SubjectPrefix);
    }
    signals
}

/// Non-empty lines written by the sender: `>`-quoted lines are dropped and
/// nothing after an "Original Message" / "On ... wrote:" separator is kept.
fn unquoted_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if RE_QUOTE_CUTOFF.is_match(trimmed) {
            break;
        }
        if trimmed.is_empty() || trimmed.starts_with('>') {
            continue;
        }
        lines.push(trimmed);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageHeaders;
    use chrono::Utc;

    struct OneSender(Vec<ActiveItem>);

    impl ActiveItemLookup for OneSender {
        fn active_items(&self, sender: &str) -> Result<Vec<ActiveItem>, CollaboratorError> {
            if sender == "buyer@cdcr.ca.gov" {
                Ok(self.0.clone())
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct Broken;

    impl ActiveItemLookup for Broken {
        fn active_items(&self, _: &str) -> Result<Vec<ActiveItem>, CollaboratorError> {
            Err(CollaboratorError::Unavailable {
                collaborator: "crm",
                reason: "down".to_string(),
            })
        }
    }

    fn lookup() -> OneSender {
        OneSender(vec![ActiveItem {
            kind: ActiveItemKind::Quote,
            reference: "R26Q16".to_string(),
            status: "sent".to_string(),
        }])
    }

    fn detector() -> ReplyDetector {
        ReplyDetector::new(
            Arc::new(PatternTables::builtin().unwrap()),
            ReplyScoring::default(),
        )
    }

    fn message(subject: &str, body: &str, attachments: &[&str]) -> InboundMessage {
        InboundMessage {
            id: 7,
            mailbox: "inbox".to_string(),
            subject: subject.to_string(),
            sender_display: "Buyer".to_string(),
            sender_email: "buyer@cdcr.ca.gov".to_string(),
            received_at: Utc::now(),
            headers: MessageHeaders::default(),
            body_text: body.to_string(),
            attachment_names: attachments.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_short_status_question_is_followup() {
        let msg = message("RE: Quote - Med OS - 02.19.26", "What is the status of this quote?", &[]);
        let detection = detector().detect(&msg, &lookup()).unwrap();
        assert!(detection.is_followup);
        assert_eq!(detection.reply_signals, vec![ReplySignal::SubjectPrefix]);
        assert_eq!(detection.linked_items.len(), 1);
        // short (+3), phrase (+2), no attachment (+2)
        assert_eq!(detection.body_score, 7);
    }

    #[test]
    fn test_header_signal_without_prefix() {
        let mut msg = message("Quote - Med OS", "ok thanks", &[]);
        msg.headers.in_reply_to = Some("<abc@cdcr.ca.gov>".to_string());
        let detection = detector().detect(&msg, &lookup()).unwrap();
        assert_eq!(detection.reply_signals, vec![ReplySignal::InReplyTo]);
    }

    #[test]
    fn test_not_a_reply() {
        let msg = message("Quote - Med OS", "What is the status of this quote?", &[]);
        assert!(detector().detect(&msg, &lookup()).is_none());
    }

    #[test]
    fn test_new_submission_attachment_blocks() {
        let msg = message("RE: Quote - Med OS", "Please email me quote", &["AMS 704 - Med OS.pdf"]);
        assert!(detector().detect(&msg, &lookup()).is_none());
    }

    #[test]
    fn test_signature_image_does_not_block() {
        let msg = message("RE: Quote - Med OS", "Any update?", &["image001.png"]);
        assert!(detector().detect(&msg, &lookup()).is_some());
    }

    #[test]
    fn test_unknown_sender_passes_through() {
        let mut msg = message("RE: Quote", "Any update?", &[]);
        msg.sender_email = "stranger@example.com".to_string();
        assert!(detector().detect(&msg, &lookup()).is_none());
    }

    #[test]
    fn test_lookup_failure_means_no_items() {
        let msg = message("RE: Quote", "Any update?", &[]);
        assert!(detector().detect(&msg, &Broken).is_none());
    }

    #[test]
    fn test_new_business_body_scores_low() {
        let d = detector();
        let long_body = format!(
            "Please see the attached solicitation and bid package for the new requirement.\n{}",
            "Line items and delivery terms follow. ".repeat(12)
        );
        // long (0), no phrase (0), has attachment (0), new business (-3)
        assert_eq!(d.body_score(&long_body, false), -3);
    }

    #[test]
    fn test_quoted_new_business_is_ignored() {
        let d = detector();
        let body = "Sounds good, thanks.\n> Please see the attached solicitation";
        assert_eq!(d.body_score(body, true), 7);
    }

    #[test]
    fn test_text_after_original_message_separator_is_quoted() {
        let lines = unquoted_lines("Sounds good\n-----Original Message-----\nsolicitation 1234567");
        assert_eq!(lines, vec!["Sounds good"]);
    }
}
