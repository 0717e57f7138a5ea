//! Mailbox-versus-downstream audit.
//!
//! Expectations are derived with the same `Triage` the router uses, then
//! diffed against what the intake queues actually hold.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::error::CollaboratorError;
use crate::message::{strip_reply_prefixes, InboundMessage};
use crate::router::journal::{read_entries, JournalEntry, JournalQueue};
use crate::triage::{Category, Decision, PatternTables, Triage};

/// `Quote - <item name> - 02.19.26`; the item name identifies a price check.
static RE_PRICE_CHECK_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^quote(?:\s+request)?\s*[-–:]\s*(.+?)\s*[-–]\s*\d{2}\.\d{2}\.\d{2,4}")
        .expect("valid price check item regex")
});

const FALLBACK_ID_CHARS: usize = 40;

/// What one mailbox message should have produced downstream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    pub mailbox: String,
    pub uid: u32,
    pub subject: String,
    pub sender: String,
    pub category: Category,
    /// Key used to find the downstream record.
    pub expected_id: String,
    pub confidence: u8,
    pub reasons: Vec<String>,
    /// A formal RFQ whose body also asks an admin or CS question.
    pub also_cs: bool,
}

impl Expectation {
    /// Recalls and unknowns produce nothing downstream.
    pub fn is_actionable(&self) -> bool {
        !matches!(self.category, Category::Recall | Category::Unknown)
    }
}

/// Derives expectations for a mailbox snapshot.
pub fn derive_expectations(
    triage: &Triage,
    tables: &PatternTables,
    messages: &[InboundMessage],
) -> Vec<Expectation> {
    messages
        .iter()
        .map(|message| expectation_for(triage, tables, message))
        .collect()
}

fn expectation_for(triage: &Triage, tables: &PatternTables, message: &InboundMessage) -> Expectation {
    let decision = triage.evaluate(message);
    let sender = message.sender_email.clone();

    let (confidence, reasons, expected_id) = match &decision {
        Decision::FollowUp { detection, .. } => (
            100,
            vec![format!("follow-up, body score {}", detection.body_score)],
            sender.clone(),
        ),
        Decision::Classified(c) => {
            let id = match c.category {
                Category::PriceCheck => price_check_id(&message.subject),
                Category::FormalRfq => c
                    .entities
                    .solicitation_numbers
                    .first()
                    .cloned()
                    .unwrap_or_else(|| fallback_id(&message.subject)),
                Category::ShippingNotice => c
                    .entities
                    .tracking_numbers
                    .first()
                    .cloned()
                    .unwrap_or_else(|| fallback_id(&message.subject)),
                Category::CsUpdateRequest | Category::ReplyFollowup => sender.clone(),
                Category::Recall => c.recalled_subject.clone().unwrap_or_default(),
                Category::Unknown => String::new(),
            };
            (c.confidence, c.reasons.clone(), id)
        }
    };

    let category = decision.category();
    let also_cs = category == Category::FormalRfq
        && tables
            .customer_service
            .intents
            .iter()
            .any(|(_, patterns)| patterns.is_match(&message.body_text));

    let mut reasons = reasons;
    if also_cs {
        reasons.push("body also asks a CS question".to_string());
    }

    Expectation {
        mailbox: message.mailbox.clone(),
        uid: message.id,
        subject: message.subject.clone(),
        sender,
        category,
        expected_id,
        confidence,
        reasons,
        also_cs,
    }
}

/// Item name of a dated price-check subject, or the truncated subject.
pub fn price_check_id(subject: &str) -> String {
    let subject = strip_reply_prefixes(subject);
    RE_PRICE_CHECK_ITEM
        .captures(subject)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_id(subject))
}

fn fallback_id(subject: &str) -> String {
    subject.chars().take(FALLBACK_ID_CHARS).collect::<String>().trim().to_string()
}

/// One record held by a downstream queue.
#[derive(Debug, Clone, Default)]
pub struct DownstreamRecord {
    pub id: String,
    pub subject: String,
    pub sender_email: String,
    pub solicitation_numbers: Vec<String>,
    pub tracking_numbers: Vec<String>,
}

impl From<JournalEntry> for DownstreamRecord {
    fn from(entry: JournalEntry) -> Self {
        Self {
            id: entry.id,
            subject: entry.subject,
            sender_email: entry.sender_email,
            solicitation_numbers: entry.entities.solicitation_numbers,
            tracking_numbers: entry.entities.tracking_numbers,
        }
    }
}

/// What the intake queues actually contain.
#[derive(Debug, Clone, Default)]
pub struct DownstreamState {
    pub rfqs: Vec<DownstreamRecord>,
    pub price_checks: Vec<DownstreamRecord>,
    pub shipments: Vec<DownstreamRecord>,
    pub cs_drafts: Vec<DownstreamRecord>,
}

impl DownstreamState {
    /// Reads the JSON-lines journals under `dir`.
    pub fn from_journal(dir: &Path) -> Result<Self, CollaboratorError> {
        let load = |queue: JournalQueue| -> Result<Vec<DownstreamRecord>, CollaboratorError> {
            Ok(read_entries(dir, queue)?
                .into_iter()
                .map(DownstreamRecord::from)
                .collect())
        };
        Ok(Self {
            rfqs: load(JournalQueue::Rfq)?,
            price_checks: load(JournalQueue::PriceCheck)?,
            shipments: load(JournalQueue::Shipping)?,
            cs_drafts: load(JournalQueue::CsDrafts)?,
        })
    }

    /// Whether the record an expectation calls for exists.
    pub fn contains(&self, expectation: &Expectation) -> bool {
        let id = expectation.expected_id.trim().to_lowercase();
        if id.is_empty() {
            return false;
        }
        let subject_has = |r: &DownstreamRecord| r.subject.to_lowercase().contains(&id);

        match expectation.category {
            Category::PriceCheck => self.price_checks.iter().any(subject_has),
            Category::FormalRfq => {
                self.rfqs.iter().any(|r| {
                    r.solicitation_numbers
                        .iter()
                        .any(|s| s.eq_ignore_ascii_case(&id))
                        || subject_has(r)
                }) || self.price_checks.iter().any(subject_has)
            }
            Category::ShippingNotice => self.shipments.iter().any(|r| {
                r.tracking_numbers.iter().any(|t| t.eq_ignore_ascii_case(&id)) || subject_has(r)
            }),
            Category::CsUpdateRequest | Category::ReplyFollowup => self
                .cs_drafts
                .iter()
                .any(|r| r.sender_email.eq_ignore_ascii_case(&id)),
            Category::Recall | Category::Unknown => false,
        }
    }
}

/// An actionable message with no downstream record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub mailbox: String,
    pub uid: u32,
    pub subject: String,
    pub sender: String,
    pub expected_category: Category,
    pub expected_id: String,
    pub also_cs: bool,
    pub reasons: Vec<String>,
}

impl From<&Expectation> for Gap {
    fn from(e: &Expectation) -> Self {
        Self {
            mailbox: e.mailbox.clone(),
            uid: e.uid,
            subject: e.subject.clone(),
            sender: e.sender.clone(),
            expected_category: e.category,
            expected_id: e.expected_id.clone(),
            also_cs: e.also_cs,
            reasons: e.reasons.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub run_at: DateTime<Utc>,
    pub total_messages: usize,
    /// N: messages that should exist downstream.
    pub actionable: usize,
    /// M: actionable messages found downstream.
    pub matched: usize,
    pub recalls: usize,
    pub skipped: usize,
    pub score: u32,
    pub grade: String,
    pub gaps: Vec<Gap>,
}

/// Percentage rounded half away from zero; an empty audit scores 100.
pub fn score(matched: usize, actionable: usize) -> u32 {
    if actionable == 0 {
        return 100;
    }
    (matched as f64 / actionable as f64 * 100.0).round() as u32
}

pub fn grade(score: u32) -> &'static str {
    if score >= 95 {
        "A"
    } else if score >= 80 {
        "B"
    } else if score >= 60 {
        "C"
    } else if score >= 40 {
        "D"
    } else {
        "F"
    }
}

/// Diffs expectations against downstream state. One gap per actionable
/// expectation that has no record.
pub fn audit_pipeline(expectations: &[Expectation], state: &DownstreamState) -> AuditReport {
    let mut actionable = 0;
    let mut matched = 0;
    let mut recalls = 0;
    let mut skipped = 0;
    let mut gaps = Vec::new();

    for expectation in expectations {
        match expectation.category {
            Category::Recall => recalls += 1,
            Category::Unknown => skipped += 1,
            _ => {
                actionable += 1;
                if state.contains(expectation) {
                    matched += 1;
                } else {
                    gaps.push(Gap::from(expectation));
                }
            }
        }
    }

    let score = score(matched, actionable);
    AuditReport {
        run_at: Utc::now(),
        total_messages: expectations.len(),
        actionable,
        matched,
        recalls,
        skipped,
        score,
        grade: grade(score).to_string(),
        gaps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expectation(category: Category, id: &str) -> Expectation {
        Expectation {
            mailbox: "sales".into(),
            uid: 1,
            subject: String::new(),
            sender: "buyer@cdcr.ca.gov".into(),
            category,
            expected_id: id.into(),
            confidence: 80,
            reasons: Vec::new(),
            also_cs: false,
        }
    }

    fn record(subject: &str) -> DownstreamRecord {
        DownstreamRecord {
            subject: subject.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_price_check_id() {
        assert_eq!(price_check_id("Quote - Airway Adapter - 02.19.26"), "Airway Adapter");
        assert_eq!(price_check_id("RE: Quote Request - OS Den - 02.13.2026"), "OS Den");
        assert_eq!(price_check_id("Quote request"), "Quote request");
    }

    #[test]
    fn test_grades() {
        assert_eq!(grade(100), "A");
        assert_eq!(grade(95), "A");
        assert_eq!(grade(94), "B");
        assert_eq!(grade(80), "B");
        assert_eq!(grade(60), "C");
        assert_eq!(grade(40), "D");
        assert_eq!(grade(39), "F");
    }

    #[test]
    fn test_score_rounding() {
        assert_eq!(score(0, 0), 100);
        assert_eq!(score(2, 3), 67);
        assert_eq!(score(1, 8), 13);
        assert_eq!(score(0, 5), 0);
    }

    #[test]
    fn test_recalls_and_unknowns_are_not_actionable() {
        let report = audit_pipeline(
            &[
                expectation(Category::Recall, "Quote - Med OS"),
                expectation(Category::Unknown, ""),
            ],
            &DownstreamState::default(),
        );
        assert_eq!(report.actionable, 0);
        assert_eq!(report.recalls, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.score, 100);
        assert!(report.gaps.is_empty());
    }

    #[test]
    fn test_matching_per_category() {
        let state = DownstreamState {
            rfqs: vec![DownstreamRecord {
                solicitation_numbers: vec!["10838349".into()],
                ..Default::default()
            }],
            price_checks: vec![record("Quote - Airway Adapter - 02.19.26")],
            shipments: vec![DownstreamRecord {
                tracking_numbers: vec!["1Z999AA10123456784".into()],
                ..Default::default()
            }],
            cs_drafts: vec![DownstreamRecord {
                sender_email: "buyer@cdcr.ca.gov".into(),
                ..Default::default()
            }],
        };

        assert!(state.contains(&expectation(Category::FormalRfq, "10838349")));
        assert!(state.contains(&expectation(Category::PriceCheck, "airway adapter")));
        assert!(state.contains(&expectation(Category::ShippingNotice, "1z999aa10123456784")));
        assert!(state.contains(&expectation(Category::CsUpdateRequest, "buyer@cdcr.ca.gov")));
        assert!(state.contains(&expectation(Category::ReplyFollowup, "buyer@cdcr.ca.gov")));

        assert!(!state.contains(&expectation(Category::PriceCheck, "Med OS")));
        assert!(!state.contains(&expectation(Category::FormalRfq, "")));
    }

    #[test]
    fn test_rfq_found_in_price_check_queue() {
        let state = DownstreamState {
            price_checks: vec![record("SAC RFQ 10837794")],
            ..Default::default()
        };
        assert!(state.contains(&expectation(Category::FormalRfq, "10837794")));
    }

    #[test]
    fn test_gaps_are_the_unmatched_actionable() {
        let state = DownstreamState {
            price_checks: vec![record("Quote - Med OS - 02.19.26")],
            ..Default::default()
        };
        let expectations = vec![
            expectation(Category::PriceCheck, "Med OS"),
            expectation(Category::PriceCheck, "MH OS"),
            expectation(Category::CsUpdateRequest, "other@cdph.ca.gov"),
        ];
        let report = audit_pipeline(&expectations, &state);
        assert_eq!(report.actionable, 3);
        assert_eq!(report.matched, 1);
        assert_eq!(report.gaps.len(), 2);
        assert_eq!(report.score, 33);
        assert_eq!(report.grade, "F");
    }
}
