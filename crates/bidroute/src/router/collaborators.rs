//! Seams to the systems the pipeline feeds but does not own.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::CollaboratorError;
use crate::message::InboundMessage;
use crate::triage::{ActiveItem, ActiveItemLookup, CsIntent, EntitySet};

/// Creates a downstream record (RFQ, price check, shipment) for a message.
/// Returns the id of the created record.
pub trait IntakeCollaborator: Send + Sync {
    fn create(
        &self,
        message: &InboundMessage,
        entities: &EntitySet,
    ) -> Result<String, CollaboratorError>;
}

/// Everything the CS draft pipeline needs to answer a buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsDraftRequest {
    pub message: InboundMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<CsIntent>,
    pub entities: EntitySet,
    /// Open items of the sender; non-empty for follow-ups.
    #[serde(default)]
    pub linked_items: Vec<ActiveItem>,
    pub followup: bool,
}

/// Drafts a customer-service reply. Returns the draft id.
pub trait CsDraftCollaborator: Send + Sync {
    fn draft(&self, request: &CsDraftRequest) -> Result<String, CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A buyer recalled an earlier message.
    Recall,
    /// A buyer's message matched nothing.
    UnclassifiedBuyer,
    /// A routed message could not be handed to its target.
    DispatchFailed,
}

/// Something an operator should look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorAlert {
    pub level: AlertLevel,
    pub kind: AlertKind,
    pub mailbox: String,
    pub uid: u32,
    pub subject: String,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
}

impl OperatorAlert {
    pub fn new(
        level: AlertLevel,
        kind: AlertKind,
        message: &InboundMessage,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            level,
            kind,
            mailbox: message.mailbox.clone(),
            uid: message.id,
            subject: message.subject.clone(),
            detail: detail.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Delivers operator alerts. Delivery channels live outside the pipeline.
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &OperatorAlert);
}

/// Writes alerts to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, alert: &OperatorAlert) {
        let subject = crate::sanitize::truncate_subject(&alert.subject, 60);
        match alert.level {
            AlertLevel::Info => info!(
                mailbox = %alert.mailbox, uid = alert.uid, kind = ?alert.kind,
                "Operator alert for '{}': {}", subject, alert.detail
            ),
            AlertLevel::Warning => warn!(
                mailbox = %alert.mailbox, uid = alert.uid, kind = ?alert.kind,
                "Operator alert for '{}': {}", subject, alert.detail
            ),
            AlertLevel::Error => error!(
                mailbox = %alert.mailbox, uid = alert.uid, kind = ?alert.kind,
                "Operator alert for '{}': {}", subject, alert.detail
            ),
        }
    }
}

/// The downstream targets the router can dispatch to.
#[derive(Clone)]
pub struct Collaborators {
    pub rfq_intake: Arc<dyn IntakeCollaborator>,
    pub price_check_intake: Arc<dyn IntakeCollaborator>,
    pub shipping_store: Arc<dyn IntakeCollaborator>,
    pub cs_drafts: Arc<dyn CsDraftCollaborator>,
    pub notifier: Arc<dyn Notifier>,
}

/// Open items per sender, loaded from a JSON file:
/// `{"buyer@agency.ca.gov": [{"kind": "quote", "reference": "R26Q16", "status": "sent"}]}`.
#[derive(Debug, Default)]
pub struct FileActiveItems {
    items: HashMap<String, Vec<ActiveItem>>,
}

impl FileActiveItems {
    pub fn load(path: &Path) -> Result<Self, CollaboratorError> {
        let content = std::fs::read_to_string(path).map_err(|e| CollaboratorError::Io {
            collaborator: "active items file",
            source: e,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CollaboratorError> {
        let raw: HashMap<String, Vec<ActiveItem>> =
            serde_json::from_str(content).map_err(|e| CollaboratorError::Serialization {
                collaborator: "active items file",
                source: e,
            })?;
        let items = raw
            .into_iter()
            .map(|(sender, items)| (sender.trim().to_lowercase(), items))
            .collect();
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ActiveItemLookup for FileActiveItems {
    fn active_items(&self, sender_email: &str) -> Result<Vec<ActiveItem>, CollaboratorError> {
        Ok(self
            .items
            .get(&sender_email.trim().to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}
