//! Routes a triaged message to exactly one downstream target.

pub mod collaborators;
pub mod dispatch;
pub mod journal;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::error::DispatchError;
use crate::fingerprint::FingerprintStore;
use crate::message::InboundMessage;
use crate::sanitize::{redact_address, short_fingerprint};
use crate::triage::{Category, Classification, Decision, EntitySet, ReplyDetection};

pub use collaborators::{
    AlertKind, AlertLevel, Collaborators, CsDraftCollaborator, CsDraftRequest, FileActiveItems,
    IntakeCollaborator, LogNotifier, Notifier, OperatorAlert,
};
pub use dispatch::{DispatchQueue, DispatchResult, DispatchTarget, DispatchTask, TaskPayload};
pub use journal::{JournalEntry, JournalIntake, JournalQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Handed to the CS pipeline as a follow-up; never fingerprinted.
    FollowUp,
    /// Queued for its downstream target.
    Dispatched,
    /// Recorded but intentionally not queued (recall, unknown).
    Logged,
    /// Another watcher or an earlier cycle already routed it.
    Duplicate,
    /// Fingerprinted but the hand-off failed; an operator was alerted.
    DispatchFailed,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::FollowUp => "follow_up",
            Disposition::Dispatched => "dispatched",
            Disposition::Logged => "logged",
            Disposition::Duplicate => "duplicate",
            Disposition::DispatchFailed => "dispatch_failed",
        }
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingOutcome {
    pub mailbox: String,
    pub uid: u32,
    pub category: Category,
    pub confidence: u8,
    pub disposition: Disposition,
    pub target: Option<DispatchTarget>,
    pub task_id: Option<Uuid>,
    pub fingerprint: Option<String>,
    pub error: Option<String>,
}

impl RoutingOutcome {
    fn new(message: &InboundMessage, category: Category, confidence: u8, disposition: Disposition) -> Self {
        Self {
            mailbox: message.mailbox.clone(),
            uid: message.id,
            category,
            confidence,
            disposition,
            target: None,
            task_id: None,
            fingerprint: None,
            error: None,
        }
    }
}

pub struct Router {
    store: FingerprintStore,
    queue: Arc<DispatchQueue>,
    notifier: Arc<dyn Notifier>,
}

impl Router {
    pub fn new(store: FingerprintStore, queue: Arc<DispatchQueue>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            queue,
            notifier,
        }
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Routes one message. Only a storage failure is an error; the message
    /// then stays out of the cursor and is retried next cycle.
    pub fn route(&self, message: &InboundMessage, decision: Decision) -> Result<RoutingOutcome, DatabaseError> {
        let _span = info_span!("route", mailbox = %message.mailbox, uid = message.id).entered();

        match decision {
            Decision::FollowUp {
                detection,
                entities,
            } => Ok(self.route_followup(message, detection, entities)),
            Decision::Classified(classification) => self.route_classified(message, classification),
        }
    }

    fn route_followup(
        &self,
        message: &InboundMessage,
        detection: ReplyDetection,
        entities: EntitySet,
    ) -> RoutingOutcome {
        info!(
            sender = %redact_address(&detection.sender_email),
            linked_items = detection.linked_items.len(),
            body_score = detection.body_score,
            "Follow-up on existing business"
        );

        let request = CsDraftRequest {
            message: message.clone(),
            intent: None,
            entities,
            linked_items: detection.linked_items,
            followup: true,
        };
        let task = DispatchTask::new(DispatchTarget::CsDraft, None, TaskPayload::CsDraft(request));
        let outcome = RoutingOutcome::new(message, Category::ReplyFollowup, 100, Disposition::FollowUp);
        self.submit(message, task, outcome)
    }

    fn route_classified(
        &self,
        message: &InboundMessage,
        classification: Classification,
    ) -> Result<RoutingOutcome, DatabaseError> {
        let sender = if message.sender_email.is_empty() {
            message.sender_display.as_str()
        } else {
            message.sender_email.as_str()
        };
        let fingerprint = self
            .store
            .fingerprint(&message.subject, sender, message.received_at);

        let is_new = self
            .store
            .record_classified(&fingerprint, &message.mailbox, classification.category)?;
        if !is_new {
            debug!(
                fingerprint = short_fingerprint(fingerprint.as_str()),
                "Duplicate message, not routed"
            );
            let mut outcome = RoutingOutcome::new(
                message,
                classification.category,
                classification.confidence,
                Disposition::Duplicate,
            );
            outcome.fingerprint = Some(fingerprint.to_string());
            return Ok(outcome);
        }

        debug!(
            classification = %serde_json::to_string(&classification).unwrap_or_default(),
            "Classification"
        );

        let category = classification.category;
        let confidence = classification.confidence;
        let mut outcome = RoutingOutcome::new(message, category, confidence, Disposition::Logged);
        outcome.fingerprint = Some(fingerprint.to_string());

        let target = match category {
            Category::FormalRfq => Some(DispatchTarget::RfqIntake),
            Category::PriceCheck => Some(DispatchTarget::PriceCheckIntake),
            Category::ShippingNotice => Some(DispatchTarget::ShippingStore),
            Category::CsUpdateRequest => Some(DispatchTarget::CsDraft),
            Category::Recall | Category::Unknown | Category::ReplyFollowup => None,
        };

        let Some(target) = target else {
            if category == Category::Recall {
                let recalled = classification
                    .recalled_subject
                    .as_deref()
                    .unwrap_or("<unknown subject>");
                info!(recalled_subject = %recalled, "Recall logged");
                self.notifier.notify(&OperatorAlert::new(
                    AlertLevel::Info,
                    AlertKind::Recall,
                    message,
                    format!(
                        "{} recalled '{}'",
                        redact_address(&message.sender_email),
                        recalled
                    ),
                ));
            } else {
                info!(reasons = ?classification.reasons, "Unclassified message logged");
            }
            return Ok(outcome);
        };

        let payload = match target {
            DispatchTarget::CsDraft => TaskPayload::CsDraft(CsDraftRequest {
                message: message.clone(),
                intent: classification.cs_intent,
                entities: classification.entities,
                linked_items: Vec::new(),
                followup: false,
            }),
            _ => TaskPayload::Intake {
                message: message.clone(),
                entities: classification.entities,
            },
        };
        let task = DispatchTask::new(target, Some(fingerprint), payload);
        outcome.disposition = Disposition::Dispatched;
        Ok(self.submit(message, task, outcome))
    }

    fn submit(
        &self,
        message: &InboundMessage,
        task: DispatchTask,
        mut outcome: RoutingOutcome,
    ) -> RoutingOutcome {
        let target = task.target;
        outcome.target = Some(target);

        match self.queue.submit(task) {
            Ok(task_id) => {
                outcome.task_id = Some(task_id);
                info!(
                    category = outcome.category.as_str(),
                    confidence = outcome.confidence,
                    target = target.as_str(),
                    "Routed message"
                );
            }
            Err(e) => {
                error!(target = target.as_str(), "Dispatch failed: {}", e);
                self.notifier.notify(&OperatorAlert::new(
                    AlertLevel::Error,
                    AlertKind::DispatchFailed,
                    message,
                    dispatch_failure_detail(target, &e),
                ));
                outcome.disposition = Disposition::DispatchFailed;
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }
}

fn dispatch_failure_detail(target: DispatchTarget, e: &DispatchError) -> String {
    format!("could not queue for {}: {}", target.as_str(), e)
}
