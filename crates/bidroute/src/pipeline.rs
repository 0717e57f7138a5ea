//! Per-message processing: self-sender filter, triage, routing.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::db::DatabaseError;
use crate::message::InboundMessage;
use crate::router::{AlertKind, AlertLevel, Disposition, OperatorAlert, Router, RoutingOutcome};
use crate::sanitize::{redact_address, truncate_subject};
use crate::triage::{Category, Decision, PatternTables, Triage};

/// Recognizes mail sent by the supplier itself.
#[derive(Debug, Clone, Default)]
pub struct SelfSenderFilter {
    addresses: HashSet<String>,
    domains: Vec<String>,
}

impl SelfSenderFilter {
    pub fn new(addresses: &[String], domains: &[String]) -> Self {
        Self {
            addresses: addresses.iter().map(|a| a.trim().to_lowercase()).collect(),
            domains: domains
                .iter()
                .map(|d| d.trim().trim_start_matches('@').to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    pub fn is_own(&self, sender_email: &str) -> bool {
        let sender = sender_email.trim().to_lowercase();
        if sender.is_empty() {
            return false;
        }
        if self.addresses.contains(&sender) {
            return true;
        }
        self.domains
            .iter()
            .any(|domain| sender.ends_with(&format!("@{}", domain)))
    }
}

/// What the pipeline did with one parsed message.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Our own mail; not triaged, not fingerprinted.
    SelfSent,
    Routed(RoutingOutcome),
}

pub struct Pipeline {
    triage: Arc<Triage>,
    router: Arc<Router>,
    tables: Arc<PatternTables>,
    own: SelfSenderFilter,
}

impl Pipeline {
    pub fn new(
        triage: Arc<Triage>,
        router: Arc<Router>,
        tables: Arc<PatternTables>,
        own: SelfSenderFilter,
    ) -> Self {
        Self {
            triage,
            router,
            tables,
            own,
        }
    }

    pub fn triage(&self) -> &Arc<Triage> {
        &self.triage
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn is_own(&self, sender_email: &str) -> bool {
        self.own.is_own(sender_email)
    }

    /// Runs one message through the pipeline. A storage failure is returned
    /// so the caller can leave the message out of the cursor.
    pub fn process(&self, message: &InboundMessage) -> Result<PipelineOutcome, DatabaseError> {
        let _span = info_span!("pipeline",
            mailbox = %message.mailbox,
            uid = message.id,
            sender = %redact_address(&message.sender_email),
            subject = %truncate_subject(&message.subject, 60),
        )
        .entered();

        if self.own.is_own(&message.sender_email) {
            debug!("Skipping self-sent message");
            return Ok(PipelineOutcome::SelfSent);
        }

        let decision = {
            let _step = info_span!("triage").entered();
            self.triage.evaluate(message)
        };

        let unclassified_buyer = matches!(&decision, Decision::Classified(c) if c.category == Category::Unknown)
            && self
                .tables
                .customer_service
                .is_buyer_domain(message.sender_domain());

        let outcome = self.router.route(message, decision)?;

        if unclassified_buyer && outcome.disposition != Disposition::Duplicate {
            warn!("Buyer message matched no category");
            self.router.notifier().notify(&OperatorAlert::new(
                AlertLevel::Warning,
                AlertKind::UnclassifiedBuyer,
                message,
                format!(
                    "unclassified message from buyer domain {}",
                    message.sender_domain()
                ),
            ));
        }

        Ok(PipelineOutcome::Routed(outcome))
    }
}
