//! Message triage: follow-up detection, then tiered intent classification.

pub mod entities;
pub mod intent;
pub mod patterns;
pub mod reply;
pub mod shipping;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::message::InboundMessage;

pub use entities::{EntityExtractor, EntityKind, EntitySet};
pub use intent::IntentClassifier;
pub use patterns::PatternTables;
pub use reply::{
    ActiveItem, ActiveItemKind, ActiveItemLookup, NoActiveItems, ReplyDetection, ReplyDetector,
    ReplySignal,
};
pub use shipping::{Carrier, DeliveryStatus, KeywordShippingDetector, ShippingDetector, ShippingReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FormalRfq,
    PriceCheck,
    Recall,
    ShippingNotice,
    CsUpdateRequest,
    ReplyFollowup,
    Unknown,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::FormalRfq,
        Category::PriceCheck,
        Category::Recall,
        Category::ShippingNotice,
        Category::CsUpdateRequest,
        Category::ReplyFollowup,
        Category::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FormalRfq => "formal_rfq",
            Category::PriceCheck => "price_check",
            Category::Recall => "recall",
            Category::ShippingNotice => "shipping_notice",
            Category::CsUpdateRequest => "cs_update_request",
            Category::ReplyFollowup => "reply_followup",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

/// What a customer-service message is asking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsIntent {
    OrderStatus,
    Delivery,
    Invoice,
    QuoteStatus,
    General,
}

impl CsIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CsIntent::OrderStatus => "order_status",
            CsIntent::Delivery => "delivery",
            CsIntent::Invoice => "invoice",
            CsIntent::QuoteStatus => "quote_status",
            CsIntent::General => "general",
        }
    }

    pub fn is_specific(&self) -> bool {
        !matches!(self, CsIntent::General)
    }

    /// Entity families that corroborate this intent.
    pub fn relevant_entities(&self) -> &'static [EntityKind] {
        match self {
            CsIntent::OrderStatus => &[EntityKind::PoNumber],
            CsIntent::Delivery => &[EntityKind::PoNumber, EntityKind::TrackingNumber],
            CsIntent::Invoice => &[EntityKind::InvoiceNumber, EntityKind::PoNumber],
            CsIntent::QuoteStatus => &[EntityKind::QuoteNumber],
            CsIntent::General => &[],
        }
    }
}

/// Result of the intent classifier. Serialized into the routing log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub category: Category,
    pub confidence: u8,
    pub entities: EntitySet,
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recalled_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cs_intent: Option<CsIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping: Option<ShippingReport>,
}

impl Classification {
    pub fn unknown(entities: EntitySet, reasons: Vec<String>) -> Self {
        Self {
            category: Category::Unknown,
            confidence: 0,
            entities,
            reasons,
            recalled_subject: None,
            cs_intent: None,
            shipping: None,
        }
    }
}

/// Anything that can classify a message. `IntentClassifier` is the real one.
pub trait Classify: Send + Sync {
    fn classify(&self, message: &InboundMessage) -> Classification;
}

/// Outcome of triage, handed to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    FollowUp {
        detection: ReplyDetection,
        entities: EntitySet,
    },
    Classified(Classification),
}

impl Decision {
    pub fn category(&self) -> Category {
        match self {
            Decision::FollowUp { .. } => Category::ReplyFollowup,
            Decision::Classified(c) => c.category,
        }
    }

    pub fn entities(&self) -> &EntitySet {
        match self {
            Decision::FollowUp { entities, .. } => entities,
            Decision::Classified(c) => &c.entities,
        }
    }
}

/// The single triage path shared by the router and the QA harness.
pub struct Triage {
    detector: ReplyDetector,
    classifier: Arc<dyn Classify>,
    extractor: EntityExtractor,
    lookup: Arc<dyn ActiveItemLookup>,
}

impl Triage {
    pub fn new(
        detector: ReplyDetector,
        classifier: Arc<dyn Classify>,
        extractor: EntityExtractor,
        lookup: Arc<dyn ActiveItemLookup>,
    ) -> Self {
        Self {
            detector,
            classifier,
            extractor,
            lookup,
        }
    }

    /// Standard wiring over one set of pattern tables.
    pub fn from_tables(
        tables: Arc<PatternTables>,
        scoring: crate::config::ReplyScoring,
        lookup: Arc<dyn ActiveItemLookup>,
    ) -> Self {
        let classifier = IntentClassifier::new(
            tables.clone(),
            Arc::new(KeywordShippingDetector::new(tables.clone())),
        );
        Self::new(
            ReplyDetector::new(tables.clone(), scoring),
            Arc::new(classifier),
            EntityExtractor::new(tables),
            lookup,
        )
    }

    /// A positive follow-up detection wins; the classifier is not consulted.
    pub fn evaluate(&self, message: &InboundMessage) -> Decision {
        if let Some(detection) = self.detector.detect(message, self.lookup.as_ref()) {
            let entities = self.extractor.extract(&message.subject, &message.body_text);
            return Decision::FollowUp {
                detection,
                entities,
            };
        }
        Decision::Classified(self.classifier.classify(message))
    }

    pub fn lookup(&self) -> &Arc<dyn ActiveItemLookup> {
        &self.lookup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("spam".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&Category::CsUpdateRequest).unwrap();
        assert_eq!(json, "\"cs_update_request\"");
    }

    #[test]
    fn test_cs_intent_relevance() {
        assert!(!CsIntent::General.is_specific());
        assert!(CsIntent::Invoice.relevant_entities().contains(&EntityKind::PoNumber));
        assert!(CsIntent::General.relevant_entities().is_empty());
    }
}
