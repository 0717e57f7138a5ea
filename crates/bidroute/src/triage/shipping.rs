//! Shipping-notice detection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::patterns::PatternTables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Carrier {
    Ups,
    Fedex,
    Usps,
    Amazon,
    Unknown,
}

impl Carrier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Carrier::Ups => "ups",
            Carrier::Fedex => "fedex",
            Carrier::Usps => "usps",
            Carrier::Amazon => "amazon",
            Carrier::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    OutForDelivery,
    InTransit,
    Shipped,
    Unknown,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::OutForDelivery => "out_for_delivery",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Shipped => "shipped",
            DeliveryStatus::Unknown => "unknown",
        }
    }
}

/// What a shipping detector saw in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingReport {
    pub keyword_hits: usize,
    pub subject_hit: bool,
    pub carrier: Carrier,
    pub delivery_status: DeliveryStatus,
    pub confidence: u8,
}

/// Decides whether text reads like a shipping notice.
///
/// The classifier still requires at least one extracted tracking number;
/// the detector only judges the wording.
pub trait ShippingDetector: Send + Sync {
    fn detect(&self, subject: &str, body: &str, tracking_numbers: &[String])
        -> Option<ShippingReport>;
}

/// Keyword-count detector driven by the `shipping` pattern table.
pub struct KeywordShippingDetector {
    tables: Arc<PatternTables>,
}

impl KeywordShippingDetector {
    pub fn new(tables: Arc<PatternTables>) -> Self {
        Self { tables }
    }

    fn carrier_for(&self, tracking_number: &str) -> Carrier {
        self.tables
            .shipping
            .carriers
            .iter()
            .find(|(_, re)| re.is_match(tracking_number))
            .map(|(carrier, _)| *carrier)
            .unwrap_or(Carrier::Unknown)
    }
}

impl ShippingDetector for KeywordShippingDetector {
    fn detect(
        &self,
        subject: &str,
        body: &str,
        tracking_numbers: &[String],
    ) -> Option<ShippingReport> {
        let table = &self.tables.shipping;
        let text = format!("{} {}", subject, body).to_lowercase();
        let subject_lower = subject.to_lowercase();

        let keyword_hits = table
            .keywords
            .iter()
            .filter(|kw| text.contains(kw.as_str()))
            .count();
        let subject_hit = table
            .subject_keywords
            .iter()
            .any(|kw| subject_lower.contains(kw.as_str()));

        if keyword_hits < table.min_keyword_hits && !subject_hit {
            return None;
        }

        let delivery_status = table
            .delivery_status
            .iter()
            .find(|(_, patterns)| patterns.is_match(&text))
            .map(|(status, _)| *status)
            .unwrap_or(DeliveryStatus::Unknown);

        let carrier = tracking_numbers
            .first()
            .map(|n| self.carrier_for(n))
            .unwrap_or(Carrier::Unknown);

        let confidence = (50 + 10 * keyword_hits).min(95) as u8;

        Some(ShippingReport {
            keyword_hits,
            subject_hit,
            carrier,
            delivery_status,
            confidence,
        })
    }
}
