//! Business identifier extraction.
//!
//! Extraction is pure: the same subject and body always yield the same
//! `EntitySet`, in the same order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::patterns::PatternTables;

/// The identifier families the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    PoNumber,
    QuoteNumber,
    InvoiceNumber,
    TrackingNumber,
    SolicitationNumber,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::PoNumber,
        EntityKind::QuoteNumber,
        EntityKind::InvoiceNumber,
        EntityKind::TrackingNumber,
        EntityKind::SolicitationNumber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::PoNumber => "po_number",
            EntityKind::QuoteNumber => "quote_number",
            EntityKind::InvoiceNumber => "invoice_number",
            EntityKind::TrackingNumber => "tracking_number",
            EntityKind::SolicitationNumber => "solicitation_number",
        }
    }

    /// Key of this family in the pattern tables.
    pub fn table_key(&self) -> &'static str {
        match self {
            EntityKind::PoNumber => "poNumbers",
            EntityKind::QuoteNumber => "quoteNumbers",
            EntityKind::InvoiceNumber => "invoiceNumbers",
            EntityKind::TrackingNumber => "trackingNumbers",
            EntityKind::SolicitationNumber => "solicitationNumbers",
        }
    }
}

/// Normalized identifiers found in a message. Lists are never null, only empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySet {
    #[serde(default)]
    pub po_numbers: Vec<String>,
    #[serde(default)]
    pub quote_numbers: Vec<String>,
    #[serde(default)]
    pub invoice_numbers: Vec<String>,
    #[serde(default)]
    pub tracking_numbers: Vec<String>,
    #[serde(default)]
    pub solicitation_numbers: Vec<String>,
}

impl EntitySet {
    pub fn get(&self, kind: EntityKind) -> &[String] {
        match kind {
            EntityKind::PoNumber => &self.po_numbers,
            EntityKind::QuoteNumber => &self.quote_numbers,
            EntityKind::InvoiceNumber => &self.invoice_numbers,
            EntityKind::TrackingNumber => &self.tracking_numbers,
            EntityKind::SolicitationNumber => &self.solicitation_numbers,
        }
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut Vec<String> {
        match kind {
            EntityKind::PoNumber => &mut self.po_numbers,
            EntityKind::QuoteNumber => &mut self.quote_numbers,
            EntityKind::InvoiceNumber => &mut self.invoice_numbers,
            EntityKind::TrackingNumber => &mut self.tracking_numbers,
            EntityKind::SolicitationNumber => &mut self.solicitation_numbers,
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|k| self.get(*k).is_empty())
    }

    /// True when `value` (normalized first) is present for `kind`.
    pub fn contains(&self, kind: EntityKind, value: &str) -> bool {
        let wanted = normalize(value);
        self.get(kind).iter().any(|v| *v == wanted)
    }
}

/// Uppercases and strips separators so `po-12 345` and `PO12345` compare equal.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '_' | '.' | '#' | '/'))
        .flat_map(char::to_uppercase)
        .collect()
}

struct Candidate {
    start: usize,
    end: usize,
    family: usize,
    value: String,
}

/// Runs the entity pattern families over message text.
#[derive(Clone)]
pub struct EntityExtractor {
    tables: Arc<PatternTables>,
}

impl EntityExtractor {
    pub fn new(tables: Arc<PatternTables>) -> Self {
        Self { tables }
    }

    /// Extracts every entity type from `subject` and `body`.
    ///
    /// Within a type, every match is kept in document order, repeats
    /// included. A match overlapping an earlier accepted match of another
    /// family is the same span and is dropped. Types do not affect each other.
    pub fn extract(&self, subject: &str, body: &str) -> EntitySet {
        let text = format!("{}\n{}", subject, body);
        let mut set = EntitySet::default();

        for (kind, families) in &self.tables.entities {
            let mut candidates = Vec::new();
            for (family, re) in families.iter().enumerate() {
                for caps in re.captures_iter(&text) {
                    let Some(whole) = caps.get(0) else { continue };
                    let value = caps.get(1).unwrap_or(whole);
                    candidates.push(Candidate {
                        start: whole.start(),
                        end: whole.end(),
                        family,
                        value: normalize(value.as_str()),
                    });
                }
            }
            candidates.sort_by_key(|c| (c.start, c.family));

            let mut accepted: Vec<(usize, usize)> = Vec::new();
            let values = set.get_mut(*kind);
            for c in candidates {
                if accepted.iter().any(|(s, e)| c.start < *e && *s < c.end) {
                    continue;
                }
                accepted.push((c.start, c.end));
                if !c.value.is_empty() {
                    values.push(c.value);
                }
            }
        }

        set
    }
}
