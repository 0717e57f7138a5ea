//! Declarative triage pattern tables.
//!
//! Tables are plain YAML (`patterns/default.yaml` is compiled in) so they can
//! be reviewed, versioned and replaced without touching code. Loading compiles
//! every regex up front; a table that does not compile is a configuration
//! error, never a runtime surprise.

use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::TriageConfig;
use crate::error::ConfigError;
use crate::secrets::expand_home;

use super::entities::EntityKind;
use super::shipping::{Carrier, DeliveryStatus};
use super::CsIntent;

const DEFAULT_TABLES: &str = include_str!("patterns/default.yaml");

// ---------------------------------------------------------------------------
// On-disk format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternTablesDef {
    pub version: u32,
    #[serde(default)]
    pub relevant_attachments: Vec<String>,
    pub recall: RecallDef,
    pub formal_rfq: FormalRfqDef,
    pub price_check: PriceCheckDef,
    pub shipping: ShippingDef,
    pub customer_service: CustomerServiceDef,
    pub reply: ReplyDef,
    pub entities: EntitiesDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallDef {
    pub subject_markers: Vec<String>,
    #[serde(default)]
    pub body_phrases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_quoted_subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormalRfqDef {
    #[serde(default)]
    pub subject_patterns: Vec<String>,
    #[serde(default)]
    pub forms: Vec<FormDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormRole {
    /// Part of the formal bid set; two distinct ones raise confidence.
    Cooperating,
    /// Accompanies a bid set but proves nothing on its own.
    Supporting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDef {
    pub form: String,
    pub role: FormRole,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCheckDef {
    #[serde(default)]
    pub worksheet_patterns: Vec<String>,
    #[serde(default)]
    pub subject_patterns: Vec<String>,
    #[serde(default)]
    pub known_senders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingDef {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub subject_keywords: Vec<String>,
    #[serde(default = "default_min_keyword_hits")]
    pub min_keyword_hits: usize,
    #[serde(default)]
    pub delivery_status: Vec<DeliveryStatusDef>,
    #[serde(default)]
    pub carriers: Vec<CarrierDef>,
}

fn default_min_keyword_hits() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatusDef {
    pub status: DeliveryStatus,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierDef {
    pub carrier: Carrier,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerServiceDef {
    pub buyer_domains: Vec<String>,
    pub intents: Vec<IntentDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDef {
    pub intent: CsIntent,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyDef {
    pub phrases: Vec<String>,
    #[serde(default)]
    pub new_business_phrases: Vec<String>,
    #[serde(default)]
    pub new_submission_attachments: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesDef {
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

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

/// An ordered list of compiled patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    fn compile(table: &str, sources: &[String]) -> Result<Self, ConfigError> {
        let patterns = sources
            .iter()
            .enumerate()
            .map(|(i, src)| compile_one(&format!("{}[{}]", table, i), src))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }

    /// Source of the first pattern (in table order) that matches.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|re| re.is_match(text))
            .map(|re| re.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Regex> {
        self.patterns.iter()
    }
}

fn compile_one(table: &str, source: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            table: table.to_string(),
            reason: e.to_string(),
        })
}

#[derive(Debug, Clone)]
pub struct RecallPatterns {
    pub subject_markers: PatternSet,
    pub body_phrases: PatternSet,
    pub body_quoted_subject: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct FormPatterns {
    pub form: String,
    pub role: FormRole,
    pub patterns: PatternSet,
}

#[derive(Debug, Clone)]
pub struct FormalRfqPatterns {
    pub subject: PatternSet,
    pub forms: Vec<FormPatterns>,
}

#[derive(Debug, Clone)]
pub struct PriceCheckPatterns {
    pub worksheets: PatternSet,
    pub subjects: PatternSet,
    pub known_senders: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ShippingPatterns {
    pub keywords: Vec<String>,
    pub subject_keywords: Vec<String>,
    pub min_keyword_hits: usize,
    pub delivery_status: Vec<(DeliveryStatus, PatternSet)>,
    pub carriers: Vec<(Carrier, Regex)>,
}

#[derive(Debug, Clone)]
pub struct CustomerServicePatterns {
    pub buyer_domains: Vec<String>,
    pub intents: Vec<(CsIntent, PatternSet)>,
}

impl CustomerServicePatterns {
    /// True when `domain` equals a buyer domain, is a subdomain of one, or
    /// has a label equal to one (`cdcr` matches `mail.cdcr.ca.gov`).
    pub fn is_buyer_domain(&self, domain: &str) -> bool {
        let domain = domain.trim().to_ascii_lowercase();
        if domain.is_empty() {
            return false;
        }
        self.buyer_domains.iter().any(|entry| {
            domain == *entry
                || domain.ends_with(&format!(".{}", entry))
                || domain.split('.').any(|label| label == entry)
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReplyPatterns {
    pub phrases: PatternSet,
    pub new_business_phrases: PatternSet,
    pub new_submission_attachments: PatternSet,
}

/// Compiled, validated pattern tables shared by every triage stage.
#[derive(Debug, Clone)]
pub struct PatternTables {
    pub version: u32,
    pub relevant_attachments: PatternSet,
    pub recall: RecallPatterns,
    pub formal_rfq: FormalRfqPatterns,
    pub price_check: PriceCheckPatterns,
    pub shipping: ShippingPatterns,
    pub customer_service: CustomerServicePatterns,
    pub reply: ReplyPatterns,
    pub entities: Vec<(EntityKind, Vec<Regex>)>,
}

impl PatternTables {
    /// The compiled-in tables.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str(DEFAULT_TABLES)
    }

    /// Loads tables from the configured file, or the built-in ones.
    pub fn load(config: &TriageConfig) -> Result<Self, ConfigError> {
        match config.patterns_file.as_deref() {
            Some(path) => Self::from_file(Path::new(&expand_home(path))),
            None => Self::builtin(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let def: PatternTablesDef = serde_yaml::from_str(content)?;
        Self::compile(&def)
    }

    pub fn compile(def: &PatternTablesDef) -> Result<Self, ConfigError> {
        validate_def(def)?;

        let forms = def
            .formal_rfq
            .forms
            .iter()
            .map(|f| -> Result<FormPatterns, ConfigError> {
                Ok(FormPatterns {
                    form: f.form.to_ascii_lowercase(),
                    role: f.role,
                    patterns: PatternSet::compile(
                        &format!("formalRfq.forms.{}", f.form),
                        &f.patterns,
                    )?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let delivery_status = def
            .shipping
            .delivery_status
            .iter()
            .map(|d| -> Result<(DeliveryStatus, PatternSet), ConfigError> {
                Ok((
                    d.status,
                    PatternSet::compile(
                        &format!("shipping.deliveryStatus.{}", d.status.as_str()),
                        &d.patterns,
                    )?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let carriers = def
            .shipping
            .carriers
            .iter()
            .map(|c| -> Result<(Carrier, Regex), ConfigError> {
                Ok((
                    c.carrier,
                    compile_one(
                        &format!("shipping.carriers.{}", c.carrier.as_str()),
                        &c.pattern,
                    )?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let intents = def
            .customer_service
            .intents
            .iter()
            .map(|i| -> Result<(CsIntent, PatternSet), ConfigError> {
                Ok((
                    i.intent,
                    PatternSet::compile(
                        &format!("customerService.intents.{}", i.intent.as_str()),
                        &i.patterns,
                    )?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let body_quoted_subject = def
            .recall
            .body_quoted_subject
            .as_deref()
            .map(|src| compile_one("recall.bodyQuotedSubject", src))
            .transpose()?;

        let e = &def.entities;
        let entities = [
            (EntityKind::PoNumber, &e.po_numbers),
            (EntityKind::QuoteNumber, &e.quote_numbers),
            (EntityKind::InvoiceNumber, &e.invoice_numbers),
            (EntityKind::TrackingNumber, &e.tracking_numbers),
            (EntityKind::SolicitationNumber, &e.solicitation_numbers),
        ]
        .into_iter()
        .map(|(kind, sources)| -> Result<(EntityKind, Vec<Regex>), ConfigError> {
            let set = PatternSet::compile(&format!("entities.{}", kind.table_key()), sources)?;
            Ok((kind, set.patterns))
        })
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            version: def.version,
            relevant_attachments: PatternSet::compile(
                "relevantAttachments",
                &def.relevant_attachments,
            )?,
            recall: RecallPatterns {
                subject_markers: PatternSet::compile(
                    "recall.subjectMarkers",
                    &def.recall.subject_markers,
                )?,
                body_phrases: PatternSet::compile("recall.bodyPhrases", &def.recall.body_phrases)?,
                body_quoted_subject,
            },
            formal_rfq: FormalRfqPatterns {
                subject: PatternSet::compile(
                    "formalRfq.subjectPatterns",
                    &def.formal_rfq.subject_patterns,
                )?,
                forms,
            },
            price_check: PriceCheckPatterns {
                worksheets: PatternSet::compile(
                    "priceCheck.worksheetPatterns",
                    &def.price_check.worksheet_patterns,
                )?,
                subjects: PatternSet::compile(
                    "priceCheck.subjectPatterns",
                    &def.price_check.subject_patterns,
                )?,
                known_senders: def.price_check.known_senders.clone(),
            },
            shipping: ShippingPatterns {
                keywords: lowercase_all(&def.shipping.keywords),
                subject_keywords: lowercase_all(&def.shipping.subject_keywords),
                min_keyword_hits: def.shipping.min_keyword_hits,
                delivery_status,
                carriers,
            },
            customer_service: CustomerServicePatterns {
                buyer_domains: def.customer_service.buyer_domains.clone(),
                intents,
            },
            reply: ReplyPatterns {
                phrases: PatternSet::compile("reply.phrases", &def.reply.phrases)?,
                new_business_phrases: PatternSet::compile(
                    "reply.newBusinessPhrases",
                    &def.reply.new_business_phrases,
                )?,
                new_submission_attachments: PatternSet::compile(
                    "reply.newSubmissionAttachments",
                    &def.reply.new_submission_attachments,
                )?,
            },
            entities,
        })
    }

    /// Attachment names that count as documents, lowercased, in order.
    pub fn relevant_attachments(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty() && self.relevant_attachments.is_match(n))
            .collect()
    }
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

fn validate_def(def: &PatternTablesDef) -> Result<(), ConfigError> {
    if def.version == 0 {
        return Err(ConfigError::Validation {
            message: "pattern tables must declare a version >= 1".to_string(),
        });
    }

    if def.shipping.min_keyword_hits == 0 {
        return Err(ConfigError::Validation {
            message: "shipping.minKeywordHits must be at least 1".to_string(),
        });
    }

    let lowercase_lists = [
        ("customerService.buyerDomains", &def.customer_service.buyer_domains),
        ("priceCheck.knownSenders", &def.price_check.known_senders),
    ];
    for (table, values) in lowercase_lists {
        if let Some(bad) = values
            .iter()
            .find(|v| v.trim().is_empty() || **v != v.to_lowercase())
        {
            return Err(ConfigError::InvalidPattern {
                table: table.to_string(),
                reason: format!("entry '{}' must be non-empty and lowercase", bad),
            });
        }
    }

    let mut forms = std::collections::HashSet::new();
    for form in &def.formal_rfq.forms {
        if !forms.insert(form.form.to_ascii_lowercase()) {
            return Err(ConfigError::InvalidPattern {
                table: "formalRfq.forms".to_string(),
                reason: format!("form '{}' is declared twice", form.form),
            });
        }
    }

    Ok(())
}
