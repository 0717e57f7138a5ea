//! Tiered intent classification. The first tier that fires wins.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::trace;

use crate::message::{strip_reply_prefixes, InboundMessage};

use super::entities::EntityExtractor;
use super::patterns::{FormRole, PatternTables};
use super::shipping::ShippingDetector;
use super::{Category, Classification, Classify, EntitySet};

const RECALL_CONFIDENCE: u8 = 95;
const FORMAL_MULTI_FORM_CONFIDENCE: u8 = 90;
const FORMAL_CONFIDENCE: u8 = 75;
const PRICE_CHECK_CONFIDENCE: u8 = 85;
const CS_CORROBORATED_CONFIDENCE: u8 = 70;
const CS_SPECIFIC_CONFIDENCE: u8 = 60;
const CS_GENERAL_CONFIDENCE: u8 = 50;

pub struct IntentClassifier {
    tables: Arc<PatternTables>,
    extractor: EntityExtractor,
    shipping: Arc<dyn ShippingDetector>,
}

impl IntentClassifier {
    pub fn new(tables: Arc<PatternTables>, shipping: Arc<dyn ShippingDetector>) -> Self {
        Self {
            extractor: EntityExtractor::new(tables.clone()),
            tables,
            shipping,
        }
    }

    fn recall(&self, message: &InboundMessage, entities: &EntitySet) -> Option<Classification> {
        let recall = &self.tables.recall;

        let subject_marker = recall
            .subject_markers
            .iter()
            .find_map(|re| re.find(&message.subject));
        let body_phrase = recall.body_phrases.first_match(&message.body_text);
        if subject_marker.is_none() && body_phrase.is_none() {
            return None;
        }

        let mut reasons = Vec::new();
        let mut recalled_subject = None;
        if let Some(m) = subject_marker {
            reasons.push("recall marker in subject".to_string());
            let rest = message.subject[m.end()..].trim();
            if !rest.is_empty() {
                recalled_subject = Some(rest.to_string());
            }
        }
        if let Some(src) = body_phrase {
            reasons.push(format!("recall phrase in body: {}", src));
        }
        if recalled_subject.is_none() {
            recalled_subject = recall
                .body_quoted_subject
                .as_ref()
                .and_then(|re| re.captures(&message.body_text))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty());
        }

        Some(Classification {
            category: Category::Recall,
            confidence: RECALL_CONFIDENCE,
            entities: entities.clone(),
            reasons,
            recalled_subject,
            cs_intent: None,
            shipping: None,
        })
    }

    fn formal_rfq(
        &self,
        subject: &str,
        attachments: &[String],
        entities: &EntitySet,
    ) -> Option<Classification> {
        let table = &self.tables.formal_rfq;
        let mut reasons = Vec::new();

        let subject_hit = table.subject.first_match(subject);
        if let Some(src) = subject_hit {
            reasons.push(format!("solicitation subject: {}", src));
        }

        let mut cooperating = BTreeSet::new();
        for name in attachments {
            for form in &table.forms {
                if form.patterns.is_match(name) {
                    reasons.push(format!("form {} attachment: {}", form.form, name));
                    if form.role == FormRole::Cooperating {
                        cooperating.insert(form.form.as_str());
                    }
                }
            }
        }

        if subject_hit.is_none() && cooperating.is_empty() {
            return None;
        }

        let confidence = if cooperating.len() >= 2 {
            FORMAL_MULTI_FORM_CONFIDENCE
        } else {
            FORMAL_CONFIDENCE
        };

        Some(classified(Category::FormalRfq, confidence, entities, reasons))
    }

    fn price_check(
        &self,
        subject: &str,
        sender_email: &str,
        attachments: &[String],
        entities: &EntitySet,
    ) -> Option<Classification> {
        let table = &self.tables.price_check;

        if let Some(name) = attachments.iter().find(|n| table.worksheets.is_match(n)) {
            let reasons = vec![format!("price check worksheet: {}", name)];
            return Some(classified(
                Category::PriceCheck,
                PRICE_CHECK_CONFIDENCE,
                entities,
                reasons,
            ));
        }

        if attachments.is_empty() {
            return None;
        }

        if let Some(src) = table.subjects.first_match(subject) {
            let reasons = vec![
                format!("quote request subject: {}", src),
                format!("{} relevant attachment(s)", attachments.len()),
            ];
            return Some(classified(
                Category::PriceCheck,
                PRICE_CHECK_CONFIDENCE,
                entities,
                reasons,
            ));
        }

        if !sender_email.is_empty()
            && table
                .known_senders
                .iter()
                .any(|s| sender_email.contains(s.as_str()))
        {
            let reasons = vec![
                "known price check sender".to_string(),
                format!("{} relevant attachment(s)", attachments.len()),
            ];
            return Some(classified(
                Category::PriceCheck,
                PRICE_CHECK_CONFIDENCE,
                entities,
                reasons,
            ));
        }

        None
    }

    fn shipping_notice(
        &self,
        message: &InboundMessage,
        entities: &EntitySet,
    ) -> Option<Classification> {
        if entities.tracking_numbers.is_empty() {
            return None;
        }
        let report = self.shipping.detect(
            &message.subject,
            &message.body_text,
            &entities.tracking_numbers,
        )?;

        let mut reasons = vec![format!("{} shipping keyword(s)", report.keyword_hits)];
        if report.subject_hit {
            reasons.push("shipping keyword in subject".to_string());
        }
        reasons.push(format!(
            "carrier {} status {}",
            report.carrier.as_str(),
            report.delivery_status.as_str()
        ));

        let mut classification = classified(
            Category::ShippingNotice,
            report.confidence,
            entities,
            reasons,
        );
        classification.shipping = Some(report);
        Some(classification)
    }

    fn cs_update(&self, message: &InboundMessage, entities: &EntitySet) -> Option<Classification> {
        let table = &self.tables.customer_service;
        if !table.is_buyer_domain(message.sender_domain()) {
            return None;
        }

        let text = format!("{}\n{}", message.subject, message.body_text);
        let (intent, src) = table
            .intents
            .iter()
            .find_map(|(intent, patterns)| patterns.first_match(&text).map(|src| (*intent, src)))?;

        let corroborated = intent
            .relevant_entities()
            .iter()
            .any(|kind| !entities.get(*kind).is_empty());
        let confidence = match (intent.is_specific(), corroborated) {
            (true, true) => CS_CORROBORATED_CONFIDENCE,
            (true, false) => CS_SPECIFIC_CONFIDENCE,
            (false, _) => CS_GENERAL_CONFIDENCE,
        };

        let mut reasons = vec![
            format!("buyer domain {}", message.sender_domain()),
            format!("{} phrase: {}", intent.as_str(), src),
        ];
        if corroborated {
            reasons.push("matching reference number".to_string());
        }

        let mut classification =
            classified(Category::CsUpdateRequest, confidence, entities, reasons);
        classification.cs_intent = Some(intent);
        Some(classification)
    }

    fn unknown_evidence(&self, message: &InboundMessage, attachments: &[String]) -> Vec<String> {
        let mut reasons = vec!["no tier matched".to_string()];
        if self
            .tables
            .customer_service
            .is_buyer_domain(message.sender_domain())
        {
            reasons.push(format!("buyer domain {}", message.sender_domain()));
        }
        if !attachments.is_empty() {
            reasons.push(format!("relevant attachments: {}", attachments.join(", ")));
        }
        if message.has_reply_headers() {
            reasons.push("reply headers present".to_string());
        }
        reasons
    }
}

impl Classify for IntentClassifier {
    fn classify(&self, message: &InboundMessage) -> Classification {
        let entities = self.extractor.extract(&message.subject, &message.body_text);
        let subject = strip_reply_prefixes(&message.subject);
        let attachments = self.tables.relevant_attachments(&message.attachment_names);

        let result = self
            .recall(message, &entities)
            .or_else(|| self.formal_rfq(subject, &attachments, &entities))
            .or_else(|| {
                self.price_check(subject, &message.sender_email, &attachments, &entities)
            })
            .or_else(|| self.shipping_notice(message, &entities))
            .or_else(|| self.cs_update(message, &entities))
            .unwrap_or_else(|| {
                Classification::unknown(
                    entities.clone(),
                    self.unknown_evidence(message, &attachments),
                )
            });

        trace!(
            uid = message.id,
            category = result.category.as_str(),
            confidence = result.confidence,
            "Classified message"
        );
        result
    }
}

fn classified(
    category: Category,
    confidence: u8,
    entities: &EntitySet,
    reasons: Vec<String>,
) -> Classification {
    Classification {
        category,
        confidence,
        entities: entities.clone(),
        reasons,
        recalled_subject: None,
        cs_intent: None,
        shipping: None,
    }
}
