//! Labeled regression corpus. Every entry must keep its label after any
//! change to the pattern tables or the triage code.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::CollaboratorError;
use crate::message::{InboundMessage, MessageHeaders};
use crate::triage::{ActiveItem, ActiveItemKind, ActiveItemLookup, Category};

/// Buyer with open quotes in the fixture world.
pub const FIXTURE_BUYER: &str = "valentina.demidenko@cdcr.ca.gov";

pub const FIXTURE_MAILBOX: &str = "fixtures";

#[derive(Debug, Clone, Copy)]
pub struct Fixture {
    pub label: &'static str,
    pub sender: &'static str,
    pub subject: &'static str,
    pub body: &'static str,
    pub attachments: &'static [&'static str],
    /// Whether the message carries `In-Reply-To`.
    pub threaded: bool,
    pub expected: Category,
}

impl Fixture {
    /// Builds the message this fixture describes, with UID `id`.
    pub fn to_message(&self, id: u32) -> InboundMessage {
        let headers = if self.threaded {
            MessageHeaders {
                message_id: Some(format!("fixture-{}@qa", id)),
                in_reply_to: Some("original@supplier".to_string()),
                references: None,
            }
        } else {
            MessageHeaders {
                message_id: Some(format!("fixture-{}@qa", id)),
                ..Default::default()
            }
        };

        InboundMessage {
            id,
            mailbox: FIXTURE_MAILBOX.to_string(),
            subject: self.subject.to_string(),
            sender_display: self.sender.to_string(),
            sender_email: self.sender.to_string(),
            received_at: fixture_time(id),
            headers,
            body_text: self.body.to_string(),
            attachment_names: self.attachments.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn fixture_time(id: u32) -> DateTime<Utc> {
    let base = Utc
        .with_ymd_and_hms(2026, 2, 19, 9, 0, 0)
        .single()
        .unwrap_or_default();
    base + chrono::Duration::minutes(i64::from(id))
}

pub static FIXTURES: &[Fixture] = &[
    // Price checks: one lightweight worksheet, dated subject.
    Fixture {
        label: "price check, airway adapter",
        sender: FIXTURE_BUYER,
        subject: "Quote - Airway Adapter - 02.19.26",
        body: "Please email me quote",
        attachments: &["AMS 704 - Airway Adapter.pdf"],
        threaded: false,
        expected: Category::PriceCheck,
    },
    Fixture {
        label: "price check, MH OS",
        sender: FIXTURE_BUYER,
        subject: "Quote - MH OS - 02.19.26",
        body: "Please email me quote",
        attachments: &["AMS 704 - MH OS.pdf"],
        threaded: false,
        expected: Category::PriceCheck,
    },
    Fixture {
        label: "price check, BLS Med",
        sender: FIXTURE_BUYER,
        subject: "Quote - BLS Med - 02.19.26",
        body: "Please email me quote",
        attachments: &["AMS 704 - BLS Med.pdf"],
        threaded: false,
        expected: Category::PriceCheck,
    },
    Fixture {
        label: "price check, BLS IT Med",
        sender: FIXTURE_BUYER,
        subject: "Quote - BLS IT Med - 02.19.26",
        body: "Please email me quote",
        attachments: &["AMS 704 - BLS IT Med.pdf"],
        threaded: false,
        expected: Category::PriceCheck,
    },
    Fixture {
        label: "price check, Med OS",
        sender: FIXTURE_BUYER,
        subject: "Quote - Med OS - 02.19.26",
        body: "Please email me quote",
        attachments: &["AMS 704 - Med OS.pdf"],
        threaded: false,
        expected: Category::PriceCheck,
    },
    // Formal solicitations.
    Fixture {
        label: "formal RFQ with 703B and 704B",
        sender: "janie.buyer@cdcr.ca.gov",
        subject: "REQUEST FOR QUOTE PR 10838349",
        body: "Please sign and quote for CCWF",
        attachments: &[
            "AMS 704B - PR 10838349.pdf",
            "BID PACKAGE & FORMS.pdf",
            "AMS 703B - PR 10838349.pdf",
        ],
        threaded: false,
        expected: Category::FormalRfq,
    },
    Fixture {
        label: "formal RFQ by solicitation subject",
        sender: "jessica.buyer@cchcs.ca.gov",
        subject: "SAC RFQ 10837794",
        body: "update your vendor record",
        attachments: &["204, 205, SUPP.pdf", "R26Q8_10837794.pdf", "10837794 AMS 704B.pdf"],
        threaded: false,
        expected: Category::FormalRfq,
    },
    // Recalls.
    Fixture {
        label: "recall by subject marker",
        sender: FIXTURE_BUYER,
        subject: "Recall: Quote - Med OS - 02.17.26",
        body: "Demidenko, Valentina@CDCR would like to recall the message, \"Quote - Med OS - 02.17.26\".",
        attachments: &[],
        threaded: false,
        expected: Category::Recall,
    },
    Fixture {
        label: "recall of a quote request",
        sender: FIXTURE_BUYER,
        subject: "Recall: Quote request - MH OS - 02.17.26",
        body: "Demidenko, Valentina@CDCR would like to recall the message, \"Quote request - MH OS - 02.17.26\".",
        attachments: &[],
        threaded: false,
        expected: Category::Recall,
    },
    // Customer service.
    Fixture {
        label: "cs pricing question",
        sender: "buyer@cdph.ca.gov",
        subject: "Question about pricing",
        body: "Can you send me pricing for nitrile gloves?",
        attachments: &[],
        threaded: false,
        expected: Category::CsUpdateRequest,
    },
    Fixture {
        label: "cs invoice question",
        sender: "buyer@cdph.ca.gov",
        subject: "Invoice status",
        body: "When will the invoice be ready for PO 12345?",
        attachments: &[],
        threaded: false,
        expected: Category::CsUpdateRequest,
    },
    Fixture {
        label: "cs quote follow-up without open items",
        sender: "buyer@calvet.ca.gov",
        subject: "Following up on quote",
        body: "Following up on quote R26Q16, any update?",
        attachments: &[],
        threaded: false,
        expected: Category::CsUpdateRequest,
    },
    Fixture {
        label: "cs delivery question with PO",
        sender: "warehouse@calvet.ca.gov",
        subject: "PO 4500123456",
        body: "When will the order arrive? We have not received it yet.",
        attachments: &[],
        threaded: false,
        expected: Category::CsUpdateRequest,
    },
    Fixture {
        label: "reply from buyer without open items is cs",
        sender: "buyer@cdph.ca.gov",
        subject: "RE: Quote - Gloves - 02.10.26",
        body: "Any update on this?",
        attachments: &[],
        threaded: true,
        expected: Category::CsUpdateRequest,
    },
    // Shipping.
    Fixture {
        label: "ups shipping notice",
        sender: "auto-notify@ups.com",
        subject: "Your order has shipped",
        body: "Your order has been shipped. Tracking number 1Z999AA10123456784.",
        attachments: &[],
        threaded: false,
        expected: Category::ShippingNotice,
    },
    // Replies.
    Fixture {
        label: "reply without attachment is a follow-up",
        sender: FIXTURE_BUYER,
        subject: "RE: Quote - Med OS - 02.19.26",
        body: "What is the status of this quote?",
        attachments: &[],
        threaded: true,
        expected: Category::ReplyFollowup,
    },
    Fixture {
        label: "reply with a fresh worksheet is a price check",
        sender: FIXTURE_BUYER,
        subject: "RE: Quote - Med OS - 02.19.26",
        body: "Please email me quote",
        attachments: &["AMS 704 - Med OS.pdf"],
        threaded: true,
        expected: Category::PriceCheck,
    },
    Fixture {
        label: "reply with 704B is a formal RFQ",
        sender: "jessica.buyer@cchcs.ca.gov",
        subject: "RE: SAC RFQ 10837794",
        body: "update your vendor record",
        attachments: &["10837794 AMS 704B.pdf"],
        threaded: true,
        expected: Category::FormalRfq,
    },
    Fixture {
        label: "reply prefix with quote request worksheet",
        sender: FIXTURE_BUYER,
        subject: "RE: Quote Request - OS Den - 02.13.2026",
        body: "Please email me quote",
        attachments: &["AMS 704 - OS Den.pdf"],
        threaded: false,
        expected: Category::PriceCheck,
    },
    Fixture {
        label: "forwarded quote request",
        sender: "colleague@partner-supply.com",
        subject: "FW: Quote request",
        body: "Please see attached",
        attachments: &["forwarded_704.pdf"],
        threaded: false,
        expected: Category::PriceCheck,
    },
    // Nothing actionable.
    Fixture {
        label: "meeting notes",
        sender: "colleague@partner-supply.com",
        subject: "Meeting notes",
        body: "Here are the meeting notes from today",
        attachments: &[],
        threaded: false,
        expected: Category::Unknown,
    },
    Fixture {
        label: "buyer sends only an inline image",
        sender: "buyer@cdcr.ca.gov",
        subject: "Signed documents",
        body: "Attached.",
        attachments: &["image001.png"],
        threaded: false,
        expected: Category::Unknown,
    },
    Fixture {
        label: "question from a non-buyer",
        sender: "someone@gmail.com",
        subject: "Question about pricing",
        body: "Can you send me pricing for nitrile gloves?",
        attachments: &[],
        threaded: false,
        expected: Category::Unknown,
    },
];

/// Open items known in the fixture world.
pub struct FixtureActiveItems {
    items: HashMap<&'static str, Vec<ActiveItem>>,
}

impl Default for FixtureActiveItems {
    fn default() -> Self {
        let mut items = HashMap::new();
        items.insert(
            FIXTURE_BUYER,
            vec![
                ActiveItem {
                    kind: ActiveItemKind::Quote,
                    reference: "Med OS".to_string(),
                    status: "sent".to_string(),
                },
                ActiveItem {
                    kind: ActiveItemKind::Request,
                    reference: "Airway Adapter".to_string(),
                    status: "pricing".to_string(),
                },
            ],
        );
        Self { items }
    }
}

impl ActiveItemLookup for FixtureActiveItems {
    fn active_items(&self, sender_email: &str) -> Result<Vec<ActiveItem>, CollaboratorError> {
        Ok(self.items.get(sender_email).cloned().unwrap_or_default())
    }
}
