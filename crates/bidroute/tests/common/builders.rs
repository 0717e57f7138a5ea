//! Builders for test messages and mailbox configs.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

use bidroute::config::MailboxConfig;
use bidroute::message::{InboundMessage, MessageHeaders};

pub const BUYER: &str = "valentina.demidenko@cdcr.ca.gov";

/// 2026-02-19 09:00 UTC plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 19, 9, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

/// Builds one message either as an `InboundMessage` or as raw RFC 822 bytes.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    uid: u32,
    mailbox: String,
    subject: String,
    sender_name: String,
    sender: String,
    received_at: DateTime<Utc>,
    message_id: Option<String>,
    in_reply_to: Option<String>,
    body: String,
    attachments: Vec<String>,
}

impl MessageBuilder {
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            mailbox: "sales".to_string(),
            subject: "Meeting notes".to_string(),
            sender_name: "Test Sender".to_string(),
            sender: "colleague@partner-supply.com".to_string(),
            received_at: at(i64::from(uid)),
            message_id: Some(format!("msg-{}@test", uid)),
            in_reply_to: None,
            body: "Here are the meeting notes from today".to_string(),
            attachments: Vec::new(),
        }
    }

    /// A dated price-check request from the fixture buyer.
    pub fn price_check(uid: u32, item: &str) -> Self {
        Self::new(uid)
            .from("Demidenko, Valentina@CDCR", BUYER)
            .subject(&format!("Quote - {} - 02.19.26", item))
            .body("Please email me quote")
            .attachment(&format!("AMS 704 - {}.pdf", item))
    }

    pub fn mailbox(mut self, mailbox: &str) -> Self {
        self.mailbox = mailbox.to_string();
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn from(mut self, name: &str, address: &str) -> Self {
        self.sender_name = name.to_string();
        self.sender = address.to_string();
        self
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_string());
        self
    }

    pub fn in_reply_to(mut self, id: &str) -> Self {
        self.in_reply_to = Some(id.to_string());
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn attachment(mut self, name: &str) -> Self {
        self.attachments.push(name.to_string());
        self
    }

    pub fn build(&self) -> InboundMessage {
        InboundMessage {
            id: self.uid,
            mailbox: self.mailbox.clone(),
            subject: self.subject.clone(),
            sender_display: format!("{} <{}>", self.sender_name, self.sender),
            sender_email: self.sender.to_lowercase(),
            received_at: self.received_at,
            headers: MessageHeaders {
                message_id: self.message_id.clone(),
                in_reply_to: self.in_reply_to.clone(),
                references: None,
            },
            body_text: self.body.clone(),
            attachment_names: self.attachments.clone(),
        }
    }

    pub fn to_rfc822(&self) -> Vec<u8> {
        let mut raw = String::new();
        raw.push_str(&format!("From: \"{}\" <{}>\r\n", self.sender_name, self.sender));
        raw.push_str("To: sales@supplier.example\r\n");
        raw.push_str(&format!("Subject: {}\r\n", self.subject));
        raw.push_str(&format!("Date: {}\r\n", self.received_at.to_rfc2822()));
        if let Some(id) = &self.message_id {
            raw.push_str(&format!("Message-ID: <{}>\r\n", id));
        }
        if let Some(id) = &self.in_reply_to {
            raw.push_str(&format!("In-Reply-To: <{}>\r\n", id));
        }
        raw.push_str("MIME-Version: 1.0\r\n");

        if self.attachments.is_empty() {
            raw.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
            raw.push_str(&self.body);
            raw.push_str("\r\n");
            return raw.into_bytes();
        }

        raw.push_str("Content-Type: multipart/mixed; boundary=\"part-boundary\"\r\n\r\n");
        raw.push_str("--part-boundary\r\n");
        raw.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
        raw.push_str(&self.body);
        raw.push_str("\r\n");
        for name in &self.attachments {
            raw.push_str("--part-boundary\r\n");
            raw.push_str(&format!("Content-Type: application/pdf; name=\"{}\"\r\n", name));
            raw.push_str(&format!(
                "Content-Disposition: attachment; filename=\"{}\"\r\n",
                name
            ));
            raw.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
            raw.push_str("JVBERi0xLjQK\r\n");
        }
        raw.push_str("--part-boundary--\r\n");
        raw.into_bytes()
    }
}

/// A mailbox config pointing at nothing; tests swap in a scripted transport.
pub fn mailbox_config(name: &str) -> MailboxConfig {
    let mut config: MailboxConfig = serde_yaml::from_str(&format!(
        "name: {}\nhost: imap.test.invalid\nusername: {}@supplier.example\n",
        name, name
    ))
    .unwrap();
    config.lookback_days = 3650;
    config.poll_interval = 60;
    config.max_backoff_secs = 600;
    config.fetch_timeout_secs = 5;
    config.cycle_budget_secs = 60;
    config.batch_size = 50;
    config
}
