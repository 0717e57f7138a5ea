//! Raw RFC 822 bytes to `InboundMessage`.

use chrono::{DateTime, Utc};
use log::debug;
use mail_parser::{HeaderValue, Message, MessageParser, MimeHeaders, PartType};

use crate::message::{extract_email_address, InboundMessage, MessageHeaders};

use super::error::{EmailError, Result};

/// Forwarded messages nested deeper than this are not unpacked.
const MAX_NESTING: usize = 4;

/// Parses a fetched message.
///
/// The body is the first text part plus the bodies of forwarded
/// `message/rfc822` parts; attachment names include those of forwarded
/// messages, in order. `fallback_received_at` is used when the message has
/// no usable `Date` header.
pub fn parse_message(
    raw: &[u8],
    uid: u32,
    mailbox: &str,
    fallback_received_at: DateTime<Utc>,
) -> Result<InboundMessage> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| EmailError::ParseError(format!("UID {} is not a valid message", uid)))?;

    if message.headers().is_empty() {
        return Err(EmailError::ParseError(format!("UID {} has no headers", uid)));
    }

    let (sender_display, sender_email) = sender(&message);

    let received_at = message
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(fallback_received_at);

    let headers = MessageHeaders {
        message_id: message.message_id().map(|s| s.to_string()),
        in_reply_to: header_text(message.in_reply_to()),
        references: header_text(message.references()),
    };

    let mut bodies = Vec::new();
    let mut attachment_names = Vec::new();
    collect_parts(&message, 0, &mut bodies, &mut attachment_names);

    debug!(
        "Parsed UID {} with {} body part(s) and {} attachment(s)",
        uid,
        bodies.len(),
        attachment_names.len()
    );

    Ok(InboundMessage {
        id: uid,
        mailbox: mailbox.to_string(),
        subject: message.subject().unwrap_or_default().trim().to_string(),
        sender_display,
        sender_email,
        received_at,
        headers,
        body_text: bodies.join("\n"),
        attachment_names,
    })
}

/// Display form of the From header and the bare lowercased address.
fn sender(message: &Message) -> (String, String) {
    let Some(addr) = message.from().and_then(|a| a.first()) else {
        return (String::new(), String::new());
    };

    let address = addr.address().unwrap_or_default();
    let display = match addr.name() {
        Some(name) if !address.is_empty() => format!("{} <{}>", name, address),
        Some(name) => name.to_string(),
        None => address.to_string(),
    };
    let email = if address.contains('@') {
        address.trim().to_lowercase()
    } else {
        extract_email_address(&display).unwrap_or_default()
    };
    (display, email)
}

fn header_text(value: &HeaderValue) -> Option<String> {
    let text = match value {
        HeaderValue::Text(t) => t.to_string(),
        HeaderValue::TextList(list) => list.join(" "),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn collect_parts(
    message: &Message,
    depth: usize,
    bodies: &mut Vec<String>,
    attachment_names: &mut Vec<String>,
) {
    if let Some(text) = message.body_text(0) {
        let text = text.trim();
        if !text.is_empty() {
            bodies.push(text.to_string());
        }
    }

    for part in message.attachments() {
        match &part.body {
            PartType::Message(inner) => {
                if depth < MAX_NESTING {
                    collect_parts(inner, depth + 1, bodies, attachment_names);
                }
            }
            _ => {
                let name = part
                    .attachment_name()
                    .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")));
                if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
                    attachment_names.push(name.to_string());
                }
            }
        }
    }
}
