//! MIME view of a message and the shape checks run on it
//!
//! `ParsedMessage` holds just what the policy needs. The predicates below
//! are pure functions over it.

use super::armor::is_valid_armored_payload;
use mail_parser::{HeaderValue, MessageParser, MessagePart, MimeHeaders, PartType};

/// One direct child of a multipart message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    /// Lowercased `type/subtype`
    pub content_type: String,
    /// Decoded body
    pub body: Vec<u8>,
    pub is_multipart: bool,
}

/// The parts of a message the filters look at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    /// Lowercased `type/subtype` of the top-level entity
    pub content_type: String,
    pub is_multipart: bool,
    /// Direct children of the top-level entity, empty unless multipart
    pub parts: Vec<MimePart>,
    /// Address of the first `From` mailbox
    pub from: Option<String>,
    pub subject: Option<String>,
    pub auto_submitted: Option<String>,
    pub secure_join: Option<String>,
}

fn content_type_of(part: &MessagePart<'_>) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(subtype) => format!("{}/{}", ct.ctype(), subtype).to_ascii_lowercase(),
            None => ct.ctype().to_ascii_lowercase(),
        },
        None => "text/plain".to_string(),
    }
}

impl ParsedMessage {
    /// Parse raw message octets; unparsable input yields an empty message
    pub fn parse(data: &[u8]) -> Self {
        let Some(message) = MessageParser::default().parse(data) else {
            return Self {
                content_type: "text/plain".to_string(),
                ..Default::default()
            };
        };

        // first occurrence wins for repeated headers
        let first_header = |name: &str| {
            message
                .headers()
                .iter()
                .find(|h| h.name().eq_ignore_ascii_case(name))
        };
        let header = |name: &str| {
            first_header(name).map(|h| h.value().as_text().unwrap_or_default().trim().to_string())
        };
        let from = first_header("From").and_then(|h| match h.value() {
            HeaderValue::Address(address) => address.first().and_then(|a| a.address()).map(str::to_string),
            _ => None,
        });

        let (content_type, is_multipart, parts) = match message.parts.first() {
            Some(root) => {
                let (is_multipart, parts) = match &root.body {
                    PartType::Multipart(ids) => (
                        true,
                        ids.iter()
                            .filter_map(|id| message.parts.get(*id))
                            .map(|part| MimePart {
                                content_type: content_type_of(part),
                                body: part.contents().to_vec(),
                                is_multipart: matches!(part.body, PartType::Multipart(_)),
                            })
                            .collect(),
                    ),
                    _ => (false, Vec::new()),
                };
                (content_type_of(root), is_multipart, parts)
            }
            None => ("text/plain".to_string(), false, Vec::new()),
        };

        Self {
            content_type,
            is_multipart,
            parts,
            from,
            subject: header("Subject"),
            auto_submitted: header("Auto-Submitted"),
            secure_join: header("Secure-Join"),
        }
    }
}

/// PGP/MIME message (RFC 3156) carrying a correctly framed payload
pub fn is_openpgp_encrypted(message: &ParsedMessage, outgoing: bool) -> bool {
    if !message.is_multipart || message.content_type != "multipart/encrypted" {
        return false;
    }
    let [version, payload] = message.parts.as_slice() else {
        return false;
    };
    if version.is_multipart || payload.is_multipart {
        return false;
    }

    if version.content_type != "application/pgp-encrypted"
        || String::from_utf8_lossy(&version.body).trim() != "Version: 1"
    {
        return false;
    }

    if payload.content_type != "application/octet-stream" {
        return false;
    }
    match std::str::from_utf8(&payload.body) {
        Ok(text) => is_valid_armored_payload(text, outgoing),
        Err(_) => false,
    }
}

/// First message of a verified contact or group join
pub fn is_secure_join_handshake(message: &ParsedMessage) -> bool {
    let step = match message.secure_join.as_deref() {
        Some(step @ ("vc-request" | "vg-request")) => step,
        _ => return false,
    };
    if !message.is_multipart {
        return false;
    }
    let [part] = message.parts.as_slice() else {
        return false;
    };
    if part.is_multipart || part.content_type != "text/plain" {
        return false;
    }

    let body = String::from_utf8_lossy(&part.body).trim().to_lowercase();
    body == format!("secure-join: {step}")
}

/// Delivery status notification from a mailer daemon
pub fn is_cleartext_bounce(message: &ParsedMessage) -> bool {
    if message.auto_submitted.is_none() || message.content_type != "multipart/report" {
        return false;
    }
    message
        .from
        .as_deref()
        .and_then(|from| from.split_once('@'))
        .map(|(local, _)| local.eq_ignore_ascii_case("mailer-daemon"))
        .unwrap_or(false)
}
