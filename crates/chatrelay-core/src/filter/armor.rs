//! ASCII armor decoding for PGP messages

use super::openpgp::is_valid_openpgp_ciphertext;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const ARMOR_BEGIN: &str = "-----BEGIN PGP MESSAGE-----";
const ARMOR_END: &str = "-----END PGP MESSAGE-----";

/// `Key: value` line between the armor header and the blank line
fn is_armor_header(line: &str) -> bool {
    match line.split_once(": ") {
        Some((key, _)) => !key.is_empty() && !key.contains(char::is_whitespace),
        None => false,
    }
}

/// Decode an armored PGP message into its binary payload.
///
/// Outgoing mail must not have blank lines between the base64 body and the
/// footer; incoming mail may. Line breaks may be `\r\n` or `\n`, and any
/// number of them may follow the footer. The checksum line is dropped
/// without being verified.
pub fn decode_armored(text: &str, outgoing: bool) -> Option<Vec<u8>> {
    let mut lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    while lines.last() == Some(&"") {
        lines.pop();
    }

    let (first, rest) = lines.split_first()?;
    if *first != ARMOR_BEGIN {
        return None;
    }
    let (last, inner) = rest.split_last()?;
    if *last != ARMOR_END {
        return None;
    }

    let blank = inner.iter().position(|line| line.is_empty())?;
    if !inner[..blank].iter().all(|line| is_armor_header(line)) {
        return None;
    }
    let mut body = &inner[blank + 1..];

    let trailing_blank = body.iter().rev().take_while(|line| line.is_empty()).count();
    if outgoing && trailing_blank > 0 {
        return None;
    }
    body = &body[..body.len() - trailing_blank];

    if let Some((checksum, rest)) = body.split_last() {
        if checksum.starts_with('=') {
            body = rest;
        }
    }

    let encoded: String = body
        .iter()
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    if encoded.is_empty() {
        return None;
    }

    STANDARD.decode(encoded).ok()
}

/// Whether `text` is an armored, correctly framed encrypted message
pub fn is_valid_armored_payload(text: &str, outgoing: bool) -> bool {
    decode_armored(text, outgoing)
        .map(|payload| is_valid_openpgp_ciphertext(&payload))
        .unwrap_or(false)
}
