//! OpenPGP packet framing checks
//!
//! Only the packet structure is inspected: a run of session key packets
//! followed by exactly one integrity protected data packet that ends the
//! input. Nothing is decrypted.

/// Public-Key Encrypted Session Key packet
pub const TAG_PKESK: u8 = 1;
/// Symmetric-Key Encrypted Session Key packet
pub const TAG_SKESK: u8 = 3;
/// Symmetrically Encrypted and Integrity Protected Data packet
pub const TAG_SEIPD: u8 = 18;

/// Header of one packet in new format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketHeader {
    tag: u8,
    header_len: usize,
    body_len: usize,
}

/// Decode the packet header at the start of `input`.
///
/// Returns `None` for old format tags, partial body lengths and truncated
/// headers.
fn read_packet_header(input: &[u8]) -> Option<PacketHeader> {
    let first = *input.first()?;
    if first & 0xC0 != 0xC0 {
        return None;
    }
    let tag = first & 0x3F;

    let (header_len, body_len) = match *input.get(1)? {
        len @ 0..=191 => (2, len as usize),
        len @ 192..=223 => {
            let second = *input.get(2)? as usize;
            (3, ((len as usize - 192) << 8) + second + 192)
        }
        255 => {
            let bytes: [u8; 4] = input.get(2..6)?.try_into().ok()?;
            (6, u32::from_be_bytes(bytes) as usize)
        }
        // partial body length
        _ => return None,
    };

    Some(PacketHeader {
        tag,
        header_len,
        body_len,
    })
}

/// Whether `payload` is framed like an encrypted OpenPGP message
pub fn is_valid_openpgp_ciphertext(payload: &[u8]) -> bool {
    let mut offset = 0;

    while offset < payload.len() {
        let Some(header) = read_packet_header(&payload[offset..]) else {
            return false;
        };

        let end = match offset
            .checked_add(header.header_len)
            .and_then(|o| o.checked_add(header.body_len))
        {
            Some(end) if end <= payload.len() => end,
            _ => return false,
        };

        if end == payload.len() {
            return header.tag == TAG_SEIPD;
        }
        if header.tag != TAG_PKESK && header.tag != TAG_SKESK {
            return false;
        }
        offset = end;
    }

    false
}
