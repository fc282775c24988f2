//! M-net frame codec
//!
//! Wire layout:
//!
//! ```text
//! SOH | DST | SRC | TYPE_HI | TYPE_LO | LEN | PAYLOAD[LEN] | CRC_HI | CRC_LO | EOT
//! ```
//!
//! `LEN` counts unescaped payload bytes and the CRC covers the unescaped
//! `DST..PAYLOAD` span. After the CRC is attached, every 0xFF between the
//! addresses and the end of the CRC is doubled on the wire; receivers
//! collapse the pairs before any interpretation.

use mnet_comlink::bytes::hex_str;
use mnet_comlink::error::{MnetError, Result};
use mnet_comlink::ByteChannel;
use tokio::time::Instant;

use crate::constants::{EOT, ESCAPE, MAX_LEADING_GARBAGE, MAX_PAYLOAD_LEN, SOH};
use crate::crc::crc16;

/// A parsed frame as a plain value: building and parsing are free functions
/// over this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MnetFrame {
    pub destination: u8,
    pub source: u8,
    pub packet_type: u16,
    pub payload: Vec<u8>,
}

impl std::fmt::Display for MnetFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dst:0x{:02X} src:0x{:02X} type:0x{:04X} len:{} data:[{}]",
            self.destination,
            self.source,
            self.packet_type,
            self.payload.len(),
            hex_str(&self.payload)
        )
    }
}

// ============================================================================
// Escaping
// ============================================================================

/// Double every 0xFF for transmission.
pub fn quote(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPE);
        }
    }
    out
}

/// Collapse doubled 0xFF pairs. A lone 0xFF is a framing violation.
pub fn dequote(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            match iter.next() {
                Some(&e) if e == ESCAPE => out.push(ESCAPE),
                _ => {
                    return Err(MnetError::bad_framing("unpaired 0xFF escape"));
                },
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

// ============================================================================
// Build / parse
// ============================================================================

/// Construct the full on-wire frame for a packet.
pub fn build(destination: u8, source: u8, packet_type: u16, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(MnetError::FrameTooLarge(payload.len()));
    }

    let mut body = Vec::with_capacity(5 + payload.len());
    body.push(destination);
    body.push(source);
    body.extend_from_slice(&packet_type.to_be_bytes());
    body.push(payload.len() as u8);
    body.extend_from_slice(payload);

    let crc = crc16(&body);
    body.extend_from_slice(&crc.to_be_bytes());

    let mut wire = Vec::with_capacity(body.len() + 2);
    wire.push(SOH);
    wire.extend_from_slice(&quote(&body));
    wire.push(EOT);
    Ok(wire)
}

/// Strictly validate a raw frame and extract its fields.
pub fn parse(raw: &[u8]) -> Result<MnetFrame> {
    if raw.len() < 2 || raw[0] != SOH {
        return Err(MnetError::bad_framing("missing SOH"));
    }
    if raw[raw.len() - 1] != EOT {
        return Err(MnetError::bad_framing("missing EOT"));
    }

    let body = dequote(&raw[1..raw.len() - 1])?;
    // dst + src + type(2) + len + crc(2)
    if body.len() < 7 {
        return Err(MnetError::bad_framing(format!(
            "truncated frame: {} bytes after dequote",
            body.len()
        )));
    }

    let declared = body[4] as usize;
    let actual = body.len() - 7;
    if declared != actual {
        return Err(MnetError::BadLength { declared, actual });
    }

    let crc_offset = body.len() - 2;
    let found = u16::from_be_bytes([body[crc_offset], body[crc_offset + 1]]);
    let expected = crc16(&body[..crc_offset]);
    if found != expected {
        return Err(MnetError::BadCrc { expected, found });
    }

    Ok(MnetFrame {
        destination: body[0],
        source: body[1],
        packet_type: u16::from_be_bytes([body[2], body[3]]),
        payload: body[5..crc_offset].to_vec(),
    })
}

// ============================================================================
// Stream reading
// ============================================================================

async fn read_byte(channel: &mut dyn ByteChannel, deadline: Instant) -> Result<u8> {
    let bytes = channel.read(1, deadline).await?;
    bytes
        .first()
        .copied()
        .ok_or_else(|| MnetError::transport("channel returned no data"))
}

/// Read one logical byte, collapsing escape pairs, accumulating raw bytes.
async fn read_unescaped(
    channel: &mut dyn ByteChannel,
    deadline: Instant,
    raw: &mut Vec<u8>,
) -> Result<u8> {
    let b = read_byte(channel, deadline).await?;
    raw.push(b);
    if b == ESCAPE {
        let pair = read_byte(channel, deadline).await?;
        raw.push(pair);
        if pair != ESCAPE {
            return Err(MnetError::bad_framing("unpaired 0xFF escape on wire"));
        }
    }
    Ok(b)
}

/// Read the next complete frame from the channel, returning the raw bytes.
///
/// Leading noise up to the first SOH is discarded (a just-powered line emits
/// garbage). The LEN field drives the read, so payload bytes equal to SOH or
/// EOT never confuse the receiver.
pub async fn read_one(channel: &mut dyn ByteChannel, deadline: Instant) -> Result<Vec<u8>> {
    let mut skipped = 0usize;
    loop {
        let b = read_byte(channel, deadline).await?;
        if b == SOH {
            break;
        }
        skipped += 1;
        if skipped > MAX_LEADING_GARBAGE {
            return Err(MnetError::bad_framing(format!(
                "no SOH within {} bytes of noise",
                MAX_LEADING_GARBAGE
            )));
        }
    }
    if skipped > 0 {
        tracing::trace!("skipped {} noise bytes before SOH", skipped);
    }

    let mut raw = vec![SOH];

    // dst, src, type, len
    let mut header = [0u8; 5];
    for slot in header.iter_mut() {
        *slot = read_unescaped(channel, deadline, &mut raw).await?;
    }

    let payload_len = header[4] as usize;
    for _ in 0..payload_len + 2 {
        read_unescaped(channel, deadline, &mut raw).await?;
    }

    let tail = read_byte(channel, deadline).await?;
    raw.push(tail);
    if tail != EOT {
        return Err(MnetError::bad_framing("missing EOT after frame body"));
    }

    Ok(raw)
}

// ============================================================================
// Tests
// ============================================================================
