//! Byte-level helpers shared across the protocol stack.

use crate::error::{MnetError, Result};

/// Format bytes as uppercase spaced hex, e.g. `01 FB 0C 28`.
pub fn hex_str(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read a big-endian u16 at `offset`.
pub fn be_u16(data: &[u8], offset: usize) -> Result<u16> {
    match data.get(offset..offset + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(MnetError::protocol(format!(
            "short read: need u16 at offset {}, have {} bytes",
            offset,
            data.len()
        ))),
    }
}

/// Read a big-endian u32 at `offset`.
pub fn be_u32(data: &[u8], offset: usize) -> Result<u32> {
    match data.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(MnetError::protocol(format!(
            "short read: need u32 at offset {}, have {} bytes",
            offset,
            data.len()
        ))),
    }
}

/// Decode ASCII, dropping trailing NULs and whitespace.
pub fn ascii_trimmed(data: &[u8]) -> String {
    let text: String = data
        .iter()
        .map(|&b| {
            if b.is_ascii() && b != 0 {
                b as char
            } else {
                ' '
            }
        })
        .collect();
    text.trim_end().to_string()
}
