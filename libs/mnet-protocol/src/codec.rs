//! Data-point codec
//!
//! Maps between application-level values and wire payloads: request item
//! encoding, reply value-block decoding with numeric scaling, multi-data
//! assembly/validation, write payloads and timestamp epoch conversion.
//!
//! A reply value block is
//!
//! ```text
//! data_type:u8 | scaling:u8 | scale_arg:u16 | raw_len:u8 | raw[raw_len]
//! ```
//!
//! and multi-data replies repeat `main:u16 | sub:u16 | value-block` after a
//! leading count byte.

use chrono::{DateTime, Utc};

use mnet_comlink::bytes::{ascii_trimmed, be_u16, be_u32};
use mnet_comlink::error::{MnetError, Result};
use mnet_comlink::Value;

use crate::constants::{ALARM_NEVER_SECONDS, EPOCH_UNIX_SECONDS, MAX_BATCH};
use crate::types::{descriptor, DataId, PointKind};

// ============================================================================
// Wire codes
// ============================================================================

/// Error reply marker; scale_arg carries the controller error code
pub const DT_ERROR: u8 = 0x00;
pub const DT_I8: u8 = 0x01;
pub const DT_I8_ALT: u8 = 0x02;
pub const DT_I16: u8 = 0x03;
pub const DT_U16: u8 = 0x04;
pub const DT_I32: u8 = 0x05;
pub const DT_U32: u8 = 0x06;
pub const DT_TIMESTAMP: u8 = 0x07;
pub const DT_RECORD: u8 = 0x08;
pub const DT_TEXT: u8 = 0x09;
pub const DT_I8_FLAG: u8 = 0x0A;

pub const SC_NONE: u8 = 0x00;
pub const SC_DIV_POW10: u8 = 0x01;
pub const SC_DIV: u8 = 0x02;
pub const SC_MUL: u8 = 0x03;
pub const SC_MUL_POW10: u8 = 0x04;
/// Legacy alias of [`SC_DIV_POW10`]; on-wire behavior is identical
pub const SC_DIV_POW10_ALT: u8 = 0x05;

/// Controller error code meaning the averaging window is not valid for the
/// requested point
pub const ERR_CODE_BAD_AVERAGING: u16 = 0x0001;

// ============================================================================
// Timestamps
// ============================================================================

/// Protocol epoch: 1980-01-01 00:00:00 UTC.
pub fn epoch() -> DateTime<Utc> {
    // EPOCH_UNIX_SECONDS is in range for chrono by construction
    DateTime::from_timestamp(EPOCH_UNIX_SECONDS, 0).unwrap_or_default()
}

/// Decode protocol-epoch seconds to UTC.
pub fn decode_timestamp(seconds: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(EPOCH_UNIX_SECONDS + i64::from(seconds), 0).unwrap_or_default()
}

/// Encode a UTC instant as protocol-epoch seconds.
pub fn encode_timestamp(t: DateTime<Utc>) -> Result<u32> {
    let seconds = t.timestamp() - EPOCH_UNIX_SECONDS;
    u32::try_from(seconds).map_err(|_| {
        MnetError::config(format!("timestamp {t} outside the 1980-epoch u32 range"))
    })
}

/// The "never occurred" alarm sentinel as a UTC instant.
pub fn alarm_never() -> DateTime<Utc> {
    decode_timestamp(ALARM_NEVER_SECONDS)
}

// ============================================================================
// Value blocks
// ============================================================================

/// Borrowed view of one reply value block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueBlock<'a> {
    pub data_type: u8,
    pub scaling: u8,
    pub scale_arg: u16,
    pub raw: &'a [u8],
}

impl<'a> ValueBlock<'a> {
    /// Parse a block from the front of `data`, returning it and the number
    /// of bytes consumed.
    pub fn parse(data: &'a [u8]) -> Result<(Self, usize)> {
        if data.len() < 5 {
            return Err(MnetError::protocol(format!(
                "value block header needs 5 bytes, have {}",
                data.len()
            )));
        }
        let raw_len = data[4] as usize;
        let total = 5 + raw_len;
        if data.len() < total {
            return Err(MnetError::protocol(format!(
                "value block declares {} raw bytes, only {} present",
                raw_len,
                data.len() - 5
            )));
        }
        Ok((
            ValueBlock {
                data_type: data[0],
                scaling: data[1],
                scale_arg: be_u16(data, 2)?,
                raw: &data[5..total],
            },
            total,
        ))
    }
}

/// Assemble a value block (reply side; used by controller simulators and the
/// loopback tests).
pub fn encode_value_block(data_type: u8, scaling: u8, scale_arg: u16, raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + raw.len());
    out.push(data_type);
    out.push(scaling);
    out.extend_from_slice(&scale_arg.to_be_bytes());
    out.push(raw.len() as u8);
    out.extend_from_slice(raw);
    out
}

fn raw_integer(data_type: u8, raw: &[u8]) -> Result<i64> {
    match data_type {
        DT_I8 | DT_I8_ALT | DT_I8_FLAG => match raw.first() {
            Some(&b) => Ok(i64::from(b as i8)),
            None => Err(MnetError::protocol("empty raw data for i8 value")),
        },
        DT_I16 => Ok(i64::from(be_u16(raw, 0)? as i16)),
        DT_U16 => Ok(i64::from(be_u16(raw, 0)?)),
        DT_I32 => Ok(i64::from(be_u32(raw, 0)? as i32)),
        DT_U32 | DT_TIMESTAMP => Ok(i64::from(be_u32(raw, 0)?)),
        other => Err(MnetError::protocol(format!(
            "unknown data type 0x{other:02X}"
        ))),
    }
}

fn apply_scaling(raw: i64, scaling: u8, scale_arg: u16) -> Result<Value> {
    let value = match scaling {
        SC_NONE => return Ok(Value::Int32(raw as i32)),
        SC_DIV_POW10 | SC_DIV_POW10_ALT => raw as f64 / 10f64.powi(i32::from(scale_arg)),
        SC_DIV => {
            if scale_arg == 0 {
                raw as f64
            } else {
                raw as f64 / f64::from(scale_arg)
            }
        },
        SC_MUL => {
            if scale_arg == 0 {
                raw as f64
            } else {
                raw as f64 * f64::from(scale_arg)
            }
        },
        SC_MUL_POW10 => raw as f64 * 10f64.powi(i32::from(scale_arg)),
        other => {
            return Err(MnetError::protocol(format!(
                "unknown scaling opcode 0x{other:02X}"
            )));
        },
    };
    Ok(Value::Float64(value))
}

/// Decode a value block into a typed value, dispatching on the requested
/// point where its family overrides the generic layout.
pub fn decode_value(block: &ValueBlock<'_>, id: Option<DataId>) -> Result<Value> {
    if block.data_type == DT_ERROR {
        return match block.scale_arg {
            ERR_CODE_BAD_AVERAGING => Err(MnetError::UnsupportedAveraging(match id {
                Some(id) => format!("controller rejected averaging for {id}"),
                None => "controller rejected averaging".to_string(),
            })),
            code => Err(MnetError::protocol(format!(
                "controller error reply, code {code}"
            ))),
        };
    }

    let kind = id.and_then(descriptor).map(|p| p.kind);
    match kind {
        Some(PointKind::GridPower) => {
            // PowerW special case: raw in 100 W units, reported as watts
            let raw = raw_integer(block.data_type, block.raw)?;
            return Ok(Value::Float64(raw as f64 * 100.0));
        },
        Some(PointKind::StatusPair) => {
            let primary = be_u16(block.raw, 0)?;
            let secondary = be_u16(block.raw, 2)?;
            return Ok(Value::StatusCodes([primary, secondary]));
        },
        _ => {},
    }

    match block.data_type {
        DT_TIMESTAMP => Ok(Value::Timestamp(decode_timestamp(be_u32(block.raw, 0)?))),
        DT_TEXT => Ok(Value::Text(ascii_trimmed(block.raw))),
        DT_RECORD => Ok(Value::Bytes(block.raw.to_vec())),
        _ => {
            let raw = raw_integer(block.data_type, block.raw)?;
            apply_scaling(raw, block.scaling, block.scale_arg)
        },
    }
}

// ============================================================================
// Request payloads
// ============================================================================

/// Single-data request payload: one wire item.
pub fn encode_single_request(id: DataId, sub: u16) -> Vec<u8> {
    id.wire_item(sub).to_vec()
}

/// Multi-data request payload: `count || item × count`.
pub fn encode_multi_request(items: &[(DataId, u16)]) -> Result<Vec<u8>> {
    if items.is_empty() {
        return Err(MnetError::config("empty multi-data request"));
    }
    if items.len() > MAX_BATCH {
        return Err(MnetError::config(format!(
            "{} items exceed the controller batch limit of {MAX_BATCH}",
            items.len()
        )));
    }
    let mut out = Vec::with_capacity(1 + items.len() * 4);
    out.push(items.len() as u8);
    for (id, sub) in items {
        out.extend_from_slice(&id.wire_item(*sub));
    }
    Ok(out)
}

/// Write-data request payload: `(item || value:u32) × count`.
pub fn encode_write_request(writes: &[(DataId, u16, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(writes.len() * 8);
    for (id, sub, value) in writes {
        out.extend_from_slice(&id.wire_item(*sub));
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

// ============================================================================
// Reply payloads
// ============================================================================

/// Decode a single-data reply payload (one value block, nothing trailing).
pub fn decode_single_reply(payload: &[u8], id: DataId) -> Result<Value> {
    let (block, consumed) = ValueBlock::parse(payload)?;
    if consumed != payload.len() {
        return Err(MnetError::protocol(format!(
            "{} trailing bytes after value block",
            payload.len() - consumed
        )));
    }
    decode_value(&block, Some(id))
}

/// Decode a multi-data reply against the items that were requested.
///
/// The controller must answer every item, in request order, echoing the
/// main/sub words; anything else is a protocol violation.
pub fn decode_multi_reply(payload: &[u8], expected: &[(DataId, u16)]) -> Result<Vec<Value>> {
    if payload.is_empty() {
        return Err(MnetError::protocol("empty multi-data reply"));
    }
    let count = payload[0] as usize;
    if count != expected.len() {
        return Err(MnetError::protocol(format!(
            "multi-data reply carries {count} values, {} requested",
            expected.len()
        )));
    }

    let mut values = Vec::with_capacity(count);
    let mut pos = 1usize;
    for (i, (id, sub)) in expected.iter().enumerate() {
        let main = be_u16(payload, pos)?;
        let echoed_sub = be_u16(payload, pos + 2)?;
        if main != id.0 || echoed_sub != *sub {
            return Err(MnetError::protocol(format!(
                "multi-data item {i} answers 0x{main:04X}/{echoed_sub}, requested {id}/{sub}"
            )));
        }
        let (block, consumed) = ValueBlock::parse(&payload[pos + 4..])?;
        values.push(decode_value(&block, Some(*id))?);
        pos += 4 + consumed;
    }

    if pos != payload.len() {
        return Err(MnetError::protocol(format!(
            "{} trailing bytes after multi-data reply",
            payload.len() - pos
        )));
    }
    Ok(values)
}

/// Assemble a multi-data reply payload (reply side; simulator/test use).
pub fn encode_multi_reply(items: &[(DataId, u16, Vec<u8>)]) -> Vec<u8> {
    let mut out = vec![items.len() as u8];
    for (id, sub, block) in items {
        out.extend_from_slice(&id.wire_item(*sub));
        out.extend_from_slice(block);
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
