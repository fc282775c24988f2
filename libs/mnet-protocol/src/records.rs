//! Event, alarm and remote-display models.
//!
//! Wire layouts handled here:
//!
//! - event record raw (inside a type-0x08 value block):
//!   `code:u16 | timestamp:u32 | text`
//! - alarm code reply: `sub_id:u16 | last_occurred:u32 | description`
//! - alarm history chunk reply: `count:u8 |` then per record
//!   `sub_id:u16 | last_occurred:u32 | desc_len:u8 | desc[desc_len]`
//! - remote display: 138 raw bytes, viewed as 18-character rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mnet_comlink::bytes::{ascii_trimmed, be_u16, be_u32};
use mnet_comlink::error::{MnetError, Result};

use crate::codec::{decode_timestamp, encode_timestamp};
use crate::constants::ALARM_NEVER_SECONDS;

// ============================================================================
// Events
// ============================================================================

/// One entry of the controller's event stack. Index 0 is the most recent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub index: u8,
    pub code: u16,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl EventRecord {
    /// Parse the raw record bytes of an event-stack reply.
    pub fn parse(index: u8, raw: &[u8]) -> Result<Self> {
        if raw.len() < 6 {
            return Err(MnetError::protocol(format!(
                "event record needs at least 6 bytes, have {}",
                raw.len()
            )));
        }
        Ok(EventRecord {
            index,
            code: be_u16(raw, 0)?,
            timestamp: decode_timestamp(be_u32(raw, 2)?),
            text: ascii_trimmed(&raw[6..]),
        })
    }

    /// Assemble the raw record bytes (reply side; simulator/test use).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(6 + self.text.len());
        out.extend_from_slice(&self.code.to_be_bytes());
        out.extend_from_slice(&encode_timestamp(self.timestamp)?.to_be_bytes());
        out.extend_from_slice(self.text.as_bytes());
        Ok(out)
    }
}

impl std::fmt::Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} [{}] {} {}",
            self.index,
            self.code,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.text
        )
    }
}

// ============================================================================
// Alarms
// ============================================================================

/// Alarm history entry. `last_occurred` equal to the 2032-05-09 sentinel
/// means the alarm never fired; `has_occurred` is derived accordingly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub sub_id: u16,
    pub last_occurred: DateTime<Utc>,
    pub description: String,
    pub has_occurred: bool,
}

impl AlarmRecord {
    pub fn from_wire(sub_id: u16, seconds: u32, description: String) -> Self {
        AlarmRecord {
            sub_id,
            last_occurred: decode_timestamp(seconds),
            description,
            has_occurred: seconds != ALARM_NEVER_SECONDS,
        }
    }
}

impl std::fmt::Display for AlarmRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_occurred {
            write!(
                f,
                "{} {} (last {})",
                self.sub_id,
                self.description,
                self.last_occurred.format("%Y-%m-%d %H:%M:%S")
            )
        } else {
            write!(f, "{} {} (never)", self.sub_id, self.description)
        }
    }
}

/// Raw record of an alarm history chunk before description-cache joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmWireRecord {
    pub sub_id: u16,
    pub seconds: u32,
    pub description: Option<String>,
}

/// Parse a single-alarm code reply.
pub fn parse_alarm_code_reply(payload: &[u8]) -> Result<AlarmRecord> {
    if payload.len() < 6 {
        return Err(MnetError::protocol(format!(
            "alarm reply needs at least 6 bytes, have {}",
            payload.len()
        )));
    }
    Ok(AlarmRecord::from_wire(
        be_u16(payload, 0)?,
        be_u32(payload, 2)?,
        ascii_trimmed(&payload[6..]),
    ))
}

/// Parse one alarm history chunk reply.
pub fn parse_alarm_history_chunk(payload: &[u8]) -> Result<Vec<AlarmWireRecord>> {
    if payload.is_empty() {
        return Err(MnetError::protocol("empty alarm history chunk"));
    }
    let count = payload[0] as usize;
    let mut records = Vec::with_capacity(count);
    let mut pos = 1usize;
    for i in 0..count {
        let sub_id = be_u16(payload, pos)?;
        let seconds = be_u32(payload, pos + 2)?;
        let desc_len = *payload.get(pos + 6).ok_or_else(|| {
            MnetError::protocol(format!("alarm record {i} truncated before desc_len"))
        })? as usize;
        let desc_end = pos + 7 + desc_len;
        let desc = payload.get(pos + 7..desc_end).ok_or_else(|| {
            MnetError::protocol(format!("alarm record {i} truncated inside description"))
        })?;
        records.push(AlarmWireRecord {
            sub_id,
            seconds,
            description: if desc_len == 0 {
                None
            } else {
                Some(ascii_trimmed(desc))
            },
        });
        pos = desc_end;
    }
    if pos != payload.len() {
        return Err(MnetError::protocol(format!(
            "{} trailing bytes after alarm chunk",
            payload.len() - pos
        )));
    }
    Ok(records)
}

/// Assemble an alarm history chunk reply (reply side; simulator/test use).
pub fn encode_alarm_history_chunk(records: &[AlarmWireRecord]) -> Vec<u8> {
    let mut out = vec![records.len() as u8];
    for record in records {
        out.extend_from_slice(&record.sub_id.to_be_bytes());
        out.extend_from_slice(&record.seconds.to_be_bytes());
        match &record.description {
            Some(desc) => {
                out.push(desc.len() as u8);
                out.extend_from_slice(desc.as_bytes());
            },
            None => out.push(0),
        }
    }
    out
}

// ============================================================================
// Remote display
// ============================================================================

/// Raw size of the controller's remote display buffer
pub const DISPLAY_BUFFER_LEN: usize = 138;
/// Characters per rendered display row
pub const DISPLAY_LINE_WIDTH: usize = 18;

/// Snapshot of the controller's LCD contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBuffer(pub [u8; DISPLAY_BUFFER_LEN]);

impl DisplayBuffer {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; DISPLAY_BUFFER_LEN] = bytes.try_into().map_err(|_| {
            MnetError::protocol(format!(
                "display reply carries {} bytes, expected {DISPLAY_BUFFER_LEN}",
                bytes.len()
            ))
        })?;
        Ok(DisplayBuffer(raw))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Text view: successive 18-character rows, trailing padding stripped,
    /// trailing blank rows dropped.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .0
            .chunks(DISPLAY_LINE_WIDTH)
            .map(ascii_trimmed)
            .collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_record_round_trip() {
        let event = EventRecord {
            index: 0,
            code: 412,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 16, 18, 20, 13).unwrap(),
            text: "Grid dropout".to_string(),
        };
        let raw = event.encode().unwrap();
        assert_eq!(EventRecord::parse(0, &raw).unwrap(), event);
    }

    #[test]
    fn test_event_record_trims_padding() {
        let mut raw = vec![0x01, 0x9C];
        raw.extend_from_slice(&0x0000_0E10u32.to_be_bytes());
        raw.extend_from_slice(b"Manual stop\x00\x00\x00");
        let event = EventRecord::parse(3, &raw).unwrap();
        assert_eq!(event.index, 3);
        assert_eq!(event.code, 0x019C);
        assert_eq!(event.text, "Manual stop");
    }

    #[test]
    fn test_event_record_too_short() {
        assert!(EventRecord::parse(0, &[0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_alarm_code_reply() {
        let mut payload = 77u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&1_000_000u32.to_be_bytes());
        payload.extend_from_slice(b"Gearbox oil temp\x00");
        let alarm = parse_alarm_code_reply(&payload).unwrap();
        assert_eq!(alarm.sub_id, 77);
        assert_eq!(alarm.description, "Gearbox oil temp");
        assert!(alarm.has_occurred);
        assert_eq!(alarm.last_occurred, decode_timestamp(1_000_000));
    }

    #[test]
    fn test_alarm_never_sentinel() {
        let alarm = AlarmRecord::from_wire(5, ALARM_NEVER_SECONDS, "Vibration".to_string());
        assert!(!alarm.has_occurred);
        assert_eq!(
            alarm.last_occurred,
            Utc.with_ymd_and_hms(2032, 5, 9, 0, 0, 0).unwrap()
        );
        assert_eq!(alarm.to_string(), "5 Vibration (never)");
    }

    #[test]
    fn test_alarm_history_chunk_round_trip() {
        let records = vec![
            AlarmWireRecord {
                sub_id: 1,
                seconds: 500,
                description: Some("Overspeed".to_string()),
            },
            AlarmWireRecord {
                sub_id: 2,
                seconds: ALARM_NEVER_SECONDS,
                description: Some("Grid loss".to_string()),
            },
        ];
        let payload = encode_alarm_history_chunk(&records);
        assert_eq!(parse_alarm_history_chunk(&payload).unwrap(), records);

        // timestamps-only form
        let bare = vec![AlarmWireRecord {
            sub_id: 1,
            seconds: 500,
            description: None,
        }];
        let payload = encode_alarm_history_chunk(&bare);
        assert_eq!(parse_alarm_history_chunk(&payload).unwrap(), bare);
    }

    #[test]
    fn test_alarm_history_chunk_truncation() {
        let payload = encode_alarm_history_chunk(&[AlarmWireRecord {
            sub_id: 9,
            seconds: 100,
            description: Some("Pitch fault".to_string()),
        }]);
        assert!(parse_alarm_history_chunk(&payload[..payload.len() - 3]).is_err());
        assert!(parse_alarm_history_chunk(&[]).is_err());
    }

    #[test]
    fn test_display_lines() {
        let mut raw = [b' '; DISPLAY_BUFFER_LEN];
        raw[..18].copy_from_slice(b"  WP3000 STATUS   ");
        raw[18..36].copy_from_slice(b"Wind   12.3 m/s   ");
        raw[36..54].copy_from_slice(b"Power  2800 W     ");
        let display = DisplayBuffer(raw);

        let lines = display.lines();
        assert_eq!(
            lines,
            vec![
                "  WP3000 STATUS".to_string(),
                "Wind   12.3 m/s".to_string(),
                "Power  2800 W".to_string(),
            ]
        );
    }

    #[test]
    fn test_display_size_check() {
        assert!(DisplayBuffer::from_bytes(&[0u8; 138]).is_ok());
        assert!(DisplayBuffer::from_bytes(&[0u8; 137]).is_err());
        assert!(DisplayBuffer::from_bytes(&[0u8; 139]).is_err());
    }
}
