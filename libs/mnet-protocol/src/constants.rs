//! Protocol constants: delimiters, packet types, addresses and limits.

use std::time::Duration;

// ============================================================================
// Frame delimiters
// ============================================================================

/// Frame start byte
pub const SOH: u8 = 0x01;
/// Frame end byte
pub const EOT: u8 = 0x04;
/// The escaped byte: every 0xFF between the addresses and the CRC is doubled
pub const ESCAPE: u8 = 0xFF;

/// Maximum unescaped payload length (single-byte LEN field)
pub const MAX_PAYLOAD_LEN: usize = 255;
/// Leading noise tolerated before the first SOH of a frame
pub const MAX_LEADING_GARBAGE: usize = 512;

// ============================================================================
// Node addresses
// ============================================================================

/// Conventional host address
pub const HOST_ADDRESS: u8 = 0xFB;
/// Conventional turbine controller address
pub const TURBINE_ADDRESS: u8 = 0x01;

// ============================================================================
// Packet types (reply = request + 1 within every family)
// ============================================================================

pub const REQ_DATA: u16 = 0x0C28;
pub const REPLY_DATA: u16 = 0x0C29;
pub const REQ_MULTIPLE_DATA: u16 = 0x0C2A;
pub const REPLY_MULTIPLE_DATA: u16 = 0x0C2B;
pub const REQ_WRITE_DATA: u16 = 0x0C2C;
pub const REPLY_WRITE_DATA: u16 = 0x0C2D;
pub const REQ_SERIAL_NUMBER: u16 = 0x0C2E;
pub const REPLY_SERIAL_NUMBER: u16 = 0x0C2F;

pub const REQ_REMOTE_LOGIN: u16 = 0x138E;
pub const REQ_REMOTE_LOGOUT: u16 = 0x138F;
pub const REPLY_NOT_LOGGED_IN: u16 = 0x1390;

/// Alarm history chunk requests 1:4 .. 4:4; each reply is request + 1
pub const REQ_ALARM_DATA: [u16; 4] = [0x0BFB, 0x0BFD, 0x0BFF, 0x0C01];

pub const REQ_ACK_ALARM: u16 = 0x0BEA;
pub const REQ_ALARM_CODE: u16 = 0x0BEB;
pub const REPLY_ALARM_CODE: u16 = 0x0BEC;

/// Paired reply code for a request type
pub const fn reply_type(request: u16) -> u16 {
    request + 1
}

// ============================================================================
// Limits and policy defaults
// ============================================================================

/// Controller limit on items per multi-data request
pub const MAX_BATCH: usize = 17;
/// Events fetched per controller request when batching
pub const EVENT_CHUNK: usize = 4;
/// Event stack depth bound
pub const MAX_EVENTS: usize = 100;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_ALARM_RETRIES: u32 = 6;
pub const DEFAULT_PACKET_SEND_DELAY: Duration = Duration::from_millis(50);

/// Serial line settings for a direct connection: 38400 baud, 8N1
pub const SERIAL_BAUD_RATE: u32 = 38_400;

// ============================================================================
// Time
// ============================================================================

/// Protocol epoch 1980-01-01 00:00:00 UTC, as a Unix timestamp
pub const EPOCH_UNIX_SECONDS: i64 = 315_532_800;

/// "Never occurred" sentinel for alarm timestamps: 2032-05-09 00:00:00 UTC
/// in protocol epoch seconds
pub const ALARM_NEVER_SECONDS: u32 = 1_652_140_800;

// ============================================================================
// Login
// ============================================================================

/// Manufacturer code shipped with this crate (Gaia-branded WP3000 family)
pub const DEFAULT_MANUFACTURER_CODE: u8 = 131;
/// Session identifier embedded in the credential block
pub const LOGIN_SESSION_ID: u32 = 0x0000_007B;
/// 20-byte credential string for manufacturer code 131
pub const LOGIN_CREDENTIAL_131: &[u8; 20] =
    b"131 fkYu))12221QQaa\x00";
