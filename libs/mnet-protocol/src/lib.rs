//! M-net client protocol core
//!
//! Wire-level codec and request/reply client for Mita-Teknik WP3000/IC1000
//! family wind turbine controllers, spoken over a byte-oriented serial link
//! (direct RS-232/RS-485 or a transparent TCP tunnel).
//!
//! Layering, bottom up:
//!
//! - [`crc`]: CRC-16/XMODEM over the unescaped frame body
//! - [`frame`]: SOH..EOT framing, 0xFF escaping, build/parse/read_one
//! - [`obfuscation`]: serial-seeded chained-XOR payload obfuscation
//! - [`transport`] / [`connection`]: frame pipe over a `ByteChannel`;
//!   TCP tunnel always, direct serial behind the `serial` feature
//! - [`codec`]: typed data-point encoding: scaling, averaging, timestamps
//! - [`records`]: event stack, alarm history, remote display
//! - [`client`]: session state machine and the high-level operation set
//!
//! The obfuscation layer obscures authentication and data-reply payloads;
//! it carries no secrecy claim.

pub mod client;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod crc;
pub mod frame;
pub mod obfuscation;
pub mod records;
pub mod testing;
pub mod transport;
pub mod types;

pub use client::{ClientConfig, MnetClient, SessionState};
pub use connection::TcpChannel;
#[cfg(feature = "serial")]
pub use connection::SerialChannel;
pub use frame::MnetFrame;
pub use records::{AlarmRecord, DisplayBuffer, EventRecord};
pub use types::{points, Averaging, Command, DataId, PointDescriptor, SerialNumber};

pub use mnet_comlink::{ByteChannel, Direction, LogSinks, MnetError, Result, Value};
