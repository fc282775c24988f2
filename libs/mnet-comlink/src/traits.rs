//! Core Communication Traits
//!
//! This module defines the byte-transport abstraction the protocol core is
//! written against, the tagged value union carried by decoded replies, and
//! the injectable logging sinks for wire traffic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;

use crate::bytes::hex_str;
use crate::error::Result;

// ============================================================================
// Byte Channel
// ============================================================================

/// A half-duplex byte pipe to the controller (serial line or TCP tunnel).
///
/// The protocol core owns the channel exclusively; it never interprets
/// packet boundaries here. Exactly three suspension points exist in the
/// whole stack: this trait's read and write, plus timer waits.
#[async_trait]
pub trait ByteChannel: Send {
    /// Read exactly `n` bytes, failing with `Timeout` once `deadline` passes.
    async fn read(&mut self, n: usize, deadline: Instant) -> Result<Vec<u8>>;

    /// Write all bytes; transport errors propagate unchanged.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Discard any buffered input left over from a previous exchange.
    async fn clear_input(&mut self) -> Result<()>;
}

// ============================================================================
// Value Type
// ============================================================================

/// Decoded result of a data-point reply.
///
/// Reply parsers are total over this union: every supported data type and
/// scaling lands in exactly one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Raw integer, no scaling applied
    Int32(i32),
    /// Scaled numeric
    Float64(f64),
    /// ASCII text, NUL padding stripped
    Text(String),
    /// Opaque bytes (display buffer, record blobs)
    Bytes(Vec<u8>),
    /// Seconds since 1980-01-01 00:00:00 UTC, decoded
    Timestamp(DateTime<Utc>),
    /// Controller status code pair
    StatusCodes([u16; 2]),
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl Value {
    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(i) => Some(f64::from(*i)),
            Self::Float64(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(i) => Some(i64::from(*i)),
            Self::Float64(f) => Some(f.round() as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow the text content, if any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Extract the timestamp, if any
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int32(i) => write!(f, "{}", i),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "[{}]", hex_str(b)),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S UTC")),
            Value::StatusCodes([a, b]) => write!(f, "{}/{}", a, b),
        }
    }
}

// ============================================================================
// Log Sinks
// ============================================================================

/// Direction of a wire-level transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Tx => write!(f, "TX"),
            Direction::Rx => write!(f, "RX"),
        }
    }
}

/// Callback receiving every frame as it crosses the wire
pub type WireSink = Arc<dyn Fn(Direction, &[u8]) + Send + Sync>;

/// Callback receiving protocol-event messages
pub type DebugSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Injectable observation hooks, side-effect only.
///
/// Both sinks are optional; `tracing` output happens regardless, so the
/// hooks never change behavior, only add visibility.
#[derive(Clone, Default)]
pub struct LogSinks {
    pub wire: Option<WireSink>,
    pub debug: Option<DebugSink>,
}

impl LogSinks {
    /// Log a raw frame in hex format
    pub fn log_wire(&self, direction: Direction, data: &[u8]) {
        tracing::trace!("[{}] {}", direction, hex_str(data));
        if let Some(sink) = &self.wire {
            sink(direction, data);
        }
    }

    /// Log a protocol event
    pub fn log_debug(&self, message: &str) {
        tracing::debug!("{}", message);
        if let Some(sink) = &self.debug {
            sink(message);
        }
    }
}

impl std::fmt::Debug for LogSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSinks")
            .field("wire", &self.wire.is_some())
            .field("debug", &self.debug.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
