//! M-net Communication Link Foundation
//!
//! Shared building blocks for the M-net protocol stack: the `ByteChannel`
//! transport abstraction, the `Value` union decoded replies resolve to, the
//! `MnetError` taxonomy, and wire-logging sinks. Protocol semantics live in
//! `mnet-protocol`; this crate knows nothing about frames or packet types.

pub mod bytes;
pub mod error;
pub mod traits;

pub use error::{MnetError, Result};
pub use traits::{ByteChannel, DebugSink, Direction, LogSinks, Value, WireSink};
