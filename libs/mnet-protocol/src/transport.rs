//! Channel driver: a frame pipe over a `ByteChannel`.
//!
//! The driver sends and receives whole frames and clears stale input; it
//! never interprets packet types. Session logic sits above in the client.

use mnet_comlink::error::Result;
use mnet_comlink::{ByteChannel, Direction, LogSinks};
use tokio::time::Instant;

use crate::frame::{self, MnetFrame};

/// Thin state over a byte channel: one frame in, one frame out.
pub struct ChannelDriver {
    channel: Box<dyn ByteChannel>,
    sinks: LogSinks,
}

impl ChannelDriver {
    pub fn new(channel: Box<dyn ByteChannel>, sinks: LogSinks) -> Self {
        Self { channel, sinks }
    }

    /// Write a built frame to the channel.
    pub async fn send_frame(&mut self, wire: &[u8]) -> Result<()> {
        self.sinks.log_wire(Direction::Tx, wire);
        self.channel.write(wire).await
    }

    /// Read and validate the next frame, honoring `deadline`.
    pub async fn receive_frame(&mut self, deadline: Instant) -> Result<MnetFrame> {
        let raw = frame::read_one(self.channel.as_mut(), deadline).await?;
        self.sinks.log_wire(Direction::Rx, &raw);
        frame::parse(&raw)
    }

    /// Discard buffered input, recovering from garbage a previous timeout
    /// left on the line.
    pub async fn clear(&mut self) -> Result<()> {
        self.channel.clear_input().await
    }

    /// Swap in a freshly connected channel after a transport failure.
    pub fn replace_channel(&mut self, channel: Box<dyn ByteChannel>) {
        self.channel = channel;
    }

    pub fn sinks(&self) -> &LogSinks {
        &self.sinks
    }
}

impl std::fmt::Debug for ChannelDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDriver")
            .field("sinks", &self.sinks)
            .finish()
    }
}
