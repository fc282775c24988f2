//! In-memory channels for exercising the protocol stack without hardware.
//!
//! `ScriptedChannel` plays the controller side of the half-duplex exchange:
//! every write releases the next scripted reply (or deliberately nothing, to
//! simulate a dropped frame). Used by the unit and integration tests; kept
//! in-tree so downstream drivers can script their own sessions.

use async_trait::async_trait;
use std::collections::VecDeque;

use mnet_comlink::error::{MnetError, Result};
use mnet_comlink::ByteChannel;
use tokio::time::Instant;

use crate::frame;

/// One scripted controller reaction to a host frame.
#[derive(Debug, Clone)]
enum Reaction {
    /// Raw bytes placed in the inbound buffer (may include leading noise)
    Reply(Vec<u8>),
    /// Nothing arrives; the host read runs into its deadline
    Drop,
}

/// Deterministic stand-in for the turbine side of a `ByteChannel`.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    reactions: VecDeque<Reaction>,
    inbound: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    clears: usize,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes to arrive after the next host write.
    pub fn push_reply(&mut self, bytes: Vec<u8>) {
        self.reactions.push_back(Reaction::Reply(bytes));
    }

    /// Queue a built frame to arrive after the next host write.
    pub fn push_reply_frame(
        &mut self,
        destination: u8,
        source: u8,
        packet_type: u16,
        payload: &[u8],
    ) -> Result<()> {
        let wire = frame::build(destination, source, packet_type, payload)?;
        self.push_reply(wire);
        Ok(())
    }

    /// The next host write gets no reply at all.
    pub fn push_dropped_reply(&mut self) {
        self.reactions.push_back(Reaction::Drop);
    }

    /// Frames the host has written so far.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// How often the host cleared the input buffer.
    pub fn clear_count(&self) -> usize {
        self.clears
    }
}

#[async_trait]
impl ByteChannel for ScriptedChannel {
    async fn read(&mut self, n: usize, deadline: Instant) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.inbound.pop_front() {
                Some(b) => out.push(b),
                None => {
                    // nothing more scripted: behave like a silent line
                    tokio::time::sleep_until(deadline).await;
                    return Err(MnetError::timeout("scripted channel has no more data"));
                },
            }
        }
        Ok(out)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writes.push(bytes.to_vec());
        match self.reactions.pop_front() {
            Some(Reaction::Reply(reply)) => self.inbound.extend(reply),
            Some(Reaction::Drop) | None => {},
        }
        Ok(())
    }

    async fn clear_input(&mut self) -> Result<()> {
        self.clears += 1;
        self.inbound.clear();
        Ok(())
    }
}

/// Clonable wrapper around a [`ScriptedChannel`] so a test can keep
/// scripting replies and inspecting traffic after the channel has been
/// moved into a client.
#[derive(Clone, Default)]
pub struct SharedScriptedChannel(std::sync::Arc<tokio::sync::Mutex<ScriptedChannel>>);

impl SharedScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_reply(&self, bytes: Vec<u8>) {
        self.0.lock().await.push_reply(bytes);
    }

    pub async fn push_reply_frame(
        &self,
        destination: u8,
        source: u8,
        packet_type: u16,
        payload: &[u8],
    ) -> Result<()> {
        self.0
            .lock()
            .await
            .push_reply_frame(destination, source, packet_type, payload)
    }

    pub async fn push_dropped_reply(&self) {
        self.0.lock().await.push_dropped_reply();
    }

    pub async fn writes(&self) -> Vec<Vec<u8>> {
        self.0.lock().await.writes().to_vec()
    }

    pub async fn clear_count(&self) -> usize {
        self.0.lock().await.clear_count()
    }
}

#[async_trait]
impl ByteChannel for SharedScriptedChannel {
    async fn read(&mut self, n: usize, deadline: Instant) -> Result<Vec<u8>> {
        self.0.lock().await.read(n, deadline).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.0.lock().await.write(bytes).await
    }

    async fn clear_input(&mut self) -> Result<()> {
        self.0.lock().await.clear_input().await
    }
}

/// Channel whose every operation fails, for broken-transport paths.
#[derive(Debug, Default)]
pub struct DeadChannel;

#[async_trait]
impl ByteChannel for DeadChannel {
    async fn read(&mut self, _n: usize, _deadline: Instant) -> Result<Vec<u8>> {
        Err(MnetError::transport("connection lost"))
    }

    async fn write(&mut self, _bytes: &[u8]) -> Result<()> {
        Err(MnetError::transport("connection lost"))
    }

    async fn clear_input(&mut self) -> Result<()> {
        Err(MnetError::transport("connection lost"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_scripted_reply_released_by_write() {
        let mut channel = ScriptedChannel::new();
        channel.push_reply(vec![0xAA, 0xBB]);

        // nothing readable before the write
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(channel.read(1, deadline).await.is_err());

        channel.write(&[0x01]).await.unwrap();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(channel.read(2, deadline).await.unwrap(), vec![0xAA, 0xBB]);
        assert_eq!(channel.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards_inbound() {
        let mut channel = ScriptedChannel::new();
        channel.push_reply(vec![0x11, 0x22, 0x33]);
        channel.write(&[0x01]).await.unwrap();
        channel.clear_input().await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(channel.read(1, deadline).await.is_err());
        assert_eq!(channel.clear_count(), 1);
    }
}
