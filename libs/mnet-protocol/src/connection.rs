//! Concrete byte channels: TCP tunnel and direct serial line.
//!
//! Both are plain `ByteChannel` implementations; framing and protocol state
//! live above. The TCP variant talks to a transparent serial-tunnel endpoint
//! that proxies raw bytes to the controller's RS-232/RS-485 port.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use mnet_comlink::error::{MnetError, Result};
use mnet_comlink::ByteChannel;

#[cfg(feature = "serial")]
use tokio_serial::{DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits};

#[cfg(feature = "serial")]
use crate::constants::SERIAL_BAUD_RATE;

// ============================================================================
// TCP tunnel
// ============================================================================

/// Byte channel over a transparent TCP serial tunnel.
pub struct TcpChannel {
    stream: TcpStream,
    peer: String,
}

impl TcpChannel {
    /// Connect to `host:port` within `connect_timeout`.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                Ok(TcpChannel { stream, peer: addr })
            },
            Ok(Err(e)) => Err(MnetError::transport(format!(
                "failed to connect to {addr}: {e}"
            ))),
            Err(_) => Err(MnetError::timeout(format!("connection to {addr} timed out"))),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl ByteChannel for TcpChannel {
    async fn read(&mut self, n: usize, deadline: Instant) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        match timeout_at(deadline, self.stream.read_exact(&mut buf)).await {
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(e)) => Err(MnetError::transport(format!("TCP read: {e}"))),
            Err(_) => Err(MnetError::timeout("TCP read deadline expired")),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| MnetError::transport(format!("TCP write: {e}")))?;
        debug!("TCP TX: {}B", bytes.len());
        Ok(())
    }

    async fn clear_input(&mut self) -> Result<()> {
        let mut scratch = [0u8; 256];
        let mut discarded = 0usize;
        loop {
            match self.stream.try_read(&mut scratch) {
                Ok(0) => {
                    return Err(MnetError::transport("TCP connection closed"));
                },
                Ok(n) => discarded += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(MnetError::transport(format!("TCP drain: {e}"))),
            }
        }
        if discarded > 0 {
            warn!("discarded {} stale input bytes", discarded);
        }
        Ok(())
    }
}

// ============================================================================
// Serial line
// ============================================================================

/// Byte channel over a directly attached serial port, 38400 baud 8N1.
#[cfg(feature = "serial")]
pub struct SerialChannel {
    port: SerialStream,
    path: String,
}

#[cfg(feature = "serial")]
impl SerialChannel {
    /// Open `path` at the protocol's line settings.
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_baud(path, SERIAL_BAUD_RATE)
    }

    pub fn open_with_baud(path: &str, baud_rate: u32) -> Result<Self> {
        debug!("serial: {} @{}baud", path, baud_rate);
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| MnetError::transport(format!("failed to open {path}: {e}")))?;
        info!("serial opened: {}", path);
        Ok(SerialChannel {
            port,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl ByteChannel for SerialChannel {
    async fn read(&mut self, n: usize, deadline: Instant) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        match timeout_at(deadline, self.port.read_exact(&mut buf)).await {
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(e)) => Err(MnetError::transport(format!("serial read: {e}"))),
            Err(_) => Err(MnetError::timeout("serial read deadline expired")),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all(bytes)
            .await
            .map_err(|e| MnetError::transport(format!("serial write: {e}")))?;
        self.port
            .flush()
            .await
            .map_err(|e| MnetError::transport(format!("serial flush: {e}")))?;
        debug!("serial TX: {}B", bytes.len());
        Ok(())
    }

    async fn clear_input(&mut self) -> Result<()> {
        self.port
            .clear(tokio_serial::ClearBuffer::Input)
            .map_err(|e| MnetError::transport(format!("serial drain: {e}")))
    }
}
