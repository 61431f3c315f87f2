//! Hub-side byte transports.
//!
//! Serial TTY, Bluetooth RFCOMM and trace replay all reduce to the same
//! surface: sized reads, whole-buffer writes. Reads return `Ok(0)` at end of
//! stream; the hub connection treats that as fatal.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bluer::rfcomm;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;

/// Baud rate for serial hub connections.
pub const SERIAL_BAUD: u32 = 115_200;
/// RFCOMM channel the hub listens on.
pub const RFCOMM_CHANNEL: u8 = 1;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serial open failed: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("bluetooth failure: {0}")]
    Bluetooth(#[from] bluer::Error),
    #[error("invalid bluetooth address: {0}")]
    Address(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The byte stream carrying the hub session.
pub enum HubTransport {
    Serial(SerialStream),
    Bluetooth(rfcomm::Stream),
    Replay(Replay),
}

impl HubTransport {
    /// Open a serial TTY hub connection.
    pub fn open_serial(path: &str) -> Result<Self, TransportError> {
        let port = tokio_serial::new(path, SERIAL_BAUD).open_native_async()?;
        info!(path, "serial hub connection open");
        Ok(HubTransport::Serial(port))
    }

    /// Connect to a hub over Bluetooth RFCOMM.
    pub async fn connect_bluetooth(bdaddr: &str) -> Result<Self, TransportError> {
        let addr: bluer::Address = bdaddr
            .parse()
            .map_err(|_| TransportError::Address(bdaddr.to_owned()))?;
        let stream =
            rfcomm::Stream::connect(rfcomm::SocketAddr::new(addr, RFCOMM_CHANNEL)).await?;
        info!(%addr, "bluetooth hub connection open");
        Ok(HubTransport::Bluetooth(stream))
    }

    /// Open a previously captured trace for replay.
    pub fn open_replay(path: &str) -> Result<Self, TransportError> {
        let data = std::fs::read(path)?;
        info!(path, "replaying captured trace");
        Ok(HubTransport::Replay(Replay::from_trace(&data)))
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means the stream is finished.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            HubTransport::Serial(port) => port.read(buf).await,
            HubTransport::Bluetooth(stream) => stream.read(buf).await,
            HubTransport::Replay(replay) => replay.read(buf).await,
        }
    }

    /// Write a full buffer to the hub. Replay discards writes.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            HubTransport::Serial(port) => port.write_all(data).await,
            HubTransport::Bluetooth(stream) => stream.write_all(data).await,
            HubTransport::Replay(_) => Ok(()),
        }
    }
}

/// Read-only hub transport sourced from a prior trace log.
///
/// Only inbound (`< `) records are replayed; the prefix is stripped and the
/// log's `\n` framing is rewritten to `\r` so downstream framing still
/// triggers. Lines are paced one millisecond apart.
pub struct Replay {
    lines: VecDeque<Vec<u8>>,
}

impl Replay {
    pub(crate) fn from_trace(data: &[u8]) -> Self {
        let lines = data
            .split(|b| *b == b'\n')
            .filter_map(|record| record.strip_prefix(b"< "))
            .map(|payload| {
                let mut line = payload.to_vec();
                line.push(b'\r');
                line
            })
            .collect();
        Replay { lines }
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Pace first, pop after: this read may be raced against other
        // branches of a select and must not consume a line it cannot return.
        if self.lines.is_empty() {
            return Ok(0);
        }
        sleep(Duration::from_millis(1)).await;
        let Some(line) = self.lines.pop_front() else {
            return Ok(0);
        };
        let n = line.len().min(buf.len());
        buf[..n].copy_from_slice(&line[..n]);
        if n < line.len() {
            // Oversize line: hand back the remainder on the next read.
            self.lines.push_front(line[n..].to_vec());
        }
        Ok(n)
    }
}
