// Cross-platform named-pipe channels. One Channel is a single-direction
// byte conduit bound to a named OS resource; the platform backends share
// the same open/read/write/close contract.

use crate::error::BridgeError;
use log::warn;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[cfg(unix)]
mod fifo;
#[cfg(unix)]
use fifo as imp;

#[cfg(windows)]
mod named;
#[cfg(windows)]
use named as imp;

#[cfg(windows)]
pub use named::connect_duplex_client;
#[cfg(windows)]
pub use named::create_duplex_server;

/// Transfer direction of a channel, from the owning process's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Which side of the connection this process plays. The server creates the
/// OS resource and waits; the client connects to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Logical pipe name, resolved to a platform-specific path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeName {
    name: String,
    base_dir: PathBuf,
}

impl PipeName {
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem path of the FIFO.
    #[cfg(unix)]
    pub fn path(&self) -> PathBuf {
        self.base_dir.join(&self.name)
    }

    /// Named-pipe namespace address.
    #[cfg(windows)]
    pub fn path(&self) -> String {
        format!(r"\\.\pipe\{}", self.name)
    }
}

impl fmt::Display for PipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Connection-level tuning shared by all channels of one session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bounded retry for the connecting side (pipe not there yet).
    pub attempts: u32,
    pub retry_delay: Duration,
    /// Optional deadline applied to every read/write. None = unbounded,
    /// matching the blocking semantics the handshake depends on.
    pub io_deadline: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            attempts: 5,
            retry_delay: Duration::from_secs(1),
            io_deadline: None,
        }
    }
}

pub(crate) enum ChannelIo {
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    Closed,
}

/// A single-direction byte conduit over a named pipe. Exclusively owned by
/// the process that opened it; all operations block the calling task.
pub struct Channel {
    name: String,
    direction: Direction,
    io: ChannelIo,
    io_deadline: Option<Duration>,
    // FIFO path unlinked on first close (set on the creating side only).
    unlink: Option<PathBuf>,
}

impl Channel {
    /// Open one end of a named pipe. The server side creates the resource
    /// and waits for a peer; the client side connects with bounded retry
    /// and surfaces `ConnectionFailed` once the attempts are exhausted.
    pub async fn open(
        name: &PipeName,
        direction: Direction,
        role: Role,
        options: &ConnectOptions,
    ) -> Result<Channel, BridgeError> {
        let (io, unlink) = imp::open(name, direction, role, options).await?;
        Ok(Self {
            name: name.name().to_string(),
            direction,
            io,
            io_deadline: options.io_deadline,
            unlink,
        })
    }

    pub(crate) fn from_parts(
        name: impl Into<String>,
        direction: Direction,
        io: ChannelIo,
        io_deadline: Option<Duration>,
        unlink: Option<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            io,
            io_deadline,
            unlink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.io, ChannelIo::Closed)
    }

    /// Read up to `buf.len()` bytes. Returns 0 at end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        let deadline = self.io_deadline;
        let name = self.name.clone();
        let reader = self.reader()?;
        let n = timed(deadline, reader.read(buf))
            .await?
            .map_err(|e| map_read_error(&name, e))?;
        Ok(n)
    }

    /// Read exactly `buf.len()` bytes; `ChannelClosed` if the peer vanishes
    /// before the buffer fills.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), BridgeError> {
        let deadline = self.io_deadline;
        let name = self.name.clone();
        let reader = self.reader()?;
        timed(deadline, reader.read_exact(buf))
            .await?
            .map_err(|e| map_read_error(&name, e))?;
        Ok(())
    }

    /// Write the whole buffer and flush; `BrokenPipe` if the peer has
    /// disconnected.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), BridgeError> {
        let deadline = self.io_deadline;
        let name = self.name.clone();
        let writer = self.writer()?;
        timed(deadline, async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await?
        .map_err(|e| map_write_error(&name, e))?;
        Ok(())
    }

    /// Release the OS resource and, on the creating side of a FIFO, unlink
    /// the filesystem path. Safe to call again: the second close is a no-op.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Ok(());
        }
        // Dropping the handle releases the OS resource.
        self.io = ChannelIo::Closed;
        if let Some(path) = self.unlink.take() {
            tokio::fs::remove_file(&path).await.map_err(|e| {
                warn!("[PIPE] Failed to unlink '{}': {}", path.display(), e);
                BridgeError::Io(e)
            })?;
        }
        Ok(())
    }

    fn reader(&mut self) -> Result<&mut Box<dyn AsyncRead + Send + Unpin>, BridgeError> {
        match &mut self.io {
            ChannelIo::Reader(r) => Ok(r),
            ChannelIo::Closed => Err(BridgeError::ChannelClosed(self.name.clone())),
            ChannelIo::Writer(_) => Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "channel is write-only",
            ))),
        }
    }

    fn writer(&mut self) -> Result<&mut Box<dyn AsyncWrite + Send + Unpin>, BridgeError> {
        match &mut self.io {
            ChannelIo::Writer(w) => Ok(w),
            ChannelIo::Closed => Err(BridgeError::BrokenPipe(self.name.clone())),
            ChannelIo::Reader(_) => Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "channel is read-only",
            ))),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Wrap a future in the optional per-channel deadline.
async fn timed<T>(
    deadline: Option<Duration>,
    fut: impl std::future::Future<Output = io::Result<T>>,
) -> Result<io::Result<T>, BridgeError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BridgeError::Cancelled(limit)),
        None => Ok(fut.await),
    }
}

fn map_read_error(name: &str, e: io::Error) -> BridgeError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset => BridgeError::ChannelClosed(name.to_string()),
        _ => BridgeError::Io(e),
    }
}

fn map_write_error(name: &str, e: io::Error) -> BridgeError {
    match e.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
            BridgeError::BrokenPipe(name.to_string())
        }
        _ => BridgeError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duplex_pair() -> (Channel, Channel) {
        let (a, b) = tokio::io::duplex(256);
        let (read_half, _) = tokio::io::split(a);
        let (_, write_half) = tokio::io::split(b);
        (
            Channel::from_parts(
                "test.in",
                Direction::Read,
                ChannelIo::Reader(Box::new(read_half)),
                None,
                None,
            ),
            Channel::from_parts(
                "test.out",
                Direction::Write,
                ChannelIo::Writer(Box::new(write_half)),
                None,
                None,
            ),
        )
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let (mut rx, mut tx) = duplex_pair();
        tx.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut rx, _tx) = duplex_pair();
        rx.close().await.unwrap();
        assert!(rx.is_closed());
        // Second close must not error.
        rx.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_after_close_is_channel_closed() {
        let (mut rx, _tx) = duplex_pair();
        rx.close().await.unwrap();

        let mut buf = [0u8; 1];
        match rx.read(&mut buf).await {
            Err(BridgeError::ChannelClosed(name)) => assert_eq!(name, "test.in"),
            other => panic!("expected ChannelClosed, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_read_exact_on_peer_disconnect_is_channel_closed() {
        let (mut rx, mut tx) = duplex_pair();
        tx.write_all(b"ab").await.unwrap();
        tx.close().await.unwrap();
        drop(tx);

        let mut buf = [0u8; 8];
        match rx.read_exact(&mut buf).await {
            Err(BridgeError::ChannelClosed(_)) => {}
            other => panic!("expected ChannelClosed, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_deadline_surfaces_cancelled() {
        let (a, _keep_alive) = tokio::io::duplex(16);
        let (read_half, _) = tokio::io::split(a);
        let mut rx = Channel::from_parts(
            "test.deadline",
            Direction::Read,
            ChannelIo::Reader(Box::new(read_half)),
            Some(Duration::from_millis(10)),
            None,
        );

        let mut buf = [0u8; 1];
        match rx.read(&mut buf).await {
            Err(BridgeError::Cancelled(_)) => {}
            other => panic!("expected Cancelled, got {:?}", other.map(|_| ())),
        }
    }
}
