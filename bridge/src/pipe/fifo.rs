// POSIX FIFO backend. Opening one end blocks until a peer opens the
// complementary end; that rendezvous is the synchronization primitive the
// whole handshake depends on, so opens run on the blocking pool via
// tokio::fs and must not be reordered by callers.

use super::{ChannelIo, ConnectOptions, Direction, PipeName, Role};
use crate::error::BridgeError;
use log::{debug, warn};
use nix::sys::stat::Mode;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;

pub(super) async fn open(
    name: &PipeName,
    direction: Direction,
    role: Role,
    options: &ConnectOptions,
) -> Result<(ChannelIo, Option<PathBuf>), BridgeError> {
    let path = name.path();

    if role == Role::Server {
        create_fifo(&path).map_err(|e| BridgeError::ConnectionFailed {
            name: name.name().to_string(),
            source: e,
        })?;
    }

    let file = match open_end(name, &path, direction, role, options).await {
        Ok(file) => file,
        Err(e) => {
            // The node created above must not outlive a failed open.
            if role == Role::Server {
                if let Err(rm) = std::fs::remove_file(&path) {
                    warn!(
                        "[PIPE] Failed to unlink '{}' after open error: {}",
                        path.display(),
                        rm
                    );
                }
            }
            return Err(e);
        }
    };
    debug!(
        "[PIPE] FIFO '{}' open for {:?} as {:?}",
        path.display(),
        direction,
        role
    );

    let io = match direction {
        Direction::Read => ChannelIo::Reader(Box::new(file)),
        Direction::Write => ChannelIo::Writer(Box::new(file)),
    };
    let unlink = (role == Role::Server).then(|| path);
    Ok((io, unlink))
}

/// Create the FIFO node, replacing a stale one left by a crashed session.
fn create_fifo(path: &Path) -> io::Result<()> {
    if path.exists() {
        warn!("[PIPE] Removing stale FIFO '{}'", path.display());
        std::fs::remove_file(path)?;
    }
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o644)).map_err(io::Error::from)
}

/// Open one end of the FIFO. The open itself blocks until the peer opens
/// the other end; the connecting side additionally retries while the node
/// does not exist yet (the creator may not have started).
async fn open_end(
    name: &PipeName,
    path: &Path,
    direction: Direction,
    role: Role,
    options: &ConnectOptions,
) -> Result<tokio::fs::File, BridgeError> {
    let mut attempt: u32 = 0;
    loop {
        let opened = match direction {
            Direction::Read => OpenOptions::new().read(true).open(path).await,
            Direction::Write => OpenOptions::new().write(true).open(path).await,
        };
        match opened {
            Ok(file) => return Ok(file),
            Err(e) if role == Role::Client && e.kind() == io::ErrorKind::NotFound => {
                attempt += 1;
                if attempt >= options.attempts {
                    return Err(BridgeError::ConnectionFailed {
                        name: name.name().to_string(),
                        source: e,
                    });
                }
                warn!(
                    "[PIPE] FIFO '{}' not there yet, {} attempts remain",
                    path.display(),
                    options.attempts - attempt
                );
                tokio::time::sleep(options.retry_delay).await;
            }
            Err(e) => {
                return Err(BridgeError::ConnectionFailed {
                    name: name.name().to_string(),
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Channel, ConnectOptions, Direction, PipeName, Role};
    use crate::error::BridgeError;
    use std::time::Duration;

    fn fast_options() -> ConnectOptions {
        ConnectOptions {
            attempts: 3,
            retry_delay: Duration::from_millis(20),
            io_deadline: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fifo_round_trip_and_unlink_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let name = PipeName::new("roundtrip.fifo", dir.path());
        let options = fast_options();

        let server_name = name.clone();
        let server_options = options.clone();
        let server = tokio::spawn(async move {
            let mut rx = Channel::open(&server_name, Direction::Read, Role::Server, &server_options)
                .await
                .unwrap();
            let mut buf = [0u8; 4];
            rx.read_exact(&mut buf).await.unwrap();
            rx.close().await.unwrap();
            buf
        });

        let mut tx = Channel::open(&name, Direction::Write, Role::Client, &options)
            .await
            .unwrap();
        tx.write_all(b"ping").await.unwrap();

        let buf = server.await.unwrap();
        assert_eq!(&buf, b"ping");
        tx.close().await.unwrap();

        // The creating side unlinked the path on close.
        assert!(!dir.path().join("roundtrip.fifo").exists());
    }

    #[tokio::test]
    async fn test_client_open_missing_fifo_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let name = PipeName::new("missing.fifo", dir.path());

        let result = Channel::open(&name, Direction::Write, Role::Client, &fast_options()).await;
        match result {
            Err(BridgeError::ConnectionFailed { name, .. }) => {
                assert_eq!(name, "missing.fifo");
            }
            other => panic!("expected ConnectionFailed, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_peer_close_yields_eof() {
        let dir = tempfile::tempdir().unwrap();
        let name = PipeName::new("eof.fifo", dir.path());
        let options = fast_options();

        let server_name = name.clone();
        let server_options = options.clone();
        let server = tokio::spawn(async move {
            let mut rx = Channel::open(&server_name, Direction::Read, Role::Server, &server_options)
                .await
                .unwrap();
            let mut buf = [0u8; 16];
            let mut total = 0;
            loop {
                let n = rx.read(&mut buf[total..]).await.unwrap();
                if n == 0 {
                    break;
                }
                total += n;
            }
            rx.close().await.unwrap();
            total
        });

        let mut tx = Channel::open(&name, Direction::Write, Role::Client, &options)
            .await
            .unwrap();
        tx.write_all(b"abc").await.unwrap();
        tx.close().await.unwrap();

        assert_eq!(server.await.unwrap(), 3);
    }
}
