// Duplex transport: one inbound and one outbound Channel under a single
// logical connection, with platform-specific pairing.
//
// POSIX uses two independent FIFOs. The open ordering is the deadlock-free
// rendezvous both sides agree on: the server opens its read end first, then
// its write end; the client opens its write end first, then its read end.
// Windows carries both directions over one duplex named-pipe instance,
// split into halves after the connect.

use crate::codec::{send_line, LineReader, Message};
use crate::config::PipeConfig;
use crate::error::BridgeError;
use crate::pipe::{Channel, Role};
#[cfg(unix)]
use crate::pipe::Direction;
use log::{debug, warn};

/// The control-message seam the handshake drives. Kept separate from the
/// concrete transport so the state machine never depends on which pipe
/// backend is active.
#[allow(async_fn_in_trait)]
pub trait ControlLink {
    async fn recv(&mut self) -> Result<Message, BridgeError>;
    async fn send(&mut self, message: &Message) -> Result<(), BridgeError>;
}

/// A connected pipe pair plus the deframing state for the inbound side.
pub struct DuplexTransport {
    inbound: Channel,
    outbound: Channel,
    reader: LineReader,
}

impl DuplexTransport {
    /// Establish both channels for the given role. Blocks until the peer
    /// is connected on both directions.
    #[cfg(unix)]
    pub async fn establish(config: &PipeConfig, role: Role) -> Result<Self, BridgeError> {
        let options = config.connect_options();
        let (inbound, outbound) = match role {
            Role::Server => {
                let inbound =
                    Channel::open(&config.inbound_name(role), Direction::Read, role, &options)
                        .await?;
                let outbound =
                    match Channel::open(&config.outbound_name(role), Direction::Write, role, &options)
                        .await
                    {
                        Ok(outbound) => outbound,
                        Err(e) => {
                            release_after_failure(inbound).await;
                            return Err(e);
                        }
                    };
                (inbound, outbound)
            }
            Role::Client => {
                let outbound =
                    Channel::open(&config.outbound_name(role), Direction::Write, role, &options)
                        .await?;
                let inbound =
                    match Channel::open(&config.inbound_name(role), Direction::Read, role, &options)
                        .await
                    {
                        Ok(inbound) => inbound,
                        Err(e) => {
                            release_after_failure(outbound).await;
                            return Err(e);
                        }
                    };
                (inbound, outbound)
            }
        };
        debug!("[TRANSPORT] Duplex established as {:?}", role);
        Ok(Self::from_channels(inbound, outbound))
    }

    /// Establish both directions over one duplex named-pipe instance.
    #[cfg(windows)]
    pub async fn establish(config: &PipeConfig, role: Role) -> Result<Self, BridgeError> {
        use crate::pipe::{connect_duplex_client, create_duplex_server};

        let options = config.connect_options();
        let name = config.duplex_name();
        let (inbound, outbound) = match role {
            Role::Server => {
                let server = create_duplex_server(&name, &options).await?;
                split_duplex(name.name(), server, options.io_deadline)
            }
            Role::Client => {
                let client = connect_duplex_client(&name, &options).await?;
                split_duplex(name.name(), client, options.io_deadline)
            }
        };
        debug!("[TRANSPORT] Duplex established as {:?}", role);
        Ok(Self::from_channels(inbound, outbound))
    }

    pub(crate) fn from_channels(inbound: Channel, outbound: Channel) -> Self {
        Self {
            inbound,
            outbound,
            reader: LineReader::new(),
        }
    }

    /// Close both channels, outbound first so the peer sees a clean EOF on
    /// its read side rather than a writer vanishing mid-message. A failure
    /// on either close is logged, never propagated; both resources end up
    /// released regardless.
    pub async fn teardown(&mut self) {
        if let Err(e) = self.outbound.close().await {
            warn!(
                "[TRANSPORT] Failed to close outbound '{}': {}",
                self.outbound.name(),
                e
            );
        }
        if let Err(e) = self.inbound.close().await {
            warn!(
                "[TRANSPORT] Failed to close inbound '{}': {}",
                self.inbound.name(),
                e
            );
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.inbound.is_closed() && self.outbound.is_closed()
    }
}

/// Close the half-open channel after the complementary open failed, so the
/// creating side's FIFO node is unlinked. The original connect error is the
/// one worth surfacing; a close failure here is only logged.
#[cfg(unix)]
async fn release_after_failure(mut channel: Channel) {
    if let Err(e) = channel.close().await {
        warn!(
            "[TRANSPORT] Failed to release '{}' after connect error: {}",
            channel.name(),
            e
        );
    }
}

#[cfg(windows)]
fn split_duplex<T>(
    name: &str,
    pipe: T,
    io_deadline: Option<std::time::Duration>,
) -> (Channel, Channel)
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    use crate::pipe::{ChannelIo, Direction};

    let (read_half, write_half) = tokio::io::split(pipe);
    (
        Channel::from_parts(
            name,
            Direction::Read,
            ChannelIo::Reader(Box::new(read_half)),
            io_deadline,
            None,
        ),
        Channel::from_parts(
            name,
            Direction::Write,
            ChannelIo::Writer(Box::new(write_half)),
            io_deadline,
            None,
        ),
    )
}

impl ControlLink for DuplexTransport {
    async fn recv(&mut self) -> Result<Message, BridgeError> {
        self.reader.receive(&mut self.inbound).await
    }

    async fn send(&mut self, message: &Message) -> Result<(), BridgeError> {
        send_line(&mut self.outbound, message).await
    }
}
