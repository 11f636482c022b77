// Windows named-pipe backend. The creating side waits in ConnectNamedPipe;
// the connecting side retries CreateFile-style opens with bounded backoff.
// A single duplex instance can carry both directions of a transport once
// connected (see `create_duplex_server` / `connect_duplex_client`).

use super::{ChannelIo, ConnectOptions, Direction, PipeName, Role};
use crate::error::BridgeError;
use log::{debug, warn};
use std::path::PathBuf;
use tokio::net::windows::named_pipe::{
    ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
};

pub(super) async fn open(
    name: &PipeName,
    direction: Direction,
    role: Role,
    options: &ConnectOptions,
) -> Result<(ChannelIo, Option<PathBuf>), BridgeError> {
    let io = match role {
        Role::Server => {
            let server = create_server(name, direction)?;
            server
                .connect()
                .await
                .map_err(|e| BridgeError::ConnectionFailed {
                    name: name.name().to_string(),
                    source: e,
                })?;
            debug!("[PIPE] Peer connected on '{}'", name);
            match direction {
                Direction::Read => ChannelIo::Reader(Box::new(server)),
                Direction::Write => ChannelIo::Writer(Box::new(server)),
            }
        }
        Role::Client => {
            let client = connect_client(
                name,
                direction == Direction::Read,
                direction == Direction::Write,
                options,
            )
            .await?;
            match direction {
                Direction::Read => ChannelIo::Reader(Box::new(client)),
                Direction::Write => ChannelIo::Writer(Box::new(client)),
            }
        }
    };
    // Named-pipe objects vanish with their last handle; nothing to unlink.
    Ok((io, None))
}

fn create_server(name: &PipeName, direction: Direction) -> Result<NamedPipeServer, BridgeError> {
    ServerOptions::new()
        .access_inbound(direction == Direction::Read)
        .access_outbound(direction == Direction::Write)
        .first_pipe_instance(true)
        .create(name.path())
        .map_err(|e| BridgeError::ConnectionFailed {
            name: name.name().to_string(),
            source: e,
        })
}

/// Create one duplex server instance and wait for the peer. Both transport
/// directions are carried by this single pipe object.
pub async fn create_duplex_server(
    name: &PipeName,
    _options: &ConnectOptions,
) -> Result<NamedPipeServer, BridgeError> {
    let server = ServerOptions::new()
        .first_pipe_instance(true)
        .create(name.path())
        .map_err(|e| BridgeError::ConnectionFailed {
            name: name.name().to_string(),
            source: e,
        })?;
    debug!("[PIPE] Waiting for peer on '{}'", name);
    server
        .connect()
        .await
        .map_err(|e| BridgeError::ConnectionFailed {
            name: name.name().to_string(),
            source: e,
        })?;
    Ok(server)
}

/// Connect to an existing duplex instance with bounded retry.
pub async fn connect_duplex_client(
    name: &PipeName,
    options: &ConnectOptions,
) -> Result<NamedPipeClient, BridgeError> {
    connect_client(name, true, true, options).await
}

async fn connect_client(
    name: &PipeName,
    read: bool,
    write: bool,
    options: &ConnectOptions,
) -> Result<NamedPipeClient, BridgeError> {
    let addr = name.path();
    let mut attempt: u32 = 0;
    loop {
        match ClientOptions::new().read(read).write(write).open(&addr) {
            Ok(client) => {
                debug!("[PIPE] Connected to '{}'", name);
                return Ok(client);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= options.attempts {
                    return Err(BridgeError::ConnectionFailed {
                        name: name.name().to_string(),
                        source: e,
                    });
                }
                warn!(
                    "[PIPE] Open of '{}' failed ({}), {} attempts remain",
                    name,
                    e,
                    options.attempts - attempt
                );
                tokio::time::sleep(options.retry_delay).await;
            }
        }
    }
}
