use thiserror::Error;

/// Error taxonomy for the bridge: connection, framing, and protocol failures.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Connection failed on pipe '{name}': {source}")]
    ConnectionFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Peer disconnected while writing to pipe '{0}'")]
    BrokenPipe(String),
    #[error("Pipe '{0}' closed by peer")]
    ChannelClosed(String),
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Message contains an embedded newline: {0:?}")]
    InvalidMessage(String),
    #[error("Protocol violation in state {state}: expected '{expected}', received '{received}'")]
    Protocol {
        state: &'static str,
        expected: &'static str,
        received: String,
    },
    #[error("Operation timed out after {0:?}")]
    Cancelled(std::time::Duration),
    #[error("Analysis engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the analysis engine collaborator.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine has not been configured")]
    NotConfigured,
    #[error("Engine has not been initialized")]
    NotInitialized,
    #[error("{0}")]
    Failed(String),
}
