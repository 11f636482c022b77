pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod pipe;
pub mod sampler;
pub mod transport;

use log::{error, info};

// Re-export the types the binaries and embedders work with.
pub use codec::Message;
pub use config::{BridgeConfig, PipeConfig, SessionConfig};
pub use engine::{AnalysisEngine, AnalysisParams, ComponentSet, FrameObserver, LoggingEngine};
pub use error::{BridgeError, EngineError};
pub use handshake::{Handshake, HandshakeState, Session};
pub use pipe::{Channel, ConnectOptions, Direction, PipeName, Role};
pub use transport::{ControlLink, DuplexTransport};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Engine-side session driver: establish the transport as the creating
/// side, run the handshake, and tear both channels down whether the run
/// succeeded or aborted. Connection-level errors during the handshake are
/// fatal by policy; no safe recovery exists mid-initialization.
pub async fn run_engine_session<E: AnalysisEngine>(
    config: &BridgeConfig,
    engine: &mut E,
    observer: &mut dyn FrameObserver,
) -> Result<Session, BridgeError> {
    info!("[BRIDGE] Waiting for the acquisition controller to connect");
    let mut transport = DuplexTransport::establish(&config.pipes, Role::Server).await?;

    let result = Handshake::new(engine, observer, &config.session)
        .run(&mut transport)
        .await;
    transport.teardown().await;

    match &result {
        Ok(session) => info!(
            "[BRIDGE] Session {} finished for '{}'",
            session.id, session.file_name
        ),
        Err(e) => error!("[BRIDGE] Session aborted: {}", e),
    }
    result
}
