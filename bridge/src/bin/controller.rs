// Acquisition-controller simulator: plays the microscope side of the
// handshake so an engine process can be exercised end to end without
// hardware. Sends the file stem and the three triggers in order, waiting
// for the engine's approval in between.

use log::{error, info};
use pipebridge::handshake::{
    FIRST_FRAME_READY, START_INIT_PROCESS, START_STREAM_ACQUISITION, START_STREAM_ANALYSIS,
};
use pipebridge::{logging, BridgeConfig, BridgeError, ControlLink, DuplexTransport, Message, Role};
use std::path::PathBuf;

async fn run(config: &BridgeConfig, stem: &str) -> Result<(), BridgeError> {
    let mut link = DuplexTransport::establish(&config.pipes, Role::Client).await?;

    let result = drive(&mut link, stem).await;
    link.teardown().await;
    result
}

async fn drive(link: &mut DuplexTransport, stem: &str) -> Result<(), BridgeError> {
    link.send(&Message::new(stem)?).await?;
    info!("[CONTROLLER] File stem '{}' sent", stem);

    link.send(&Message::new(FIRST_FRAME_READY)?).await?;
    info!("[CONTROLLER] First frame announced");

    link.send(&Message::new(START_INIT_PROCESS)?).await?;
    info!("[CONTROLLER] Init trigger sent, waiting for approval");

    let approval = link.recv().await?;
    if approval.as_str() != START_STREAM_ACQUISITION {
        return Err(BridgeError::Protocol {
            state: "AwaitAcquisitionApproval",
            expected: START_STREAM_ACQUISITION,
            received: approval.into_string(),
        });
    }
    info!("[CONTROLLER] Engine approved, streaming acquisition started");

    link.send(&Message::new(START_STREAM_ANALYSIS)?).await?;
    info!("[CONTROLLER] Analysis trigger sent");
    Ok(())
}

#[tokio::main]
async fn main() {
    logging::init_logger();

    let mut args = std::env::args().skip(1);
    let stem = args.next().unwrap_or_else(|| "sessionA".to_string());
    let config_path = args.next().map(PathBuf::from);

    let config = match BridgeConfig::load_or_default(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("[CONTROLLER] Failed to load config: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&config, &stem).await {
        error!("[CONTROLLER] Handshake failed: {}", e);
        std::process::exit(1);
    }
    info!("[CONTROLLER] Handshake complete");
}
