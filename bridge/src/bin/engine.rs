// Analysis-side process: creates the pipe pair, runs the handshake, and
// hands the gated transitions to the analysis engine. The real scientific
// library is plugged in through the AnalysisEngine trait; this binary uses
// the logging placeholder.

use log::{error, info};
use pipebridge::engine::LogObserver;
use pipebridge::{logging, BridgeConfig, LoggingEngine};
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    logging::init_logger();
    logging::init_crash_logger();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match BridgeConfig::load_or_default(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("[ENGINE] Failed to load config: {}", e);
            std::process::exit(2);
        }
    };

    info!(
        "[ENGINE] pipebridge {} - pipes '{}' / '{}'",
        pipebridge::version(),
        config.pipes.controller_to_engine,
        config.pipes.engine_to_controller
    );

    let mut engine = LoggingEngine::new();
    let mut observer = LogObserver;
    match pipebridge::run_engine_session(&config, &mut engine, &mut observer).await {
        Ok(session) => {
            info!(
                "[ENGINE] Session {} complete for '{}'",
                session.id, session.file_name
            );
        }
        Err(e) => {
            logging::log_critical_error("Engine session", &e.to_string());
            std::process::exit(1);
        }
    }
}
