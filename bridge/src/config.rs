// Runtime configuration, loaded from a JSON file with every field
// defaulted so an empty `{}` is a valid config.

use crate::error::BridgeError;
use crate::pipe::{ConnectOptions, PipeName, Role};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Names and tuning of the pipe pair.
///
/// The two unidirectional names are from the engine's point of view; the
/// defaults are the well-known names both processes agree on. On Windows a
/// single duplex instance (`duplexPipe`) carries both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipeConfig {
    /// Engine -> controller (the controller "gets" from this one).
    pub engine_to_controller: String,
    /// Controller -> engine (the controller "sends" into this one).
    pub controller_to_engine: String,
    /// Single duplex instance name used on Windows.
    pub duplex_pipe: String,
    /// Directory holding the FIFO nodes on POSIX systems.
    pub pipe_dir: PathBuf,
    /// Bounded connect retry on the connecting side.
    pub connect_attempts: u32,
    pub connect_retry_ms: u64,
    /// Optional read/write deadline; absent means unbounded blocking,
    /// which is what the handshake relies on by default.
    pub io_deadline_ms: Option<u64>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            engine_to_controller: "getPipeMMCaImAn.ser".to_string(),
            controller_to_engine: "sendPipeMMCaImAn.ser".to_string(),
            duplex_pipe: "pipebridge".to_string(),
            pipe_dir: PathBuf::from("/tmp"),
            connect_attempts: 5,
            connect_retry_ms: 1000,
            io_deadline_ms: None,
        }
    }
}

impl PipeConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            attempts: self.connect_attempts,
            retry_delay: Duration::from_millis(self.connect_retry_ms),
            io_deadline: self.io_deadline_ms.map(Duration::from_millis),
        }
    }

    /// Name of the pipe this role reads from.
    pub fn inbound_name(&self, role: Role) -> PipeName {
        match role {
            Role::Server => PipeName::new(&self.controller_to_engine, &self.pipe_dir),
            Role::Client => PipeName::new(&self.engine_to_controller, &self.pipe_dir),
        }
    }

    /// Name of the pipe this role writes to.
    pub fn outbound_name(&self, role: Role) -> PipeName {
        match role {
            Role::Server => PipeName::new(&self.engine_to_controller, &self.pipe_dir),
            Role::Client => PipeName::new(&self.controller_to_engine, &self.pipe_dir),
        }
    }

    /// The one duplex instance name (Windows transport).
    pub fn duplex_name(&self) -> PipeName {
        PipeName::new(&self.duplex_pipe, &self.pipe_dir)
    }
}

/// Session-level settings for the analysis side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Root of the directory tree the acquisition controller records into.
    pub data_dir: PathBuf,
    /// Appended to the received file stem to form the recording file name.
    pub file_suffix: String,
    pub frame_rate: f64,
    /// Initialization mini-batch length (frames captured before the init
    /// trigger fires).
    pub init_batch: usize,
    /// Component-quality threshold applied before approving streaming;
    /// absent skips the filtering step.
    pub quality_threshold: Option<f64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("PipeBridge"),
            file_suffix: "_MMStack_Default.ome.tif".to_string(),
            frame_rate: 40.0,
            init_batch: 300,
            quality_threshold: Some(1e-5),
        }
    }
}

impl SessionConfig {
    /// Resolve the received file stem to the full recording path:
    /// `<data_dir>/<stem>/<stem><suffix>`.
    pub fn resolve_input_path(&self, stem: &str) -> PathBuf {
        self.data_dir
            .join(stem)
            .join(format!("{}{}", stem, self.file_suffix))
    }
}

/// Top-level configuration for both binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub pipes: PipeConfig,
    pub session: SessionConfig,
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load from the given path, or from the default location, or fall back
    /// to defaults when no file exists.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, BridgeError> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("PipeBridge")
            .join("config.json")
    }
}
