// Collaborator interface for the online analysis engine. The algorithms
// themselves live in an external scientific library; the handshake only
// needs these entry points at specific transitions.

use crate::error::EngineError;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Parameters handed to the engine before initialization. The typed core is
/// what the transport layer itself derives; everything algorithm-specific
/// rides along opaquely in `extra`.
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    pub input_path: PathBuf,
    pub frame_rate: f64,
    pub init_batch: usize,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AnalysisParams {
    pub fn new(input_path: impl Into<PathBuf>, frame_rate: f64, init_batch: usize) -> Self {
        Self {
            input_path: input_path.into(),
            frame_rate,
            init_batch,
            extra: serde_json::Map::new(),
        }
    }
}

/// Summary of the component set after initialization or quality filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentSet {
    pub accepted: usize,
    pub rejected: usize,
}

impl ComponentSet {
    pub fn total(&self) -> usize {
        self.accepted + self.rejected
    }
}

/// Per-frame hook invoked during streaming analysis. Replaces the runtime
/// patching the reference workflow used to siphon per-frame values.
pub trait FrameObserver {
    fn on_frame_processed(&mut self, frame_index: usize, value: f64);
}

/// Observer that just logs each frame value.
pub struct LogObserver;

impl FrameObserver for LogObserver {
    fn on_frame_processed(&mut self, frame_index: usize, value: f64) {
        debug!("[ENGINE] Frame {} processed, value {}", frame_index, value);
    }
}

/// The analysis engine collaborator. `initialize_online` and `fit_online`
/// are expensive and irreversible, which is why the handshake gates them
/// behind exact token matches.
pub trait AnalysisEngine {
    fn configure(&mut self, params: &AnalysisParams) -> Result<(), EngineError>;
    fn initialize_online(&mut self) -> Result<ComponentSet, EngineError>;
    fn filter_by_quality(&mut self, threshold: f64) -> Result<ComponentSet, EngineError>;
    /// Long-running: streams frames until the acquisition source is
    /// exhausted or externally stopped.
    fn fit_online(&mut self, observer: &mut dyn FrameObserver) -> Result<(), EngineError>;
}

/// Placeholder engine standing in for the scientific library. Logs every
/// call and reports a one-component model, enough to exercise the protocol
/// end to end.
#[derive(Default)]
pub struct LoggingEngine {
    params: Option<AnalysisParams>,
    components: Option<ComponentSet>,
}

impl LoggingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.params.as_ref().map(|p| p.input_path.as_path())
    }
}

impl AnalysisEngine for LoggingEngine {
    fn configure(&mut self, params: &AnalysisParams) -> Result<(), EngineError> {
        info!(
            "[ENGINE] Configured for '{}' at {} fps, init batch {}",
            params.input_path.display(),
            params.frame_rate,
            params.init_batch
        );
        self.params = Some(params.clone());
        Ok(())
    }

    fn initialize_online(&mut self) -> Result<ComponentSet, EngineError> {
        let params = self.params.as_ref().ok_or(EngineError::NotConfigured)?;
        info!(
            "[ENGINE] Initializing online model from {} frames",
            params.init_batch
        );
        let components = ComponentSet {
            accepted: 1,
            rejected: 0,
        };
        self.components = Some(components);
        Ok(components)
    }

    fn filter_by_quality(&mut self, threshold: f64) -> Result<ComponentSet, EngineError> {
        let components = self.components.ok_or(EngineError::NotInitialized)?;
        info!(
            "[ENGINE] Quality filter at threshold {}: {} accepted, {} rejected",
            threshold, components.accepted, components.rejected
        );
        Ok(components)
    }

    fn fit_online(&mut self, observer: &mut dyn FrameObserver) -> Result<(), EngineError> {
        let params = self.params.as_ref().ok_or(EngineError::NotConfigured)?;
        if self.components.is_none() {
            return Err(EngineError::NotInitialized);
        }
        info!("[ENGINE] Streaming analysis started");
        // Synthetic trace; a real engine streams until acquisition ends.
        for frame_index in 0..params.init_batch.min(8) {
            observer.on_frame_processed(frame_index, frame_index as f64 * 0.01);
        }
        info!("[ENGINE] Streaming analysis finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingObserver {
        frames: Vec<(usize, f64)>,
    }

    impl FrameObserver for CountingObserver {
        fn on_frame_processed(&mut self, frame_index: usize, value: f64) {
            self.frames.push((frame_index, value));
        }
    }

    #[test]
    fn test_initialize_before_configure_fails() {
        let mut engine = LoggingEngine::new();
        assert!(matches!(
            engine.initialize_online(),
            Err(EngineError::NotConfigured)
        ));
    }

    #[test]
    fn test_fit_before_initialize_fails() {
        let mut engine = LoggingEngine::new();
        engine
            .configure(&AnalysisParams::new("/data/a.tif", 40.0, 300))
            .unwrap();
        let mut observer = CountingObserver { frames: Vec::new() };
        assert!(matches!(
            engine.fit_online(&mut observer),
            Err(EngineError::NotInitialized)
        ));
        assert!(observer.frames.is_empty());
    }

    #[test]
    fn test_full_sequence_reports_frames() {
        let mut engine = LoggingEngine::new();
        engine
            .configure(&AnalysisParams::new("/data/a.tif", 40.0, 300))
            .unwrap();
        let components = engine.initialize_online().unwrap();
        assert_eq!(components.total(), 1);
        assert_eq!(engine.filter_by_quality(1e-5).unwrap(), components);

        let mut observer = CountingObserver { frames: Vec::new() };
        engine.fit_online(&mut observer).unwrap();
        assert!(!observer.frames.is_empty());
        assert_eq!(observer.frames[0], (0, 0.0));
    }
}
