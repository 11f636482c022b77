// The ordered control handshake between the acquisition controller and the
// analysis engine. Every gated transition requires an exact literal match:
// a typo or version skew between the two processes must be a hard error
// before anything irreversible (model init, start of capture) happens.

use crate::codec::Message;
use crate::config::SessionConfig;
use crate::engine::{AnalysisEngine, AnalysisParams, FrameObserver};
use crate::error::BridgeError;
use crate::transport::ControlLink;
use log::info;
use std::path::PathBuf;
use uuid::Uuid;

/// Controller -> engine: the first initialization frame has been captured.
pub const FIRST_FRAME_READY: &str = "FirstFrameReady";
/// Controller -> engine: the init mini-batch is on disk, initialize now.
pub const START_INIT_PROCESS: &str = "startInitProcess";
/// Engine -> controller: model ready, start streaming capture.
pub const START_STREAM_ACQUISITION: &str = "startStreamAcquisition";
/// Controller -> engine: capture is streaming, start online analysis.
pub const START_STREAM_ANALYSIS: &str = "startStreamAnalysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitFileName,
    AwaitFirstFrame,
    AwaitInitTrigger,
    AwaitOperatorApproval,
    AwaitStreamTrigger,
    Done,
}

impl HandshakeState {
    pub fn name(self) -> &'static str {
        match self {
            HandshakeState::AwaitFileName => "AwaitFileName",
            HandshakeState::AwaitFirstFrame => "AwaitFirstFrame",
            HandshakeState::AwaitInitTrigger => "AwaitInitTrigger",
            HandshakeState::AwaitOperatorApproval => "AwaitOperatorApproval",
            HandshakeState::AwaitStreamTrigger => "AwaitStreamTrigger",
            HandshakeState::Done => "Done",
        }
    }
}

/// State of one completed (or aborted) handshake run.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub file_name: String,
    pub input_path: PathBuf,
    pub initialized: bool,
    pub streaming: bool,
}

impl Session {
    fn new(file_name: String, input_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name,
            input_path,
            initialized: false,
            streaming: false,
        }
    }
}

/// Drives the handshake over any `ControlLink`, invoking the engine
/// collaborator at the gated transitions. The caller owns the transport
/// and is responsible for teardown on both success and abort.
pub struct Handshake<'a, E: AnalysisEngine> {
    engine: &'a mut E,
    observer: &'a mut dyn FrameObserver,
    config: &'a SessionConfig,
    state: HandshakeState,
}

impl<'a, E: AnalysisEngine> Handshake<'a, E> {
    pub fn new(
        engine: &'a mut E,
        observer: &'a mut dyn FrameObserver,
        config: &'a SessionConfig,
    ) -> Self {
        Self {
            engine,
            observer,
            config,
            state: HandshakeState::AwaitFileName,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the handshake to completion. A mismatched token at any gated
    /// transition aborts with `Protocol` and no further collaborator call;
    /// the final gate aborts too, one consistent fail-fast policy for all
    /// three triggers.
    pub async fn run<L: ControlLink>(mut self, link: &mut L) -> Result<Session, BridgeError> {
        // First inbound message is the recording's file stem, not a token.
        let file_name = link.recv().await?.into_string();
        let input_path = self.config.resolve_input_path(&file_name);
        info!(
            "[HANDSHAKE] File name received: '{}' -> {}",
            file_name,
            input_path.display()
        );
        let mut session = Session::new(file_name, input_path);
        self.state = HandshakeState::AwaitFirstFrame;

        self.expect(link, FIRST_FRAME_READY).await?;
        info!("[HANDSHAKE] First frame captured, configuring engine");
        let params = AnalysisParams::new(
            session.input_path.clone(),
            self.config.frame_rate,
            self.config.init_batch,
        );
        self.engine.configure(&params)?;
        self.state = HandshakeState::AwaitInitTrigger;

        self.expect(link, START_INIT_PROCESS).await?;
        info!(
            "[HANDSHAKE] Init trigger received, initializing from {} frames",
            self.config.init_batch
        );
        let components = self.engine.initialize_online()?;
        session.initialized = true;
        info!(
            "[HANDSHAKE] Initialization finished: {} components",
            components.total()
        );
        self.state = HandshakeState::AwaitOperatorApproval;

        if let Some(threshold) = self.config.quality_threshold {
            let filtered = self.engine.filter_by_quality(threshold)?;
            info!(
                "[HANDSHAKE] Component quality filter kept {} of {}",
                filtered.accepted,
                filtered.total()
            );
        }
        link.send(&Message::new(START_STREAM_ACQUISITION)?).await?;
        info!("[HANDSHAKE] Streaming acquisition approved, trigger sent");
        self.state = HandshakeState::AwaitStreamTrigger;

        self.expect(link, START_STREAM_ANALYSIS).await?;
        session.streaming = true;
        info!("[HANDSHAKE] Starting online analysis");
        self.engine.fit_online(self.observer)?;
        self.state = HandshakeState::Done;

        Ok(session)
    }

    async fn expect<L: ControlLink>(
        &mut self,
        link: &mut L,
        expected: &'static str,
    ) -> Result<(), BridgeError> {
        let received = link.recv().await?;
        if received.as_str() == expected {
            Ok(())
        } else {
            Err(BridgeError::Protocol {
                state: self.state.name(),
                expected,
                received: received.into_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ComponentSet;
    use crate::error::EngineError;
    use std::collections::VecDeque;

    /// Scripted peer: hands out queued inbound messages and records sends.
    struct ScriptedLink {
        inbox: VecDeque<Message>,
        sent: Vec<Message>,
    }

    impl ScriptedLink {
        fn new(lines: &[&str]) -> Self {
            Self {
                inbox: lines
                    .iter()
                    .map(|l| Message::new(*l).unwrap())
                    .collect(),
                sent: Vec::new(),
            }
        }
    }

    impl ControlLink for ScriptedLink {
        async fn recv(&mut self) -> Result<Message, BridgeError> {
            self.inbox
                .pop_front()
                .ok_or_else(|| BridgeError::ChannelClosed("scripted".to_string()))
        }

        async fn send(&mut self, message: &Message) -> Result<(), BridgeError> {
            self.sent.push(message.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEngine {
        configured: usize,
        initialized: usize,
        filtered: usize,
        fitted: usize,
    }

    struct NullObserver;
    impl FrameObserver for NullObserver {
        fn on_frame_processed(&mut self, _frame_index: usize, _value: f64) {}
    }

    impl RecordingEngine {
        fn run_with(
            self,
            lines: &[&str],
            config: &SessionConfig,
        ) -> (Result<Session, BridgeError>, Self, Vec<Message>) {
            let mut engine = self;
            let mut observer = NullObserver;
            let mut link = ScriptedLink::new(lines);
            let result = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap()
                .block_on(async {
                    Handshake::new(&mut engine, &mut observer, config).run(&mut link).await
                });
            (result, engine, link.sent)
        }
    }

    impl AnalysisEngine for RecordingEngine {
        fn configure(&mut self, _params: &AnalysisParams) -> Result<(), EngineError> {
            self.configured += 1;
            Ok(())
        }

        fn initialize_online(&mut self) -> Result<ComponentSet, EngineError> {
            self.initialized += 1;
            Ok(ComponentSet {
                accepted: 2,
                rejected: 1,
            })
        }

        fn filter_by_quality(&mut self, _threshold: f64) -> Result<ComponentSet, EngineError> {
            self.filtered += 1;
            Ok(ComponentSet {
                accepted: 1,
                rejected: 2,
            })
        }

        fn fit_online(&mut self, _observer: &mut dyn FrameObserver) -> Result<(), EngineError> {
            self.fitted += 1;
            Ok(())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            data_dir: PathBuf::from("/data"),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_valid_sequence_reaches_done() {
        let lines = [
            "sessionA",
            FIRST_FRAME_READY,
            START_INIT_PROCESS,
            START_STREAM_ANALYSIS,
        ];
        let (result, engine, sent) = RecordingEngine::default().run_with(&lines, &config());

        let session = result.unwrap();
        assert_eq!(session.file_name, "sessionA");
        assert_eq!(
            session.input_path,
            PathBuf::from("/data/sessionA/sessionA_MMStack_Default.ome.tif")
        );
        assert!(session.initialized);
        assert!(session.streaming);

        assert_eq!(engine.configured, 1);
        assert_eq!(engine.initialized, 1);
        assert_eq!(engine.filtered, 1);
        assert_eq!(engine.fitted, 1);

        // Exactly one outbound trigger, sent after init and before fit.
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].as_str(), START_STREAM_ACQUISITION);
    }

    #[test]
    fn test_quality_filter_skipped_without_threshold() {
        let lines = [
            "sessionA",
            FIRST_FRAME_READY,
            START_INIT_PROCESS,
            START_STREAM_ANALYSIS,
        ];
        let no_filter = SessionConfig {
            quality_threshold: None,
            ..config()
        };
        let (result, engine, _) = RecordingEngine::default().run_with(&lines, &no_filter);
        assert!(result.is_ok());
        assert_eq!(engine.filtered, 0);
    }

    #[test]
    fn test_wrong_first_frame_token_aborts_before_any_engine_call() {
        let lines = ["sessionA", "wrongToken"];
        let (result, engine, sent) = RecordingEngine::default().run_with(&lines, &config());

        match result {
            Err(BridgeError::Protocol {
                state,
                expected,
                received,
            }) => {
                assert_eq!(state, "AwaitFirstFrame");
                assert_eq!(expected, FIRST_FRAME_READY);
                assert_eq!(received, "wrongToken");
            }
            other => panic!("expected Protocol, got {:?}", other.map(|_| ())),
        }
        assert_eq!(engine.configured, 0);
        assert_eq!(engine.initialized, 0);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_wrong_init_token_aborts_without_initializing() {
        let lines = ["sessionA", FIRST_FRAME_READY, "notTheInitTrigger"];
        let (result, engine, sent) = RecordingEngine::default().run_with(&lines, &config());

        match result {
            Err(BridgeError::Protocol { state, expected, .. }) => {
                assert_eq!(state, "AwaitInitTrigger");
                assert_eq!(expected, START_INIT_PROCESS);
            }
            other => panic!("expected Protocol, got {:?}", other.map(|_| ())),
        }
        assert_eq!(engine.initialized, 0);
        assert_eq!(engine.fitted, 0);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_wrong_stream_token_aborts_without_fitting() {
        // One consistent fail-fast policy: the final gate aborts like the
        // earlier ones instead of silently skipping the analysis.
        let lines = [
            "sessionA",
            FIRST_FRAME_READY,
            START_INIT_PROCESS,
            "somethingElse",
        ];
        let (result, engine, sent) = RecordingEngine::default().run_with(&lines, &config());

        match result {
            Err(BridgeError::Protocol { state, expected, .. }) => {
                assert_eq!(state, "AwaitStreamTrigger");
                assert_eq!(expected, START_STREAM_ANALYSIS);
            }
            other => panic!("expected Protocol, got {:?}", other.map(|_| ())),
        }
        assert_eq!(engine.initialized, 1);
        assert_eq!(engine.fitted, 0);
        // The acquisition trigger had already been sent at approval time.
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn test_peer_disconnect_mid_handshake_surfaces_channel_closed() {
        let lines = ["sessionA", FIRST_FRAME_READY];
        let (result, engine, _) = RecordingEngine::default().run_with(&lines, &config());

        match result {
            Err(BridgeError::ChannelClosed(_)) => {}
            other => panic!("expected ChannelClosed, got {:?}", other.map(|_| ())),
        }
        // Configuration ran on FirstFrameReady, but nothing irreversible.
        assert_eq!(engine.configured, 1);
        assert_eq!(engine.initialized, 0);
        assert_eq!(engine.fitted, 0);
    }
}
