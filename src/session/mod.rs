//! The per-session actor.
//!
//! Every mutation of a session's config, pipeline and agent happens on one
//! tokio task that drains a bounded command queue in arrival order. Data
//! channel payloads, reconfiguration requests and transcript turns are all
//! funnelled through it, so two reconfigurations (or a reconfiguration and a
//! tool result) never interleave.
//!
//! Tool calls are the exception: a caller waiting on the client talks to the
//! [`ToolCallBridge`] directly and never occupies the actor, while the
//! matching `tool_result` is resolved by the actor as soon as it is dequeued.

pub mod arbiter;

use crate::agent::VoiceAgent;
use crate::config::{AgentConfig, KwamiConfig};
use crate::error::{KwamiError, Result};
use crate::memory::{ConversationContext, MemoryHandle, Role};
use crate::pipeline::coordinator::{ReconfigurationCoordinator, ReconfigurationOutcome};
use crate::pipeline::factory::{ComponentFactory, StageBuilder};
use crate::protocol::{FullConfigMessage, InboundMessage, ReconfigurationRequest, decode};
use crate::provider::ProviderIdentityResolver;
use crate::room::{DataTransport, ParticipantIdentity, Room, user_identity};
use crate::tools::{ClientToolSet, ToolCallBridge};
use arbiter::{ArbitrationOutcome, DuplicateSessionArbiter};
use serde::Serialize;
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often expired tool calls are swept from the bridge.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Spoken when a reconfiguration could not be applied at all.
pub const RECONFIGURE_FAILED_REPLY: &str = "Sorry, I couldn't apply that change.";

/// State owned exclusively by the session actor.
#[derive(Debug)]
pub struct SessionContext {
    /// The live agent. Replaced wholesale on rebuild.
    pub agent: VoiceAgent,
    /// The human participant, once known.
    pub user: Option<ParticipantIdentity>,
}

impl SessionContext {
    #[must_use]
    pub fn new(agent: VoiceAgent, user: Option<ParticipantIdentity>) -> Self {
        Self { agent, user }
    }
}

/// Events published by a running session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Instruction for the opening turn of a fresh agent.
    Greeting { instruction: String },
    /// Text the agent should speak verbatim.
    Say { text: String },
    PipelineInstalled { generation: u64, pipeline: String },
    InstructionsUpdated { instructions: String },
    ReconfigurationFailed { scope: String, error: String },
    ArbitrationLost { winner: String },
    Closed,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub config: KwamiConfig,
    pub generation: u64,
    pub pipeline: String,
    pub instructions: String,
    pub turns: usize,
    pub pending_tool_calls: usize,
}

enum SessionCommand {
    Inbound(Vec<u8>),
    Reconfigure {
        request: ReconfigurationRequest,
        reply: oneshot::Sender<Result<ReconfigurationOutcome>>,
    },
    RecordTurn {
        role: Role,
        content: String,
    },
    ClientTools(oneshot::Sender<ClientToolSet>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Close,
}

/// Cloneable client for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    bridge: Arc<ToolCallBridge>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| KwamiError::SessionClosed)
    }

    /// Queue a raw data-channel payload.
    pub async fn deliver(&self, payload: Vec<u8>) -> Result<()> {
        self.send(SessionCommand::Inbound(payload)).await
    }

    /// Apply a reconfiguration and wait for its outcome.
    pub async fn reconfigure(
        &self,
        request: ReconfigurationRequest,
    ) -> Result<ReconfigurationOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Reconfigure { request, reply })
            .await?;
        rx.await
            .map_err(|e| KwamiError::Channel(format!("reconfiguration reply dropped: {e}")))?
    }

    /// Record a completed conversational turn.
    pub async fn record_turn(&self, role: Role, content: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::RecordTurn {
            role,
            content: content.into(),
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(reply)).await?;
        rx.await
            .map_err(|e| KwamiError::Channel(format!("snapshot reply dropped: {e}")))
    }

    /// Call a client tool by name. Unregistered names are refused.
    pub async fn call_client_tool(&self, name: &str, arguments: &Value) -> String {
        let (reply, rx) = oneshot::channel();
        if self.send(SessionCommand::ClientTools(reply)).await.is_err() {
            return "Error: session closed".to_owned();
        }
        match rx.await {
            Ok(tools) => tools.call(&self.bridge, name, arguments).await,
            Err(_) => "Error: session closed".to_owned(),
        }
    }

    /// Call a client tool without checking the registry.
    pub async fn invoke_tool(&self, name: &str, arguments: &Value) -> String {
        self.bridge.invoke(name, arguments).await
    }

    #[must_use]
    pub fn bridge(&self) -> &Arc<ToolCallBridge> {
        &self.bridge
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// End the session after every command already queued has run.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Close).await
    }

    /// End the session now. Queued commands are dropped.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A session that won arbitration and is running.
#[derive(Debug)]
pub struct RunningSession {
    pub handle: SessionHandle,
    /// Greeting instruction for the opening turn.
    pub greeting: Option<&'static str>,
    /// Completes after the actor has shut down.
    pub task: JoinHandle<()>,
}

#[derive(Debug)]
pub enum SessionStart {
    Running(RunningSession),
    /// Another agent owns this session; the room has been left.
    Yielded { winner: ParticipantIdentity },
}

/// Builds and starts sessions from process settings.
#[derive(Debug, Clone)]
pub struct Session {
    settings: AgentConfig,
    builder: StageBuilder,
}

impl Session {
    #[must_use]
    pub fn new(settings: AgentConfig, factory: Arc<dyn ComponentFactory>) -> Self {
        let builder = StageBuilder::new(factory, settings.fallback.clone());
        Self { settings, builder }
    }

    #[must_use]
    pub fn settings(&self) -> &AgentConfig {
        &self.settings
    }

    /// Arbitrate, build the initial pipeline and spawn the session actor.
    ///
    /// # Errors
    ///
    /// Fails if the room cannot be left after losing arbitration, or if the
    /// initial pipeline cannot be built even with fallback providers.
    pub async fn start(
        self,
        room: Arc<dyn Room>,
        transport: Option<Arc<dyn DataTransport>>,
        memory: Option<MemoryHandle>,
    ) -> Result<SessionStart> {
        let arbiter = DuplicateSessionArbiter::from_config(&self.settings.arbitration);
        if let ArbitrationOutcome::Yield { winner } = arbiter.arbitrate(room.as_ref()).await? {
            return Ok(SessionStart::Yielded { winner });
        }

        let user = user_identity(&room.participants());
        let mut config = FullConfigMessage::default().apply_to(&self.settings.defaults, user.as_ref());
        let vad = self.builder.vad().await?;
        let instructions = crate::persona::build_instructions(&config.persona, None);
        let (handles, effective) = self
            .builder
            .build(&config.voice, vad, &instructions, 0)
            .await?;
        config.voice = effective;

        let mut agent = VoiceAgent::new(config, handles, memory, ConversationContext::new());
        let greeting = agent.enter().await;

        let bridge = Arc::new(ToolCallBridge::new(self.settings.tools.timeout()));
        if let Some(transport) = transport {
            bridge.attach_transport(transport);
        }

        let (command_tx, command_rx) = mpsc::channel(self.settings.session.queue_capacity.max(1));
        let (event_tx, _event_rx) = broadcast::channel(self.settings.session.event_capacity.max(1));
        let cancel = CancellationToken::new();

        info!(
            me = %room.local_identity(),
            user = user.as_ref().map_or("-", ParticipantIdentity::as_str),
            pipeline = %agent.pipeline().describe(),
            "session started"
        );

        let actor = SessionActor {
            ctx: SessionContext::new(agent, user),
            coordinator: ReconfigurationCoordinator::new(
                self.builder,
                ProviderIdentityResolver::new(self.settings.resolver.clone()),
                self.settings.defaults.clone(),
            ),
            arbiter,
            recheck: self.settings.arbitration.recheck_before_reconfigure,
            room,
            bridge: Arc::clone(&bridge),
            commands: command_rx,
            events: event_tx.clone(),
            cancel: cancel.clone(),
            yielded: false,
        };
        let task = tokio::spawn(actor.run());

        Ok(SessionStart::Running(RunningSession {
            handle: SessionHandle {
                commands: command_tx,
                events: event_tx,
                bridge,
                cancel,
            },
            greeting,
            task,
        }))
    }
}

struct SessionActor {
    ctx: SessionContext,
    coordinator: ReconfigurationCoordinator,
    arbiter: DuplicateSessionArbiter,
    recheck: bool,
    room: Arc<dyn Room>,
    bridge: Arc<ToolCallBridge>,
    commands: mpsc::Receiver<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    yielded: bool,
}

impl SessionActor {
    async fn run(mut self) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if self.handle(command).await.is_break() {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    let swept = self.bridge.sweep_expired();
                    if swept > 0 {
                        debug!(swept, "swept expired tool calls");
                    }
                }
            }
        }

        self.shutdown().await;
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn handle(&mut self, command: SessionCommand) -> ControlFlow<()> {
        match command {
            SessionCommand::Inbound(payload) => return self.dispatch(&payload).await,
            SessionCommand::Reconfigure { request, reply } => {
                let result = self.reconfigure(request).await;
                let _ = reply.send(result);
            }
            SessionCommand::RecordTurn { role, content } => {
                self.ctx.agent.record_turn(role, &content).await;
            }
            SessionCommand::ClientTools(reply) => {
                let _ = reply.send(self.ctx.agent.tools().clone());
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Close => return ControlFlow::Break(()),
        }
        if self.yielded {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let agent = &self.ctx.agent;
        SessionSnapshot {
            config: agent.config().clone(),
            generation: agent.pipeline().generation,
            pipeline: agent.pipeline().describe(),
            instructions: agent.instructions().to_owned(),
            turns: agent.conversation().len(),
            pending_tool_calls: self.bridge.pending_count(),
        }
    }

    /// Route one data-channel payload. Malformed payloads are dropped.
    async fn dispatch(&mut self, payload: &[u8]) -> ControlFlow<()> {
        let message = match decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "dropping malformed data message");
                return ControlFlow::Continue(());
            }
        };

        match message {
            InboundMessage::Config(message) => {
                let _ = self.reconfigure(ReconfigurationRequest::Full(message)).await;
            }
            InboundMessage::ConfigUpdate(request) => {
                let _ = self.reconfigure(request).await;
            }
            InboundMessage::ToolResult {
                tool_call_id,
                result,
                error,
            } => {
                self.bridge.resolve(&tool_call_id, result, error);
            }
            InboundMessage::Ignored(kind) => debug!(%kind, "ignoring data message"),
        }

        if self.yielded {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    async fn reconfigure(
        &mut self,
        request: ReconfigurationRequest,
    ) -> Result<ReconfigurationOutcome> {
        let scope = request.scope();
        if self.recheck {
            match self.arbiter.recheck(self.room.as_ref()).await {
                Ok(ArbitrationOutcome::Proceed) => {}
                Ok(ArbitrationOutcome::Yield { winner }) => {
                    self.yielded = true;
                    self.coordinator.close();
                    self.emit(SessionEvent::ArbitrationLost {
                        winner: winner.to_string(),
                    });
                    self.cancel.cancel();
                    return Err(KwamiError::ArbitrationLoss {
                        winner: winner.to_string(),
                    });
                }
                Err(e) => warn!(scope, error = %e, "arbitration recheck failed; continuing"),
            }
        }

        let generation = self.ctx.agent.pipeline().generation;
        match self.coordinator.apply(&mut self.ctx, request).await {
            Ok(outcome) => {
                let agent = &self.ctx.agent;
                if agent.pipeline().generation != generation {
                    self.emit(SessionEvent::PipelineInstalled {
                        generation: agent.pipeline().generation,
                        pipeline: agent.pipeline().describe(),
                    });
                }
                if outcome.instructions_changed {
                    self.emit(SessionEvent::InstructionsUpdated {
                        instructions: agent.instructions().to_owned(),
                    });
                }
                if let Some(text) = &outcome.confirmation {
                    self.emit(SessionEvent::Say { text: text.clone() });
                }
                Ok(outcome)
            }
            Err(e) => {
                self.emit(SessionEvent::ReconfigurationFailed {
                    scope: scope.to_owned(),
                    error: e.to_string(),
                });
                if matches!(e, KwamiError::OptionUpdateUnsupported(_)) {
                    self.emit(SessionEvent::Say {
                        text: RECONFIGURE_FAILED_REPLY.to_owned(),
                    });
                }
                Err(e)
            }
        }
    }

    async fn shutdown(mut self) {
        self.cancel.cancel();
        self.coordinator.close();
        self.bridge.detach_transport();
        self.commands.close();
        if !self.yielded
            && let Err(e) = self.room.disconnect().await
        {
            error!(error = %e, "failed to leave room");
        }
        info!(
            generation = self.ctx.agent.pipeline().generation,
            turns = self.ctx.agent.conversation().len(),
            "session closed"
        );
        self.emit(SessionEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::ArbitrationConfig;
    use crate::pipeline::diff::{LlmUpdate, Stage};
    use crate::pipeline::offline::OfflineFactory;
    use crate::room::Participant;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestRoom {
        me: ParticipantIdentity,
        roster: Mutex<Vec<Participant>>,
        disconnects: AtomicUsize,
    }

    impl TestRoom {
        fn new(me: &str, roster: Vec<Participant>) -> Arc<Self> {
            Arc::new(Self {
                me: ParticipantIdentity::from(me),
                roster: Mutex::new(roster),
                disconnects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Room for TestRoom {
        fn local_identity(&self) -> ParticipantIdentity {
            self.me.clone()
        }

        fn participants(&self) -> Vec<Participant> {
            self.roster.lock().unwrap().clone()
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings() -> AgentConfig {
        AgentConfig {
            arbitration: ArbitrationConfig {
                grace_period_ms: 0,
                recheck_before_reconfigure: true,
            },
            ..AgentConfig::default()
        }
    }

    async fn running(room: Arc<TestRoom>, factory: OfflineFactory) -> RunningSession {
        match Session::new(settings(), Arc::new(factory))
            .start(room, None, None)
            .await
            .unwrap()
        {
            SessionStart::Running(session) => session,
            SessionStart::Yielded { winner } => panic!("yielded to {winner}"),
        }
    }

    #[tokio::test]
    async fn start_greets_and_derives_identity() {
        let room = TestRoom::new("agent-a", vec![Participant::user("alice")]);
        let session = running(room, OfflineFactory::new()).await;
        assert!(session.greeting.is_some());

        let snapshot = session.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.config.kwami_id.as_deref(), Some("alice"));
        assert_eq!(snapshot.config.memory.user_id.as_deref(), Some("kwami_alice"));
        assert_eq!(snapshot.generation, 0);
    }

    #[tokio::test]
    async fn losing_start_arbitration_yields() {
        let room = TestRoom::new("agent-b", vec![Participant::agent("agent-a")]);
        let start = Session::new(settings(), Arc::new(OfflineFactory::new()))
            .start(room.clone(), None, None)
            .await
            .unwrap();
        assert!(matches!(start, SessionStart::Yielded { ref winner } if winner.as_str() == "agent-a"));
        assert_eq!(room.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn requests_apply_in_arrival_order() {
        let room = TestRoom::new("agent-a", vec![]);
        let factory = OfflineFactory::new();
        let session = running(room, factory.clone()).await;
        let handle = session.handle.clone();

        let first = br#"{"type":"config_update","updateType":"llm","config":{"model":"gpt-4o"}}"#;
        let second = br#"{"type":"config_update","updateType":"llm","config":{"llmModel":"gpt-4.1"}}"#;
        handle.deliver(first.to_vec()).await.unwrap();
        handle.deliver(second.to_vec()).await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.config.voice.llm.model, "gpt-4.1");
        assert_eq!(snapshot.generation, 2);
        assert_eq!(factory.build_count(Stage::Llm), 3);
    }

    #[tokio::test]
    async fn malformed_payload_does_not_end_session() {
        let room = TestRoom::new("agent-a", vec![]);
        let session = running(room, OfflineFactory::new()).await;
        session.handle.deliver(b"not json".to_vec()).await.unwrap();
        session.handle.deliver(br#"{"type":"ping"}"#.to_vec()).await.unwrap();
        assert!(session.handle.snapshot().await.is_ok());
    }

    #[tokio::test]
    async fn reconfigure_reports_confirmation_event() {
        let room = TestRoom::new("agent-a", vec![]);
        let session = running(room, OfflineFactory::new()).await;
        let mut events = session.handle.subscribe();

        let outcome = session
            .handle
            .reconfigure(ReconfigurationRequest::Llm(LlmUpdate {
                model: Some("gpt-4o".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_eq!(outcome.generation, 1);

        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::PipelineInstalled { generation: 1, .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Say {
                text: "Now using gpt-4o.".into()
            }
        );
    }

    #[tokio::test]
    async fn late_rival_ends_session_on_next_reconfiguration() {
        let room = TestRoom::new("agent-b", vec![]);
        let session = running(room.clone(), OfflineFactory::new()).await;
        room.roster.lock().unwrap().push(Participant::agent("agent-a"));

        let err = session
            .handle
            .reconfigure(ReconfigurationRequest::Llm(LlmUpdate {
                model: Some("gpt-4o".into()),
                ..Default::default()
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, KwamiError::ArbitrationLoss { .. }));

        session.task.await.unwrap();
        assert!(session.handle.is_closed());
        assert_eq!(room.disconnects.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.handle.snapshot().await,
            Err(KwamiError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn shutdown_drains_queue_first() {
        let room = TestRoom::new("agent-a", vec![]);
        let session = running(room, OfflineFactory::new()).await;
        let mut events = session.handle.subscribe();
        session
            .handle
            .deliver(br#"{"type":"config_update","updateType":"persona","config":{"name":"Nova"}}"#.to_vec())
            .await
            .unwrap();
        session.handle.shutdown().await.unwrap();
        session.task.await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::InstructionsUpdated { .. }
        ));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Closed);
    }

    #[tokio::test]
    async fn close_leaves_room() {
        let room = TestRoom::new("agent-a", vec![]);
        let session = running(room.clone(), OfflineFactory::new()).await;
        session.handle.close();
        session.task.await.unwrap();
        assert_eq!(room.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tool_call_without_transport_fails_fast() {
        let room = TestRoom::new("agent-a", vec![]);
        let session = running(room, OfflineFactory::new()).await;
        let text = session
            .handle
            .invoke_tool("get_time", &serde_json::json!({}))
            .await;
        assert_eq!(text, "Error: Agent not connected to room");
        assert_eq!(session.handle.bridge().pending_count(), 0);
        assert_eq!(
            session.handle.call_client_tool("nope", &serde_json::json!({})).await,
            "Error: unknown tool 'nope'"
        );
    }
}
