//! Recording doubles shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use kwami::config::{AgentConfig, ArbitrationConfig};
use kwami::pipeline::offline::OfflineFactory;
use kwami::room::{DataTransport, Participant, ParticipantIdentity, Room};
use kwami::session::{RunningSession, Session, SessionStart};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Room whose roster the test controls.
pub struct RecordingRoom {
    me: ParticipantIdentity,
    roster: Mutex<Vec<Participant>>,
    disconnects: AtomicUsize,
}

impl RecordingRoom {
    pub fn new(me: &str, roster: Vec<Participant>) -> Arc<Self> {
        Arc::new(Self {
            me: ParticipantIdentity::from(me),
            roster: Mutex::new(roster),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn join(&self, participant: Participant) {
        self.roster.lock().expect("lock roster").push(participant);
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Room for RecordingRoom {
    fn local_identity(&self) -> ParticipantIdentity {
        self.me.clone()
    }

    fn participants(&self) -> Vec<Participant> {
        self.roster.lock().expect("lock roster").clone()
    }

    async fn disconnect(&self) -> kwami::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport that hands every published payload to the test.
pub struct RecordingTransport {
    published: mpsc::UnboundedSender<Vec<u8>>,
}

impl RecordingTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { published: tx }), rx)
    }
}

#[async_trait]
impl DataTransport for RecordingTransport {
    async fn publish(&self, payload: Vec<u8>, reliable: bool) -> kwami::Result<()> {
        assert!(reliable, "tool calls must be sent reliably");
        let _ = self.published.send(payload);
        Ok(())
    }
}

pub fn settings(grace_period_ms: u64) -> AgentConfig {
    AgentConfig {
        arbitration: ArbitrationConfig {
            grace_period_ms,
            recheck_before_reconfigure: true,
        },
        ..AgentConfig::default()
    }
}

pub async fn start(
    room: Arc<RecordingRoom>,
    factory: OfflineFactory,
    transport: Option<Arc<dyn DataTransport>>,
) -> RunningSession {
    match Session::new(settings(0), Arc::new(factory))
        .start(room, transport, None)
        .await
        .expect("start session")
    {
        SessionStart::Running(running) => running,
        SessionStart::Yielded { winner } => panic!("unexpected yield to {winner}"),
    }
}
