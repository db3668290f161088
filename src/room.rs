//! Room and data-channel collaborators.
//!
//! Network transport and participant management are owned by the embedding
//! runtime. The session core only needs to read the roster, leave the room,
//! and publish data-channel payloads.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Opaque participant identifier, compared only by total order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantIdentity(String);

impl ParticipantIdentity {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantIdentity {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for ParticipantIdentity {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ParticipantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantKind {
    Agent,
    Standard,
}

/// A remote participant as seen in the room roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identity: ParticipantIdentity,
    pub kind: ParticipantKind,
    pub connected: bool,
}

impl Participant {
    #[must_use]
    pub fn agent(identity: impl Into<String>) -> Self {
        Self {
            identity: ParticipantIdentity::new(identity),
            kind: ParticipantKind::Agent,
            connected: true,
        }
    }

    #[must_use]
    pub fn user(identity: impl Into<String>) -> Self {
        Self {
            identity: ParticipantIdentity::new(identity),
            kind: ParticipantKind::Standard,
            connected: true,
        }
    }

    #[must_use]
    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    #[must_use]
    pub fn is_agent(&self) -> bool {
        self.kind == ParticipantKind::Agent
    }
}

/// The room this session's agent has joined.
#[async_trait]
pub trait Room: Send + Sync + 'static {
    /// Identity of the local (this process's) participant.
    fn local_identity(&self) -> ParticipantIdentity;

    /// Snapshot of the remote participants.
    fn participants(&self) -> Vec<Participant>;

    /// Leave the room.
    async fn disconnect(&self) -> Result<()>;
}

/// Outbound data channel.
#[async_trait]
pub trait DataTransport: Send + Sync + 'static {
    /// Publish a payload to the room. Resolves once the send is acknowledged.
    async fn publish(&self, payload: Vec<u8>, reliable: bool) -> Result<()>;
}

/// Pick the first non-agent participant as the user identity.
#[must_use]
pub fn user_identity(participants: &[Participant]) -> Option<ParticipantIdentity> {
    participants
        .iter()
        .find(|p| !p.is_agent())
        .map(|p| p.identity.clone())
}
