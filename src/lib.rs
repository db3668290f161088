//! Kwami: live-reconfigurable voice session core.
//!
//! One session binds a voice agent to a room. While the conversation runs,
//! the client can change the recognition, language model, synthesis or
//! persona settings over the data channel; each change is applied with the
//! least disruptive strategy available.
//!
//! # Architecture
//!
//! - **Session actor** ([`session`]): serializes every inbound message and
//!   reconfiguration for one session.
//! - **Arbitration** ([`session::arbiter`]): a single winner among agent
//!   instances racing for the same room.
//! - **Reconfiguration** ([`pipeline`]): per-stage diff, in-place patch or
//!   partial rebuild, atomic swap of the live agent.
//! - **Provider identity** ([`provider`]): infers the synthesis provider from
//!   model and voice tokens.
//! - **Tool bridge** ([`tools`]): forwards model tool calls to the client and
//!   waits for correlated results.

pub mod agent;
pub mod config;
pub mod error;
pub mod host;
pub mod memory;
pub mod persona;
pub mod pipeline;
pub mod protocol;
pub mod provider;
pub mod room;
pub mod session;
pub mod tools;

pub use config::{AgentConfig, KwamiConfig};
pub use error::{KwamiError, Result};
pub use pipeline::coordinator::{ReconfigurationCoordinator, ReconfigurationOutcome};
pub use provider::{ProviderIdentityResolver, ProviderKind};
pub use session::{Session, SessionEvent, SessionHandle, SessionStart};
pub use tools::ToolCallBridge;
