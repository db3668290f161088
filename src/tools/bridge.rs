//! Remote tool invocation over the data channel.
//!
//! Each call gets a fresh correlation id and a single-resolution slot. The
//! caller is suspended until the client answers with a matching
//! `tool_result` or the deadline passes. Pending entries are removed on
//! every exit path (resolution, timeout, publish failure, cancelled caller).

use crate::error::{KwamiError, Result};
use crate::protocol::OutboundMessage;
use crate::room::DataTransport;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Deadline for a client to answer a tool call.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

const NOT_CONNECTED: &str = "Error: Agent not connected to room";
const TIMED_OUT: &str = "Error: Tool execution timed out";

/// What the client sent back for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Result(String),
    ClientError(String),
}

impl ToolOutcome {
    fn into_text(self) -> String {
        match self {
            Self::Result(text) => text,
            Self::ClientError(e) => format!("Error from client: {e}"),
        }
    }
}

struct PendingToolCall {
    name: String,
    created_at: Instant,
    deadline: Instant,
    slot: oneshot::Sender<ToolOutcome>,
}

type PendingTable = Mutex<HashMap<String, PendingToolCall>>;

/// Removes a pending entry when the owning `invoke` returns or is dropped.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.remove(&self.id).is_some() {
            debug!(tool_call_id = %self.id, "removed unresolved tool call");
        }
    }
}

pub struct ToolCallBridge {
    pending: PendingTable,
    transport: RwLock<Option<Arc<dyn DataTransport>>>,
    timeout: Duration,
}

impl std::fmt::Debug for ToolCallBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallBridge")
            .field("pending", &self.pending_count())
            .field("connected", &self.is_connected())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolCallBridge {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            transport: RwLock::new(None),
            timeout,
        }
    }

    #[must_use]
    pub fn with_transport(timeout: Duration, transport: Arc<dyn DataTransport>) -> Self {
        let bridge = Self::new(timeout);
        bridge.attach_transport(transport);
        bridge
    }

    pub fn attach_transport(&self, transport: Arc<dyn DataTransport>) {
        *self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
    }

    pub fn detach_transport(&self) {
        *self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.current_transport().is_some()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of calls waiting for a client answer.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, PendingToolCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_transport(&self) -> Option<Arc<dyn DataTransport>> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invoke a client tool, always producing text for the model.
    ///
    /// Failures are rendered as `Error...` strings rather than returned.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> String {
        match self.try_invoke(name, arguments).await {
            Ok(text) => text,
            Err(KwamiError::Transport(ref reason)) if reason == NOT_CONNECTED => {
                NOT_CONNECTED.to_owned()
            }
            Err(KwamiError::ToolCallTimeout(_)) => TIMED_OUT.to_owned(),
            Err(e) => format!("Error executing tool: {e}"),
        }
    }

    /// Invoke a client tool and wait for its result.
    ///
    /// # Errors
    ///
    /// - [`KwamiError::Transport`] when no transport is attached or publishing fails.
    /// - [`KwamiError::ToolCallTimeout`] when the client does not answer in time.
    pub async fn try_invoke(&self, name: &str, arguments: &Value) -> Result<String> {
        let Some(transport) = self.current_transport() else {
            error!(tool = %name, "cannot call client tool: no transport");
            return Err(KwamiError::Transport(NOT_CONNECTED.to_owned()));
        };

        let id = Uuid::new_v4().to_string();
        let payload = OutboundMessage::tool_call(&id, name, arguments).encode()?;

        let (slot, result_rx) = oneshot::channel();
        let created_at = Instant::now();
        let deadline = created_at + self.timeout;
        self.table().insert(
            id.clone(),
            PendingToolCall {
                name: name.to_owned(),
                created_at,
                deadline,
                slot,
            },
        );
        let _guard = PendingGuard {
            table: &self.pending,
            id: id.clone(),
        };

        info!(tool = %name, tool_call_id = %id, "calling client tool");

        let exchange = async {
            transport.publish(payload, true).await?;
            result_rx.await.map_err(|_| {
                // The sweep drops the slot of an expired call.
                if Instant::now() >= deadline {
                    KwamiError::ToolCallTimeout(name.to_owned())
                } else {
                    KwamiError::Channel("tool result slot dropped".to_owned())
                }
            })
        };

        let result = tokio::time::timeout_at(deadline, exchange)
            .await
            .unwrap_or_else(|_| Err(KwamiError::ToolCallTimeout(name.to_owned())));
        match result {
            Ok(outcome) => Ok(outcome.into_text()),
            Err(e @ KwamiError::ToolCallTimeout(_)) => {
                warn!(tool = %name, tool_call_id = %id, "client tool call timed out");
                Err(e)
            }
            Err(e) => {
                error!(tool = %name, tool_call_id = %id, error = %e, "client tool call failed");
                Err(e)
            }
        }
    }

    /// Deliver a client answer. Returns `true` if a waiting call was resolved.
    ///
    /// Unknown or already-resolved ids are ignored.
    pub fn resolve(&self, id: &str, result: Option<String>, error: Option<String>) -> bool {
        let Some(call) = self.table().remove(id) else {
            debug!(tool_call_id = %id, "no pending tool call for result; ignoring");
            return false;
        };

        let outcome = match error {
            Some(e) if !e.is_empty() => ToolOutcome::ClientError(e),
            _ => ToolOutcome::Result(result.unwrap_or_default()),
        };

        let waited = call.created_at.elapsed();
        if call.slot.send(outcome).is_err() {
            debug!(tool = %call.name, tool_call_id = %id, "tool caller went away before result");
            return false;
        }
        info!(
            tool = %call.name,
            tool_call_id = %id,
            waited_ms = waited.as_millis() as u64,
            "client tool call resolved"
        );
        true
    }

    /// Drop entries whose deadline has passed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut table = self.table();
        let before = table.len();
        table.retain(|id, call| {
            let live = call.deadline > now;
            if !live {
                debug!(tool = %call.name, tool_call_id = %id, "sweeping expired tool call");
            }
            live
        });
        before - table.len()
    }
}
