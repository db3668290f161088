//! Stdin/stdout JSON host for a single session.
//!
//! Reads newline-delimited data-channel messages from stdin and feeds them to
//! the session. Outbound `tool_call` messages and session events are written
//! as newline-delimited JSON to stdout.
//!
//! Two host-only line types drive the agent side of the conversation:
//!
//! - `{"type":"transcript","role":"user"|"assistant","content":"..."}`
//!   records a completed turn.
//! - `{"type":"model_tool_call","name":"...","arguments":{...}}` runs a
//!   built-in or client tool as if the language model had called it.
//!
//! Stdout is reserved for the JSON protocol; diagnostics go to stderr.

use crate::agent::tools::BuiltinTools;
use crate::config::AgentConfig;
use crate::error::{KwamiError, Result};
use crate::memory::{InMemoryStore, MemoryHandle, Role};
use crate::pipeline::offline::OfflineFactory;
use crate::room::{DataTransport, Participant, ParticipantIdentity, Room};
use crate::session::{Session, SessionEvent, SessionHandle, SessionStart};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;

/// Environment variable naming the local agent identity.
pub const AGENT_IDENTITY_ENV: &str = "KWAMI_AGENT_IDENTITY";

/// Identity of the simulated human participant.
const STDIO_USER: &str = "stdio-user";

/// Turns kept by the in-process memory store.
const MEMORY_TURNS: usize = 50;

/// Serialized writer of JSON lines.
pub struct JsonLines<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLines<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Write one line and flush.
    pub async fn write_line(&self, line: &[u8]) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.write_all(line)
            .await
            .map_err(|e| KwamiError::Transport(format!("failed to write to stdout: {e}")))?;
        w.write_all(b"\n")
            .await
            .map_err(|e| KwamiError::Transport(format!("failed to write newline: {e}")))?;
        w.flush()
            .await
            .map_err(|e| KwamiError::Transport(format!("failed to flush stdout: {e}")))?;
        Ok(())
    }

    pub async fn write_json(&self, value: &impl serde::Serialize) -> Result<()> {
        let line = serde_json::to_vec(value)
            .map_err(|e| KwamiError::Pipeline(format!("failed to serialize output line: {e}")))?;
        self.write_line(&line).await
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Publishes outbound data-channel messages as stdout lines.
struct LineTransport<W> {
    out: Arc<JsonLines<W>>,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> DataTransport for LineTransport<W> {
    async fn publish(&self, payload: Vec<u8>, _reliable: bool) -> Result<()> {
        self.out.write_line(&payload).await
    }
}

/// A room with this agent and one simulated user.
struct StdioRoom {
    me: ParticipantIdentity,
    left: AtomicBool,
}

#[async_trait]
impl Room for StdioRoom {
    fn local_identity(&self) -> ParticipantIdentity {
        self.me.clone()
    }

    fn participants(&self) -> Vec<Participant> {
        vec![Participant::user(STDIO_USER)]
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.left.swap(true, Ordering::SeqCst) {
            tracing::info!(me = %self.me, "left stdio room");
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostLine {
    Transcript {
        role: Role,
        content: String,
    },
    ModelToolCall {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
}

/// Run the stdio host until stdin closes.
pub async fn run_stdio_host(settings: AgentConfig) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    let out = Arc::new(JsonLines::new(tokio::io::stdout()));
    serve(settings, input, out).await
}

/// Drive one session from `input`, writing every output line to `out`.
pub async fn serve<R, W>(settings: AgentConfig, mut input: R, out: Arc<JsonLines<W>>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let identity = std::env::var(AGENT_IDENTITY_ENV).unwrap_or_else(|_| "kwami-agent".to_owned());
    let room = Arc::new(StdioRoom {
        me: ParticipantIdentity::new(identity),
        left: AtomicBool::new(false),
    });
    let transport = Arc::new(LineTransport {
        out: Arc::clone(&out),
    });
    let memory: Option<MemoryHandle> = settings.defaults.memory.enabled.then(|| {
        let user = settings
            .defaults
            .memory
            .user_id
            .clone()
            .unwrap_or_else(|| format!("kwami_{STDIO_USER}"));
        Arc::new(InMemoryStore::new(user, MEMORY_TURNS)) as MemoryHandle
    });

    let session = Session::new(settings, Arc::new(OfflineFactory::new()));
    let running = match session.start(room, Some(transport), memory).await? {
        SessionStart::Running(running) => running,
        SessionStart::Yielded { winner } => {
            tracing::info!(%winner, "another agent owns the session; exiting");
            out.write_json(&SessionEvent::ArbitrationLost {
                winner: winner.to_string(),
            })
            .await?;
            return Ok(());
        }
    };

    let handle = running.handle.clone();
    if let Some(instruction) = running.greeting {
        out.write_json(&SessionEvent::Greeting {
            instruction: instruction.to_owned(),
        })
        .await?;
    }

    let forwarder = tokio::spawn(forward_events(handle.subscribe(), Arc::clone(&out)));
    let tools = Arc::new(BuiltinTools::default());

    let mut line = String::new();
    loop {
        line.clear();
        let read = input
            .read_line(&mut line)
            .await
            .map_err(|e| KwamiError::Channel(format!("failed to read from stdin: {e}")))?;
        if read == 0 {
            tracing::info!("stdin closed (EOF); shutting down stdio host");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if dispatch_line(trimmed, &handle, &tools, &out).await.is_err() {
            tracing::warn!("session ended; stopping stdio host");
            break;
        }
    }

    // Let queued lines finish before the session ends.
    if handle.shutdown().await.is_err() {
        handle.close();
    }
    let _ = running.task.await;
    let _ = forwarder.await;
    Ok(())
}

async fn dispatch_line<W>(
    line: &str,
    handle: &SessionHandle,
    tools: &Arc<BuiltinTools>,
    out: &Arc<JsonLines<W>>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    match serde_json::from_str::<HostLine>(line) {
        Ok(HostLine::Transcript { role, content }) => handle.record_turn(role, content).await,
        Ok(HostLine::ModelToolCall { name, arguments }) => {
            // Tool calls may wait on a client answer that arrives on a later line.
            let handle = handle.clone();
            let tools = Arc::clone(tools);
            let out = Arc::clone(out);
            tokio::spawn(async move {
                let output = tools.call(&handle, &name, &arguments).await;
                let line = json!({"event": "tool_output", "name": name, "output": output});
                if let Err(e) = out.write_json(&line).await {
                    tracing::warn!(error = %e, "failed to write tool output");
                }
            });
            Ok(())
        }
        Err(_) => handle.deliver(line.as_bytes().to_vec()).await,
    }
}

async fn forward_events<W>(
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    out: Arc<JsonLines<W>>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        match events.recv().await {
            Ok(event) => {
                let closed = event == SessionEvent::Closed;
                if let Err(e) = out.write_json(&event).await {
                    tracing::warn!(error = %e, "failed to write session event; stopping forwarder");
                    break;
                }
                if closed {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::ArbitrationConfig;

    fn settings() -> AgentConfig {
        AgentConfig {
            arbitration: ArbitrationConfig {
                grace_period_ms: 0,
                recheck_before_reconfigure: true,
            },
            ..AgentConfig::default()
        }
    }

    async fn run(input: &str) -> Vec<Value> {
        let out = Arc::new(JsonLines::new(Vec::<u8>::new()));
        serve(settings(), input.as_bytes(), Arc::clone(&out)).await.unwrap();
        let bytes = Arc::try_unwrap(out).ok().unwrap().into_inner();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn greets_then_closes_on_eof() {
        let lines = run("").await;
        assert_eq!(lines.first().unwrap()["event"], "greeting");
        assert_eq!(lines.last().unwrap()["event"], "closed");
    }

    #[tokio::test]
    async fn voice_update_emits_confirmation() {
        let input = concat!(
            r#"{"type":"config_update","updateType":"voice","config":{"ttsVoice":"shimmer"}}"#,
            "\n",
            "garbage\n",
        );
        let lines = run(input).await;
        assert!(
            lines
                .iter()
                .any(|l| l["event"] == "say" && l["text"] == "Voice updated!")
        );
        assert_eq!(lines.last().unwrap()["event"], "closed");
    }
}
