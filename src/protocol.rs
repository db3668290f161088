//! Data-channel message codec.
//!
//! Inbound payloads are JSON objects tagged by `type`. Keys may arrive in
//! camelCase; [`normalize_keys`] rewrites the known ones to snake_case
//! before anything is decoded.

use crate::config::{KwamiConfig, MemoryConfig, PersonaConfig, VoiceConfig};
use crate::error::{KwamiError, Result};
use crate::persona::PersonaUpdate;
use crate::pipeline::diff::{LlmUpdate, VoiceUpdate};
use crate::room::ParticipantIdentity;
use crate::tools::registry::parse_definitions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// camelCase → snake_case renames applied at the boundary.
pub const KEY_MAP: &[(&str, &str)] = &[
    ("ttsProvider", "tts_provider"),
    ("ttsModel", "tts_model"),
    ("ttsVoice", "tts_voice"),
    ("ttsSpeed", "tts_speed"),
    ("llmProvider", "llm_provider"),
    ("llmModel", "llm_model"),
    ("llmTemperature", "llm_temperature"),
    ("maxTokens", "llm_max_tokens"),
    ("sttProvider", "stt_provider"),
    ("sttModel", "stt_model"),
    ("sttLanguage", "stt_language"),
    ("realtimeProvider", "realtime_provider"),
    ("realtimeModel", "realtime_model"),
    ("realtimeVoice", "realtime_voice"),
    ("realtimeModalities", "realtime_modalities"),
    ("systemPrompt", "system_prompt"),
    ("conversationStyle", "conversation_style"),
    ("responseLength", "response_length"),
    ("emotionalTone", "emotional_tone"),
    ("kwamiId", "kwami_id"),
    ("kwamiName", "kwami_name"),
    ("pipelineType", "pipeline_type"),
    ("toolCallId", "tool_call_id"),
    ("updateType", "update_type"),
    ("userId", "user_id"),
];

fn normalize_key(key: String) -> String {
    KEY_MAP
        .iter()
        .find(|(camel, _)| *camel == key)
        .map_or(key, |(_, snake)| (*snake).to_owned())
}

/// Rewrite known camelCase keys, recursing into nested objects.
///
/// Arrays are left untouched so client tool schemas keep their own keys.
#[must_use]
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (normalize_key(k), normalize_keys(v)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

// ── Inbound ──────────────────────────────────────────────────────

/// Full `config` message. Sections that are present replace the
/// corresponding defaults wholesale.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FullConfigMessage {
    pub kwami_id: Option<String>,
    pub kwami_name: Option<String>,
    pub persona: Option<PersonaConfig>,
    pub voice: Option<VoiceConfig>,
    pub memory: Option<MemoryConfig>,
    pub tools: Option<Vec<Value>>,
}

impl FullConfigMessage {
    /// Build a fresh config from `base` plus this message.
    ///
    /// The kwami id falls back to the user's participant identity; the memory
    /// user key is derived from the kwami id when not given.
    #[must_use]
    pub fn apply_to(&self, base: &KwamiConfig, user: Option<&ParticipantIdentity>) -> KwamiConfig {
        let mut config = base.clone();
        config.kwami_id = self
            .kwami_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| user.map(|u| u.as_str().to_owned()))
            .or(config.kwami_id);
        if let Some(name) = self.kwami_name.as_ref().filter(|n| !n.trim().is_empty()) {
            config.kwami_name.clone_from(name);
        }
        if let Some(persona) = &self.persona {
            config.persona = persona.clone();
        }
        if let Some(voice) = &self.voice {
            config.voice = voice.clone();
        }
        if let Some(memory) = &self.memory {
            config.memory = memory.clone();
        }
        if config.memory.user_id.is_none()
            && let Some(id) = &config.kwami_id
        {
            config.memory.user_id = Some(format!("kwami_{id}"));
        }
        if let Some(tools) = &self.tools {
            config.tools = parse_definitions(tools);
        }
        config
    }
}

/// A parsed reconfiguration delta.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconfigurationRequest {
    Voice(VoiceUpdate),
    Llm(LlmUpdate),
    Persona(PersonaUpdate),
    Full(Box<FullConfigMessage>),
}

impl ReconfigurationRequest {
    /// Scope label used in logs and events.
    #[must_use]
    pub fn scope(&self) -> &'static str {
        match self {
            Self::Voice(_) => "voice",
            Self::Llm(_) => "llm",
            Self::Persona(_) => "persona",
            Self::Full(_) => "full",
        }
    }
}

/// A decoded inbound data-channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Config(Box<FullConfigMessage>),
    ConfigUpdate(ReconfigurationRequest),
    ToolResult {
        tool_call_id: String,
        result: Option<String>,
        error: Option<String>,
    },
    /// A well-formed message of a type this core does not handle.
    Ignored(String),
}

#[derive(Deserialize)]
struct ConfigUpdateEnvelope {
    update_type: String,
    #[serde(default)]
    config: Value,
}

#[derive(Deserialize)]
struct ToolResultEnvelope {
    tool_call_id: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

fn malformed(context: &str, err: impl std::fmt::Display) -> KwamiError {
    KwamiError::MalformedMessage(format!("{context}: {err}"))
}

fn config_object(config: Value) -> Value {
    match config {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

/// Decode a raw data-channel payload.
///
/// # Errors
///
/// Returns [`KwamiError::MalformedMessage`] for payloads that are not JSON
/// objects, lack a `type`, or carry fields of the wrong shape.
pub fn decode(payload: &[u8]) -> Result<InboundMessage> {
    let raw: Value = serde_json::from_slice(payload).map_err(|e| malformed("invalid JSON", e))?;
    let value = normalize_keys(raw);
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| KwamiError::MalformedMessage("missing 'type'".to_owned()))?
        .to_owned();

    match kind.as_str() {
        "config" => {
            let message: FullConfigMessage =
                serde_json::from_value(value).map_err(|e| malformed("config", e))?;
            Ok(InboundMessage::Config(Box::new(message)))
        }
        "config_update" => {
            let envelope: ConfigUpdateEnvelope =
                serde_json::from_value(value).map_err(|e| malformed("config_update", e))?;
            let config = config_object(envelope.config);
            let request = match envelope.update_type.as_str() {
                "voice" => ReconfigurationRequest::Voice(
                    serde_json::from_value(config).map_err(|e| malformed("voice update", e))?,
                ),
                "llm" => ReconfigurationRequest::Llm(
                    serde_json::from_value(config).map_err(|e| malformed("llm update", e))?,
                ),
                "persona" => ReconfigurationRequest::Persona(
                    serde_json::from_value(config).map_err(|e| malformed("persona update", e))?,
                ),
                "full" => ReconfigurationRequest::Full(Box::new(
                    serde_json::from_value(config).map_err(|e| malformed("full update", e))?,
                )),
                other => {
                    return Err(KwamiError::MalformedMessage(format!(
                        "unknown update type '{other}'"
                    )));
                }
            };
            Ok(InboundMessage::ConfigUpdate(request))
        }
        "tool_result" => {
            let envelope: ToolResultEnvelope =
                serde_json::from_value(value).map_err(|e| malformed("tool_result", e))?;
            let result = envelope.result.and_then(|r| match r {
                Value::Null => None,
                Value::String(text) => Some(text),
                other => Some(other.to_string()),
            });
            Ok(InboundMessage::ToolResult {
                tool_call_id: envelope.tool_call_id,
                result,
                error: envelope.error,
            })
        }
        _ => Ok(InboundMessage::Ignored(kind)),
    }
}

// ── Outbound ─────────────────────────────────────────────────────

/// Function payload of an outbound tool call. Arguments are a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

/// Messages this core publishes to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        function: ToolCallFunction,
    },
}

impl OutboundMessage {
    #[must_use]
    pub fn tool_call(id: &str, name: &str, arguments: &Value) -> Self {
        Self::ToolCall {
            tool_call_id: id.to_owned(),
            function: ToolCallFunction {
                name: name.to_owned(),
                arguments: arguments.to_string(),
            },
        }
    }

    /// Serialize to the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`KwamiError::Transport`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| KwamiError::Transport(e.to_string()))
    }
}
