//! Built-in tools the language model can call on the agent itself.
//!
//! Tools that change the voice go through the session's reconfiguration
//! queue like any client request, so they are ordered with everything else.

use crate::pipeline::diff::VoiceUpdate;
use crate::protocol::ReconfigurationRequest;
use crate::provider::catalog::named_voice;
use crate::session::SessionHandle;
use crate::tools::ToolDefinition;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

/// Speed multipliers outside this range are clamped.
pub const SPEED_RANGE: (f64, f64) = (0.5, 2.0);

/// A tool executed inside the agent process.
#[async_trait]
pub trait VoiceTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema for the arguments.
    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    /// Run the tool. The returned text goes back to the language model.
    async fn execute(&self, session: &SessionHandle, args: &Value) -> String;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.schema(),
        }
    }
}

fn string_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub struct GetKwamiInfo;

#[async_trait]
impl VoiceTool for GetKwamiInfo {
    fn name(&self) -> &'static str {
        "get_kwami_info"
    }

    fn description(&self) -> &'static str {
        "Get information about this Kwami instance."
    }

    async fn execute(&self, session: &SessionHandle, _args: &Value) -> String {
        match session.snapshot().await {
            Ok(snapshot) => json!({
                "kwami_id": snapshot.config.kwami_id,
                "kwami_name": snapshot.config.kwami_name,
                "persona": {
                    "name": snapshot.config.persona.name,
                    "personality": snapshot.config.persona.personality,
                },
            })
            .to_string(),
            Err(e) => format!("Error executing tool: {e}"),
        }
    }
}

pub struct GetCurrentTime;

#[async_trait]
impl VoiceTool for GetCurrentTime {
    fn name(&self) -> &'static str {
        "get_current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current time. Useful when the user asks what time it is."
    }

    async fn execute(&self, _session: &SessionHandle, _args: &Value) -> String {
        chrono::Local::now()
            .format("%I:%M %p on %A, %B %d, %Y")
            .to_string()
    }
}

pub struct ChangeVoice;

#[async_trait]
impl VoiceTool for ChangeVoice {
    fn name(&self) -> &'static str {
        "change_voice"
    }

    fn description(&self) -> &'static str {
        "Change the TTS voice. Accepts a voice name like 'British Lady' or 'nova', or a provider voice ID."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "voice_name": {"type": "string", "description": "Name or ID of the voice"}
            },
            "required": ["voice_name"]
        })
    }

    async fn execute(&self, session: &SessionHandle, args: &Value) -> String {
        let Some(voice_name) = string_arg(args, "voice_name") else {
            return "Error: missing 'voice_name' argument".to_owned();
        };
        let voice = named_voice(voice_name).unwrap_or(voice_name);
        let request = ReconfigurationRequest::Voice(VoiceUpdate {
            tts_voice: Some(voice.to_owned()),
            ..VoiceUpdate::default()
        });
        match session.reconfigure(request).await {
            Ok(_) => {
                info!(voice = %voice_name, "voice changed by tool");
                format!("Voice changed to {voice_name}. I'm now speaking with a different voice!")
            }
            Err(e) => {
                warn!(voice = %voice_name, error = %e, "voice change failed");
                format!("Sorry, I couldn't change the voice: {e}")
            }
        }
    }
}

pub struct ChangeSpeakingSpeed;

#[async_trait]
impl VoiceTool for ChangeSpeakingSpeed {
    fn name(&self) -> &'static str {
        "change_speaking_speed"
    }

    fn description(&self) -> &'static str {
        "Change the speaking speed. 1.0 is normal, 0.5 is slow, 2.0 is fast."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "speed": {"type": "number", "minimum": SPEED_RANGE.0, "maximum": SPEED_RANGE.1}
            },
            "required": ["speed"]
        })
    }

    async fn execute(&self, session: &SessionHandle, args: &Value) -> String {
        let Some(requested) = args.get("speed").and_then(Value::as_f64) else {
            return "Error: missing 'speed' argument".to_owned();
        };
        let speed = requested.clamp(SPEED_RANGE.0, SPEED_RANGE.1);
        let request = ReconfigurationRequest::Voice(VoiceUpdate {
            tts_speed: Some(speed as f32),
            ..VoiceUpdate::default()
        });
        if let Err(e) = session.reconfigure(request).await {
            warn!(speed, error = %e, "speed change failed");
            return format!("Sorry, I couldn't change the speed: {e}");
        }
        info!(speed, "speaking speed changed by tool");
        if speed < 0.8 {
            format!("Speed set to {speed}. I'll speak more slowly now.")
        } else if speed > 1.2 {
            format!("Speed set to {speed}. I'll speak faster now.")
        } else {
            format!("Speed set to {speed}. Speaking at normal pace.")
        }
    }
}

const LANGUAGE_CONFIRMATIONS: &[(&str, &str)] = &[
    ("en", "Language changed to English. How can I help you?"),
    ("es", "Idioma cambiado a español. ¿Cómo puedo ayudarte?"),
    ("fr", "Langue changée en français. Comment puis-je vous aider?"),
    ("de", "Sprache auf Deutsch geändert. Wie kann ich Ihnen helfen?"),
    ("it", "Lingua cambiata in italiano. Come posso aiutarti?"),
    ("pt", "Idioma alterado para português. Como posso ajudá-lo?"),
    ("ja", "言語が日本語に変更されました。何かお手伝いできますか?"),
    ("ko", "언어가 한국어로 변경되었습니다. 무엇을 도와드릴까요?"),
    ("zh", "语言已更改为中文。我能帮你什么?"),
];

/// Localized confirmation for a language switch.
#[must_use]
pub fn language_confirmation(code: &str) -> String {
    LANGUAGE_CONFIRMATIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map_or_else(|| format!("Language changed to {code}."), |(_, text)| (*text).to_owned())
}

pub struct ChangeLanguage;

#[async_trait]
impl VoiceTool for ChangeLanguage {
    fn name(&self) -> &'static str {
        "change_language"
    }

    fn description(&self) -> &'static str {
        "Change the conversation language, e.g. 'en', 'es', 'fr', 'de', 'ja'."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "language": {"type": "string", "description": "Language code"}
            },
            "required": ["language"]
        })
    }

    async fn execute(&self, session: &SessionHandle, args: &Value) -> String {
        let Some(language) = string_arg(args, "language") else {
            return "Error: missing 'language' argument".to_owned();
        };
        let language = language.to_lowercase();
        let request = ReconfigurationRequest::Voice(VoiceUpdate {
            stt_language: Some(language.clone()),
            ..VoiceUpdate::default()
        });
        match session.reconfigure(request).await {
            Ok(_) => {
                info!(%language, "language changed by tool");
                language_confirmation(&language)
            }
            Err(e) => format!("Sorry, I couldn't change the language: {e}"),
        }
    }
}

pub struct GetCurrentVoiceSettings;

#[async_trait]
impl VoiceTool for GetCurrentVoiceSettings {
    fn name(&self) -> &'static str {
        "get_current_voice_settings"
    }

    fn description(&self) -> &'static str {
        "Get the current voice pipeline settings."
    }

    async fn execute(&self, session: &SessionHandle, _args: &Value) -> String {
        let snapshot = match session.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => return format!("Error executing tool: {e}"),
        };
        let voice = &snapshot.config.voice;
        json!({
            "tts_provider": voice.tts.provider,
            "tts_model": voice.tts.model,
            "tts_voice": voice.tts.voice,
            "tts_speed": voice.tts.speed,
            "stt_provider": voice.stt.provider,
            "stt_model": voice.stt.model,
            "stt_language": voice.stt.language,
            "llm_provider": voice.llm.provider,
            "llm_model": voice.llm.model,
            "llm_temperature": voice.llm.temperature,
        })
        .to_string()
    }
}

/// The agent's built-in tools, looked up by name.
pub struct BuiltinTools {
    tools: Vec<Box<dyn VoiceTool>>,
}

impl Default for BuiltinTools {
    fn default() -> Self {
        Self {
            tools: vec![
                Box::new(GetKwamiInfo),
                Box::new(GetCurrentTime),
                Box::new(ChangeVoice),
                Box::new(ChangeSpeakingSpeed),
                Box::new(ChangeLanguage),
                Box::new(GetCurrentVoiceSettings),
            ],
        }
    }
}

impl std::fmt::Debug for BuiltinTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl BuiltinTools {
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Run a built-in tool, or fall through to the client's tools.
    pub async fn call(&self, session: &SessionHandle, name: &str, args: &Value) -> String {
        match self.tools.iter().find(|t| t.name() == name) {
            Some(tool) => tool.execute(session, args).await,
            None => session.call_client_tool(name, args).await,
        }
    }
}
