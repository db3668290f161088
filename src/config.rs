//! Configuration types for a kwami voice session.
//!
//! Two layers live here:
//!
//! - [`KwamiConfig`]: the per-session aggregate (identity, persona, voice
//!   pipeline, memory, client tools). It starts from defaults and is replaced
//!   wholesale or field-wise as the client reconfigures the session.
//! - [`AgentConfig`]: process-level settings loaded from TOML (arbitration,
//!   tool-call timeout, fallback providers, resolver table, session defaults).

use crate::provider::{ProviderKind, ResolverTable};
use crate::tools::ToolDefinition;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the settings file location.
pub const CONFIG_PATH_ENV: &str = "KWAMI_CONFIG";

/// Aggregate configuration for one live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KwamiConfig {
    /// Opaque instance id, also used to key memory.
    pub kwami_id: Option<String>,
    /// Display name of the instance.
    pub kwami_name: String,
    pub persona: PersonaConfig,
    pub voice: VoiceConfig,
    pub memory: MemoryConfig,
    /// Client-executed tool schemas.
    pub tools: Vec<ToolDefinition>,
}

impl Default for KwamiConfig {
    fn default() -> Self {
        Self {
            kwami_id: None,
            kwami_name: "Kwami".to_owned(),
            persona: PersonaConfig::default(),
            voice: VoiceConfig::default(),
            memory: MemoryConfig::default(),
            tools: Vec::new(),
        }
    }
}

/// Expected response length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLength {
    Short,
    #[default]
    Medium,
    Long,
    #[serde(other)]
    Unspecified,
}

/// Emotional tone class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalTone {
    Neutral,
    #[default]
    Warm,
    Enthusiastic,
    Calm,
    #[serde(other)]
    Unspecified,
}

/// Persona used to build the agent's instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub name: String,
    pub personality: String,
    /// Distinct traits in first-seen order; compared case-insensitively.
    #[serde(deserialize_with = "distinct_traits")]
    pub traits: Vec<String>,
    pub conversation_style: String,
    pub response_length: ResponseLength,
    pub emotional_tone: EmotionalTone,
    /// Raw system prompt that replaces the name/personality opener.
    pub system_prompt: Option<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Kwami".to_owned(),
            personality: "a friendly and helpful AI companion".to_owned(),
            traits: vec!["curious".to_owned(), "warm".to_owned(), "attentive".to_owned()],
            conversation_style: "friendly".to_owned(),
            response_length: ResponseLength::Medium,
            emotional_tone: EmotionalTone::Warm,
            system_prompt: None,
        }
    }
}

impl PersonaConfig {
    /// Add a trait unless an equal one is already present.
    pub fn add_trait(&mut self, value: &str) {
        let value = value.trim();
        if value.is_empty() || self.traits.iter().any(|t| t.eq_ignore_ascii_case(value)) {
            return;
        }
        self.traits.push(value.to_owned());
    }
}

fn distinct_traits<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let raw = Vec::<String>::deserialize(deserializer)?;
    let mut persona = PersonaConfig {
        traits: Vec::with_capacity(raw.len()),
        ..PersonaConfig::default()
    };
    for value in &raw {
        persona.add_trait(value);
    }
    Ok(persona.traits)
}

/// Which pipeline shape is active. Exactly one is live at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Cascaded STT → LLM → TTS.
    #[default]
    #[serde(alias = "standard")]
    Pipeline,
    /// A single speech-to-speech realtime model.
    Realtime,
}

/// Voice pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    #[serde(alias = "pipeline_type")]
    pub pipeline: PipelineKind,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    /// Used instead of the three stages when `pipeline` is `realtime`.
    pub realtime: RealtimeConfig,
}

/// Speech-to-text stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub language: String,
    /// Boosted vocabulary for providers that support it.
    pub word_boost: Vec<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Deepgram,
            model: "nova-2".to_owned(),
            language: "en".to_owned(),
            word_boost: Vec::new(),
        }
    }
}

/// Language model stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    #[serde(alias = "llm_max_tokens")]
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o-mini".to_owned(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Text-to-speech stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub voice: String,
    /// Speaking rate multiplier (1.0 = normal).
    pub speed: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "tts-1".to_owned(),
            voice: "alloy".to_owned(),
            speed: 1.0,
        }
    }
}

/// Combined realtime model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub voice: String,
    pub modalities: Vec<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o-realtime-preview".to_owned(),
            voice: "alloy".to_owned(),
            modalities: vec!["audio".to_owned(), "text".to_owned()],
        }
    }
}

/// Settings for the external memory collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    /// Memory user key. Derived from the kwami id when unset.
    pub user_id: Option<String>,
    /// Upper bound on the memory context injected into instructions.
    pub context_max_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_id: None,
            context_max_chars: 1_200,
        }
    }
}

// ── Process settings ──────────────────────────────────────────────

/// Top-level process settings for the agent host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub arbitration: ArbitrationConfig,
    pub tools: ToolBridgeConfig,
    pub session: SessionConfig,
    pub fallback: FallbackConfig,
    /// Model-prefix and voice-shape rules for provider inference.
    pub resolver: ResolverTable,
    /// Configuration every new session starts from.
    pub defaults: KwamiConfig,
}

/// Duplicate-session arbitration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// How long to let the participant roster settle after joining.
    pub grace_period_ms: u64,
    /// Re-run arbitration (without the grace period) before every reconfiguration.
    pub recheck_before_reconfigure: bool,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 500,
            recheck_before_reconfigure: true,
        }
    }
}

impl ArbitrationConfig {
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Remote tool-call settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolBridgeConfig {
    pub timeout_secs: u64,
}

impl Default for ToolBridgeConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl ToolBridgeConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Session actor sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on queued inbound work per session.
    pub queue_capacity: usize,
    /// Capacity of the session event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            event_capacity: 128,
        }
    }
}

/// Providers used when the requested one cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub stt: ProviderKind,
    pub llm: ProviderKind,
    pub tts: ProviderKind,
    pub realtime: ProviderKind,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            stt: ProviderKind::Deepgram,
            llm: ProviderKind::OpenAi,
            tts: ProviderKind::OpenAi,
            realtime: ProviderKind::OpenAi,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::KwamiError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::KwamiError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the settings path: `$KWAMI_CONFIG`, else `<config dir>/kwami/agent.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("kwami")
            .join("agent.toml")
    }

    /// Load from [`Self::default_config_path`], using defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default() -> crate::error::Result<Self> {
        let path = Self::default_config_path();
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = KwamiConfig::default();
        assert_eq!(config.voice.pipeline, PipelineKind::Pipeline);
        assert_eq!(config.voice.stt.provider, ProviderKind::Deepgram);
        assert_eq!(config.voice.llm.model, "gpt-4o-mini");
        assert_eq!(config.voice.tts.voice, "alloy");
        assert!(config.voice.tts.speed > 0.0);
        assert!(config.tools.is_empty());

        let agent = AgentConfig::default();
        assert_eq!(agent.tools.timeout(), Duration::from_secs(30));
        assert!(agent.session.queue_capacity > 0);
        assert!(agent.arbitration.recheck_before_reconfigure);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.toml");

        let mut config = AgentConfig::default();
        config.arbitration.grace_period_ms = 250;
        config.tools.timeout_secs = 12;
        config.defaults.voice.tts.provider = ProviderKind::Cartesia;
        config.defaults.persona.system_prompt = Some("Be brief.".into());

        config.save_to_file(&path).unwrap();
        let loaded = AgentConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "[tools]\ntimeout_secs = 5\n\n[defaults.voice.tts]\nprovider = \"elevenlabs\"\n",
        )
        .unwrap();

        let loaded = AgentConfig::from_file(&path).unwrap();
        assert_eq!(loaded.tools.timeout_secs, 5);
        assert_eq!(loaded.defaults.voice.tts.provider, ProviderKind::ElevenLabs);
        assert_eq!(loaded.defaults.voice.tts.model, "tts-1");
        assert_eq!(loaded.session, SessionConfig::default());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[tools\ntimeout_secs = ").unwrap();
        let err = AgentConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, crate::error::KwamiError::Config(_)));
    }

    #[test]
    fn unknown_tone_parses_as_unspecified() {
        let persona: PersonaConfig =
            serde_json::from_str(r#"{"emotional_tone": "sardonic", "response_length": "short"}"#)
                .unwrap();
        assert_eq!(persona.emotional_tone, EmotionalTone::Unspecified);
        assert_eq!(persona.response_length, ResponseLength::Short);
    }

    #[test]
    fn duplicate_traits_are_dropped_on_parse() {
        let persona: PersonaConfig =
            serde_json::from_str(r#"{"traits": ["witty", "Witty", " kind ", "witty", ""]}"#).unwrap();
        assert_eq!(persona.traits, vec!["witty", "kind"]);
        let text = crate::persona::build_instructions(&persona, None);
        assert!(text.contains("Key traits: witty, kind\n"));
    }

    #[test]
    fn add_trait_dedupes() {
        let mut persona = PersonaConfig::default();
        let before = persona.traits.len();
        persona.add_trait("Curious");
        persona.add_trait("playful");
        assert_eq!(persona.traits.len(), before + 1);
    }
}
