//! Static per-provider knowledge: default models and voices, credential
//! variables, and the names of the options each provider accepts live.

use super::ProviderKind;

/// OpenAI synthesis voices (short lowercase names).
pub const OPENAI_VOICES: &[&str] = &[
    "alloy", "ash", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer",
];

/// Deepgram Aura voice names.
pub const DEEPGRAM_VOICES: &[&str] = &[
    "asteria", "luna", "stella", "athena", "hera", "orion", "arcas", "perseus", "angus",
    "orpheus", "helios", "zeus",
];

/// OpenAI synthesis models.
pub const OPENAI_TTS_MODELS: &[&str] = &["tts-1", "tts-1-hd", "gpt-4o-mini-tts"];

/// Friendly names for Cartesia voices, as spoken by users.
const CARTESIA_NAMED_VOICES: &[(&str, &str)] = &[
    ("british lady", "79a125e8-cd45-4c13-8a67-188112f4dd22"),
    ("sophia", "79a125e8-cd45-4c13-8a67-188112f4dd22"),
    ("california girl", "c2ac25f9-ecc4-4f56-9095-651354df60c0"),
    ("reading lady", "b7d50908-b17c-442d-ad8d-810c63997ed9"),
    ("newsman", "a167e0f3-df7e-4d52-a9c3-f949145efdab"),
    ("blake", "a167e0f3-df7e-4d52-a9c3-f949145efdab"),
    ("commercial man", "63ff761f-c1e8-414b-b969-d1833d1c870c"),
    ("friendly sidekick", "421b3369-f63f-4b03-8980-37a44df1d4e8"),
];

/// Resolve a spoken voice name to a Cartesia voice id.
#[must_use]
pub fn named_voice(name: &str) -> Option<&'static str> {
    let wanted = name.trim().to_lowercase();
    CARTESIA_NAMED_VOICES
        .iter()
        .find(|(label, _)| *label == wanted)
        .map(|(_, id)| *id)
}

#[must_use]
pub fn default_stt_model(kind: &ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::Deepgram => Some("nova-2"),
        ProviderKind::OpenAi => Some("whisper-1"),
        ProviderKind::Google => Some("chirp"),
        ProviderKind::ElevenLabs => Some("scribe_v1"),
        ProviderKind::AssemblyAi => Some("universal"),
        _ => None,
    }
}

#[must_use]
pub fn default_llm_model(kind: &ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::OpenAi => Some("gpt-4o-mini"),
        ProviderKind::Google => Some("gemini-2.0-flash"),
        ProviderKind::Anthropic => Some("claude-3-5-sonnet-latest"),
        ProviderKind::Groq => Some("llama-3.1-70b-versatile"),
        ProviderKind::DeepSeek => Some("deepseek-chat"),
        ProviderKind::Mistral => Some("mistral-large-latest"),
        ProviderKind::Cerebras => Some("llama3.1-70b"),
        ProviderKind::Ollama => Some("llama3.2"),
        _ => None,
    }
}

#[must_use]
pub fn default_tts_model(kind: &ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::OpenAi => Some("tts-1"),
        ProviderKind::ElevenLabs => Some("eleven_turbo_v2_5"),
        ProviderKind::Cartesia => Some("sonic-2"),
        ProviderKind::Deepgram => Some("aura-asteria-en"),
        ProviderKind::Google => Some("standard"),
        _ => None,
    }
}

#[must_use]
pub fn default_tts_voice(kind: &ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::OpenAi => Some("nova"),
        ProviderKind::ElevenLabs => Some("21m00Tcm4TlvDq8ikWAM"),
        ProviderKind::Cartesia => Some("79a125e8-cd45-4c13-8a67-188112f4dd22"),
        ProviderKind::Deepgram => Some("asteria"),
        ProviderKind::Google => Some("en-US-Studio-O"),
        _ => None,
    }
}

/// Environment variables that carry a provider's credential. Any one set is enough.
#[must_use]
pub fn credential_env_vars(kind: &ProviderKind) -> &'static [&'static str] {
    match kind {
        ProviderKind::OpenAi => &["OPENAI_API_KEY"],
        ProviderKind::ElevenLabs => &["ELEVEN_API_KEY", "ELEVENLABS_API_KEY"],
        ProviderKind::Cartesia => &["CARTESIA_API_KEY"],
        ProviderKind::Deepgram => &["DEEPGRAM_API_KEY"],
        ProviderKind::Google => &["GOOGLE_APPLICATION_CREDENTIALS"],
        ProviderKind::AssemblyAi => &["ASSEMBLYAI_API_KEY"],
        ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
        ProviderKind::Groq => &["GROQ_API_KEY"],
        ProviderKind::DeepSeek => &["DEEPSEEK_API_KEY"],
        ProviderKind::Mistral => &["MISTRAL_API_KEY"],
        ProviderKind::Cerebras => &["CEREBRAS_API_KEY"],
        ProviderKind::Ollama | ProviderKind::Other(_) => &[],
    }
}

/// Names of the synthesis options a provider accepts on a live handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisOptionNames {
    /// Option carrying the voice identity.
    pub voice: &'static str,
    /// Option carrying the speaking rate, `None` when the rate is fixed at construction.
    pub rate: Option<&'static str>,
}

#[must_use]
pub fn synthesis_options(kind: &ProviderKind) -> SynthesisOptionNames {
    match kind {
        ProviderKind::ElevenLabs => SynthesisOptionNames {
            voice: "voice_id",
            rate: None,
        },
        ProviderKind::Google => SynthesisOptionNames {
            voice: "voice",
            rate: Some("speaking_rate"),
        },
        // Aura bakes the rate into the model.
        ProviderKind::Deepgram => SynthesisOptionNames {
            voice: "voice",
            rate: None,
        },
        _ => SynthesisOptionNames {
            voice: "voice",
            rate: Some("speed"),
        },
    }
}

/// Names of the recognition options a provider accepts on a live handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionOptionNames {
    pub language: Option<&'static str>,
    pub model: Option<&'static str>,
}

#[must_use]
pub fn recognition_options(kind: &ProviderKind) -> RecognitionOptionNames {
    match kind {
        ProviderKind::AssemblyAi => RecognitionOptionNames {
            language: None,
            model: None,
        },
        ProviderKind::Google => RecognitionOptionNames {
            language: Some("languages"),
            model: Some("model"),
        },
        _ => RecognitionOptionNames {
            language: Some("language"),
            model: Some("model"),
        },
    }
}
