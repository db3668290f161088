//! Provider identity for pipeline stages.
//!
//! Every live handle carries a [`ProviderKind`] so the coordinator never has
//! to probe a component to find out who built it.

pub mod catalog;
pub mod resolver;

pub use resolver::{ProviderIdentityResolver, Resolution, ResolutionSource, ResolverTable};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque provider tag for a speech, language, or synthesis component.
///
/// Unknown names are kept verbatim in [`ProviderKind::Other`] so that a
/// configuration naming a provider this build cannot construct still parses;
/// the factory reports it as unavailable and the fallback provider is used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderKind {
    OpenAi,
    ElevenLabs,
    Cartesia,
    Deepgram,
    Google,
    AssemblyAi,
    Anthropic,
    Groq,
    DeepSeek,
    Mistral,
    Cerebras,
    Ollama,
    Other(String),
}

impl ProviderKind {
    /// Parse a provider name, case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" => Self::OpenAi,
            "elevenlabs" | "eleven_labs" => Self::ElevenLabs,
            "cartesia" => Self::Cartesia,
            "deepgram" => Self::Deepgram,
            "google" => Self::Google,
            "assemblyai" => Self::AssemblyAi,
            "anthropic" => Self::Anthropic,
            "groq" => Self::Groq,
            "deepseek" => Self::DeepSeek,
            "mistral" => Self::Mistral,
            "cerebras" => Self::Cerebras,
            "ollama" => Self::Ollama,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Render to the wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenAi => "openai",
            Self::ElevenLabs => "elevenlabs",
            Self::Cartesia => "cartesia",
            Self::Deepgram => "deepgram",
            Self::Google => "google",
            Self::AssemblyAi => "assemblyai",
            Self::Anthropic => "anthropic",
            Self::Groq => "groq",
            Self::DeepSeek => "deepseek",
            Self::Mistral => "mistral",
            Self::Cerebras => "cerebras",
            Self::Ollama => "ollama",
            Self::Other(name) => name,
        }
    }

    /// Whether this build knows how to talk to the provider at all.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for ProviderKind {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for ProviderKind {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
