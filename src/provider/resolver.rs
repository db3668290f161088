//! Infer a synthesis provider from model and voice tokens.
//!
//! # Precedence
//!
//! 1. A model token matching a prefix rule wins outright.
//! 2. Otherwise a voice token whose shape matches exactly one provider wins.
//! 3. Otherwise the current provider is kept.
//!
//! Resolution is pure and total: unrecognised input means "no change".
//!
//! ```rust
//! use kwami::provider::{ProviderIdentityResolver, ProviderKind, ResolutionSource};
//!
//! let resolver = ProviderIdentityResolver::default();
//! let resolved = resolver.resolve(Some("eleven_turbo_v2_5"), None, &ProviderKind::OpenAi);
//! assert_eq!(resolved.provider, ProviderKind::ElevenLabs);
//! assert_eq!(resolved.source, ResolutionSource::Model);
//! ```

use super::ProviderKind;
use super::catalog::OPENAI_VOICES;
use serde::{Deserialize, Serialize};

/// Maps a model-name prefix to the provider that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPrefixRule {
    pub prefix: String,
    pub provider: ProviderKind,
}

/// Shape of a provider's voice identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoiceShape {
    /// Fixed-length identifier with a fixed number of hyphens (UUID-like).
    Hyphenated { length: usize, hyphens: usize },
    /// ASCII alphanumeric identifier of at least `min_length` characters.
    Alphanumeric { min_length: usize },
    /// One of a small set of short names, compared case-insensitively.
    Vocabulary { names: Vec<String> },
}

impl VoiceShape {
    fn matches(&self, voice: &str) -> bool {
        match self {
            Self::Hyphenated { length, hyphens } => {
                voice.chars().count() == *length && voice.matches('-').count() == *hyphens
            }
            Self::Alphanumeric { min_length } => {
                voice.len() >= *min_length && voice.chars().all(|c| c.is_ascii_alphanumeric())
            }
            Self::Vocabulary { names } => {
                let lowered = voice.to_lowercase();
                names.iter().any(|name| name.eq_ignore_ascii_case(&lowered))
            }
        }
    }
}

/// Associates a voice-identifier shape with a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceShapeRule {
    pub provider: ProviderKind,
    pub shape: VoiceShape,
}

/// The configurable rule table consulted by [`ProviderIdentityResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverTable {
    /// Checked in order; the first matching prefix wins.
    pub model_prefixes: Vec<ModelPrefixRule>,
    pub voice_shapes: Vec<VoiceShapeRule>,
}

impl Default for ResolverTable {
    fn default() -> Self {
        let prefix = |prefix: &str, provider: ProviderKind| ModelPrefixRule {
            prefix: prefix.to_owned(),
            provider,
        };
        Self {
            model_prefixes: vec![
                prefix("eleven_", ProviderKind::ElevenLabs),
                prefix("tts-", ProviderKind::OpenAi),
                prefix("gpt-4o", ProviderKind::OpenAi),
                prefix("sonic", ProviderKind::Cartesia),
                prefix("aura", ProviderKind::Deepgram),
            ],
            voice_shapes: vec![
                VoiceShapeRule {
                    provider: ProviderKind::ElevenLabs,
                    shape: VoiceShape::Alphanumeric { min_length: 20 },
                },
                VoiceShapeRule {
                    provider: ProviderKind::Cartesia,
                    shape: VoiceShape::Hyphenated {
                        length: 36,
                        hyphens: 4,
                    },
                },
                VoiceShapeRule {
                    provider: ProviderKind::OpenAi,
                    shape: VoiceShape::Vocabulary {
                        names: OPENAI_VOICES.iter().map(|v| (*v).to_owned()).collect(),
                    },
                },
            ],
        }
    }
}

/// Which input decided a [`Resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Model,
    Voice,
    Retained,
}

/// Outcome of resolving a provider identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub provider: ProviderKind,
    pub source: ResolutionSource,
}

impl Resolution {
    /// Whether the resolved provider differs from `current`.
    #[must_use]
    pub fn differs_from(&self, current: &ProviderKind) -> bool {
        &self.provider != current
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderIdentityResolver {
    table: ResolverTable,
}

impl ProviderIdentityResolver {
    #[must_use]
    pub fn new(table: ResolverTable) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn table(&self) -> &ResolverTable {
        &self.table
    }

    /// Resolve the provider for an update carrying optional model and voice tokens.
    #[must_use]
    pub fn resolve(
        &self,
        model: Option<&str>,
        voice: Option<&str>,
        current: &ProviderKind,
    ) -> Resolution {
        if let Some(provider) = model.and_then(|m| self.classify_model(m)) {
            return Resolution {
                provider,
                source: ResolutionSource::Model,
            };
        }
        if let Some(provider) = voice.and_then(|v| self.classify_voice(v)) {
            return Resolution {
                provider,
                source: ResolutionSource::Voice,
            };
        }
        Resolution {
            provider: current.clone(),
            source: ResolutionSource::Retained,
        }
    }

    /// Classify a model token by prefix.
    #[must_use]
    pub fn classify_model(&self, model: &str) -> Option<ProviderKind> {
        let model = model.trim().to_lowercase();
        if model.is_empty() {
            return None;
        }
        self.table
            .model_prefixes
            .iter()
            .find(|rule| !rule.prefix.is_empty() && model.starts_with(&rule.prefix.to_lowercase()))
            .map(|rule| rule.provider.clone())
    }

    /// Classify a voice token by shape. Returns `None` unless exactly one
    /// provider's shape matches.
    #[must_use]
    pub fn classify_voice(&self, voice: &str) -> Option<ProviderKind> {
        let voice = voice.trim();
        if voice.is_empty() {
            return None;
        }
        let mut matched: Vec<&ProviderKind> = Vec::new();
        for rule in &self.table.voice_shapes {
            if rule.shape.matches(voice) && !matched.contains(&&rule.provider) {
                matched.push(&rule.provider);
            }
        }
        match matched.as_slice() {
            [only] => Some((*only).clone()),
            _ => None,
        }
    }
}
