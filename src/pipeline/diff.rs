//! Classify configuration changes per pipeline stage.
//!
//! Each stage update is sorted into one of three buckets:
//!
//! | stage | patchable when | otherwise |
//! |---|---|---|
//! | stt | same provider, only language/model, provider accepts them live | rebuild |
//! | llm | never | rebuild |
//! | tts | same provider, only voice/speed, provider accepts them live | rebuild |
//! | realtime | never | rebuild |
//!
//! An update that supplies nothing new for a stage is `Unchanged`.

use crate::config::{LlmConfig, RealtimeConfig, SttConfig, TtsConfig, VoiceConfig};
use crate::pipeline::handles::ProviderOption;
use crate::provider::ProviderKind;
use crate::provider::catalog::{recognition_options, synthesis_options};
use serde::Deserialize;
use std::fmt;

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Stt,
    Llm,
    Tts,
    Realtime,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stt => "stt",
            Self::Llm => "llm",
            Self::Tts => "tts",
            Self::Realtime => "realtime",
        })
    }
}

/// Why a stage must be rebuilt rather than patched.
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildReason {
    ProviderChanged { from: ProviderKind, to: ProviderKind },
    /// Generation handles cannot be mutated after construction.
    LlmImmutable,
    /// The provider fixes its speaking rate at construction.
    UnsupportedLiveRate(ProviderKind),
    /// The field is not in the provider's live option set.
    UnsupportedField(&'static str),
    /// A patch was attempted and the component refused it.
    PatchRejected(String),
    RealtimeChanged,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderChanged { from, to } => write!(f, "provider change {from} → {to}"),
            Self::LlmImmutable => f.write_str("language model is immutable"),
            Self::UnsupportedLiveRate(p) => write!(f, "{p} has no live rate option"),
            Self::UnsupportedField(field) => write!(f, "{field} cannot change live"),
            Self::PatchRejected(e) => write!(f, "patch rejected: {e}"),
            Self::RealtimeChanged => f.write_str("realtime model changed"),
        }
    }
}

/// Recognition options to set on the live handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SttPatch {
    pub language: Option<String>,
    pub model: Option<String>,
}

/// Synthesis options to set on the live handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TtsPatch {
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

/// A stage-tagged in-place update.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchRequest {
    Stt(SttPatch),
    Tts(TtsPatch),
}

impl PatchRequest {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Stt(_) => Stage::Stt,
            Self::Tts(_) => Stage::Tts,
        }
    }

    /// Translate the patch into the option names `provider` understands.
    #[must_use]
    pub fn options(&self, provider: &ProviderKind) -> Vec<ProviderOption> {
        let mut out = Vec::new();
        match self {
            Self::Stt(patch) => {
                let names = recognition_options(provider);
                if let (Some(name), Some(language)) = (names.language, &patch.language) {
                    out.push(ProviderOption::text(name, language.clone()));
                }
                if let (Some(name), Some(model)) = (names.model, &patch.model) {
                    out.push(ProviderOption::text(name, model.clone()));
                }
            }
            Self::Tts(patch) => {
                let names = synthesis_options(provider);
                if let Some(voice) = &patch.voice {
                    out.push(ProviderOption::text(names.voice, voice.clone()));
                }
                if let (Some(name), Some(speed)) = (names.rate, patch.speed) {
                    out.push(ProviderOption::number(name, f64::from(speed)));
                }
            }
        }
        out
    }
}

/// Classification of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldClassification {
    Unchanged,
    Patchable(PatchRequest),
    RequiresRebuild(RebuildReason),
}

impl FieldClassification {
    #[must_use]
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, Self::RequiresRebuild(_))
    }

    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

// ── Stage updates ────────────────────────────────────────────────

fn text(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn positive(value: Option<f32>) -> Option<f32> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Partial recognition update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SttUpdate {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub language: Option<String>,
}

impl SttUpdate {
    pub fn apply_to(&self, config: &mut SttConfig) {
        if let Some(provider) = &self.provider {
            config.provider = provider.clone();
        }
        if let Some(model) = text(self.model.as_ref()) {
            config.model = model.to_owned();
        }
        if let Some(language) = text(self.language.as_ref()) {
            config.language = language.to_owned();
        }
    }
}

/// Partial language-model update. Accepts both bare and `llm_` prefixed keys.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmUpdate {
    #[serde(alias = "llm_provider")]
    pub provider: Option<ProviderKind>,
    #[serde(alias = "llm_model")]
    pub model: Option<String>,
    #[serde(alias = "llm_temperature")]
    pub temperature: Option<f32>,
    #[serde(alias = "llm_max_tokens")]
    pub max_tokens: Option<u32>,
}

impl LlmUpdate {
    pub fn apply_to(&self, config: &mut LlmConfig) {
        if let Some(provider) = &self.provider {
            config.provider = provider.clone();
        }
        if let Some(model) = text(self.model.as_ref()) {
            config.model = model.to_owned();
        }
        if let Some(temperature) = self.temperature.filter(|t| t.is_finite() && *t >= 0.0) {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens.filter(|m| *m > 0) {
            config.max_tokens = Some(max_tokens);
        }
    }
}

/// Partial synthesis update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TtsUpdate {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

impl TtsUpdate {
    /// Apply onto `config` with the provider already resolved.
    pub fn apply_to(&self, config: &mut TtsConfig, provider: &ProviderKind) {
        config.provider = provider.clone();
        if let Some(model) = text(self.model.as_ref()) {
            config.model = model.to_owned();
        }
        if let Some(voice) = text(self.voice.as_ref()) {
            config.voice = voice.to_owned();
        }
        if let Some(speed) = positive(self.speed) {
            config.speed = speed;
        }
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        text(self.model.as_ref())
    }

    #[must_use]
    pub fn voice(&self) -> Option<&str> {
        text(self.voice.as_ref())
    }
}

/// Partial realtime-model update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealtimeUpdate {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub modalities: Option<Vec<String>>,
}

impl RealtimeUpdate {
    pub fn apply_to(&self, config: &mut RealtimeConfig) {
        if let Some(provider) = &self.provider {
            config.provider = provider.clone();
        }
        if let Some(model) = text(self.model.as_ref()) {
            config.model = model.to_owned();
        }
        if let Some(voice) = text(self.voice.as_ref()) {
            config.voice = voice.to_owned();
        }
        if let Some(modalities) = self.modalities.as_ref().filter(|m| !m.is_empty()) {
            config.modalities = modalities.clone();
        }
    }
}

/// Flat `voice` update as sent in a `config_update` message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VoiceUpdate {
    pub tts_provider: Option<ProviderKind>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
    pub stt_provider: Option<ProviderKind>,
    pub stt_model: Option<String>,
    pub stt_language: Option<String>,
    pub realtime_provider: Option<ProviderKind>,
    pub realtime_model: Option<String>,
    pub realtime_voice: Option<String>,
    pub realtime_modalities: Option<Vec<String>>,
}

impl VoiceUpdate {
    #[must_use]
    pub fn stt(&self) -> SttUpdate {
        SttUpdate {
            provider: self.stt_provider.clone(),
            model: self.stt_model.clone(),
            language: self.stt_language.clone(),
        }
    }

    #[must_use]
    pub fn tts(&self) -> TtsUpdate {
        TtsUpdate {
            provider: self.tts_provider.clone(),
            model: self.tts_model.clone(),
            voice: self.tts_voice.clone(),
            speed: self.tts_speed,
        }
    }

    #[must_use]
    pub fn realtime(&self) -> RealtimeUpdate {
        RealtimeUpdate {
            provider: self.realtime_provider.clone(),
            model: self.realtime_model.clone(),
            voice: self.realtime_voice.clone(),
            modalities: self.realtime_modalities.clone(),
        }
    }
}

// ── Classification ───────────────────────────────────────────────

/// Classify a recognition update against the live config.
#[must_use]
pub fn classify_stt(current: &SttConfig, update: &SttUpdate) -> FieldClassification {
    if let Some(provider) = &update.provider
        && provider != &current.provider
    {
        return FieldClassification::RequiresRebuild(RebuildReason::ProviderChanged {
            from: current.provider.clone(),
            to: provider.clone(),
        });
    }

    let language = text(update.language.as_ref()).filter(|l| *l != current.language);
    let model = text(update.model.as_ref()).filter(|m| *m != current.model);
    if language.is_none() && model.is_none() {
        return FieldClassification::Unchanged;
    }

    let names = recognition_options(&current.provider);
    if language.is_some() && names.language.is_none() {
        return FieldClassification::RequiresRebuild(RebuildReason::UnsupportedField("language"));
    }
    if model.is_some() && names.model.is_none() {
        return FieldClassification::RequiresRebuild(RebuildReason::UnsupportedField("model"));
    }

    FieldClassification::Patchable(PatchRequest::Stt(SttPatch {
        language: language.map(str::to_owned),
        model: model.map(str::to_owned),
    }))
}

/// Classify a language-model update. Any real change forces a rebuild.
#[must_use]
pub fn classify_llm(current: &LlmConfig, update: &LlmUpdate) -> FieldClassification {
    let mut candidate = current.clone();
    update.apply_to(&mut candidate);
    if &candidate == current {
        FieldClassification::Unchanged
    } else {
        FieldClassification::RequiresRebuild(RebuildReason::LlmImmutable)
    }
}

/// Classify a synthesis update. `resolved` is the provider the update
/// resolves to (see [`ProviderIdentityResolver`](crate::provider::ProviderIdentityResolver)).
#[must_use]
pub fn classify_tts(
    current: &TtsConfig,
    update: &TtsUpdate,
    resolved: &ProviderKind,
) -> FieldClassification {
    if resolved != &current.provider {
        return FieldClassification::RequiresRebuild(RebuildReason::ProviderChanged {
            from: current.provider.clone(),
            to: resolved.clone(),
        });
    }

    let model = update.model().filter(|m| *m != current.model);
    let voice = update.voice().filter(|v| *v != current.voice);
    let speed = positive(update.speed).filter(|s| (s - current.speed).abs() > f32::EPSILON);
    if model.is_none() && voice.is_none() && speed.is_none() {
        return FieldClassification::Unchanged;
    }

    if model.is_some() {
        return FieldClassification::RequiresRebuild(RebuildReason::UnsupportedField("model"));
    }
    if speed.is_some() && synthesis_options(&current.provider).rate.is_none() {
        return FieldClassification::RequiresRebuild(RebuildReason::UnsupportedLiveRate(
            current.provider.clone(),
        ));
    }

    FieldClassification::Patchable(PatchRequest::Tts(TtsPatch {
        voice: voice.map(str::to_owned),
        speed,
    }))
}

/// Classify a realtime-model update. Any real change forces a rebuild.
#[must_use]
pub fn classify_realtime(current: &RealtimeConfig, update: &RealtimeUpdate) -> FieldClassification {
    let mut candidate = current.clone();
    update.apply_to(&mut candidate);
    if &candidate == current {
        FieldClassification::Unchanged
    } else {
        FieldClassification::RequiresRebuild(RebuildReason::RealtimeChanged)
    }
}

/// Classification of every stage between two whole configs.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceDiff {
    pub stt: FieldClassification,
    pub llm: FieldClassification,
    pub tts: FieldClassification,
    pub realtime: FieldClassification,
    pub pipeline_changed: bool,
}

impl VoiceDiff {
    /// Stages that need a new component.
    #[must_use]
    pub fn rebuild_stages(&self) -> Vec<Stage> {
        [
            (Stage::Stt, &self.stt),
            (Stage::Llm, &self.llm),
            (Stage::Tts, &self.tts),
            (Stage::Realtime, &self.realtime),
        ]
        .into_iter()
        .filter(|(_, c)| c.requires_rebuild())
        .map(|(stage, _)| stage)
        .collect()
    }

    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        !self.pipeline_changed
            && self.stt.is_unchanged()
            && self.llm.is_unchanged()
            && self.tts.is_unchanged()
            && self.realtime.is_unchanged()
    }
}

/// Compare two whole voice configs through the per-stage rules.
#[must_use]
pub fn compare(old: &VoiceConfig, new: &VoiceConfig) -> VoiceDiff {
    let stt = classify_stt(
        &old.stt,
        &SttUpdate {
            provider: Some(new.stt.provider.clone()),
            model: Some(new.stt.model.clone()),
            language: Some(new.stt.language.clone()),
        },
    );
    let llm = classify_llm(
        &old.llm,
        &LlmUpdate {
            provider: Some(new.llm.provider.clone()),
            model: Some(new.llm.model.clone()),
            temperature: Some(new.llm.temperature),
            max_tokens: new.llm.max_tokens,
        },
    );
    let llm = if llm.is_unchanged() && old.llm.max_tokens != new.llm.max_tokens {
        FieldClassification::RequiresRebuild(RebuildReason::LlmImmutable)
    } else {
        llm
    };
    let tts = classify_tts(
        &old.tts,
        &TtsUpdate {
            provider: Some(new.tts.provider.clone()),
            model: Some(new.tts.model.clone()),
            voice: Some(new.tts.voice.clone()),
            speed: Some(new.tts.speed),
        },
        &new.tts.provider,
    );
    let realtime = if old.realtime == new.realtime {
        FieldClassification::Unchanged
    } else {
        FieldClassification::RequiresRebuild(RebuildReason::RealtimeChanged)
    };

    VoiceDiff {
        stt,
        llm,
        tts,
        realtime,
        pipeline_changed: old.pipeline != new.pipeline,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn elevenlabs_tts() -> TtsConfig {
        TtsConfig {
            provider: ProviderKind::ElevenLabs,
            model: "eleven_turbo_v2_5".into(),
            voice: "21m00Tcm4TlvDq8ikWAM".into(),
            speed: 1.0,
        }
    }

    #[test]
    fn llm_changes_always_rebuild() {
        let current = LlmConfig::default();
        let variants = [
            LlmUpdate {
                model: Some("gpt-4o".into()),
                ..Default::default()
            },
            LlmUpdate {
                temperature: Some(0.2),
                ..Default::default()
            },
            LlmUpdate {
                provider: Some(ProviderKind::Anthropic),
                ..Default::default()
            },
            LlmUpdate {
                max_tokens: Some(256),
                ..Default::default()
            },
        ];
        for update in variants {
            assert_eq!(
                classify_llm(&current, &update),
                FieldClassification::RequiresRebuild(RebuildReason::LlmImmutable),
                "{update:?}"
            );
        }
    }

    #[test]
    fn llm_update_equal_to_current_is_unchanged() {
        let current = LlmConfig::default();
        let update = LlmUpdate {
            model: Some(current.model.clone()),
            ..Default::default()
        };
        assert!(classify_llm(&current, &update).is_unchanged());
        assert!(classify_llm(&current, &LlmUpdate::default()).is_unchanged());
    }

    #[test]
    fn compare_llm_only_differences_rebuild_llm_alone() {
        let old = VoiceConfig::default();
        for mutate in [
            (|v: &mut VoiceConfig| v.llm.model = "gpt-4o".into()) as fn(&mut VoiceConfig),
            |v| v.llm.temperature = 1.1,
            |v| v.llm.provider = ProviderKind::Groq,
            |v| v.llm.max_tokens = Some(512),
        ] {
            let mut new = old.clone();
            mutate(&mut new);
            let diff = compare(&old, &new);
            assert!(diff.llm.requires_rebuild());
            assert!(diff.stt.is_unchanged());
            assert!(diff.tts.is_unchanged());
            assert_eq!(diff.rebuild_stages(), vec![Stage::Llm]);
        }
    }

    #[test]
    fn elevenlabs_speed_change_requires_rebuild() {
        let current = elevenlabs_tts();
        let update = TtsUpdate {
            speed: Some(1.3),
            ..Default::default()
        };
        assert_eq!(
            classify_tts(&current, &update, &ProviderKind::ElevenLabs),
            FieldClassification::RequiresRebuild(RebuildReason::UnsupportedLiveRate(
                ProviderKind::ElevenLabs
            ))
        );
    }

    #[test]
    fn elevenlabs_same_speed_is_unchanged() {
        let current = elevenlabs_tts();
        let update = TtsUpdate {
            speed: Some(1.0),
            ..Default::default()
        };
        assert!(classify_tts(&current, &update, &ProviderKind::ElevenLabs).is_unchanged());
    }

    #[test]
    fn elevenlabs_voice_change_patches_voice_id() {
        let current = elevenlabs_tts();
        let update = TtsUpdate {
            voice: Some("JBFqnCBsd6RMkjVDRZzb".into()),
            ..Default::default()
        };
        let FieldClassification::Patchable(patch) =
            classify_tts(&current, &update, &ProviderKind::ElevenLabs)
        else {
            panic!("expected patch");
        };
        let options = patch.options(&ProviderKind::ElevenLabs);
        assert_eq!(options, vec![ProviderOption::text("voice_id", "JBFqnCBsd6RMkjVDRZzb")]);
    }

    #[test]
    fn openai_voice_and_speed_patch() {
        let current = TtsConfig::default();
        let update = TtsUpdate {
            voice: Some("shimmer".into()),
            speed: Some(1.5),
            ..Default::default()
        };
        let class = classify_tts(&current, &update, &ProviderKind::OpenAi);
        let FieldClassification::Patchable(patch) = class else {
            panic!("expected patch, got {class:?}");
        };
        assert_eq!(
            patch.options(&ProviderKind::OpenAi),
            vec![
                ProviderOption::text("voice", "shimmer"),
                ProviderOption::number("speed", 1.5),
            ]
        );
    }

    #[test]
    fn tts_provider_change_rebuilds() {
        let current = TtsConfig::default();
        let update = TtsUpdate {
            model: Some("eleven_turbo_v2_5".into()),
            ..Default::default()
        };
        assert_eq!(
            classify_tts(&current, &update, &ProviderKind::ElevenLabs),
            FieldClassification::RequiresRebuild(RebuildReason::ProviderChanged {
                from: ProviderKind::OpenAi,
                to: ProviderKind::ElevenLabs,
            })
        );
    }

    #[test]
    fn tts_model_change_same_provider_rebuilds() {
        let current = TtsConfig::default();
        let update = TtsUpdate {
            model: Some("tts-1-hd".into()),
            ..Default::default()
        };
        assert_eq!(
            classify_tts(&current, &update, &ProviderKind::OpenAi),
            FieldClassification::RequiresRebuild(RebuildReason::UnsupportedField("model"))
        );
    }

    #[test]
    fn stt_language_change_patches() {
        let current = SttConfig::default();
        let update = SttUpdate {
            language: Some("fr".into()),
            ..Default::default()
        };
        assert_eq!(
            classify_stt(&current, &update),
            FieldClassification::Patchable(PatchRequest::Stt(SttPatch {
                language: Some("fr".into()),
                model: None,
            }))
        );
    }

    #[test]
    fn stt_provider_change_rebuilds() {
        let current = SttConfig::default();
        let update = SttUpdate {
            provider: Some(ProviderKind::AssemblyAi),
            ..Default::default()
        };
        assert!(classify_stt(&current, &update).requires_rebuild());
    }

    #[test]
    fn stt_language_on_fixed_provider_rebuilds() {
        let current = SttConfig {
            provider: ProviderKind::AssemblyAi,
            ..SttConfig::default()
        };
        let update = SttUpdate {
            language: Some("de".into()),
            ..Default::default()
        };
        assert_eq!(
            classify_stt(&current, &update),
            FieldClassification::RequiresRebuild(RebuildReason::UnsupportedField("language"))
        );
    }

    #[test]
    fn blank_fields_are_ignored() {
        let update = TtsUpdate {
            voice: Some("  ".into()),
            speed: Some(0.0),
            ..Default::default()
        };
        assert!(classify_tts(&TtsConfig::default(), &update, &ProviderKind::OpenAi).is_unchanged());
    }

    #[test]
    fn realtime_changes_rebuild() {
        let current = RealtimeConfig::default();
        let update = RealtimeUpdate {
            voice: Some("verse".into()),
            ..Default::default()
        };
        assert!(classify_realtime(&current, &update).requires_rebuild());
        assert!(classify_realtime(&current, &RealtimeUpdate::default()).is_unchanged());
    }
}
