//! Component construction with provider fallback.

use crate::config::{
    FallbackConfig, LlmConfig, PipelineKind, RealtimeConfig, SttConfig, TtsConfig, VoiceConfig,
};
use crate::error::{KwamiError, Result};
use crate::pipeline::diff::Stage;
use crate::pipeline::handles::{
    ActivityDetector, CascadedStages, LanguageModel, LiveHandle, PipelineHandles, PipelineStages,
    RealtimeModel, SpeechToText, TextToSpeech,
};
use crate::provider::ProviderKind;
use crate::provider::catalog::{
    default_llm_model, default_stt_model, default_tts_model, default_tts_voice,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds live components from validated stage configs.
///
/// Implementations own all provider SDK and credential handling.
#[async_trait]
pub trait ComponentFactory: Send + Sync + 'static {
    async fn create_stt(&self, config: &SttConfig) -> Result<Arc<dyn SpeechToText>>;
    async fn create_llm(&self, config: &LlmConfig) -> Result<Arc<dyn LanguageModel>>;
    async fn create_tts(&self, config: &TtsConfig) -> Result<Arc<dyn TextToSpeech>>;
    async fn create_vad(&self) -> Result<Arc<dyn ActivityDetector>>;
    async fn create_realtime(
        &self,
        config: &RealtimeConfig,
        instructions: &str,
    ) -> Result<Arc<dyn RealtimeModel>>;
}

/// Wraps a [`ComponentFactory`] with one retry on a fallback provider.
///
/// Every build returns the config that was actually used so the session can
/// record a fallback.
#[derive(Clone)]
pub struct StageBuilder {
    factory: Arc<dyn ComponentFactory>,
    fallback: FallbackConfig,
}

impl std::fmt::Debug for StageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageBuilder")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

fn should_fall_back(err: &KwamiError, requested: &ProviderKind, fallback: &ProviderKind) -> bool {
    matches!(err, KwamiError::ProviderUnavailable(_)) && requested != fallback
}

impl StageBuilder {
    #[must_use]
    pub fn new(factory: Arc<dyn ComponentFactory>, fallback: FallbackConfig) -> Self {
        Self { factory, fallback }
    }

    pub async fn vad(&self) -> Result<Arc<dyn ActivityDetector>> {
        self.factory.create_vad().await
    }

    pub async fn stt(&self, config: &SttConfig) -> Result<(LiveHandle<dyn SpeechToText>, SttConfig)> {
        match self.factory.create_stt(config).await {
            Ok(handle) => Ok((
                LiveHandle::new(config.provider.clone(), config.model.clone(), handle),
                config.clone(),
            )),
            Err(e) if should_fall_back(&e, &config.provider, &self.fallback.stt) => {
                let provider = self.fallback.stt.clone();
                warn!(stage = %Stage::Stt, requested = %config.provider, fallback = %provider, error = %e, "falling back");
                let effective = SttConfig {
                    model: default_stt_model(&provider)
                        .map_or_else(|| config.model.clone(), str::to_owned),
                    provider,
                    ..config.clone()
                };
                let handle = self.factory.create_stt(&effective).await?;
                Ok((
                    LiveHandle::new(effective.provider.clone(), effective.model.clone(), handle),
                    effective,
                ))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn llm(&self, config: &LlmConfig) -> Result<(LiveHandle<dyn LanguageModel>, LlmConfig)> {
        match self.factory.create_llm(config).await {
            Ok(handle) => Ok((
                LiveHandle::new(config.provider.clone(), config.model.clone(), handle),
                config.clone(),
            )),
            Err(e) if should_fall_back(&e, &config.provider, &self.fallback.llm) => {
                let provider = self.fallback.llm.clone();
                warn!(stage = %Stage::Llm, requested = %config.provider, fallback = %provider, error = %e, "falling back");
                let effective = LlmConfig {
                    model: default_llm_model(&provider)
                        .map_or_else(|| config.model.clone(), str::to_owned),
                    provider,
                    ..config.clone()
                };
                let handle = self.factory.create_llm(&effective).await?;
                Ok((
                    LiveHandle::new(effective.provider.clone(), effective.model.clone(), handle),
                    effective,
                ))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn tts(&self, config: &TtsConfig) -> Result<(LiveHandle<dyn TextToSpeech>, TtsConfig)> {
        match self.factory.create_tts(config).await {
            Ok(handle) => Ok((
                LiveHandle::new(config.provider.clone(), config.model.clone(), handle),
                config.clone(),
            )),
            Err(e) if should_fall_back(&e, &config.provider, &self.fallback.tts) => {
                let provider = self.fallback.tts.clone();
                warn!(stage = %Stage::Tts, requested = %config.provider, fallback = %provider, error = %e, "falling back");
                let effective = TtsConfig {
                    model: default_tts_model(&provider)
                        .map_or_else(|| config.model.clone(), str::to_owned),
                    voice: default_tts_voice(&provider)
                        .map_or_else(|| config.voice.clone(), str::to_owned),
                    provider,
                    speed: config.speed,
                };
                let handle = self.factory.create_tts(&effective).await?;
                Ok((
                    LiveHandle::new(effective.provider.clone(), effective.model.clone(), handle),
                    effective,
                ))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn realtime(
        &self,
        config: &RealtimeConfig,
        instructions: &str,
    ) -> Result<(LiveHandle<dyn RealtimeModel>, RealtimeConfig)> {
        match self.factory.create_realtime(config, instructions).await {
            Ok(handle) => Ok((
                LiveHandle::new(config.provider.clone(), config.model.clone(), handle),
                config.clone(),
            )),
            Err(e) if should_fall_back(&e, &config.provider, &self.fallback.realtime) => {
                let provider = self.fallback.realtime.clone();
                warn!(stage = %Stage::Realtime, requested = %config.provider, fallback = %provider, error = %e, "falling back");
                let defaults = RealtimeConfig::default();
                let effective = RealtimeConfig {
                    provider,
                    model: defaults.model,
                    voice: defaults.voice,
                    modalities: config.modalities.clone(),
                };
                let handle = self.factory.create_realtime(&effective, instructions).await?;
                Ok((
                    LiveHandle::new(effective.provider.clone(), effective.model.clone(), handle),
                    effective,
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Build a complete handle set for `voice`.
    pub async fn build(
        &self,
        voice: &VoiceConfig,
        vad: Arc<dyn ActivityDetector>,
        instructions: &str,
        generation: u64,
    ) -> Result<(PipelineHandles, VoiceConfig)> {
        let mut effective = voice.clone();
        let stages = match voice.pipeline {
            PipelineKind::Realtime => {
                let (model, config) = self.realtime(&voice.realtime, instructions).await?;
                effective.realtime = config;
                PipelineStages::Realtime(model)
            }
            PipelineKind::Pipeline => {
                let (stt, stt_config) = self.stt(&voice.stt).await?;
                let (llm, llm_config) = self.llm(&voice.llm).await?;
                let (tts, tts_config) = self.tts(&voice.tts).await?;
                effective.stt = stt_config;
                effective.llm = llm_config;
                effective.tts = tts_config;
                PipelineStages::Cascaded(CascadedStages { stt, llm, tts })
            }
        };
        let handles = PipelineHandles {
            generation,
            stages,
            vad,
        };
        debug!(generation, pipeline = %handles.describe(), "built pipeline");
        Ok((handles, effective))
    }

    /// Build a replacement handle set that rebuilds only `stages`.
    ///
    /// Stages not listed keep the exact live handle from `current`. A
    /// shape change (cascaded ↔ realtime) falls through to a full build.
    pub async fn rebuild(
        &self,
        current: &PipelineHandles,
        voice: &VoiceConfig,
        stages: &[Stage],
        instructions: &str,
    ) -> Result<(PipelineHandles, VoiceConfig)> {
        let generation = current.generation + 1;
        let vad = Arc::clone(&current.vad);
        let mut effective = voice.clone();

        match (&current.stages, voice.pipeline) {
            (PipelineStages::Cascaded(live), PipelineKind::Pipeline) => {
                let stt = if stages.contains(&Stage::Stt) {
                    let (handle, config) = self.stt(&voice.stt).await?;
                    effective.stt = config;
                    handle
                } else {
                    live.stt.clone()
                };
                let llm = if stages.contains(&Stage::Llm) {
                    let (handle, config) = self.llm(&voice.llm).await?;
                    effective.llm = config;
                    handle
                } else {
                    live.llm.clone()
                };
                let tts = if stages.contains(&Stage::Tts) {
                    let (handle, config) = self.tts(&voice.tts).await?;
                    effective.tts = config;
                    handle
                } else {
                    live.tts.clone()
                };
                let handles = PipelineHandles {
                    generation,
                    stages: PipelineStages::Cascaded(CascadedStages { stt, llm, tts }),
                    vad,
                };
                debug!(generation, rebuilt = ?stages, pipeline = %handles.describe(), "rebuilt pipeline stages");
                Ok((handles, effective))
            }
            (PipelineStages::Realtime(live), PipelineKind::Realtime)
                if !stages.contains(&Stage::Realtime) =>
            {
                let handles = PipelineHandles {
                    generation,
                    stages: PipelineStages::Realtime(live.clone()),
                    vad,
                };
                Ok((handles, effective))
            }
            _ => self.build(voice, vad, instructions, generation).await,
        }
    }
}
