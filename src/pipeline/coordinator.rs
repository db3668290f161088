//! Applies reconfiguration requests to a live session.
//!
//! The coordinator is owned by the session actor, so requests reach it one at
//! a time in arrival order. Each request walks
//! `Ready → Diffing → Applying(InPlace | Rebuild) → Ready`.
//!
//! - **In place**: changed options are set on the live handle. A rejected
//!   option degrades that stage to a rebuild, once.
//! - **Rebuild**: replacement handles are built for the affected stages only,
//!   a successor [`VoiceAgent`] sharing memory and transcript is created, and
//!   it is swapped in before the previous agent (and its handles) is dropped.

use crate::agent::VoiceAgent;
use crate::config::{KwamiConfig, PipelineKind, VoiceConfig};
use crate::error::{KwamiError, Result};
use crate::persona::{PersonaUpdate, build_instructions};
use crate::pipeline::diff::{
    FieldClassification, PatchRequest, Stage, classify_llm, classify_realtime, classify_stt,
    classify_tts,
};
use crate::pipeline::diff::{LlmUpdate, VoiceUpdate};
use crate::pipeline::factory::StageBuilder;
use crate::pipeline::handles::PipelineHandles;
use crate::protocol::{FullConfigMessage, ReconfigurationRequest};
use crate::provider::catalog::{default_stt_model, default_tts_model, default_tts_voice};
use crate::provider::{ProviderIdentityResolver, ResolutionSource};
use crate::session::SessionContext;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Spoken after the synthesis voice changes.
pub const VOICE_UPDATED: &str = "Voice updated!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    InPlace,
    Rebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Ready,
    Diffing,
    Applying(ApplyMode),
    Closed,
}

/// What a reconfiguration did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconfigurationOutcome {
    pub scope: &'static str,
    pub patched: Vec<Stage>,
    pub rebuilt: Vec<Stage>,
    /// Generation of the pipeline live after the request.
    pub generation: u64,
    pub replaced_agent: bool,
    pub instructions_changed: bool,
    /// Text the agent should say to confirm the change.
    pub confirmation: Option<String>,
}

impl ReconfigurationOutcome {
    fn unchanged(scope: &'static str, generation: u64) -> Self {
        Self {
            scope,
            generation,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.patched.is_empty() && self.rebuilt.is_empty() && !self.instructions_changed
    }
}

#[derive(Debug)]
pub struct ReconfigurationCoordinator {
    builder: StageBuilder,
    resolver: ProviderIdentityResolver,
    defaults: KwamiConfig,
    state: CoordinatorState,
}

impl ReconfigurationCoordinator {
    #[must_use]
    pub fn new(
        builder: StageBuilder,
        resolver: ProviderIdentityResolver,
        defaults: KwamiConfig,
    ) -> Self {
        Self {
            builder,
            resolver,
            defaults,
            state: CoordinatorState::Ready,
        }
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    #[must_use]
    pub fn builder(&self) -> &StageBuilder {
        &self.builder
    }

    #[must_use]
    pub fn resolver(&self) -> &ProviderIdentityResolver {
        &self.resolver
    }

    pub fn close(&mut self) {
        self.transition(CoordinatorState::Closed);
    }

    fn transition(&mut self, next: CoordinatorState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "coordinator state");
            self.state = next;
        }
    }

    /// Apply one request to the session.
    ///
    /// # Errors
    ///
    /// - [`KwamiError::SessionClosed`] after [`close`](Self::close).
    /// - [`KwamiError::OptionUpdateUnsupported`] when a rejected patch could not
    ///   be recovered by a rebuild either.
    /// - Any factory error from a rebuild (after provider fallback).
    ///
    /// The session keeps its previous agent on error.
    pub async fn apply(
        &mut self,
        ctx: &mut SessionContext,
        request: ReconfigurationRequest,
    ) -> Result<ReconfigurationOutcome> {
        if self.state == CoordinatorState::Closed {
            return Err(KwamiError::SessionClosed);
        }
        let scope = request.scope();
        self.transition(CoordinatorState::Diffing);

        let result = match request {
            ReconfigurationRequest::Voice(update) => self.apply_voice(ctx, &update).await,
            ReconfigurationRequest::Llm(update) => self.apply_llm(ctx, &update).await,
            ReconfigurationRequest::Persona(update) => Ok(Self::apply_persona(ctx, &update)),
            ReconfigurationRequest::Full(message) => self.apply_full(ctx, &message).await,
        };
        self.transition(CoordinatorState::Ready);

        match &result {
            Ok(outcome) if outcome.is_noop() => debug!(scope, "reconfiguration changed nothing"),
            Ok(outcome) => info!(
                scope,
                generation = outcome.generation,
                patched = ?outcome.patched,
                rebuilt = ?outcome.rebuilt,
                pipeline = %ctx.agent.pipeline().describe(),
                "reconfiguration applied"
            ),
            Err(e) => error!(scope, error = %e, "reconfiguration failed"),
        }
        result
    }

    /// Replace the live agent with a successor bound to `handles`.
    fn install(ctx: &mut SessionContext, config: KwamiConfig, handles: PipelineHandles) {
        let next = VoiceAgent::successor(&ctx.agent, config, handles);
        let previous = std::mem::replace(&mut ctx.agent, next);
        debug!(
            installed = ctx.agent.pipeline().generation,
            released = previous.pipeline().generation,
            "pipeline installed"
        );
        drop(previous);
    }

    fn apply_persona(ctx: &mut SessionContext, update: &PersonaUpdate) -> ReconfigurationOutcome {
        let mut persona = ctx.agent.config().persona.clone();
        update.apply_to(&mut persona);
        ctx.agent.set_persona(persona);
        ReconfigurationOutcome {
            instructions_changed: true,
            ..ReconfigurationOutcome::unchanged("persona", ctx.agent.pipeline().generation)
        }
    }

    async fn apply_llm(
        &mut self,
        ctx: &mut SessionContext,
        update: &LlmUpdate,
    ) -> Result<ReconfigurationOutcome> {
        let generation = ctx.agent.pipeline().generation;
        let current = ctx.agent.config().voice.clone();
        if classify_llm(&current.llm, update).is_unchanged() {
            return Ok(ReconfigurationOutcome::unchanged("llm", generation));
        }

        let mut next = current;
        update.apply_to(&mut next.llm);
        if ctx.agent.pipeline().is_realtime() {
            debug!(model = %next.llm.model, "realtime pipeline active; storing language model settings");
            ctx.agent.set_voice(next);
            return Ok(ReconfigurationOutcome::unchanged("llm", generation));
        }

        self.transition(CoordinatorState::Applying(ApplyMode::Rebuild));
        let (handles, effective) = self
            .builder
            .rebuild(ctx.agent.pipeline(), &next, &[Stage::Llm], ctx.agent.instructions())
            .await?;
        let generation = handles.generation;
        let confirmation = format!("Now using {}.", effective.llm.model);

        let mut config = ctx.agent.config().clone();
        config.voice = effective;
        Self::install(ctx, config, handles);

        Ok(ReconfigurationOutcome {
            scope: "llm",
            rebuilt: vec![Stage::Llm],
            generation,
            replaced_agent: true,
            confirmation: Some(confirmation),
            ..ReconfigurationOutcome::default()
        })
    }

    /// Compute the target voice config for an update, resolving the synthesis
    /// provider and filling catalog defaults after a provider switch.
    fn target_voice(&self, current: &VoiceConfig, update: &VoiceUpdate) -> VoiceConfig {
        let tts = update.tts();
        let requested = tts
            .provider
            .clone()
            .unwrap_or_else(|| current.tts.provider.clone());
        let resolution = self.resolver.resolve(tts.model(), tts.voice(), &requested);
        if resolution.source != ResolutionSource::Retained {
            debug!(provider = %resolution.provider, source = ?resolution.source, "inferred synthesis provider");
        }

        let mut next = current.clone();
        tts.apply_to(&mut next.tts, &resolution.provider);
        if resolution.differs_from(&current.tts.provider) {
            if tts.model().is_none()
                && let Some(model) = default_tts_model(&resolution.provider)
            {
                next.tts.model = model.to_owned();
            }
            if tts.voice().is_none()
                && let Some(voice) = default_tts_voice(&resolution.provider)
            {
                next.tts.voice = voice.to_owned();
            }
        }

        let stt = update.stt();
        stt.apply_to(&mut next.stt);
        if next.stt.provider != current.stt.provider
            && stt.model.is_none()
            && let Some(model) = default_stt_model(&next.stt.provider)
        {
            next.stt.model = model.to_owned();
        }

        update.realtime().apply_to(&mut next.realtime);
        next
    }

    fn patch_live(handles: &PipelineHandles, patch: &PatchRequest) -> Result<()> {
        let stages = handles
            .cascaded()
            .ok_or_else(|| KwamiError::Pipeline("no cascaded pipeline to patch".to_owned()))?;
        match patch {
            PatchRequest::Stt(_) => {
                let options = patch.options(&stages.stt.provider);
                stages.stt.handle.update_options(&options)
            }
            PatchRequest::Tts(_) => {
                let options = patch.options(&stages.tts.provider);
                stages.tts.handle.update_options(&options)
            }
        }
    }

    async fn apply_voice(
        &mut self,
        ctx: &mut SessionContext,
        update: &VoiceUpdate,
    ) -> Result<ReconfigurationOutcome> {
        let current = ctx.agent.config().voice.clone();
        let next = self.target_voice(&current, update);
        let realtime_active = ctx.agent.pipeline().is_realtime();

        let mut patches: Vec<PatchRequest> = Vec::new();
        let mut rebuild: Vec<Stage> = Vec::new();
        // Settings for stages that are not live are stored as-is.
        let mut applied = current.clone();
        if realtime_active {
            applied.stt = next.stt.clone();
            applied.tts = next.tts.clone();
            if classify_realtime(&current.realtime, &update.realtime()).requires_rebuild() {
                rebuild.push(Stage::Realtime);
            }
        } else {
            applied.realtime = next.realtime.clone();
            let classified = [
                (Stage::Stt, classify_stt(&current.stt, &update.stt())),
                (Stage::Tts, classify_tts(&current.tts, &update.tts(), &next.tts.provider)),
            ];
            for (stage, class) in classified {
                match class {
                    FieldClassification::Unchanged => {}
                    FieldClassification::Patchable(patch) => patches.push(patch),
                    FieldClassification::RequiresRebuild(reason) => {
                        debug!(%stage, %reason, "stage requires rebuild");
                        rebuild.push(stage);
                    }
                }
            }
        }

        let mut patched = Vec::new();
        let mut rejected: Option<KwamiError> = None;
        if !patches.is_empty() {
            self.transition(CoordinatorState::Applying(ApplyMode::InPlace));
            for patch in &patches {
                let stage = patch.stage();
                match Self::patch_live(ctx.agent.pipeline(), patch) {
                    Ok(()) => {
                        match patch {
                            PatchRequest::Stt(_) => applied.stt = next.stt.clone(),
                            PatchRequest::Tts(_) => applied.tts = next.tts.clone(),
                        }
                        patched.push(stage);
                    }
                    Err(e) => {
                        warn!(%stage, error = %e, "live update rejected; rebuilding stage");
                        rebuild.push(stage);
                        rejected = Some(e);
                    }
                }
            }
        }

        let mut outcome = ReconfigurationOutcome {
            scope: "voice",
            patched,
            generation: ctx.agent.pipeline().generation,
            ..ReconfigurationOutcome::default()
        };

        if rebuild.is_empty() {
            ctx.agent.set_voice(applied);
        } else {
            self.transition(CoordinatorState::Applying(ApplyMode::Rebuild));
            let mut target = applied.clone();
            for stage in &rebuild {
                match stage {
                    Stage::Stt => target.stt = next.stt.clone(),
                    Stage::Llm => target.llm = next.llm.clone(),
                    Stage::Tts => target.tts = next.tts.clone(),
                    Stage::Realtime => target.realtime = next.realtime.clone(),
                }
            }
            let built = self
                .builder
                .rebuild(ctx.agent.pipeline(), &target, &rebuild, ctx.agent.instructions())
                .await;
            match built {
                Ok((handles, effective)) => {
                    outcome.generation = handles.generation;
                    outcome.rebuilt = rebuild;
                    outcome.replaced_agent = true;
                    let mut config = ctx.agent.config().clone();
                    config.voice = effective;
                    Self::install(ctx, config, handles);
                }
                Err(e) => {
                    ctx.agent.set_voice(applied);
                    return Err(match rejected {
                        Some(patch_error) => KwamiError::OptionUpdateUnsupported(format!(
                            "{patch_error}; rebuild also failed: {e}"
                        )),
                        None => e,
                    });
                }
            }
        }

        let live = &ctx.agent.config().voice.tts;
        if live.voice != current.tts.voice || live.provider != current.tts.provider {
            outcome.confirmation = Some(VOICE_UPDATED.to_owned());
        }
        Ok(outcome)
    }

    /// Build a fresh agent from a full `config` message, keeping memory and transcript.
    async fn apply_full(
        &mut self,
        ctx: &mut SessionContext,
        message: &FullConfigMessage,
    ) -> Result<ReconfigurationOutcome> {
        let mut config = message.apply_to(&self.defaults, ctx.user.as_ref());
        self.transition(CoordinatorState::Applying(ApplyMode::Rebuild));

        let instructions = build_instructions(&config.persona, None);
        let vad = Arc::clone(&ctx.agent.pipeline().vad);
        let generation = ctx.agent.pipeline().generation + 1;
        let (handles, effective) = self
            .builder
            .build(&config.voice, vad, &instructions, generation)
            .await?;
        config.voice = effective;

        let rebuilt = match config.voice.pipeline {
            PipelineKind::Pipeline => vec![Stage::Stt, Stage::Llm, Stage::Tts],
            PipelineKind::Realtime => vec![Stage::Realtime],
        };
        Self::install(ctx, config, handles);
        let _ = ctx.agent.enter().await;

        Ok(ReconfigurationOutcome {
            scope: "full",
            rebuilt,
            generation,
            replaced_agent: true,
            instructions_changed: true,
            ..ReconfigurationOutcome::default()
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::FallbackConfig;
    use crate::memory::ConversationContext;
    use crate::pipeline::offline::OfflineFactory;
    use crate::provider::ProviderKind;

    async fn setup(factory: OfflineFactory) -> (ReconfigurationCoordinator, SessionContext, OfflineFactory) {
        let builder = StageBuilder::new(Arc::new(factory.clone()), FallbackConfig::default());
        let config = KwamiConfig::default();
        let vad = builder.vad().await.unwrap();
        let (handles, _) = builder.build(&config.voice, vad, "", 0).await.unwrap();
        let agent = VoiceAgent::new(config.clone(), handles, None, ConversationContext::new());
        let coordinator =
            ReconfigurationCoordinator::new(builder, ProviderIdentityResolver::default(), config);
        (coordinator, SessionContext::new(agent, None), factory)
    }

    fn voice(update: VoiceUpdate) -> ReconfigurationRequest {
        ReconfigurationRequest::Voice(update)
    }

    #[tokio::test]
    async fn same_provider_voice_change_patches_in_place() {
        let (mut coordinator, mut ctx, factory) = setup(OfflineFactory::new()).await;
        let before = ctx.agent.pipeline().clone();

        let outcome = coordinator
            .apply(
                &mut ctx,
                voice(VoiceUpdate {
                    tts_voice: Some("shimmer".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.patched, vec![Stage::Tts]);
        assert!(outcome.rebuilt.is_empty());
        assert_eq!(outcome.confirmation.as_deref(), Some(VOICE_UPDATED));
        assert_eq!(ctx.agent.config().voice.tts.voice, "shimmer");
        let (a, b) = (before.cascaded().unwrap(), ctx.agent.pipeline().cascaded().unwrap());
        assert!(a.tts.ptr_eq(&b.tts));
        assert_eq!(factory.build_count(Stage::Tts), 1);
        assert_eq!(coordinator.state(), CoordinatorState::Ready);
    }

    #[tokio::test]
    async fn rejected_patch_degrades_to_one_rebuild() {
        let (mut coordinator, mut ctx, factory) =
            setup(OfflineFactory::new().with_rejected_option("speed")).await;

        let outcome = coordinator
            .apply(
                &mut ctx,
                voice(VoiceUpdate {
                    tts_speed: Some(1.4),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        assert!(outcome.patched.is_empty());
        assert_eq!(outcome.rebuilt, vec![Stage::Tts]);
        assert_eq!(factory.build_count(Stage::Tts), 2);
        assert!((ctx.agent.config().voice.tts.speed - 1.4).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn rejected_patch_with_failed_rebuild_surfaces_unsupported() {
        let factory = OfflineFactory::new().with_rejected_option("voice");
        let (mut coordinator, mut ctx, _) = setup(factory).await;
        // Make the rebuild fail too: swap in a builder whose every provider is down.
        coordinator.builder = StageBuilder::new(
            Arc::new(
                OfflineFactory::new()
                    .with_unavailable(ProviderKind::OpenAi)
                    .with_unavailable(ProviderKind::Deepgram),
            ),
            FallbackConfig::default(),
        );

        let err = coordinator
            .apply(
                &mut ctx,
                voice(VoiceUpdate {
                    tts_voice: Some("echo".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KwamiError::OptionUpdateUnsupported(_)), "{err}");
        assert_eq!(ctx.agent.config().voice.tts.voice, "alloy");
        assert_eq!(coordinator.state(), CoordinatorState::Ready);
    }

    #[tokio::test]
    async fn voice_id_shape_switches_provider_with_defaults() {
        let (mut coordinator, mut ctx, _) = setup(OfflineFactory::new()).await;
        let outcome = coordinator
            .apply(
                &mut ctx,
                voice(VoiceUpdate {
                    tts_voice: Some("JBFqnCBsd6RMkjVDRZzb".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(outcome.rebuilt, vec![Stage::Tts]);
        let tts = &ctx.agent.config().voice.tts;
        assert_eq!(tts.provider, ProviderKind::ElevenLabs);
        assert_eq!(tts.model, "eleven_turbo_v2_5");
        assert_eq!(tts.voice, "JBFqnCBsd6RMkjVDRZzb");
    }

    #[tokio::test]
    async fn llm_update_rebuilds_only_llm() {
        let (mut coordinator, mut ctx, _) = setup(OfflineFactory::new()).await;
        ctx.agent.conversation().push(crate::memory::Role::User, "remember me");
        let before = ctx.agent.pipeline().clone();

        let outcome = coordinator
            .apply(
                &mut ctx,
                ReconfigurationRequest::Llm(LlmUpdate {
                    model: Some("gpt-4o".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.rebuilt, vec![Stage::Llm]);
        assert_eq!(outcome.confirmation.as_deref(), Some("Now using gpt-4o."));
        let (a, b) = (before.cascaded().unwrap(), ctx.agent.pipeline().cascaded().unwrap());
        assert!(a.stt.ptr_eq(&b.stt));
        assert!(a.tts.ptr_eq(&b.tts));
        assert!(!a.llm.ptr_eq(&b.llm));
        assert_eq!(ctx.agent.conversation().len(), 1);
        assert!(ctx.agent.skip_greeting());
    }

    #[tokio::test]
    async fn persona_update_keeps_handles() {
        let (mut coordinator, mut ctx, factory) = setup(OfflineFactory::new()).await;
        let builds = factory.builds().len();
        let outcome = coordinator
            .apply(
                &mut ctx,
                ReconfigurationRequest::Persona(PersonaUpdate {
                    name: Some("Nova".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert!(outcome.instructions_changed);
        assert!(!outcome.replaced_agent);
        assert!(ctx.agent.instructions().starts_with("You are Nova,"));
        assert_eq!(factory.builds().len(), builds);
    }

    #[tokio::test]
    async fn full_config_replaces_agent_without_greeting() {
        let (mut coordinator, mut ctx, _) = setup(OfflineFactory::new()).await;
        let transcript = ctx.agent.conversation().clone();
        let message = FullConfigMessage {
            kwami_name: Some("Nova".into()),
            ..Default::default()
        };
        let outcome = coordinator
            .apply(&mut ctx, ReconfigurationRequest::Full(Box::new(message)))
            .await
            .unwrap();
        assert!(outcome.replaced_agent);
        assert_eq!(outcome.generation, 1);
        assert_eq!(ctx.agent.config().kwami_name, "Nova");
        assert!(ctx.agent.skip_greeting());
        assert!(ctx.agent.conversation().same_as(&transcript));
    }

    #[tokio::test]
    async fn closed_coordinator_rejects_requests() {
        let (mut coordinator, mut ctx, _) = setup(OfflineFactory::new()).await;
        coordinator.close();
        let err = coordinator
            .apply(
                &mut ctx,
                ReconfigurationRequest::Persona(PersonaUpdate::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KwamiError::SessionClosed));
    }
}
