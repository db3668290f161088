//! A [`ComponentFactory`] that builds descriptor components without
//! touching any provider SDK.
//!
//! Used by the stdio host and by tests. The most recent builds and accepted
//! option updates are recorded so callers can see what the coordinator did.

use super::diff::Stage;
use super::factory::ComponentFactory;
use super::handles::{
    ActivityDetector, LanguageModel, ProviderOption, RealtimeModel, SpeechToText, TextToSpeech,
};
use crate::config::{LlmConfig, RealtimeConfig, SttConfig, TtsConfig};
use crate::error::{KwamiError, Result};
use crate::provider::ProviderKind;
use crate::provider::catalog::credential_env_vars;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One component construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub stage: Stage,
    pub provider: ProviderKind,
    pub model: String,
}

/// One accepted live option update.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionRecord {
    pub stage: Stage,
    pub provider: ProviderKind,
    pub option: ProviderOption,
}

/// Records kept per kind; older entries are dropped first.
pub const JOURNAL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Journal {
    builds: VecDeque<BuildRecord>,
    options: VecDeque<OptionRecord>,
}

fn push_bounded<T>(records: &mut VecDeque<T>, record: T) {
    if records.len() == JOURNAL_CAPACITY {
        records.pop_front();
    }
    records.push_back(record);
}

type SharedJournal = Arc<Mutex<Journal>>;

fn lock(journal: &SharedJournal) -> MutexGuard<'_, Journal> {
    journal.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct OfflineComponent {
    stage: Stage,
    provider: ProviderKind,
    rejected: HashSet<&'static str>,
    journal: SharedJournal,
}

impl OfflineComponent {
    fn apply(&self, options: &[ProviderOption]) -> Result<()> {
        if let Some(bad) = options.iter().find(|o| self.rejected.contains(o.name)) {
            return Err(KwamiError::OptionUpdateUnsupported(format!(
                "{} {} rejected option '{}'",
                self.provider, self.stage, bad.name
            )));
        }
        let mut journal = lock(&self.journal);
        for option in options {
            debug!(stage = %self.stage, provider = %self.provider, option = option.name, value = %option.value, "option applied");
            push_bounded(&mut journal.options, OptionRecord {
                stage: self.stage,
                provider: self.provider.clone(),
                option: option.clone(),
            });
        }
        Ok(())
    }
}

impl SpeechToText for OfflineComponent {
    fn update_options(&self, options: &[ProviderOption]) -> Result<()> {
        self.apply(options)
    }
}

impl TextToSpeech for OfflineComponent {
    fn update_options(&self, options: &[ProviderOption]) -> Result<()> {
        self.apply(options)
    }
}

impl LanguageModel for OfflineComponent {}

impl RealtimeModel for OfflineComponent {
    fn update_instructions(&self, _instructions: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct OfflineVad;

impl ActivityDetector for OfflineVad {}

/// Descriptor-only component factory.
#[derive(Debug, Clone, Default)]
pub struct OfflineFactory {
    unavailable: HashSet<ProviderKind>,
    rejected: HashSet<&'static str>,
    require_credentials: bool,
    journal: SharedJournal,
}

impl OfflineFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `provider` as unavailable for every stage.
    #[must_use]
    pub fn with_unavailable(mut self, provider: ProviderKind) -> Self {
        self.unavailable.insert(provider);
        self
    }

    /// Make every built component reject live updates of option `name`.
    #[must_use]
    pub fn with_rejected_option(mut self, name: &'static str) -> Self {
        self.rejected.insert(name);
        self
    }

    /// Treat providers whose credential variables are all unset as unavailable.
    #[must_use]
    pub fn with_credentials_required(mut self, required: bool) -> Self {
        self.require_credentials = required;
        self
    }

    #[must_use]
    pub fn builds(&self) -> Vec<BuildRecord> {
        lock(&self.journal).builds.iter().cloned().collect()
    }

    /// Number of components built for `stage`.
    #[must_use]
    pub fn build_count(&self, stage: Stage) -> usize {
        lock(&self.journal)
            .builds
            .iter()
            .filter(|b| b.stage == stage)
            .count()
    }

    #[must_use]
    pub fn applied_options(&self) -> Vec<OptionRecord> {
        lock(&self.journal).options.iter().cloned().collect()
    }

    fn check_available(&self, provider: &ProviderKind) -> Result<()> {
        if self.unavailable.contains(provider) {
            return Err(KwamiError::ProviderUnavailable(format!(
                "{provider} is not available"
            )));
        }
        if !provider.is_known() {
            return Err(KwamiError::ProviderUnavailable(format!(
                "unknown provider '{provider}'"
            )));
        }
        if self.require_credentials {
            let vars = credential_env_vars(provider);
            if !vars.is_empty() && !vars.iter().any(|v| std::env::var_os(v).is_some()) {
                return Err(KwamiError::ProviderUnavailable(format!(
                    "{provider} needs one of {}",
                    vars.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn component(&self, stage: Stage, provider: &ProviderKind, model: &str) -> Result<Arc<OfflineComponent>> {
        self.check_available(provider)?;
        push_bounded(&mut lock(&self.journal).builds, BuildRecord {
            stage,
            provider: provider.clone(),
            model: model.to_owned(),
        });
        Ok(Arc::new(OfflineComponent {
            stage,
            provider: provider.clone(),
            rejected: self.rejected.clone(),
            journal: Arc::clone(&self.journal),
        }))
    }
}

#[async_trait]
impl ComponentFactory for OfflineFactory {
    async fn create_stt(&self, config: &SttConfig) -> Result<Arc<dyn SpeechToText>> {
        Ok(self.component(Stage::Stt, &config.provider, &config.model)?)
    }

    async fn create_llm(&self, config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
        Ok(self.component(Stage::Llm, &config.provider, &config.model)?)
    }

    async fn create_tts(&self, config: &TtsConfig) -> Result<Arc<dyn TextToSpeech>> {
        Ok(self.component(Stage::Tts, &config.provider, &config.model)?)
    }

    async fn create_vad(&self) -> Result<Arc<dyn ActivityDetector>> {
        Ok(Arc::new(OfflineVad))
    }

    async fn create_realtime(
        &self,
        config: &RealtimeConfig,
        _instructions: &str,
    ) -> Result<Arc<dyn RealtimeModel>> {
        Ok(self.component(Stage::Realtime, &config.provider, &config.model)?)
    }
}
