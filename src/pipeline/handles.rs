//! Live pipeline components and the handle set bound to a session.
//!
//! Components are built by a [`ComponentFactory`](super::ComponentFactory)
//! and shared behind `Arc`. Each one is wrapped in a [`LiveHandle`] that
//! records which provider and model produced it.

use crate::error::Result;
use crate::provider::ProviderKind;
use std::fmt;
use std::sync::Arc;

/// Value of a live provider option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// A named option passed to a component's `update_options`.
///
/// Names come from the per-provider table in
/// [`catalog`](crate::provider::catalog).
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOption {
    pub name: &'static str,
    pub value: OptionValue,
}

impl ProviderOption {
    #[must_use]
    pub fn text(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: OptionValue::Text(value.into()),
        }
    }

    #[must_use]
    pub fn number(name: &'static str, value: f64) -> Self {
        Self {
            name,
            value: OptionValue::Number(value),
        }
    }
}

/// Streaming speech recognition.
pub trait SpeechToText: Send + Sync + fmt::Debug {
    /// Change decoding options on the live stream.
    ///
    /// # Errors
    ///
    /// Returns [`KwamiError::OptionUpdateUnsupported`](crate::error::KwamiError::OptionUpdateUnsupported)
    /// if the component rejects an option.
    fn update_options(&self, options: &[ProviderOption]) -> Result<()>;
}

/// Text generation. Immutable once built.
pub trait LanguageModel: Send + Sync + fmt::Debug {}

/// Speech synthesis.
pub trait TextToSpeech: Send + Sync + fmt::Debug {
    /// Change synthesis options on the live stream.
    ///
    /// # Errors
    ///
    /// Returns [`KwamiError::OptionUpdateUnsupported`](crate::error::KwamiError::OptionUpdateUnsupported)
    /// if the component rejects an option.
    fn update_options(&self, options: &[ProviderOption]) -> Result<()>;
}

/// Voice activity detection, shared by every pipeline generation.
pub trait ActivityDetector: Send + Sync + fmt::Debug {}

/// Combined speech-to-speech model.
pub trait RealtimeModel: Send + Sync + fmt::Debug {
    /// Replace the model's session instructions.
    ///
    /// # Errors
    ///
    /// Returns an error if the live session refuses the update.
    fn update_instructions(&self, instructions: &str) -> Result<()>;
}

/// A live component tagged with the provider and model that built it.
#[derive(Debug)]
pub struct LiveHandle<T: ?Sized> {
    pub provider: ProviderKind,
    pub model: String,
    pub handle: Arc<T>,
}

impl<T: ?Sized> Clone for LiveHandle<T> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            model: self.model.clone(),
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<T: ?Sized> LiveHandle<T> {
    #[must_use]
    pub fn new(provider: ProviderKind, model: impl Into<String>, handle: Arc<T>) -> Self {
        Self {
            provider,
            model: model.into(),
            handle,
        }
    }

    /// Whether both handles point at the same live component.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

/// The three-stage pipeline.
#[derive(Debug, Clone)]
pub struct CascadedStages {
    pub stt: LiveHandle<dyn SpeechToText>,
    pub llm: LiveHandle<dyn LanguageModel>,
    pub tts: LiveHandle<dyn TextToSpeech>,
}

/// The shape of the active pipeline. Exactly one is live at a time.
#[derive(Debug, Clone)]
pub enum PipelineStages {
    Cascaded(CascadedStages),
    Realtime(LiveHandle<dyn RealtimeModel>),
}

/// The handle set currently bound to a session.
#[derive(Debug, Clone)]
pub struct PipelineHandles {
    /// Increases by one with every installed replacement.
    pub generation: u64,
    pub stages: PipelineStages,
    pub vad: Arc<dyn ActivityDetector>,
}

impl PipelineHandles {
    #[must_use]
    pub fn cascaded(&self) -> Option<&CascadedStages> {
        match &self.stages {
            PipelineStages::Cascaded(stages) => Some(stages),
            PipelineStages::Realtime(_) => None,
        }
    }

    #[must_use]
    pub fn realtime(&self) -> Option<&LiveHandle<dyn RealtimeModel>> {
        match &self.stages {
            PipelineStages::Realtime(model) => Some(model),
            PipelineStages::Cascaded(_) => None,
        }
    }

    #[must_use]
    pub fn is_realtime(&self) -> bool {
        matches!(self.stages, PipelineStages::Realtime(_))
    }

    /// Short description for logs, e.g. `deepgram/nova-2 → openai/gpt-4o-mini → openai/tts-1`.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.stages {
            PipelineStages::Cascaded(s) => format!(
                "{}/{} → {}/{} → {}/{}",
                s.stt.provider, s.stt.model, s.llm.provider, s.llm.model, s.tts.provider, s.tts.model
            ),
            PipelineStages::Realtime(m) => format!("realtime {}/{}", m.provider, m.model),
        }
    }
}
