//! The live voice agent bound to a session.
//!
//! A [`VoiceAgent`] pairs a [`KwamiConfig`] with the pipeline built for it,
//! the instruction string derived from its persona, and references to the
//! session's memory and transcript. Reconfiguration never mutates pipeline
//! handles in place across generations: it builds a successor agent that
//! shares the same memory and transcript and swaps it in.

pub mod tools;

use crate::config::{KwamiConfig, PersonaConfig, VoiceConfig};
use crate::memory::{ConversationContext, MemoryHandle, Role, clip_context};
use crate::persona::{build_instructions, greeting_instruction};
use crate::pipeline::handles::PipelineHandles;
use crate::tools::ClientToolSet;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct VoiceAgent {
    config: KwamiConfig,
    pipeline: PipelineHandles,
    instructions: String,
    memory: Option<MemoryHandle>,
    memory_context: Option<String>,
    conversation: ConversationContext,
    tools: ClientToolSet,
    skip_greeting: bool,
}

impl VoiceAgent {
    /// Create the first agent of a session.
    #[must_use]
    pub fn new(
        config: KwamiConfig,
        pipeline: PipelineHandles,
        memory: Option<MemoryHandle>,
        conversation: ConversationContext,
    ) -> Self {
        let instructions = build_instructions(&config.persona, None);
        let tools = ClientToolSet::new(&config.tools);
        Self {
            config,
            pipeline,
            instructions,
            memory,
            memory_context: None,
            conversation,
            tools,
            skip_greeting: false,
        }
    }

    /// Build the agent that replaces `previous`.
    ///
    /// The successor shares the memory handle and transcript, keeps the
    /// fetched memory context while memory stays enabled, and never greets.
    #[must_use]
    pub fn successor(previous: &Self, config: KwamiConfig, pipeline: PipelineHandles) -> Self {
        let memory_context = previous
            .memory_context
            .clone()
            .filter(|_| config.memory.enabled);
        let instructions = build_instructions(&config.persona, memory_context.as_deref());
        let tools = ClientToolSet::new(&config.tools);
        Self {
            config,
            pipeline,
            instructions,
            memory: previous.memory.clone(),
            memory_context,
            conversation: previous.conversation.clone(),
            tools,
            skip_greeting: true,
        }
    }

    #[must_use]
    pub fn config(&self) -> &KwamiConfig {
        &self.config
    }

    #[must_use]
    pub fn pipeline(&self) -> &PipelineHandles {
        &self.pipeline
    }

    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    #[must_use]
    pub fn memory(&self) -> Option<&MemoryHandle> {
        self.memory.as_ref()
    }

    #[must_use]
    pub fn conversation(&self) -> &ConversationContext {
        &self.conversation
    }

    #[must_use]
    pub fn tools(&self) -> &ClientToolSet {
        &self.tools
    }

    #[must_use]
    pub fn skip_greeting(&self) -> bool {
        self.skip_greeting
    }

    fn memory_active(&self) -> bool {
        self.config.memory.enabled && self.memory.is_some()
    }

    /// Run entry hooks: inject memory context, then decide on a greeting.
    ///
    /// Returns the greeting instruction, or `None` for a reconfigured agent.
    pub async fn enter(&mut self) -> Option<&'static str> {
        info!(
            kwami = %self.config.kwami_name,
            kwami_id = self.config.kwami_id.as_deref().unwrap_or("-"),
            generation = self.pipeline.generation,
            "agent entered"
        );

        if self.memory_active()
            && let Some(memory) = self.memory.clone()
        {
            match memory.fetch_context().await {
                Ok(text) if !text.trim().is_empty() => {
                    let clipped = clip_context(text.trim(), self.config.memory.context_max_chars);
                    self.memory_context = Some(clipped.to_owned());
                    self.refresh_instructions();
                    info!(chars = clipped.len(), "injected memory context");
                }
                Ok(_) => debug!("memory returned no context"),
                Err(e) => warn!(error = %e, "failed to fetch memory context"),
            }
        }

        if self.skip_greeting {
            debug!("skipping greeting for reconfigured agent");
            return None;
        }
        Some(greeting_instruction(self.memory_active()))
    }

    /// Replace the persona and rebuild instructions. Pipeline handles are untouched.
    pub fn set_persona(&mut self, persona: PersonaConfig) {
        self.config.persona = persona;
        self.refresh_instructions();
    }

    /// Record patched voice settings without changing handles.
    pub(crate) fn set_voice(&mut self, voice: VoiceConfig) {
        self.config.voice = voice;
    }

    fn refresh_instructions(&mut self) {
        self.instructions = build_instructions(&self.config.persona, self.memory_context.as_deref());
        if let Some(model) = self.pipeline.realtime()
            && let Err(e) = model.handle.update_instructions(&self.instructions)
        {
            warn!(error = %e, "realtime model refused new instructions");
        }
    }

    /// Record a completed turn in the transcript and, if enabled, in memory.
    ///
    /// Memory failures are logged and ignored.
    pub async fn record_turn(&self, role: Role, content: &str) {
        if !self.conversation.push(role, content) {
            return;
        }
        if self.memory_active()
            && let Some(memory) = &self.memory
            && let Err(e) = memory.append(role, content.trim()).await
        {
            warn!(%role, error = %e, "failed to append turn to memory");
        }
    }
}
