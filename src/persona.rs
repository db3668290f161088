//! Instruction assembly from a persona.
//!
//! The instructions are built in layers:
//!
//! 1. **Opener**: the raw system prompt if set, else `You are {name}, {personality}.`
//! 2. **Character**: traits, conversation style, length and tone guidance.
//! 3. **Voice rules**: spoken-output constraints.
//! 4. **Memory**: context fetched from the memory collaborator, if any.

use crate::config::{EmotionalTone, PersonaConfig, ResponseLength};
use serde::Deserialize;

/// Spoken-output rules, always included.
pub const VOICE_RULES: &str = "\
You are interacting via voice. Keep responses concise and conversational.\n\
Do not use emojis, asterisks, markdown, or other special characters.\n\
Speak naturally as if having a real conversation.";

const CAPABILITIES: &str =
    "You can change your voice or the AI model being used if the user requests it.";

const MEMORY_HEADER: &str = "\
## Your Memory\n\
You have persistent memory of past conversations with this user.\n\
Use this context to provide personalized responses:";

fn length_guide(length: ResponseLength) -> Option<&'static str> {
    match length {
        ResponseLength::Short => Some("Keep responses brief and concise (1-2 sentences)."),
        ResponseLength::Medium => {
            Some("Provide balanced responses with enough detail (2-4 sentences).")
        }
        ResponseLength::Long => Some("Give comprehensive, detailed responses when appropriate."),
        ResponseLength::Unspecified => None,
    }
}

fn tone_guide(tone: EmotionalTone) -> Option<&'static str> {
    match tone {
        EmotionalTone::Neutral => Some("Maintain a balanced, objective tone."),
        EmotionalTone::Warm => Some("Express warmth and friendliness in your interactions."),
        EmotionalTone::Enthusiastic => Some("Show enthusiasm and energy in your responses."),
        EmotionalTone::Calm => Some("Maintain a calm, soothing demeanor."),
        EmotionalTone::Unspecified => None,
    }
}

/// Build the full instruction string.
///
/// Empty sections are skipped so layers are always separated by exactly one
/// blank line.
#[must_use]
pub fn build_instructions(persona: &PersonaConfig, memory_context: Option<&str>) -> String {
    let mut character: Vec<String> = Vec::with_capacity(5);
    match persona.system_prompt.as_deref().map(str::trim) {
        Some(prompt) if !prompt.is_empty() => character.push(prompt.to_owned()),
        _ => character.push(format!("You are {}, {}.", persona.name, persona.personality)),
    }
    if !persona.traits.is_empty() {
        character.push(format!("Key traits: {}", persona.traits.join(", ")));
    }
    if !persona.conversation_style.trim().is_empty() {
        character.push(format!(
            "Conversation style: {}",
            persona.conversation_style.trim()
        ));
    }
    character.extend(length_guide(persona.response_length).map(str::to_owned));
    character.extend(tone_guide(persona.emotional_tone).map(str::to_owned));

    let mut parts = vec![character.join("\n"), VOICE_RULES.to_owned(), CAPABILITIES.to_owned()];
    if let Some(memory) = memory_context.map(str::trim).filter(|m| !m.is_empty()) {
        parts.push(format!("{MEMORY_HEADER}\n{memory}"));
    }
    parts.join("\n\n")
}

/// Greeting instruction for a first entry.
#[must_use]
pub fn greeting_instruction(has_memory: bool) -> &'static str {
    if has_memory {
        "Greet the user warmly. If you have memory context about them, \
         acknowledge the returning user briefly. If not, introduce yourself."
    } else {
        "Greet the user warmly and introduce yourself briefly."
    }
}

/// Partial persona update from a `config_update` message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PersonaUpdate {
    pub name: Option<String>,
    pub personality: Option<String>,
    pub system_prompt: Option<String>,
    pub traits: Option<Vec<String>>,
    pub conversation_style: Option<String>,
    pub response_length: Option<ResponseLength>,
    pub emotional_tone: Option<EmotionalTone>,
}

impl PersonaUpdate {
    /// Apply onto `persona`. An empty `system_prompt` clears the override.
    pub fn apply_to(&self, persona: &mut PersonaConfig) {
        if let Some(name) = &self.name {
            persona.name.clone_from(name);
        }
        if let Some(personality) = &self.personality {
            persona.personality.clone_from(personality);
        }
        if let Some(prompt) = &self.system_prompt {
            persona.system_prompt = Some(prompt.trim().to_owned()).filter(|p| !p.is_empty());
        }
        if let Some(traits) = &self.traits {
            persona.traits.clear();
            for value in traits {
                persona.add_trait(value);
            }
        }
        if let Some(style) = &self.conversation_style {
            persona.conversation_style.clone_from(style);
        }
        if let Some(length) = self.response_length {
            persona.response_length = length;
        }
        if let Some(tone) = self.emotional_tone {
            persona.emotional_tone = tone;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_persona_instructions() {
        let text = build_instructions(&PersonaConfig::default(), None);
        assert!(text.starts_with("You are Kwami, a friendly and helpful AI companion."));
        assert!(text.contains("Key traits: curious, warm, attentive"));
        assert!(text.contains("(2-4 sentences)"));
        assert!(text.contains("Express warmth"));
        assert!(text.contains(VOICE_RULES));
        assert!(!text.contains("## Your Memory"));
        assert!(!text.contains("\n\n\n"));
    }

    #[test]
    fn system_prompt_replaces_opener() {
        let persona = PersonaConfig {
            system_prompt: Some("You are a pirate.".into()),
            ..PersonaConfig::default()
        };
        let text = build_instructions(&persona, None);
        assert!(text.starts_with("You are a pirate."));
        assert!(!text.contains("You are Kwami"));
    }

    #[test]
    fn memory_context_is_appended_last() {
        let text = build_instructions(&PersonaConfig::default(), Some("User likes tea."));
        assert!(text.ends_with("## Your Memory\nYou have persistent memory of past conversations with this user.\nUse this context to provide personalized responses:\nUser likes tea."));
        let blank = build_instructions(&PersonaConfig::default(), Some("   "));
        assert!(!blank.contains("## Your Memory"));
    }

    #[test]
    fn unspecified_guides_are_omitted() {
        let persona = PersonaConfig {
            traits: Vec::new(),
            conversation_style: String::new(),
            response_length: ResponseLength::Unspecified,
            emotional_tone: EmotionalTone::Unspecified,
            ..PersonaConfig::default()
        };
        let text = build_instructions(&persona, None);
        let first = text.split("\n\n").next().unwrap();
        assert_eq!(first, "You are Kwami, a friendly and helpful AI companion.");
    }

    #[test]
    fn update_applies_only_supplied_fields() {
        let mut persona = PersonaConfig::default();
        let update: PersonaUpdate = serde_json::from_str(
            r#"{"name": "Nova", "system_prompt": "", "emotional_tone": "calm"}"#,
        )
        .unwrap();
        persona.system_prompt = Some("old".into());
        update.apply_to(&mut persona);
        assert_eq!(persona.name, "Nova");
        assert_eq!(persona.system_prompt, None);
        assert_eq!(persona.emotional_tone, EmotionalTone::Calm);
        assert_eq!(persona.personality, PersonaConfig::default().personality);
    }

    #[test]
    fn greeting_mentions_returning_user_with_memory() {
        assert!(greeting_instruction(true).contains("returning user"));
        assert!(!greeting_instruction(false).contains("returning user"));
    }
}
