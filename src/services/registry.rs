//! Character registry. Derived from the character table on every
//! interaction; nothing here is stored.

use crate::core::error::{DialogueError, DialogueResult};
use crate::core::model::Character;
use crate::services::tts::Voice;
use std::collections::HashSet;

/// Looks up a voice by its display label (`"Name (category)"`), falling back
/// to an exact bare name. Never substitutes a default voice.
pub fn resolve(voice_label: &str, voices: &[Voice]) -> DialogueResult<String> {
    voices
        .iter()
        .find(|v| v.label() == voice_label)
        .or_else(|| voices.iter().find(|v| v.name == voice_label))
        .map(|v| v.voice_id.clone())
        .ok_or_else(|| DialogueError::not_found("voice", voice_label))
}

pub fn validate_uniqueness(characters: &[Character]) -> DialogueResult<()> {
    let mut seen = HashSet::new();
    for c in characters {
        if !seen.insert(c.name.as_str()) {
            return Err(DialogueError::DuplicateName(c.name.clone()));
        }
    }
    Ok(())
}

/// Names and voice labels are written into `Name|Voice: ...` and
/// `Speaker: ...` records, so the record delimiters are off limits.
pub fn validate_record_text(kind: &'static str, text: &str) -> DialogueResult<()> {
    if text.contains([':', '|']) || text.trim_start().starts_with('#') {
        return Err(DialogueError::ReservedText {
            kind,
            name: text.to_string(),
        });
    }
    Ok(())
}

/// Labels offered to the user when choosing a voice.
pub fn voice_labels(voices: &[Voice]) -> Vec<String> {
    voices.iter().map(Voice::label).collect()
}
