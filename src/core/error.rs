use thiserror::Error;

#[derive(Debug, Error)]
pub enum DialogueError {
    /// A voice label, speaker, effect or background name that does not exist.
    #[error("{kind} not found: {name}")]
    Resolution { kind: &'static str, name: String },

    #[error("duplicate character name: {0}")]
    DuplicateName(String),

    /// Text that the plain-text form could not carry back unchanged.
    #[error("{kind} {name:?} may not contain ':' or '|' or start with '#'")]
    ReservedText { kind: &'static str, name: String },

    #[error("import failed: {0}")]
    StructuralImport(String),

    #[error(
        "failed to synthesize line {line_number} for {character} with the voice {voice_label} (voice_id: {voice_id})"
    )]
    Synthesis {
        line_number: u32,
        character: String,
        voice_label: String,
        voice_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no audio for line {0}, generate or redo it first")]
    MissingArtifact(u32),

    #[error("the joined dialogue is out of date or missing, join the lines again")]
    StaleJoin,

    #[error("dialogue speakers not in the character list: {}", missing.join(", "))]
    Consistency { missing: Vec<String> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DialogueError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Resolution {
            kind,
            name: name.into(),
        }
    }
}

pub type DialogueResult<T> = std::result::Result<T, DialogueError>;
