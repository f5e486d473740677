use crate::core::error::{DialogueError, DialogueResult};
use crate::core::io::Storage;
use crate::core::model::{CharacterRow, DialogueRow};
use crate::core::table::TableEdit;
use crate::core::workspace::Workspace;
use crate::services::dialogue::{assign_line_numbers, matches, missing_speakers};
use anyhow::Result;
use log::{info, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineState {
    Absent,
    Generating,
    Ready,
    Error(String),
}

/// Per-line audio state plus the freshness of the derived tracks.
#[derive(Debug, Clone, Default)]
pub struct ProductionState {
    lines: BTreeMap<u32, LineState>,
    pub last_error: Option<String>,
    joined_current: bool,
    background_current: bool,
}

impl ProductionState {
    pub fn state(&self, line_number: u32) -> LineState {
        self.lines
            .get(&line_number)
            .cloned()
            .unwrap_or(LineState::Absent)
    }

    pub fn set(&mut self, line_number: u32, state: LineState) {
        if state == LineState::Absent {
            self.lines.remove(&line_number);
        } else {
            self.lines.insert(line_number, state);
        }
    }

    pub fn is_ready(&self, line_number: u32) -> bool {
        self.state(line_number) == LineState::Ready
    }

    pub fn ready_lines(&self) -> Vec<u32> {
        self.lines
            .iter()
            .filter(|(_, s)| **s == LineState::Ready)
            .map(|(n, _)| *n)
            .collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.last_error = None;
        self.invalidate_tracks();
    }

    /// Joined and background tracks no longer reflect the line artifacts.
    pub fn invalidate_tracks(&mut self) {
        self.joined_current = false;
        self.background_current = false;
    }

    pub fn mark_joined(&mut self) {
        self.joined_current = true;
        self.background_current = false;
    }

    pub fn mark_background(&mut self) {
        self.background_current = true;
    }

    pub fn joined_current(&self) -> bool {
        self.joined_current
    }

    pub fn background_current(&self) -> bool {
        self.background_current
    }
}

/// Everything one editing session owns. Passed explicitly to every
/// operation instead of living in ambient UI state.
#[derive(Debug)]
pub struct SessionContext {
    pub session_id: String,
    pub workspace: Workspace,
    pub plot: Option<String>,
    /// Last accepted LLM output, kept until the character set stops matching.
    pub generated_dialogue: Option<Vec<DialogueRow>>,
    pub production: ProductionState,
}

impl SessionContext {
    pub fn new(session_folder: &str, storage: Arc<dyn Storage>) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        info!("session id: {}", session_id);
        Self::resume(session_folder, &session_id, storage)
    }

    pub fn resume(session_folder: &str, session_id: &str, storage: Arc<dyn Storage>) -> Result<Self> {
        let workspace = Workspace::open(session_folder, session_id, storage)?;
        Ok(Self {
            session_id: session_id.to_string(),
            workspace,
            plot: None,
            generated_dialogue: None,
            production: ProductionState::default(),
        })
    }

    pub fn set_plot(&mut self, plot: &str) {
        let trimmed = plot.trim();
        self.plot = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }

    /// Caches freshly generated dialogue, but only if every speaker exists.
    pub fn accept_generated(
        &mut self,
        rows: Vec<DialogueRow>,
        characters: &[CharacterRow],
    ) -> DialogueResult<()> {
        let names: Vec<&str> = characters.iter().map(|c| c.name.as_str()).collect();
        let speakers: Vec<&str> = rows.iter().map(|r| r.speaker.as_str()).collect();
        if !matches(names.iter().copied(), speakers.iter().copied()) {
            let missing = missing_speakers(names, speakers);
            warn!("generated dialogue uses unknown speakers: {:?}", missing);
            return Err(DialogueError::Consistency { missing });
        }
        info!("caching generated dialogue ({} lines)", rows.len());
        self.generated_dialogue = Some(rows);
        Ok(())
    }

    /// Drops the cached generated dialogue when the characters no longer
    /// cover its speakers. The error tells the caller to notify the user.
    pub fn revalidate_generated(&mut self, characters: &[CharacterRow]) -> DialogueResult<()> {
        let Some(rows) = &self.generated_dialogue else {
            return Ok(());
        };
        let names: Vec<&str> = characters.iter().map(|c| c.name.as_str()).collect();
        let speakers: Vec<&str> = rows.iter().map(|r| r.speaker.as_str()).collect();
        if matches(names.iter().copied(), speakers.iter().copied()) {
            return Ok(());
        }
        let missing = missing_speakers(names, speakers);
        warn!(
            "characters do not match between generated dialogue and current characters, missing {:?}",
            missing
        );
        self.generated_dialogue = None;
        Err(DialogueError::Consistency { missing })
    }

    /// Applies a character-table edit, re-checking cached dialogue when the
    /// edit renames or removes someone.
    pub fn edit_characters(
        &mut self,
        rows: &[CharacterRow],
        edit: &TableEdit<CharacterRow>,
    ) -> (Vec<CharacterRow>, DialogueResult<()>) {
        let updated = edit.apply(rows);
        let check = if edit.is_structural() {
            self.revalidate_generated(&updated)
        } else {
            Ok(())
        };
        (updated, check)
    }

    /// Applies a dialogue-table edit. Surviving rows keep their line numbers
    /// and added rows are numbered after every line seen so far. Deleted
    /// lines lose their audio state.
    pub fn edit_dialogue(&mut self, rows: &[DialogueRow], edit: &TableEdit<DialogueRow>) -> Vec<DialogueRow> {
        let mut before = rows.to_vec();
        assign_line_numbers(&mut before, 0);
        let highest = before.iter().filter_map(|r| r.line).max().unwrap_or(0);

        let mut after = edit.apply(&before);
        assign_line_numbers(&mut after, highest);

        let kept: HashSet<u32> = after.iter().filter_map(|r| r.line).collect();
        for n in before.iter().filter_map(|r| r.line).filter(|n| !kept.contains(n)) {
            info!("line {} deleted, dropping its audio", n);
            self.production.set(n, LineState::Absent);
        }
        if edit.changes_line_set() {
            self.production.invalidate_tracks();
        }
        after
    }

    /// The dialogue was replaced wholesale; no line audio can be trusted
    /// until it is regenerated or adopted.
    pub fn reset_line_states(&mut self) {
        info!("dialogue replaced, line audio must be regenerated or adopted");
        self.production.clear();
    }
}
