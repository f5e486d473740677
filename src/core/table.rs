use crate::core::model::{CharacterRow, DialogueRow};
use std::collections::BTreeSet;

/// A row type that can be edited one field at a time.
pub trait TableRow: Clone {
    type Field: Copy + PartialEq + std::fmt::Debug;

    fn set(&mut self, field: Self::Field, value: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterField {
    Name,
    Voice,
    Description,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueField {
    Speaker,
    Text,
}

impl TableRow for CharacterRow {
    type Field = CharacterField;

    fn set(&mut self, field: CharacterField, value: String) {
        match field {
            CharacterField::Name => self.name = value,
            CharacterField::Voice => self.voice = value,
            CharacterField::Description => self.description = value,
        }
    }
}

impl TableRow for DialogueRow {
    type Field = DialogueField;

    fn set(&mut self, field: DialogueField, value: String) {
        match field {
            DialogueField::Speaker => self.speaker = value,
            DialogueField::Text => self.text = value,
        }
    }
}

/// One round of user edits against a table. Row ids in `edited` and
/// `deleted` refer to positions in the table before the edit.
#[derive(Debug, Clone)]
pub struct TableEdit<R: TableRow> {
    pub added: Vec<R>,
    pub edited: Vec<(usize, R::Field, String)>,
    pub deleted: Vec<usize>,
}

impl<R: TableRow> Default for TableEdit<R> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            edited: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<R: TableRow> TableEdit<R> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.edited.is_empty() && self.deleted.is_empty()
    }

    /// Edits first, then deletions, then additions appended at the end.
    /// Out-of-range row ids are ignored.
    pub fn apply(&self, rows: &[R]) -> Vec<R> {
        let mut out = rows.to_vec();
        for (row, field, value) in &self.edited {
            if let Some(r) = out.get_mut(*row) {
                r.set(*field, value.clone());
            }
        }
        let deleted: BTreeSet<usize> = self.deleted.iter().copied().collect();
        let mut out: Vec<R> = out
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !deleted.contains(i))
            .map(|(_, r)| r)
            .collect();
        out.extend(self.added.iter().cloned());
        out
    }
}

impl TableEdit<CharacterRow> {
    /// Renames and removals can orphan dialogue lines; voice or description
    /// changes cannot.
    pub fn is_structural(&self) -> bool {
        !self.deleted.is_empty()
            || self
                .edited
                .iter()
                .any(|(_, field, _)| *field == CharacterField::Name)
    }
}

impl TableEdit<DialogueRow> {
    /// Adding or removing lines shifts the joined track.
    pub fn changes_line_set(&self) -> bool {
        !self.added.is_empty() || !self.deleted.is_empty()
    }
}
