use crate::core::error::{DialogueError, DialogueResult};
use crate::core::model::{Character, CharacterRow, DialogueDocument, DialogueLine, DialogueRow};
use crate::services::registry;
use crate::services::tts::Voice;
use log::warn;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Characters,
    Dialogue,
}

/// A row that was left out of a build, and why.
#[derive(Debug)]
pub struct RowIssue {
    pub table: Table,
    /// Zero-based row position in the submitted table.
    pub row: usize,
    pub error: DialogueError,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub document: DialogueDocument,
    pub issues: Vec<RowIssue>,
}

/// True iff every speaker is one of `names`. Unused names are fine.
pub fn matches<'a>(
    names: impl IntoIterator<Item = &'a str>,
    speakers: impl IntoIterator<Item = &'a str>,
) -> bool {
    let names: HashSet<&str> = names.into_iter().collect();
    speakers.into_iter().all(|s| names.contains(s))
}

/// Speakers not covered by `names`, first-seen order, no repeats.
pub fn missing_speakers<'a>(
    names: impl IntoIterator<Item = &'a str>,
    speakers: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let names: HashSet<&str> = names.into_iter().collect();
    let mut seen = HashSet::new();
    speakers
        .into_iter()
        .filter(|s| !names.contains(s) && seen.insert(*s))
        .map(str::to_string)
        .collect()
}

/// Line number for every row. Rows that already carry one keep it; the rest
/// count up from the highest number seen (or `floor`, if higher). A table
/// with no numbered rows is therefore numbered by position + 1.
pub fn line_numbers(rows: &[DialogueRow], floor: u32) -> Vec<u32> {
    let mut next = rows.iter().filter_map(|r| r.line).max().unwrap_or(0).max(floor);
    rows.iter()
        .map(|r| {
            r.line.unwrap_or_else(|| {
                next += 1;
                next
            })
        })
        .collect()
}

/// Stamps `line_numbers` onto the rows.
pub fn assign_line_numbers(rows: &mut [DialogueRow], floor: u32) {
    let numbers = line_numbers(rows, floor);
    for (row, n) in rows.iter_mut().zip(numbers) {
        row.line = Some(n);
    }
}

/// Builds a document from the edited tables. Unresolvable rows are skipped
/// and reported. Rows keep the line numbers they carry; fresh rows are
/// numbered by `line_numbers`, skipped rows included.
pub fn build(
    character_rows: &[CharacterRow],
    dialogue_rows: &[DialogueRow],
    plot: Option<&str>,
    voices: &[Voice],
) -> BuildOutcome {
    let mut issues = Vec::new();
    let mut characters: Vec<Character> = Vec::new();

    for (row, c) in character_rows.iter().enumerate() {
        let reserved = registry::validate_record_text("character", &c.name)
            .and_then(|_| registry::validate_record_text("voice", &c.voice));
        if let Err(error) = reserved {
            warn!("Skipping character row {}: {}", row, error);
            issues.push(RowIssue {
                table: Table::Characters,
                row,
                error,
            });
            continue;
        }
        if characters.iter().any(|existing| existing.name == c.name) {
            warn!("Skipping character row {}: duplicate name {}", row, c.name);
            issues.push(RowIssue {
                table: Table::Characters,
                row,
                error: DialogueError::DuplicateName(c.name.clone()),
            });
            continue;
        }
        match registry::resolve(&c.voice, voices) {
            Ok(voice_id) => characters.push(Character {
                name: c.name.clone(),
                voice_label: c.voice.clone(),
                voice_id,
                description: c.description.clone(),
            }),
            Err(error) => {
                warn!("Skipping character row {}: {}", row, error);
                issues.push(RowIssue {
                    table: Table::Characters,
                    row,
                    error,
                });
            }
        }
    }

    let numbers = line_numbers(dialogue_rows, 0);
    let mut lines = Vec::new();
    for (row, (d, line_number)) in dialogue_rows.iter().zip(numbers).enumerate() {
        if !characters.iter().any(|c| c.name == d.speaker) {
            warn!("Error: {} is not a valid character.", d.speaker);
            issues.push(RowIssue {
                table: Table::Dialogue,
                row,
                error: DialogueError::not_found("speaker", d.speaker.clone()),
            });
            continue;
        }
        lines.push(DialogueLine {
            speaker: d.speaker.clone(),
            line_number,
            text: d.text.clone(),
        });
    }

    BuildOutcome {
        document: DialogueDocument {
            characters,
            plot: plot.map(str::trim).filter(|p| !p.is_empty()).map(str::to_string),
            lines,
        },
        issues,
    }
}

/// Audio generation refuses documents whose speakers are not all defined.
pub fn ensure_matched(document: &DialogueDocument) -> DialogueResult<()> {
    let names = document.characters.iter().map(|c| c.name.as_str());
    let speakers = document.lines.iter().map(|l| l.speaker.as_str());
    let missing = missing_speakers(names, speakers);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DialogueError::Consistency { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voices() -> Vec<Voice> {
        vec![
            Voice::new("Rachel", "premade", "id-rachel"),
            Voice::new("Adam", "premade", "id-adam"),
        ]
    }

    fn crow(name: &str, voice: &str) -> CharacterRow {
        CharacterRow {
            name: name.into(),
            voice: voice.into(),
            description: String::new(),
        }
    }

    #[test]
    fn test_matches_subset_semantics() {
        assert!(matches(["A", "B"], ["A", "A", "B"]));
        assert!(matches(["A", "B", "C"], ["A"]));
        assert!(!matches(["A", "B"], ["A", "C"]));
        assert!(matches(["A"], Vec::<&str>::new()));
    }

    #[test]
    fn test_missing_speakers_dedups() {
        assert_eq!(missing_speakers(["A"], ["C", "A", "C", "D"]), vec!["C", "D"]);
    }

    #[test]
    fn test_build_numbers_by_row_and_skips_unknown_speaker() {
        let outcome = build(
            &[crow("Ann", "Rachel (premade)"), crow("Ben", "Adam")],
            &[
                DialogueRow::new("Ann", "Hello"),
                DialogueRow::new("Zed", "Who?"),
                DialogueRow::new("Ben", "Hi"),
            ],
            Some("  "),
            &voices(),
        );
        let doc = outcome.document;
        assert_eq!(doc.characters.len(), 2);
        assert_eq!(doc.characters[0].voice_id, "id-rachel");
        assert_eq!(doc.line_numbers(), vec![1, 3]);
        assert!(doc.plot.is_none());
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].table, Table::Dialogue);
        assert_eq!(outcome.issues[0].row, 1);
    }

    #[test]
    fn test_build_reports_unknown_voice_and_duplicates() {
        let outcome = build(
            &[crow("Ann", "Nobody"), crow("Ben", "Adam"), crow("Ben", "Rachel")],
            &[DialogueRow::new("Ann", "Hello"), DialogueRow::new("Ben", "Hi")],
            None,
            &voices(),
        );
        assert_eq!(outcome.document.characters.len(), 1);
        assert_eq!(outcome.document.lines.len(), 1);
        assert!(matches!(
            outcome.issues[0].error,
            DialogueError::Resolution { kind: "voice", .. }
        ));
        assert!(matches!(outcome.issues[1].error, DialogueError::DuplicateName(ref n) if n == "Ben"));
        // Ann's line is dropped along with her character row
        assert_eq!(outcome.issues[2].table, Table::Dialogue);
    }

    #[test]
    fn test_numbered_rows_keep_their_numbers() {
        let mut rows = vec![
            DialogueRow::new("Ann", "a"),
            DialogueRow::new("Ben", "b"),
            DialogueRow::new("Ann", "c"),
        ];
        assert_eq!(line_numbers(&rows, 0), vec![1, 2, 3]);
        assign_line_numbers(&mut rows, 0);
        rows.remove(0);
        rows.push(DialogueRow::new("Ben", "d"));
        assert_eq!(line_numbers(&rows, 0), vec![2, 3, 4]);
        assert_eq!(line_numbers(&rows, 9), vec![2, 3, 10]);

        let outcome = build(&[crow("Ann", "Adam"), crow("Ben", "Rachel")], &rows, None, &voices());
        assert_eq!(outcome.document.line_numbers(), vec![2, 3, 4]);
    }

    #[test]
    fn test_build_rejects_names_with_record_delimiters() {
        let outcome = build(
            &[crow("Dr: Ann", "Rachel (premade)"), crow("Ben", "Adam")],
            &[DialogueRow::new("Ben", "Hi")],
            None,
            &voices(),
        );
        assert_eq!(outcome.document.characters.len(), 1);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].row, 0);
        assert!(matches!(
            outcome.issues[0].error,
            DialogueError::ReservedText { kind: "character", .. }
        ));
    }

    #[test]
    fn test_ensure_matched() {
        let mut doc = build(&[crow("Ann", "Adam")], &[DialogueRow::new("Ann", "x")], None, &voices()).document;
        assert!(ensure_matched(&doc).is_ok());
        doc.lines[0].speaker = "Anna".into();
        assert!(matches!(ensure_matched(&doc), Err(DialogueError::Consistency { .. })));
    }
}
