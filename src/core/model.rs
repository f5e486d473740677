use serde::{Deserialize, Serialize};

/// A named speaker bound to a provider voice.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Character {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Voice")]
    pub voice_label: String,
    #[serde(rename = "Voice_ID")]
    pub voice_id: String,
    #[serde(rename = "Description", default)]
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DialogueLine {
    #[serde(rename = "Speaker")]
    pub speaker: String,
    /// Stable id; names the line's audio artifact.
    #[serde(rename = "Line")]
    pub line_number: u32,
    #[serde(rename = "Text")]
    pub text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct DialogueDocument {
    pub characters: Vec<Character>,
    #[serde(default)]
    pub plot: Option<String>,
    #[serde(rename = "dialogue")]
    pub lines: Vec<DialogueLine>,
}

impl DialogueDocument {
    pub fn character(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    /// Lines sorted by line number; equal numbers keep their input order.
    pub fn lines_in_order(&self) -> Vec<&DialogueLine> {
        let mut lines: Vec<&DialogueLine> = self.lines.iter().collect();
        lines.sort_by_key(|l| l.line_number);
        lines
    }

    pub fn line_numbers(&self) -> Vec<u32> {
        self.lines_in_order().iter().map(|l| l.line_number).collect()
    }

    pub fn plot_text(&self) -> &str {
        self.plot.as_deref().unwrap_or("")
    }

    /// Back to editable tables, in line order.
    pub fn to_rows(&self) -> (Vec<CharacterRow>, Vec<DialogueRow>) {
        let characters = self
            .characters
            .iter()
            .map(|c| CharacterRow {
                name: c.name.clone(),
                voice: c.voice_label.clone(),
                description: c.description.clone(),
            })
            .collect();
        let dialogue = self
            .lines_in_order()
            .into_iter()
            .map(|l| DialogueRow {
                speaker: l.speaker.clone(),
                text: l.text.clone(),
                line: Some(l.line_number),
            })
            .collect();
        (characters, dialogue)
    }
}

/// Character table row as edited by the user.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct CharacterRow {
    pub name: String,
    pub voice: String,
    #[serde(default)]
    pub description: String,
}

/// Dialogue table row as edited by the user or produced by the LLM.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct DialogueRow {
    pub speaker: String,
    pub text: String,
    /// Line number once assigned. Survives edits and deletions of other rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl DialogueRow {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            line: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_in_order_is_stable() {
        let doc = DialogueDocument {
            characters: vec![],
            plot: None,
            lines: vec![
                DialogueLine {
                    speaker: "A".into(),
                    line_number: 3,
                    text: "third".into(),
                },
                DialogueLine {
                    speaker: "B".into(),
                    line_number: 1,
                    text: "first".into(),
                },
                DialogueLine {
                    speaker: "A".into(),
                    line_number: 3,
                    text: "third again".into(),
                },
            ],
        };
        let texts: Vec<&str> = doc.lines_in_order().iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "third", "third again"]);
        assert_eq!(doc.line_numbers(), vec![1, 3, 3]);
    }

    #[test]
    fn test_legacy_json_without_description_or_plot() {
        let json = r#"{
            "characters": [{ "Name": "Ann", "Voice": "Rachel (premade)", "Voice_ID": "v1" }],
            "dialogue": [{ "Speaker": "Ann", "Line": 0, "Text": "Hi" }]
        }"#;
        let doc: DialogueDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.characters[0].description, "");
        assert!(doc.plot.is_none());
        assert_eq!(doc.lines[0].line_number, 0);
    }

    #[test]
    fn test_rows_carry_stored_line_numbers() {
        let doc = DialogueDocument {
            characters: vec![],
            plot: None,
            lines: vec![
                DialogueLine {
                    speaker: "A".into(),
                    line_number: 7,
                    text: "later".into(),
                },
                DialogueLine {
                    speaker: "B".into(),
                    line_number: 2,
                    text: "earlier".into(),
                },
            ],
        };
        let (_, rows) = doc.to_rows();
        assert_eq!(rows[0].line, Some(2));
        assert_eq!(rows[1].line, Some(7));
    }
}
