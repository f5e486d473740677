use crate::core::error::{DialogueError, DialogueResult};
use crate::core::io::Storage;
use crate::core::model::{CharacterRow, DialogueDocument, DialogueRow};
use crate::core::workspace::Workspace;
use crate::services::dialogue::{self, BuildOutcome};
use crate::services::registry;
use crate::services::tts::Voice;
use anyhow::Context;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::Path;

const CHARACTERS_HEADER: &str = "# CHARACTERS";
const PLOT_HEADER: &str = "# PLOT";
const DIALOGUE_HEADER: &str = "# DIALOGUE";

// --- Structured form ---

pub fn to_json(document: &DialogueDocument) -> DialogueResult<String> {
    Ok(serde_json::to_string_pretty(document).context("Failed to serialize dialogue")?)
}

/// Line numbers are kept exactly as stored.
pub fn from_json(data: &str) -> DialogueResult<DialogueDocument> {
    let mut document: DialogueDocument = serde_json::from_str(data)
        .map_err(|e| DialogueError::StructuralImport(format!("invalid dialogue JSON: {}", e)))?;
    if document.plot.as_deref().is_some_and(|p| p.trim().is_empty()) {
        document.plot = None;
    }
    Ok(document)
}

// --- Plain-text interchange form ---

/// Result of a plain-text import: the tables as written, before any voice
/// is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterchangeDocument {
    pub characters: Vec<CharacterRow>,
    pub plot: Option<String>,
    pub dialogue: Vec<DialogueRow>,
}

impl InterchangeDocument {
    /// Resolves voices and numbers lines by position.
    pub fn build(&self, voices: &[Voice]) -> BuildOutcome {
        dialogue::build(&self.characters, &self.dialogue, self.plot.as_deref(), voices)
    }
}

fn single_line(s: &str) -> String {
    s.replace("\r\n", " ").replace('\n', " ")
}

/// Refuses documents whose names would not read back as the same records.
pub fn export_text(document: &DialogueDocument) -> DialogueResult<String> {
    for c in &document.characters {
        registry::validate_record_text("character", &c.name)?;
        registry::validate_record_text("voice", &c.voice_label)?;
    }
    for line in &document.lines {
        registry::validate_record_text("speaker", &line.speaker)?;
    }

    let mut out = format!("{}\n", CHARACTERS_HEADER);
    for c in &document.characters {
        out.push_str(&format!(
            "{}|{}: {}\n",
            c.name,
            c.voice_label,
            single_line(&c.description)
        ));
    }

    out.push_str(&format!("\n{}\n", PLOT_HEADER));
    match document.plot.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(plot) => out.push_str(&format!("{}\n\n", plot)),
        None => out.push('\n'),
    }

    out.push_str(&format!("{}\n", DIALOGUE_HEADER));
    for line in document.lines_in_order() {
        out.push_str(&format!("{}: {}\n", line.speaker, single_line(&line.text)));
    }
    Ok(out.trim().to_string())
}

/// Strict three-section grammar. Anything that does not split into exactly
/// CHARACTERS, PLOT and DIALOGUE sections is rejected as a whole.
pub fn import_text(data: &str) -> DialogueResult<InterchangeDocument> {
    let normalized = data.replace("\r\n", "\n");
    let sections: Vec<&str> = normalized.trim_end().split("\n\n").collect();
    let [characters, plot, dialogue] = sections.as_slice() else {
        return Err(DialogueError::StructuralImport(format!(
            "expected 3 blank-line separated sections, found {}",
            sections.len()
        )));
    };

    let characters = section_body(characters, CHARACTERS_HEADER)?;
    let plot = section_body(plot, PLOT_HEADER)?
        .lines()
        .filter(|l| !is_comment(l))
        .collect::<Vec<_>>()
        .join("\n");
    let dialogue = section_body(dialogue, DIALOGUE_HEADER)?;

    let mut document = InterchangeDocument {
        plot: Some(plot.trim().to_string()).filter(|p| !p.is_empty()),
        ..Default::default()
    };

    for record in records(characters) {
        let (name_voice, description) = record
            .split_once(':')
            .ok_or_else(|| malformed("character", record))?;
        let (name, voice) = name_voice
            .split_once('|')
            .ok_or_else(|| malformed("character", record))?;
        document.characters.push(CharacterRow {
            name: name.trim().to_string(),
            voice: voice.trim().to_string(),
            description: description.trim().to_string(),
        });
    }

    for record in records(dialogue) {
        let (speaker, text) = record
            .split_once(':')
            .ok_or_else(|| malformed("dialogue", record))?;
        document
            .dialogue
            .push(DialogueRow::new(speaker.trim(), text.trim()));
    }

    info!(
        "Importing: characters:{}, plot:{}, dialogue:{}",
        document.characters.len(),
        document.plot.is_some(),
        document.dialogue.len()
    );
    Ok(document)
}

fn section_body<'a>(section: &'a str, header: &str) -> DialogueResult<&'a str> {
    let section = section.trim_start_matches('\n');
    let (first, rest) = section.split_once('\n').unwrap_or((section, ""));
    if first.trim() != header {
        return Err(DialogueError::StructuralImport(format!(
            "expected section {:?}, found {:?}",
            header, first
        )));
    }
    Ok(rest)
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn records(body: &str) -> impl Iterator<Item = &str> {
    body.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty() && !is_comment(l))
}

fn malformed(kind: &str, record: &str) -> DialogueError {
    DialogueError::StructuralImport(format!("malformed {} record: {:?}", kind, record))
}

// --- Saves ---

/// Writes `saves/<name>.json` inside the session and returns its path.
pub async fn save_document(
    workspace: &Workspace,
    name: &str,
    document: &DialogueDocument,
) -> DialogueResult<String> {
    let path = workspace.save_path(name)?;
    workspace
        .storage()
        .write(&path, to_json(document)?.as_bytes())
        .await?;
    info!("Saved dialogue {} to {}", name, path);
    Ok(path)
}

/// Shareable documents from the global folder plus the session's own saves.
/// A session save shadows a global one of the same name.
pub async fn list_saved_documents(
    global_saves: &str,
    workspace: &Workspace,
) -> DialogueResult<BTreeMap<String, DialogueDocument>> {
    let storage = workspace.storage();
    let mut documents = BTreeMap::new();
    for dir in [global_saves.to_string(), workspace.saves_dir()] {
        for (name, document) in load_folder(storage, &dir).await? {
            documents.insert(name, document);
        }
    }
    Ok(documents)
}

async fn load_folder(storage: &dyn Storage, dir: &str) -> DialogueResult<Vec<(String, DialogueDocument)>> {
    let mut loaded = Vec::new();
    for path in storage.list(dir).await? {
        let p = Path::new(&path);
        if p.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = p.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let bytes = storage.read(&path).await?;
        match from_json(&String::from_utf8_lossy(&bytes)) {
            Ok(document) => loaded.push((stem.to_string(), document)),
            Err(e) => warn!("Skipping unreadable save {}: {}", path, e),
        }
    }
    debug!("Loaded {} saves from {}", loaded.len(), dir);
    Ok(loaded)
}

/// Writes `export/dialogue.txt` and returns its path.
pub async fn export_dialogue(workspace: &Workspace, document: &DialogueDocument) -> DialogueResult<String> {
    let path = workspace.export_text();
    workspace
        .storage()
        .write(&path, export_text(document)?.as_bytes())
        .await?;
    info!("Exported dialogue to {}", path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::model::{Character, DialogueLine};
    use anyhow::Result;
    use std::sync::Arc;

    fn sample() -> DialogueDocument {
        DialogueDocument {
            characters: vec![
                Character {
                    name: "Ann".into(),
                    voice_label: "Rachel (premade)".into(),
                    voice_id: "id-rachel".into(),
                    description: "A retired sailor".into(),
                },
                Character {
                    name: "Ben".into(),
                    voice_label: "Adam (premade)".into(),
                    voice_id: "id-adam".into(),
                    description: String::new(),
                },
            ],
            plot: Some("Two friends find a map.".into()),
            lines: vec![
                DialogueLine {
                    speaker: "Ann".into(),
                    line_number: 1,
                    text: "Look at this.".into(),
                },
                DialogueLine {
                    speaker: "Ben".into(),
                    line_number: 2,
                    text: "Is that a map?".into(),
                },
                DialogueLine {
                    speaker: "Ann".into(),
                    line_number: 5,
                    text: "It is: an old one.".into(),
                },
            ],
        }
    }

    fn triples(rows: &[CharacterRow]) -> Vec<(String, String, String)> {
        rows.iter()
            .map(|r| (r.name.clone(), r.voice.clone(), r.description.clone()))
            .collect()
    }

    #[test]
    fn test_json_round_trip_keeps_line_numbers() {
        let doc = sample();
        let json = to_json(&doc).unwrap();
        assert!(json.contains("\"Voice_ID\""));
        assert!(json.contains("\"Line\": 5"));
        assert_eq!(from_json(&json).unwrap(), doc);

        let no_plot = DialogueDocument { plot: None, ..sample() };
        assert_eq!(from_json(&to_json(&no_plot).unwrap()).unwrap(), no_plot);
    }

    #[test]
    fn test_invalid_json_is_structural_error() {
        assert!(matches!(from_json("{\"characters\": 3}"), Err(DialogueError::StructuralImport(_))));
    }

    #[test]
    fn test_export_layout() {
        let text = export_text(&sample()).unwrap();
        assert_eq!(
            text,
            "# CHARACTERS\n\
             Ann|Rachel (premade): A retired sailor\n\
             Ben|Adam (premade): \n\
             \n\
             # PLOT\n\
             Two friends find a map.\n\
             \n\
             # DIALOGUE\n\
             Ann: Look at this.\n\
             Ben: Is that a map?\n\
             Ann: It is: an old one."
        );
    }

    #[test]
    fn test_text_round_trip() {
        let doc = sample();
        let imported = import_text(&export_text(&doc).unwrap()).unwrap();
        let (characters, dialogue) = doc.to_rows();
        assert_eq!(triples(&imported.characters), triples(&characters));
        assert_eq!(imported.plot, doc.plot);
        let pairs = |rows: &[DialogueRow]| -> Vec<(String, String)> {
            rows.iter().map(|r| (r.speaker.clone(), r.text.clone())).collect()
        };
        assert_eq!(pairs(&imported.dialogue), pairs(&dialogue));

        let voices = vec![
            Voice::new("Rachel", "premade", "id-rachel"),
            Voice::new("Adam", "premade", "id-adam"),
        ];
        let rebuilt = imported.build(&voices);
        assert!(rebuilt.issues.is_empty());
        assert_eq!(rebuilt.document.line_numbers(), vec![1, 2, 3]);
    }

    #[test]
    fn test_text_round_trip_without_plot() {
        let doc = DialogueDocument { plot: None, ..sample() };
        let text = export_text(&doc).unwrap();
        assert!(text.contains("# PLOT\n\n# DIALOGUE"));
        let imported = import_text(&text).unwrap();
        assert!(imported.plot.is_none());
        assert_eq!(imported.dialogue.len(), 3);
    }

    #[test]
    fn test_two_sections_fail() {
        let text = "# CHARACTERS\nAnn|Rachel: x\n\n# PLOT\nA plot\n# DIALOGUE\nAnn: Hi";
        assert!(matches!(import_text(text), Err(DialogueError::StructuralImport(_))));
    }

    #[test]
    fn test_sections_out_of_order_fail() {
        let text = "# PLOT\nA plot\n\n# CHARACTERS\nAnn|Rachel: x\n\n# DIALOGUE\nAnn: Hi";
        assert!(import_text(text).is_err());
    }

    #[test]
    fn test_comments_and_crlf() {
        let text = "# CHARACTERS\r\n# the cast\r\nAnn|Rachel: x\r\n\r\n# PLOT\r\n\r\n# DIALOGUE\r\n# scene one\r\nAnn: Hi\r\n";
        let imported = import_text(text).unwrap();
        assert_eq!(imported.characters.len(), 1);
        assert_eq!(imported.dialogue, vec![DialogueRow::new("Ann", "Hi")]);
        assert!(imported.plot.is_none());
    }

    #[test]
    fn test_plot_comments_are_skipped() {
        let text = "# CHARACTERS\nAnn|Rachel: x\n\n# PLOT\n# internal note\nA heist\ngoes wrong.\n\n# DIALOGUE\nAnn: Hi";
        let imported = import_text(text).unwrap();
        assert_eq!(imported.plot.as_deref(), Some("A heist\ngoes wrong."));

        let only_comment = "# CHARACTERS\nAnn|Rachel: x\n\n# PLOT\n# nothing yet\n\n# DIALOGUE\nAnn: Hi";
        assert!(import_text(only_comment).unwrap().plot.is_none());
    }

    #[test]
    fn test_export_refuses_names_that_would_not_read_back() {
        let mut doc = sample();
        doc.characters[0].name = "Dr: Ann".into();
        assert!(matches!(
            export_text(&doc),
            Err(DialogueError::ReservedText { kind: "character", .. })
        ));

        let mut doc = sample();
        doc.characters[1].voice_label = "Adam: deep".into();
        assert!(export_text(&doc).is_err());

        let mut doc = sample();
        doc.lines[0].speaker = "Ann|B".into();
        assert!(matches!(
            export_text(&doc),
            Err(DialogueError::ReservedText { kind: "speaker", .. })
        ));
    }

    #[test]
    fn test_malformed_record_fails() {
        let text = "# CHARACTERS\nAnn Rachel: x\n\n# PLOT\n\n# DIALOGUE\nAnn: Hi";
        assert!(matches!(import_text(text), Err(DialogueError::StructuralImport(_))));
    }

    #[tokio::test]
    async fn test_session_saves_shadow_global() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().to_str().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let global = format!("{}/saves", root);
        let ws = Workspace::open(&format!("{}/session", root), "s1", storage.clone())?;

        let shared = DialogueDocument { plot: Some("global".into()), ..sample() };
        storage
            .write(&format!("{}/story.json", global), to_json(&shared)?.as_bytes())
            .await?;
        storage
            .write(&format!("{}/other.json", global), to_json(&sample())?.as_bytes())
            .await?;
        storage.write(&format!("{}/broken.json", global), b"not json").await?;

        let mine = DialogueDocument { plot: Some("mine".into()), ..sample() };
        save_document(&ws, "story", &mine).await?;

        let docs = list_saved_documents(&global, &ws).await?;
        assert_eq!(docs.keys().cloned().collect::<Vec<_>>(), vec!["other", "story"]);
        assert_eq!(docs["story"].plot.as_deref(), Some("mine"));
        Ok(())
    }

    #[tokio::test]
    async fn test_export_dialogue_writes_text() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let ws = Workspace::open(temp_dir.path().to_str().unwrap(), "s1", storage.clone())?;
        let path = export_dialogue(&ws, &sample()).await?;
        assert!(path.ends_with("export/dialogue.txt"));
        let text = String::from_utf8(storage.read(&path).await?)?;
        assert!(text.starts_with("# CHARACTERS"));
        Ok(())
    }
}
