use anyhow::{anyhow, Context, Result};
use dialogue2audio::core::config::Config;
use dialogue2audio::core::error::DialogueError;
use dialogue2audio::core::model::{CharacterRow, DialogueDocument, DialogueRow};
use dialogue2audio::core::session::{LineState, SessionContext};
use dialogue2audio::core::table::{CharacterField, DialogueField, TableEdit};
use dialogue2audio::services::assets::{AssetKind, AssetLibrary};
use dialogue2audio::services::dialogue::{self, Table};
use dialogue2audio::services::llm::{DialogueInstructions, DialogueWriter};
use dialogue2audio::services::mixing::{self, BackgroundOptions};
use dialogue2audio::services::production::{
    self, EffectOverlay, GenerationProgress, LineEdit, ProductionEngine,
};
use dialogue2audio::services::tts::Voice;
use dialogue2audio::services::{project, registry, serialization};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, CustomType, Select, Text};
use log::{info, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ShowDocument,
    AddCharacter,
    EditCharacter,
    DeleteCharacter,
    AddLine,
    EditLine,
    DeleteLine,
    SetPlot,
    GenerateDialogue,
    ContinueDialogue,
    LoadSaved,
    Save,
    ImportText,
    ExportText,
    GenerateAudio,
    RedoLine,
    EditLineAudio,
    Join,
    AddBackground,
    Waveform,
    BundleProject,
    ImportProject,
    ListVoices,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::ShowDocument => "Show characters and dialogue",
            Action::AddCharacter => "Add character",
            Action::EditCharacter => "Edit character",
            Action::DeleteCharacter => "Delete character",
            Action::AddLine => "Add dialogue line",
            Action::EditLine => "Edit dialogue line",
            Action::DeleteLine => "Delete dialogue line",
            Action::SetPlot => "Set plot",
            Action::GenerateDialogue => "Generate dialogue (LLM)",
            Action::ContinueDialogue => "Continue dialogue (LLM)",
            Action::LoadSaved => "Load saved dialogue",
            Action::Save => "Save dialogue",
            Action::ImportText => "Import dialogue text",
            Action::ExportText => "Export dialogue text",
            Action::GenerateAudio => "Generate audio",
            Action::RedoLine => "Redo line audio",
            Action::EditLineAudio => "Edit line audio",
            Action::Join => "Join dialogue",
            Action::AddBackground => "Add background audio",
            Action::Waveform => "Show waveform",
            Action::BundleProject => "Prepare project archive",
            Action::ImportProject => "Import project archive",
            Action::ListVoices => "List voices",
            Action::Quit => "Quit",
        };
        write!(f, "{}", label)
    }
}

const ACTIONS: [Action; 24] = [
    Action::ShowDocument,
    Action::AddCharacter,
    Action::EditCharacter,
    Action::DeleteCharacter,
    Action::AddLine,
    Action::EditLine,
    Action::DeleteLine,
    Action::SetPlot,
    Action::GenerateDialogue,
    Action::ContinueDialogue,
    Action::LoadSaved,
    Action::Save,
    Action::ImportText,
    Action::ExportText,
    Action::GenerateAudio,
    Action::RedoLine,
    Action::EditLineAudio,
    Action::Join,
    Action::AddBackground,
    Action::Waveform,
    Action::BundleProject,
    Action::ImportProject,
    Action::ListVoices,
    Action::Quit,
];

pub struct Console {
    config: Config,
    session: SessionContext,
    engine: ProductionEngine,
    writer: Option<DialogueWriter>,
    assets: AssetLibrary,
    voices: Vec<Voice>,
    characters: Vec<CharacterRow>,
    dialogue: Vec<DialogueRow>,
    /// A loaded document keeps its stored line numbers until the tables change.
    loaded: Option<DialogueDocument>,
}

impl Console {
    pub fn new(
        config: Config,
        session: SessionContext,
        engine: ProductionEngine,
        writer: Option<DialogueWriter>,
        assets: AssetLibrary,
        voices: Vec<Voice>,
    ) -> Self {
        Self {
            config,
            session,
            engine,
            writer,
            assets,
            voices,
            characters: Vec::new(),
            dialogue: Vec::new(),
            loaded: None,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("Session: {}", self.session.session_id);
        loop {
            let action = Select::new("What next?", ACTIONS.to_vec())
                .with_page_size(12)
                .prompt()?;
            if action == Action::Quit {
                return Ok(());
            }
            if let Err(e) = self.dispatch(action).await {
                println!("Error: {:#}", e);
            }
        }
    }

    async fn dispatch(&mut self, action: Action) -> Result<()> {
        match action {
            Action::ShowDocument => self.show(),
            Action::AddCharacter => self.add_character(),
            Action::EditCharacter => self.edit_character(),
            Action::DeleteCharacter => self.delete_character(),
            Action::AddLine => self.add_line(),
            Action::EditLine => self.edit_line(),
            Action::DeleteLine => self.delete_line(),
            Action::SetPlot => {
                let plot = Text::new("Plot:")
                    .with_initial_value(self.session.plot.as_deref().unwrap_or(""))
                    .prompt()?;
                self.session.set_plot(&plot);
                self.loaded = None;
                Ok(())
            }
            Action::GenerateDialogue => self.generate_dialogue(false).await,
            Action::ContinueDialogue => self.generate_dialogue(true).await,
            Action::LoadSaved => self.load_saved().await,
            Action::Save => {
                let name = Text::new("Save as:").prompt()?;
                let document = self.document()?;
                let path = serialization::save_document(&self.session.workspace, &name, &document).await?;
                println!("Saved to {}", path);
                Ok(())
            }
            Action::ImportText => {
                let path = Text::new("Dialogue text file:").prompt()?;
                let data = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))?;
                let imported = serialization::import_text(&data)?;
                self.set_tables(imported.characters, imported.plot, imported.dialogue);
                Ok(())
            }
            Action::ExportText => {
                let path = serialization::export_dialogue(&self.session.workspace, &self.document()?).await?;
                println!("Exported to {}", path);
                Ok(())
            }
            Action::GenerateAudio => self.generate_audio().await,
            Action::RedoLine => {
                let document = self.document()?;
                let n = select_line(&document)?;
                self.engine.redo(&mut self.session, &document, n).await?;
                println!("Line {} regenerated.", n);
                Ok(())
            }
            Action::EditLineAudio => self.edit_line_audio().await,
            Action::Join => {
                let document = self.document()?;
                let joined = production::join(
                    &mut self.session,
                    &document.line_numbers(),
                    self.config.dialogue.join_gap_seconds,
                )
                .await?;
                println!(
                    "Joined dialogue ({:.1}s) at {}",
                    joined.duration_secs(),
                    self.session.workspace.joined_track()
                );
                Ok(())
            }
            Action::AddBackground => self.add_background().await,
            Action::Waveform => self.show_waveform().await,
            Action::BundleProject => {
                let path = project::bundle_project(&self.session, &self.document()?).await?;
                println!("Project archive: {}", path);
                Ok(())
            }
            Action::ImportProject => self.import_project().await,
            Action::ListVoices => {
                for label in registry::voice_labels(&self.voices) {
                    println!("  {}", label);
                }
                Ok(())
            }
            Action::Quit => Ok(()),
        }
    }

    fn show(&self) -> Result<()> {
        println!("# CHARACTERS");
        for (i, c) in self.characters.iter().enumerate() {
            println!("  [{}] {} | {} | {}", i, c.name, c.voice, c.description);
        }
        println!("# PLOT\n  {}", self.session.plot.as_deref().unwrap_or("-"));
        println!("# DIALOGUE");
        let numbers = dialogue::line_numbers(&self.dialogue, 0);
        for (d, n) in self.dialogue.iter().zip(numbers) {
            let state = match self.session.production.state(n) {
                LineState::Absent => "",
                LineState::Generating => " (generating)",
                LineState::Ready => " (audio)",
                LineState::Error(_) => " (error)",
            };
            println!("  {:>3}. {}: {}{}", n, d.speaker, d.text, state);
        }
        Ok(())
    }

    /// The document the engine works on: the loaded one while untouched,
    /// otherwise a fresh build from the tables.
    fn document(&self) -> Result<DialogueDocument> {
        if let Some(document) = &self.loaded {
            return Ok(document.clone());
        }
        let outcome = dialogue::build(
            &self.characters,
            &self.dialogue,
            self.session.plot.as_deref(),
            &self.voices,
        );
        for issue in &outcome.issues {
            let table = match issue.table {
                Table::Characters => "character",
                Table::Dialogue => "dialogue",
            };
            println!("Skipped {} row {}: {}", table, issue.row + 1, issue.error);
        }
        Ok(outcome.document)
    }

    fn set_tables(&mut self, characters: Vec<CharacterRow>, plot: Option<String>, dialogue: Vec<DialogueRow>) {
        self.characters = characters;
        self.dialogue = dialogue;
        self.session.set_plot(plot.as_deref().unwrap_or(""));
        self.loaded = None;
        self.session.reset_line_states();
        if let Err(e) = self.session.revalidate_generated(&self.characters) {
            println!("Generated dialogue discarded: {}", e);
        }
    }

    fn apply_character_edit(&mut self, edit: TableEdit<CharacterRow>) {
        let (rows, check) = self.session.edit_characters(&self.characters, &edit);
        self.characters = rows;
        self.loaded = None;
        if let Err(DialogueError::Consistency { missing }) = check {
            println!(
                "Characters no longer match the generated dialogue (missing {}). Please regenerate it.",
                missing.join(", ")
            );
        }
    }

    fn apply_dialogue_edit(&mut self, edit: TableEdit<DialogueRow>) {
        self.dialogue = self.session.edit_dialogue(&self.dialogue, &edit);
        self.loaded = None;
    }

    fn add_character(&mut self) -> Result<()> {
        let name = Text::new("Name:").prompt()?;
        let voice = select_voice(&self.voices)?;
        let description = Text::new("Description:").prompt()?;
        self.apply_character_edit(TableEdit {
            added: vec![CharacterRow { name, voice, description }],
            ..Default::default()
        });
        Ok(())
    }

    fn edit_character(&mut self) -> Result<()> {
        let row = select_row("Character:", self.characters.iter().map(|c| c.name.clone()))?;
        let field = Select::new("Field:", vec!["Name", "Voice", "Description"]).prompt()?;
        let (field, value) = match field {
            "Name" => (CharacterField::Name, Text::new("New name:").prompt()?),
            "Voice" => (CharacterField::Voice, select_voice(&self.voices)?),
            _ => (CharacterField::Description, Text::new("New description:").prompt()?),
        };
        self.apply_character_edit(TableEdit {
            edited: vec![(row, field, value)],
            ..Default::default()
        });
        Ok(())
    }

    fn delete_character(&mut self) -> Result<()> {
        let row = select_row("Delete character:", self.characters.iter().map(|c| c.name.clone()))?;
        self.apply_character_edit(TableEdit {
            deleted: vec![row],
            ..Default::default()
        });
        Ok(())
    }

    fn speaker_names(&self) -> Result<Vec<String>> {
        if self.characters.is_empty() {
            return Err(anyhow!("Add a character first"));
        }
        Ok(self.characters.iter().map(|c| c.name.clone()).collect())
    }

    fn add_line(&mut self) -> Result<()> {
        let speaker = Select::new("Speaker:", self.speaker_names()?).prompt()?;
        let text = Text::new("Text:").prompt()?;
        self.apply_dialogue_edit(TableEdit {
            added: vec![DialogueRow::new(speaker, text)],
            ..Default::default()
        });
        Ok(())
    }

    fn edit_line(&mut self) -> Result<()> {
        let row = select_row(
            "Line:",
            self.dialogue.iter().map(|d| format!("{}: {}", d.speaker, d.text)),
        )?;
        let field = Select::new("Field:", vec!["Speaker", "Text"]).prompt()?;
        let (field, value) = match field {
            "Speaker" => (DialogueField::Speaker, Select::new("Speaker:", self.speaker_names()?).prompt()?),
            _ => (
                DialogueField::Text,
                Text::new("Text:")
                    .with_initial_value(&self.dialogue[row].text)
                    .prompt()?,
            ),
        };
        self.apply_dialogue_edit(TableEdit {
            edited: vec![(row, field, value)],
            ..Default::default()
        });
        if let Some(n) = self.dialogue.get(row).and_then(|d| d.line) {
            println!("Use Redo on line {} to refresh its audio.", n);
        }
        Ok(())
    }

    fn delete_line(&mut self) -> Result<()> {
        let row = select_row(
            "Delete line:",
            self.dialogue.iter().map(|d| format!("{}: {}", d.speaker, d.text)),
        )?;
        self.apply_dialogue_edit(TableEdit {
            deleted: vec![row],
            ..Default::default()
        });
        println!(
            "WARNING: deleting dialogue lines drops their audio. Join again to rebuild the final dialogue, \
             or generate the audio again if lines sound out of place."
        );
        Ok(())
    }

    async fn generate_dialogue(&mut self, continue_existing: bool) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| anyhow!("No LLM configured, add an llm block to config.yml"))?;
        let line_count = CustomType::<usize>::new("Number of lines:")
            .with_default(10)
            .prompt()?;
        let tone = Text::new("Tone (optional):").prompt()?;
        let instructions = DialogueInstructions {
            line_count,
            tone: Some(tone).filter(|t| !t.trim().is_empty()),
            extra: None,
        };

        let document = self.document()?;
        let rows = if continue_existing {
            let (_, existing) = document.to_rows();
            writer
                .continue_dialogue(&document.characters, &existing, &instructions)
                .await?
        } else {
            writer
                .generate_dialogue(&document.characters, document.plot.as_deref(), &instructions)
                .await?
        };

        self.session.accept_generated(rows.clone(), &self.characters)?;
        if continue_existing {
            self.apply_dialogue_edit(TableEdit {
                added: rows,
                ..Default::default()
            });
        } else {
            self.dialogue = rows;
            self.loaded = None;
            self.session.reset_line_states();
        }
        println!("Dialogue now has {} lines.", self.dialogue.len());
        Ok(())
    }

    async fn load_saved(&mut self) -> Result<()> {
        let mut saved =
            serialization::list_saved_documents(&self.config.saves_folder, &self.session.workspace).await?;
        if saved.is_empty() {
            println!("No saved dialogues.");
            return Ok(());
        }
        let name = Select::new("Load:", saved.keys().cloned().collect()).prompt()?;
        let document = saved
            .remove(&name)
            .ok_or_else(|| anyhow!("Saved dialogue {} disappeared", name))?;
        let (characters, dialogue) = document.to_rows();
        self.set_tables(characters, document.plot.clone(), dialogue);
        info!("Loaded dialogue {}", name);
        self.offer_existing_audio(&document).await?;
        self.loaded = Some(document);
        Ok(())
    }

    /// After the dialogue is replaced, artifacts on disk may still match it.
    async fn offer_existing_audio(&mut self, document: &DialogueDocument) -> Result<()> {
        let artifacts = self.session.workspace.artifact_line_numbers().await?;
        if !artifacts.is_empty() && Confirm::new("Use existing audio?").with_default(true).prompt()? {
            let adopted = production::adopt_existing(&mut self.session, document).await?;
            println!("Using existing audio for {} lines.", adopted.len());
        }
        Ok(())
    }

    async fn generate_audio(&mut self) -> Result<()> {
        let document = self.document()?;
        let pb = ProgressBar::new(document.lines.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );
        let result = self
            .engine
            .generate_all(&mut self.session, &document, &mut |p: GenerationProgress| {
                pb.set_position(p.completed as u64)
            })
            .await;
        match result {
            Ok(()) => {
                pb.finish_with_message("Synthesis complete");
                Ok(())
            }
            Err(e) => {
                pb.abandon();
                println!("An error occurred while generating the audio. Please check your API key.");
                Err(e.into())
            }
        }
    }

    async fn edit_line_audio(&mut self) -> Result<()> {
        let document = self.document()?;
        let n = select_line(&document)?;
        let volume_db = CustomType::<f32>::new("Volume (dB):").with_default(0.0).prompt()?;

        let effects = self.assets.list(AssetKind::Effect).await?;
        let effect = if effects.is_empty() || !Confirm::new("Add a sound effect?").with_default(false).prompt()? {
            None
        } else {
            let name = Select::new("Effect:", effects).prompt()?;
            let clip = self.assets.load(AssetKind::Effect, &name).await?;
            Some(EffectOverlay {
                clip,
                start_secs: CustomType::<f64>::new("Effect start (s):").with_default(0.0).prompt()?,
                volume_db: CustomType::<f32>::new("Effect volume (dB):").with_default(0.0).prompt()?,
                repeat: CustomType::<u32>::new("Effect repeat:").with_default(1).prompt()?,
            })
        };
        let edit = LineEdit { volume_db, effect };

        let preview = production::preview_edit(&self.session, n, &edit).await?;
        if let Some(path) = &preview.effect_path {
            println!("Effect preview: {}", path);
        }
        println!("Mixed preview: {} ({:.1}s)", preview.mixed_path, preview.mixed.duration_secs());

        if Confirm::new("Apply this edit to the line?").with_default(false).prompt()? {
            production::apply_edit(&mut self.session, n, &edit).await?;
            println!("Line {} updated. Join again to refresh the final dialogue.", n);
        }
        Ok(())
    }

    async fn add_background(&mut self) -> Result<()> {
        let names = self.assets.list(AssetKind::Background).await?;
        if names.is_empty() {
            println!("No background audio in {}", self.config.backgrounds_folder);
            return Ok(());
        }
        let name = Select::new("Background:", names).prompt()?;
        let options = BackgroundOptions {
            fade_in: Confirm::new("Fade in?").with_default(true).prompt()?,
            fade_out: Confirm::new("Fade out?").with_default(true).prompt()?,
            lower_db: CustomType::<f32>::new("Lower background volume (dB):")
                .with_default(0.0)
                .prompt()?,
        };
        mixing::apply_background(
            &mut self.session,
            &self.assets,
            &name,
            &options,
            self.config.dialogue.background_fade_seconds,
        )
        .await?;
        println!("Background audio added: {}", self.session.workspace.background_track());
        Ok(())
    }

    async fn show_waveform(&self) -> Result<()> {
        let workspace = &self.session.workspace;
        let path = if self.session.production.background_current() {
            workspace.background_track()
        } else {
            workspace.joined_track()
        };
        let wave = production::waveform(&self.session, &path, self.config.dialogue.waveform_points).await?;
        println!("{} ({:.1}s @ {} Hz)", path, wave.duration_secs, wave.sample_rate);
        for point in wave.points.iter().step_by((wave.points.len() / 40).max(1)) {
            let bar = "#".repeat((point.peak.min(1.0) * 50.0) as usize);
            println!("{:>7.2}s |{}", point.time_secs, bar);
        }
        Ok(())
    }

    async fn import_project(&mut self) -> Result<()> {
        let path = Text::new("Project archive (.zip):").prompt()?;
        let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path))?;
        let imported = project::import_project(&mut self.session, &bytes).await?;
        let outcome = imported.build(&self.voices);
        self.set_tables(imported.characters, imported.plot, imported.dialogue);
        if !outcome.issues.is_empty() {
            warn!("{} rows could not be resolved after import", outcome.issues.len());
        }
        self.offer_existing_audio(&outcome.document).await
    }
}

fn select_voice(voices: &[Voice]) -> Result<String> {
    let labels = registry::voice_labels(voices);
    if labels.is_empty() {
        return Ok(Text::new("Voice label:").prompt()?);
    }
    Ok(Select::new("Voice:", labels).prompt()?)
}

fn select_row(prompt: &str, items: impl Iterator<Item = String>) -> Result<usize> {
    let options: Vec<String> = items
        .enumerate()
        .map(|(i, s)| format!("{:>3}. {}", i + 1, s))
        .collect();
    if options.is_empty() {
        return Err(anyhow!("Nothing to choose from"));
    }
    let choice = Select::new(prompt, options).raw_prompt()?;
    Ok(choice.index)
}

fn select_line(document: &DialogueDocument) -> Result<u32> {
    let lines = document.lines_in_order();
    if lines.is_empty() {
        return Err(anyhow!("The dialogue has no lines"));
    }
    let options: Vec<String> = lines
        .iter()
        .map(|l| format!("{:>3}. {}: {}", l.line_number, l.speaker, l.text))
        .collect();
    let choice = Select::new("Line:", options).raw_prompt()?;
    Ok(lines[choice.index].line_number)
}
