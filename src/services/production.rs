use crate::core::error::{DialogueError, DialogueResult};
use crate::core::model::{DialogueDocument, DialogueLine};
use crate::core::session::{LineState, SessionContext};
use crate::services::dialogue::ensure_matched;
use crate::services::tts::{resolve_settings, SpeechClient, Voice, VoiceSettings};
use crate::utils::audio::{concat_with_gaps, AudioClip, Waveform};
use log::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationProgress {
    pub completed: usize,
    pub total: usize,
    pub line_number: u32,
}

impl GenerationProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// A sound effect laid over a line's speech.
#[derive(Debug, Clone)]
pub struct EffectOverlay {
    pub clip: AudioClip,
    /// Offset into the speech track.
    pub start_secs: f64,
    pub volume_db: f32,
    /// Times the effect is played back to back. Zero is treated as one.
    pub repeat: u32,
}

#[derive(Debug, Clone, Default)]
pub struct LineEdit {
    pub volume_db: f32,
    pub effect: Option<EffectOverlay>,
}

#[derive(Debug, Clone)]
pub struct EditPreview {
    pub effect: Option<AudioClip>,
    pub mixed: AudioClip,
    pub effect_path: Option<String>,
    pub mixed_path: String,
}

/// Speech gain first, then the effect (own gain, repeated) mixed in at its
/// offset and cut at the end of the speech.
pub fn render_edit(speech: &AudioClip, edit: &LineEdit) -> anyhow::Result<(Option<AudioClip>, AudioClip)> {
    let mixed = speech.with_gain_db(edit.volume_db);
    match &edit.effect {
        Some(overlay) => {
            let effect = overlay
                .clip
                .with_gain_db(overlay.volume_db)
                .repeat(overlay.repeat.max(1));
            let mixed = mixed.overlay(&effect, overlay.start_secs)?;
            Ok((Some(effect), mixed))
        }
        None => Ok((None, mixed)),
    }
}

pub struct ProductionEngine {
    speech: Box<dyn SpeechClient>,
    model_id: String,
    settings: VoiceSettings,
    voices: Vec<Voice>,
}

impl ProductionEngine {
    pub fn new(speech: Box<dyn SpeechClient>, model_id: Option<String>, settings: VoiceSettings) -> Self {
        let model_id = model_id.unwrap_or_else(|| speech.default_model());
        Self {
            speech,
            model_id,
            settings,
            voices: Vec::new(),
        }
    }

    /// Voice list used to pick per-voice synthesis settings.
    pub fn set_voices(&mut self, voices: Vec<Voice>) {
        self.voices = voices;
    }

    pub fn speech(&self) -> &dyn SpeechClient {
        self.speech.as_ref()
    }

    async fn settings_for(&self, voice_id: &str) -> VoiceSettings {
        match self.voices.iter().find(|v| v.voice_id == voice_id) {
            Some(voice) => resolve_settings(self.speech.as_ref(), voice, &self.settings).await,
            None => {
                let unknown = Voice::new(voice_id, "", voice_id);
                resolve_settings(self.speech.as_ref(), &unknown, &self.settings).await
            }
        }
    }

    /// Synthesizes one line into its artifact, overwriting any previous one.
    pub async fn generate_line(
        &self,
        session: &mut SessionContext,
        document: &DialogueDocument,
        line: &DialogueLine,
    ) -> DialogueResult<()> {
        let character = document
            .character(&line.speaker)
            .ok_or_else(|| DialogueError::not_found("speaker", line.speaker.clone()))?;
        let n = line.line_number;
        session.production.set(n, LineState::Generating);
        info!("Generating audio for line {} ({})", n, character.name);

        let settings = self.settings_for(&character.voice_id).await;
        let rendered = match self
            .speech
            .synthesize(&line.text, &character.voice_id, &self.model_id, &settings)
            .await
        {
            Ok(bytes) => AudioClip::from_wav_bytes(&bytes).map(|_| bytes),
            Err(e) => Err(e),
        };

        let bytes = match rendered {
            Ok(bytes) => bytes,
            Err(source) => {
                error!("Synthesis failed for line {}: {:#}", n, source);
                session.production.set(n, LineState::Error(format!("{:#}", source)));
                return Err(DialogueError::Synthesis {
                    line_number: n,
                    character: character.name.clone(),
                    voice_label: character.voice_label.clone(),
                    voice_id: character.voice_id.clone(),
                    source,
                });
            }
        };

        let path = session.workspace.line_artifact(n);
        session.workspace.storage().write(&path, &bytes).await?;
        debug!("Wrote {}", path);
        session.production.set(n, LineState::Ready);
        session.production.invalidate_tracks();
        Ok(())
    }

    /// Clears every artifact, then renders lines in order. Stops at the first
    /// failure, keeping the lines already rendered.
    pub async fn generate_all(
        &self,
        session: &mut SessionContext,
        document: &DialogueDocument,
        progress: &mut dyn FnMut(GenerationProgress),
    ) -> DialogueResult<()> {
        ensure_matched(document)?;
        session.workspace.clear_audio().await?;
        session.production.clear();

        let lines = document.lines_in_order();
        let total = lines.len();
        info!("Generating audio for {} lines", total);
        for (i, line) in lines.into_iter().enumerate() {
            if let Err(e) = self.generate_line(session, document, line).await {
                session.production.last_error = Some(e.to_string());
                return Err(e);
            }
            progress(GenerationProgress {
                completed: i + 1,
                total,
                line_number: line.line_number,
            });
        }
        Ok(())
    }

    /// Regenerates a single line. Other artifacts are left alone.
    pub async fn redo(
        &self,
        session: &mut SessionContext,
        document: &DialogueDocument,
        line_number: u32,
    ) -> DialogueResult<()> {
        let line = document
            .lines
            .iter()
            .find(|l| l.line_number == line_number)
            .ok_or_else(|| DialogueError::not_found("line", line_number.to_string()))?;
        info!("Regenerating audio for line {}", line_number);
        self.generate_line(session, document, line).await
    }
}

async fn load_artifact(session: &SessionContext, line_number: u32) -> DialogueResult<AudioClip> {
    let path = session.workspace.line_artifact(line_number);
    if !session.workspace.storage().exists(&path).await? {
        return Err(DialogueError::MissingArtifact(line_number));
    }
    Ok(session.workspace.read_clip(&path).await?)
}

/// Writes the trial mix to the preview files. The artifact is untouched.
pub async fn preview_edit(
    session: &SessionContext,
    line_number: u32,
    edit: &LineEdit,
) -> DialogueResult<EditPreview> {
    let speech = load_artifact(session, line_number).await?;
    let (effect, mixed) = render_edit(&speech, edit)?;

    let workspace = &session.workspace;
    let mixed_path = workspace.preview_mix(line_number);
    workspace.write_clip(&mixed_path, &mixed).await?;
    let effect_path = match &effect {
        Some(clip) => {
            let path = workspace.preview_effect(line_number);
            workspace.write_clip(&path, clip).await?;
            Some(path)
        }
        None => None,
    };
    debug!("Preview for line {} at {}", line_number, mixed_path);

    Ok(EditPreview {
        effect,
        mixed,
        effect_path,
        mixed_path,
    })
}

/// Same mix as the preview, written over the line's artifact. Only lines
/// whose audio is ready can be edited; a file left on disk must be adopted
/// first.
pub async fn apply_edit(
    session: &mut SessionContext,
    line_number: u32,
    edit: &LineEdit,
) -> DialogueResult<AudioClip> {
    if !session.production.is_ready(line_number) {
        return Err(DialogueError::MissingArtifact(line_number));
    }
    let speech = load_artifact(session, line_number).await?;
    let (_, mixed) = render_edit(&speech, edit)?;
    session
        .workspace
        .write_clip(&session.workspace.line_artifact(line_number), &mixed)
        .await?;
    info!("Applied edit to line {}", line_number);
    session.production.invalidate_tracks();
    Ok(mixed)
}

/// Concatenates the given lines, in the given order, into the joined track.
pub async fn join(
    session: &mut SessionContext,
    line_numbers: &[u32],
    gap_secs: f64,
) -> DialogueResult<AudioClip> {
    let mut clips = Vec::with_capacity(line_numbers.len());
    for &n in line_numbers {
        if !session.production.is_ready(n) {
            return Err(DialogueError::MissingArtifact(n));
        }
        clips.push(load_artifact(session, n).await?);
    }

    let aligned: Vec<AudioClip> = match clips.first() {
        Some(first) => {
            let (rate, channels) = (first.sample_rate, first.channels);
            clips
                .iter()
                .map(|c| c.conform(rate, channels))
                .collect::<anyhow::Result<_>>()?
        }
        None => clips,
    };
    let joined = concat_with_gaps(&aligned, gap_secs)?;

    let path = session.workspace.joined_track();
    session.workspace.write_clip(&path, &joined).await?;
    session.production.mark_joined();
    info!(
        "Joined {} lines into {} ({:.2}s)",
        line_numbers.len(),
        path,
        joined.duration_secs()
    );
    Ok(joined)
}

/// Marks artifacts already on disk as ready for the document's lines, e.g.
/// after a project import. Returns the adopted line numbers.
pub async fn adopt_existing(
    session: &mut SessionContext,
    document: &DialogueDocument,
) -> DialogueResult<Vec<u32>> {
    let wanted = document.line_numbers();
    let adopted: Vec<u32> = session
        .workspace
        .artifact_line_numbers()
        .await?
        .into_iter()
        .filter(|n| wanted.contains(n))
        .collect();
    for &n in &adopted {
        session.production.set(n, LineState::Ready);
    }
    session.production.invalidate_tracks();
    info!("Using existing audio for lines {:?}", adopted);
    Ok(adopted)
}

pub async fn waveform(session: &SessionContext, path: &str, points: usize) -> DialogueResult<Waveform> {
    let clip = session.workspace.read_clip(path).await?;
    Ok(clip.waveform(points))
}
