use crate::core::io::Storage;
use crate::utils::audio::AudioClip;
use anyhow::{anyhow, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ARTIFACT_EXT: &str = "wav";

/// Session ids double as directory names, so only a conservative character
/// set is accepted.
pub fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(anyhow!("Invalid session id: {:?}", id));
    }
    Ok(())
}

/// Same rule for user-chosen document names.
pub fn validate_file_stem(name: &str) -> Result<()> {
    if name.trim().is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
    {
        return Err(anyhow!("Invalid document name: {:?}", name));
    }
    Ok(())
}

/// The file namespace owned by one session:
///
/// ```text
/// <session_folder>/<session_id>/
///     saves/<name>.json
///     audio/line<N>.wav, audio/dialogue.wav, audio/dialogue_background.wav
///     preview/line<N>_mix.wav, preview/line<N>_effect.wav
///     export/dialogue.txt, export/audio/*
///     project/project.zip
/// ```
#[derive(Clone)]
pub struct Workspace {
    session_id: String,
    root: PathBuf,
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("session_id", &self.session_id)
            .field("root", &self.root)
            .finish()
    }
}

impl Workspace {
    pub fn open(session_folder: &str, session_id: &str, storage: Arc<dyn Storage>) -> Result<Self> {
        validate_session_id(session_id)?;
        Ok(Self {
            session_id: session_id.to_string(),
            root: Path::new(session_folder).join(session_id),
            storage,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn storage_handle(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    fn path(&self, rel: &str) -> String {
        self.root.join(rel).to_string_lossy().to_string()
    }

    pub fn saves_dir(&self) -> String {
        self.path("saves")
    }

    pub fn save_path(&self, name: &str) -> Result<String> {
        validate_file_stem(name)?;
        Ok(self.path(&format!("saves/{}.json", name)))
    }

    pub fn audio_dir(&self) -> String {
        self.path("audio")
    }

    pub fn line_artifact(&self, line_number: u32) -> String {
        self.path(&format!("audio/line{}.{}", line_number, ARTIFACT_EXT))
    }

    pub fn joined_track(&self) -> String {
        self.path(&format!("audio/dialogue.{}", ARTIFACT_EXT))
    }

    pub fn background_track(&self) -> String {
        self.path(&format!("audio/dialogue_background.{}", ARTIFACT_EXT))
    }

    pub fn preview_mix(&self, line_number: u32) -> String {
        self.path(&format!("preview/line{}_mix.{}", line_number, ARTIFACT_EXT))
    }

    pub fn preview_effect(&self, line_number: u32) -> String {
        self.path(&format!("preview/line{}_effect.{}", line_number, ARTIFACT_EXT))
    }

    pub fn export_dir(&self) -> String {
        self.path("export")
    }

    pub fn export_text(&self) -> String {
        self.path("export/dialogue.txt")
    }

    pub fn export_audio_dir(&self) -> String {
        self.path("export/audio")
    }

    pub fn project_archive(&self) -> String {
        self.path("project/project.zip")
    }

    /// Line number encoded in an artifact file name, if it is one.
    pub fn parse_artifact_name(file_name: &str) -> Option<u32> {
        file_name
            .strip_prefix("line")?
            .strip_suffix(&format!(".{}", ARTIFACT_EXT))?
            .parse()
            .ok()
    }

    /// Line numbers with an artifact on disk, ascending.
    pub async fn artifact_line_numbers(&self) -> Result<Vec<u32>> {
        let mut numbers: Vec<u32> = self
            .storage
            .list(&self.audio_dir())
            .await?
            .iter()
            .filter_map(|p| Path::new(p).file_name()?.to_str().map(str::to_string))
            .filter_map(|name| Self::parse_artifact_name(&name))
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Removes every line artifact and both derived tracks.
    pub async fn clear_audio(&self) -> Result<()> {
        for n in self.artifact_line_numbers().await? {
            self.storage.delete(&self.line_artifact(n)).await?;
        }
        self.storage.delete(&self.joined_track()).await?;
        self.storage.delete(&self.background_track()).await?;
        debug!("Cleared audio for session {}", self.session_id);
        Ok(())
    }

    pub async fn read_clip(&self, path: &str) -> Result<AudioClip> {
        let bytes = self.storage.read(path).await?;
        AudioClip::from_wav_bytes(&bytes)
    }

    pub async fn write_clip(&self, path: &str, clip: &AudioClip) -> Result<()> {
        self.storage.write(path, &clip.to_wav_bytes()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    #[test]
    fn test_session_ids_cannot_escape() {
        assert!(validate_session_id("0f8e-aa_1").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../other").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id("a.b").is_err());
    }

    #[test]
    fn test_distinct_sessions_never_share_paths() -> Result<()> {
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let a = Workspace::open("session", "alpha", storage.clone())?;
        let b = Workspace::open("session", "beta", storage)?;
        assert_ne!(a.line_artifact(1), b.line_artifact(1));
        assert_ne!(a.joined_track(), b.joined_track());
        assert!(a.line_artifact(3).ends_with("alpha/audio/line3.wav"));
        assert!(b.project_archive().ends_with("beta/project/project.zip"));
        Ok(())
    }

    #[test]
    fn test_artifact_name_parsing() {
        assert_eq!(Workspace::parse_artifact_name("line12.wav"), Some(12));
        assert_eq!(Workspace::parse_artifact_name("dialogue.wav"), None);
        assert_eq!(Workspace::parse_artifact_name("line1_mix.wav"), None);
    }

    #[test]
    fn test_document_names() {
        assert!(validate_file_stem("my dialogue").is_ok());
        assert!(validate_file_stem("../x").is_err());
        assert!(validate_file_stem(".hidden").is_err());
        assert!(validate_file_stem("  ").is_err());
    }

    #[tokio::test]
    async fn test_clear_audio_removes_lines_and_tracks() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let ws = Workspace::open(temp_dir.path().to_str().unwrap(), "s1", storage.clone())?;

        let clip = AudioClip::silence(0.1, 8000, 1);
        ws.write_clip(&ws.line_artifact(1), &clip).await?;
        ws.write_clip(&ws.line_artifact(2), &clip).await?;
        ws.write_clip(&ws.joined_track(), &clip).await?;
        assert_eq!(ws.artifact_line_numbers().await?, vec![1, 2]);

        ws.clear_audio().await?;
        assert!(ws.artifact_line_numbers().await?.is_empty());
        assert!(!storage.exists(&ws.joined_track()).await?);
        Ok(())
    }
}
