use crate::core::config::Config;
use crate::core::error::{DialogueError, DialogueResult};
use crate::core::io::Storage;
use crate::core::workspace::ARTIFACT_EXT;
use crate::utils::audio::AudioClip;
use log::debug;
use std::path::Path;
use std::sync::Arc;

/// Containers accepted for user-supplied assets, in lookup order.
const ASSET_EXTENSIONS: [&str; 4] = [ARTIFACT_EXT, "mp3", "flac", "ogg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Effect,
    Background,
}

impl AssetKind {
    fn label(self) -> &'static str {
        match self {
            AssetKind::Effect => "effect",
            AssetKind::Background => "background",
        }
    }
}

/// Sound effects and background beds, addressed by file stem.
pub struct AssetLibrary {
    effects_dir: String,
    backgrounds_dir: String,
    storage: Arc<dyn Storage>,
}

impl AssetLibrary {
    pub fn new(effects_dir: &str, backgrounds_dir: &str, storage: Arc<dyn Storage>) -> Self {
        Self {
            effects_dir: effects_dir.to_string(),
            backgrounds_dir: backgrounds_dir.to_string(),
            storage,
        }
    }

    pub fn from_config(config: &Config, storage: Arc<dyn Storage>) -> Self {
        Self::new(&config.effects_folder, &config.backgrounds_folder, storage)
    }

    fn dir(&self, kind: AssetKind) -> &str {
        match kind {
            AssetKind::Effect => &self.effects_dir,
            AssetKind::Background => &self.backgrounds_dir,
        }
    }

    pub async fn list(&self, kind: AssetKind) -> DialogueResult<Vec<String>> {
        let mut names: Vec<String> = self
            .storage
            .list(self.dir(kind))
            .await?
            .iter()
            .map(Path::new)
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| ASSET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .filter_map(|p| p.file_stem()?.to_str().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub async fn load(&self, kind: AssetKind, name: &str) -> DialogueResult<AudioClip> {
        if name.contains(['/', '\\']) {
            return Err(DialogueError::not_found(kind.label(), name));
        }
        for ext in ASSET_EXTENSIONS {
            let path = Path::new(self.dir(kind))
                .join(format!("{}.{}", name, ext))
                .to_string_lossy()
                .to_string();
            if !self.storage.exists(&path).await? {
                continue;
            }
            debug!("Loading {} {} from {}", kind.label(), name, path);
            let bytes = self.storage.read(&path).await?;
            let clip = if ext == ARTIFACT_EXT {
                AudioClip::from_wav_bytes(&bytes)?
            } else {
                AudioClip::decode(&bytes, Some(ext))?
            };
            return Ok(clip);
        }
        Err(DialogueError::not_found(kind.label(), name))
    }
}
