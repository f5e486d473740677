use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::llm::LlmConfig;
use crate::services::tts::elevenlabs::ElevenLabsConfig;
use crate::services::tts::VoiceSettings;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_session")]
    pub session_folder: String,

    /// Shared documents visible to every session.
    #[serde(default = "default_saves")]
    pub saves_folder: String,

    #[serde(default = "default_effects")]
    pub effects_folder: String,

    #[serde(default = "default_backgrounds")]
    pub backgrounds_folder: String,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub voice_settings: VoiceSettings,

    #[serde(default)]
    pub dialogue: DialogueOptions,

    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_provider")]
    pub provider: String,
    pub elevenlabs: Option<ElevenLabsConfig>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: default_speech_provider(),
            elevenlabs: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DialogueOptions {
    #[serde(default = "default_join_gap")]
    pub join_gap_seconds: f64,
    #[serde(default = "default_fade")]
    pub background_fade_seconds: f64,
    #[serde(default = "default_waveform_points")]
    pub waveform_points: usize,
}

impl Default for DialogueOptions {
    fn default() -> Self {
        Self {
            join_gap_seconds: default_join_gap(),
            background_fade_seconds: default_fade(),
            waveform_points: default_waveform_points(),
        }
    }
}

fn default_session() -> String {
    "session".to_string()
}
fn default_saves() -> String {
    "saves".to_string()
}
fn default_effects() -> String {
    "effects".to_string()
}
fn default_backgrounds() -> String {
    "backgrounds".to_string()
}
fn default_speech_provider() -> String {
    "elevenlabs".to_string()
}
fn default_join_gap() -> f64 {
    0.5
}
fn default_fade() -> f64 {
    3.0
}
fn default_waveform_points() -> usize {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_folder: default_session(),
            saves_folder: default_saves(),
            effects_folder: default_effects(),
            backgrounds_folder: default_backgrounds(),
            speech: SpeechConfig::default(),
            voice_settings: VoiceSettings::default(),
            dialogue: DialogueOptions::default(),
            llm: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.session_folder)?;
        fs::create_dir_all(&self.saves_folder)?;
        fs::create_dir_all(&self.effects_folder)?;
        fs::create_dir_all(&self.backgrounds_folder)?;
        Ok(())
    }
}
