use crate::core::config::Config;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub mod elevenlabs;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Voice {
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub voice_id: String,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub settings: Option<VoiceSettings>,
}

impl Voice {
    pub fn new(name: &str, category: &str, voice_id: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            voice_id: voice_id.to_string(),
            preview_url: None,
            settings: None,
        }
    }

    /// Display label shown to the user and stored in documents.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.category)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VoiceSettings {
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default)]
    pub style: f32,
    #[serde(default = "default_speaker_boost")]
    pub use_speaker_boost: bool,
}

fn default_stability() -> f32 {
    0.5
}
fn default_similarity_boost() -> f32 {
    0.75
}
fn default_speaker_boost() -> bool {
    true
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            style: 0.0,
            use_speaker_boost: default_speaker_boost(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SpeechModel {
    pub model_id: String,
    pub name: String,
}

#[async_trait]
pub trait SpeechClient: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<Voice>>;

    async fn fetch_settings(&self, voice_id: &str) -> Result<Option<VoiceSettings>>;

    async fn list_models(&self) -> Result<Vec<SpeechModel>> {
        Ok(Vec::new())
    }

    /// Returns WAV bytes. Any error is fatal to this call only.
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        model_id: &str,
        settings: &VoiceSettings,
    ) -> Result<Vec<u8>>;

    fn default_model(&self) -> String;
}

/// The voice's own settings, else the provider's stored settings, else
/// `fallback`.
pub async fn resolve_settings(
    client: &dyn SpeechClient,
    voice: &Voice,
    fallback: &VoiceSettings,
) -> VoiceSettings {
    if let Some(settings) = &voice.settings {
        return settings.clone();
    }
    match client.fetch_settings(&voice.voice_id).await {
        Ok(Some(settings)) => settings,
        Ok(None) => fallback.clone(),
        Err(e) => {
            warn!("Could not fetch settings for {}: {}", voice.label(), e);
            fallback.clone()
        }
    }
}

pub fn create_speech_client(config: &Config) -> Result<Box<dyn SpeechClient>> {
    info!("Initializing speech client for provider: {}", config.speech.provider);
    match config.speech.provider.as_str() {
        "elevenlabs" => {
            let el_config = config.speech.elevenlabs.clone().unwrap_or_default();
            Ok(Box::new(elevenlabs::ElevenLabsClient::new(el_config)?))
        }
        _ => Err(anyhow!("Unknown speech provider: {}", config.speech.provider)),
    }
}
