use crate::services::tts::{SpeechClient, SpeechModel, Voice, VoiceSettings};
use crate::utils::audio::AudioClip;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

const SUPPORTED_SAMPLE_RATES: [u32; 4] = [16000, 22050, 24000, 44100];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ElevenLabsConfig {
    /// Falls back to `ELEVENLABS_API_KEY` when empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_base_url() -> String {
    "https://api.elevenlabs.io".to_string()
}
fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}
fn default_sample_rate() -> u32 {
    44100
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model_id: default_model_id(),
            sample_rate: default_sample_rate(),
        }
    }
}

#[derive(Deserialize)]
struct VoicesResponse {
    voices: Vec<Voice>,
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

pub struct ElevenLabsClient {
    config: ElevenLabsConfig,
    api_key: String,
    base_url: Url,
    client: reqwest::Client,
}

impl ElevenLabsClient {
    pub fn new(config: ElevenLabsConfig) -> Result<Self> {
        let api_key = if config.api_key.is_empty() {
            std::env::var("ELEVENLABS_API_KEY").unwrap_or_default()
        } else {
            config.api_key.clone()
        };
        if api_key.is_empty() {
            return Err(anyhow!(
                "ElevenLabs API key missing. Set speech.elevenlabs.api_key or ELEVENLABS_API_KEY."
            ));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&config.sample_rate) {
            return Err(anyhow!(
                "Unsupported sample rate {} (expected one of {:?})",
                config.sample_rate,
                SUPPORTED_SAMPLE_RATES
            ));
        }
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid ElevenLabs base url: {}", config.base_url))?;
        Ok(Self {
            config,
            api_key,
            base_url,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn synthesis_url(&self, voice_id: &str) -> Result<Url> {
        let mut url = self.endpoint(&format!("v1/text-to-speech/{}", voice_id))?;
        url.query_pairs_mut()
            .append_pair("output_format", &format!("pcm_{}", self.config.sample_rate));
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self
            .client
            .get(url.clone())
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("ElevenLabs API error {} at {}: {}", status, url, error_text));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl SpeechClient for ElevenLabsClient {
    async fn list_voices(&self) -> Result<Vec<Voice>> {
        let resp: VoicesResponse = self.get_json(self.endpoint("v1/voices")?).await?;
        Ok(resp.voices)
    }

    async fn fetch_settings(&self, voice_id: &str) -> Result<Option<VoiceSettings>> {
        let url = self.endpoint(&format!("v1/voices/{}/settings", voice_id))?;
        let settings: Option<VoiceSettings> = self.get_json(url).await?;
        Ok(settings)
    }

    async fn list_models(&self) -> Result<Vec<SpeechModel>> {
        self.get_json(self.endpoint("v1/models")?).await
    }

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        model_id: &str,
        settings: &VoiceSettings,
    ) -> Result<Vec<u8>> {
        let url = self.synthesis_url(voice_id)?;
        debug!("POST {}", url);
        let body = SynthesisRequest {
            text,
            model_id,
            voice_settings: settings,
        };
        let resp = self
            .client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err_text = resp.text().await?;
            return Err(anyhow!("ElevenLabs synthesis failed ({}): {}", status, err_text));
        }

        let pcm = resp.bytes().await?;
        if pcm.is_empty() {
            return Err(anyhow!("ElevenLabs returned no audio"));
        }
        AudioClip::from_pcm16_le(&pcm, self.config.sample_rate, 1).to_wav_bytes()
    }

    fn default_model(&self) -> String {
        self.config.model_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ElevenLabsClient {
        ElevenLabsClient::new(ElevenLabsConfig {
            api_key: "key".to_string(),
            sample_rate: 22050,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_synthesis_url_carries_pcm_format() {
        let url = client().synthesis_url("abc123").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.elevenlabs.io/v1/text-to-speech/abc123?output_format=pcm_22050"
        );
    }

    #[test]
    fn test_rejects_unsupported_sample_rate() {
        let result = ElevenLabsClient::new(ElevenLabsConfig {
            api_key: "key".to_string(),
            sample_rate: 12345,
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_voices_response_parsing() {
        let json = r#"{
            "voices": [
                {
                    "voice_id": "21m00Tcm4TlvDq8ikWAM",
                    "name": "Rachel",
                    "category": "premade",
                    "preview_url": "https://example.com/rachel.mp3",
                    "settings": null,
                    "labels": { "accent": "american" }
                },
                { "voice_id": "x", "name": "Mine" }
            ]
        }"#;
        let resp: VoicesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.voices.len(), 2);
        assert_eq!(resp.voices[0].label(), "Rachel (premade)");
        assert!(resp.voices[0].settings.is_none());
        assert_eq!(resp.voices[1].category, "");
    }

    #[test]
    fn test_request_body_shape() {
        let settings = VoiceSettings::default();
        let body = SynthesisRequest {
            text: "Hello",
            model_id: "eleven_multilingual_v2",
            voice_settings: &settings,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["text"], "Hello");
        assert_eq!(value["voice_settings"]["similarity_boost"], 0.75);
        assert_eq!(value["voice_settings"]["use_speaker_boost"], true);
    }
}
