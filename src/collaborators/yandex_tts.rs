use async_trait::async_trait;
use reqwest::Client;

use super::{Synthesizer, truncate_body};
use crate::audio::SAMPLE_RATE;
use crate::config::TtsConfig;
use crate::error::{RelayError, RelayResult};

/// Voices the SpeechKit v1 endpoint is known to accept.
pub const KNOWN_VOICES: &[&str] = &["oksana", "jane", "alena", "filipp", "ermil"];

/// Yandex SpeechKit synthesis returning raw 8 kHz LPCM.
pub struct YandexTts {
    client: Client,
    url: String,
    api_key: String,
    folder_id: String,
    voice: String,
    lang: String,
}

impl YandexTts {
    pub fn new(config: &TtsConfig) -> RelayResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| RelayError::collaborator("tts", e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            folder_id: config.folder_id.clone(),
            voice: config.voice.clone(),
            lang: config.lang.clone(),
        })
    }

    fn params(&self, text: &str) -> [(&'static str, String); 6] {
        [
            ("text", text.to_string()),
            ("lang", self.lang.clone()),
            ("voice", self.voice.clone()),
            ("folderId", self.folder_id.clone()),
            ("format", "lpcm".to_string()),
            ("sampleRateHertz", SAMPLE_RATE.to_string()),
        ]
    }
}

#[async_trait]
impl Synthesizer for YandexTts {
    async fn synthesize(&self, text: &str) -> RelayResult<Vec<u8>> {
        if self.api_key.is_empty() || self.folder_id.is_empty() {
            return Err(RelayError::collaborator(
                "tts",
                "api key / folder id are not configured",
            ));
        }

        log::info!("[TTS] {}", text);
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .query(&self.params(text))
            .send()
            .await
            .map_err(|e| RelayError::collaborator("tts", format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::collaborator(
                "tts",
                format!("HTTP {}: {}", status, truncate_body(&body, 400)),
            ));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| RelayError::collaborator("tts", format!("read body: {}", e)))?;
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_request_narrowband_lpcm() {
        let tts = YandexTts::new(&TtsConfig::default()).unwrap();
        let params = tts.params("привет");
        assert_eq!(params[0], ("text", "привет".to_string()));
        assert!(params.contains(&("voice", "oksana".to_string())));
        assert!(params.contains(&("sampleRateHertz", "8000".to_string())));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let tts = YandexTts::new(&TtsConfig::default()).unwrap();
        assert!(matches!(
            tts.synthesize("x").await,
            Err(RelayError::Collaborator { service: "tts", .. })
        ));
    }
}
