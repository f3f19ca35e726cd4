use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{Recognizer, truncate_body};
use crate::config::SttConfig;
use crate::error::{RelayError, RelayResult};

/// Synchronous (single request) Yandex SpeechKit recognition over raw LPCM.
pub struct YandexStt {
    client: Client,
    url: String,
    api_key: String,
    folder_id: String,
    lang: String,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    result: Option<String>,
}

impl YandexStt {
    pub fn new(config: &SttConfig) -> RelayResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| RelayError::collaborator("stt", e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            folder_id: config.folder_id.clone(),
            lang: config.lang.clone(),
        })
    }

    fn query(&self, sample_rate: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("lang", self.lang.clone()),
            ("format", "lpcm".to_string()),
            ("sampleRateHertz", sample_rate.to_string()),
        ];
        if !self.folder_id.is_empty() {
            params.push(("folderId", self.folder_id.clone()));
        }
        params
    }
}

#[async_trait]
impl Recognizer for YandexStt {
    async fn recognize(&self, pcm: &[u8], sample_rate: u32) -> RelayResult<String> {
        if self.api_key.is_empty() {
            return Err(RelayError::collaborator("stt", "api key is not configured"));
        }

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .query(&self.query(sample_rate))
            .body(pcm.to_vec())
            .send()
            .await
            .map_err(|e| RelayError::collaborator("stt", format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::collaborator(
                "stt",
                format!("HTTP {}: {}", status, truncate_body(&body, 400)),
            ));
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| RelayError::collaborator("stt", format!("JSON parse error: {}", e)))?;
        Ok(parsed.result.unwrap_or_default().trim().to_string())
    }
}
