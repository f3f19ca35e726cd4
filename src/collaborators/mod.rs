//! External services the relay talks to: speech recognition, reply
//! generation and speech synthesis.
//!
//! Sessions only see the traits below. Every call made through
//! [`Collaborators`] carries its own timeout, so a slow service turns into a
//! `CollaboratorTimeout` instead of a stalled worker.

pub mod llm_client;
pub mod stt_stream;
pub mod yandex_stt;
pub mod yandex_tts;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{RelayError, RelayResult};

pub use llm_client::LlmClient;
pub use stt_stream::{SttEvent, SttStream};
pub use yandex_stt::YandexStt;
pub use yandex_tts::YandexTts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation turn, serialized as a chat-completions message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Speech to text. Returns an empty string when nothing was recognized.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, pcm: &[u8], sample_rate: u32) -> RelayResult<String>;
}

/// Reply text for a conversation history.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, history: &[ChatMessage]) -> RelayResult<String>;
}

/// Text to 8 kHz s16le PCM.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> RelayResult<Vec<u8>>;
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub recognize: Duration,
    pub generate: Duration,
    pub synthesize: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            recognize: Duration::from_secs(30),
            generate: Duration::from_secs(60),
            synthesize: Duration::from_secs(30),
        }
    }
}

/// The collaborator set shared by every session.
#[derive(Clone)]
pub struct Collaborators {
    recognizer: Arc<dyn Recognizer>,
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
    timeouts: Timeouts,
}

impl Collaborators {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        generator: Arc<dyn Generator>,
        synthesizer: Arc<dyn Synthesizer>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            recognizer,
            generator,
            synthesizer,
            timeouts,
        }
    }

    /// Builds the HTTP-backed services from config.
    pub fn from_config(config: &Config) -> RelayResult<Self> {
        let recognizer = YandexStt::new(&config.stt)?;
        let generator = LlmClient::new(&config.llm)?;
        let synthesizer = YandexTts::new(&config.tts)?;
        Ok(Self::new(
            Arc::new(recognizer),
            Arc::new(generator),
            Arc::new(synthesizer),
            Timeouts {
                recognize: Duration::from_secs(config.stt.timeout_secs),
                generate: Duration::from_secs(config.llm.timeout_secs),
                synthesize: Duration::from_secs(config.tts.timeout_secs),
            },
        ))
    }

    pub async fn recognize(&self, pcm: &[u8], sample_rate: u32) -> RelayResult<String> {
        with_timeout(
            "stt",
            self.timeouts.recognize,
            self.recognizer.recognize(pcm, sample_rate),
        )
        .await
    }

    pub async fn generate(&self, history: &[ChatMessage]) -> RelayResult<String> {
        with_timeout("llm", self.timeouts.generate, self.generator.generate(history)).await
    }

    pub async fn synthesize(&self, text: &str) -> RelayResult<Vec<u8>> {
        with_timeout("tts", self.timeouts.synthesize, self.synthesizer.synthesize(text)).await
    }
}

async fn with_timeout<T>(
    service: &'static str,
    after: Duration,
    fut: impl Future<Output = RelayResult<T>>,
) -> RelayResult<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::CollaboratorTimeout { service, after }),
    }
}

/// Cuts a response body down for error messages.
pub(crate) fn truncate_body(body: &str, max: usize) -> &str {
    if body.len() <= max {
        return body;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Synthesizer for Slow {
        async fn synthesize(&self, _text: &str) -> RelayResult<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![0; 4])
        }
    }

    struct Echo;

    #[async_trait]
    impl Recognizer for Echo {
        async fn recognize(&self, pcm: &[u8], _sample_rate: u32) -> RelayResult<String> {
            Ok(format!("{} bytes", pcm.len()))
        }
    }

    #[async_trait]
    impl Generator for Echo {
        async fn generate(&self, history: &[ChatMessage]) -> RelayResult<String> {
            Ok(format!("{} turns", history.len()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_service_times_out() {
        let services = Collaborators::new(
            Arc::new(Echo),
            Arc::new(Echo),
            Arc::new(Slow),
            Timeouts {
                synthesize: Duration::from_secs(1),
                ..Default::default()
            },
        );

        assert_eq!(services.recognize(&[0; 8], 8000).await.unwrap(), "8 bytes");
        assert_eq!(
            services.generate(&[ChatMessage::system("x")]).await.unwrap(),
            "1 turns"
        );
        match services.synthesize("hello").await {
            Err(RelayError::CollaboratorTimeout { service, after }) => {
                assert_eq!(service, "tts");
                assert_eq!(after, Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_message_wire_shape() {
        let json = serde_json::to_string(&ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        assert_eq!(truncate_body("abc", 10), "abc");
        assert_eq!(truncate_body("привет", 3), "п");
    }
}
