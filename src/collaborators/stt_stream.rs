//! Streaming recognition over a websocket, used by the media-only mode.
//!
//! PCM chunks arrive on `rx_audio` and go out as binary frames; partial and
//! final results come back as JSON text frames and are forwarded as
//! [`SttEvent::Text`].

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::audio::SAMPLE_RATE;
use crate::config::SttConfig;

const MAX_RETRY_DELAY_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SttEvent {
    Connected,
    Text(String),
    Disconnected,
}

pub struct SttStream {
    config: SttConfig,
    tx: mpsc::Sender<SttEvent>,
    rx_audio: mpsc::Receiver<Vec<u8>>,
    retry_delay: u64,
}

impl SttStream {
    pub fn new(
        config: SttConfig,
        tx: mpsc::Sender<SttEvent>,
        rx_audio: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            config,
            tx,
            rx_audio,
            retry_delay: 1,
        }
    }

    // 断开后指数退避重连，音频通道关闭时退出
    pub async fn run(mut self) {
        loop {
            match self.connect_and_loop().await {
                Ok(()) => break,
                Err(e) => {
                    log::warn!(
                        "STT stream error: {}. Retrying in {}s...",
                        e,
                        self.retry_delay
                    );
                    let _ = self.tx.send(SttEvent::Disconnected).await;
                    tokio::time::sleep(tokio::time::Duration::from_secs(self.retry_delay)).await;
                    self.retry_delay = (self.retry_delay * 2).min(MAX_RETRY_DELAY_SECS);
                }
            }
        }
        log::info!("STT stream stopped");
    }

    fn streaming_url(&self) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.config.streaming_url)?;
        url.query_pairs_mut()
            .append_pair("lang", &self.config.lang)
            .append_pair("format", "lpcm")
            .append_pair("sampleRateHertz", &SAMPLE_RATE.to_string());
        Ok(url)
    }

    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        let url = self.streaming_url()?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("streaming url has no host"))?
            .to_string();

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Authorization", format!("Api-Key {}", self.config.api_key))
            .header("X-Folder-Id", &self.config.folder_id)
            .body(())?;

        log::info!("Connecting to STT stream {}...", self.config.streaming_url);
        let (ws_stream, _) = connect_async(request).await?;
        log::info!("STT stream connected");
        self.retry_delay = 1;

        let (mut write, mut read) = ws_stream.split();
        self.tx.send(SttEvent::Connected).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(transcript) = parse_transcript(text.as_str()) {
                                self.tx.send(SttEvent::Text(transcript)).await?;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(anyhow::anyhow!("server closed stream: {:?}", frame));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(anyhow::anyhow!("stream closed")),
                    }
                }
                chunk = self.rx_audio.recv() => {
                    match chunk {
                        Some(pcm) => write.send(Message::Binary(pcm.into())).await?,
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Extracts `result.alternatives[0].text` from a recognition message.
pub fn parse_transcript(message: &str) -> Option<String> {
    let value: Value = match serde_json::from_str(message) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("STT parse error: {}", e);
            return None;
        }
    };
    value
        .get("result")?
        .get("alternatives")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
