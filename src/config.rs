use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{SegmenterConfig, WireEncoding, SAMPLE_RATE};
use crate::collaborators::yandex_tts::KNOWN_VOICES;
use crate::error::{RelayError, RelayResult};

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Full dialog: segment, recognize, generate, synthesize, stream back.
    #[default]
    Dialog,
    /// Media-only: stream every call's audio to the streaming recognizer.
    Transcribe,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub mode: RelayMode,
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub session: SessionConfig,
    pub workers: WorkerConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub llm: LlmConfig,
    pub escalation: EscalationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_ip: String,
    pub bind_port: u16,
    /// 接收缓冲区大小
    pub recv_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_string(),
            bind_port: 4000,
            recv_buffer_size: 2048,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AudioConfig {
    pub encoding: WireEncoding,
    /// Outbound payload type; falls back to the encoding's static type.
    pub payload_type: Option<u8>,
}

impl AudioConfig {
    pub fn payload_type(&self) -> u8 {
        self.payload_type
            .unwrap_or_else(|| self.encoding.default_payload_type())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VadConfig {
    pub speech_threshold: f64,
    pub end_silence_ms: u32,
    pub min_utterance_ms: u32,
    /// 0 表示不限制
    pub max_utterance_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        let d = SegmenterConfig::default();
        Self {
            speech_threshold: d.speech_threshold,
            end_silence_ms: d.end_silence_ms,
            min_utterance_ms: d.min_utterance_ms,
            max_utterance_ms: d.max_utterance_ms,
        }
    }
}

impl VadConfig {
    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            speech_threshold: self.speech_threshold,
            end_silence_ms: self.end_silence_ms,
            min_utterance_ms: self.min_utterance_ms,
            max_utterance_ms: self.max_utterance_ms,
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub greeting: String,
    /// Spoken when recognition yields no text
    pub not_understood: String,
    /// Spoken when reply generation fails
    pub generation_fallback: String,
    pub system_prompt: String,
    /// Seconds without inbound audio before a session is evicted; 0 keeps sessions forever
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            greeting: "Здравствуйте. Техническая поддержка СКС Сервис. Опишите проблему."
                .to_string(),
            not_understood: "Извините, я не расслышал. Повторите, пожалуйста.".to_string(),
            generation_fallback: "Извините, сейчас не получается ответить. Уточните проблему ещё раз."
                .to_string(),
            system_prompt: concat!(
                "Ты оператор первой линии техподдержки компании СКС Сервис ",
                "(видеонаблюдение, СКУД, пожарная сигнализация). ",
                "Ответ будет озвучен голосом, поэтому пиши так, как говорят вслух: ",
                "максимум два-три коротких предложения, без списков, нумерации и Markdown. ",
                "Сначала уточни, что именно не работает, когда началось и что меняли. ",
                "При угрозе безопасности, пожаре или критическом отказе сразу предложи ",
                "эскалацию и уточни адрес и контакт."
            )
            .to_string(),
            idle_timeout_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SttConfig {
    pub url: String,
    pub streaming_url: String,
    pub api_key: String,
    pub folder_id: String,
    pub lang: String,
    pub timeout_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            url: "https://stt.api.cloud.yandex.net/speech/v1/stt:recognize".to_string(),
            streaming_url: "wss://stt.api.cloud.yandex.net/speech/v1/stt:recognizeStreaming"
                .to_string(),
            api_key: String::new(),
            folder_id: String::new(),
            lang: "ru-RU".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TtsConfig {
    pub url: String,
    pub api_key: String,
    pub folder_id: String,
    pub voice: String,
    pub lang: String,
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: "https://tts.api.cloud.yandex.net/speech/v1/tts:synthesize".to_string(),
            api_key: String::new(),
            folder_id: String::new(),
            voice: "oksana".to_string(),
            lang: "ru-RU".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub keywords: Vec<String>,
    /// Optional endpoint that receives `{call, text}` on escalation
    pub webhook_url: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            keywords: vec!["авар".to_string(), "пожар".to_string()],
            webhook_url: String::new(),
        }
    }
}

/// Keys that a legacy variable may fill when nothing else set them.
pub const LEGACY_OVERRIDABLE: [&str; 4] =
    ["tts.voice", "llm.base_url", "llm.model", "network.bind_port"];

impl Config {
    /// 从配置文件和环境变量加载配置
    ///
    /// The file is optional; `RELAY__SECTION__FIELD` variables override it.
    pub fn load(path: impl AsRef<Path>) -> RelayResult<Self> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::load`] with the legacy variable names resolved
    /// through `lookup`.
    pub fn load_with_env(
        path: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> RelayResult<Self> {
        let path = path.as_ref();
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                ::config::Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        let explicit: Vec<&str> = LEGACY_OVERRIDABLE
            .iter()
            .copied()
            .filter(|key| settings.get::<::config::Value>(key).is_ok())
            .collect();

        let mut config: Config = settings
            .try_deserialize()
            .map_err(|e| RelayError::Config(e.to_string()))?;
        config.apply_legacy_env(|key| explicit.contains(&key), lookup);
        config.validate()?;
        Ok(config)
    }

    /// Fills unset fields from the variable names used by older deployments.
    ///
    /// `explicit` reports which of [`LEGACY_OVERRIDABLE`] the file or the
    /// `RELAY__` layer already set; those are left alone. Credentials are
    /// only filled while empty.
    pub fn apply_legacy_env(
        &mut self,
        explicit: impl Fn(&str) -> bool,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("YANDEX_API_KEY") {
            if self.stt.api_key.is_empty() {
                self.stt.api_key = key.clone();
            }
            if self.tts.api_key.is_empty() {
                self.tts.api_key = key;
            }
        }
        if let Some(folder) = lookup("YANDEX_FOLDER_ID") {
            if self.stt.folder_id.is_empty() {
                self.stt.folder_id = folder.clone();
            }
            if self.tts.folder_id.is_empty() {
                self.tts.folder_id = folder;
            }
        }
        if self.llm.api_key.is_empty() {
            if let Some(key) = lookup("DEEPSEEK_API_KEY") {
                self.llm.api_key = key;
            }
        }
        if !explicit("tts.voice") {
            if let Some(voice) = lookup("YANDEX_TTS_VOICE").or_else(|| lookup("TTS_VOICE")) {
                self.tts.voice = voice;
            }
        }
        if !explicit("llm.base_url") {
            if let Some(url) = lookup("DEEPSEEK_BASE_URL") {
                self.llm.base_url = url;
            }
        }
        if !explicit("llm.model") {
            if let Some(model) = lookup("DEEPSEEK_MODEL") {
                self.llm.model = model;
            }
        }
        if !explicit("network.bind_port") {
            if let Some(port) = lookup("RTP_PORT").and_then(|p| p.trim().parse().ok()) {
                self.network.bind_port = port;
            }
        }
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.workers.count == 0 {
            return Err(RelayError::Config("workers.count must be at least 1".into()));
        }
        if self.workers.queue_capacity == 0 {
            return Err(RelayError::Config(
                "workers.queue_capacity must be at least 1".into(),
            ));
        }
        if self.vad.end_silence_ms == 0 {
            return Err(RelayError::Config("vad.end_silence_ms must be positive".into()));
        }
        let max_ms = self.vad.max_utterance_ms;
        if max_ms != 0 && max_ms < self.vad.min_utterance_ms {
            return Err(RelayError::Config(
                "vad.max_utterance_ms must not be below vad.min_utterance_ms".into(),
            ));
        }
        if !self.vad.speech_threshold.is_finite() || self.vad.speech_threshold < 0.0 {
            return Err(RelayError::Config(
                "vad.speech_threshold must be a non-negative number".into(),
            ));
        }
        if self.audio.payload_type() > 127 {
            return Err(RelayError::Config("audio.payload_type must be 0..=127".into()));
        }
        if self.network.recv_buffer_size < crate::rtp::HEADER_LEN {
            return Err(RelayError::Config(
                "network.recv_buffer_size is smaller than an RTP header".into(),
            ));
        }
        for (name, secs) in [
            ("stt", self.stt.timeout_secs),
            ("tts", self.tts.timeout_secs),
            ("llm", self.llm.timeout_secs),
        ] {
            if secs == 0 {
                return Err(RelayError::Config(format!("{}.timeout_secs must be positive", name)));
            }
        }
        self.bind_addr()?;

        if !KNOWN_VOICES.contains(&self.tts.voice.as_str()) {
            log::warn!(
                "TTS voice \"{}\" is not one of {:?}; the service may reject it",
                self.tts.voice,
                KNOWN_VOICES
            );
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> RelayResult<SocketAddr> {
        format!("{}:{}", self.network.bind_ip, self.network.bind_port)
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid bind address: {}", e)))
    }
}
