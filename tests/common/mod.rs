#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use rtp_voice_relay::audio::{FRAME_SAMPLES, WireEncoding, encode_frame, pcm_to_le_bytes};
use rtp_voice_relay::collaborators::{
    ChatMessage, Collaborators, Generator, Recognizer, Synthesizer, Timeouts,
};
use rtp_voice_relay::config::{SessionConfig, VadConfig};
use rtp_voice_relay::error::{RelayError, RelayResult};
use rtp_voice_relay::escalation::Escalation;
use rtp_voice_relay::rtp;
use rtp_voice_relay::session::{PacketSink, SessionContext};
use rtp_voice_relay::worker_pool::{PoolWorkers, WorkerPool};

pub struct SentPacket {
    pub at: Instant,
    pub peer: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Records outbound packets and how many sends overlapped.
#[derive(Default)]
pub struct RecordingSink {
    packets: Mutex<Vec<SentPacket>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn packets(&self) -> Vec<rtp::WirePacket> {
        self.packets
            .lock()
            .unwrap()
            .iter()
            .map(|p| rtp::decode(&p.bytes).unwrap())
            .collect()
    }

    pub fn sent(&self) -> Vec<(Instant, SocketAddr)> {
        self.packets
            .lock()
            .unwrap()
            .iter()
            .map(|p| (p.at, p.peer))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PacketSink for RecordingSink {
    async fn send_to(&self, packet: &[u8], peer: SocketAddr) -> io::Result<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "network down"));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.packets.lock().unwrap().push(SentPacket {
            at: Instant::now(),
            peer,
            bytes: packet.to_vec(),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(packet.len())
    }
}

/// Replays scripted results, then returns `fallback`.
#[derive(Default)]
pub struct MockRecognizer {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: Mutex<String>,
    calls: AtomicUsize,
}

impl MockRecognizer {
    pub fn always(text: &str) -> Self {
        let r = Self::default();
        *r.fallback.lock().unwrap() = text.to_string();
        r
    }

    pub fn push(&self, result: Result<&str, &str>) {
        self.script
            .lock()
            .unwrap()
            .push_back(result.map(str::to_string).map_err(str::to_string));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn recognize(&self, _pcm: &[u8], _sample_rate: u32) -> RelayResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => Err(RelayError::collaborator("stt", msg)),
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }
}

/// Answers "reply to <last user turn>" unless told to fail.
#[derive(Default)]
pub struct MockGenerator {
    seen: Mutex<Vec<Vec<ChatMessage>>>,
    fail: AtomicBool,
    delay: Duration,
}

impl MockGenerator {
    /// Takes `delay` to answer each request.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        let g = Self::default();
        g.fail.store(true, Ordering::SeqCst);
        g
    }

    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, history: &[ChatMessage]) -> RelayResult<String> {
        self.seen.lock().unwrap().push(history.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::collaborator("llm", "HTTP 503"));
        }
        let last = history.last().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(format!("reply to {}", last))
    }
}

/// Returns `frames` worth of constant-level PCM. The level can be pinned per
/// text so the frames of different utterances are distinguishable on the wire.
pub struct MockSynthesizer {
    frames: usize,
    levels: Mutex<HashMap<String, i16>>,
    texts: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MockSynthesizer {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            levels: Mutex::new(HashMap::new()),
            texts: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn level_for(&self, text: &str, level: i16) {
        self.levels.lock().unwrap().insert(text.to_string(), level);
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> RelayResult<Vec<u8>> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::collaborator("tts", "HTTP 500"));
        }
        let level = self.levels.lock().unwrap().get(text).copied().unwrap_or(500);
        Ok(pcm_to_le_bytes(&vec![level; self.frames * FRAME_SAMPLES]))
    }
}

pub struct Options {
    pub encoding: WireEncoding,
    pub dialog: SessionConfig,
    pub workers: usize,
    pub queue_capacity: usize,
    pub synth_frames: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            encoding: WireEncoding::Ulaw,
            dialog: SessionConfig {
                greeting: String::new(),
                ..Default::default()
            },
            workers: 2,
            queue_capacity: 16,
            synth_frames: 3,
        }
    }
}

pub struct Harness {
    pub ctx: Arc<SessionContext>,
    pub sink: Arc<RecordingSink>,
    pub stt: Arc<MockRecognizer>,
    pub llm: Arc<MockGenerator>,
    pub tts: Arc<MockSynthesizer>,
    pub workers: PoolWorkers,
}

pub fn harness() -> Harness {
    build(Options::default(), MockRecognizer::always("hello"), MockGenerator::default())
}

/// Must be called inside a tokio runtime; the pool spawns its workers.
pub fn build(options: Options, stt: MockRecognizer, llm: MockGenerator) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let stt = Arc::new(stt);
    let llm = Arc::new(llm);
    let tts = Arc::new(MockSynthesizer::new(options.synth_frames));
    let (pool, workers) = WorkerPool::spawn(options.workers, options.queue_capacity);

    let services = Collaborators::new(stt.clone(), llm.clone(), tts.clone(), Timeouts::default());
    let ctx = Arc::new(SessionContext {
        services,
        sink: sink.clone(),
        pool,
        escalation: Arc::new(Escalation::disabled()),
        dialog: options.dialog,
        encoding: options.encoding,
        payload_type: options.encoding.default_payload_type(),
        segmenter: VadConfig::default().segmenter(),
    });

    Harness {
        ctx,
        sink,
        stt,
        llm,
        tts,
        workers,
    }
}

pub fn peer(port: u16) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], port))
}

pub fn loud_frame() -> Vec<u8> {
    let samples: Vec<i16> = (0..FRAME_SAMPLES)
        .map(|i| if i % 2 == 0 { 2000 } else { -2000 })
        .collect();
    encode_frame(&samples, WireEncoding::Ulaw)
}

pub fn silent_frame() -> Vec<u8> {
    vec![0xFF; FRAME_SAMPLES]
}

pub fn datagram(sequence: u16, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    rtp::encode(
        0,
        sequence,
        (sequence as u32).wrapping_mul(FRAME_SAMPLES as u32),
        ssrc,
        payload,
    )
    .to_vec()
}

/// One second of speech followed by enough silence to close it.
pub fn utterance_payloads() -> Vec<Vec<u8>> {
    let mut frames = vec![loud_frame(); 50];
    frames.extend(vec![silent_frame(); 45]);
    frames
}

/// Lets queued work and paced sends finish on the paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(30)).await;
}
