//! Per-call state and dialog orchestration.
//!
//! A call is split in two halves. [`CallSession`] is owned by the registry and
//! only touched by the receive loop: it runs the segmenter and decides when to
//! greet. [`SessionCore`] is shared with pool workers and holds the two
//! serialization domains of a call: `outbound` guards frame pacing and the
//! wire counters, `history` guards the conversation and is held for the whole
//! of one utterance's processing.
//!
//! Utterances of one call go through a per-call backlog drained by a single
//! pool job, so a call occupies at most one worker no matter how fast its
//! caller talks.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use crate::audio::{
    FRAME_MS, FRAME_SAMPLES, Segmenter, SegmenterConfig, Utterance, WireEncoding, decode_frame,
    encode_frame, pcm_from_le_bytes,
};
use crate::collaborators::{ChatMessage, Collaborators};
use crate::config::SessionConfig;
use crate::error::{RelayError, RelayResult};
use crate::escalation::Escalation;
use crate::rtp;
use crate::worker_pool::WorkerPool;

const FRAME_DURATION: Duration = Duration::from_millis(FRAME_MS as u64);

/// Call identity: the peer endpoint plus the stream's synchronization source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub addr: SocketAddr,
    pub ssrc: u32,
}

impl CallKey {
    pub fn new(addr: SocketAddr, ssrc: u32) -> Self {
        Self { addr, ssrc }
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:08x}", self.addr, self.ssrc)
    }
}

/// Where outbound packets go. The UDP socket in production, a recorder in tests.
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn send_to(&self, packet: &[u8], peer: SocketAddr) -> io::Result<usize>;
}

#[async_trait]
impl PacketSink for UdpSocket {
    async fn send_to(&self, packet: &[u8], peer: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, packet, peer).await
    }
}

/// Everything a session needs that is shared across all calls.
pub struct SessionContext {
    pub services: Collaborators,
    pub sink: Arc<dyn PacketSink>,
    pub pool: WorkerPool,
    pub escalation: Arc<Escalation>,
    pub dialog: SessionConfig,
    pub encoding: WireEncoding,
    pub payload_type: u8,
    pub segmenter: SegmenterConfig,
}

/// Outbound wire counters. Never reset while the call lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outbound {
    pub sequence: u16,
    pub timestamp: u32,
}

impl Outbound {
    pub fn advance(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(FRAME_SAMPLES as u32);
    }
}

/// Utterances waiting for their call's drain job.
#[derive(Default)]
struct Backlog {
    pending: VecDeque<Utterance>,
    draining: bool,
}

pub struct SessionCore {
    key: CallKey,
    ssrc: u32,
    ctx: Arc<SessionContext>,
    outbound: Mutex<Outbound>,
    history: Mutex<Vec<ChatMessage>>,
    backlog: std::sync::Mutex<Backlog>,
}

impl SessionCore {
    fn new(key: CallKey, ctx: Arc<SessionContext>) -> Self {
        let history = vec![ChatMessage::system(ctx.dialog.system_prompt.clone())];
        Self {
            key,
            ssrc: rand::random::<u32>(),
            ctx,
            outbound: Mutex::new(Outbound::default()),
            history: Mutex::new(history),
            backlog: std::sync::Mutex::new(Backlog::default()),
        }
    }

    fn backlog(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Utterances queued behind the one being processed.
    pub fn pending_utterances(&self) -> usize {
        self.backlog().pending.len()
    }

    /// Queues an utterance. Returns true when no drain job is running and the
    /// caller has to start one.
    fn enqueue(&self, utterance: Utterance) -> bool {
        let mut backlog = self.backlog();
        backlog.pending.push_back(utterance);
        if backlog.draining {
            return false;
        }
        backlog.draining = true;
        true
    }

    // 提交失败：队列里只有刚放进去的那一段
    fn abandon_drain(&self) {
        let mut backlog = self.backlog();
        backlog.pending.clear();
        backlog.draining = false;
    }

    /// Processes queued utterances in arrival order until the backlog is empty.
    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut backlog = self.backlog();
                match backlog.pending.pop_front() {
                    Some(utterance) => utterance,
                    None => {
                        backlog.draining = false;
                        return;
                    }
                }
            };
            self.process_utterance(next).await;
        }
    }

    pub fn key(&self) -> CallKey {
        self.key
    }

    /// Outbound synchronization source, fixed for the life of the call.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }

    pub async fn outbound(&self) -> Outbound {
        *self.outbound.lock().await
    }

    /// Recognize, generate and speak the reply for one utterance.
    ///
    /// Holds the history lock throughout, so a call never processes two
    /// utterances at once. Collaborator failures end in a spoken fallback or
    /// silence, never in an error.
    pub async fn process_utterance(&self, utterance: Utterance) {
        let mut history = self.history.lock().await;

        let pcm = utterance.to_pcm_bytes();
        let text = match self
            .ctx
            .services
            .recognize(&pcm, utterance.sample_rate)
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                log::warn!("[{}] recognition failed: {}", self.key, e);
                String::new()
            }
        };

        if text.is_empty() {
            log::info!("[{}] nothing recognized", self.key);
            self.speak(&self.ctx.dialog.not_understood).await;
            return;
        }
        log::info!("[{}] caller: {}", self.key, text);

        if self.ctx.escalation.matches(&text) {
            let escalation = self.ctx.escalation.clone();
            let call = self.key.to_string();
            let said = text.clone();
            tokio::spawn(async move { escalation.raise(&call, &said).await });
        }

        history.push(ChatMessage::user(text));
        let reply = match self.ctx.services.generate(&history).await {
            Ok(reply) if !reply.trim().is_empty() => {
                let reply = reply.trim().to_string();
                history.push(ChatMessage::assistant(reply.clone()));
                reply
            }
            Ok(_) => {
                log::warn!("[{}] empty reply from generator", self.key);
                history.pop();
                self.ctx.dialog.generation_fallback.clone()
            }
            Err(e) => {
                log::error!("[{}] generation failed: {}", self.key, e);
                history.pop();
                self.ctx.dialog.generation_fallback.clone()
            }
        };
        log::info!("[{}] bot: {}", self.key, reply);

        self.speak(&reply).await;
    }

    /// Synthesizes `text` and streams it to the caller. Failures are logged.
    pub async fn speak(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let pcm = match self.ctx.services.synthesize(text).await {
            Ok(pcm) => pcm,
            Err(e) => {
                log::error!("[{}] synthesis failed, skipping send: {}", self.key, e);
                return;
            }
        };
        let samples = pcm_from_le_bytes(&pcm);
        match self.send_linear_audio(&samples).await {
            Ok(frames) => log::debug!("[{}] sent {} frames", self.key, frames),
            Err(e) => log::error!("[{}] send abandoned: {}", self.key, e),
        }
    }

    /// Encodes linear audio and sends it as paced 20 ms frames.
    ///
    /// The last short frame is padded with the encoding's silence value. The
    /// outbound lock is held until one frame interval after the last packet,
    /// so back-to-back sends from the same call stay paced and never
    /// interleave. Returns the number of packets sent.
    pub async fn send_linear_audio(&self, samples: &[i16]) -> RelayResult<usize> {
        let encoding = self.ctx.encoding;
        let payload = encode_frame(samples, encoding);
        let frame_bytes = encoding.frame_bytes();

        let mut outbound = self.outbound.lock().await;
        let mut pacing = tokio::time::interval(FRAME_DURATION);
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sent = 0;
        for chunk in payload.chunks(frame_bytes) {
            pacing.tick().await;

            let packet = if chunk.len() < frame_bytes {
                let mut frame = chunk.to_vec();
                frame.resize(frame_bytes, encoding.silence_byte());
                self.packet(&outbound, &frame)
            } else {
                self.packet(&outbound, chunk)
            };

            self.ctx
                .sink
                .send_to(&packet, self.key.addr)
                .await
                .map_err(RelayError::TransportSend)?;
            outbound.advance();
            sent += 1;
        }
        if sent > 0 {
            pacing.tick().await;
        }
        Ok(sent)
    }

    fn packet(&self, outbound: &Outbound, payload: &[u8]) -> bytes::Bytes {
        rtp::encode(
            self.ctx.payload_type,
            outbound.sequence,
            outbound.timestamp,
            self.ssrc,
            payload,
        )
    }
}

/// Receive-side half of a call, owned by the registry.
pub struct CallSession {
    core: Arc<SessionCore>,
    segmenter: Segmenter,
    greeted: bool,
    last_seen: Instant,
}

impl CallSession {
    pub fn new(key: CallKey, ctx: Arc<SessionContext>) -> Self {
        let segmenter = Segmenter::new(ctx.segmenter.clone());
        Self {
            core: Arc::new(SessionCore::new(key, ctx)),
            segmenter,
            greeted: false,
            last_seen: Instant::now(),
        }
    }

    pub fn key(&self) -> CallKey {
        self.core.key
    }

    pub fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    pub fn is_greeted(&self) -> bool {
        self.greeted
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Takes one inbound payload. Never waits on collaborators: greeting and
    /// utterance processing are handed to the worker pool.
    pub fn feed(&mut self, payload: &[u8]) {
        self.last_seen = Instant::now();
        self.maybe_greet();

        let frame = decode_frame(payload, self.core.ctx.encoding);
        let Some(utterance) = self.segmenter.push_frame(&frame) else {
            return;
        };

        log::info!(
            "[{}] utterance of {}ms",
            self.core.key,
            utterance.duration().as_millis()
        );
        if !self.core.enqueue(utterance) {
            log::debug!(
                "[{}] utterance queued, {} waiting",
                self.core.key,
                self.core.pending_utterances()
            );
            return;
        }

        let core = self.core.clone();
        if let Err(e) = self.core.ctx.pool.submit(core.drain()) {
            log::warn!("[{}] dropping utterance: {}", self.core.key, e);
            self.core.abandon_drain();
        }
    }

    // 只问候一次；提交失败时下一个包再试
    fn maybe_greet(&mut self) {
        if self.greeted {
            return;
        }
        let greeting = self.core.ctx.dialog.greeting.clone();
        if greeting.trim().is_empty() {
            self.greeted = true;
            return;
        }

        let core = self.core.clone();
        match self
            .core
            .ctx
            .pool
            .submit(async move { core.speak(&greeting).await })
        {
            Ok(()) => self.greeted = true,
            Err(e) => log::warn!("[{}] greeting deferred: {}", self.core.key, e),
        }
    }
}
