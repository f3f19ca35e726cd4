//! The single-socket receive loop.
//!
//! One task owns the socket's read side and the session registry. Every
//! datagram is decoded, matched to its call and fed to that call's session;
//! anything slow happens on the worker pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::audio::{WireEncoding, decode_frame, pcm_to_le_bytes};
use crate::error::{RelayError, RelayResult};
use crate::registry::SessionRegistry;
use crate::rtp;
use crate::session::{CallKey, SessionContext};

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Demultiplexes datagrams onto sessions. Separated from the socket so it can
/// be driven directly.
pub struct Dispatcher {
    registry: SessionRegistry,
}

impl Dispatcher {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            registry: SessionRegistry::new(ctx),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    /// Feeds one datagram to its call. Returns the call it went to, or `None`
    /// when the datagram was dropped.
    pub fn handle_datagram(&mut self, datagram: &[u8], peer: SocketAddr) -> Option<CallKey> {
        let packet = match rtp::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("Dropping {} byte datagram from {}: {}", datagram.len(), peer, e);
                return None;
            }
        };
        if packet.payload.is_empty() {
            return None;
        }

        let key = CallKey::new(peer, packet.ssrc);
        let (session, created) = self.registry.get_or_create(key);
        if created {
            log::info!("[{}] new call, payload type {}", key, packet.payload_type);
        }
        session.feed(&packet.payload);
        Some(key)
    }

    pub fn evict_idle(&mut self, now: Instant) -> usize {
        self.registry.evict_idle(now)
    }
}

pub struct RtpBridge {
    socket: Arc<UdpSocket>,
    dispatcher: Dispatcher,
    recv_buffer_size: usize,
}

impl RtpBridge {
    pub fn new(socket: Arc<UdpSocket>, dispatcher: Dispatcher, recv_buffer_size: usize) -> Self {
        Self {
            socket,
            dispatcher,
            recv_buffer_size,
        }
    }

    /// Runs until the socket fails.
    pub async fn run(mut self) -> RelayResult<()> {
        let socket = self.socket.clone();
        let mut buf = vec![0u8; self.recv_buffer_size];
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        if let Ok(addr) = socket.local_addr() {
            log::info!("Listening for RTP on {}", addr);
        }

        loop {
            tokio::select! {
                recv = socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, peer)) => {
                            self.dispatcher.handle_datagram(&buf[..len], peer);
                        }
                        Err(e) if is_transient(&e) => {
                            log::debug!("Transient receive error: {}", e);
                        }
                        Err(e) => return Err(RelayError::Io(e)),
                    }
                }
                _ = sweep.tick() => {
                    let evicted = self.dispatcher.evict_idle(Instant::now());
                    if evicted > 0 {
                        log::info!(
                            "Evicted {} idle calls, {} active",
                            evicted,
                            self.dispatcher.registry().len()
                        );
                    }
                }
            }
        }
    }
}

/// Media-only loop: every payload is converted to s16le and handed to the
/// streaming recognizer. Chunks are dropped when the recognizer falls behind.
pub async fn run_transcribe(
    socket: Arc<UdpSocket>,
    encoding: WireEncoding,
    recv_buffer_size: usize,
    audio_tx: mpsc::Sender<Vec<u8>>,
) -> RelayResult<()> {
    let mut buf = vec![0u8; recv_buffer_size];
    if let Ok(addr) = socket.local_addr() {
        log::info!("Listening for RTP on {} (transcribe mode)", addr);
    }

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(RelayError::Io(e)),
        };
        let Some(pcm) = transcribe_payload(&buf[..len], encoding) else {
            continue;
        };
        match audio_tx.try_send(pcm) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::debug!("Recognizer backlog full, dropping audio from {}", peer);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Ok(()),
        }
    }
}

/// s16le audio carried by one datagram, if it is a usable packet.
pub fn transcribe_payload(datagram: &[u8], encoding: WireEncoding) -> Option<Vec<u8>> {
    let packet = rtp::decode(datagram).ok()?;
    if packet.payload.is_empty() {
        return None;
    }
    Some(pcm_to_le_bytes(&decode_frame(&packet.payload, encoding)))
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}
