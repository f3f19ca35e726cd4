use std::sync::Arc;

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::signal;
use tokio::sync::mpsc;

use rtp_voice_relay::collaborators::{Collaborators, SttEvent, SttStream};
use rtp_voice_relay::config::{Config, RelayMode};
use rtp_voice_relay::escalation::Escalation;
use rtp_voice_relay::rtp_bridge::{self, Dispatcher, RtpBridge};
use rtp_voice_relay::session::SessionContext;
use rtp_voice_relay::worker_pool::WorkerPool;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 文件可选
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path =
        std::env::var("RELAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    let bind_addr = config.bind_addr()?;
    let socket = Arc::new(
        UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("binding RTP socket on {}", bind_addr))?,
    );

    match config.mode {
        RelayMode::Dialog => run_dialog(config, socket).await,
        RelayMode::Transcribe => run_transcribe(config, socket).await,
    }
}

async fn run_dialog(config: Config, socket: Arc<UdpSocket>) -> anyhow::Result<()> {
    let (pool, workers) = WorkerPool::spawn(config.workers.count, config.workers.queue_capacity);
    let services = Collaborators::from_config(&config)?;

    let ctx = Arc::new(SessionContext {
        services,
        sink: socket.clone(),
        pool,
        escalation: Arc::new(Escalation::new(&config.escalation)),
        dialog: config.session.clone(),
        encoding: config.audio.encoding,
        payload_type: config.audio.payload_type(),
        segmenter: config.vad.segmenter(),
    });
    log::info!(
        "Dialog relay starting: {:?} payload type {}, {} workers",
        ctx.encoding,
        ctx.payload_type,
        config.workers.count
    );

    let bridge = RtpBridge::new(socket, Dispatcher::new(ctx), config.network.recv_buffer_size);

    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down...");
        }
        result = bridge.run() => {
            result.context("RTP receive loop failed")?;
        }
    }

    // queued greetings and replies are not worth finishing once the socket loop is gone
    workers.abort();
    Ok(())
}

async fn run_transcribe(config: Config, socket: Arc<UdpSocket>) -> anyhow::Result<()> {
    let (tx_stt_event, mut rx_stt_event) = mpsc::channel::<SttEvent>(100);
    let (tx_audio, rx_audio) = mpsc::channel::<Vec<u8>>(500);

    let stream = SttStream::new(config.stt.clone(), tx_stt_event, rx_audio);
    tokio::spawn(stream.run());

    let encoding = config.audio.encoding;
    let recv_buffer_size = config.network.recv_buffer_size;
    let listener = tokio::spawn(async move {
        if let Err(e) = rtp_bridge::run_transcribe(socket, encoding, recv_buffer_size, tx_audio).await {
            log::error!("RTP listener error: {}", e);
        }
    });

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
            event = rx_stt_event.recv() => {
                match event {
                    Some(SttEvent::Connected) => log::info!("Recognizer connected"),
                    Some(SttEvent::Text(text)) => log::info!("STT: {}", text),
                    Some(SttEvent::Disconnected) => log::warn!("Recognizer disconnected"),
                    None => break,
                }
            }
        }
    }

    listener.abort();
    Ok(())
}
