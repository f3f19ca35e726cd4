mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use rtp_voice_relay::audio::{WireEncoding, pcm_from_le_bytes};
use rtp_voice_relay::collaborators::{Collaborators, Timeouts};
use rtp_voice_relay::config::{SessionConfig, VadConfig};
use rtp_voice_relay::escalation::Escalation;
use rtp_voice_relay::rtp;
use rtp_voice_relay::rtp_bridge::{self, Dispatcher, RtpBridge};
use rtp_voice_relay::session::SessionContext;
use rtp_voice_relay::worker_pool::WorkerPool;

use common::{MockGenerator, MockRecognizer, MockSynthesizer};

#[tokio::test]
async fn test_greeting_streams_back_over_udp() {
    let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let server_addr = server.local_addr().unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let (pool, _workers) = WorkerPool::spawn(2, 8);
    let tts = Arc::new(MockSynthesizer::new(3));
    let ctx = Arc::new(SessionContext {
        services: Collaborators::new(
            Arc::new(MockRecognizer::default()),
            Arc::new(MockGenerator::default()),
            tts.clone(),
            Timeouts::default(),
        ),
        sink: server.clone(),
        pool,
        escalation: Arc::new(Escalation::disabled()),
        dialog: SessionConfig::default(),
        encoding: WireEncoding::Ulaw,
        payload_type: 0,
        segmenter: VadConfig::default().segmenter(),
    });
    let bridge = RtpBridge::new(server, Dispatcher::new(ctx), 2048);
    let handle = tokio::spawn(bridge.run());

    client
        .send_to(&common::datagram(1, 77, &common::silent_frame()), server_addr)
        .await
        .unwrap();

    let mut buf = [0u8; 2048];
    let mut sequences = Vec::new();
    for _ in 0..3 {
        let (len, from) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .expect("greeting packet")
            .unwrap();
        assert_eq!(from, server_addr);
        let pkt = rtp::decode(&buf[..len]).unwrap();
        assert_eq!(pkt.payload_type, 0);
        assert_eq!(pkt.payload.len(), 160);
        sequences.push(pkt.sequence);
    }
    assert_eq!(sequences, vec![0, 1, 2]);
    assert_eq!(tts.texts().len(), 1);

    handle.abort();
}

#[tokio::test]
async fn test_transcribe_forwards_linear_audio() {
    let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let server_addr = server.local_addr().unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (audio_tx, mut audio_rx) = mpsc::channel(8);

    let handle = tokio::spawn(rtp_bridge::run_transcribe(
        server,
        WireEncoding::Ulaw,
        2048,
        audio_tx,
    ));

    // junk first; it must not reach the recognizer
    client.send_to(&[1, 2, 3], server_addr).await.unwrap();
    client
        .send_to(&common::datagram(1, 5, &common::loud_frame()), server_addr)
        .await
        .unwrap();

    let pcm = tokio::time::timeout(Duration::from_secs(5), audio_rx.recv())
        .await
        .expect("audio chunk")
        .unwrap();
    assert_eq!(pcm.len(), 320);
    let samples = pcm_from_le_bytes(&pcm);
    assert!(samples[0] > 1500 && samples[1] < -1500);

    handle.abort();
}
