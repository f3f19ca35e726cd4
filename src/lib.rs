//! RTP media relay between a telephony switch and a voice-bot backend.
//!
//! Inbound RTP is demultiplexed per call, segmented into utterances by
//! energy, and each utterance goes through recognition, reply generation and
//! synthesis before the reply is streamed back at real-time pace.

pub mod audio;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod escalation;
pub mod registry;
pub mod rtp;
pub mod rtp_bridge;
pub mod session;
pub mod worker_pool;

pub use config::{Config, RelayMode};
pub use error::{RelayError, RelayResult};
pub use registry::SessionRegistry;
pub use rtp_bridge::{Dispatcher, RtpBridge};
pub use session::{CallKey, CallSession, PacketSink, SessionContext, SessionCore};
pub use worker_pool::WorkerPool;
