//! audio - narrow-band wire codecs and speech segmentation
//!
//! Everything here runs at 8 kHz mono with 20 ms frames. `g711` holds the
//! mu-law companding, `transcoder` maps wire payloads to and from linear
//! samples, and `segmenter` turns a frame stream into utterances.

pub mod g711;
pub mod segmenter;
pub mod transcoder;

pub use segmenter::{Segmenter, SegmenterConfig, Utterance, rms};
pub use transcoder::{WireEncoding, decode_frame, encode_frame, pcm_from_le_bytes, pcm_to_le_bytes};

/// Sample rate of both supported wire encodings.
pub const SAMPLE_RATE: u32 = 8000;
/// Duration of one wire frame.
pub const FRAME_MS: u32 = 20;
/// Samples carried by one 20 ms frame.
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE * FRAME_MS / 1000) as usize;
