//! Conversion between wire payloads and linear 16-bit samples.

use serde::{Deserialize, Serialize};

use super::FRAME_SAMPLES;
use super::g711;

/// Sample encoding carried in the RTP payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireEncoding {
    /// G.711 mu-law, one byte per sample.
    #[default]
    #[serde(alias = "pcmu", alias = "mulaw")]
    Ulaw,
    /// Signed 16-bit little-endian, two bytes per sample.
    #[serde(alias = "slin", alias = "l16")]
    Linear16,
}

impl WireEncoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            WireEncoding::Ulaw => 1,
            WireEncoding::Linear16 => 2,
        }
    }

    /// Payload size of one 20 ms frame.
    pub fn frame_bytes(self) -> usize {
        FRAME_SAMPLES * self.bytes_per_sample()
    }

    /// Byte value that decodes to silence; pads the last short frame.
    pub fn silence_byte(self) -> u8 {
        match self {
            WireEncoding::Ulaw => g711::ULAW_SILENCE,
            WireEncoding::Linear16 => 0x00,
        }
    }

    /// Static payload type used when the config does not pin one.
    pub fn default_payload_type(self) -> u8 {
        match self {
            WireEncoding::Ulaw => 0,
            WireEncoding::Linear16 => 96,
        }
    }
}

/// Expands a wire payload to linear samples. A trailing odd byte on the
/// linear path is dropped.
pub fn decode_frame(payload: &[u8], encoding: WireEncoding) -> Vec<i16> {
    match encoding {
        WireEncoding::Ulaw => payload.iter().map(|&b| g711::ulaw_to_linear(b)).collect(),
        WireEncoding::Linear16 => pcm_from_le_bytes(payload),
    }
}

/// Compresses linear samples into a wire payload.
pub fn encode_frame(samples: &[i16], encoding: WireEncoding) -> Vec<u8> {
    match encoding {
        WireEncoding::Ulaw => samples.iter().map(|&s| g711::linear_to_ulaw(s)).collect(),
        WireEncoding::Linear16 => pcm_to_le_bytes(samples),
    }
}

pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn pcm_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry() {
        assert_eq!(WireEncoding::Ulaw.frame_bytes(), 160);
        assert_eq!(WireEncoding::Linear16.frame_bytes(), 320);
        assert_eq!(decode_frame(&[WireEncoding::Ulaw.silence_byte(); 160], WireEncoding::Ulaw), vec![0i16; 160]);
    }

    #[test]
    fn test_linear_passthrough() {
        let samples = [0i16, 1, -1, i16::MAX, i16::MIN, 1234];
        let payload = encode_frame(&samples, WireEncoding::Linear16);
        assert_eq!(payload.len(), 12);
        assert_eq!(&payload[..4], &[0, 0, 1, 0]);
        assert_eq!(decode_frame(&payload, WireEncoding::Linear16), samples);
    }

    #[test]
    fn test_linear_odd_byte_dropped() {
        assert_eq!(decode_frame(&[0x10, 0x00, 0x7F], WireEncoding::Linear16), vec![16]);
    }

    #[test]
    fn test_ulaw_frame_within_quantization() {
        let samples: Vec<i16> = (0..160).map(|i| ((i as i32 - 80) * 300) as i16).collect();
        let payload = encode_frame(&samples, WireEncoding::Ulaw);
        assert_eq!(payload.len(), samples.len());
        let back = decode_frame(&payload, WireEncoding::Ulaw);
        for (a, b) in samples.iter().zip(back.iter()) {
            let err = (*a as i32 - *b as i32).abs();
            assert!(err <= (*a as i32).abs() / 16 + 16);
        }
    }

    #[test]
    fn test_encoding_names() {
        #[derive(Deserialize)]
        struct Wrap {
            enc: WireEncoding,
        }
        let w: Wrap = serde_json::from_str(r#"{"enc":"pcmu"}"#).unwrap();
        assert_eq!(w.enc, WireEncoding::Ulaw);
        let w: Wrap = serde_json::from_str(r#"{"enc":"linear16"}"#).unwrap();
        assert_eq!(w.enc, WireEncoding::Linear16);
    }
}
