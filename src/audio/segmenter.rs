//! Energy-based utterance segmentation.
//!
//! The segmenter is either idle or accumulating. A frame at or above the
//! speech threshold starts accumulation; from then on every frame is kept and
//! trailing quiet time is counted. Once the quiet time reaches
//! `end_silence_ms` the buffer is closed, and it is only emitted if the whole
//! span (speech plus pauses plus the closing silence) is at least
//! `min_utterance_ms` long. A caller who never pauses is cut off at
//! `max_utterance_ms` and the span so far is emitted as is.

use std::time::Duration;

use super::{SAMPLE_RATE, transcoder::pcm_to_le_bytes};

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// RMS level at or above which a frame counts as speech
    pub speech_threshold: f64,
    /// Trailing quiet time that ends an utterance
    pub end_silence_ms: u32,
    /// Shortest span that is reported
    pub min_utterance_ms: u32,
    /// Longest span kept before it is forced out; 0 disables the cap
    pub max_utterance_ms: u32,
    pub sample_rate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 250.0,
            end_silence_ms: 900,
            min_utterance_ms: 1000,
            max_utterance_ms: 30_000,
            sample_rate: SAMPLE_RATE,
        }
    }
}

/// A finished span of linear audio, consumed once by recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(samples_to_ms(self.samples.len(), self.sample_rate))
    }

    /// s16le bytes as expected by the recognizer.
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        pcm_to_le_bytes(&self.samples)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Accumulating,
}

pub struct Segmenter {
    config: SegmenterConfig,
    state: State,
    buffer: Vec<i16>,
    silence_ms: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: State::Idle,
            buffer: Vec::new(),
            silence_ms: 0,
        }
    }

    pub fn is_accumulating(&self) -> bool {
        self.state == State::Accumulating
    }

    /// Feeds one frame and its precomputed energy. Returns an utterance when
    /// this frame closes one that is long enough.
    pub fn push(&mut self, frame: &[i16], energy: f64) -> Option<Utterance> {
        let is_speech = energy >= self.config.speech_threshold;

        match self.state {
            State::Idle => {
                if !is_speech {
                    return None;
                }
                self.state = State::Accumulating;
                self.buffer.clear();
                self.silence_ms = 0;
                self.buffer.extend_from_slice(frame);
                None
            }
            State::Accumulating => {
                self.buffer.extend_from_slice(frame);
                let max_ms = self.config.max_utterance_ms as u64;
                if max_ms > 0
                    && samples_to_ms(self.buffer.len(), self.config.sample_rate) >= max_ms
                {
                    log::info!("Utterance reached {}ms, cutting it off", max_ms);
                    return self.close();
                }
                if is_speech {
                    self.silence_ms = 0;
                    return None;
                }

                self.silence_ms += samples_to_ms(frame.len(), self.config.sample_rate);
                if self.silence_ms < self.config.end_silence_ms as u64 {
                    return None;
                }
                self.close()
            }
        }
    }

    fn close(&mut self) -> Option<Utterance> {
        self.state = State::Idle;
        self.silence_ms = 0;
        let samples = std::mem::take(&mut self.buffer);
        let duration_ms = samples_to_ms(samples.len(), self.config.sample_rate);
        if duration_ms < self.config.min_utterance_ms as u64 {
            log::debug!("Discarding {}ms noise burst", duration_ms);
            return None;
        }
        Some(Utterance {
            samples,
            sample_rate: self.config.sample_rate,
        })
    }

    /// Computes the frame energy and feeds it.
    pub fn push_frame(&mut self, frame: &[i16]) -> Option<Utterance> {
        let energy = rms(frame);
        self.push(frame, energy)
    }
}

/// Root-mean-square of 16-bit samples; 0 for an empty frame.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

fn samples_to_ms(samples: usize, sample_rate: u32) -> u64 {
    samples as u64 * 1000 / sample_rate.max(1) as u64
}
