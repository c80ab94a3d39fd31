//! Model PCM16 to telephony mu-law.
//!
//! With `pcm16` output the model streams 24kHz little-endian 16-bit mono.
//! The caller's leg only carries 8kHz mu-law, so every delta is decimated by
//! three (averaging each group of samples) and then mu-law encoded. Deltas
//! are not aligned to sample groups, so leftover bytes carry over to the next
//! delta of the same utterance.

use super::g711;

/// Model PCM16 output rate in Hz.
pub const MODEL_PCM16_SAMPLE_RATE: u32 = 24_000;

const DECIMATION: usize = (MODEL_PCM16_SAMPLE_RATE / g711::TELEPHONY_SAMPLE_RATE) as usize;

/// Bytes of 24kHz PCM16 consumed per output sample.
const GROUP_BYTES: usize = DECIMATION * 2;

/// Stateful 24kHz PCM16 to 8kHz mu-law converter.
#[derive(Debug, Clone, Default)]
pub struct Pcm16Downsampler {
    carry: Vec<u8>,
}

impl Pcm16Downsampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one chunk, returning the mu-law bytes it completes.
    pub fn process(&mut self, pcm: &[u8]) -> Vec<u8> {
        self.carry.extend_from_slice(pcm);
        let usable = self.carry.len() - self.carry.len() % GROUP_BYTES;

        let samples: Vec<i16> = self.carry[..usable]
            .chunks_exact(GROUP_BYTES)
            .map(|group| {
                let sum: i32 = group
                    .chunks_exact(2)
                    .map(|s| i16::from_le_bytes([s[0], s[1]]) as i32)
                    .sum();
                (sum / DECIMATION as i32) as i16
            })
            .collect();

        self.carry.drain(..usable);
        g711::encode_ulaw(&samples)
    }

    /// Bytes waiting for the rest of their sample group.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Drop any partial group, e.g. when a new utterance starts.
    pub fn reset(&mut self) {
        self.carry.clear();
    }
}
