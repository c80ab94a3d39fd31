//! G.711 mu-law helpers.
//!
//! Telephony media frames carry 8kHz mono mu-law. The relay only needs to
//! convert at the edges: decoding tracks for WAV recordings and encoding
//! pre-rendered WAV assets into telephony frames.

/// Telephony sample rate in Hz.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Duration of one telephony frame in milliseconds.
pub const FRAME_DURATION_MS: u64 = 20;

/// Bytes in one 20ms mu-law frame at 8kHz.
pub const FRAME_BYTES: usize = 160;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Decode a single mu-law byte into a 16-bit linear sample.
#[inline]
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = ((u >> 4) & 0x07) as i32;
    let mantissa = (u & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode a 16-bit linear sample as mu-law.
#[inline]
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decode a mu-law buffer into linear PCM samples.
pub fn decode_ulaw(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|b| ulaw_to_linear(*b)).collect()
}

/// Encode linear PCM samples as mu-law bytes.
pub fn encode_ulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|s| linear_to_ulaw(*s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_encodes_to_0xff() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(ulaw_to_linear(0xFF), 0);
    }

    #[test]
    fn test_sign_is_preserved() {
        assert!(ulaw_to_linear(linear_to_ulaw(1000)) > 0);
        assert!(ulaw_to_linear(linear_to_ulaw(-1000)) < 0);
    }

    #[test]
    fn test_quantization_error_is_bounded() {
        for sample in [-30000i16, -8000, -100, 50, 700, 12000, 32000] {
            let decoded = ulaw_to_linear(linear_to_ulaw(sample)) as i32;
            let error = (decoded - sample as i32).abs();
            // mu-law step size grows with magnitude, roughly 1/16 of the segment
            assert!(
                error <= (sample as i32).abs() / 16 + 16,
                "sample {sample} decoded to {decoded}"
            );
        }
    }

    #[test]
    fn test_frame_constants() {
        assert_eq!(
            FRAME_BYTES as u64,
            TELEPHONY_SAMPLE_RATE as u64 * FRAME_DURATION_MS / 1000
        );
    }
}
