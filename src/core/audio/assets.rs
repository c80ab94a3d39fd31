//! Pre-rendered telephony audio assets.
//!
//! Assets are synthesized offline (by an external tool) and loaded once at
//! startup. Two on-disk encodings are accepted:
//!
//! - `.ulaw` / `.raw` - headerless 8kHz mono mu-law bytes
//! - `.wav` - 8kHz mono 16-bit PCM, converted to mu-law on load
//!
//! Loaded assets are pre-chunked into 20ms frames so that playback only has
//! to pace already-encoded payloads.

use std::path::{Path, PathBuf};

use base64::prelude::*;
use bytes::Bytes;
use thiserror::Error;

use super::g711::{FRAME_BYTES, FRAME_DURATION_MS, TELEPHONY_SAMPLE_RATE, encode_ulaw};

/// Errors raised while loading an audio asset.
#[derive(Debug, Error)]
pub enum AudioAssetError {
    #[error("Failed to read audio asset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode WAV asset {path}: {message}")]
    Wav { path: PathBuf, message: String },

    #[error("Unsupported WAV format in {path}: {details}")]
    UnsupportedFormat { path: PathBuf, details: String },

    #[error("Audio asset {0} is empty")]
    Empty(PathBuf),
}

/// A pre-rendered utterance split into 20ms mu-law frames.
#[derive(Debug, Clone)]
pub struct AudioAsset {
    name: String,
    frames: Vec<Bytes>,
}

impl AudioAsset {
    /// Build an asset from raw mu-law bytes.
    ///
    /// The final frame is padded with mu-law silence so every frame is a
    /// full 20ms.
    pub fn from_ulaw(name: impl Into<String>, data: &[u8]) -> Self {
        let frames = data
            .chunks(FRAME_BYTES)
            .map(|chunk| {
                if chunk.len() == FRAME_BYTES {
                    Bytes::copy_from_slice(chunk)
                } else {
                    let mut padded = chunk.to_vec();
                    padded.resize(FRAME_BYTES, 0xFF);
                    Bytes::from(padded)
                }
            })
            .collect();

        Self {
            name: name.into(),
            frames,
        }
    }

    /// Load an asset from disk, choosing the decoder by file extension.
    pub fn load(path: &Path) -> Result<Self, AudioAssetError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("asset")
            .to_string();

        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        let ulaw = if is_wav {
            load_wav_as_ulaw(path)?
        } else {
            std::fs::read(path).map_err(|source| AudioAssetError::Io {
                path: path.to_path_buf(),
                source,
            })?
        };

        if ulaw.is_empty() {
            return Err(AudioAssetError::Empty(path.to_path_buf()));
        }

        let asset = Self::from_ulaw(name, &ulaw);
        tracing::info!(
            asset = %asset.name,
            frames = asset.frame_count(),
            duration_ms = asset.duration_ms(),
            "Loaded audio asset"
        );
        Ok(asset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Playback duration at the telephony frame cadence.
    pub fn duration_ms(&self) -> u64 {
        self.frames.len() as u64 * FRAME_DURATION_MS
    }

    /// Base64 payloads ready to be placed in outbound media events.
    pub fn encoded_frames(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|f| BASE64_STANDARD.encode(f))
            .collect()
    }
}

fn load_wav_as_ulaw(path: &Path) -> Result<Vec<u8>, AudioAssetError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| AudioAssetError::Wav {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let spec = reader.spec();
    if spec.channels != 1
        || spec.sample_rate != TELEPHONY_SAMPLE_RATE
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(AudioAssetError::UnsupportedFormat {
            path: path.to_path_buf(),
            details: format!(
                "expected 8000Hz mono 16-bit PCM, got {}Hz {}ch {}-bit {:?}",
                spec.sample_rate, spec.channels, spec.bits_per_sample, spec.sample_format
            ),
        });
    }

    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AudioAssetError::Wav {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(encode_ulaw(&samples))
}

/// Assets used by the consent flow, loaded once and shared by all sessions.
#[derive(Debug, Clone, Default)]
pub struct ConsentAssets {
    /// Spoken consent question, played while the model listens.
    pub prompt: Option<AudioAsset>,
    /// Spoken goodbye played after consent is denied.
    pub denial: Option<AudioAsset>,
}
