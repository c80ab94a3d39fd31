//! Per-call recording of caller and model audio.
//!
//! A recorder starts disarmed. It only captures audio once armed, which the
//! relay does when consent is affirmed (or immediately when consent handling
//! is disabled). Tracks are kept in memory as mu-law and persisted when the
//! session ends; denied calls are never armed and never touch the disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::g711::{TELEPHONY_SAMPLE_RATE, decode_ulaw};

/// On-disk format of persisted recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    /// 8kHz mono 16-bit PCM WAV
    #[default]
    Wav,
    /// Headerless 8kHz mono mu-law
    Ulaw,
}

impl RecordingFormat {
    #[inline]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Ulaw => "ulaw",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "wav" => Some(Self::Wav),
            "ulaw" | "mulaw" | "raw" => Some(Self::Ulaw),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Failed to create recording directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write recording {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Recording settings shared by every session.
#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub dir: PathBuf,
    pub format: RecordingFormat,
}

/// Audio captured for one call.
#[derive(Debug, Default)]
pub struct CallRecorder {
    armed: bool,
    caller: Vec<u8>,
    model: Vec<u8>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start capturing from this point forward.
    pub fn arm(&mut self) {
        if !self.armed {
            tracing::debug!("Call recording armed");
        }
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn push_caller(&mut self, ulaw: &[u8]) {
        if self.armed {
            self.caller.extend_from_slice(ulaw);
        }
    }

    pub fn push_model(&mut self, ulaw: &[u8]) {
        if self.armed {
            self.model.extend_from_slice(ulaw);
        }
    }

    pub fn caller_len(&self) -> usize {
        self.caller.len()
    }

    pub fn model_len(&self) -> usize {
        self.model.len()
    }

    /// Write both tracks under `settings.dir`, named after `stream_id`.
    ///
    /// Returns the written paths; an unarmed recorder writes nothing.
    pub fn persist(
        self,
        stream_id: &str,
        settings: &RecordingSettings,
    ) -> Result<Vec<PathBuf>, RecordingError> {
        if !self.armed || (self.caller.is_empty() && self.model.is_empty()) {
            return Ok(Vec::new());
        }

        std::fs::create_dir_all(&settings.dir).map_err(|source| RecordingError::CreateDir {
            path: settings.dir.clone(),
            source,
        })?;

        let safe_id: String = stream_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let ext = settings.format.extension();

        let mut written = Vec::with_capacity(2);
        for (track, data) in [("caller", &self.caller), ("model", &self.model)] {
            let path = settings.dir.join(format!("{safe_id}-{track}.{ext}"));
            match settings.format {
                RecordingFormat::Wav => write_wav(&path, data)?,
                RecordingFormat::Ulaw => {
                    std::fs::write(&path, data).map_err(|e| RecordingError::Write {
                        path: path.clone(),
                        message: e.to_string(),
                    })?
                }
            }
            written.push(path);
        }

        Ok(written)
    }
}

fn write_wav(path: &Path, ulaw: &[u8]) -> Result<(), RecordingError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TELEPHONY_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let to_err = |e: hound::Error| RecordingError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(to_err)?;
    for sample in decode_ulaw(ulaw) {
        writer.write_sample(sample).map_err(to_err)?;
    }
    writer.finalize().map_err(to_err)
}
