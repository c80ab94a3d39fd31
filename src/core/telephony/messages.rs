//! Media stream wire format.
//!
//! Inbound frames (gateway -> us):
//! - `connected` - socket is up, no stream yet
//! - `start` - stream metadata (`streamSid`, `callSid`, custom parameters)
//! - `media` - 20ms of 8kHz mu-law audio, base64, with a playback timestamp
//! - `mark` - a mark we sent earlier has been played
//! - `dtmf` - keypad digit
//! - `stop` (also accepted as `close`) - the call is over
//!
//! Outbound frames (us -> gateway): `media`, `mark`, `clear`.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("Malformed telephony frame: {0}")]
    Malformed(String),

    #[error("Invalid media payload: {0}")]
    InvalidPayload(String),
}

// =============================================================================
// Inbound
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartMetadata,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        mark: MarkPayload,
    },
    Dtmf {
        dtmf: DtmfPayload,
    },
    #[serde(alias = "close")]
    Stop {
        #[serde(default)]
        stop: Option<serde_json::Value>,
    },
}

impl TelephonyEvent {
    pub fn parse(text: &str) -> Result<Self, TelephonyError> {
        serde_json::from_str(text).map_err(|e| TelephonyError::Malformed(e.to_string()))
    }

    /// Event name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Start { .. } => "start",
            Self::Media { .. } => "media",
            Self::Mark { .. } => "mark",
            Self::Dtmf { .. } => "dtmf",
            Self::Stop { .. } => "stop",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Milliseconds since the stream started. Sent as a string by most
    /// gateways, accepted as a number too.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub timestamp: u64,
    /// Base64 mu-law audio
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DtmfPayload {
    #[serde(default)]
    pub digit: String,
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Float(f) if f >= 0.0 => Ok(f as u64),
        Raw::Float(f) => Err(serde::de::Error::custom(format!("negative timestamp {f}"))),
        Raw::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("timestamp {s:?}: {e}"))),
    }
}

// =============================================================================
// Outbound
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundMessage {
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: payload.into(),
            },
        }
    }

    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkPayload { name: name.into() },
        }
    }

    pub fn clear(stream_sid: impl Into<String>) -> Self {
        Self::Clear {
            stream_sid: stream_sid.into(),
        }
    }
}

/// What the session asks the telephony writer to do.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyCommand {
    Frame(OutboundMessage),
    /// Close the socket after everything queued before it has been written
    Close,
}
