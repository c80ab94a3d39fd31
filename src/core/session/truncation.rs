//! Barge-in truncation.
//!
//! When the caller starts talking over the model, the model has to be told
//! how much of its utterance was actually heard so its conversation history
//! matches what the caller experienced. The heard duration is estimated from
//! telephony playback timestamps and bounded by the audio we actually sent.

use super::state::MediaClock;
use crate::core::realtime::openai::ApiError;

/// Thresholds for [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationPolicy {
    /// Below this, the interruption is treated as noise
    pub min_elapsed_ms: u64,
    /// How far elapsed playback may run ahead of sent audio
    pub overrun_slack_ms: u64,
    /// Output audio rate used to turn sent bytes into milliseconds
    pub bytes_per_ms: u64,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            min_elapsed_ms: 100,
            overrun_slack_ms: 200,
            bytes_per_ms: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationDecision {
    /// No model utterance in flight
    Idle,
    /// Too early to be a real interruption; reset tracking only
    TooShort { elapsed_ms: u64 },
    /// Playback clock ran ahead of delivered audio; clear the caller's
    /// buffer but do not truncate
    Overrun { elapsed_ms: u64, sent_ms: u64 },
    /// Truncate `item_id` at `audio_end_ms` (never past the sent audio) and
    /// clear the caller's buffer
    Truncate { item_id: String, audio_end_ms: u64 },
}

/// Decide what a speech-started signal means for the utterance in flight.
pub fn evaluate(clock: &MediaClock, policy: &TruncationPolicy) -> TruncationDecision {
    let (Some(item_id), Some(elapsed_ms)) = (clock.in_flight_item(), clock.elapsed_ms()) else {
        return TruncationDecision::Idle;
    };

    if elapsed_ms < policy.min_elapsed_ms {
        return TruncationDecision::TooShort { elapsed_ms };
    }

    let sent_ms = clock.sent_ms(policy.bytes_per_ms);
    if elapsed_ms > sent_ms + policy.overrun_slack_ms {
        return TruncationDecision::Overrun {
            elapsed_ms,
            sent_ms,
        };
    }

    // Within the slack the caller may have heard everything we sent, but
    // never more than that.
    TruncationDecision::Truncate {
        item_id: item_id.to_string(),
        audio_end_ms: elapsed_ms.min(sent_ms),
    }
}

/// Whether a model error is the server rejecting a truncate that reached
/// past the audio it had produced. This is a benign race, not a failure.
pub fn is_truncation_race(error: &ApiError) -> bool {
    if error.param.as_deref() == Some("audio_end_ms") {
        return true;
    }
    let message = error.message.to_lowercase();
    message.contains("shorter than") || message.contains("too short")
}
