use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value};

use super::phase::{Phase, PhaseController};
use crate::core::audio::{CallRecorder, Pcm16Downsampler};

/// Playback bookkeeping for the utterance currently streaming to the caller.
///
/// Timestamps are telephony media timestamps (ms since stream start).
#[derive(Debug, Clone, Default)]
pub struct MediaClock {
    latest_media_timestamp: u64,
    utterance_start: Option<u64>,
    utterance_item: Option<String>,
    sent_bytes: u64,
    sent_frames: u64,
}

impl MediaClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the timestamp of an inbound telephony media frame.
    pub fn observe_media(&mut self, timestamp: u64) {
        self.latest_media_timestamp = timestamp;
    }

    pub fn latest_media_timestamp(&self) -> u64 {
        self.latest_media_timestamp
    }

    /// Note an outbound audio chunk for `item_id`.
    ///
    /// Returns true when this chunk starts a new utterance, in which case the
    /// start timestamp is latched and the counters restart.
    pub fn begin_chunk(&mut self, item_id: &str) -> bool {
        let is_new = self.utterance_start.is_none()
            || self.utterance_item.as_deref() != Some(item_id);
        if is_new {
            self.utterance_start = Some(self.latest_media_timestamp);
            self.utterance_item = Some(item_id.to_string());
            self.sent_bytes = 0;
            self.sent_frames = 0;
        }
        is_new
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.sent_bytes += bytes as u64;
        self.sent_frames += 1;
    }

    /// Item id of the utterance in flight, if any.
    pub fn in_flight_item(&self) -> Option<&str> {
        self.utterance_start?;
        self.utterance_item.as_deref()
    }

    /// Playback time since the utterance started, clamped at zero.
    pub fn elapsed_ms(&self) -> Option<u64> {
        self.utterance_start
            .map(|start| self.latest_media_timestamp.saturating_sub(start))
    }

    /// Audio duration actually sent for the current utterance.
    pub fn sent_ms(&self, bytes_per_ms: u64) -> u64 {
        self.sent_bytes / bytes_per_ms.max(1)
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    pub fn sent_frames(&self) -> u64 {
        self.sent_frames
    }

    pub fn reset_utterance(&mut self) {
        self.utterance_start = None;
        self.utterance_item = None;
        self.sent_bytes = 0;
        self.sent_frames = 0;
    }

    /// Forget everything, including the telephony timestamp. Used when a new
    /// stream starts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Marks sent to the telephony leg and not yet acknowledged.
#[derive(Debug, Default)]
pub struct MarkQueue {
    pending: VecDeque<String>,
    next_id: u64,
}

impl MarkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name for the next mark. Call [`MarkQueue::push`] once it is sent.
    pub fn next_name(&mut self) -> String {
        self.next_id += 1;
        format!("responsePart-{}", self.next_id)
    }

    pub fn push(&mut self, name: String) {
        self.pending.push_back(name);
    }

    /// Handle a played-back mark. Marks are acknowledged in order; anything
    /// queued ahead of `name` is considered played as well.
    pub fn acknowledge(&mut self, name: &str) -> bool {
        match self.pending.iter().position(|m| m == name) {
            Some(idx) => {
                self.pending.drain(..=idx);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Observer-supplied session fields, merged over the synthesized setup.
#[derive(Debug, Clone, Default)]
pub struct SessionOverrides {
    values: Map<String, Value>,
}

/// Never taken from an observer; the phase decides these.
const LOCKED_KEYS: [&str; 2] = ["tools", "tool_choice"];

impl SessionOverrides {
    /// Merge incoming fields (shallow, last write wins).
    ///
    /// Returns the keys that were refused.
    pub fn merge(&mut self, incoming: Map<String, Value>, phase: Phase) -> Vec<String> {
        let mut refused = Vec::new();
        for (key, value) in incoming {
            let locked = LOCKED_KEYS.contains(&key.as_str())
                || (key == "instructions" && phase == Phase::ConsentPending);
            if locked || key == "type" {
                refused.push(key);
                continue;
            }
            self.values.insert(key, value);
        }
        refused
    }

    pub fn apply(&self, session: &mut Map<String, Value>) {
        for (key, value) in &self.values {
            session.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One call's state, exclusively owned by its relay task.
#[derive(Debug)]
pub struct Session {
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub custom_parameters: HashMap<String, String>,
    pub clock: MediaClock,
    pub marks: MarkQueue,
    pub phase: PhaseController,
    pub overrides: SessionOverrides,
    pub recorder: CallRecorder,
    /// Converts `pcm16` model output for the caller's leg
    pub downsampler: Pcm16Downsampler,
}

impl Session {
    pub fn new(consent_enabled: bool) -> Self {
        Self {
            stream_sid: None,
            call_sid: None,
            custom_parameters: HashMap::new(),
            clock: MediaClock::new(),
            marks: MarkQueue::new(),
            phase: PhaseController::new(consent_enabled),
            overrides: SessionOverrides::default(),
            recorder: CallRecorder::new(),
            downsampler: Pcm16Downsampler::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.phase()
    }
}
