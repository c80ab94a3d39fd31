//! Per-call session relay.
//!
//! Each call gets one task ([`SessionRelay`]) that owns all of the call's
//! state and both transport legs. Everything that can touch a session
//! (telephony frames, model frames, tool completions, timers, observer
//! traffic) is funneled into that task, so session state is never shared
//! between concurrent paths.
//!
//! - `registry` - keyed table of live sessions, identity migration
//! - `state` - the per-call entity: media clock, mark queue, overrides
//! - `bridge` - duplex audio forwarding and playback bookkeeping
//! - `truncation` - barge-in decisions
//! - `phase` - consent gating
//! - `scheduler` - cancellable delayed work and paced playback
//! - `relay` - the event loop wiring it together

use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::audio::RecordingSettings;
use crate::core::realtime::{ModelLeg, OutputAudioFormat, RealtimeResult};
use crate::core::tools::ToolCompletion;

pub mod bridge;
pub mod phase;
mod registry;
mod relay;
pub mod scheduler;
mod state;
pub mod truncation;

pub use phase::{Phase, PhaseController, Resolution, TranscriptClass, classify_transcript};
pub use registry::{SessionHandle, SessionRegistry, SessionStatus, SessionSummary};
pub use relay::{RelayContext, SessionRelay, TelephonyLeg};
pub use scheduler::SessionTimers;
pub use state::{MarkQueue, MediaClock, Session, SessionOverrides};
pub use truncation::{TruncationDecision, TruncationPolicy};

/// Used when no greeting text is configured.
pub const DEFAULT_GREETING: &str = "Greet the caller briefly and ask how you can help.";

/// Sent to the model with a clarify decision.
pub const CLARIFY_INSTRUCTION: &str = "The caller's answer was not a clear yes or no. \
Politely ask again whether they consent to this call being recorded, and ask for a \
simple yes or no.";

/// Per-session behaviour derived from the server configuration.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub consent_enabled: bool,
    pub consent_instructions: String,
    pub greet_after_consent: bool,
    pub base_instructions: String,
    pub greeting_text: Option<String>,
    pub greeting_delay: Duration,
    pub end_call_grace: Duration,
    pub voice: String,
    pub transcription_model: String,
    pub output_audio_format: OutputAudioFormat,
    pub truncation_min_elapsed_ms: u64,
    pub truncation_overrun_slack_ms: u64,
    pub tool_timeout: Duration,
    pub recording: Option<RecordingSettings>,
}

impl RelaySettings {
    pub fn greeting(&self) -> &str {
        self.greeting_text.as_deref().unwrap_or(DEFAULT_GREETING)
    }

    pub fn truncation_policy(&self) -> TruncationPolicy {
        TruncationPolicy {
            min_elapsed_ms: self.truncation_min_elapsed_ms,
            overrun_slack_ms: self.truncation_overrun_slack_ms,
            bytes_per_ms: self.output_audio_format.bytes_per_ms(),
        }
    }
}

/// Delayed work delivered back to the session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Open the conversation once the greeting delay has passed
    Greeting,
    /// Continue the turn after consent, with greeting instructions
    DelayedResponse,
    /// Close the telephony leg
    HangUp,
}

/// Everything other than the two legs' frames that reaches a session.
#[derive(Debug)]
pub enum SessionCommand {
    AttachObserver(mpsc::Sender<String>),
    DetachObserver,
    /// Text received from the observer
    ObserverMessage(String),
    ToolCompleted(ToolCompletion),
    Timer(TimerEvent),
    ModelConnected(RealtimeResult<ModelLeg>),
}
