//! Consent gating.
//!
//! A call starts in [`Phase::ConsentPending`] (unless consent handling is
//! disabled) and moves to [`Phase::Active`] at most once. The consent tools
//! only request a decision; [`PhaseController::resolve`] makes it, checking
//! the request against the caller's last transcribed answer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::core::tools::{CapabilitySubset, ConsentDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ConsentPending,
    Active,
}

impl Phase {
    /// Tool subset bound to the model in this phase.
    pub fn subset(&self) -> CapabilitySubset {
        match self {
            Self::ConsentPending => CapabilitySubset::Consent,
            Self::Active => CapabilitySubset::Service,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsentPending => "consent_pending",
            Self::Active => "active",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lexical reading of a caller's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptClass {
    Affirmative,
    Negative,
    Ambiguous,
}

static AFFIRMATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(yes|yeah|yep|yup|sure|ok|okay|agree|agreed|consent|fine|alright|absolutely|certainly|correct|go ahead|of course)\b",
    )
    .expect("affirmative pattern compiles")
});

/// Explicit refusals. Bare negation ("I don't know", "not now") is not a
/// refusal and falls through to `HEDGED`.
static REFUSAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(no|nope|nah|never|refuse|refused|decline|declined|deny|disagree)\b")
        .expect("refusal pattern compiles")
});

/// Negated agreement ("I don't agree", "absolutely not") reads as a refusal
/// even though it contains affirmative words.
static NEGATED_AGREEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(do not|don'?t|not|never)\s+(agree|consent|want|allow|accept)\b|\b(absolutely|certainly|definitely) not\b|\bno way\b|\bno,? thanks?\b|\bno,? thank you\b|\bnot okay\b|\bnot ok\b",
    )
    .expect("negation pattern compiles")
});

/// Negation, hesitation and interruption that make an answer uncertain.
static HEDGED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(not|don'?t|do not|doesn'?t|didn'?t|can'?t|cannot|won'?t|stop|wait|hold on|maybe|perhaps|unsure|depends|understand|know|mean)\b",
    )
    .expect("hedge pattern compiles")
});

/// Classify a transcribed answer to the consent question.
///
/// Only explicit answers classify as `Affirmative` or `Negative`. Anything
/// else is `Ambiguous`: questions, answers that mix yes and no, and negation
/// that is not a refusal ("I don't know", "stop, what is this").
pub fn classify_transcript(text: &str) -> TranscriptClass {
    let normalized = text.trim().to_lowercase().replace('’', "'");
    if normalized.is_empty() || normalized.contains('?') {
        return TranscriptClass::Ambiguous;
    }
    if NEGATED_AGREEMENT.is_match(&normalized) {
        return TranscriptClass::Negative;
    }

    let hedged = HEDGED.is_match(&normalized);
    match (
        AFFIRMATIVE.is_match(&normalized),
        REFUSAL.is_match(&normalized),
    ) {
        (true, false) if !hedged => TranscriptClass::Affirmative,
        (false, true) if !hedged => TranscriptClass::Negative,
        _ => TranscriptClass::Ambiguous,
    }
}

/// What the session must do with a consent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Now active: bind the service subset and start recording
    Affirmed,
    /// Now active, but the call ends: close the model leg, play the denial
    Denied,
    /// Still pending; ask the caller again
    Clarify {
        /// The model asked for affirm or deny but the transcript disagreed
        downgraded: bool,
    },
    /// Consent was already resolved
    AlreadyResolved,
}

/// A completed caller transcript and the conversation item it belongs to.
#[derive(Debug, Clone)]
struct CallerAnswer {
    item_id: Option<String>,
    text: String,
}

/// Per-call phase state machine.
///
/// Transcripts are tied to caller turns by item id. Transcription often
/// completes after the model has already acted on the turn, so a transcript
/// for a turn that was already resolved, or that a newer turn has replaced,
/// is discarded instead of being held against the next request.
#[derive(Debug, Clone)]
pub struct PhaseController {
    phase: Phase,
    answer: Option<CallerAnswer>,
    caller_turn: Option<String>,
    resolved_turn: Option<String>,
}

impl PhaseController {
    pub fn new(consent_enabled: bool) -> Self {
        Self {
            phase: if consent_enabled {
                Phase::ConsentPending
            } else {
                Phase::Active
            },
            answer: None,
            caller_turn: None,
            resolved_turn: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.phase == Phase::ConsentPending
    }

    /// The caller finished speaking; `item_id` is their new turn.
    pub fn note_turn(&mut self, item_id: &str) {
        if !self.is_pending() {
            return;
        }
        if self
            .answer
            .as_ref()
            .is_some_and(|a| a.item_id.as_deref().is_some_and(|id| id != item_id))
        {
            self.answer = None;
        }
        self.caller_turn = Some(item_id.to_string());
    }

    /// Remember the caller's latest completed utterance.
    ///
    /// Returns false when the transcript was discarded as stale.
    pub fn note_transcript(&mut self, item_id: Option<&str>, transcript: &str) -> bool {
        if !self.is_pending() {
            return false;
        }
        if let Some(id) = item_id {
            let resolved = self.resolved_turn.as_deref() == Some(id);
            let superseded = self.caller_turn.as_deref().is_some_and(|turn| turn != id);
            if resolved || superseded {
                return false;
            }
        }
        self.answer = Some(CallerAnswer {
            item_id: item_id.map(str::to_string),
            text: transcript.to_string(),
        });
        true
    }

    pub fn last_transcript(&self) -> Option<&str> {
        self.answer.as_ref().map(|a| a.text.as_str())
    }

    /// Decide a consent request from the model.
    ///
    /// The transcript, when present, is consumed and its turn marked resolved:
    /// a later request has to be backed by a newer answer or stands on the
    /// model's word alone.
    pub fn resolve(&mut self, requested: ConsentDecision) -> Resolution {
        if !self.is_pending() {
            return Resolution::AlreadyResolved;
        }

        let answer = self.answer.take();
        self.resolved_turn = self
            .caller_turn
            .clone()
            .or_else(|| answer.as_ref().and_then(|a| a.item_id.clone()));
        let transcript_class = answer.map(|a| classify_transcript(&a.text));

        let effective = match (requested, transcript_class) {
            (ConsentDecision::Clarify, _) | (_, None) => requested,
            (_, Some(TranscriptClass::Ambiguous)) => ConsentDecision::Clarify,
            (ConsentDecision::Affirm, Some(TranscriptClass::Negative)) => ConsentDecision::Clarify,
            (ConsentDecision::Deny, Some(TranscriptClass::Affirmative)) => ConsentDecision::Clarify,
            _ => requested,
        };

        match effective {
            ConsentDecision::Affirm => {
                self.phase = Phase::Active;
                Resolution::Affirmed
            }
            ConsentDecision::Deny => {
                self.phase = Phase::Active;
                Resolution::Denied
            }
            ConsentDecision::Clarify => Resolution::Clarify {
                downgraded: requested != ConsentDecision::Clarify,
            },
        }
    }
}
