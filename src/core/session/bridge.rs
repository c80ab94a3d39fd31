//! Duplex audio forwarding.
//!
//! Caller audio goes to the model as-is (both sides speak base64 mu-law), and
//! model audio goes to the caller followed by a mark so playback progress can
//! be observed. Model `pcm16` output is converted to 8kHz mu-law first. The
//! only side effects are the two legs' outbound queues and the session's own
//! bookkeeping.

use base64::prelude::*;

use super::state::Session;
use crate::core::realtime::{ClientEvent, ModelLeg, OutputAudioFormat, RealtimeError};
use crate::core::telephony::{MediaPayload, TelephonySink};

/// What happened to an inbound caller frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Forwarded,
    /// No open model leg
    NoModel,
    /// Model leg queue full or closed
    Dropped,
}

/// Forward one caller media frame toward the model.
pub fn forward_inbound(
    session: &mut Session,
    model: Option<&ModelLeg>,
    media: MediaPayload,
) -> InboundOutcome {
    session.clock.observe_media(media.timestamp);

    if session.recorder.is_armed() {
        match BASE64_STANDARD.decode(media.payload.as_bytes()) {
            Ok(audio) => session.recorder.push_caller(&audio),
            Err(e) => tracing::debug!("Undecodable caller audio not recorded: {}", e),
        }
    }

    let Some(model) = model.filter(|m| m.is_open()) else {
        tracing::trace!("Model leg not open, dropping caller audio");
        return InboundOutcome::NoModel;
    };

    match model.send(ClientEvent::InputAudioBufferAppend {
        audio: media.payload,
    }) {
        Ok(()) => InboundOutcome::Forwarded,
        Err(RealtimeError::Backpressure) => {
            tracing::debug!("Model leg backpressured, dropping caller audio");
            InboundOutcome::Dropped
        }
        Err(e) => {
            tracing::debug!("Dropping caller audio: {}", e);
            InboundOutcome::Dropped
        }
    }
}

/// Forward one model audio chunk to the caller.
///
/// Returns false when the chunk was not delivered.
pub fn forward_outbound(
    session: &mut Session,
    telephony: &TelephonySink,
    item_id: &str,
    delta: String,
    format: OutputAudioFormat,
) -> bool {
    let Some(stream_sid) = session.stream_sid.clone() else {
        tracing::debug!(item_id, "Model audio before stream start, dropping");
        return false;
    };

    let audio = match BASE64_STANDARD.decode(delta.as_bytes()) {
        Ok(audio) => audio,
        Err(e) => {
            tracing::debug!(item_id, "Malformed audio delta: {}", e);
            return false;
        }
    };

    if session.clock.begin_chunk(item_id) {
        session.downsampler.reset();
        tracing::debug!(
            item_id,
            start_ms = session.clock.latest_media_timestamp(),
            "Model utterance started"
        );
    }

    // Sent audio is accounted in the model's own format; truncation offsets
    // refer to the model's item.
    let (payload, ulaw) = match format {
        OutputAudioFormat::G711Ulaw => (delta, audio.clone()),
        OutputAudioFormat::Pcm16 => {
            let ulaw = session.downsampler.process(&audio);
            if ulaw.is_empty() {
                session.clock.record_sent(audio.len());
                return true;
            }
            (BASE64_STANDARD.encode(&ulaw), ulaw)
        }
    };

    if !telephony.send_media(&stream_sid, payload) {
        return false;
    }
    session.clock.record_sent(audio.len());
    session.recorder.push_model(&ulaw);

    let mark = session.marks.next_name();
    if telephony.send_mark(&stream_sid, mark.clone()) {
        session.marks.push(mark);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telephony::{OutboundMessage, TelephonyCommand};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn media(timestamp: u64, bytes: &[u8]) -> MediaPayload {
        MediaPayload {
            timestamp,
            payload: BASE64_STANDARD.encode(bytes),
            track: None,
        }
    }

    fn model_leg() -> (ModelLeg, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let (_frames_tx, frames_rx) = mpsc::channel(8);
        (ModelLeg::new(tx, frames_rx, CancellationToken::new()), rx)
    }

    #[tokio::test]
    async fn test_inbound_forwarded_verbatim() {
        let mut session = Session::new(false);
        let (leg, mut rx) = model_leg();

        let frame = media(40, &[0x7F; 160]);
        let payload = frame.payload.clone();
        assert_eq!(
            forward_inbound(&mut session, Some(&leg), frame),
            InboundOutcome::Forwarded
        );
        assert_eq!(session.clock.latest_media_timestamp(), 40);

        match rx.recv().await {
            Some(ClientEvent::InputAudioBufferAppend { audio }) => assert_eq!(audio, payload),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_inbound_without_model_still_tracks_clock() {
        let mut session = Session::new(false);
        assert_eq!(
            forward_inbound(&mut session, None, media(120, &[0; 160])),
            InboundOutcome::NoModel
        );
        assert_eq!(session.clock.latest_media_timestamp(), 120);
    }

    #[test]
    fn test_inbound_recorded_only_when_armed() {
        let mut session = Session::new(true);
        forward_inbound(&mut session, None, media(20, &[1; 160]));
        assert_eq!(session.recorder.caller_len(), 0);

        session.recorder.arm();
        forward_inbound(&mut session, None, media(40, &[1; 160]));
        assert_eq!(session.recorder.caller_len(), 160);
    }

    #[tokio::test]
    async fn test_outbound_sends_media_then_mark() {
        let mut session = Session::new(false);
        session.stream_sid = Some("MZ1".to_string());
        session.clock.observe_media(1000);
        let (tx, mut rx) = mpsc::channel(8);
        let sink = TelephonySink::new(tx);

        let delta = BASE64_STANDARD.encode([0x55; 320]);
        assert!(forward_outbound(
            &mut session,
            &sink,
            "item_1",
            delta.clone(),
            OutputAudioFormat::G711Ulaw
        ));

        assert_eq!(
            rx.recv().await,
            Some(TelephonyCommand::Frame(OutboundMessage::media("MZ1", delta)))
        );
        assert_eq!(
            rx.recv().await,
            Some(TelephonyCommand::Frame(OutboundMessage::mark(
                "MZ1",
                "responsePart-1"
            )))
        );
        assert_eq!(session.clock.in_flight_item(), Some("item_1"));
        assert_eq!(session.clock.sent_bytes(), 320);
        assert_eq!(session.clock.elapsed_ms(), Some(0));
        assert_eq!(session.marks.len(), 1);
    }

    #[test]
    fn test_outbound_before_start_is_dropped() {
        let mut session = Session::new(false);
        let (tx, _rx) = mpsc::channel(8);
        let delta = BASE64_STANDARD.encode([0x55; 160]);

        assert!(!forward_outbound(
            &mut session,
            &TelephonySink::new(tx),
            "item_1",
            delta,
            OutputAudioFormat::G711Ulaw
        ));
        assert!(session.clock.in_flight_item().is_none());
    }

    #[tokio::test]
    async fn test_outbound_pcm16_is_sent_as_ulaw() {
        let mut session = Session::new(false);
        session.stream_sid = Some("MZ1".to_string());
        session.recorder.arm();
        let (tx, mut rx) = mpsc::channel(8);
        let sink = TelephonySink::new(tx);

        // 20ms of 24kHz pcm16 at a constant level
        let pcm: Vec<u8> = [1000i16; 480].iter().flat_map(|s| s.to_le_bytes()).collect();
        let delta = BASE64_STANDARD.encode(&pcm);
        assert!(forward_outbound(
            &mut session,
            &sink,
            "item_1",
            delta.clone(),
            OutputAudioFormat::Pcm16,
        ));

        let expected = BASE64_STANDARD.encode([crate::core::audio::g711::linear_to_ulaw(1000); 160]);
        match rx.recv().await {
            Some(TelephonyCommand::Frame(frame)) => {
                assert_eq!(frame, OutboundMessage::media("MZ1", expected));
                assert_ne!(frame, OutboundMessage::media("MZ1", delta));
            }
            other => panic!("unexpected {other:?}"),
        }
        // accounting stays in model bytes: 960 bytes at 48 bytes/ms is 20ms
        assert_eq!(session.clock.sent_bytes(), 960);
        assert_eq!(session.recorder.model_len(), 160);
    }

    #[tokio::test]
    async fn test_outbound_pcm16_partial_sample_waits() {
        let mut session = Session::new(false);
        session.stream_sid = Some("MZ1".to_string());
        let (tx, mut rx) = mpsc::channel(8);
        let sink = TelephonySink::new(tx);

        assert!(forward_outbound(
            &mut session,
            &sink,
            "item_1",
            BASE64_STANDARD.encode([0u8; 4]),
            OutputAudioFormat::Pcm16,
        ));
        assert!(rx.try_recv().is_err());
        assert!(session.marks.is_empty());

        forward_outbound(
            &mut session,
            &sink,
            "item_1",
            BASE64_STANDARD.encode([0u8; 2]),
            OutputAudioFormat::Pcm16,
        );
        assert_eq!(
            rx.recv().await,
            Some(TelephonyCommand::Frame(OutboundMessage::media(
                "MZ1",
                BASE64_STANDARD.encode([0xFF])
            )))
        );
    }
}
