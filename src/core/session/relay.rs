//! The per-call event loop.
//!
//! A [`SessionRelay`] owns one call: its [`Session`] state, the outbound
//! half of the telephony leg, the model leg and an optional observer. It
//! selects over three sources (telephony frames, model frames, session
//! commands) and handles each event to completion before taking the next,
//! so nothing else ever mutates the session.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::{SessionHandle, SessionRegistry, SessionStatus};
use super::scheduler::SessionTimers;
use super::state::Session;
use super::{
    CLARIFY_INSTRUCTION, Phase, RelaySettings, Resolution, SessionCommand, TimerEvent,
    TruncationDecision, bridge, truncation,
};
use crate::core::audio::ConsentAssets;
use crate::core::realtime::openai::{InputAudioTranscription, ResponseConfig, TurnDetection};
use crate::core::realtime::{
    ClientEvent, ConversationItem, ModelFrame, ModelLeg, OutputAudioFormat, RealtimeResult,
    ServerEvent, SessionConfig, SharedConnector,
};
use crate::core::telephony::{StartMetadata, TelephonyEvent, TelephonySink};
use crate::core::tools::{
    ConsentDecision, ToolCompletion, ToolContext, ToolEffect, ToolError, ToolOutput,
    ToolRegistry, parse_arguments, run_tool,
};

const COMMAND_BUFFER: usize = 64;

/// Extra time after the denial audio before the line is dropped.
const DENIAL_HANGUP_MARGIN: Duration = Duration::from_millis(1000);

/// Shared, read-only dependencies handed to every session.
#[derive(Clone)]
pub struct RelayContext {
    pub settings: Arc<RelaySettings>,
    pub registry: SessionRegistry,
    pub tools: Arc<ToolRegistry>,
    pub connector: SharedConnector,
    pub assets: Arc<ConsentAssets>,
}

/// The telephony leg as seen by a session.
#[derive(Debug)]
pub struct TelephonyLeg {
    pub inbound: mpsc::Receiver<TelephonyEvent>,
    pub outbound: TelephonySink,
}

enum Flow {
    Continue,
    Stop,
}

pub struct SessionRelay {
    ctx: RelayContext,
    key: String,
    handle: Arc<SessionHandle>,
    session: Session,
    telephony: TelephonySink,
    model: Option<ModelLeg>,
    observer: Option<mpsc::Sender<String>>,
    timers: SessionTimers,
    commands: mpsc::Sender<SessionCommand>,
    seen_calls: HashSet<String>,
    conversation_opened: bool,
    hangup_pending: bool,
    denied: bool,
}

impl SessionRelay {
    /// Spawn the relay task for a freshly connected telephony leg.
    pub fn spawn(ctx: RelayContext, leg: TelephonyLeg) -> JoinHandle<()> {
        tokio::spawn(Self::run(ctx, leg))
    }

    /// Run a session until its telephony leg closes.
    pub async fn run(ctx: RelayContext, leg: TelephonyLeg) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let session = Session::new(ctx.settings.consent_enabled);
        let handle = Arc::new(SessionHandle::new(
            commands_tx.clone(),
            SessionStatus::new(session.phase()),
        ));
        let key = ctx.registry.create_pending(handle.clone());
        info!(session = %key, phase = %session.phase(), "Telephony leg connected");

        let relay = SessionRelay {
            timers: SessionTimers::new(commands_tx.clone()),
            ctx,
            key,
            handle,
            session,
            telephony: leg.outbound,
            model: None,
            observer: None,
            commands: commands_tx,
            seen_calls: HashSet::new(),
            conversation_opened: false,
            hangup_pending: false,
            denied: false,
        };
        relay.connect_model();
        relay.event_loop(leg.inbound, commands_rx).await;
    }

    async fn event_loop(
        mut self,
        mut telephony_rx: mpsc::Receiver<TelephonyEvent>,
        mut commands_rx: mpsc::Receiver<SessionCommand>,
    ) {
        loop {
            let flow = tokio::select! {
                event = telephony_rx.recv() => match event {
                    Some(event) => self.on_telephony(event),
                    None => {
                        info!(session = %self.key, "Telephony leg closed");
                        Flow::Stop
                    }
                },
                frame = next_model_frame(&mut self.model) => self.on_model_frame(frame),
                Some(command) = commands_rx.recv() => self.on_command(command),
            };
            if matches!(flow, Flow::Stop) {
                break;
            }
        }
        self.shutdown().await;
    }

    fn connect_model(&self) {
        let connector = self.ctx.connector.clone();
        let commands = self.commands.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            debug!(session = %key, provider = connector.provider_name(), "Opening model leg");
            let result = connector.connect().await;
            if commands
                .send(SessionCommand::ModelConnected(result))
                .await
                .is_err()
            {
                debug!(session = %key, "Session ended before the model leg opened");
            }
        });
    }

    // =========================================================================
    // Telephony leg
    // =========================================================================

    fn on_telephony(&mut self, event: TelephonyEvent) -> Flow {
        match event {
            TelephonyEvent::Connected { protocol } => {
                debug!(session = %self.key, ?protocol, "Media stream connected");
            }
            TelephonyEvent::Start { start } => self.on_stream_start(start),
            TelephonyEvent::Media { media } => {
                bridge::forward_inbound(&mut self.session, self.model.as_ref(), media);
            }
            TelephonyEvent::Mark { mark } => {
                if !self.session.marks.acknowledge(&mark.name) {
                    debug!(session = %self.key, mark = %mark.name, "Acknowledged mark was not pending");
                }
                self.publish_status();
            }
            TelephonyEvent::Dtmf { dtmf } => {
                info!(session = %self.key, digit = %dtmf.digit, "DTMF received");
            }
            TelephonyEvent::Stop { .. } => {
                info!(session = %self.key, "Media stream stopped");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn on_stream_start(&mut self, start: StartMetadata) {
        if let Some(current) = &self.session.stream_sid {
            warn!(session = %self.key, stream = %current, "Duplicate start event ignored");
            return;
        }

        let stream_sid = start.stream_sid;
        if self.ctx.registry.migrate(&self.key, &stream_sid) {
            self.key = stream_sid.clone();
        }
        self.session.stream_sid = Some(stream_sid.clone());
        self.session.call_sid = start.call_sid;
        self.session.custom_parameters = start.custom_parameters;
        self.session.clock.reset();
        self.session.marks.clear();
        info!(
            session = %self.key,
            call_id = ?self.session.call_sid,
            "Media stream started"
        );
        self.publish_status();

        if self.session.phase.is_pending() {
            if let Some(prompt) = &self.ctx.assets.prompt {
                let playback =
                    self.timers
                        .stream_frames(prompt.frames(), self.telephony.clone(), stream_sid);
                debug!(
                    session = %self.key,
                    duration_ms = playback.as_millis() as u64,
                    "Playing consent prompt"
                );
            }
        }
        self.maybe_open_conversation();
    }

    fn clear_caller_buffer(&mut self) {
        if let Some(stream_sid) = &self.session.stream_sid {
            self.telephony.send_clear(stream_sid);
        }
        self.session.marks.clear();
        self.publish_status();
    }

    // =========================================================================
    // Model leg
    // =========================================================================

    fn on_model_connected(&mut self, result: RealtimeResult<ModelLeg>) {
        let leg = match result {
            Ok(leg) => leg,
            Err(e) => {
                error!(session = %self.key, "Model leg connection failed: {}", e);
                return;
            }
        };

        if self.denied || self.telephony.is_closed() {
            debug!(session = %self.key, "Model leg no longer needed");
            leg.close();
            return;
        }

        info!(session = %self.key, phase = %self.session.phase(), "Model leg connected");
        self.model = Some(leg);
        let update = self.session_update();
        self.send_model(update);
        self.publish_status();
        self.maybe_open_conversation();
    }

    fn on_model_frame(&mut self, frame: Option<ModelFrame>) -> Flow {
        let (raw, event) = match frame {
            Some(ModelFrame::Event { raw, event }) => (raw, event),
            Some(ModelFrame::Closed { reason }) => return self.on_model_closed(reason),
            None => return self.on_model_closed(None),
        };

        self.mirror_to_observer(&raw);
        match event {
            Some(event) => self.on_model_event(event),
            None => debug!(session = %self.key, "Unparseable model frame dropped"),
        }
        Flow::Continue
    }

    fn on_model_closed(&mut self, reason: Option<String>) -> Flow {
        info!(session = %self.key, ?reason, "Model leg closed");
        self.model = None;
        self.timers.cancel_all();
        self.publish_status();

        // The farewell is already queued at the caller; nothing more will come.
        if self.hangup_pending {
            self.telephony.close();
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn on_model_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Error { error } => {
                if truncation::is_truncation_race(&error) {
                    debug!(
                        session = %self.key,
                        message = %error.message,
                        "Truncate rejected by model, resetting playback tracking"
                    );
                    self.session.clock.reset_utterance();
                    self.clear_caller_buffer();
                } else {
                    warn!(
                        session = %self.key,
                        code = ?error.code,
                        param = ?error.param,
                        "Model leg error: {}",
                        error.message
                    );
                }
            }
            ServerEvent::SpeechStarted { .. } => self.on_speech_started(),
            ServerEvent::SpeechStopped { item_id, .. } => {
                if let Some(item_id) = item_id {
                    self.session.phase.note_turn(&item_id);
                }
            }
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                debug!(session = %self.key, item_id = ?item_id, transcript = %transcript, "Caller transcript");
                if !self
                    .session
                    .phase
                    .note_transcript(item_id.as_deref(), &transcript)
                    && self.session.phase.is_pending()
                {
                    debug!(session = %self.key, item_id = ?item_id, "Stale consent transcript discarded");
                }
            }
            ServerEvent::AudioDelta { item_id, delta, .. } => {
                bridge::forward_outbound(
                    &mut self.session,
                    &self.telephony,
                    &item_id,
                    delta,
                    self.ctx.settings.output_audio_format,
                );
            }
            ServerEvent::OutputItemDone { item } => {
                if item.is_function_call() {
                    self.dispatch_tool_call(item);
                }
            }
            ServerEvent::ResponseDone { response } => {
                for item in response.output {
                    if item.is_function_call() {
                        self.dispatch_tool_call(item);
                    }
                }
                self.publish_status();
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                debug!(session = %self.key, transcript = %transcript, "Model transcript");
            }
            ServerEvent::SessionCreated { .. } => debug!(session = %self.key, "Model session created"),
            ServerEvent::SessionUpdated { .. } => debug!(session = %self.key, "Model session updated"),
            _ => {}
        }
    }

    fn on_speech_started(&mut self) {
        let policy = self.ctx.settings.truncation_policy();
        match truncation::evaluate(&self.session.clock, &policy) {
            TruncationDecision::Idle => {}
            TruncationDecision::TooShort { elapsed_ms } => {
                debug!(session = %self.key, elapsed_ms, "Interruption too short, not truncating");
                self.session.clock.reset_utterance();
            }
            TruncationDecision::Overrun {
                elapsed_ms,
                sent_ms,
            } => {
                warn!(
                    session = %self.key,
                    elapsed_ms,
                    sent_ms,
                    "Playback clock ahead of sent audio, clearing without truncate"
                );
                self.clear_caller_buffer();
                self.session.clock.reset_utterance();
            }
            TruncationDecision::Truncate {
                item_id,
                audio_end_ms,
            } => {
                info!(
                    session = %self.key,
                    item_id = %item_id,
                    elapsed_ms = audio_end_ms,
                    "Caller barged in, truncating model audio"
                );
                self.send_model(ClientEvent::ConversationItemTruncate {
                    item_id,
                    content_index: 0,
                    audio_end_ms,
                });
                self.clear_caller_buffer();
                self.session.clock.reset_utterance();
            }
        }
    }

    fn session_update(&self) -> ClientEvent {
        let settings = &self.ctx.settings;
        let phase = self.session.phase();
        let instructions = match phase {
            Phase::ConsentPending => &settings.consent_instructions,
            Phase::Active => &settings.base_instructions,
        };

        let config = SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(instructions.clone()),
            voice: Some(settings.voice.clone()),
            input_audio_format: Some(OutputAudioFormat::G711Ulaw.as_str().to_string()),
            output_audio_format: Some(settings.output_audio_format.as_str().to_string()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: settings.transcription_model.clone(),
            }),
            turn_detection: Some(TurnDetection::default()),
            tools: Some(self.ctx.tools.definitions(phase.subset())),
            tool_choice: Some("auto".to_string()),
        };
        let mut session = config.into_object();
        self.session.overrides.apply(&mut session);
        ClientEvent::SessionUpdate { session }
    }

    fn send_model(&self, event: ClientEvent) -> bool {
        let kind = event.kind();
        let Some(model) = &self.model else {
            debug!(session = %self.key, event = kind, "No model leg, dropping event");
            return false;
        };
        match model.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %self.key, event = kind, "Dropping model event: {}", e);
                false
            }
        }
    }

    fn request_response(&self, response: Option<ResponseConfig>) {
        self.send_model(ClientEvent::ResponseCreate { response });
    }

    fn model_open(&self) -> bool {
        self.model.as_ref().is_some_and(|m| m.is_open())
    }

    // =========================================================================
    // Conversation flow
    // =========================================================================

    /// Start the first turn once both legs are up.
    fn maybe_open_conversation(&mut self) {
        if self.conversation_opened || self.session.stream_sid.is_none() || !self.model_open() {
            return;
        }
        self.conversation_opened = true;

        if self.session.phase.is_pending() && self.ctx.assets.prompt.is_some() {
            debug!(session = %self.key, "Model listening for the consent answer");
            return;
        }
        self.timers
            .schedule(self.ctx.settings.greeting_delay, TimerEvent::Greeting);
    }

    fn on_timer(&mut self, event: TimerEvent) -> Flow {
        match event {
            TimerEvent::Greeting => {
                if self.session.phase.is_pending() {
                    // consent instructions are bound; the model asks the question
                    self.request_response(None);
                } else {
                    self.send_model(ClientEvent::ConversationItemCreate {
                        item: ConversationItem::user_text(self.ctx.settings.greeting()),
                    });
                    self.request_response(None);
                }
            }
            TimerEvent::DelayedResponse => {
                self.request_response(Some(ResponseConfig {
                    instructions: Some(self.ctx.settings.greeting().to_string()),
                }));
            }
            TimerEvent::HangUp => {
                info!(session = %self.key, "Hanging up");
                self.telephony.close();
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // =========================================================================
    // Tools
    // =========================================================================

    fn dispatch_tool_call(&mut self, item: ConversationItem) {
        let Some(call_id) = item.call_id else {
            warn!(session = %self.key, "Function call without call_id ignored");
            return;
        };
        if !self.seen_calls.insert(call_id.clone()) {
            debug!(session = %self.key, call_id = %call_id, "Duplicate tool invocation ignored");
            return;
        }
        let name = item.name.unwrap_or_default();

        let phase = self.session.phase();
        let Some(tool) = self.ctx.tools.resolve_in(&name, phase.subset()) else {
            warn!(
                session = %self.key,
                tool = %name,
                phase = %phase,
                "Tool not available in this phase"
            );
            self.finish_tool_call(&call_id, ToolError::NotAvailable(name).to_payload());
            return;
        };

        let args = match parse_arguments(item.arguments.as_deref().unwrap_or_default()) {
            Ok(args) => args,
            Err(e) => {
                warn!(session = %self.key, tool = %name, "Malformed tool arguments: {}", e);
                self.finish_tool_call(&call_id, e.to_payload());
                return;
            }
        };

        info!(session = %self.key, tool = %name, call_id = %call_id, "Invoking tool");
        let handler = tool.handler();
        let ctx = ToolContext {
            session_key: self.key.clone(),
            stream_sid: self.session.stream_sid.clone(),
            call_sid: self.session.call_sid.clone(),
        };
        let timeout = self.ctx.settings.tool_timeout;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = run_tool(handler, args, ctx, timeout).await;
            let completion = ToolCompletion {
                call_id,
                name,
                result,
            };
            if commands
                .send(SessionCommand::ToolCompleted(completion))
                .await
                .is_err()
            {
                debug!("Session ended before tool completed");
            }
        });
    }

    fn on_tool_completed(&mut self, completion: ToolCompletion) {
        let ToolCompletion {
            call_id,
            name,
            result,
        } = completion;

        match result {
            Err(e) => {
                warn!(session = %self.key, tool = %name, call_id = %call_id, "Tool failed: {}", e);
                self.finish_tool_call(&call_id, e.to_payload());
            }
            Ok(ToolOutput { payload, effect }) => match effect {
                Some(ToolEffect::Consent(decision)) => self.resolve_consent(&call_id, &name, decision),
                Some(ToolEffect::EndCall) => {
                    self.finish_tool_call(&call_id, payload);
                    info!(session = %self.key, "Call ending after farewell");
                    self.hangup_pending = true;
                    self.timers
                        .schedule(self.ctx.settings.end_call_grace, TimerEvent::HangUp);
                }
                None => {
                    debug!(session = %self.key, tool = %name, "Tool completed");
                    self.finish_tool_call(&call_id, payload);
                }
            },
        }
    }

    /// Tool output followed by exactly one turn continuation.
    fn finish_tool_call(&self, call_id: &str, payload: Value) {
        self.send_tool_output(call_id, &payload);
        self.request_response(None);
    }

    fn send_tool_output(&self, call_id: &str, payload: &Value) {
        self.send_model(ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_output(call_id, payload.to_string()),
        });
    }

    // =========================================================================
    // Consent
    // =========================================================================

    fn resolve_consent(&mut self, call_id: &str, name: &str, requested: ConsentDecision) {
        let resolution = self.session.phase.resolve(requested);
        info!(
            session = %self.key,
            requested = requested.as_str(),
            ?resolution,
            "Consent request resolved"
        );

        match resolution {
            Resolution::Affirmed => self.on_consent_affirmed(call_id),
            Resolution::Denied => self.on_consent_denied(),
            Resolution::Clarify { downgraded } => {
                let payload = json!({
                    "decision": ConsentDecision::Clarify.as_str(),
                    "downgraded": downgraded,
                    "instruction": CLARIFY_INSTRUCTION,
                });
                self.finish_tool_call(call_id, payload);
            }
            Resolution::AlreadyResolved => {
                self.finish_tool_call(
                    call_id,
                    ToolError::NotAvailable(name.to_string()).to_payload(),
                );
            }
        }
        self.publish_status();
    }

    fn on_consent_affirmed(&mut self, call_id: &str) {
        let update = self.session_update();
        self.send_model(update);

        if self.ctx.settings.recording.is_some() {
            self.session.recorder.arm();
        }

        self.send_tool_output(
            call_id,
            &json!({ "decision": ConsentDecision::Affirm.as_str(), "status": "ok" }),
        );
        if self.ctx.settings.greet_after_consent {
            self.timers
                .schedule(self.ctx.settings.greeting_delay, TimerEvent::DelayedResponse);
        } else {
            self.request_response(None);
        }
    }

    fn on_consent_denied(&mut self) {
        self.denied = true;
        if let Some(model) = self.model.take() {
            model.close();
            info!(session = %self.key, "Model leg closed after consent was denied");
        }
        self.timers.cancel_all();
        self.clear_caller_buffer();

        let playback = match (&self.ctx.assets.denial, self.session.stream_sid.clone()) {
            (Some(asset), Some(stream_sid)) => {
                self.timers
                    .stream_frames(asset.frames(), self.telephony.clone(), stream_sid)
            }
            (None, _) => {
                warn!(session = %self.key, "No denial audio loaded, hanging up after margin");
                Duration::ZERO
            }
            (Some(_), None) => Duration::ZERO,
        };

        self.hangup_pending = true;
        self.timers
            .schedule(playback + DENIAL_HANGUP_MARGIN, TimerEvent::HangUp);
    }

    // =========================================================================
    // Observer leg
    // =========================================================================

    fn on_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::AttachObserver(tx) => {
                if self.observer.replace(tx).is_some() {
                    info!(session = %self.key, "Observer replaced");
                } else {
                    info!(session = %self.key, "Observer attached");
                }
                self.publish_status();
            }
            SessionCommand::DetachObserver => {
                if self.observer.as_ref().is_some_and(|o| o.is_closed()) {
                    self.observer = None;
                    info!(session = %self.key, "Observer detached");
                    self.publish_status();
                }
            }
            SessionCommand::ObserverMessage(text) => self.on_observer_message(&text),
            SessionCommand::ToolCompleted(completion) => self.on_tool_completed(completion),
            SessionCommand::Timer(event) => return self.on_timer(event),
            SessionCommand::ModelConnected(result) => self.on_model_connected(result),
        }
        Flow::Continue
    }

    fn mirror_to_observer(&mut self, raw: &str) {
        let Some(observer) = &self.observer else {
            return;
        };
        match observer.try_send(raw.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(session = %self.key, "Observer lagging, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                self.observer = None;
                info!(session = %self.key, "Observer detached");
                self.publish_status();
            }
        }
    }

    /// Merge session overrides sent by the observer.
    ///
    /// Accepts `{"type": "session.update", "session": {...}}` or a bare
    /// object of session fields.
    fn on_observer_message(&mut self, text: &str) {
        let fields = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(mut obj)) => match obj.remove("session") {
                Some(Value::Object(session)) => session,
                _ => obj,
            },
            Ok(_) => {
                debug!(session = %self.key, "Observer message is not an object, ignoring");
                return;
            }
            Err(e) => {
                debug!(session = %self.key, "Malformed observer message: {}", e);
                return;
            }
        };

        let refused = self.session.overrides.merge(fields, self.session.phase());
        if !refused.is_empty() {
            info!(session = %self.key, ?refused, "Observer override fields refused");
        }
        if self.model_open() {
            let update = self.session_update();
            self.send_model(update);
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn publish_status(&self) {
        self.handle.publish(SessionStatus {
            stream_sid: self.session.stream_sid.clone(),
            call_sid: self.session.call_sid.clone(),
            phase: self.session.phase(),
            model_connected: self.model_open(),
            observer_attached: self.observer.is_some(),
            marks_pending: self.session.marks.len(),
        });
    }

    async fn shutdown(mut self) {
        self.timers.cancel_all();
        if let Some(model) = self.model.take() {
            model.close();
        }
        self.telephony.close();
        self.observer = None;
        self.ctx.registry.release(&self.key, &self.handle);

        if let Some(settings) = self.ctx.settings.recording.clone() {
            let recorder = std::mem::take(&mut self.session.recorder);
            let stream_id = self
                .session
                .stream_sid
                .clone()
                .unwrap_or_else(|| self.key.clone());
            match tokio::task::spawn_blocking(move || recorder.persist(&stream_id, &settings))
                .await
            {
                Ok(Ok(paths)) if !paths.is_empty() => {
                    info!(session = %self.key, files = ?paths, "Call recording saved");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(session = %self.key, "Failed to save call recording: {}", e),
                Err(e) => error!(session = %self.key, "Recording task failed: {}", e),
            }
        }

        info!(session = %self.key, "Session ended");
    }
}

async fn next_model_frame(model: &mut Option<ModelLeg>) -> Option<ModelFrame> {
    match model {
        Some(leg) => leg.recv().await,
        None => std::future::pending().await,
    }
}
