//! In-memory legs for driving sessions in tests.
//!
//! `MockConnector` hands out model legs whose far end is a [`ModelPeer`]:
//! tests read what the session sent to the model and inject model events.
//! `CallerLeg` plays the telephony side.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use callbridge_gateway::core::audio::ConsentAssets;
use callbridge_gateway::core::realtime::{
    ClientEvent, ModelConnector, ModelFrame, ModelLeg, RealtimeResult,
};
use callbridge_gateway::core::session::{
    RelayContext, RelaySettings, SessionRegistry, SessionRelay, TelephonyLeg,
};
use callbridge_gateway::core::telephony::{
    OutboundMessage, TelephonyCommand, TelephonyEvent, TelephonySink,
};
use callbridge_gateway::core::tools::builtin::{CurrentTimeTool, EndCallTool};
use callbridge_gateway::core::tools::consent::consent_tools;
use callbridge_gateway::core::tools::ToolRegistry;
use callbridge_gateway::core::realtime::OutputAudioFormat;

const WAIT: Duration = Duration::from_secs(30);

pub struct MockConnector {
    peers: mpsc::UnboundedSender<ModelPeer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ModelPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { peers: tx }), rx)
    }
}

#[async_trait]
impl ModelConnector for MockConnector {
    async fn connect(&self) -> RealtimeResult<ModelLeg> {
        let (events_tx, events_rx) = mpsc::channel(1024);
        let (frames_tx, frames_rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        let _ = self.peers.send(ModelPeer {
            events: events_rx,
            frames: frames_tx,
            cancel: cancel.clone(),
            transcripts: AtomicU32::new(0),
        });
        Ok(ModelLeg::new(events_tx, frames_rx, cancel))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// The model's side of one model leg.
pub struct ModelPeer {
    pub events: mpsc::Receiver<ClientEvent>,
    frames: mpsc::Sender<ModelFrame>,
    pub cancel: CancellationToken,
    transcripts: AtomicU32,
}

impl ModelPeer {
    /// Send a server event to the session.
    pub async fn emit(&self, event: Value) {
        self.frames
            .send(ModelFrame::from_text(&event.to_string()))
            .await
            .expect("session dropped the model leg");
    }

    /// Next event the session sent, skipping audio appends, as JSON.
    pub async fn next(&mut self) -> Value {
        loop {
            let event = tokio::time::timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for a model event")
                .expect("model leg closed");
            if !matches!(event, ClientEvent::InputAudioBufferAppend { .. }) {
                return serde_json::to_value(&event).unwrap();
            }
        }
    }

    /// Next event the session sent, audio appends included.
    pub async fn next_any(&mut self) -> Value {
        let event = tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for a model event")
            .expect("model leg closed");
        serde_json::to_value(&event).unwrap()
    }

    /// Wait for a caller audio append.
    pub async fn expect_append(&mut self) {
        let event = self.next_any().await;
        assert_eq!(event["type"], "input_audio_buffer.append", "got {event}");
    }

    /// Everything already queued, skipping audio appends.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if !matches!(event, ClientEvent::InputAudioBufferAppend { .. }) {
                out.push(serde_json::to_value(&event).unwrap());
            }
        }
        out
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Transcript of a fresh caller item.
    pub async fn transcript(&self, text: &str) {
        let n = self.transcripts.fetch_add(1, Ordering::Relaxed);
        self.transcript_for(&format!("item_user_{n}"), text).await;
    }

    pub async fn transcript_for(&self, item_id: &str, text: &str) {
        self.emit(json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": item_id,
            "transcript": text,
        }))
        .await;
    }

    pub async fn speech_stopped(&self, item_id: &str) {
        self.emit(json!({
            "type": "input_audio_buffer.speech_stopped",
            "audio_end_ms": 0,
            "item_id": item_id,
        }))
        .await;
    }

    pub async fn call_tool(&self, call_id: &str, name: &str, arguments: &str) {
        self.emit(json!({
            "type": "response.output_item.done",
            "item": {
                "type": "function_call",
                "call_id": call_id,
                "name": name,
                "arguments": arguments,
            }
        }))
        .await;
    }

    pub async fn audio(&self, item_id: &str, bytes: usize) {
        self.emit(json!({
            "type": "response.audio.delta",
            "item_id": item_id,
            "delta": BASE64_STANDARD.encode(vec![0x55u8; bytes]),
        }))
        .await;
    }

    pub async fn speech_started(&self) {
        self.emit(json!({ "type": "input_audio_buffer.speech_started", "audio_start_ms": 0 }))
            .await;
    }
}

/// The telephony side of one session.
pub struct CallerLeg {
    pub events: mpsc::Sender<TelephonyEvent>,
    pub commands: mpsc::Receiver<TelephonyCommand>,
    pub task: JoinHandle<()>,
}

impl CallerLeg {
    pub fn connect(ctx: RelayContext) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(4096);
        let task = SessionRelay::spawn(
            ctx,
            TelephonyLeg {
                inbound: event_rx,
                outbound: TelephonySink::new(command_tx),
            },
        );
        Self {
            events: event_tx,
            commands: command_rx,
            task,
        }
    }

    pub async fn send(&self, event: Value) {
        let event = TelephonyEvent::parse(&event.to_string()).unwrap();
        self.events.send(event).await.expect("session ended");
    }

    pub async fn start(&self, stream_sid: &str) {
        self.send(json!({
            "event": "start",
            "start": { "streamSid": stream_sid, "callSid": format!("CA-{stream_sid}") }
        }))
        .await;
    }

    pub async fn media(&self, timestamp: u64, fill: u8) {
        self.send(json!({
            "event": "media",
            "media": {
                "timestamp": timestamp.to_string(),
                "payload": BASE64_STANDARD.encode([fill; 160]),
            }
        }))
        .await;
    }

    pub async fn next(&mut self) -> TelephonyCommand {
        tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .expect("timed out waiting for a telephony frame")
            .expect("telephony leg closed")
    }

    /// Next frame that is not media or mark.
    pub async fn next_control(&mut self) -> TelephonyCommand {
        loop {
            match self.next().await {
                TelephonyCommand::Frame(OutboundMessage::Media { .. })
                | TelephonyCommand::Frame(OutboundMessage::Mark { .. }) => continue,
                other => return other,
            }
        }
    }

    pub fn drain(&mut self) -> Vec<TelephonyCommand> {
        let mut out = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            out.push(command);
        }
        out
    }
}

pub fn settings(consent_enabled: bool) -> RelaySettings {
    RelaySettings {
        consent_enabled,
        consent_instructions: "Ask whether the caller agrees to recording.".to_string(),
        greet_after_consent: false,
        base_instructions: "You are a helpful phone agent.".to_string(),
        greeting_text: None,
        greeting_delay: Duration::from_millis(500),
        end_call_grace: Duration::from_millis(4000),
        voice: "alloy".to_string(),
        transcription_model: "whisper-1".to_string(),
        output_audio_format: OutputAudioFormat::G711Ulaw,
        truncation_min_elapsed_ms: 100,
        truncation_overrun_slack_ms: 200,
        tool_timeout: Duration::from_secs(5),
        recording: None,
    }
}

pub fn standard_tools() -> ToolRegistry {
    let mut builder = ToolRegistry::builder();
    for (spec, tool) in consent_tools() {
        builder = builder.register(spec, tool).unwrap();
    }
    builder
        .register(EndCallTool::spec(), EndCallTool)
        .unwrap()
        .register(CurrentTimeTool::spec(), CurrentTimeTool)
        .unwrap()
        .build()
}

pub fn context(
    settings: RelaySettings,
    tools: ToolRegistry,
    assets: ConsentAssets,
    connector: Arc<MockConnector>,
) -> RelayContext {
    RelayContext {
        settings: Arc::new(settings),
        registry: SessionRegistry::new(),
        tools: Arc::new(tools),
        connector,
        assets: Arc::new(assets),
    }
}

/// Names of the tools bound by a `session.update` event.
pub fn bound_tools(update: &Value) -> Vec<String> {
    let mut names: Vec<String> = update["session"]["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| t["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Parsed `output` of a `function_call_output` item.
pub fn tool_output(event: &Value) -> Value {
    assert_eq!(event["type"], "conversation.item.create", "got {event}");
    assert_eq!(event["item"]["type"], "function_call_output", "got {event}");
    serde_json::from_str(event["item"]["output"].as_str().unwrap()).unwrap()
}

/// Let spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
