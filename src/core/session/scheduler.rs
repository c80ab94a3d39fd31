//! Cancellable delayed work for one session.
//!
//! Every timer and paced stream hangs off a root [`CancellationToken`].
//! Cancelling replaces the root, so anything scheduled afterwards is
//! unaffected while everything scheduled before is stopped.

use std::time::Duration;

use bytes::Bytes;
use base64::prelude::*;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{SessionCommand, TimerEvent};
use crate::core::audio::FRAME_DURATION_MS;
use crate::core::telephony::TelephonySink;

#[derive(Debug)]
pub struct SessionTimers {
    root: CancellationToken,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionTimers {
    pub fn new(commands: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            root: CancellationToken::new(),
            commands,
        }
    }

    /// Deliver `event` to the session after `delay`, unless cancelled first.
    pub fn schedule(&self, delay: Duration, event: TimerEvent) {
        let token = self.root.child_token();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::trace!(?event, "Timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if commands.send(SessionCommand::Timer(event)).await.is_err() {
                        tracing::trace!(?event, "Session gone before timer fired");
                    }
                }
            }
        });
    }

    /// Play pre-rendered frames to the caller, one every 20ms.
    ///
    /// Returns the total playback time.
    pub fn stream_frames(
        &self,
        frames: &[Bytes],
        sink: TelephonySink,
        stream_sid: String,
    ) -> Duration {
        let encoded: Vec<String> = frames.iter().map(|f| BASE64_STANDARD.encode(f)).collect();
        let total = Duration::from_millis(encoded.len() as u64 * FRAME_DURATION_MS);
        if encoded.is_empty() {
            return total;
        }

        let token = self.root.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_DURATION_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let count = encoded.len();

            for payload in encoded {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Paced playback cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        if !sink.send_media(&stream_sid, payload) && sink.is_closed() {
                            return;
                        }
                    }
                }
            }
            tracing::debug!(frames = count, "Paced playback finished");
        });

        total
    }

    /// Stop all pending timers and playback.
    pub fn cancel_all(&mut self) {
        self.root.cancel();
        self.root = CancellationToken::new();
    }
}

impl Drop for SessionTimers {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
