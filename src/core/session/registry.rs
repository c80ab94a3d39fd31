use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;

use super::SessionCommand;
use super::phase::Phase;

/// Snapshot of a session, published by its relay task for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub phase: Phase,
    pub model_connected: bool,
    pub observer_attached: bool,
    pub marks_pending: usize,
}

impl SessionStatus {
    pub fn new(phase: Phase) -> Self {
        Self {
            stream_sid: None,
            call_sid: None,
            phase,
            model_connected: false,
            observer_attached: false,
            marks_pending: 0,
        }
    }
}

/// Registry entry: how to reach a session and what it last reported.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: Mutex<SessionStatus>,
    created_at: Instant,
}

impl SessionHandle {
    pub fn new(commands: mpsc::Sender<SessionCommand>, status: SessionStatus) -> Self {
        Self {
            commands,
            status: Mutex::new(status),
            created_at: Instant::now(),
        }
    }

    pub fn commands(&self) -> &mpsc::Sender<SessionCommand> {
        &self.commands
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().clone()
    }

    pub fn publish(&self, status: SessionStatus) {
        *self.status.lock() = status;
    }

    pub fn age_ms(&self) -> u64 {
        self.created_at.elapsed().as_millis() as u64
    }
}

/// One row of the session listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub key: String,
    pub call_id: Option<String>,
    pub phase: Phase,
    pub model_connected: bool,
    pub observer_attached: bool,
    pub marks_pending: usize,
    pub age_ms: u64,
}

/// Table of live sessions.
///
/// A session is registered under a temporary `pending-` key as soon as the
/// telephony leg connects and re-keyed to its stream id once the stream
/// starts. All operations take the table lock, so a lookup either sees the
/// old key or the new one, never both and never neither.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<SessionHandle>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session under a temporary key.
    pub fn create_pending(&self, handle: Arc<SessionHandle>) -> String {
        let key = format!("pending-{}", uuid::Uuid::new_v4());
        self.inner.write().insert(key.clone(), handle);
        tracing::debug!(session = %key, "Session registered");
        key
    }

    /// Re-key a session.
    ///
    /// A missing `old_key` is logged and ignored; the call carries on without
    /// a registry entry. Returns whether the entry moved.
    pub fn migrate(&self, old_key: &str, new_key: &str) -> bool {
        if old_key == new_key {
            return self.inner.read().contains_key(old_key);
        }

        let mut table = self.inner.write();
        let Some(handle) = table.remove(old_key) else {
            tracing::warn!(
                old = %old_key,
                new = %new_key,
                "Cannot migrate session: old key not registered"
            );
            return false;
        };
        if table.insert(new_key.to_string(), handle).is_some() {
            tracing::warn!(session = %new_key, "Replaced an existing session with the same key");
        }
        tracing::info!(old = %old_key, session = %new_key, "Session identity migrated");
        true
    }

    pub fn get(&self, key: &str) -> Option<Arc<SessionHandle>> {
        self.inner.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<SessionHandle>> {
        self.inner.write().remove(key)
    }

    /// Remove `key` only if it still maps to `handle`.
    pub fn release(&self, key: &str, handle: &Arc<SessionHandle>) -> bool {
        let mut table = self.inner.write();
        match table.get(key) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                table.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let table = self.inner.read();
        let mut rows: Vec<SessionSummary> = table
            .iter()
            .map(|(key, handle)| {
                let status = handle.status();
                SessionSummary {
                    key: key.clone(),
                    call_id: status.call_sid,
                    phase: status.phase,
                    model_connected: status.model_connected,
                    observer_attached: status.observer_attached,
                    marks_pending: status.marks_pending,
                    age_ms: handle.age_ms(),
                }
            })
            .collect();
        rows.sort_by(|a, b| b.age_ms.cmp(&a.age_ms).then_with(|| a.key.cmp(&b.key)));
        rows
    }
}
