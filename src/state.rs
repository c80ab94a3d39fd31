use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::core::session::{RelayContext, SessionRegistry};
use crate::core::tools::ToolRegistry;

/// Why a telephony upgrade was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Admission limits for telephony connections.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// `None` means unlimited
    pub max_concurrent_calls: Option<usize>,
    pub max_connections_per_ip: u32,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_concurrent_calls: None,
            max_connections_per_ip: 100,
        }
    }
}

/// Application state shared by all handlers.
pub struct AppState {
    /// Everything a new session needs
    pub relay: RelayContext,
    pub limits: ConnectionLimits,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    pub fn new(relay: RelayContext, limits: ConnectionLimits) -> Arc<Self> {
        Arc::new(Self {
            relay,
            limits,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.relay.registry
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.relay.tools
    }

    /// Reserve a telephony connection slot for `ip`.
    ///
    /// The global limit is checked first. A successful call must be paired
    /// with [`AppState::release_connection`].
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let acquired = match self.limits.max_concurrent_calls {
            Some(max) => self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_ok(),
            None => {
                self.ws_connections.fetch_add(1, Ordering::AcqRel);
                true
            }
        };
        if !acquired {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        let mut count = self.ip_connections.entry(ip).or_insert(0);
        if *count >= self.limits.max_connections_per_ip {
            drop(count);
            self.ws_connections.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;
        Ok(())
    }

    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        let empty = match self.ip_connections.get_mut(&ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if empty {
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
        }
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }
}

/// Releases a reserved connection slot when dropped.
///
/// Created when an upgrade is admitted and moved into the socket task, so
/// the slot is returned whether or not the upgrade completes.
pub struct ConnectionSlot {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl ConnectionSlot {
    pub fn new(state: Arc<AppState>, ip: IpAddr) -> Self {
        Self { state, ip }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
        tracing::debug!(ip = %self.ip, "Connection slot released");
    }
}
