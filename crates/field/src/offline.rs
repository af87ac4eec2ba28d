//! Connectivity state shared between the host environment and the sync worker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// Connectivity state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Network reachable.
    Online,
    /// No network (airplane mode, no signal, remote unreachable).
    Offline,
}

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("device is offline; operation requires network connection")]
    Offline,
}

/// Observable connectivity flag.
///
/// The host (OS network callbacks, a UI toggle, failed pings) calls
/// [`Connectivity::set_online`] / [`Connectivity::set_offline`]; the sync
/// worker subscribes and reacts to offline -> online transitions.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<ConnectivityState>>,
}

impl Connectivity {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    pub fn is_offline(&self) -> bool {
        self.state() == ConnectivityState::Offline
    }

    /// Mark the device as online. Wakes subscribers only on an actual change.
    pub fn set_online(&self) {
        self.set(ConnectivityState::Online);
    }

    /// Mark the device as offline.
    pub fn set_offline(&self) {
        self.set(ConnectivityState::Offline);
    }

    fn set(&self, next: ConnectivityState) {
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::info!(from = ?*current, to = ?next, "connectivity changed");
            *current = next;
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    /// Ensure the device is online; return error if offline.
    pub fn require_online(&self) -> Result<(), OfflineError> {
        if self.is_offline() {
            Err(OfflineError::Offline)
        } else {
            Ok(())
        }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_changes_only() {
        let connectivity = Connectivity::new(ConnectivityState::Offline);
        let mut rx = connectivity.subscribe();
        assert!(connectivity.require_online().is_err());

        connectivity.set_offline();
        assert!(!rx.has_changed().unwrap());

        connectivity.set_online();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectivityState::Online);
        assert!(connectivity.require_online().is_ok());
    }
}
