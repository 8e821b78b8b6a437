//! Network Availability Signal
//!
//! The host application knows when connectivity comes and goes; it reports
//! that through a [`NetworkMonitor`]. Managers listen on a [`NetworkSignal`]
//! and retry immediately when the network returns instead of waiting out the
//! backoff window.

use tokio::sync::watch;
use tracing::info;

/// Host side: publish online/offline transitions
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Record the current status. Repeating the same status notifies nobody.
    pub fn set_network_status(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("Network status changed: online={}", online);
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> NetworkSignal {
        NetworkSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Listener side, one per manager
#[derive(Debug, Clone)]
pub struct NetworkSignal {
    rx: watch::Receiver<bool>,
}

impl NetworkSignal {
    /// Wait for the next transition. `None` once the monitor is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }
}
