//! Subscription Types and Data Structures

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::transport::{Publication, SubscriptionState, TransportSubscription};

/// Buffered publications per channel before slow receivers start lagging
pub(crate) const PUBLICATION_BUFFER: usize = 256;

/// Per-subscription behaviour requested from the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOptions {
    /// Resume delivery from the last seen position after a gap
    #[serde(default = "default_true")]
    pub recoverable: bool,
    /// Track stream position (offset) for each publication
    #[serde(default)]
    pub positioned: bool,
    /// Deliver join/leave presence events
    #[serde(default)]
    pub join_leave: bool,
    /// Lower bound for the transport's own resubscribe backoff (ms)
    #[serde(default = "default_min_resubscribe_delay_ms")]
    pub min_resubscribe_delay_ms: u64,
    /// Upper bound for the transport's own resubscribe backoff (ms)
    #[serde(default = "default_max_resubscribe_delay_ms")]
    pub max_resubscribe_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_min_resubscribe_delay_ms() -> u64 {
    500
}

fn default_max_resubscribe_delay_ms() -> u64 {
    20_000
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            recoverable: true,
            positioned: false,
            join_leave: false,
            min_resubscribe_delay_ms: default_min_resubscribe_delay_ms(),
            max_resubscribe_delay_ms: default_max_resubscribe_delay_ms(),
        }
    }
}

impl SubscriptionOptions {
    pub fn positioned(mut self, positioned: bool) -> Self {
        self.positioned = positioned;
        self
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn join_leave(mut self, join_leave: bool) -> Self {
        self.join_leave = join_leave;
        self
    }

    pub fn resubscribe_delay(mut self, min: Duration, max: Duration) -> Self {
        self.min_resubscribe_delay_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
        self.max_resubscribe_delay_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// One tracked channel subscription
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub channel: String,
    pub handle: Arc<dyn TransportSubscription>,
    pub token: Option<String>,
    pub options: SubscriptionOptions,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub active: bool,
    /// Whether the entry should be resubscribed when the connection comes back
    pub(crate) restore_on_reconnect: bool,
    pub(crate) publications: broadcast::Sender<Publication>,
}

impl SubscriptionEntry {
    pub fn new(
        channel: impl Into<String>,
        handle: Arc<dyn TransportSubscription>,
        token: Option<String>,
        options: SubscriptionOptions,
    ) -> Self {
        let (publications, _) = broadcast::channel(PUBLICATION_BUFFER);
        Self {
            channel: channel.into(),
            handle,
            token,
            options,
            created_at: Utc::now(),
            last_activity: None,
            active: true,
            restore_on_reconnect: true,
            publications,
        }
    }

    /// Transport-reported state of the underlying handle
    pub fn transport_state(&self) -> SubscriptionState {
        self.handle.state()
    }

    /// Registry says active but the transport no longer delivers
    pub fn is_unhealthy(&self) -> bool {
        self.active && self.transport_state() == SubscriptionState::Unsubscribed
    }

    /// Old enough and quiet for the whole window (or never heard from)
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        let old_enough = now - self.created_at > max_age;
        let quiet = match self.last_activity {
            None => true,
            Some(at) => now - at > max_age,
        };
        old_enough && quiet
    }

    pub fn to_info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            channel: self.channel.clone(),
            active: self.active,
            state: self.transport_state(),
            created_at: self.created_at.to_rfc3339(),
            last_activity: self.last_activity.map(|t| t.to_rfc3339()),
            options: self.options.clone(),
            has_token: self.token.is_some(),
        }
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("channel", &self.channel)
            .field("state", &self.handle.state())
            .field("options", &self.options)
            .field("created_at", &self.created_at)
            .field("last_activity", &self.last_activity)
            .field("active", &self.active)
            .finish()
    }
}

/// Snapshot of a subscription for display or IPC
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub channel: String,
    pub active: bool,
    pub state: SubscriptionState,
    pub created_at: String,
    pub last_activity: Option<String>,
    pub options: SubscriptionOptions,
    pub has_token: bool,
}

/// Registry totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
}

/// Result of `close_subscriptions`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Result of `close_all`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseAllReport {
    pub closed_count: usize,
    /// Entries removed locally whose transport unsubscribe failed
    pub error_count: usize,
}

/// Result of restoring subscriptions after a reconnect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub failed: Vec<String>,
}

/// Caller's end of a subscription: receives the channel's publications
pub struct SubscriptionHandle {
    channel: String,
    rx: broadcast::Receiver<Publication>,
}

impl SubscriptionHandle {
    pub(crate) fn new(channel: String, rx: broadcast::Receiver<Publication>) -> Self {
        Self { channel, rx }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next publication. `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Publication> {
        loop {
            match self.rx.recv().await {
                Ok(publication) => return Some(publication),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscription {} receiver lagged, skipped {} publications",
                        self.channel, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<Publication> {
        loop {
            match self.rx.try_recv() {
                Ok(publication) => return Some(publication),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .finish()
    }
}
