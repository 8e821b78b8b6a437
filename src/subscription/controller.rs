//! Subscription Lifecycle Controller
//!
//! Creates, closes, resubscribes and audits the entries held in the
//! [`SubscriptionRegistry`]. Every operation that talks to the transport
//! needs a live session, bound by the connection state machine; without one
//! it fails with [`PubSubError::NotConnected`].
//!
//! Failures local to one channel are absorbed here and reflected in the
//! registry (entry inactive, or removed on close). Batch operations report
//! tallies instead of aborting on the first failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::registry::SubscriptionRegistry;
use super::types::{
    CloseAllReport, CloseReport, RestoreReport, SubscriptionEntry, SubscriptionHandle,
    SubscriptionInfo, SubscriptionOptions, SubscriptionStats,
};
use crate::error::{PubSubError, Result};
use crate::transport::{
    Publication, SubscriptionRequest, SubscriptionState, TokenProvider, TransportSession,
};

/// Outcome of closing one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseOutcome {
    Closed,
    /// Removed locally; the transport unsubscribe call failed
    ClosedWithTransportError,
    NotFound,
}

struct BoundSession {
    session: Arc<dyn TransportSession>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

pub struct SubscriptionController {
    registry: SubscriptionRegistry,
    session: RwLock<Option<BoundSession>>,
    defaults: SubscriptionOptions,
}

impl Default for SubscriptionController {
    fn default() -> Self {
        Self::new(SubscriptionOptions::default())
    }
}

impl SubscriptionController {
    /// `defaults` apply when `create_subscription` is called without options
    pub fn new(defaults: SubscriptionOptions) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            session: RwLock::new(None),
            defaults,
        }
    }

    pub(crate) fn bind_session(
        &self,
        session: Arc<dyn TransportSession>,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) {
        *self.session.write() = Some(BoundSession {
            session,
            token_provider,
        });
    }

    pub(crate) fn unbind_session(&self) {
        self.session.write().take();
    }

    pub fn has_session(&self) -> bool {
        self.session.read().is_some()
    }

    fn live_session(&self) -> Result<(Arc<dyn TransportSession>, Option<Arc<dyn TokenProvider>>)> {
        self.session
            .read()
            .as_ref()
            .map(|bound| (Arc::clone(&bound.session), bound.token_provider.clone()))
            .ok_or(PubSubError::NotConnected)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Subscribe to `channel` and start tracking it as active.
    ///
    /// Subscribing to a channel that is already tracked replaces the old
    /// subscription and its metadata.
    pub async fn create_subscription(
        &self,
        channel: &str,
        token: Option<String>,
        options: Option<SubscriptionOptions>,
    ) -> Result<SubscriptionHandle> {
        let (session, token_provider) = self.live_session()?;
        if channel.trim().is_empty() {
            return Err(PubSubError::InvalidChannel(channel.to_string()));
        }

        let replacing = self.registry.get(channel);
        if let Some(previous) = &replacing {
            info!("Replacing existing subscription to {}", channel);
            if let Err(e) = previous.handle.unsubscribe().await {
                warn!("Unsubscribe of replaced subscription {} failed: {}", channel, e);
            }
        }

        let options = options.unwrap_or_else(|| self.defaults.clone());
        let subscribed = match session.new_subscription(SubscriptionRequest {
            channel: channel.to_string(),
            token: token.clone(),
            token_provider,
            options: options.clone(),
        }) {
            Ok(handle) => match handle.subscribe().await {
                Ok(()) => Ok(handle),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        let handle = match subscribed {
            Ok(handle) => handle,
            Err(e) => {
                // The old subscription is already gone at the transport
                if replacing.is_some() && self.registry.remove(channel).is_some() {
                    warn!("Replacement subscribe to {} failed, entry dropped: {}", channel, e);
                }
                return Err(e);
            }
        };

        let entry = SubscriptionEntry::new(channel, handle, token, options);
        let rx = entry.publications.subscribe();
        self.registry.add(entry);

        info!("Subscribed to {}", channel);
        Ok(SubscriptionHandle::new(channel.to_string(), rx))
    }

    async fn close_entry(&self, channel: &str) -> CloseOutcome {
        // Local view first: the caller intends this closed either way
        let Some(entry) = self.registry.remove(channel) else {
            return CloseOutcome::NotFound;
        };

        match entry.handle.unsubscribe().await {
            Ok(()) => {
                debug!("Unsubscribed from {}", channel);
                CloseOutcome::Closed
            }
            Err(e) => {
                warn!("Unsubscribe from {} failed (entry removed anyway): {}", channel, e);
                CloseOutcome::ClosedWithTransportError
            }
        }
    }

    /// Returns false only when the channel was not tracked
    pub async fn close_subscription(&self, channel: &str) -> Result<bool> {
        self.live_session()?;
        Ok(self.close_entry(channel).await != CloseOutcome::NotFound)
    }

    pub async fn close_subscriptions<I, S>(&self, channels: I) -> Result<CloseReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.live_session()?;

        let mut report = CloseReport::default();
        for channel in channels {
            let channel = channel.as_ref();
            match self.close_entry(channel).await {
                CloseOutcome::NotFound => report.failed.push(channel.to_string()),
                _ => report.succeeded.push(channel.to_string()),
            }
        }

        if !report.failed.is_empty() {
            warn!(
                "Closed {} subscriptions, {} not found: {:?}",
                report.succeeded.len(),
                report.failed.len(),
                report.failed
            );
        }
        Ok(report)
    }

    pub async fn close_all(&self) -> Result<CloseAllReport> {
        self.live_session()?;

        let mut report = CloseAllReport::default();
        for channel in self.registry.channels() {
            match self.close_entry(&channel).await {
                CloseOutcome::Closed => report.closed_count += 1,
                CloseOutcome::ClosedWithTransportError => {
                    report.closed_count += 1;
                    report.error_count += 1;
                }
                CloseOutcome::NotFound => {}
            }
        }

        info!(
            "Closed all subscriptions: {} closed, {} transport errors",
            report.closed_count, report.error_count
        );
        Ok(report)
    }

    /// Re-issue subscribe for a tracked channel. Returns false when the
    /// channel is unknown or the transport rejected it.
    pub async fn resubscribe(&self, channel: &str) -> Result<bool> {
        self.live_session()?;

        let Some(entry) = self.registry.get(channel) else {
            debug!("Resubscribe skipped: {} is not tracked", channel);
            return Ok(false);
        };

        match entry.handle.subscribe().await {
            Ok(()) => {
                self.registry.set_status(channel, true, true);
                info!("Resubscribed to {}", channel);
                Ok(true)
            }
            Err(e) => {
                self.registry.set_status(channel, false, false);
                warn!("Resubscribe to {} failed: {}", channel, e);
                Ok(false)
            }
        }
    }

    /// Close every entry older than `max_age` with no activity inside that
    /// window. Returns the closed channel names.
    pub async fn cleanup_inactive(&self, max_age: Duration) -> Result<Vec<String>> {
        self.live_session()?;

        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| PubSubError::Config(format!("max age out of range: {}", e)))?;
        let now = Utc::now();

        let stale: Vec<String> = self
            .registry
            .all()
            .into_iter()
            .filter(|entry| entry.is_stale(now, max_age))
            .map(|entry| entry.channel)
            .collect();

        let mut closed = Vec::with_capacity(stale.len());
        for channel in stale {
            if self.close_entry(&channel).await != CloseOutcome::NotFound {
                closed.push(channel);
            }
        }

        if !closed.is_empty() {
            info!("Cleaned up {} inactive subscriptions: {:?}", closed.len(), closed);
        }
        Ok(closed)
    }

    /// Resubscribe every entry that was live before the connection dropped.
    /// One failing channel never stops the others.
    pub(crate) async fn restore_all_on_reconnect(&self) -> RestoreReport {
        let mut report = RestoreReport::default();

        for entry in self.registry.all() {
            if !entry.restore_on_reconnect {
                continue;
            }
            match entry.handle.subscribe().await {
                Ok(()) => {
                    self.registry.set_status(&entry.channel, true, true);
                    report.restored.push(entry.channel);
                }
                Err(e) => {
                    warn!("Failed to restore subscription {}: {}", entry.channel, e);
                    self.registry.set_status(&entry.channel, false, false);
                    report.failed.push(entry.channel);
                }
            }
        }

        info!(
            "Restored {} subscriptions ({} failed)",
            report.restored.len(),
            report.failed.len()
        );
        report
    }

    /// Connection dropped: everything goes inactive until restored
    pub(crate) fn suspend_all(&self) -> usize {
        self.registry.suspend_all()
    }

    pub(crate) fn on_publication(&self, publication: Publication) {
        let Some(entry) = self.registry.get(&publication.channel) else {
            debug!("Publication for untracked channel {} dropped", publication.channel);
            return;
        };
        self.registry.touch(&entry.channel);
        // No receivers is fine; activity is still recorded
        let _ = entry.publications.send(publication);
    }

    pub(crate) fn on_unsubscribed(&self, channel: &str) {
        let Some(entry) = self.registry.get(channel) else {
            return;
        };
        // A replacement handle that is already subscribed is not the one that went away
        if entry.transport_state() != SubscriptionState::Unsubscribed {
            debug!("Ignoring stale unsubscribed event for {}", channel);
            return;
        }
        self.registry.remove(channel);
        info!("Subscription {} unsubscribed by transport, removed", channel);
    }

    pub(crate) fn on_subscription_error(&self, channel: &str, cause: &str) {
        if self.registry.set_status(channel, false, false) {
            warn!("Subscription {} error, marked inactive: {}", channel, cause);
        }
    }

    pub fn get_info(&self, channel: &str) -> Option<SubscriptionInfo> {
        self.registry.get(channel).map(|entry| entry.to_info())
    }

    pub fn all_info(&self) -> Vec<SubscriptionInfo> {
        self.registry.all().iter().map(SubscriptionEntry::to_info).collect()
    }

    pub fn has_subscription(&self, channel: &str) -> bool {
        self.registry.contains(channel)
    }

    pub fn is_subscription_active(&self, channel: &str) -> bool {
        self.registry.get(channel).map(|e| e.active).unwrap_or(false)
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.registry.stats()
    }
}
