//! Pub/Sub Manager
//!
//! The one object applications hold. It wires a [`ConnectionStateMachine`]
//! and a [`SubscriptionController`] over a caller-supplied [`Transport`] and
//! exposes the public connection and subscription operations.
//!
//! There is no global instance: construct one, `connect()`, and `dispose()`
//! (or drop) it when done.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::connection::{
    ConnectionState, ConnectionStateMachine, HealthReport, ManagerEvent, ScheduledTask,
};
use crate::error::Result;
use crate::network::NetworkSignal;
use crate::subscription::{
    CloseAllReport, CloseReport, SubscriptionController, SubscriptionHandle, SubscriptionInfo,
    SubscriptionOptions, SubscriptionStats,
};
use crate::transport::{TokenProvider, Transport, TransportEvent};

pub struct PubSubManager {
    machine: Arc<ConnectionStateMachine>,
    controller: Arc<SubscriptionController>,
    network_listener: Mutex<Option<ScheduledTask>>,
}

impl PubSubManager {
    pub fn new(transport: Arc<dyn Transport>, config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let controller = Arc::new(SubscriptionController::new(config.subscription.clone()));
        let machine = Arc::new(ConnectionStateMachine::new(
            transport,
            Arc::clone(&controller),
            config.reconnect.clone(),
            &config.health,
        ));

        debug!(
            "PubSubManager created (max_attempts={}, health_interval={}s)",
            config.reconnect.max_attempts, config.health.interval_secs
        );
        Ok(Self {
            machine,
            controller,
            network_listener: Mutex::new(None),
        })
    }

    /// Like [`PubSubManager::new`], and also listen for network restoration.
    /// Must be called from within a tokio runtime.
    pub fn with_network_signal(
        transport: Arc<dyn Transport>,
        config: ManagerConfig,
        mut signal: NetworkSignal,
    ) -> Result<Self> {
        let manager = Self::new(transport, config)?;

        let weak = Arc::downgrade(&manager.machine);
        let listener = ScheduledTask::spawn("network-listener", async move {
            while let Some(online) = signal.changed().await {
                let Some(machine) = weak.upgrade() else {
                    break;
                };
                machine.on_network_status(online).await;
            }
            debug!("Network signal closed");
        });
        *manager.network_listener.lock() = Some(listener);

        Ok(manager)
    }

    // ===== Connection =====

    pub async fn connect(
        &self,
        endpoint: &str,
        token: Option<String>,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<()> {
        self.machine.connect(endpoint, token, token_provider).await
    }

    pub async fn disconnect(&self) {
        self.machine.disconnect().await
    }

    pub async fn force_reconnect(&self) -> Result<()> {
        self.machine.force_reconnect().await
    }

    /// Report a connectivity change for hosts without a [`NetworkSignal`]
    pub async fn network_status_changed(&self, online: bool) {
        info!("Network status changed: online={}", online);
        self.machine.on_network_status(online).await
    }

    /// Feed one event straight into the state machine, bypassing the
    /// session's event channel
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        self.machine.handle_transport_event(event).await
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.machine.watch_state()
    }

    pub fn events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.machine.events()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.machine.reconnect_attempts()
    }

    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.machine.pending_reconnect_delay()
    }

    // ===== Subscriptions =====

    pub async fn create_subscription(
        &self,
        channel: &str,
        token: Option<String>,
        options: Option<SubscriptionOptions>,
    ) -> Result<SubscriptionHandle> {
        self.controller
            .create_subscription(channel, token, options)
            .await
    }

    pub async fn close_subscription(&self, channel: &str) -> Result<bool> {
        self.controller.close_subscription(channel).await
    }

    pub async fn close_subscriptions<I, S>(&self, channels: I) -> Result<CloseReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.controller.close_subscriptions(channels).await
    }

    pub async fn close_all(&self) -> Result<CloseAllReport> {
        self.controller.close_all().await
    }

    pub async fn resubscribe(&self, channel: &str) -> Result<bool> {
        self.controller.resubscribe(channel).await
    }

    pub async fn cleanup_inactive(&self, max_age: Duration) -> Result<Vec<String>> {
        self.controller.cleanup_inactive(max_age).await
    }

    pub fn get_subscription_info(&self, channel: &str) -> Option<SubscriptionInfo> {
        self.controller.get_info(channel)
    }

    pub fn get_all_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.controller.all_info()
    }

    pub fn has_subscription(&self, channel: &str) -> bool {
        self.controller.has_subscription(channel)
    }

    pub fn is_subscription_active(&self, channel: &str) -> bool {
        self.controller.is_subscription_active(channel)
    }

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.controller.stats()
    }

    // ===== Health =====

    pub fn last_health_report(&self) -> Option<HealthReport> {
        self.machine.health().last_report()
    }

    pub fn check_health_now(&self) -> HealthReport {
        self.machine.check_health_now()
    }

    /// Disconnect and stop listening for network changes
    pub async fn dispose(&self) {
        self.machine.disconnect().await;
        if let Some(listener) = self.network_listener.lock().take() {
            listener.cancel();
        }
        info!("PubSubManager disposed");
    }
}

impl Drop for PubSubManager {
    fn drop(&mut self) {
        self.machine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PubSubError;
    use crate::network::NetworkMonitor;
    use crate::transport::LoopbackTransport;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = ManagerConfig::default();
        config.reconnect.base_delay_ms = 0;
        let result = PubSubManager::new(Arc::new(LoopbackTransport::new()), config);
        assert!(matches!(result, Err(PubSubError::Config(_))));
    }

    #[tokio::test]
    async fn test_subscription_ops_need_connection() {
        let manager =
            PubSubManager::new(Arc::new(LoopbackTransport::new()), ManagerConfig::default())
                .unwrap();
        assert!(matches!(
            manager.create_subscription("room-1", None, None).await,
            Err(PubSubError::NotConnected)
        ));
        assert!(matches!(
            manager.cleanup_inactive(Duration::from_secs(60)).await,
            Err(PubSubError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_signal_triggers_reconnect() {
        let transport = LoopbackTransport::new();
        let monitor = NetworkMonitor::new(true);
        let manager = PubSubManager::with_network_signal(
            Arc::new(transport.clone()),
            ManagerConfig::default(),
            monitor.signal(),
        )
        .unwrap();

        transport.fail_connect(true);
        manager.connect("loopback://rt", None, None).await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Error);
        let session = transport.current_session().unwrap();
        assert_eq!(session.connect_calls(), 1);

        transport.fail_connect(false);
        monitor.set_network_status(false);
        monitor.set_network_status(true);
        settle().await;
        assert_eq!(session.connect_calls(), 2);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.pending_reconnect_delay().is_none());

        manager.dispose().await;
        monitor.set_network_status(false);
        monitor.set_network_status(true);
        settle().await;
        assert_eq!(session.connect_calls(), 2);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
