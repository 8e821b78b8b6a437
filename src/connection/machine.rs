//! Connection State Machine
//!
//! Owns the transport session and drives it through
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──connected──▶ Connected
//!      ▲                          │                        │
//!      │                          └──────disconnected──────┤
//!      │                                                   ▼
//!      └────────── reconnect timer (backoff) ◀──────── Disconnected
//! ```
//!
//! Every event a session reports arrives on one channel and is dispatched by
//! a pump task through [`ConnectionStateMachine::handle_transport_event`], so
//! transitions are applied in delivery order. Each session gets a new
//! generation number; events, timers and connect failures from an older
//! generation are dropped.
//!
//! The machine never touches registry entries directly. It asks the
//! [`SubscriptionController`] to suspend, restore or close them.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::events::ManagerEvent;
use super::health::{HealthMonitor, HealthReport};
use super::state::ConnectionState;
use super::task::ScheduledTask;
use crate::config::{HealthConfig, ReconnectConfig};
use crate::error::{PubSubError, Result};
use crate::subscription::SubscriptionController;
use crate::transport::{
    EventSink, SessionRequest, TokenProvider, Transport, TransportEvent, TransportSession,
};

const EVENT_BUFFER: usize = 64;

/// What `connect()` was called with; reused by `force_reconnect()`
#[derive(Clone)]
pub(crate) struct ConnectParams {
    endpoint: String,
    token: Option<String>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_provider", &self.token_provider.is_some())
            .finish()
    }
}

struct ActiveSession {
    session: Arc<dyn TransportSession>,
    params: ConnectParams,
    generation: u64,
    _pump: ScheduledTask,
}

struct ReconnectTimer {
    id: u64,
    delay: Duration,
    task: ScheduledTask,
}

pub struct ConnectionStateMachine {
    transport: Arc<dyn Transport>,
    controller: Arc<SubscriptionController>,
    config: ReconnectConfig,
    backoff: BackoffPolicy,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ManagerEvent>,
    session: Mutex<Option<ActiveSession>>,
    attempts: AtomicU32,
    generation: AtomicU64,
    next_timer_id: AtomicU64,
    reconnect_timer: Mutex<Option<ReconnectTimer>>,
    health: HealthMonitor,
}

impl ConnectionStateMachine {
    pub fn new(
        transport: Arc<dyn Transport>,
        controller: Arc<SubscriptionController>,
        reconnect: ReconnectConfig,
        health: &HealthConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            transport,
            controller,
            backoff: reconnect.backoff(),
            config: reconnect,
            state_tx,
            events_tx,
            session: Mutex::new(None),
            attempts: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            next_timer_id: AtomicU64::new(0),
            reconnect_timer: Mutex::new(None),
            health: HealthMonitor::new(health),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events_tx.subscribe()
    }

    pub fn controller(&self) -> &Arc<SubscriptionController> {
        &self.controller
    }

    /// Automatic attempts since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Delay of the currently armed reconnect timer, if any
    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.reconnect_timer
            .lock()
            .as_ref()
            .filter(|timer| !timer.task.is_finished())
            .map(|timer| timer.delay)
    }

    pub fn endpoint(&self) -> Option<String> {
        self.session
            .lock()
            .as_ref()
            .map(|active| active.params.endpoint.clone())
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn check_health_now(&self) -> HealthReport {
        self.health.check_now(&self.controller)
    }

    fn set_state(&self, to: ConnectionState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            info!("Connection state: {} -> {}", from, to);
            let _ = self.events_tx.send(ManagerEvent::StateChanged { from, to });
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Replace any existing session with a new one and start opening it.
    ///
    /// Returns once the session is wired up; the outcome is observed through
    /// the state.
    pub async fn connect(
        self: &Arc<Self>,
        endpoint: &str,
        token: Option<String>,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<()> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(PubSubError::InvalidEndpoint(endpoint.to_string()));
        }

        self.disconnect().await;
        self.attempts.store(0, Ordering::SeqCst);

        self.start_session(ConnectParams {
            endpoint: endpoint.to_string(),
            token,
            token_provider,
        })
        .await;
        Ok(())
    }

    async fn start_session(self: &Arc<Self>, params: ConnectParams) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (sink, mut rx) = EventSink::channel(generation);
        let session = self.transport.create_session(
            SessionRequest {
                endpoint: params.endpoint.clone(),
                token: params.token.clone(),
                token_provider: params.token_provider.clone(),
            },
            sink,
        );

        let weak = Arc::downgrade(self);
        let pump = ScheduledTask::spawn("event-pump", async move {
            while let Some((generation, event)) = rx.recv().await {
                let Some(machine) = weak.upgrade() else {
                    break;
                };
                machine.dispatch(generation, event).await;
            }
        });

        info!("Connecting to {} (generation {})", params.endpoint, generation);
        self.controller
            .bind_session(Arc::clone(&session), params.token_provider.clone());
        *self.session.lock() = Some(ActiveSession {
            session: Arc::clone(&session),
            params,
            generation,
            _pump: pump,
        });

        self.set_state(ConnectionState::Connecting);
        self.open_session(session, generation).await;
    }

    async fn open_session(self: &Arc<Self>, session: Arc<dyn TransportSession>, generation: u64) {
        if let Err(e) = session.connect().await {
            if !self.is_current(generation) {
                debug!("Ignoring connect failure from generation {}", generation);
                return;
            }
            warn!("Transport connect failed: {}", e);
            self.health.stop();
            self.set_state(ConnectionState::Error);
            self.schedule_reconnect(generation);
        }
    }

    async fn dispatch(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        if !self.is_current(generation) {
            debug!(
                "Dropping {} event from stale generation {}",
                event.name(),
                generation
            );
            return;
        }
        self.handle_transport_event(event).await;
    }

    /// Apply one transport event to the machine
    pub async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        debug!("Transport event: {}", event.name());
        match event {
            TransportEvent::Connecting => {
                self.health.stop();
                self.set_state(ConnectionState::Connecting);
            }
            TransportEvent::Connected => self.on_connected().await,
            TransportEvent::Disconnected { reason } => self.on_disconnected(&reason),
            TransportEvent::Error { cause } => {
                warn!("Transport error: {}", cause);
                self.health.stop();
                self.set_state(ConnectionState::Error);
            }
            TransportEvent::Publication(publication) => {
                self.controller.on_publication(publication);
            }
            TransportEvent::Unsubscribed { channel } => {
                self.controller.on_unsubscribed(&channel);
            }
            TransportEvent::SubscriptionError { channel, cause } => {
                self.controller.on_subscription_error(&channel, &cause);
            }
        }
    }

    async fn on_connected(self: &Arc<Self>) {
        if self.state().is_connected() {
            debug!("Already connected, ignoring duplicate connected event");
            return;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.cancel_reconnect_timer();
        self.attempts.store(0, Ordering::SeqCst);

        // Restoration finishes before Connected is observable
        let report = self.controller.restore_all_on_reconnect().await;
        if !self.is_current(generation) {
            debug!("Session replaced during restoration, not publishing connected");
            return;
        }
        let _ = self.events_tx.send(ManagerEvent::SubscriptionsRestored {
            restored: report.restored,
            failed: report.failed,
        });

        self.set_state(ConnectionState::Connected);
        self.health
            .start(Arc::clone(&self.controller), self.events_tx.clone());
    }

    fn on_disconnected(self: &Arc<Self>, reason: &str) {
        if self.state() == ConnectionState::Disconnected {
            debug!("Already disconnected, ignoring disconnected event ({})", reason);
            return;
        }

        info!("Transport disconnected: {}", reason);
        self.health.stop();
        let suspended = self.controller.suspend_all();
        debug!("Marked {} subscriptions inactive", suspended);

        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect(self.generation.load(Ordering::SeqCst));
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let attempt = self.attempts.load(Ordering::SeqCst);
        if attempt >= self.config.max_attempts {
            self.cancel_reconnect_timer();
            let err = PubSubError::MaxReconnectAttemptsExceeded { attempts: attempt };
            error!("{}, waiting for an explicit connect()", err);
            let _ = self
                .events_tx
                .send(ManagerEvent::ReconnectAttemptsExhausted { attempts: attempt });
            return;
        }

        let delay = self.backoff.delay(attempt);
        let id = self.next_timer_id.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(self);
        let task = ScheduledTask::spawn("reconnect-timer", async move {
            tokio::time::sleep(delay).await;
            if let Some(machine) = weak.upgrade() {
                machine.on_reconnect_timer(id, generation).await;
            }
        });

        info!(
            "Reconnect attempt {}/{} scheduled in {}ms",
            attempt + 1,
            self.config.max_attempts,
            delay.as_millis()
        );
        // Replacing the slot aborts any older timer
        *self.reconnect_timer.lock() = Some(ReconnectTimer { id, delay, task });
        let _ = self.events_tx.send(ManagerEvent::ReconnectScheduled {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
    }

    async fn on_reconnect_timer(self: &Arc<Self>, id: u64, generation: u64) {
        {
            let mut slot = self.reconnect_timer.lock();
            match slot.take() {
                Some(timer) if timer.id == id => timer.task.detach(),
                other => {
                    *slot = other;
                    debug!("Reconnect timer {} superseded", id);
                    return;
                }
            }
        }

        if !self.is_current(generation) {
            debug!("Reconnect timer for stale generation {} ignored", generation);
            return;
        }
        if self.state().is_connected() {
            return;
        }

        let session = self
            .session
            .lock()
            .as_ref()
            .map(|active| Arc::clone(&active.session));
        let Some(session) = session else {
            debug!("Reconnect timer fired with no session");
            return;
        };

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Reconnect attempt {}/{}", attempt, self.config.max_attempts);
        self.set_state(ConnectionState::Connecting);
        self.open_session(session, generation).await;
    }

    fn cancel_reconnect_timer(&self) -> bool {
        let timer = self.reconnect_timer.lock().take();
        match timer {
            Some(timer) => {
                timer.task.cancel();
                true
            }
            None => false,
        }
    }

    /// Tear down the session: cancel timers, close every subscription at the
    /// transport, then close the session. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.cancel_reconnect_timer() {
            debug!("Pending reconnect cancelled by disconnect");
        }
        self.health.stop();

        let active = self.session.lock().take();
        if let Some(active) = active {
            match self.controller.close_all().await {
                Ok(report) if report.error_count > 0 => warn!(
                    "Closed {} subscriptions, {} failed at the transport",
                    report.closed_count, report.error_count
                ),
                Ok(report) => debug!("Closed {} subscriptions", report.closed_count),
                Err(e) => warn!("Failed to close subscriptions: {}", e),
            }
            self.controller.unbind_session();

            if let Err(e) = active.session.disconnect().await {
                warn!("Transport disconnect failed: {}", e);
            }
            info!("Disconnected from {}", active.params.endpoint);
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Disconnect and connect again with the same parameters, bypassing
    /// backoff
    pub async fn force_reconnect(self: &Arc<Self>) -> Result<()> {
        self.cancel_reconnect_timer();
        self.attempts.store(0, Ordering::SeqCst);

        let params = self
            .session
            .lock()
            .as_ref()
            .map(|active| active.params.clone())
            .ok_or(PubSubError::NotConnected)?;

        info!("Forcing reconnect to {}", params.endpoint);
        self.disconnect().await;
        tokio::time::sleep(self.config.force_reconnect_delay()).await;
        self.connect(&params.endpoint, params.token, params.token_provider)
            .await
    }

    /// Network availability changed. Coming back online while not connected
    /// preempts any pending backoff and retries the current session at once.
    pub async fn on_network_status(self: &Arc<Self>, online: bool) {
        if !online {
            debug!("Network offline");
            return;
        }
        if self.state().is_connected() {
            return;
        }

        let current = self
            .session
            .lock()
            .as_ref()
            .map(|active| (Arc::clone(&active.session), active.generation));
        let Some((session, generation)) = current else {
            debug!("Network restored with no session to reconnect");
            return;
        };

        info!("Network restored, reconnecting immediately");
        self.cancel_reconnect_timer();
        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);
        self.open_session(session, generation).await;
    }

    /// Abort every owned task without talking to the transport
    pub(crate) fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_reconnect_timer();
        self.health.stop();
        self.session.lock().take();
        self.controller.unbind_session();
    }
}
