//! Loopback Transport
//!
//! In-process transport with no network underneath. Lifecycle events are
//! emitted by the test (or demo) driving it, which makes every state machine
//! transition reproducible. Failures can be injected per channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::{
    EventSink, Publication, SessionRequest, SubscriptionRequest, SubscriptionState, Transport,
    TransportEvent, TransportSession, TransportSubscription,
};
use crate::error::{PubSubError, Result};

#[derive(Default)]
struct Shared {
    sessions: Mutex<Vec<Arc<LoopbackSession>>>,
    failing_subscribe: Mutex<HashSet<String>>,
    failing_unsubscribe: Mutex<HashSet<String>>,
    fail_connect: AtomicBool,
    auto_connect: AtomicBool,
}

/// Cloneable handle; clones share sessions and failure injection
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `Connecting` + `Connected` as soon as a session's `connect()` is called
    pub fn with_auto_connect(self) -> Self {
        self.shared.auto_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Most recently created session
    pub fn current_session(&self) -> Option<Arc<LoopbackSession>> {
        self.shared.sessions.lock().last().cloned()
    }

    pub fn sessions_created(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Make every `subscribe()` on `channel` fail until cleared
    pub fn fail_subscribe(&self, channel: &str) {
        self.shared.failing_subscribe.lock().insert(channel.to_string());
    }

    /// Make every `unsubscribe()` on `channel` fail until cleared
    pub fn fail_unsubscribe(&self, channel: &str) {
        self.shared
            .failing_unsubscribe
            .lock()
            .insert(channel.to_string());
    }

    /// Make `connect()` on every session fail until cleared
    pub fn fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn clear_failures(&self) {
        self.shared.failing_subscribe.lock().clear();
        self.shared.failing_unsubscribe.lock().clear();
        self.shared.fail_connect.store(false, Ordering::SeqCst);
    }
}

impl Transport for LoopbackTransport {
    fn create_session(&self, request: SessionRequest, events: EventSink) -> Arc<dyn TransportSession> {
        debug!(
            "Loopback session created for {} (generation {})",
            request.endpoint,
            events.generation()
        );
        let session = Arc::new(LoopbackSession {
            request,
            events,
            shared: Arc::clone(&self.shared),
            subscriptions: Mutex::new(HashMap::new()),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            last_token: Mutex::new(None),
        });
        self.shared.sessions.lock().push(Arc::clone(&session));
        session
    }
}

pub struct LoopbackSession {
    request: SessionRequest,
    events: EventSink,
    shared: Arc<Shared>,
    subscriptions: Mutex<HashMap<String, Arc<LoopbackSubscription>>>,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    last_token: Mutex<Option<String>>,
}

impl LoopbackSession {
    /// Push a raw lifecycle or subscription event to the manager
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.emit(event)
    }

    pub fn publish(&self, channel: &str, payload: impl Into<Bytes>) -> bool {
        self.emit(TransportEvent::Publication(Publication::new(channel, payload)))
    }

    pub fn subscription(&self, channel: &str) -> Option<Arc<LoopbackSubscription>> {
        self.subscriptions.lock().get(channel).cloned()
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Token presented on the last `connect()`
    pub fn last_token(&self) -> Option<String> {
        self.last_token.lock().clone()
    }
}

#[async_trait]
impl TransportSession for LoopbackSession {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(PubSubError::Transport(format!(
                "connection to {} refused",
                self.request.endpoint
            )));
        }

        let token = match (&self.request.token, &self.request.token_provider) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(provider)) => Some(provider.token().await?),
            (None, None) => None,
        };
        *self.last_token.lock() = token;

        self.emit(TransportEvent::Connecting);
        if self.shared.auto_connect.load(Ordering::SeqCst) {
            self.emit(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        for sub in self.subscriptions.lock().values() {
            sub.set_state(SubscriptionState::Unsubscribed);
        }
        self.emit(TransportEvent::Disconnected {
            reason: "client disconnect".to_string(),
        });
        Ok(())
    }

    fn new_subscription(&self, request: SubscriptionRequest) -> Result<Arc<dyn TransportSubscription>> {
        let sub = Arc::new(LoopbackSubscription {
            channel: request.channel.clone(),
            shared: Arc::clone(&self.shared),
            request,
            state: Mutex::new(SubscriptionState::Unsubscribed),
            subscribe_calls: AtomicU32::new(0),
            unsubscribe_calls: AtomicU32::new(0),
            last_token: Mutex::new(None),
        });
        self.subscriptions
            .lock()
            .insert(sub.channel.clone(), Arc::clone(&sub));
        Ok(sub as Arc<dyn TransportSubscription>)
    }
}

pub struct LoopbackSubscription {
    channel: String,
    shared: Arc<Shared>,
    request: SubscriptionRequest,
    state: Mutex<SubscriptionState>,
    subscribe_calls: AtomicU32,
    unsubscribe_calls: AtomicU32,
    last_token: Mutex<Option<String>>,
}

impl LoopbackSubscription {
    /// Override the state the transport reports, e.g. to simulate a silent drop
    pub fn set_state(&self, state: SubscriptionState) {
        *self.state.lock() = state;
    }

    pub fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> u32 {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn request(&self) -> &SubscriptionRequest {
        &self.request
    }

    pub fn last_token(&self) -> Option<String> {
        self.last_token.lock().clone()
    }
}

#[async_trait]
impl TransportSubscription for LoopbackSubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn subscribe(&self) -> Result<()> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.failing_subscribe.lock().contains(&self.channel) {
            self.set_state(SubscriptionState::Unsubscribed);
            return Err(PubSubError::Subscription {
                channel: self.channel.clone(),
                message: "subscribe rejected".to_string(),
            });
        }

        let token = match (&self.request.token, &self.request.token_provider) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(provider)) => Some(provider.token().await?),
            (None, None) => None,
        };
        *self.last_token.lock() = token;

        self.set_state(SubscriptionState::Subscribed);
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.failing_unsubscribe.lock().contains(&self.channel) {
            return Err(PubSubError::Transport(format!(
                "unsubscribe from {} timed out",
                self.channel
            )));
        }
        self.set_state(SubscriptionState::Unsubscribed);
        Ok(())
    }

    fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }
}
