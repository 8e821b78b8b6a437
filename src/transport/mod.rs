//! Transport Boundary
//!
//! The real-time backend is an external collaborator. This module defines the
//! seams the manager drives it through:
//!
//! ```text
//! Transport ──create_session──▶ TransportSession ──new_subscription──▶ TransportSubscription
//!                                    │                                      │
//!                                    └──────────── EventSink ◀──────────────┘
//!                                                     │
//!                                         ConnectionStateMachine::dispatch
//! ```
//!
//! Every lifecycle and subscription event flows through the single
//! [`EventSink`] handed to the session at creation time, so the state machine
//! sees one ordered stream per session.

pub mod loopback;
mod token;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::subscription::SubscriptionOptions;

pub use loopback::{LoopbackSession, LoopbackSubscription, LoopbackTransport};
pub use token::{StaticTokenProvider, TokenProvider};

/// Transport-level state of a single subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Inbound message on a channel. The payload is opaque to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub channel: String,
    pub payload: Bytes,
    /// Stream position, present on positioned channels
    pub offset: Option<u64>,
}

impl Publication {
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            offset: None,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Everything a transport session can report
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected { reason: String },
    Error { cause: String },
    Publication(Publication),
    Unsubscribed { channel: String },
    SubscriptionError { channel: String, cause: String },
}

impl TransportEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Connecting => "connecting",
            TransportEvent::Connected => "connected",
            TransportEvent::Disconnected { .. } => "disconnected",
            TransportEvent::Error { .. } => "error",
            TransportEvent::Publication(_) => "publication",
            TransportEvent::Unsubscribed { .. } => "unsubscribed",
            TransportEvent::SubscriptionError { .. } => "subscription_error",
        }
    }
}

/// Sender half handed to a session. Events are tagged with the generation of
/// the session that produced them.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { generation, tx }, rx)
    }

    /// Deliver an event. Returns false once the manager stopped listening.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Parameters for opening a session
#[derive(Clone)]
pub struct SessionRequest {
    pub endpoint: String,
    pub token: Option<String>,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequest")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_provider", &self.token_provider.is_some())
            .finish()
    }
}

/// Parameters for creating a subscription on a live session
#[derive(Clone)]
pub struct SubscriptionRequest {
    pub channel: String,
    pub token: Option<String>,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
    pub options: SubscriptionOptions,
}

impl fmt::Debug for SubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRequest")
            .field("channel", &self.channel)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_provider", &self.token_provider.is_some())
            .field("options", &self.options)
            .finish()
    }
}

/// Factory for transport sessions
pub trait Transport: Send + Sync {
    fn create_session(&self, request: SessionRequest, events: EventSink) -> Arc<dyn TransportSession>;
}

/// A live connection to the pub/sub backend.
///
/// `connect()` starts connecting and returns; completion is reported as a
/// `Connected` or `Error` event through the session's [`EventSink`].
#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn new_subscription(&self, request: SubscriptionRequest) -> Result<Arc<dyn TransportSubscription>>;
}

/// Transport handle for one channel subscription
#[async_trait]
pub trait TransportSubscription: Send + Sync {
    fn channel(&self) -> &str;

    async fn subscribe(&self) -> Result<()>;

    async fn unsubscribe(&self) -> Result<()>;

    fn state(&self) -> SubscriptionState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_sink_tags_generation() {
        let (sink, mut rx) = EventSink::channel(7);
        assert!(sink.emit(TransportEvent::Connected));

        let (generation, event) = rx.recv().await.unwrap();
        assert_eq!(generation, 7);
        assert_eq!(event.name(), "connected");

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(TransportEvent::Connecting));
    }

    #[test]
    fn test_request_debug_redacts_token() {
        let request = SessionRequest {
            endpoint: "wss://rt.example.com/connection".into(),
            token: Some("secret".into()),
            token_provider: None,
        };
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
