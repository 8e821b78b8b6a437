//! OxideSub - resilient pub/sub connection and subscription manager
//!
//! Keeps one real-time transport connection alive, multiplexes channel
//! subscriptions over it, reconnects with bounded exponential backoff,
//! restores subscriptions after every reconnect and audits their health.

pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod network;
pub mod subscription;
pub mod transport;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{HealthConfig, ManagerConfig, ReconnectConfig};
pub use connection::{BackoffPolicy, ConnectionState, HealthReport, ManagerEvent};
pub use error::{PubSubError, Result};
pub use manager::PubSubManager;
pub use network::{NetworkMonitor, NetworkSignal};
pub use subscription::{
    CloseAllReport, CloseReport, SubscriptionHandle, SubscriptionInfo, SubscriptionOptions,
    SubscriptionStats,
};
pub use transport::{
    EventSink, Publication, SubscriptionState, TokenProvider, Transport, TransportEvent,
    TransportSession, TransportSubscription,
};

/// Install a `RUST_LOG`-driven fmt subscriber (default level `info`).
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
