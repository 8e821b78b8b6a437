//! Connection Management Module
//!
//! - Backoff policy for automatic reconnects
//! - Connection state machine owning the transport session
//! - Subscription health monitor (runs only while connected)
//! - Owned, cancellable background tasks

mod backoff;
mod events;
mod health;
mod machine;
mod state;
mod task;

pub use backoff::BackoffPolicy;
pub use events::ManagerEvent;
pub use health::{HealthMonitor, HealthReport};
pub use machine::ConnectionStateMachine;
pub use state::ConnectionState;
pub use task::ScheduledTask;
