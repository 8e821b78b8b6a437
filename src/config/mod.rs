//! Configuration Management Module
//!
//! Reconnect/backoff, health audit and default subscription settings,
//! loadable from a JSON file.

pub mod storage;
pub mod types;

pub use types::{HealthConfig, ManagerConfig, ReconnectConfig};
