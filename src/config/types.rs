//! Configuration Types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::BackoffPolicy;
use crate::error::{PubSubError, Result};
use crate::subscription::SubscriptionOptions;

/// Reconnection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first automatic reconnect (ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap for the exponential backoff (ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Automatic attempts since the last successful connection before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between teardown and reconnect in `force_reconnect` (ms)
    #[serde(default = "default_force_reconnect_delay_ms")]
    pub force_reconnect_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_force_reconnect_delay_ms() -> u64 {
    100
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            force_reconnect_delay_ms: default_force_reconnect_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn force_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.force_reconnect_delay_ms)
    }
}

/// Subscription health audit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between audits while connected
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Top-level manager configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub health: HealthConfig,

    /// Defaults for subscriptions created without explicit options
    #[serde(default)]
    pub subscription: SubscriptionOptions,
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        let reconnect = &self.reconnect;
        if reconnect.base_delay_ms == 0 {
            return Err(PubSubError::Config(
                "reconnect.base_delay_ms must be greater than 0".into(),
            ));
        }
        if reconnect.max_delay_ms < reconnect.base_delay_ms {
            return Err(PubSubError::Config(format!(
                "reconnect.max_delay_ms ({}) is below base_delay_ms ({})",
                reconnect.max_delay_ms, reconnect.base_delay_ms
            )));
        }
        if self.health.interval_secs == 0 {
            return Err(PubSubError::Config(
                "health.interval_secs must be greater than 0".into(),
            ));
        }
        let sub = &self.subscription;
        if sub.max_resubscribe_delay_ms < sub.min_resubscribe_delay_ms {
            return Err(PubSubError::Config(
                "subscription resubscribe delay bounds are inverted".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.health.interval(), Duration::from_secs(30));
        assert!(config.health.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = ManagerConfig::default();
        config.reconnect.max_delay_ms = 10;
        assert!(matches!(config.validate(), Err(PubSubError::Config(_))));

        let mut config = ManagerConfig::default();
        config.reconnect.base_delay_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ManagerConfig::default();
        config.health.interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
