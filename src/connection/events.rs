//! Manager events broadcast to observers

use serde::{Deserialize, Serialize};

use super::health::HealthReport;
use super::state::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ManagerEvent {
    /// Connection state transition
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Reconnect timer armed
    #[serde(rename_all = "camelCase")]
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    /// Attempt budget spent; only `connect()` restarts reconnection
    ReconnectAttemptsExhausted { attempts: u32 },
    /// Restoration pass after (re)connecting
    SubscriptionsRestored {
        restored: Vec<String>,
        failed: Vec<String>,
    },
    HealthChecked(HealthReport),
}

impl ManagerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ManagerEvent::StateChanged { .. } => "state_changed",
            ManagerEvent::ReconnectScheduled { .. } => "reconnect_scheduled",
            ManagerEvent::ReconnectAttemptsExhausted { .. } => "reconnect_attempts_exhausted",
            ManagerEvent::SubscriptionsRestored { .. } => "subscriptions_restored",
            ManagerEvent::HealthChecked(_) => "health_checked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_json_shape() {
        let event = ManagerEvent::ReconnectScheduled {
            attempt: 2,
            delay_ms: 4000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reconnectScheduled");
        assert_eq!(json["delayMs"], 4000);

        let event = ManagerEvent::StateChanged {
            from: ConnectionState::Connecting,
            to: ConnectionState::Connected,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stateChanged");
        assert_eq!(json["to"], "connected");
    }
}
