//! Subscription Health Monitor
//!
//! Periodic audit that runs only while the connection is `Connected`.
//! Each tick compares the registry's view of every subscription with the
//! state the transport reports. A subscription the registry still marks
//! active while the transport says `Unsubscribed` is unhealthy.
//!
//! The monitor is observational: it reports counts and never repairs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::events::ManagerEvent;
use super::task::ScheduledTask;
use crate::config::HealthConfig;
use crate::subscription::{SubscriptionController, SubscriptionEntry};

/// Result of one audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Entries the registry already knows are inactive
    pub inactive: usize,
    pub unhealthy_channels: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_entries(entries: &[SubscriptionEntry]) -> Self {
        let mut report = HealthReport {
            total: entries.len(),
            healthy: 0,
            unhealthy: 0,
            inactive: 0,
            unhealthy_channels: Vec::new(),
            checked_at: Utc::now(),
        };

        for entry in entries {
            if !entry.active {
                report.inactive += 1;
            } else if entry.is_unhealthy() {
                report.unhealthy += 1;
                report.unhealthy_channels.push(entry.channel.clone());
            } else {
                report.healthy += 1;
            }
        }
        report.unhealthy_channels.sort();
        report
    }

    pub fn is_healthy(&self) -> bool {
        self.unhealthy == 0
    }
}

pub struct HealthMonitor {
    interval: Duration,
    enabled: bool,
    task: Mutex<Option<ScheduledTask>>,
    last_report: Arc<RwLock<Option<HealthReport>>>,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            interval: config.interval(),
            enabled: config.enabled,
            task: Mutex::new(None),
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking. Any previous monitor is cancelled first.
    pub fn start(
        &self,
        controller: Arc<SubscriptionController>,
        events: broadcast::Sender<ManagerEvent>,
    ) {
        if !self.enabled {
            debug!("Health monitor disabled, not starting");
            return;
        }

        let period = self.interval;
        let last_report = Arc::clone(&self.last_report);
        let task = ScheduledTask::spawn("health-monitor", async move {
            info!("Health monitor started (interval={}s)", period.as_secs());
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let report = audit(&controller);
                *last_report.write() = Some(report.clone());
                let _ = events.send(ManagerEvent::HealthChecked(report));
            }
        });

        // Dropping the previous task aborts it
        *self.task.lock() = Some(task);
    }

    /// Returns true if a running monitor was stopped
    pub fn stop(&self) -> bool {
        let task = self.task.lock().take();
        match task {
            Some(task) => {
                task.cancel();
                debug!("Health monitor stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    pub fn last_report(&self) -> Option<HealthReport> {
        self.last_report.read().clone()
    }

    /// Run one audit immediately, outside the periodic schedule
    pub fn check_now(&self, controller: &SubscriptionController) -> HealthReport {
        let report = audit(controller);
        *self.last_report.write() = Some(report.clone());
        report
    }
}

fn audit(controller: &SubscriptionController) -> HealthReport {
    let report = HealthReport::from_entries(&controller.registry().all());
    if report.is_healthy() {
        debug!(
            "Health check: {} healthy, {} inactive of {}",
            report.healthy, report.inactive, report.total
        );
    } else {
        warn!(
            "Health check: {} unhealthy subscriptions {:?} ({} healthy, {} inactive)",
            report.unhealthy, report.unhealthy_channels, report.healthy, report.inactive
        );
    }
    report
}
