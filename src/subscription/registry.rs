//! Subscription Registry
//!
//! Single source of truth for tracked subscriptions, keyed by channel name.
//! Backed by DashMap so lookups from the event pump and from callers never
//! contend on one global lock.

use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use super::types::{SubscriptionEntry, SubscriptionStats};

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an entry. An existing entry for the same channel is replaced
    /// (last writer wins) and returned.
    pub fn add(&self, entry: SubscriptionEntry) -> Option<SubscriptionEntry> {
        debug!("Registry: tracking {}", entry.channel);
        self.entries.insert(entry.channel.clone(), entry)
    }

    pub fn remove(&self, channel: &str) -> Option<SubscriptionEntry> {
        let removed = self.entries.remove(channel).map(|(_, entry)| entry);
        if removed.is_some() {
            debug!("Registry: removed {}", channel);
        }
        removed
    }

    pub fn get(&self, channel: &str) -> Option<SubscriptionEntry> {
        self.entries.get(channel).map(|e| e.value().clone())
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.entries.contains_key(channel)
    }

    pub fn all(&self) -> Vec<SubscriptionEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn channels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns false when the channel is not tracked
    pub fn set_active(&self, channel: &str, active: bool) -> bool {
        match self.entries.get_mut(channel) {
            Some(mut entry) => {
                entry.active = active;
                true
            }
            None => false,
        }
    }

    /// Record inbound activity now
    pub fn touch(&self, channel: &str) -> bool {
        match self.entries.get_mut(channel) {
            Some(mut entry) => {
                entry.last_activity = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Set both the live flag and whether a reconnect should restore it
    pub(crate) fn set_status(&self, channel: &str, active: bool, restore_on_reconnect: bool) -> bool {
        match self.entries.get_mut(channel) {
            Some(mut entry) => {
                entry.active = active;
                entry.restore_on_reconnect = restore_on_reconnect;
                true
            }
            None => false,
        }
    }

    /// Mark every live entry inactive and flag it for restore. Entries that
    /// are already inactive keep their restore flag, so repeated disconnects
    /// before a reconnect succeeds do not lose it.
    /// Returns the number of entries that were active.
    pub(crate) fn suspend_all(&self) -> usize {
        let mut suspended = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.active {
                entry.active = false;
                entry.restore_on_reconnect = true;
                suspended += 1;
            }
        }
        suspended
    }

    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> SubscriptionStats {
        let total = self.entries.len();
        let active = self.entries.iter().filter(|e| e.active).count();
        SubscriptionStats {
            total,
            active,
            inactive: total - active,
        }
    }
}
