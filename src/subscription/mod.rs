//! Subscription Management Module
//!
//! - Registry of tracked channel subscriptions (single source of truth)
//! - Lifecycle controller: create / close / resubscribe / cleanup / restore
//! - Snapshot and report types for callers

mod controller;
mod registry;
mod types;

pub use controller::SubscriptionController;
pub use registry::SubscriptionRegistry;
pub use types::{
    CloseAllReport, CloseReport, RestoreReport, SubscriptionEntry, SubscriptionHandle,
    SubscriptionInfo, SubscriptionOptions, SubscriptionStats,
};
