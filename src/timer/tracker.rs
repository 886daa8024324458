//! Shared in-flight action tracking.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::api::ResourceKey;

/// Process-wide map of workload identity to action-start time.
///
/// Single source of truth for "is an action currently executing against
/// this workload", shared between the scheduler's overlap check and the
/// completion paths. Constructed once at startup and passed by `Arc` to
/// everything that needs it — deliberately not a true singleton, so
/// tests can build and reset their own.
///
/// Readers take the read lock, writers the write lock; the lock is never
/// held across an await.
#[derive(Debug, Default)]
pub struct ActionTracker {
    actions: RwLock<HashMap<ResourceKey, DateTime<Utc>>>,
}

impl ActionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an action as started for `key` at `now`.
    pub fn begin(&self, key: &ResourceKey, now: DateTime<Utc>) {
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), now);
    }

    /// Clear the in-progress mark for `key`, if any.
    pub fn finish(&self, key: &ResourceKey) {
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Start time of the in-progress action for `key`, if one is marked.
    pub fn started_at(&self, key: &ResourceKey) -> Option<DateTime<Utc>> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    /// Whether an action is currently marked in progress for `key`.
    pub fn in_progress(&self, key: &ResourceKey) -> bool {
        self.started_at(key).is_some()
    }
}
