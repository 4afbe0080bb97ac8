//! Permission check cache
//!
//! Outcomes are cached per canonical `module:action` key as shared futures, so
//! an entry is usable both while its request is in flight and after it settles.
//! Concurrent callers for the same key all await the one request.

use erp_core::PermissionKey;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Pending or settled permission outcome
pub type PermissionOutcome = Shared<BoxFuture<'static, bool>>;

#[derive(Default)]
pub struct PermissionCache {
    entries: Mutex<HashMap<PermissionKey, PermissionOutcome>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached outcome for `key`, or register the one built by `check`
    ///
    /// `check` runs under the cache lock and must only build the future, not poll it.
    pub fn get_or_insert_with<F>(&self, key: PermissionKey, check: F) -> PermissionOutcome
    where
        F: FnOnce() -> BoxFuture<'static, bool>,
    {
        let mut entries = self.lock();
        if let Some(outcome) = entries.get(&key) {
            debug!(key = %key, "Permission cache hit");
            return outcome.clone();
        }

        debug!(key = %key, "Permission cache miss");
        let outcome = check().shared();
        entries.insert(key, outcome.clone());
        outcome
    }

    /// Settled value for `key`, if its request has completed
    pub fn peek(&self, key: &PermissionKey) -> Option<bool> {
        self.lock().get(key).and_then(|outcome| outcome.peek().copied())
    }

    pub fn contains(&self, key: &PermissionKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Drop every entry; returns how many were removed
    ///
    /// Requests already in flight still resolve for their waiters but are no
    /// longer reachable from the cache.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PermissionKey, PermissionOutcome>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for PermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCache")
            .field("entries", &self.len())
            .finish()
    }
}
