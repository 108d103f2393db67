// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback management for device snapshot subscriptions.
//!
//! This module provides the core types for managing subscription callbacks:
//!
//! - [`SubscriptionId`] - Unique identifier for unsubscribing
//! - [`CallbackRegistry`] - Registry for storing and dispatching callbacks

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::coordinator::DeviceSnapshot;
use crate::types::Serial;

/// Unique identifier for a subscription.
///
/// Returned when registering a callback and used to unsubscribe later. IDs
/// are never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a new subscription ID with the given value.
    #[must_use]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Type alias for snapshot callbacks.
pub type SnapshotCallback = Arc<dyn Fn(&DeviceSnapshot) + Send + Sync>;

/// Type alias for device removal callbacks.
pub type RemovedCallback = Arc<dyn Fn(&Serial) + Send + Sync>;

/// Registry of subscriber callbacks.
///
/// Callbacks are stored behind `parking_lot::RwLock`s and wrapped in `Arc`,
/// so dispatch clones the current list and runs it without holding the lock.
/// A callback may therefore subscribe or unsubscribe from inside itself.
/// Callbacks run in registration order.
pub struct CallbackRegistry {
    /// Counter for generating unique subscription IDs.
    next_id: AtomicU64,
    /// Callbacks receiving every device snapshot.
    snapshot_callbacks: RwLock<BTreeMap<SubscriptionId, SnapshotCallback>>,
    /// Callbacks receiving the serial of removed devices.
    removed_callbacks: RwLock<BTreeMap<SubscriptionId, RemovedCallback>>,
}

impl CallbackRegistry {
    /// Creates a new empty callback registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            snapshot_callbacks: RwLock::new(BTreeMap::new()),
            removed_callbacks: RwLock::new(BTreeMap::new()),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a callback for device snapshots.
    pub fn on_snapshot<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceSnapshot) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.snapshot_callbacks.write().insert(id, Arc::new(callback));
        id
    }

    /// Registers a callback for device removals.
    pub fn on_removed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Serial) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.removed_callbacks.write().insert(id, Arc::new(callback));
        id
    }

    /// Removes a callback by its subscription ID.
    ///
    /// Returns `true` if a callback was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.snapshot_callbacks.write().remove(&id).is_some()
            || self.removed_callbacks.write().remove(&id).is_some()
    }

    /// Removes all callbacks.
    pub fn clear(&self) {
        self.snapshot_callbacks.write().clear();
        self.removed_callbacks.write().clear();
    }

    /// Returns the total number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.snapshot_callbacks.read().len() + self.removed_callbacks.read().len()
    }

    /// Returns true if no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callback_count() == 0
    }

    /// Calls every snapshot callback.
    pub fn dispatch_snapshot(&self, snapshot: &DeviceSnapshot) {
        let callbacks: Vec<SnapshotCallback> =
            self.snapshot_callbacks.read().values().cloned().collect();
        for callback in callbacks {
            callback(snapshot);
        }
    }

    /// Calls every removal callback.
    pub fn dispatch_removed(&self, serial: &Serial) {
        let callbacks: Vec<RemovedCallback> =
            self.removed_callbacks.read().values().cloned().collect();
        for callback in callbacks {
            callback(serial);
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("snapshot_callbacks", &self.snapshot_callbacks.read().len())
            .field("removed_callbacks", &self.removed_callbacks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::coordinator::DeviceSnapshot;

    fn snapshot() -> DeviceSnapshot {
        DeviceSnapshot::placeholder(Serial::new("ABC-1").unwrap())
    }

    #[test]
    fn subscription_id_display() {
        let id = SubscriptionId::new(42);
        assert_eq!(id.to_string(), "Sub(42)");
    }

    #[test]
    fn registry_new_is_empty() {
        let registry = CallbackRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.callback_count(), 0);
    }

    #[test]
    fn snapshot_callback_fires() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let id = registry.on_snapshot(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.callback_count(), 1);

        registry.dispatch_snapshot(&snapshot());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.dispatch_snapshot(&snapshot());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let registry = CallbackRegistry::new();
        let order = Arc::new(RwLock::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            registry.on_snapshot(move |_| order.write().push(n));
        }
        registry.dispatch_snapshot(&snapshot());
        assert_eq!(*order.read(), [0, 1, 2]);
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let registry = Arc::new(CallbackRegistry::new());
        let id_cell = Arc::new(RwLock::new(None::<SubscriptionId>));

        let reg = registry.clone();
        let cell = id_cell.clone();
        let id = registry.on_snapshot(move |_| {
            if let Some(id) = *cell.read() {
                reg.unsubscribe(id);
            }
        });
        *id_cell.write() = Some(id);

        registry.dispatch_snapshot(&snapshot());
        assert!(registry.is_empty());
    }

    #[test]
    fn removed_callback_fires() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(RwLock::new(None::<Serial>));
        let seen_clone = seen.clone();
        registry.on_removed(move |serial| *seen_clone.write() = Some(serial.clone()));

        let serial = Serial::new("ABC-1").unwrap();
        registry.dispatch_removed(&serial);
        assert_eq!(seen.read().as_ref(), Some(&serial));

        registry.clear();
        assert!(registry.is_empty());
    }
}
