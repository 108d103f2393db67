// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live property map.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{PropertyUpdate, PropertyValue};

/// Last reported value of every property of a device.
///
/// Properties are only added or overwritten by [`apply`](Self::apply), and
/// only removed by [`prune`](Self::prune) when a feature disappears.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LiveState {
    properties: BTreeMap<String, PropertyValue>,
}

impl LiveState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Returns a property as a bool.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(PropertyValue::as_bool)
    }

    /// Returns a property as an integer.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(PropertyValue::as_integer)
    }

    /// Returns a property as text.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropertyValue::as_text)
    }

    /// Returns true if the device reports power on.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.flag("power").unwrap_or(false)
    }

    /// Iterates over all properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of known properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns true if nothing has been reported yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Applies an update and returns whether the state actually changed.
    pub fn apply(&mut self, update: &PropertyUpdate) -> bool {
        let mut changed = false;
        for (name, value) in update.iter() {
            if self.properties.get(name) != Some(value) {
                self.properties.insert(name.to_string(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Removes the given properties and returns whether any was present.
    pub fn prune(&mut self, names: &[&str]) -> bool {
        let mut changed = false;
        for name in names {
            changed |= self.properties.remove(*name).is_some();
        }
        changed
    }
}
