// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Serialize;

use crate::capabilities::CapabilitySet;
use crate::connection::{Channel, ConnectionState};
use crate::firmware::FirmwareUpdatePhase;
use crate::state::LiveState;
use crate::types::{DeviceCategory, Serial};

use super::device::{Diagnostic, Reconciled};

/// Immutable copy of a device's state.
///
/// Snapshots are handed to subscribers after every change. They never
/// reference live coordinator storage, and `revision` increases by one with
/// every change of the device, so consumers can detect gaps or reordering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    /// Device serial.
    pub serial: Serial,
    /// Display name.
    pub name: String,
    /// Product category.
    pub category: DeviceCategory,
    /// Bus topic root.
    pub topic_root: String,
    /// Per-device change counter.
    pub revision: u64,
    /// Resolved capabilities.
    pub capabilities: CapabilitySet,
    /// Cloud channel state.
    pub cloud: ConnectionState,
    /// Bus channel state.
    pub bus: ConnectionState,
    /// Last reported properties.
    pub live: LiveState,
    /// Firmware information.
    pub firmware: FirmwareSnapshot,
    /// Recent diagnostics, oldest first.
    pub diagnostics: Vec<Diagnostic>,
}

impl DeviceSnapshot {
    /// State of one channel.
    #[must_use]
    pub fn connection(&self, channel: Channel) -> ConnectionState {
        match channel {
            Channel::Cloud => self.cloud,
            Channel::Bus => self.bus,
        }
    }

    /// Returns true if both channels are connected.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.cloud.is_connected() && self.bus.is_connected()
    }

    /// An empty snapshot for a device nothing is known about yet.
    pub(crate) fn placeholder(serial: Serial) -> Self {
        Self {
            name: serial.to_string(),
            serial,
            category: DeviceCategory::new(""),
            topic_root: String::new(),
            revision: 0,
            capabilities: CapabilitySet::default(),
            cloud: ConnectionState::Disconnected,
            bus: ConnectionState::Disconnected,
            live: LiveState::new(),
            firmware: FirmwareSnapshot::default(),
            diagnostics: Vec::new(),
        }
    }
}

/// Firmware part of a [`DeviceSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FirmwareSnapshot {
    /// Installed version.
    pub version: Option<String>,
    /// Version being offered or installed.
    pub available_version: Option<String>,
    /// Whether the cloud reports a newer version.
    pub update_available: Option<bool>,
    /// Automatic update setting.
    pub auto_update: Reconciled<bool>,
    /// Update cycle phase.
    pub phase: FirmwareUpdatePhase,
    /// Last status token received.
    pub last_token: Option<String>,
}
