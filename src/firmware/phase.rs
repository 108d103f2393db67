// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use serde::Serialize;

/// Phase of a firmware update cycle.
///
/// ```text
/// Idle -> Triggered -> Acknowledged -> Downloaded -> Completed | Failed
/// ```
///
/// `Completed` and `Failed` are reporting states: the next applied event
/// resets the machine to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareUpdatePhase {
    /// No update running.
    #[default]
    Idle,
    /// The cloud accepted the trigger.
    Triggered,
    /// The device acknowledged the update.
    Acknowledged,
    /// The image is on the device.
    Downloaded,
    /// The update finished.
    Completed,
    /// The update failed.
    Failed,
}

impl FirmwareUpdatePhase {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_reporting(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true between the trigger and the final report.
    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::Triggered | Self::Acknowledged | Self::Downloaded)
    }

    /// Position in the cycle; phases only move to a higher rank.
    pub(crate) const fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Triggered => 1,
            Self::Acknowledged => 2,
            Self::Downloaded => 3,
            Self::Completed | Self::Failed => 4,
        }
    }
}

impl fmt::Display for FirmwareUpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Triggered => "triggered",
            Self::Acknowledged => "acknowledged",
            Self::Downloaded => "downloaded",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
