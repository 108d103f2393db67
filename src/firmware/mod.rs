// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware update tracking.
//!
//! An update has two halves: the cloud accepts a trigger, then the device
//! reports progress as status tokens on the bus. [`FirmwareStateMachine`]
//! joins them into one [`FirmwareUpdatePhase`] per device, and
//! [`StatusClassifier`] decides which tokens mean completion or failure.

mod classifier;
mod machine;
mod phase;

pub use classifier::StatusClassifier;
pub use machine::{FirmwareOutcome, FirmwareStateMachine};
pub use phase::FirmwareUpdatePhase;
