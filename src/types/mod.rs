// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types for appliance state and commands.
//!
//! Each constrained type validates its range at construction time, so a
//! command built from these types always encodes to a payload the appliance
//! accepts.
//!
//! # Types
//!
//! - [`Serial`] - Stable device identifier, safe to embed in bus topics
//! - [`DeviceCategory`] - Product category tag reported by the cloud
//! - [`FanSpeed`] - Fan speed step (1-10)
//! - [`TargetTemperature`] - Heating target in tenths of Kelvin
//! - [`TargetHumidity`] - Humidifier target (30-70 %)
//! - [`OscillationAngles`] - Oscillation sweep bounds (5-355 degrees)

mod category;
mod climate;
mod fan_speed;
mod oscillation;
mod serial;

pub use category::{CategoryKind, DeviceCategory};
pub use climate::{TargetHumidity, TargetTemperature};
pub use fan_speed::FanSpeed;
pub use oscillation::OscillationAngles;
pub use serial::Serial;
