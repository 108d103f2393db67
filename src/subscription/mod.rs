// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription system for device snapshots.
//!
//! Subscribers register plain closures and receive an immutable
//! [`DeviceSnapshot`](crate::coordinator::DeviceSnapshot) after every change
//! to any device. The closures never see live device state.
//!
//! # Usage
//!
//! ```no_run
//! # fn example(coordinator: &airstate::Coordinator) {
//! let id = coordinator.subscribe(|snapshot| {
//!     println!("{} is now at revision {}", snapshot.serial, snapshot.revision);
//! });
//!
//! // Later, unsubscribe
//! coordinator.unsubscribe(id);
//! # }
//! ```

mod callback;

pub use callback::{CallbackRegistry, RemovedCallback, SnapshotCallback, SubscriptionId};
