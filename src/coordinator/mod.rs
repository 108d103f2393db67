// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state coordination.
//!
//! The [`Coordinator`] is the single owner of device state. It combines
//! three sources into one consistent view per device:
//!
//! - **Cloud directory**: names, categories, capabilities and firmware data
//! - **Message bus**: live property reports and firmware progress
//! - **Connection supervision**: cloud and bus channel states
//!
//! Every change produces a new [`DeviceSnapshot`] with a higher `revision`.
//! Snapshots are delivered to callbacks registered with
//! [`Coordinator::subscribe`] and to receivers returned by
//! [`Coordinator::watch_device`].
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use airstate::Coordinator;
//! use airstate::bus::MqttBus;
//! use airstate::cloud::{Credentials, HttpCloudClient, HttpCloudConfig};
//!
//! #[tokio::main]
//! async fn main() -> airstate::Result<()> {
//!     let cloud = HttpCloudClient::new(HttpCloudConfig::new("https://api.example.com"))?;
//!     let bus = MqttBus::builder().host("192.168.1.50").build().await?;
//!     let coordinator = Coordinator::builder(
//!         Arc::new(cloud),
//!         Arc::new(bus),
//!         Credentials::new("me@example.com", "secret"),
//!     )
//!     .build();
//!
//!     for snapshot in coordinator.discover().await? {
//!         let mut changes = coordinator.watch_device(&snapshot.serial).unwrap();
//!         coordinator.connect(&snapshot.serial)?;
//!         tokio::spawn(async move {
//!             while changes.changed().await.is_ok() {
//!                 let snapshot = changes.borrow_and_update().clone();
//!                 println!("{} rev {}", snapshot.serial, snapshot.revision);
//!             }
//!         });
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod device;
mod device_coordinator;
mod snapshot;

pub use config::{
    CoordinatorBuilder, CoordinatorConfig, DEFAULT_DIAGNOSTICS_CAPACITY, DEFAULT_REFRESH_ATTEMPTS,
};
pub use device::{Diagnostic, DiagnosticKind, Reconciled};
pub use device_coordinator::Coordinator;
pub use snapshot::{DeviceSnapshot, FirmwareSnapshot};
