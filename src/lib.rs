// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `airstate` - a device state coordinator for cloud-connected air
//! treatment appliances.
//!
//! Appliances of this kind are known to a vendor cloud (directory, firmware
//! metadata, firmware commands) and report their live state over an MQTT
//! broker. This crate keeps one consistent, observable record per device
//! while connections come and go.
//!
//! # Supported Features
//!
//! - **Capability resolution**: raw directory tokens to typed features
//! - **Wire codec**: status messages in, commands out
//! - **Connection supervision**: cloud and bus channels with bounded retries
//! - **Firmware tracking**: update cycle from trigger to completion
//! - **Snapshots**: immutable, revisioned state per device, via callbacks
//!   or `tokio::sync::watch`
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use airstate::Coordinator;
//! use airstate::bus::MqttBus;
//! use airstate::cloud::{Credentials, HttpCloudClient, HttpCloudConfig};
//! use airstate::codec::Command;
//!
//! #[tokio::main]
//! async fn main() -> airstate::Result<()> {
//!     let cloud = HttpCloudClient::new(HttpCloudConfig::new("https://api.example.com"))?;
//!     let bus = MqttBus::builder()
//!         .host("192.168.1.50")
//!         .credentials("user", "pass")
//!         .build()
//!         .await?;
//!
//!     let coordinator = Coordinator::builder(
//!         Arc::new(cloud),
//!         Arc::new(bus),
//!         Credentials::new("me@example.com", "secret"),
//!     )
//!     .build();
//!
//!     coordinator.subscribe(|snapshot| {
//!         println!(
//!             "{} rev {}: cloud {} / bus {}",
//!             snapshot.serial, snapshot.revision, snapshot.cloud, snapshot.bus
//!         );
//!     });
//!
//!     for snapshot in coordinator.discover().await? {
//!         coordinator.connect(&snapshot.serial)?;
//!         if snapshot.capabilities.heating() {
//!             coordinator
//!                 .send_command(&snapshot.serial, Command::SetHeating(true))
//!                 .await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Cargo Features
//!
//! - `http` (default): [`cloud::HttpCloudClient`] over `reqwest`
//! - `mqtt` (default): [`bus::MqttBus`] over `rumqttc`
//!
//! Without them, supply your own [`cloud::CloudApi`] and [`bus::MessageBus`]
//! implementations.

pub mod bus;
pub mod capabilities;
pub mod cloud;
pub mod codec;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod firmware;
pub mod state;
pub mod subscription;
pub mod types;

pub use capabilities::{CapabilityResolver, CapabilitySet, CapabilityTable, Feature};
pub use codec::{Command, Inbound};
pub use connection::{Channel, ConnectionState, ReconnectionPolicy, Timeouts};
pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorConfig, DeviceSnapshot};
pub use error::{Error, Result};
pub use event::DeviceEvent;
pub use firmware::FirmwareUpdatePhase;
pub use state::{LiveState, PropertyUpdate, PropertyValue};
pub use subscription::SubscriptionId;
pub use types::{DeviceCategory, FanSpeed, OscillationAngles, Serial, TargetHumidity, TargetTemperature};
