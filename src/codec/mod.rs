// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire codec for bus messages.
//!
//! Appliances publish JSON status messages on topics shaped like
//! `<root>/<serial>/status/<facet>` and accept commands on
//! `<root>/<serial>/command`:
//!
//! - `current` / `state` - property snapshots, changes and sensor data
//! - `software` - firmware update progress
//!
//! Decoding is forward compatible: unknown facets and message kinds come back
//! as [`Inbound::Unrecognized`] with the payload preserved, and unknown
//! property keys pass through under their wire name. Only payloads that are
//! unreadable on a known facet produce a [`ParseFailure`](crate::error::ParseFailure).
//!
//! # Examples
//!
//! ```
//! use airstate::codec::{Inbound, decode};
//! use airstate::state::PropertyValue;
//!
//! let inbound = decode(
//!     "438/NK6-EU-MHA0000A/status/current",
//!     br#"{"msg":"CURRENT-STATE","product-state":{"fpwr":"ON","fnsp":"0005"}}"#,
//! )
//! .unwrap();
//!
//! let Inbound::PropertyUpdate(update) = inbound else { panic!() };
//! assert_eq!(update.get("power"), Some(&PropertyValue::Bool(true)));
//! assert_eq!(update.get("speed"), Some(&PropertyValue::Integer(5)));
//! ```

mod command;
mod decode;
mod topic;

pub use command::Command;
pub use decode::{Inbound, canonical_property, decode, parse_wire_value};
pub use topic::{StatusTopic, command_topic, is_valid_root, status_filter, status_topic};
