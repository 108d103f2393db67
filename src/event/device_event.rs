// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use crate::cloud::{DeviceDescriptor, FirmwareMetadata};
use crate::codec::Inbound;
use crate::connection::{Channel, ConnectionState, ConnectionTransition};
use crate::state::PropertyUpdate;

/// Something that happened to one device.
///
/// Events are immutable values produced by the codec, the connection
/// manager and cloud refreshes. The coordinator applies them to its device
/// registry one at a time per device.
///
/// # Examples
///
/// ```
/// use airstate::event::DeviceEvent;
/// use airstate::state::{PropertyUpdate, PropertyValue};
///
/// let event = DeviceEvent::PropertyUpdate(
///     PropertyUpdate::new().with("speed", PropertyValue::Integer(5)),
/// );
/// assert_eq!(event.kind(), "property_update");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Live properties changed.
    PropertyUpdate(PropertyUpdate),

    /// Firmware update progress.
    FirmwareStatus {
        /// Status token as received.
        token: String,
        /// Firmware version reported with the status.
        version: Option<String>,
    },

    /// A bus message the codec does not interpret.
    Unrecognized {
        /// Topic the message arrived on.
        topic: String,
        /// Payload exactly as received.
        payload: Vec<u8>,
    },

    /// A channel changed state.
    Connection {
        /// The channel.
        channel: Channel,
        /// New state.
        state: ConnectionState,
        /// Requested by the host rather than caused by the network.
        explicit: bool,
    },

    /// A fresh directory entry from the cloud.
    Rediscovered {
        /// The device's current descriptor.
        descriptor: DeviceDescriptor,
        /// Firmware metadata fetched alongside, if available.
        firmware: Option<FirmwareMetadata>,
    },
}

impl DeviceEvent {
    /// Short name of the event kind, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PropertyUpdate(_) => "property_update",
            Self::FirmwareStatus { .. } => "firmware_status",
            Self::Unrecognized { .. } => "unrecognized",
            Self::Connection { .. } => "connection",
            Self::Rediscovered { .. } => "rediscovered",
        }
    }
}

impl From<Inbound> for DeviceEvent {
    fn from(inbound: Inbound) -> Self {
        match inbound {
            Inbound::PropertyUpdate(update) => Self::PropertyUpdate(update),
            Inbound::FirmwareStatus { token, version } => Self::FirmwareStatus { token, version },
            Inbound::Unrecognized { topic, payload } => Self::Unrecognized { topic, payload },
        }
    }
}

impl From<ConnectionTransition> for DeviceEvent {
    fn from(transition: ConnectionTransition) -> Self {
        Self::Connection {
            channel: transition.channel,
            state: transition.state,
            explicit: transition.explicit,
        }
    }
}
