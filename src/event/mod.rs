// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Domain events applied by the coordinator.
//!
//! Bus messages are decoded into [`Inbound`](crate::codec::Inbound) values
//! and converted with `From`; connection transitions and cloud refreshes
//! produce their own variants. Hosts can also feed events directly through
//! [`Coordinator::apply_event`](crate::coordinator::Coordinator::apply_event).

mod device_event;

pub use device_event::DeviceEvent;
