// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live device state.
//!
//! A device's live state is a flat map from canonical property name
//! (`power`, `speed`, `pm25`, ...) to the last reported [`PropertyValue`].
//! It is last-write-wins with no history. Updates arrive as
//! [`PropertyUpdate`] batches decoded from bus messages.
//!
//! # Examples
//!
//! ```
//! use airstate::state::{LiveState, PropertyUpdate, PropertyValue};
//!
//! let mut state = LiveState::new();
//!
//! // Apply returns true if state actually changed
//! let update = PropertyUpdate::new().with("speed", PropertyValue::Integer(5));
//! assert!(state.apply(&update));
//! assert!(!state.apply(&update));
//!
//! assert_eq!(state.integer("speed"), Some(5));
//! ```

mod live_state;
mod property;

pub use live_state::LiveState;
pub use property::{PropertyUpdate, PropertyValue};
