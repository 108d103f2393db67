// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection lifecycle for the cloud and bus channels.
//!
//! Every device is reached through two independent channels, each with its
//! own [`ConnectionState`]:
//!
//! - **cloud**: a lease on the account's [`SharedSession`]
//! - **bus**: a subscription to the device's status topics
//!
//! The [`ConnectionManager`] supervises both, retrying transient failures
//! according to a [`ReconnectionPolicy`] and reporting every transition to a
//! [`ConnectionObserver`].
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use airstate::connection::{ConnectionConfig, ReconnectionPolicy, Timeouts};
//!
//! let config = ConnectionConfig::default()
//!     .with_policy(ReconnectionPolicy::new().with_max_attempts(5))
//!     .with_timeouts(Timeouts::default().with_subscribe(Duration::from_secs(3)))
//!     .with_local_only(true);
//! assert!(config.local_only);
//! ```

mod manager;
mod policy;
mod session;
mod state;

pub use manager::{ConnectionConfig, ConnectionManager, ConnectionObserver, ConnectionTarget};
pub use policy::{ReconnectionPolicy, Timeouts};
pub use session::{SessionLease, SharedSession};
pub use state::{Channel, ConnectionState, ConnectionTransition, FailureReason};
