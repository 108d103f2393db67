// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-channel connection states and transitions.

use std::fmt;

use serde::Serialize;

use crate::types::Serial;

/// One of the two independent channels a device is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Cloud REST and auth service.
    Cloud,
    /// Publish-subscribe message bus.
    Bus,
}

impl Channel {
    /// Both channels.
    pub const ALL: [Self; 2] = [Self::Cloud, Self::Bus];

    /// Returns the channel name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Bus => "bus",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a channel gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Every attempt of the connect cycle failed.
    RetryBudgetExhausted,
    /// The cloud rejected the credentials.
    AuthRejected,
}

/// Connection state of one channel of one device.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Reconnecting{n} -> Connected
///                     |                          |
///                     +--------> Failed <--------+
/// ```
///
/// `Failed` stays until a manual retry resets the channel to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// First attempt of a connect cycle in progress.
    Connecting,
    /// Channel is up.
    Connected,
    /// Waiting to make the given attempt after a failure or a loss.
    Reconnecting {
        /// The attempt about to be made, starting at 1 after a loss.
        attempt: u32,
    },
    /// Gave up.
    Failed {
        /// Why the channel gave up.
        reason: FailureReason,
    },
}

impl ConnectionState {
    /// Returns true if the channel is up.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true if the channel gave up.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true while a connect cycle is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Reconnecting { .. }
        )
    }

    /// Returns whether moving to `next` is a legal transition.
    ///
    /// `explicit` marks transitions requested by the host (disconnect,
    /// removal, manual retry). Only those may reach `Disconnected`.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self, explicit: bool) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Failed, Reconnecting};

        match (self, next) {
            (_, Disconnected) => explicit && self != next,
            (Disconnected, Connecting)
            | (Connecting | Reconnecting { .. }, Connected | Failed { .. })
            | (Connecting | Connected, Reconnecting { .. }) => true,
            (Reconnecting { attempt: from }, Reconnecting { attempt: to }) => to > from,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed { reason } => write!(f, "failed ({reason:?})"),
        }
    }
}

/// A state change reported by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTransition {
    /// Device the transition belongs to.
    pub serial: Serial,
    /// Channel that changed.
    pub channel: Channel,
    /// New state.
    pub state: ConnectionState,
    /// Requested by the host rather than caused by the network.
    pub explicit: bool,
}

impl ConnectionTransition {
    /// Creates a transition caused by the network or the supervisor.
    #[must_use]
    pub fn new(serial: Serial, channel: Channel, state: ConnectionState) -> Self {
        Self {
            serial,
            channel,
            state,
            explicit: false,
        }
    }

    /// Creates a transition requested by the host.
    #[must_use]
    pub fn explicit(serial: Serial, channel: Channel, state: ConnectionState) -> Self {
        Self {
            serial,
            channel,
            state,
            explicit: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXHAUSTED: ConnectionState = ConnectionState::Failed {
        reason: FailureReason::RetryBudgetExhausted,
    };

    #[test]
    fn happy_path() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(&Connecting, false));
        assert!(Connecting.can_transition_to(&Connected, false));
        assert!(Connected.can_transition_to(&Reconnecting { attempt: 1 }, false));
        assert!(Reconnecting { attempt: 1 }.can_transition_to(&Connected, false));
    }

    #[test]
    fn disconnect_must_be_explicit() {
        use ConnectionState::*;
        assert!(!Connected.can_transition_to(&Disconnected, false));
        assert!(Connected.can_transition_to(&Disconnected, true));
        assert!(EXHAUSTED.can_transition_to(&Disconnected, true));
        assert!(!Disconnected.can_transition_to(&Disconnected, true));
    }

    #[test]
    fn failed_is_terminal_until_reset() {
        use ConnectionState::*;
        assert!(!EXHAUSTED.can_transition_to(&Connecting, false));
        assert!(!EXHAUSTED.can_transition_to(&Connecting, true));
        assert!(!EXHAUSTED.can_transition_to(&Connected, false));
        assert!(Reconnecting { attempt: 3 }.can_transition_to(&EXHAUSTED, false));
        assert!(!Connected.can_transition_to(&EXHAUSTED, false));
    }

    #[test]
    fn reconnect_attempts_increase() {
        use ConnectionState::*;
        let second = Reconnecting { attempt: 2 };
        assert!(Reconnecting { attempt: 1 }.can_transition_to(&second, false));
        assert!(!second.can_transition_to(&Reconnecting { attempt: 2 }, false));
        assert!(!second.can_transition_to(&Reconnecting { attempt: 1 }, false));
    }

    #[test]
    fn serializes_with_tag() {
        let json = serde_json::to_value(ConnectionState::Reconnecting { attempt: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"state": "reconnecting", "attempt": 2}));

        let json = serde_json::to_value(EXHAUSTED).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"state": "failed", "reason": "retry_budget_exhausted"})
        );
    }
}
