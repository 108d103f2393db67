// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use super::classifier::normalize;
use super::{FirmwareUpdatePhase, StatusClassifier};
use crate::error::StateConflict;

/// Result of applying one status token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareOutcome {
    /// The phase moved forward.
    Advanced {
        /// Phase before the token.
        from: FirmwareUpdatePhase,
        /// Phase after the token.
        to: FirmwareUpdatePhase,
    },
    /// The token is not in the classification table; nothing changed.
    Unrecognized {
        /// The normalized token.
        token: String,
    },
    /// A known token that does not fit the current cycle (no trigger, or a
    /// step backwards); nothing changed.
    OutOfCycle {
        /// The normalized token.
        token: String,
        /// The phase the machine stayed in.
        phase: FirmwareUpdatePhase,
    },
    /// A trigger request is still in flight; the token is kept until the
    /// request resolves.
    Buffered {
        /// The normalized token.
        token: String,
    },
}

impl FirmwareOutcome {
    /// Returns true if the phase changed.
    #[must_use]
    pub const fn is_transition(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }
}

/// Firmware update cycle of one device.
///
/// Only a confirmed cloud trigger enters `Triggered`; status tokens from the
/// bus move the cycle forward from there. The trigger confirmation and the
/// first status tokens travel on different channels and may arrive in either
/// order, so tokens seen while a trigger is in flight are held back and
/// replayed once the trigger is confirmed.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use airstate::firmware::{FirmwareStateMachine, FirmwareUpdatePhase, StatusClassifier};
///
/// let mut machine = FirmwareStateMachine::new(Arc::new(StatusClassifier::default()));
///
/// machine.begin_trigger()?;
/// machine.confirm_trigger();
/// machine.apply_status("acknowledged");
/// machine.apply_status("downloaded");
/// machine.apply_status("installed");
/// assert_eq!(machine.phase(), FirmwareUpdatePhase::Completed);
///
/// // the next event of any kind starts over
/// machine.observe_event();
/// assert_eq!(machine.phase(), FirmwareUpdatePhase::Idle);
/// # Ok::<(), airstate::error::StateConflict>(())
/// ```
#[derive(Debug, Clone)]
pub struct FirmwareStateMachine {
    phase: FirmwareUpdatePhase,
    classifier: Arc<StatusClassifier>,
    trigger_in_flight: bool,
    pending: Vec<String>,
    last_token: Option<String>,
}

impl FirmwareStateMachine {
    /// Creates an idle machine.
    #[must_use]
    pub fn new(classifier: Arc<StatusClassifier>) -> Self {
        Self {
            phase: FirmwareUpdatePhase::Idle,
            classifier,
            trigger_in_flight: false,
            pending: Vec::new(),
            last_token: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> FirmwareUpdatePhase {
        self.phase
    }

    /// Last status token seen, normalized.
    #[must_use]
    pub fn last_token(&self) -> Option<&str> {
        self.last_token.as_deref()
    }

    /// Returns true while a trigger request is waiting for the cloud.
    #[must_use]
    pub fn is_trigger_in_flight(&self) -> bool {
        self.trigger_in_flight
    }

    /// Reserves the machine for a trigger request.
    ///
    /// # Errors
    ///
    /// Returns [`StateConflict`] if an update cycle is running or another
    /// trigger is in flight. The machine is left unchanged.
    pub fn begin_trigger(&mut self) -> Result<(), StateConflict> {
        if self.trigger_in_flight {
            return Err(StateConflict::TriggerInFlight);
        }
        if self.phase != FirmwareUpdatePhase::Idle {
            return Err(StateConflict::UpdateInProgress { phase: self.phase });
        }
        self.trigger_in_flight = true;
        Ok(())
    }

    /// Enters `Triggered` after the cloud accepted the request, then replays
    /// any tokens that arrived meanwhile.
    ///
    /// Returns the outcomes of the replayed tokens. Does nothing if no
    /// trigger is in flight.
    pub fn confirm_trigger(&mut self) -> Vec<FirmwareOutcome> {
        if !self.trigger_in_flight {
            return Vec::new();
        }
        self.trigger_in_flight = false;
        self.phase = FirmwareUpdatePhase::Triggered;

        std::mem::take(&mut self.pending)
            .iter()
            .map(|token| self.apply_status(token))
            .collect()
    }

    /// Releases the reservation after the trigger request failed.
    ///
    /// Returns the tokens that were held back; they never belonged to a
    /// cycle.
    pub fn abort_trigger(&mut self) -> Vec<String> {
        self.trigger_in_flight = false;
        std::mem::take(&mut self.pending)
    }

    /// Applies a status token.
    pub fn apply_status(&mut self, token: &str) -> FirmwareOutcome {
        let token = normalize(token);
        self.last_token = Some(token.clone());

        if self.trigger_in_flight && self.phase == FirmwareUpdatePhase::Idle {
            self.pending.push(token.clone());
            return FirmwareOutcome::Buffered { token };
        }

        let Some(next) = self.classifier.classify(&token) else {
            return FirmwareOutcome::Unrecognized { token };
        };

        if !self.phase.is_in_progress() || next.rank() <= self.phase.rank() {
            return FirmwareOutcome::OutOfCycle {
                token,
                phase: self.phase,
            };
        }

        let from = self.phase;
        self.phase = next;
        FirmwareOutcome::Advanced { from, to: next }
    }

    /// Resets a reported cycle. Call before applying every event.
    ///
    /// Returns true if the phase changed.
    pub fn observe_event(&mut self) -> bool {
        if self.phase.is_reporting() {
            self.phase = FirmwareUpdatePhase::Idle;
            return true;
        }
        false
    }
}
