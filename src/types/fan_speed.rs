// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fan speed type.

use std::fmt;

use crate::error::ValueError;

/// Fan speed step (1-10).
///
/// On the wire the speed is a zero-padded four digit string (`"0005"`).
///
/// # Examples
///
/// ```
/// use airstate::types::FanSpeed;
///
/// let speed = FanSpeed::new(5).unwrap();
/// assert_eq!(speed.value(), 5);
/// assert_eq!(speed.to_wire(), "0005");
///
/// assert!(FanSpeed::new(11).is_err());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct FanSpeed(u8);

impl FanSpeed {
    /// Slowest speed step.
    pub const MIN: u8 = 1;

    /// Fastest speed step.
    pub const MAX: u8 = 10;

    /// Quietest setting.
    pub const QUIET: Self = Self(1);

    /// Full speed.
    pub const BOOST: Self = Self(10);

    /// Creates a fan speed.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` if value is outside [1, 10].
    pub fn new(value: u8) -> Result<Self, ValueError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(ValueError::OutOfRange {
                min: i32::from(Self::MIN),
                max: i32::from(Self::MAX),
                actual: i32::from(value),
            });
        }
        Ok(Self(value))
    }

    /// Creates a fan speed, clamping to the valid range.
    #[must_use]
    pub const fn clamped(value: u8) -> Self {
        if value < Self::MIN {
            Self(Self::MIN)
        } else if value > Self::MAX {
            Self(Self::MAX)
        } else {
            Self(value)
        }
    }

    /// Returns the speed step.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Returns the wire representation.
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{:04}", self.0)
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for FanSpeed {
    type Error = ValueError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FanSpeed> for u8 {
    fn from(speed: FanSpeed) -> Self {
        speed.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_speed_valid() {
        for v in 1..=10 {
            assert_eq!(FanSpeed::new(v).unwrap().value(), v);
        }
    }

    #[test]
    fn fan_speed_invalid() {
        assert!(FanSpeed::new(0).is_err());
        assert!(FanSpeed::new(11).is_err());
    }

    #[test]
    fn fan_speed_clamped() {
        assert_eq!(FanSpeed::clamped(0).value(), 1);
        assert_eq!(FanSpeed::clamped(50).value(), 10);
        assert_eq!(FanSpeed::clamped(7).value(), 7);
    }

    #[test]
    fn wire_format_is_zero_padded() {
        assert_eq!(FanSpeed::QUIET.to_wire(), "0001");
        assert_eq!(FanSpeed::BOOST.to_wire(), "0010");
    }
}
