// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Oscillation sweep bounds.

use crate::error::ValueError;

/// Lower and upper bound of the oscillation sweep, in degrees (5-355).
///
/// # Examples
///
/// ```
/// use airstate::types::OscillationAngles;
///
/// let angles = OscillationAngles::new(90, 270).unwrap();
/// assert_eq!(angles.span(), 180);
///
/// assert!(OscillationAngles::new(270, 90).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct OscillationAngles {
    low: u16,
    high: u16,
}

impl OscillationAngles {
    /// Smallest accepted angle.
    pub const MIN: u16 = 5;

    /// Largest accepted angle.
    pub const MAX: u16 = 355;

    /// Creates a sweep range.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` when an angle is outside [5, 355] and
    /// `ValueError::AnglesOutOfOrder` when `low > high`.
    pub fn new(low: u16, high: u16) -> Result<Self, ValueError> {
        for angle in [low, high] {
            if !(Self::MIN..=Self::MAX).contains(&angle) {
                return Err(ValueError::OutOfRange {
                    min: i32::from(Self::MIN),
                    max: i32::from(Self::MAX),
                    actual: i32::from(angle),
                });
            }
        }
        if low > high {
            return Err(ValueError::AnglesOutOfOrder { low, high });
        }
        Ok(Self { low, high })
    }

    /// Returns the lower bound.
    #[must_use]
    pub const fn low(&self) -> u16 {
        self.low
    }

    /// Returns the upper bound.
    #[must_use]
    pub const fn high(&self) -> u16 {
        self.high
    }

    /// Returns the sweep width in degrees.
    #[must_use]
    pub const fn span(&self) -> u16 {
        self.high - self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_full_range() {
        let angles = OscillationAngles::new(5, 355).unwrap();
        assert_eq!(angles.span(), 350);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(
            OscillationAngles::new(0, 90),
            Err(ValueError::OutOfRange { actual: 0, .. })
        ));
        assert!(OscillationAngles::new(90, 360).is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        assert_eq!(
            OscillationAngles::new(200, 100),
            Err(ValueError::AnglesOutOfOrder {
                low: 200,
                high: 100
            })
        );
    }
}
