// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Heating and humidifier targets.

use std::fmt;

use crate::error::ValueError;

/// Heating target temperature, stored in tenths of Kelvin as on the wire.
///
/// The appliance accepts 1 °C to 37 °C (2741 to 3101 deci-Kelvin).
///
/// # Examples
///
/// ```
/// use airstate::types::TargetTemperature;
///
/// let target = TargetTemperature::from_celsius(22).unwrap();
/// assert_eq!(target.deci_kelvin(), 2951);
/// assert_eq!(target.to_wire(), "2951");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "u16", into = "u16")]
pub struct TargetTemperature(u16);

impl TargetTemperature {
    /// Lowest accepted value (1 °C).
    pub const MIN: u16 = 2741;

    /// Highest accepted value (37 °C).
    pub const MAX: u16 = 3101;

    /// Creates a target from tenths of Kelvin.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` outside [2741, 3101].
    pub fn new(deci_kelvin: u16) -> Result<Self, ValueError> {
        if !(Self::MIN..=Self::MAX).contains(&deci_kelvin) {
            return Err(ValueError::OutOfRange {
                min: i32::from(Self::MIN),
                max: i32::from(Self::MAX),
                actual: i32::from(deci_kelvin),
            });
        }
        Ok(Self(deci_kelvin))
    }

    /// Creates a target from whole degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` outside [1, 37] °C.
    pub fn from_celsius(celsius: i16) -> Result<Self, ValueError> {
        if !(1..=37).contains(&celsius) {
            return Err(ValueError::OutOfRange {
                min: 1,
                max: 37,
                actual: i32::from(celsius),
            });
        }
        // 1..=37 maps into 2741..=3101, which fits u16
        #[allow(clippy::cast_sign_loss)]
        Ok(Self(celsius as u16 * 10 + 2731))
    }

    /// Returns the value in tenths of Kelvin.
    #[must_use]
    pub const fn deci_kelvin(&self) -> u16 {
        self.0
    }

    /// Returns the value in degrees Celsius.
    #[must_use]
    pub fn celsius(&self) -> f32 {
        f32::from(self.0) / 10.0 - 273.15
    }

    /// Returns the wire representation.
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{:04}", self.0)
    }
}

impl TryFrom<u16> for TargetTemperature {
    type Error = ValueError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TargetTemperature> for u16 {
    fn from(target: TargetTemperature) -> Self {
        target.0
    }
}

impl fmt::Display for TargetTemperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}°C", self.celsius())
    }
}

/// Humidifier target relative humidity (30-70 %).
///
/// # Examples
///
/// ```
/// use airstate::types::TargetHumidity;
///
/// let target = TargetHumidity::new(45).unwrap();
/// assert_eq!(target.to_wire(), "0045");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct TargetHumidity(u8);

impl TargetHumidity {
    /// Lowest accepted target.
    pub const MIN: u8 = 30;

    /// Highest accepted target.
    pub const MAX: u8 = 70;

    /// Creates a humidity target.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` outside [30, 70].
    pub fn new(percent: u8) -> Result<Self, ValueError> {
        if !(Self::MIN..=Self::MAX).contains(&percent) {
            return Err(ValueError::OutOfRange {
                min: i32::from(Self::MIN),
                max: i32::from(Self::MAX),
                actual: i32::from(percent),
            });
        }
        Ok(Self(percent))
    }

    /// Returns the target in percent.
    #[must_use]
    pub const fn percent(&self) -> u8 {
        self.0
    }

    /// Returns the wire representation.
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{:04}", self.0)
    }
}

impl TryFrom<u8> for TargetHumidity {
    type Error = ValueError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TargetHumidity> for u8 {
    fn from(target: TargetHumidity) -> Self {
        target.0
    }
}

impl fmt::Display for TargetHumidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_bounds() {
        assert!(TargetTemperature::new(2740).is_err());
        assert!(TargetTemperature::new(2741).is_ok());
        assert!(TargetTemperature::new(3101).is_ok());
        assert!(TargetTemperature::new(3102).is_err());
    }

    #[test]
    fn temperature_from_celsius() {
        assert_eq!(TargetTemperature::from_celsius(1).unwrap().deci_kelvin(), 2741);
        assert_eq!(TargetTemperature::from_celsius(37).unwrap().deci_kelvin(), 3101);
        assert!(TargetTemperature::from_celsius(0).is_err());
        assert!(TargetTemperature::from_celsius(-300).is_err());
        assert!(TargetTemperature::from_celsius(38).is_err());
    }

    #[test]
    fn humidity_bounds() {
        assert!(TargetHumidity::new(29).is_err());
        assert_eq!(TargetHumidity::new(30).unwrap().percent(), 30);
        assert!(TargetHumidity::new(71).is_err());
    }
}
