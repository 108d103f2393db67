// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device serial number type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Stable identifier of a physical appliance.
///
/// The serial is the primary key of the coordinator's registry and is
/// embedded verbatim in bus topics, so it may not be empty and may not
/// contain topic separators (`/`) or MQTT wildcards (`+`, `#`).
///
/// # Examples
///
/// ```
/// use airstate::types::Serial;
///
/// let serial = Serial::new("NK6-EU-MHA0000A").unwrap();
/// assert_eq!(serial.as_str(), "NK6-EU-MHA0000A");
///
/// assert!(Serial::new("a/b").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Serial(String);

impl Serial {
    /// Creates a serial after validating it.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidSerial` if the value is empty or contains
    /// whitespace, `/`, `+` or `#`.
    pub fn new(value: impl Into<String>) -> Result<Self, ValueError> {
        let value = value.into();
        let valid = !value.is_empty()
            && !value
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | '+' | '#'));
        if valid {
            Ok(Self(value))
        } else {
            Err(ValueError::InvalidSerial(value))
        }
    }

    /// Returns the serial as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serial({})", self.0)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Serial {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Serial {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Serial> for String {
    fn from(serial: Serial) -> Self {
        serial.0
    }
}

impl AsRef<str> for Serial {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
