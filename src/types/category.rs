// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Product category tag.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Product category reported by the cloud directory.
///
/// The raw tag is kept (lower-cased) so unknown categories survive a round
/// trip; [`kind`](Self::kind) classifies the known ones.
///
/// # Examples
///
/// ```
/// use airstate::types::{CategoryKind, DeviceCategory};
///
/// let category = DeviceCategory::new("EC");
/// assert_eq!(category.as_str(), "ec");
/// assert_eq!(category.kind(), CategoryKind::EnvironmentCleaner);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DeviceCategory(String);

/// Known product families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoryKind {
    /// Fans, purifiers, heaters and humidifiers.
    EnvironmentCleaner,
    /// Floor cleaning robots.
    Robot,
    /// Connected lamps.
    Light,
    /// Anything else.
    Other,
}

impl DeviceCategory {
    /// Creates a category from a raw tag, normalizing case and whitespace.
    #[must_use]
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_ascii_lowercase())
    }

    /// Returns the normalized tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classifies the tag.
    #[must_use]
    pub fn kind(&self) -> CategoryKind {
        match self.0.as_str() {
            "ec" => CategoryKind::EnvironmentCleaner,
            "robot" | "flrc" => CategoryKind::Robot,
            "light" => CategoryKind::Light,
            _ => CategoryKind::Other,
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceCategory {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for DeviceCategory {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<DeviceCategory> for String {
    fn from(category: DeviceCategory) -> Self {
        category.0
    }
}
