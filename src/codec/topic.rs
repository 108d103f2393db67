// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus topic layout.

use crate::types::Serial;

/// A parsed `<root>/<serial>/status/<facet>` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTopic {
    /// Product type root.
    pub root: String,
    /// Device serial.
    pub serial: Serial,
    /// Payload kind (`current`, `state`, `software`, ...).
    pub facet: String,
}

impl StatusTopic {
    /// Parses a status topic, returning `None` for anything else.
    ///
    /// # Examples
    ///
    /// ```
    /// use airstate::codec::StatusTopic;
    ///
    /// let topic = StatusTopic::parse("438/ABC-1/status/software").unwrap();
    /// assert_eq!(topic.root, "438");
    /// assert_eq!(topic.serial.as_str(), "ABC-1");
    /// assert_eq!(topic.facet, "software");
    ///
    /// assert!(StatusTopic::parse("438/ABC-1/command").is_none());
    /// ```
    #[must_use]
    pub fn parse(topic: &str) -> Option<Self> {
        let mut parts = topic.split('/');
        let root = parts.next()?;
        let serial = parts.next()?;
        let status = parts.next()?;
        let facet = parts.next()?;
        if parts.next().is_some() || status != "status" || root.is_empty() || facet.is_empty() {
            return None;
        }
        let serial = Serial::new(serial).ok()?;
        Some(Self {
            root: root.to_string(),
            serial,
            facet: facet.to_string(),
        })
    }
}

/// Returns true if `root` can be used as a single topic level.
///
/// ```
/// use airstate::codec::is_valid_root;
///
/// assert!(is_valid_root("438"));
/// assert!(!is_valid_root("438/+"));
/// assert!(!is_valid_root("#"));
/// ```
#[must_use]
pub fn is_valid_root(root: &str) -> bool {
    !root.is_empty()
        && !root
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '+' | '#'))
}

/// Builds the topic a device listens on for commands.
#[must_use]
pub fn command_topic(root: &str, serial: &Serial) -> String {
    format!("{root}/{serial}/command")
}

/// Builds the subscription filter covering every status facet of a device.
#[must_use]
pub fn status_filter(root: &str, serial: &Serial) -> String {
    format!("{root}/{serial}/status/+")
}

/// Builds a concrete status topic.
#[must_use]
pub fn status_topic(root: &str, serial: &Serial, facet: &str) -> String {
    format!("{root}/{serial}/status/{facet}")
}
