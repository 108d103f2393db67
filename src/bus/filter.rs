// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic filter matching.

/// Returns true if `topic` matches the MQTT `filter`.
///
/// `+` matches exactly one level and `#` matches the remaining levels
/// (including none) when it is the last level of the filter.
///
/// # Examples
///
/// ```
/// use airstate::bus::topic_matches;
///
/// assert!(topic_matches("438/ABC/status/+", "438/ABC/status/current"));
/// assert!(topic_matches("438/#", "438/ABC/status/current"));
/// assert!(!topic_matches("438/ABC/status/+", "438/ABC/command"));
/// ```
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/+", "a/"));
        assert!(!topic_matches("a/+", "a/b/c"));
        assert!(!topic_matches("+", "a/b"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("#", "a/b/c"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(!topic_matches("a/#/c", "a/b/c"));
        assert!(!topic_matches("b/#", "a/b"));
    }
}
