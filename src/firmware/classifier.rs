// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;

use super::FirmwareUpdatePhase;

const ACKNOWLEDGED: &str = "acknowledged";
const DOWNLOADED: &str = "downloaded";

const DEFAULT_COMPLETION: &[&str] = &["completed", "complete", "installed", "success", "done"];
const DEFAULT_FAILURE: &[&str] = &["failed", "failure", "error", "aborted", "rejected"];

/// Maps firmware status tokens to the phase they report.
///
/// `acknowledged` and `downloaded` are fixed. Completion and failure
/// vocabularies vary between firmware releases, so both lists can be
/// extended. A token in neither list is never classified.
///
/// # Examples
///
/// ```
/// use airstate::firmware::{FirmwareUpdatePhase, StatusClassifier};
///
/// let classifier = StatusClassifier::default().with_completion("flashed");
/// assert_eq!(classifier.classify("FLASHED"), Some(FirmwareUpdatePhase::Completed));
/// assert_eq!(classifier.classify("error"), Some(FirmwareUpdatePhase::Failed));
/// assert_eq!(classifier.classify("verifying"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusClassifier {
    completion: BTreeSet<String>,
    failure: BTreeSet<String>,
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self {
            completion: DEFAULT_COMPLETION.iter().map(ToString::to_string).collect(),
            failure: DEFAULT_FAILURE.iter().map(ToString::to_string).collect(),
        }
    }
}

impl StatusClassifier {
    /// Creates a classifier that only knows `acknowledged` and `downloaded`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            completion: BTreeSet::new(),
            failure: BTreeSet::new(),
        }
    }

    /// Adds a completion token. The token is removed from the failure list.
    #[must_use]
    pub fn with_completion(mut self, token: &str) -> Self {
        let token = normalize(token);
        self.failure.remove(&token);
        self.completion.insert(token);
        self
    }

    /// Adds a failure token. The token is removed from the completion list.
    #[must_use]
    pub fn with_failure(mut self, token: &str) -> Self {
        let token = normalize(token);
        self.completion.remove(&token);
        self.failure.insert(token);
        self
    }

    /// Returns the phase a token reports, or `None` if it is unknown.
    #[must_use]
    pub fn classify(&self, token: &str) -> Option<FirmwareUpdatePhase> {
        let token = normalize(token);
        match token.as_str() {
            ACKNOWLEDGED => Some(FirmwareUpdatePhase::Acknowledged),
            DOWNLOADED => Some(FirmwareUpdatePhase::Downloaded),
            t if self.completion.contains(t) => Some(FirmwareUpdatePhase::Completed),
            t if self.failure.contains(t) => Some(FirmwareUpdatePhase::Failed),
            _ => None,
        }
    }
}

pub(crate) fn normalize(token: &str) -> String {
    token.trim().to_lowercase()
}
