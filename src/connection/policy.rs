// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retry and timeout configuration.

use std::time::Duration;

/// Configuration for automatic reconnection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use airstate::connection::ReconnectionPolicy;
///
/// // Default policy (enabled with exponential backoff)
/// let policy = ReconnectionPolicy::default();
///
/// // Disable reconnection
/// let policy = ReconnectionPolicy::disabled();
///
/// // Custom policy
/// let policy = ReconnectionPolicy::new()
///     .with_max_attempts(5)
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(30))
///     .with_jitter(Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Whether automatic reconnection is enabled.
    pub enabled: bool,
    /// Attempts per connect cycle before giving up (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of the exponential delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f32,
    /// Upper bound of the random delay added to each wait.
    pub jitter: Duration,
}

impl ReconnectionPolicy {
    /// Creates a new reconnection policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that never retries: one attempt per cycle.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the attempt ceiling per connect cycle.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Retries forever.
    #[must_use]
    pub fn with_unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum exponential delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter bound. Zero disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculates the delay before retry number `retry` (0-based), without
    /// jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let multiplier = self
            .backoff_multiplier
            .powi(i32::try_from(retry).unwrap_or(i32::MAX));

        // Safe: initial_delay is seconds/minutes, not near u128 max
        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay.as_millis() as f32 * multiplier;

        // Saturating float to int cast; inf maps to u64::MAX
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay)
    }

    /// Calculates the delay before retry number `retry` with random jitter
    /// added.
    #[must_use]
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let base = self.delay_for_attempt(retry);
        let bound = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if bound == 0 {
            return base;
        }
        base + Duration::from_millis(rand::random_range(0..=bound))
    }

    /// Returns true if another attempt should be made after `failures`
    /// consecutive failures in the current cycle.
    #[must_use]
    pub fn should_retry(&self, failures: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| failures < max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(10),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(500),
        }
    }
}

/// Per-operation-class network timeouts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use airstate::connection::Timeouts;
///
/// let timeouts = Timeouts::default().with_publish(Duration::from_secs(2));
/// assert_eq!(timeouts.publish, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Cloud authentication.
    pub auth: Duration,
    /// Cloud directory and metadata calls.
    pub fetch: Duration,
    /// Bus subscription.
    pub subscribe: Duration,
    /// Bus publish.
    pub publish: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            auth: Duration::from_secs(15),
            fetch: Duration::from_secs(10),
            subscribe: Duration::from_secs(10),
            publish: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    /// Sets the authentication timeout.
    #[must_use]
    pub fn with_auth(mut self, timeout: Duration) -> Self {
        self.auth = timeout;
        self
    }

    /// Sets the cloud fetch timeout.
    #[must_use]
    pub fn with_fetch(mut self, timeout: Duration) -> Self {
        self.fetch = timeout;
        self
    }

    /// Sets the bus subscribe timeout.
    #[must_use]
    pub fn with_subscribe(mut self, timeout: Duration) -> Self {
        self.subscribe = timeout;
        self
    }

    /// Sets the bus publish timeout.
    #[must_use]
    pub fn with_publish(mut self, timeout: Duration) -> Self {
        self.publish = timeout;
        self
    }
}
