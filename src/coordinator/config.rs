// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Coordinator configuration and builder.

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::capabilities::CapabilityTable;
use crate::cloud::{CloudApi, Credentials};
use crate::connection::{ConnectionConfig, ReconnectionPolicy, Timeouts};
use crate::firmware::StatusClassifier;

use super::Coordinator;

/// Default number of diagnostics kept per device.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 32;

/// Default number of directory fetch attempts per refresh.
pub const DEFAULT_REFRESH_ATTEMPTS: u32 = 3;

/// Coordinator-wide settings.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use airstate::coordinator::CoordinatorConfig;
/// use airstate::connection::ReconnectionPolicy;
///
/// let config = CoordinatorConfig::default()
///     .with_policy(ReconnectionPolicy::new().with_max_attempts(3))
///     .with_diagnostics_capacity(64)
///     .with_local_only(true);
/// assert_eq!(config.diagnostics_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Reconnection, timeouts and local-only mode.
    pub connection: ConnectionConfig,
    /// Capability vocabulary.
    pub capability_table: CapabilityTable,
    /// Firmware status vocabulary.
    pub status_classifier: StatusClassifier,
    /// Diagnostics kept per device; older entries are dropped.
    pub diagnostics_capacity: usize,
    /// Directory fetch attempts per refresh when the transport fails.
    pub refresh_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            capability_table: CapabilityTable::default(),
            status_classifier: StatusClassifier::default(),
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
            refresh_attempts: DEFAULT_REFRESH_ATTEMPTS,
        }
    }
}

impl CoordinatorConfig {
    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectionPolicy) -> Self {
        self.connection.policy = policy;
        self
    }

    /// Sets the network timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.connection.timeouts = timeouts;
        self
    }

    /// Lets the bus connect without waiting for the cloud.
    #[must_use]
    pub fn with_local_only(mut self, local_only: bool) -> Self {
        self.connection.local_only = local_only;
        self
    }

    /// Sets the capability vocabulary.
    #[must_use]
    pub fn with_capability_table(mut self, table: CapabilityTable) -> Self {
        self.capability_table = table;
        self
    }

    /// Sets the firmware status vocabulary.
    #[must_use]
    pub fn with_status_classifier(mut self, classifier: StatusClassifier) -> Self {
        self.status_classifier = classifier;
        self
    }

    /// Sets how many diagnostics each device keeps (minimum 1).
    #[must_use]
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity.max(1);
        self
    }

    /// Sets how many times a refresh fetches the directory before giving up
    /// (minimum 1).
    #[must_use]
    pub fn with_refresh_attempts(mut self, attempts: u32) -> Self {
        self.refresh_attempts = attempts.max(1);
        self
    }
}

/// Builder for a [`Coordinator`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use airstate::Coordinator;
/// use airstate::bus::MqttBus;
/// use airstate::cloud::{Credentials, HttpCloudClient, HttpCloudConfig};
///
/// # async fn example() -> airstate::Result<()> {
/// let cloud = HttpCloudClient::new(HttpCloudConfig::new("https://api.example.com"))?;
/// let bus = MqttBus::builder().host("192.168.1.50").build().await?;
///
/// let coordinator = Coordinator::builder(
///     Arc::new(cloud),
///     Arc::new(bus),
///     Credentials::new("me@example.com", "secret"),
/// )
/// .with_diagnostics_capacity(16)
/// .build();
/// # Ok(())
/// # }
/// ```
pub struct CoordinatorBuilder {
    pub(super) cloud: Arc<dyn CloudApi>,
    pub(super) bus: Arc<dyn MessageBus>,
    pub(super) credentials: Credentials,
    pub(super) config: CoordinatorConfig,
}

impl std::fmt::Debug for CoordinatorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorBuilder")
            .field("credentials", &self.credentials)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CoordinatorBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        bus: Arc<dyn MessageBus>,
        credentials: Credentials,
    ) -> Self {
        Self {
            cloud,
            bus,
            credentials,
            config: CoordinatorConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectionPolicy) -> Self {
        self.config = self.config.with_policy(policy);
        self
    }

    /// Sets the network timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config = self.config.with_timeouts(timeouts);
        self
    }

    /// Lets the bus connect without waiting for the cloud.
    #[must_use]
    pub fn with_local_only(mut self, local_only: bool) -> Self {
        self.config = self.config.with_local_only(local_only);
        self
    }

    /// Sets the capability vocabulary.
    #[must_use]
    pub fn with_capability_table(mut self, table: CapabilityTable) -> Self {
        self.config = self.config.with_capability_table(table);
        self
    }

    /// Sets the firmware status vocabulary.
    #[must_use]
    pub fn with_status_classifier(mut self, classifier: StatusClassifier) -> Self {
        self.config = self.config.with_status_classifier(classifier);
        self
    }

    /// Sets how many diagnostics each device keeps.
    #[must_use]
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_diagnostics_capacity(capacity);
        self
    }

    /// Builds the coordinator. Nothing connects until devices are
    /// registered and connected.
    #[must_use]
    pub fn build(self) -> Coordinator {
        Coordinator::from_builder(self)
    }
}
