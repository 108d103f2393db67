// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device records owned by the coordinator.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::capabilities::{CapabilityResolver, CapabilitySet};
use crate::cloud::{DeviceDescriptor, FirmwareMetadata};
use crate::connection::{Channel, ConnectionState};
use crate::event::DeviceEvent;
use crate::firmware::{FirmwareOutcome, FirmwareStateMachine, FirmwareUpdatePhase, StatusClassifier};
use crate::state::{LiveState, PropertyUpdate};
use crate::types::{DeviceCategory, Serial};

use super::snapshot::{DeviceSnapshot, FirmwareSnapshot};

/// Longest payload excerpt kept in a diagnostic.
const PAYLOAD_EXCERPT: usize = 256;

/// A value changed locally before the cloud confirmed it.
///
/// `desired` holds the locally requested value until a refresh reports the
/// same `confirmed` value. A refresh reporting something else keeps both and
/// flags the divergence rather than silently picking one.
///
/// # Examples
///
/// ```
/// use airstate::coordinator::Reconciled;
///
/// let mut auto_update = Reconciled::confirmed(false);
/// auto_update.request(true);
/// assert_eq!(auto_update.value(), Some(true));
/// assert!(auto_update.is_pending());
///
/// // the cloud still reports the old value
/// assert!(auto_update.reconcile(false));
/// assert!(auto_update.is_divergent());
///
/// // and later catches up
/// assert!(!auto_update.reconcile(true));
/// assert!(!auto_update.is_pending());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Reconciled<T> {
    desired: Option<T>,
    confirmed: Option<T>,
    divergent: bool,
}

impl<T: Copy + PartialEq> Reconciled<T> {
    /// Creates a value with nothing known yet.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            desired: None,
            confirmed: None,
            divergent: false,
        }
    }

    /// Creates a value the cloud already confirmed.
    #[must_use]
    pub fn confirmed(value: T) -> Self {
        Self {
            desired: None,
            confirmed: Some(value),
            divergent: false,
        }
    }

    /// The value the host asked for and the cloud has not confirmed yet.
    #[must_use]
    pub fn desired(&self) -> Option<T> {
        self.desired
    }

    /// The last value reported by the cloud.
    #[must_use]
    pub fn confirmed_value(&self) -> Option<T> {
        self.confirmed
    }

    /// The effective value: the pending request if any, else the confirmed
    /// value.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.desired.or(self.confirmed)
    }

    /// Returns true while a request waits for confirmation.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.desired.is_some()
    }

    /// Returns true if the last refresh disagreed with a pending request.
    #[must_use]
    pub fn is_divergent(&self) -> bool {
        self.divergent
    }

    /// Records a local request. Returns true if the effective value changed.
    pub fn request(&mut self, value: T) -> bool {
        let before = self.value();
        if self.confirmed == Some(value) {
            self.desired = None;
        } else {
            self.desired = Some(value);
        }
        self.divergent = false;
        before != self.value()
    }

    /// Drops a pending request after the cloud refused it.
    pub fn revert(&mut self) -> bool {
        let before = *self;
        self.desired = None;
        self.divergent = false;
        before != *self
    }

    /// Records the value reported by a refresh. Returns true if a pending
    /// request disagrees with it.
    pub fn reconcile(&mut self, confirmed: T) -> bool {
        self.confirmed = Some(confirmed);
        if self.desired == Some(confirmed) {
            self.desired = None;
        }
        self.divergent = self.desired.is_some();
        self.divergent
    }
}

/// What a diagnostic is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A bus message the codec does not interpret.
    UnrecognizedMessage,
    /// A firmware status token missing from the classification table.
    UnrecognizedFirmwareToken,
    /// A known firmware token that did not fit the current cycle.
    OutOfCycleFirmwareToken,
    /// A firmware token held back for a trigger that then failed.
    DroppedFirmwareToken,
    /// A refresh disagreed with a pending local change.
    Divergence,
}

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// When it was recorded.
    pub at: DateTime<Utc>,
    /// What it is about.
    pub kind: DiagnosticKind,
    /// Human-readable detail (token, topic, payload excerpt).
    pub detail: String,
}

impl Diagnostic {
    /// Creates a record timestamped now.
    #[must_use]
    pub fn new(kind: DiagnosticKind, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Everything the coordinator knows about one device.
pub(crate) struct Device {
    serial: Serial,
    name: String,
    category: DeviceCategory,
    topic_root: String,
    capabilities: Arc<CapabilitySet>,
    cloud: ConnectionState,
    bus: ConnectionState,
    live: LiveState,
    firmware_version: Option<String>,
    available_version: Option<String>,
    update_available: Option<bool>,
    auto_update: Reconciled<bool>,
    machine: FirmwareStateMachine,
    diagnostics: VecDeque<Diagnostic>,
    diagnostics_capacity: usize,
    revision: u64,
    generation: u64,
    watch: watch::Sender<DeviceSnapshot>,
}

impl Device {
    pub(crate) fn new(
        descriptor: &DeviceDescriptor,
        capabilities: CapabilitySet,
        classifier: Arc<StatusClassifier>,
        diagnostics_capacity: usize,
    ) -> Self {
        let diagnostics_capacity = diagnostics_capacity.max(1);
        let placeholder = DeviceSnapshot::placeholder(descriptor.serial.clone());
        let (watch, _) = watch::channel(placeholder);
        let mut device = Self {
            serial: descriptor.serial.clone(),
            name: display_name(descriptor),
            category: descriptor.category.clone(),
            topic_root: descriptor.topic_root.clone(),
            capabilities: Arc::new(capabilities),
            cloud: ConnectionState::Disconnected,
            bus: ConnectionState::Disconnected,
            live: LiveState::new(),
            firmware_version: descriptor.firmware_version.clone(),
            available_version: None,
            update_available: descriptor.update_available,
            auto_update: descriptor
                .auto_update
                .map_or_else(Reconciled::unknown, Reconciled::confirmed),
            machine: FirmwareStateMachine::new(classifier),
            diagnostics: VecDeque::with_capacity(diagnostics_capacity),
            diagnostics_capacity,
            revision: 0,
            generation: 0,
            watch,
        };
        device.watch.send_replace(device.snapshot());
        device
    }

    pub(crate) fn serial(&self) -> &Serial {
        &self.serial
    }

    pub(crate) fn topic_root(&self) -> &str {
        &self.topic_root
    }

    pub(crate) fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub(crate) fn state(&self, channel: Channel) -> ConnectionState {
        match channel {
            Channel::Cloud => self.cloud,
            Channel::Bus => self.bus,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Invalidates in-flight cloud results.
    pub(crate) fn bump_generation(&mut self) {
        self.generation += 1;
    }

    pub(crate) fn machine_mut(&mut self) -> &mut FirmwareStateMachine {
        &mut self.machine
    }

    pub(crate) fn auto_update_mut(&mut self) -> &mut Reconciled<bool> {
        &mut self.auto_update
    }

    pub(crate) fn watch(&self) -> watch::Receiver<DeviceSnapshot> {
        self.watch.subscribe()
    }

    pub(crate) fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            serial: self.serial.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            topic_root: self.topic_root.clone(),
            revision: self.revision,
            capabilities: (*self.capabilities).clone(),
            cloud: self.cloud,
            bus: self.bus,
            live: self.live.clone(),
            firmware: FirmwareSnapshot {
                version: self.firmware_version.clone(),
                available_version: self.available_version.clone(),
                update_available: self.update_available,
                auto_update: self.auto_update,
                phase: self.machine.phase(),
                last_token: self.machine.last_token().map(ToString::to_string),
            },
            diagnostics: self.diagnostics.iter().cloned().collect(),
        }
    }

    /// Bumps the revision and publishes the new snapshot to `watch`
    /// receivers.
    pub(crate) fn commit(&mut self) -> DeviceSnapshot {
        self.revision += 1;
        let snapshot = self.snapshot();
        self.watch.send_replace(snapshot.clone());
        snapshot
    }

    pub(crate) fn record(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(
            serial = %self.serial,
            kind = ?diagnostic.kind,
            detail = %diagnostic.detail,
            "Device diagnostic recorded"
        );
        while self.diagnostics.len() >= self.diagnostics_capacity {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(diagnostic);
    }

    /// Applies one event. Returns true if anything visible changed.
    pub(crate) fn apply(&mut self, event: DeviceEvent, resolver: &CapabilityResolver) -> bool {
        let mut changed = self.machine.observe_event();

        changed |= match event {
            DeviceEvent::PropertyUpdate(update) => self.apply_properties(&update),
            DeviceEvent::FirmwareStatus { token, version } => {
                let outcome = self.machine.apply_status(&token);
                self.apply_firmware_outcome(outcome, version)
            }
            DeviceEvent::Unrecognized { topic, payload } => {
                let excerpt = excerpt(&payload);
                self.record(Diagnostic::new(
                    DiagnosticKind::UnrecognizedMessage,
                    format!("{topic}: {excerpt}"),
                ));
                true
            }
            DeviceEvent::Connection {
                channel,
                state,
                explicit,
            } => self.apply_connection(channel, state, explicit),
            DeviceEvent::Rediscovered {
                descriptor,
                firmware,
            } => self.apply_descriptor(&descriptor, firmware.as_ref(), resolver),
        };

        changed
    }

    fn apply_properties(&mut self, update: &PropertyUpdate) -> bool {
        self.live.apply(update)
    }

    /// Records the outcome of a status token. Returns true if anything
    /// visible changed.
    pub(crate) fn apply_firmware_outcome(
        &mut self,
        outcome: FirmwareOutcome,
        version: Option<String>,
    ) -> bool {
        match outcome {
            FirmwareOutcome::Advanced { from, to } => {
                tracing::info!(serial = %self.serial, %from, %to, "Firmware update advanced");
                if to == FirmwareUpdatePhase::Completed {
                    if let Some(version) = version.or_else(|| self.available_version.take()) {
                        self.firmware_version = Some(version);
                    }
                    self.available_version = None;
                    self.update_available = Some(false);
                } else if let Some(version) = version {
                    self.available_version = Some(version);
                }
                true
            }
            FirmwareOutcome::Unrecognized { token } => {
                tracing::warn!(serial = %self.serial, token = %token, "Unrecognized firmware status");
                self.record(Diagnostic::new(
                    DiagnosticKind::UnrecognizedFirmwareToken,
                    token,
                ));
                true
            }
            FirmwareOutcome::OutOfCycle { token, phase } => {
                tracing::debug!(serial = %self.serial, token = %token, %phase, "Firmware status out of cycle");
                self.record(Diagnostic::new(
                    DiagnosticKind::OutOfCycleFirmwareToken,
                    format!("{token} while {phase}"),
                ));
                true
            }
            FirmwareOutcome::Buffered { token } => {
                tracing::debug!(serial = %self.serial, token = %token, "Firmware status held until trigger resolves");
                // the held token is already visible as last_token
                true
            }
        }
    }

    fn apply_connection(&mut self, channel: Channel, next: ConnectionState, explicit: bool) -> bool {
        let current = self.state(channel);
        if current == next {
            return false;
        }
        if !current.can_transition_to(&next, explicit) {
            tracing::warn!(
                serial = %self.serial,
                %channel,
                from = %current,
                to = %next,
                "Ignoring invalid connection transition"
            );
            return false;
        }

        tracing::debug!(serial = %self.serial, %channel, from = %current, to = %next, "Connection state changed");
        match channel {
            Channel::Cloud => self.cloud = next,
            Channel::Bus => self.bus = next,
        }
        true
    }

    fn apply_descriptor(
        &mut self,
        descriptor: &DeviceDescriptor,
        firmware: Option<&FirmwareMetadata>,
        resolver: &CapabilityResolver,
    ) -> bool {
        let mut changed = false;

        if descriptor.category != self.category {
            tracing::warn!(
                serial = %self.serial,
                known = %self.category,
                reported = %descriptor.category,
                "Ignoring category change on rediscovery"
            );
        }
        if descriptor.topic_root != self.topic_root {
            tracing::warn!(
                serial = %self.serial,
                known = %self.topic_root,
                reported = %descriptor.topic_root,
                "Ignoring topic root change on rediscovery"
            );
        }

        let name = display_name(descriptor);
        if name != self.name {
            self.name = name;
            changed = true;
        }

        let capabilities =
            resolver.resolve(&descriptor.capabilities, [self.category.as_str()]);
        if capabilities != *self.capabilities {
            let dropped: Vec<&'static str> = self
                .capabilities
                .missing_from(&capabilities)
                .flat_map(|feature| feature.owned_properties().iter().copied())
                .collect();
            if self.live.prune(&dropped) {
                tracing::info!(serial = %self.serial, properties = ?dropped, "Pruned properties of dropped features");
            }
            self.capabilities = Arc::new(capabilities);
            changed = true;
        }

        let version = firmware
            .map(|f| f.version.clone())
            .or_else(|| descriptor.firmware_version.clone());
        if version.is_some() && version != self.firmware_version {
            self.firmware_version = version;
            changed = true;
        }

        let update_available = firmware
            .map(|f| f.update_available)
            .or(descriptor.update_available);
        if update_available.is_some() && update_available != self.update_available {
            self.update_available = update_available;
            changed = true;
        }

        if let Some(available) = firmware.and_then(|f| f.available_version.clone()) {
            if self.available_version.as_ref() != Some(&available) {
                self.available_version = Some(available);
                changed = true;
            }
        }

        let auto_update = firmware.map(|f| f.auto_update).or(descriptor.auto_update);
        if let Some(confirmed) = auto_update {
            let before = self.auto_update;
            if self.auto_update.reconcile(confirmed) {
                tracing::warn!(
                    serial = %self.serial,
                    desired = ?self.auto_update.desired(),
                    confirmed,
                    "Auto-update setting diverges from cloud"
                );
                if !before.is_divergent() {
                    self.record(Diagnostic::new(
                        DiagnosticKind::Divergence,
                        format!(
                            "auto_update desired {:?}, cloud reports {confirmed}",
                            self.auto_update.desired()
                        ),
                    ));
                }
            }
            changed |= before != self.auto_update;
        }

        changed
    }
}

fn display_name(descriptor: &DeviceDescriptor) -> String {
    if descriptor.name.trim().is_empty() {
        descriptor.serial.to_string()
    } else {
        descriptor.name.clone()
    }
}

fn excerpt(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    match text.char_indices().nth(PAYLOAD_EXCERPT) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.into_owned(),
    }
}
