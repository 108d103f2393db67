// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device state coordinator.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::bus::MessageBus;
use crate::capabilities::{CapabilityResolver, CapabilitySet};
use crate::cloud::{CloudApi, Credentials, DeviceDescriptor, FirmwareMetadata};
use crate::codec::{Command, StatusTopic, command_topic, decode, is_valid_root, status_filter};
use crate::connection::{
    Channel, ConnectionManager, ConnectionObserver, ConnectionTarget, ConnectionTransition,
    SharedSession,
};
use crate::error::{ApiError, AuthError, CloudError, ConnectionError, Error, Result, ValueError};
use crate::event::DeviceEvent;
use crate::firmware::StatusClassifier;
use crate::subscription::{CallbackRegistry, SubscriptionId};
use crate::types::Serial;

use super::config::{CoordinatorBuilder, CoordinatorConfig};
use super::device::{Device, Diagnostic, DiagnosticKind};
use super::snapshot::DeviceSnapshot;

/// Owner of all device state.
///
/// The coordinator keeps one record per registered device, applies events
/// to it one at a time, and hands an immutable [`DeviceSnapshot`] to every
/// subscriber after each change. Events for the same device are strictly
/// serialized; different devices never block each other.
///
/// `Coordinator` is cheaply cloneable (via `Arc`).
///
/// # Callbacks
///
/// Subscriber callbacks run while the changed device is locked, which is
/// what guarantees they observe a device's changes in order. A callback must
/// not call back into the coordinator for the same device; everything it
/// needs is in the snapshot. Use [`watch_device`](Self::watch_device) to
/// consume changes from async code instead.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use airstate::Coordinator;
/// use airstate::bus::MqttBus;
/// use airstate::cloud::{Credentials, HttpCloudClient, HttpCloudConfig};
/// use airstate::codec::Command;
/// use airstate::types::FanSpeed;
///
/// #[tokio::main]
/// async fn main() -> airstate::Result<()> {
///     let cloud = HttpCloudClient::new(HttpCloudConfig::new("https://api.example.com"))?;
///     let bus = MqttBus::builder().host("192.168.1.50").build().await?;
///     let coordinator = Coordinator::builder(
///         Arc::new(cloud),
///         Arc::new(bus),
///         Credentials::new("me@example.com", "secret"),
///     )
///     .build();
///
///     coordinator.subscribe(|snapshot| {
///         println!("{} -> {:?}", snapshot.serial, snapshot.live.integer("speed"));
///     });
///
///     for snapshot in coordinator.discover().await? {
///         coordinator.connect(&snapshot.serial)?;
///     }
///
///     # let serial = airstate::types::Serial::new("NK6-EU-MHA0000A")?;
///     coordinator
///         .send_command(&serial, Command::SetSpeed(FanSpeed::new(5)?))
///         .await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoordinatorConfig,
    resolver: CapabilityResolver,
    classifier: Arc<StatusClassifier>,
    cloud: Arc<dyn CloudApi>,
    bus: Arc<dyn MessageBus>,
    session: Arc<SharedSession>,
    devices: RwLock<HashMap<Serial, Arc<Mutex<Device>>>>,
    callbacks: CallbackRegistry,
    connections: ConnectionManager,
}

/// Forwards connection reports to the coordinator without keeping it alive.
struct Observer(Weak<Inner>);

impl ConnectionObserver for Observer {
    fn on_transition(&self, transition: ConnectionTransition) {
        if let Some(inner) = self.0.upgrade() {
            let serial = transition.serial.clone();
            inner.apply_logged(&serial, DeviceEvent::from(transition));
        }
    }

    fn on_message(&self, serial: &Serial, topic: &str, payload: &[u8]) {
        if let Some(inner) = self.0.upgrade() {
            inner.handle_message(serial, topic, payload);
        }
    }

    fn is_closed(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("devices", &self.inner.devices.read().len())
            .field("callbacks", &self.inner.callbacks)
            .field("session", &self.inner.session)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Creates a builder.
    #[must_use]
    pub fn builder(
        cloud: Arc<dyn CloudApi>,
        bus: Arc<dyn MessageBus>,
        credentials: Credentials,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder::new(cloud, bus, credentials)
    }

    pub(super) fn from_builder(builder: CoordinatorBuilder) -> Self {
        let CoordinatorBuilder {
            cloud,
            bus,
            credentials,
            config,
        } = builder;

        let session = Arc::new(SharedSession::new(
            Arc::clone(&cloud),
            credentials,
            config.connection.timeouts.auth,
        ));

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let connections = ConnectionManager::new(
                Arc::clone(&session),
                Arc::clone(&bus),
                Arc::new(Observer(weak.clone())),
                config.connection.clone(),
            );
            Inner {
                resolver: CapabilityResolver::new(config.capability_table.clone()),
                classifier: Arc::new(config.status_classifier.clone()),
                config,
                cloud,
                bus,
                session,
                devices: RwLock::new(HashMap::new()),
                callbacks: CallbackRegistry::new(),
                connections,
            }
        });

        Self { inner }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Returns the shared cloud session.
    #[must_use]
    pub fn session(&self) -> &Arc<SharedSession> {
        &self.inner.session
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Registers a callback receiving a snapshot after every change to any
    /// device.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceSnapshot) + Send + Sync + 'static,
    {
        self.inner.callbacks.on_snapshot(callback)
    }

    /// Registers a callback receiving the serial of every removed device.
    pub fn on_device_removed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Serial) + Send + Sync + 'static,
    {
        self.inner.callbacks.on_removed(callback)
    }

    /// Removes a callback. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.callbacks.unsubscribe(id)
    }

    /// Returns the number of registered callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.callbacks.callback_count()
    }

    /// Returns a receiver that always holds the device's latest snapshot.
    #[must_use]
    pub fn watch_device(&self, serial: &Serial) -> Option<watch::Receiver<DeviceSnapshot>> {
        self.inner.device(serial).ok().map(|d| d.lock().watch())
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Inserts a device, or refreshes an existing one from a new descriptor.
    ///
    /// Replacing keeps live properties, except those owned by features the
    /// new descriptor no longer grants. Connection states and the firmware
    /// phase are kept.
    pub fn register_device(&self, descriptor: DeviceDescriptor) -> DeviceSnapshot {
        if let Ok(device) = self.inner.device(&descriptor.serial) {
            return self.inner.rediscover(&device, descriptor, None);
        }

        let capabilities = self
            .inner
            .resolver
            .resolve(&descriptor.capabilities, [descriptor.category.as_str()]);
        let fresh = Device::new(
            &descriptor,
            capabilities,
            Arc::clone(&self.inner.classifier),
            self.inner.config.diagnostics_capacity,
        );

        let mut devices = self.inner.devices.write();
        match devices.entry(descriptor.serial.clone()) {
            Entry::Occupied(entry) => {
                let device = Arc::clone(entry.get());
                drop(devices);
                self.inner.rediscover(&device, descriptor, None)
            }
            Entry::Vacant(entry) => {
                let device = Arc::clone(entry.insert(Arc::new(Mutex::new(fresh))));
                drop(devices);

                let mut device = device.lock();
                tracing::info!(
                    serial = %descriptor.serial,
                    name = %descriptor.name,
                    category = %descriptor.category,
                    features = ?device.capabilities().features().collect::<Vec<_>>(),
                    "Device registered"
                );
                self.inner.publish(&mut device)
            }
        }
    }

    /// Disconnects and forgets a device. Returns `false` if it was unknown.
    pub async fn remove_device(&self, serial: &Serial) -> bool {
        let Ok(device) = self.inner.device(serial) else {
            return false;
        };
        device.lock().bump_generation();
        self.inner.connections.forget(serial).await;

        let removed = self.inner.devices.write().remove(serial).is_some();
        if removed {
            tracing::info!(serial = %serial, "Device removed");
            self.inner.callbacks.dispatch_removed(serial);
        }
        removed
    }

    /// Applies an event to a device and notifies subscribers if anything
    /// changed.
    ///
    /// Returns whether the device changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not registered.
    pub fn apply_event(&self, serial: &Serial, event: DeviceEvent) -> Result<bool> {
        self.inner.apply(serial, event)
    }

    /// Returns the current snapshot of a device.
    #[must_use]
    pub fn snapshot(&self, serial: &Serial) -> Option<DeviceSnapshot> {
        self.inner.device(serial).ok().map(|d| d.lock().snapshot())
    }

    /// Returns snapshots of every device, ordered by serial.
    #[must_use]
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let devices: Vec<Arc<Mutex<Device>>> =
            self.inner.devices.read().values().cloned().collect();
        let mut snapshots: Vec<DeviceSnapshot> =
            devices.iter().map(|d| d.lock().snapshot()).collect();
        snapshots.sort_by(|a, b| a.serial.cmp(&b.serial));
        snapshots
    }

    /// Returns every registered serial, ordered.
    #[must_use]
    pub fn devices(&self) -> Vec<Serial> {
        let mut serials: Vec<Serial> = self.inner.devices.read().keys().cloned().collect();
        serials.sort();
        serials
    }

    /// Returns the capabilities of a device.
    #[must_use]
    pub fn capabilities(&self, serial: &Serial) -> Option<CapabilitySet> {
        self.inner
            .device(serial)
            .ok()
            .map(|d| d.lock().capabilities().clone())
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Starts connecting a device's cloud and bus channels.
    ///
    /// Returns `false` if the device is already connecting or connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not registered, or
    /// [`ValueError::InvalidTopicRoot`] if its topic root is not a single
    /// topic level.
    pub fn connect(&self, serial: &Serial) -> Result<bool> {
        let target = self.inner.target(serial)?;
        Ok(self.inner.connections.connect(target))
    }

    /// Restarts a device's channels, resetting a `Failed` state.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn retry(&self, serial: &Serial) -> Result<()> {
        let target = self.inner.target(serial)?;
        self.inner.connections.retry(target).await;
        Ok(())
    }

    /// Disconnects a device. Idempotent.
    ///
    /// Cloud results still in flight for the device are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not registered.
    pub async fn disconnect(&self, serial: &Serial) -> Result<()> {
        let device = self.inner.device(serial)?;
        device.lock().bump_generation();
        self.inner.connections.disconnect(serial).await;
        Ok(())
    }

    // =========================================================================
    // Device Control
    // =========================================================================

    /// Publishes a command to a device.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The device is not registered
    /// - The device lacks the feature the command needs
    /// - The bus channel is not connected
    /// - Publishing fails or times out
    pub async fn send_command(&self, serial: &Serial, command: Command) -> Result<()> {
        let device = self.inner.device(serial)?;
        let topic = {
            let device = device.lock();
            if let Some(feature) = command.required_feature() {
                if !device.capabilities().has(feature) {
                    return Err(Error::CapabilityNotSupported {
                        serial: serial.to_string(),
                        feature: feature.name(),
                    });
                }
            }
            if !device.state(Channel::Bus).is_connected() {
                return Err(Error::NotConnected {
                    serial: serial.to_string(),
                    channel: Channel::Bus.name(),
                });
            }
            command_topic(device.topic_root(), serial)
        };

        let payload = command.encode();
        let timeout = self.inner.config.connection.timeouts.publish;
        tracing::debug!(serial = %serial, command = command.name(), topic = %topic, "Sending command");

        tokio::time::timeout(timeout, self.inner.bus.publish(&topic, payload))
            .await
            .map_err(|_| ConnectionError::timeout("publish", timeout))??;
        Ok(())
    }

    /// Asks the cloud to start a firmware update.
    ///
    /// On success the device enters the `Triggered` phase; status tokens
    /// that arrived while the request was in flight are applied right after.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The device is not registered or its cloud channel is not connected
    /// - An update is already running ([`StateConflict`](crate::error::StateConflict))
    /// - The cloud call fails
    pub async fn trigger_firmware_update(&self, serial: &Serial) -> Result<()> {
        let device = self.inner.device(serial)?;
        let generation = {
            let mut device = device.lock();
            self.inner.require_cloud(&device)?;
            device.machine_mut().begin_trigger()?;
            device.generation()
        };

        let result = self
            .inner
            .with_session(|cloud, session| async move {
                cloud.trigger_firmware_update(&session, serial).await
            })
            .await;

        let mut guard = device.lock();
        match result {
            Ok(ack) if guard.generation() == generation => {
                tracing::info!(serial = %serial, request_id = ?ack.request_id, "Firmware update triggered");
                for outcome in guard.machine_mut().confirm_trigger() {
                    guard.apply_firmware_outcome(outcome, None);
                }
                self.inner.publish(&mut guard);
                Ok(())
            }
            Ok(_) => {
                tracing::debug!(serial = %serial, "Discarding firmware trigger for disconnected device");
                self.inner.abort_trigger(&mut guard);
                Err(Error::NotConnected {
                    serial: serial.to_string(),
                    channel: Channel::Cloud.name(),
                })
            }
            Err(e) => {
                tracing::warn!(serial = %serial, error = %e, "Firmware trigger failed");
                self.inner.abort_trigger(&mut guard);
                drop(guard);
                self.inner.note_cloud_error(Some(serial), &e);
                Err(e.into())
            }
        }
    }

    /// Enables or disables automatic firmware updates.
    ///
    /// The new value is visible immediately as the desired value and stays
    /// pending until a [`refresh`](Self::refresh) confirms it. A cloud that
    /// does not implement the setting is logged and treated as success.
    ///
    /// # Errors
    ///
    /// Returns error if the device is not registered, its cloud channel is
    /// not connected, or the cloud call fails. On failure the pending value
    /// is dropped.
    pub async fn set_auto_update(&self, serial: &Serial, enabled: bool) -> Result<()> {
        let device = self.inner.device(serial)?;
        {
            let mut device = device.lock();
            self.inner.require_cloud(&device)?;
            if device.auto_update_mut().request(enabled) {
                self.inner.publish(&mut device);
            }
        }

        let result = self
            .inner
            .with_session(|cloud, session| async move {
                cloud.set_auto_update(&session, serial, enabled).await
            })
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(serial = %serial, enabled, "Auto-update change accepted");
                Ok(())
            }
            Err(CloudError::Api(ApiError::Unsupported { operation })) => {
                tracing::warn!(
                    serial = %serial,
                    enabled,
                    operation,
                    "Cloud does not support changing auto-update, keeping local value"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(serial = %serial, error = %e, "Auto-update change failed");
                {
                    let mut device = device.lock();
                    if device.auto_update_mut().revert() {
                        self.inner.publish(&mut device);
                    }
                }
                self.inner.note_cloud_error(Some(serial), &e);
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Cloud Refresh
    // =========================================================================

    /// Fetches a device's descriptor and firmware metadata again and applies
    /// them as a `Rediscovered` event.
    ///
    /// The directory fetch is retried on transport errors. If the device is
    /// disconnected or removed while the requests are in flight, the result
    /// is discarded and the current snapshot returned.
    ///
    /// # Errors
    ///
    /// Returns error if the device is unknown locally or in the cloud
    /// directory, or if the cloud calls fail.
    pub async fn refresh(&self, serial: &Serial) -> Result<DeviceSnapshot> {
        let device = self.inner.device(serial)?;
        let generation = device.lock().generation();

        let descriptors = match self.inner.list_devices().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                self.inner.note_cloud_error(Some(serial), &e);
                return Err(e.into());
            }
        };
        let descriptor = descriptors
            .into_iter()
            .find(|d| d.serial == *serial)
            .ok_or_else(|| Error::DeviceNotFound(serial.to_string()))?;

        let firmware = match self.inner.fetch_firmware(serial).await {
            Ok(firmware) => Some(firmware),
            Err(CloudError::Api(e)) => {
                tracing::warn!(serial = %serial, error = %e, "Firmware metadata unavailable");
                None
            }
            Err(e) => {
                self.inner.note_cloud_error(Some(serial), &e);
                return Err(e.into());
            }
        };

        if device.lock().generation() != generation {
            tracing::debug!(serial = %serial, "Discarding refresh result for disconnected device");
            return Ok(device.lock().snapshot());
        }
        Ok(self.inner.rediscover_at(&device, descriptor, firmware, generation))
    }

    /// Lists the account's devices and registers each of them.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be fetched.
    pub async fn discover(&self) -> Result<Vec<DeviceSnapshot>> {
        let descriptors = match self.inner.list_devices().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                self.inner.note_cloud_error(None, &e);
                return Err(e.into());
            }
        };
        tracing::info!(count = descriptors.len(), "Discovered devices");
        Ok(descriptors
            .into_iter()
            .map(|descriptor| self.register_device(descriptor))
            .collect())
    }
}

impl Inner {
    fn device(&self, serial: &Serial) -> Result<Arc<Mutex<Device>>> {
        self.devices
            .read()
            .get(serial)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(serial.to_string()))
    }

    fn target(&self, serial: &Serial) -> Result<ConnectionTarget> {
        let device = self.device(serial)?;
        let root = device.lock().topic_root().to_string();
        if !is_valid_root(&root) {
            return Err(ValueError::InvalidTopicRoot(root).into());
        }
        Ok(ConnectionTarget::new(
            serial.clone(),
            status_filter(&root, serial),
        ))
    }

    fn require_cloud(&self, device: &Device) -> Result<()> {
        if device.state(Channel::Cloud).is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected {
                serial: device.serial().to_string(),
                channel: Channel::Cloud.name(),
            })
        }
    }

    /// Bumps the revision and notifies subscribers. The device must be
    /// locked by the caller.
    fn publish(&self, device: &mut Device) -> DeviceSnapshot {
        let snapshot = device.commit();
        self.callbacks.dispatch_snapshot(&snapshot);
        snapshot
    }

    fn apply(&self, serial: &Serial, event: DeviceEvent) -> Result<bool> {
        let device = self.device(serial)?;
        let mut device = device.lock();
        let kind = event.kind();
        let changed = device.apply(event, &self.resolver);
        if changed {
            self.publish(&mut device);
        } else {
            tracing::trace!(serial = %serial, kind, "Event changed nothing");
        }
        Ok(changed)
    }

    fn apply_logged(&self, serial: &Serial, event: DeviceEvent) {
        if let Err(e) = self.apply(serial, event) {
            tracing::debug!(serial = %serial, error = %e, "Dropping event");
        }
    }

    fn handle_message(&self, serial: &Serial, topic: &str, payload: &[u8]) {
        if let Some(status) = StatusTopic::parse(topic) {
            if status.serial != *serial {
                tracing::warn!(
                    serial = %serial,
                    topic = %topic,
                    "Discarding message addressed to another device"
                );
                return;
            }
        }
        match decode(topic, payload) {
            Ok(inbound) => self.apply_logged(serial, DeviceEvent::from(inbound)),
            Err(failure) => {
                tracing::warn!(
                    serial = %serial,
                    topic = %topic,
                    error = %failure,
                    "Discarding malformed message"
                );
            }
        }
    }

    fn rediscover(
        &self,
        device: &Arc<Mutex<Device>>,
        descriptor: DeviceDescriptor,
        firmware: Option<FirmwareMetadata>,
    ) -> DeviceSnapshot {
        let mut device = device.lock();
        let event = DeviceEvent::Rediscovered {
            descriptor,
            firmware,
        };
        if device.apply(event, &self.resolver) {
            self.publish(&mut device)
        } else {
            device.snapshot()
        }
    }

    /// Like [`rediscover`](Self::rediscover), unless the generation moved
    /// on while the lock was released.
    fn rediscover_at(
        &self,
        device: &Arc<Mutex<Device>>,
        descriptor: DeviceDescriptor,
        firmware: Option<FirmwareMetadata>,
        generation: u64,
    ) -> DeviceSnapshot {
        let mut guard = device.lock();
        if guard.generation() != generation {
            return guard.snapshot();
        }
        let event = DeviceEvent::Rediscovered {
            descriptor,
            firmware,
        };
        if guard.apply(event, &self.resolver) {
            self.publish(&mut guard)
        } else {
            guard.snapshot()
        }
    }

    fn abort_trigger(&self, device: &mut Device) {
        let dropped = device.machine_mut().abort_trigger();
        if dropped.is_empty() {
            return;
        }
        for token in dropped {
            device.record(Diagnostic::new(DiagnosticKind::DroppedFirmwareToken, token));
        }
        self.publish(device);
    }

    /// Runs a cloud call with the shared session under the fetch timeout.
    async fn with_session<'a, T, F, Fut>(&'a self, call: F) -> std::result::Result<T, CloudError>
    where
        F: FnOnce(&'a Arc<dyn CloudApi>, Arc<crate::cloud::Session>) -> Fut,
        Fut: Future<Output = std::result::Result<T, CloudError>> + 'a,
    {
        let session = self.session.session().await?;
        let timeout = self.config.connection.timeouts.fetch;
        tokio::time::timeout(timeout, call(&self.cloud, session))
            .await
            .map_err(|_| CloudError::from(ConnectionError::timeout("fetch", timeout)))?
    }

    /// Lists devices, retrying transport failures.
    async fn list_devices(&self) -> std::result::Result<Vec<DeviceDescriptor>, CloudError> {
        let attempts = self.config.refresh_attempts.max(1);
        let mut attempt = 0;
        loop {
            let result = self
                .with_session(|cloud, session| async move { cloud.list_devices(&session).await })
                .await;
            match result {
                Err(CloudError::Connection(e)) if attempt + 1 < attempts => {
                    let delay = self.config.connection.policy.jittered_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Listing devices failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn fetch_firmware(
        &self,
        serial: &Serial,
    ) -> std::result::Result<FirmwareMetadata, CloudError> {
        self.with_session(|cloud, session| async move {
            cloud.fetch_firmware_metadata(&session, serial).await
        })
        .await
    }

    /// Routes a cloud error to the connection layer.
    fn note_cloud_error(&self, serial: Option<&Serial>, error: &CloudError) {
        match error {
            CloudError::Connection(_) => {
                if let Some(serial) = serial {
                    self.connections.report_cloud_lost(serial);
                }
            }
            CloudError::Auth(AuthError::SessionExpired) => {
                self.session.invalidate();
                if let Some(serial) = serial {
                    self.connections.report_cloud_lost(serial);
                }
            }
            CloudError::Auth(e) => self.session.reject(e.clone()),
            CloudError::Api(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::bus::{MessageHandler, Subscription, topic_matches};
    use crate::cloud::{Ack, Session};
    use crate::error::StateConflict;
    use crate::firmware::FirmwareUpdatePhase;
    use crate::state::{PropertyUpdate, PropertyValue};
    use crate::types::FanSpeed;

    #[derive(Default)]
    struct ScriptedCloud {
        devices: Mutex<Vec<DeviceDescriptor>>,
        auto_update_unsupported: bool,
    }

    #[async_trait]
    impl CloudApi for ScriptedCloud {
        async fn authenticate(&self, _: &Credentials) -> std::result::Result<Session, CloudError> {
            Ok(Session::new("token"))
        }

        async fn list_devices(
            &self,
            _: &Session,
        ) -> std::result::Result<Vec<DeviceDescriptor>, CloudError> {
            Ok(self.devices.lock().clone())
        }

        async fn fetch_firmware_metadata(
            &self,
            _: &Session,
            _: &Serial,
        ) -> std::result::Result<FirmwareMetadata, CloudError> {
            Ok(FirmwareMetadata {
                version: "1.2.0".to_string(),
                auto_update: false,
                update_available: true,
                available_version: Some("1.3.0".to_string()),
            })
        }

        async fn trigger_firmware_update(
            &self,
            _: &Session,
            _: &Serial,
        ) -> std::result::Result<Ack, CloudError> {
            Ok(Ack::default())
        }

        async fn set_auto_update(
            &self,
            _: &Session,
            _: &Serial,
            _: bool,
        ) -> std::result::Result<Ack, CloudError> {
            if self.auto_update_unsupported {
                Err(ApiError::Unsupported {
                    operation: "set_auto_update",
                }
                .into())
            } else {
                Ok(Ack::default())
            }
        }
    }

    #[derive(Default)]
    struct LoopbackBus {
        next_id: AtomicU64,
        routes: Mutex<Vec<(Subscription, MessageHandler, watch::Sender<bool>)>>,
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl LoopbackBus {
        fn deliver(&self, topic: &str, payload: &[u8]) {
            let handlers: Vec<MessageHandler> = self
                .routes
                .lock()
                .iter()
                .filter(|(sub, _, _)| topic_matches(sub.filter(), topic))
                .map(|(_, handler, _)| Arc::clone(handler))
                .collect();
            for handler in handlers {
                handler(topic, payload);
            }
        }
    }

    #[async_trait]
    impl MessageBus for LoopbackBus {
        async fn subscribe(
            &self,
            filter: &str,
            handler: MessageHandler,
        ) -> std::result::Result<Subscription, ConnectionError> {
            let (tx, rx) = watch::channel(false);
            let sub = Subscription::new(self.next_id.fetch_add(1, Ordering::SeqCst), filter, rx);
            self.routes.lock().push((sub.clone(), handler, tx));
            Ok(sub)
        }

        async fn unsubscribe(
            &self,
            subscription: &Subscription,
        ) -> std::result::Result<(), ConnectionError> {
            self.routes
                .lock()
                .retain(|(s, _, _)| s.id() != subscription.id());
            Ok(())
        }

        async fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
        ) -> std::result::Result<(), ConnectionError> {
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn serial() -> Serial {
        Serial::new("ABC-1").unwrap()
    }

    fn descriptor(tokens: &[&str]) -> DeviceDescriptor {
        DeviceDescriptor::new(serial(), "Bedroom", "ec", "438")
            .with_capabilities(tokens.iter().copied())
            .with_auto_update(false)
    }

    fn coordinator(cloud: ScriptedCloud) -> (Coordinator, Arc<LoopbackBus>) {
        let bus = Arc::new(LoopbackBus::default());
        let coordinator = Coordinator::builder(
            Arc::new(cloud),
            bus.clone(),
            Credentials::new("user", "pass"),
        )
        .build();
        (coordinator, bus)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test]
    async fn reregistering_keeps_live_state() {
        let (coordinator, _) = coordinator(ScriptedCloud::default());
        let first = coordinator.register_device(descriptor(&["heating"]));
        assert_eq!(first.revision, 1);

        coordinator
            .apply_event(
                &serial(),
                DeviceEvent::PropertyUpdate(
                    PropertyUpdate::new().with("speed", PropertyValue::Integer(4)),
                ),
            )
            .unwrap();

        let second = coordinator.register_device(descriptor(&["heating"]));
        assert_eq!(second.revision, 2);
        assert_eq!(second.live.integer("speed"), Some(4));
        assert_eq!(coordinator.devices(), vec![serial()]);
    }

    #[tokio::test]
    async fn wildcard_topic_root_cannot_connect() {
        let (coordinator, bus) = coordinator(ScriptedCloud::default());
        coordinator.register_device(
            DeviceDescriptor::new(serial(), "Bedroom", "ec", "438/+").with_auto_update(false),
        );

        let err = coordinator.connect(&serial()).unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::InvalidTopicRoot(_))));
        assert!(bus.routes.lock().is_empty());
    }

    #[tokio::test]
    async fn messages_for_other_serials_are_dropped() {
        let (coordinator, _) = coordinator(ScriptedCloud::default());
        coordinator.register_device(descriptor(&[]));

        coordinator.inner.handle_message(
            &serial(),
            "438/XYZ-9/status/current",
            br#"{"msg":"CURRENT-STATE","product-state":{"fnsp":"0003"}}"#,
        );
        let snapshot = coordinator.snapshot(&serial()).unwrap();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.live.integer("speed"), None);

        coordinator.inner.handle_message(
            &serial(),
            "438/ABC-1/status/current",
            br#"{"msg":"CURRENT-STATE","product-state":{"fnsp":"0003"}}"#,
        );
        let snapshot = coordinator.snapshot(&serial()).unwrap();
        assert_eq!(snapshot.live.integer("speed"), Some(3));
    }

    #[tokio::test]
    async fn unknown_device_is_an_error() {
        let (coordinator, _) = coordinator(ScriptedCloud::default());
        let err = coordinator
            .apply_event(&serial(), DeviceEvent::PropertyUpdate(PropertyUpdate::new()))
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
        assert!(coordinator.snapshot(&serial()).is_none());
        assert!(!coordinator.remove_device(&serial()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_need_capability_and_bus() {
        let (coordinator, bus) = coordinator(ScriptedCloud::default());
        coordinator.register_device(descriptor(&[]));

        let err = coordinator
            .send_command(&serial(), Command::SetHeating(true))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CapabilityNotSupported {
                feature: "heating",
                ..
            }
        ));

        let speed = Command::SetSpeed(FanSpeed::new(3).unwrap());
        let err = coordinator
            .send_command(&serial(), speed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected { channel: "bus", .. }));

        assert!(coordinator.connect(&serial()).unwrap());
        settle().await;
        assert!(coordinator.snapshot(&serial()).unwrap().is_online());

        coordinator.send_command(&serial(), speed).await.unwrap();
        let published = bus.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "438/ABC-1/command");
    }

    #[tokio::test(start_paused = true)]
    async fn bus_messages_reach_subscribers() {
        let (coordinator, bus) = coordinator(ScriptedCloud::default());
        coordinator.register_device(descriptor(&[]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        coordinator.subscribe(move |snapshot| sink.lock().push(snapshot.live.integer("speed")));

        coordinator.connect(&serial()).unwrap();
        settle().await;
        seen.lock().clear();

        bus.deliver(
            "438/ABC-1/status/current",
            br#"{"msg":"STATE-CHANGE","product-state":{"fnsp":["0002","0006"]}}"#,
        );
        bus.deliver("438/ABC-1/status/current", b"not json");

        assert_eq!(*seen.lock(), vec![Some(6)]);
    }

    #[tokio::test(start_paused = true)]
    async fn firmware_trigger_lifecycle() {
        let (coordinator, _) = coordinator(ScriptedCloud::default());
        coordinator.register_device(descriptor(&[]));

        let err = coordinator
            .trigger_firmware_update(&serial())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected { channel: "cloud", .. }));

        coordinator.connect(&serial()).unwrap();
        settle().await;

        coordinator.trigger_firmware_update(&serial()).await.unwrap();
        let snapshot = coordinator.snapshot(&serial()).unwrap();
        assert_eq!(snapshot.firmware.phase, FirmwareUpdatePhase::Triggered);

        let err = coordinator
            .trigger_firmware_update(&serial())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(StateConflict::UpdateInProgress { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_auto_update_keeps_desired_value() {
        let (coordinator, _) = coordinator(ScriptedCloud {
            auto_update_unsupported: true,
            ..ScriptedCloud::default()
        });
        coordinator.register_device(descriptor(&[]));
        coordinator.connect(&serial()).unwrap();
        settle().await;

        coordinator.set_auto_update(&serial(), true).await.unwrap();
        let auto_update = coordinator.snapshot(&serial()).unwrap().firmware.auto_update;
        assert_eq!(auto_update.value(), Some(true));
        assert!(auto_update.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_applies_cloud_data() {
        let cloud = ScriptedCloud::default();
        cloud
            .devices
            .lock()
            .push(descriptor(&["heating"]).with_auto_update(true));
        let (coordinator, _) = coordinator(cloud);
        coordinator.register_device(descriptor(&["heating"]));

        let snapshot = coordinator.refresh(&serial()).await.unwrap();
        assert_eq!(snapshot.firmware.version.as_deref(), Some("1.2.0"));
        assert_eq!(snapshot.firmware.available_version.as_deref(), Some("1.3.0"));
        assert_eq!(snapshot.firmware.update_available, Some(true));
        // firmware metadata wins over the directory entry
        assert_eq!(snapshot.firmware.auto_update.value(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn removal_notifies_and_forgets() {
        let (coordinator, _) = coordinator(ScriptedCloud::default());
        coordinator.register_device(descriptor(&[]));
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed);
        coordinator.on_device_removed(move |serial| sink.lock().push(serial.clone()));

        coordinator.connect(&serial()).unwrap();
        settle().await;

        assert!(coordinator.remove_device(&serial()).await);
        assert_eq!(*removed.lock(), vec![serial()]);
        assert!(coordinator.snapshot(&serial()).is_none());
        assert!(coordinator.watch_device(&serial()).is_none());
    }
}
