// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device connection supervision.
//!
//! [`ConnectionManager::connect`] starts one supervisor task per channel.
//! Each supervisor establishes its channel, holds it until the link ends,
//! and retries with backoff until the policy's attempt ceiling is reached.
//! Every state change and every bus message goes to a
//! [`ConnectionObserver`]; the manager never touches device state itself.
//!
//! Reports carry the connect generation they were produced under. A
//! disconnect or retry bumps the generation while holding the device's slot
//! lock, so nothing from an aborted task can reach the observer afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use super::policy::{ReconnectionPolicy, Timeouts};
use super::session::{SessionLease, SharedSession};
use super::state::{Channel, ConnectionState, ConnectionTransition, FailureReason};
use crate::bus::{MessageBus, MessageHandler, Subscription};
use crate::error::{AuthError, CloudError, ConnectionError};
use crate::types::Serial;

/// Receives everything the connection manager observes.
///
/// Calls for one device are serialized. Implementations must not call back
/// into the manager for the same device.
pub trait ConnectionObserver: Send + Sync {
    /// A channel changed state.
    fn on_transition(&self, transition: ConnectionTransition);

    /// A bus message arrived for the device.
    fn on_message(&self, serial: &Serial, topic: &str, payload: &[u8]);

    /// Returns true once nobody is listening any more. Supervisors stop at
    /// their next step.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Connection behavior shared by every device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionConfig {
    /// Backoff and attempt ceiling.
    pub policy: ReconnectionPolicy,
    /// Network timeouts.
    pub timeouts: Timeouts,
    /// Subscribe to the bus without waiting for the cloud channel.
    pub local_only: bool,
}

impl ConnectionConfig {
    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the network timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Lets the bus connect even when the cloud is unreachable.
    #[must_use]
    pub fn with_local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }
}

/// What to connect for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Device serial.
    pub serial: Serial,
    /// Bus filter covering the device's status topics.
    pub status_filter: String,
}

impl ConnectionTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(serial: Serial, status_filter: impl Into<String>) -> Self {
        Self {
            serial,
            status_filter: status_filter.into(),
        }
    }
}

/// Whether the bus may start subscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Waiting,
    Open,
    Closed(FailureReason),
}

struct Slot {
    generation: u64,
    cloud_task: Option<JoinHandle<()>>,
    bus_task: Option<JoinHandle<()>>,
    cloud_connected: bool,
    cloud_lost: Arc<Notify>,
    gate: watch::Sender<Gate>,
    subscription: Option<Subscription>,
}

impl Slot {
    fn new() -> Self {
        let (gate, _) = watch::channel(Gate::Waiting);
        Self {
            generation: 0,
            cloud_task: None,
            bus_task: None,
            cloud_connected: false,
            cloud_lost: Arc::new(Notify::new()),
            gate,
            subscription: None,
        }
    }

    fn is_running(&self) -> bool {
        [&self.cloud_task, &self.bus_task]
            .into_iter()
            .flatten()
            .any(|task| !task.is_finished())
    }

    /// Invalidates the running generation and stops its tasks.
    fn stop(&mut self) -> Option<Subscription> {
        self.generation += 1;
        for task in [self.cloud_task.take(), self.bus_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        self.cloud_connected = false;
        self.subscription.take()
    }
}

/// Supervises the cloud and bus channels of every connected device.
pub struct ConnectionManager {
    session: Arc<SharedSession>,
    bus: Arc<dyn MessageBus>,
    observer: Arc<dyn ConnectionObserver>,
    config: ConnectionConfig,
    slots: RwLock<HashMap<Serial, Arc<Mutex<Slot>>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("devices", &self.slots.read().len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager. Nothing connects until [`connect`](Self::connect).
    #[must_use]
    pub fn new(
        session: Arc<SharedSession>,
        bus: Arc<dyn MessageBus>,
        observer: Arc<dyn ConnectionObserver>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            session,
            bus,
            observer,
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the shared cloud session.
    #[must_use]
    pub fn session(&self) -> &Arc<SharedSession> {
        &self.session
    }

    /// Returns the manager's configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Starts both channels for a device.
    ///
    /// Returns false without doing anything if a supervisor for the device
    /// is still running. A device whose channels gave up (`Failed`) is reset
    /// to `Disconnected` and starts a fresh cycle.
    pub fn connect(&self, target: ConnectionTarget) -> bool {
        let slot = self.slot_or_insert(&target.serial);
        let mut guard = slot.lock();
        if guard.is_running() {
            tracing::debug!(serial = %target.serial, "Device already connecting");
            return false;
        }
        let stale = guard.stop();
        self.start(&slot, &mut guard, target);
        drop(guard);

        if let Some(subscription) = stale {
            self.release_later(subscription);
        }
        true
    }

    /// Restarts both channels, whatever state they are in.
    pub async fn retry(&self, target: ConnectionTarget) {
        tracing::info!(serial = %target.serial, "Retrying device connection");
        let slot = self.slot_or_insert(&target.serial);
        let stale = {
            let mut guard = slot.lock();
            let stale = guard.stop();
            self.start(&slot, &mut guard, target);
            stale
        };
        if let Some(subscription) = stale {
            self.release(&subscription).await;
        }
    }

    /// Stops both channels, releases the bus subscription and the session
    /// lease, and reports `Disconnected`. Idempotent.
    pub async fn disconnect(&self, serial: &Serial) {
        let Some(slot) = self.slots.read().get(serial).cloned() else {
            return;
        };
        let stale = {
            let mut guard = slot.lock();
            let was_running = guard.is_running();
            let stale = guard.stop();
            for channel in Channel::ALL {
                self.observer.on_transition(ConnectionTransition::explicit(
                    serial.clone(),
                    channel,
                    ConnectionState::Disconnected,
                ));
            }
            if was_running {
                tracing::info!(serial = %serial, "Device disconnected");
            }
            stale
        };
        if let Some(subscription) = stale {
            self.release(&subscription).await;
        }
    }

    /// Disconnects a device and forgets it.
    pub async fn forget(&self, serial: &Serial) {
        self.disconnect(serial).await;
        self.slots.write().remove(serial);
    }

    /// Tells the cloud supervisor that a cloud call hit a transport error.
    ///
    /// Ignored unless the cloud channel is currently connected.
    pub fn report_cloud_lost(&self, serial: &Serial) {
        let Some(slot) = self.slots.read().get(serial).cloned() else {
            return;
        };
        let guard = slot.lock();
        if guard.cloud_connected {
            tracing::debug!(serial = %serial, "Cloud link reported lost");
            guard.cloud_lost.notify_one();
        }
    }

    /// Returns true while a supervisor for the device is running.
    #[must_use]
    pub fn is_active(&self, serial: &Serial) -> bool {
        self.slots
            .read()
            .get(serial)
            .is_some_and(|slot| slot.lock().is_running())
    }

    fn slot_or_insert(&self, serial: &Serial) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.read().get(serial) {
            return Arc::clone(slot);
        }
        Arc::clone(
            self.slots
                .write()
                .entry(serial.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Slot::new()))),
        )
    }

    /// Resets both channels and spawns fresh supervisors. The slot must
    /// already be stopped.
    fn start(&self, slot: &Arc<Mutex<Slot>>, guard: &mut Slot, target: ConnectionTarget) {
        let ConnectionTarget {
            serial,
            status_filter,
        } = target;

        for channel in Channel::ALL {
            self.observer.on_transition(ConnectionTransition::explicit(
                serial.clone(),
                channel,
                ConnectionState::Disconnected,
            ));
        }

        guard.cloud_lost = Arc::new(Notify::new());
        guard.gate.send_replace(Gate::Waiting);

        let reporter = Reporter {
            serial: serial.clone(),
            generation: guard.generation,
            slot: Arc::clone(slot),
            observer: Arc::clone(&self.observer),
        };

        let cloud = Driver::Cloud(CloudDriver {
            session: Arc::clone(&self.session),
            lost: Arc::clone(&guard.cloud_lost),
            lease: None,
        });
        let bus = Driver::Bus(BusDriver {
            bus: Arc::clone(&self.bus),
            filter: status_filter,
            gate: (!self.config.local_only).then(|| guard.gate.subscribe()),
            subscribe_timeout: self.config.timeouts.subscribe,
            reporter: reporter.clone(),
            subscription: None,
        });

        tracing::info!(
            serial = %serial,
            local_only = self.config.local_only,
            "Connecting device"
        );
        guard.cloud_task = Some(tokio::spawn(supervise(
            cloud,
            reporter.clone(),
            self.config.policy.clone(),
        )));
        guard.bus_task = Some(tokio::spawn(supervise(
            bus,
            reporter,
            self.config.policy.clone(),
        )));
    }

    async fn release(&self, subscription: &Subscription) {
        release_subscription(&self.bus, subscription, self.config.timeouts.subscribe).await;
    }

    fn release_later(&self, subscription: Subscription) {
        let bus = Arc::clone(&self.bus);
        let timeout = self.config.timeouts.subscribe;
        tokio::spawn(async move {
            release_subscription(&bus, &subscription, timeout).await;
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for slot in self.slots.read().values() {
            // a supervisor reporting right now holds the lock; it stops on
            // its own once the observer is closed
            if let Some(mut slot) = slot.try_lock() {
                slot.stop();
            }
        }
    }
}

async fn release_subscription(
    bus: &Arc<dyn MessageBus>,
    subscription: &Subscription,
    timeout: std::time::Duration,
) {
    match tokio::time::timeout(timeout, bus.unsubscribe(subscription)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(filter = %subscription.filter(), error = %e, "Failed to unsubscribe");
        }
        Err(_) => {
            tracing::warn!(filter = %subscription.filter(), "Unsubscribe timed out");
        }
    }
}

/// Forwards reports of one connect generation to the observer.
#[derive(Clone)]
struct Reporter {
    serial: Serial,
    generation: u64,
    slot: Arc<Mutex<Slot>>,
    observer: Arc<dyn ConnectionObserver>,
}

impl Reporter {
    fn transition(&self, channel: Channel, state: ConnectionState) {
        let mut slot = self.slot.lock();
        if slot.generation != self.generation {
            return;
        }
        if channel == Channel::Cloud {
            slot.cloud_connected = state.is_connected();
            slot.gate.send_if_modified(|gate| match (*gate, state) {
                (Gate::Waiting, ConnectionState::Connected) => {
                    *gate = Gate::Open;
                    true
                }
                (Gate::Waiting, ConnectionState::Failed { reason }) => {
                    *gate = Gate::Closed(reason);
                    true
                }
                _ => false,
            });
        }
        self.observer.on_transition(ConnectionTransition::new(
            self.serial.clone(),
            channel,
            state,
        ));
    }

    fn message(&self, topic: &str, payload: &[u8]) {
        let slot = self.slot.lock();
        if slot.generation != self.generation {
            return;
        }
        self.observer.on_message(&self.serial, topic, payload);
    }

    /// Records the live subscription. Returns false if the generation is
    /// stale.
    fn store_subscription(&self, subscription: &Subscription) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation != self.generation {
            return false;
        }
        slot.subscription = Some(subscription.clone());
        true
    }

    fn clear_subscription(&self, id: u64) {
        let mut slot = self.slot.lock();
        if slot.generation == self.generation
            && slot.subscription.as_ref().is_some_and(|s| s.id() == id)
        {
            slot.subscription = None;
        }
    }
}

/// Why an attempt did not produce a link.
enum AttemptError {
    Transient(String),
    Rejected(AuthError),
    Blocked(FailureReason),
}

/// How a held link ended.
enum LinkEnd {
    Lost,
    Rejected(AuthError),
}

struct CloudDriver {
    session: Arc<SharedSession>,
    lost: Arc<Notify>,
    lease: Option<SessionLease>,
}

struct BusDriver {
    bus: Arc<dyn MessageBus>,
    filter: String,
    gate: Option<watch::Receiver<Gate>>,
    subscribe_timeout: std::time::Duration,
    reporter: Reporter,
    subscription: Option<Subscription>,
}

enum Driver {
    Cloud(CloudDriver),
    Bus(BusDriver),
}

impl Driver {
    fn channel(&self) -> Channel {
        match self {
            Self::Cloud(_) => Channel::Cloud,
            Self::Bus(_) => Channel::Bus,
        }
    }

    async fn establish(&mut self) -> Result<(), AttemptError> {
        match self {
            Self::Cloud(cloud) => {
                let lease = cloud.session.acquire().await.map_err(|e| match e {
                    CloudError::Auth(auth) => AttemptError::Rejected(auth),
                    other => AttemptError::Transient(other.to_string()),
                })?;
                cloud.lease = Some(lease);
                Ok(())
            }
            Self::Bus(bus) => {
                if let Some(gate) = bus.gate.as_mut() {
                    let state = gate
                        .wait_for(|g| *g != Gate::Waiting)
                        .await
                        .map(|g| *g)
                        .map_err(|_| AttemptError::Transient("cloud gate dropped".to_string()))?;
                    if let Gate::Closed(reason) = state {
                        return Err(AttemptError::Blocked(reason));
                    }
                }

                let reporter = bus.reporter.clone();
                let handler: MessageHandler =
                    Arc::new(move |topic: &str, payload: &[u8]| reporter.message(topic, payload));

                let subscription = tokio::time::timeout(
                    bus.subscribe_timeout,
                    bus.bus.subscribe(&bus.filter, handler),
                )
                .await
                .map_err(|_| {
                    AttemptError::Transient(
                        ConnectionError::timeout("subscribe", bus.subscribe_timeout).to_string(),
                    )
                })?
                .map_err(|e| AttemptError::Transient(e.to_string()))?;

                if !bus.reporter.store_subscription(&subscription) {
                    return Err(AttemptError::Transient("connection reset".to_string()));
                }
                bus.subscription = Some(subscription);
                Ok(())
            }
        }
    }

    async fn hold(&mut self) -> LinkEnd {
        match self {
            Self::Cloud(cloud) => {
                let Some(mut lease) = cloud.lease.take() else {
                    return LinkEnd::Lost;
                };
                tokio::select! {
                    () = cloud.lost.notified() => LinkEnd::Lost,
                    error = lease.rejected() => LinkEnd::Rejected(error),
                }
            }
            Self::Bus(bus) => {
                let Some(subscription) = bus.subscription.take() else {
                    return LinkEnd::Lost;
                };
                subscription.closed().await;
                bus.reporter.clear_subscription(subscription.id());
                LinkEnd::Lost
            }
        }
    }
}

/// Runs one channel until it gives up or is aborted.
async fn supervise(mut driver: Driver, reporter: Reporter, policy: ReconnectionPolicy) {
    let channel = driver.channel();
    let serial = reporter.serial.clone();
    reporter.transition(channel, ConnectionState::Connecting);

    let mut failures: u32 = 0;
    loop {
        if reporter.observer.is_closed() {
            tracing::debug!(serial = %serial, channel = %channel, "Observer gone, stopping supervisor");
            return;
        }
        match driver.establish().await {
            Ok(()) => {
                failures = 0;
                tracing::debug!(serial = %serial, channel = %channel, "Channel connected");
                reporter.transition(channel, ConnectionState::Connected);

                match driver.hold().await {
                    LinkEnd::Lost => {
                        tracing::warn!(serial = %serial, channel = %channel, "Channel lost, reconnecting");
                        reporter.transition(channel, ConnectionState::Reconnecting { attempt: 1 });
                        tokio::time::sleep(policy.jittered_delay(0)).await;
                    }
                    LinkEnd::Rejected(error) => {
                        tracing::warn!(serial = %serial, channel = %channel, error = %error, "Session rejected");
                        reporter.transition(channel, ConnectionState::Reconnecting { attempt: 1 });
                        reporter.transition(
                            channel,
                            ConnectionState::Failed {
                                reason: FailureReason::AuthRejected,
                            },
                        );
                        return;
                    }
                }
            }
            Err(AttemptError::Rejected(error)) => {
                tracing::warn!(serial = %serial, channel = %channel, error = %error, "Authentication rejected");
                reporter.transition(
                    channel,
                    ConnectionState::Failed {
                        reason: FailureReason::AuthRejected,
                    },
                );
                return;
            }
            Err(AttemptError::Blocked(reason)) => {
                tracing::warn!(serial = %serial, channel = %channel, ?reason, "Cloud channel failed, not subscribing");
                reporter.transition(channel, ConnectionState::Failed { reason });
                return;
            }
            Err(AttemptError::Transient(error)) => {
                failures += 1;
                if !policy.should_retry(failures) {
                    tracing::warn!(
                        serial = %serial,
                        channel = %channel,
                        attempts = failures,
                        error = %error,
                        "Giving up after retry budget exhausted"
                    );
                    reporter.transition(
                        channel,
                        ConnectionState::Failed {
                            reason: FailureReason::RetryBudgetExhausted,
                        },
                    );
                    return;
                }

                let delay = policy.jittered_delay(failures - 1);
                tracing::debug!(
                    serial = %serial,
                    channel = %channel,
                    attempt = failures + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Attempt failed, backing off"
                );
                reporter.transition(
                    channel,
                    ConnectionState::Reconnecting {
                        attempt: failures + 1,
                    },
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::cloud::{Ack, CloudApi, Credentials, DeviceDescriptor, FirmwareMetadata, Session};

    struct FlakyCloud {
        failures_left: AtomicU32,
        logins: AtomicU32,
    }

    #[async_trait]
    impl CloudApi for FlakyCloud {
        async fn authenticate(&self, _: &Credentials) -> Result<Session, CloudError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ConnectionError::Unavailable("down".to_string()).into());
            }
            Ok(Session::new("token"))
        }

        async fn list_devices(&self, _: &Session) -> Result<Vec<DeviceDescriptor>, CloudError> {
            Ok(Vec::new())
        }

        async fn fetch_firmware_metadata(
            &self,
            _: &Session,
            _: &Serial,
        ) -> Result<FirmwareMetadata, CloudError> {
            unimplemented!()
        }

        async fn trigger_firmware_update(&self, _: &Session, _: &Serial) -> Result<Ack, CloudError> {
            unimplemented!()
        }

        async fn set_auto_update(&self, _: &Session, _: &Serial, _: bool) -> Result<Ack, CloudError> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct LoopbackBus {
        next_id: AtomicU64,
        routes: Mutex<Vec<(Subscription, MessageHandler, watch::Sender<bool>)>>,
    }

    impl LoopbackBus {
        fn deliver(&self, topic: &str, payload: &[u8]) {
            let handlers: Vec<MessageHandler> = self
                .routes
                .lock()
                .iter()
                .filter(|(sub, _, _)| crate::bus::topic_matches(sub.filter(), topic))
                .map(|(_, handler, _)| Arc::clone(handler))
                .collect();
            for handler in handlers {
                handler(topic, payload);
            }
        }

        fn drop_all(&self) {
            for (_, _, closed) in self.routes.lock().drain(..) {
                closed.send_replace(true);
            }
        }
    }

    #[async_trait]
    impl MessageBus for LoopbackBus {
        async fn subscribe(
            &self,
            filter: &str,
            handler: MessageHandler,
        ) -> Result<Subscription, ConnectionError> {
            let (tx, rx) = watch::channel(false);
            let sub = Subscription::new(self.next_id.fetch_add(1, Ordering::SeqCst), filter, rx);
            self.routes.lock().push((sub.clone(), handler, tx));
            Ok(sub)
        }

        async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), ConnectionError> {
            self.routes.lock().retain(|(s, _, _)| s.id() != subscription.id());
            Ok(())
        }

        async fn publish(&self, _: &str, _: Vec<u8>) -> Result<(), ConnectionError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        transitions: Mutex<Vec<(Channel, ConnectionState)>>,
        messages: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn last(&self, channel: Channel) -> Option<ConnectionState> {
            self.transitions
                .lock()
                .iter()
                .rev()
                .find(|(c, _)| *c == channel)
                .map(|(_, s)| *s)
        }
    }

    impl ConnectionObserver for Recorder {
        fn on_transition(&self, transition: ConnectionTransition) {
            self.transitions
                .lock()
                .push((transition.channel, transition.state));
        }

        fn on_message(&self, _: &Serial, topic: &str, _: &[u8]) {
            self.messages.lock().push(topic.to_string());
        }
    }

    struct Harness {
        manager: ConnectionManager,
        cloud: Arc<FlakyCloud>,
        bus: Arc<LoopbackBus>,
        recorder: Arc<Recorder>,
    }

    fn harness(cloud_failures: u32, config: ConnectionConfig) -> Harness {
        let cloud = Arc::new(FlakyCloud {
            failures_left: AtomicU32::new(cloud_failures),
            logins: AtomicU32::new(0),
        });
        let session = Arc::new(SharedSession::new(
            cloud.clone(),
            Credentials::new("user", "pass"),
            Duration::from_secs(1),
        ));
        let bus = Arc::new(LoopbackBus::default());
        let recorder = Arc::new(Recorder::default());
        let manager = ConnectionManager::new(session, bus.clone(), recorder.clone(), config);
        Harness {
            manager,
            cloud,
            bus,
            recorder,
        }
    }

    fn target() -> ConnectionTarget {
        ConnectionTarget::new(Serial::new("ABC-1").unwrap(), "438/ABC-1/status/+")
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connects_both_channels() {
        let h = harness(0, ConnectionConfig::default());
        assert!(h.manager.connect(target()));
        settle().await;

        assert_eq!(h.recorder.last(Channel::Cloud), Some(ConnectionState::Connected));
        assert_eq!(h.recorder.last(Channel::Bus), Some(ConnectionState::Connected));
        assert!(h.manager.is_active(&target().serial));
        assert_eq!(h.manager.session().lease_count(), 1);

        h.bus.deliver("438/ABC-1/status/current", b"{}");
        assert_eq!(h.recorder.messages.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_is_a_no_op() {
        let h = harness(0, ConnectionConfig::default());
        assert!(h.manager.connect(target()));
        assert!(!h.manager.connect(target()));
    }

    #[tokio::test(start_paused = true)]
    async fn bus_waits_for_cloud_unless_local_only() {
        let config = ConnectionConfig::default()
            .with_policy(ReconnectionPolicy::new().with_max_attempts(2));
        let h = harness(u32::MAX, config);
        h.manager.connect(target());
        settle().await;

        let exhausted = ConnectionState::Failed {
            reason: FailureReason::RetryBudgetExhausted,
        };
        assert_eq!(h.recorder.last(Channel::Cloud), Some(exhausted));
        assert_eq!(h.recorder.last(Channel::Bus), Some(exhausted));

        let local = harness(
            u32::MAX,
            ConnectionConfig::default()
                .with_policy(ReconnectionPolicy::new().with_max_attempts(2))
                .with_local_only(true),
        );
        local.manager.connect(target());
        settle().await;
        assert_eq!(local.recorder.last(Channel::Cloud), Some(exhausted));
        assert_eq!(local.recorder.last(Channel::Bus), Some(ConnectionState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_subscription_is_restored() {
        let h = harness(0, ConnectionConfig::default());
        h.manager.connect(target());
        settle().await;

        h.bus.drop_all();
        settle().await;

        let bus_states: Vec<ConnectionState> = h
            .recorder
            .transitions
            .lock()
            .iter()
            .filter(|(c, _)| *c == Channel::Bus)
            .map(|(_, s)| *s)
            .collect();
        assert!(bus_states.contains(&ConnectionState::Reconnecting { attempt: 1 }));
        assert_eq!(bus_states.last(), Some(&ConnectionState::Connected));
        assert_eq!(h.bus.routes.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_releases_everything() {
        let h = harness(0, ConnectionConfig::default());
        h.manager.connect(target());
        settle().await;

        h.manager.disconnect(&target().serial).await;
        settle().await;

        assert!(!h.manager.is_active(&target().serial));
        assert_eq!(h.manager.session().lease_count(), 0);
        assert!(h.bus.routes.lock().is_empty());
        assert_eq!(h.recorder.last(Channel::Cloud), Some(ConnectionState::Disconnected));
        assert_eq!(h.recorder.last(Channel::Bus), Some(ConnectionState::Disconnected));

        // messages after disconnect are dropped
        h.bus.deliver("438/ABC-1/status/current", b"{}");
        assert!(h.recorder.messages.lock().is_empty());

        // idempotent
        h.manager.disconnect(&target().serial).await;
        assert_eq!(h.cloud.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cloud_loss_reacquires_session() {
        let h = harness(0, ConnectionConfig::default());
        h.manager.connect(target());
        settle().await;

        h.manager.session().invalidate();
        h.manager.report_cloud_lost(&target().serial);
        settle().await;

        assert_eq!(h.recorder.last(Channel::Cloud), Some(ConnectionState::Connected));
        assert_eq!(h.cloud.logins.load(Ordering::SeqCst), 2);
        assert_eq!(h.manager.session().lease_count(), 1);
    }
}
