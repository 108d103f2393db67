// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory cloud and bus shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use airstate::bus::{MessageBus, MessageHandler, Subscription, topic_matches};
use airstate::cloud::{Ack, CloudApi, Credentials, DeviceDescriptor, FirmwareMetadata, Session};
use airstate::error::{AuthError, CloudError, ConnectionError};
use airstate::types::Serial;
use airstate::{Coordinator, CoordinatorConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

/// Cloud whose login fails a configurable number of times.
#[derive(Default)]
pub struct FakeCloud {
    pub login_failures: AtomicU32,
    pub logins: AtomicU32,
    pub reject_logins: Mutex<Option<AuthError>>,
    pub reject_triggers: Mutex<Option<AuthError>>,
    pub devices: Mutex<Vec<DeviceDescriptor>>,
    pub triggers: AtomicU32,
}

impl FakeCloud {
    pub fn failing(login_failures: u32) -> Self {
        Self {
            login_failures: AtomicU32::new(login_failures),
            ..Self::default()
        }
    }

    pub fn with_device(self, descriptor: DeviceDescriptor) -> Self {
        self.devices.lock().push(descriptor);
        self
    }

    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn authenticate(&self, _: &Credentials) -> Result<Session, CloudError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.reject_logins.lock().clone() {
            return Err(e.into());
        }
        if self
            .login_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ConnectionError::Unavailable("cloud down".to_string()).into());
        }
        Ok(Session::new("token"))
    }

    async fn list_devices(&self, _: &Session) -> Result<Vec<DeviceDescriptor>, CloudError> {
        Ok(self.devices.lock().clone())
    }

    async fn fetch_firmware_metadata(
        &self,
        _: &Session,
        serial: &Serial,
    ) -> Result<FirmwareMetadata, CloudError> {
        let devices = self.devices.lock();
        let device = devices.iter().find(|d| d.serial == *serial);
        Ok(FirmwareMetadata {
            version: device
                .and_then(|d| d.firmware_version.clone())
                .unwrap_or_else(|| "1.0.0".to_string()),
            auto_update: device.and_then(|d| d.auto_update).unwrap_or(false),
            update_available: false,
            available_version: None,
        })
    }

    async fn trigger_firmware_update(&self, _: &Session, _: &Serial) -> Result<Ack, CloudError> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Some(e) = self.reject_triggers.lock().clone() {
            return Err(e.into());
        }
        Ok(Ack {
            request_id: Some("req-1".to_string()),
        })
    }

    async fn set_auto_update(&self, _: &Session, _: &Serial, _: bool) -> Result<Ack, CloudError> {
        Ok(Ack::default())
    }
}

/// Bus delivering published test messages straight to local handlers.
#[derive(Default)]
pub struct LoopbackBus {
    next_id: AtomicU64,
    routes: Mutex<Vec<(Subscription, MessageHandler, watch::Sender<bool>)>>,
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl LoopbackBus {
    /// Hands a message to every matching handler, like a broker would.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
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

    /// Simulates a broker restart dropping every subscription.
    pub fn drop_all(&self) {
        for (_, _, closed) in self.routes.lock().drain(..) {
            closed.send_replace(true);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.routes.lock().len()
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
        self.routes
            .lock()
            .retain(|(s, _, _)| s.id() != subscription.id());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ConnectionError> {
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

pub struct Harness {
    pub coordinator: Coordinator,
    pub cloud: Arc<FakeCloud>,
    pub bus: Arc<LoopbackBus>,
}

pub fn harness(cloud: FakeCloud, config: CoordinatorConfig) -> Harness {
    let cloud = Arc::new(cloud);
    let bus = Arc::new(LoopbackBus::default());
    let coordinator = Coordinator::builder(
        cloud.clone(),
        bus.clone(),
        Credentials::new("me@example.com", "secret"),
    )
    .with_config(config)
    .build();
    Harness {
        coordinator,
        cloud,
        bus,
    }
}

pub fn serial(value: &str) -> Serial {
    Serial::new(value).unwrap()
}

pub fn descriptor(serial_value: &str, tokens: &[&str]) -> DeviceDescriptor {
    DeviceDescriptor::new(serial(serial_value), "Test device", "ec", "438")
        .with_capabilities(tokens.iter().copied())
}

/// Lets spawned tasks run; with paused time the sleeps advance the clock.
pub async fn settle() {
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
