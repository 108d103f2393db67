// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT implementation of [`MessageBus`].
//!
//! One broker connection is shared by every device. A background task polls
//! the `rumqttc` event loop and routes each incoming publish to the handlers
//! whose filter matches, in arrival order. When the transport fails, every
//! subscription is closed (the broker forgets them on a clean-session
//! reconnect) and the task keeps polling so the client reconnects.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use airstate::bus::{MessageBus, MqttBus};
//!
//! # async fn example() -> Result<(), airstate::error::ConnectionError> {
//! let bus = MqttBus::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .build()
//!     .await?;
//!
//! let handler = Arc::new(|topic: &str, payload: &[u8]| {
//!     println!("{topic}: {} bytes", payload.len());
//! });
//! let subscription = bus.subscribe("438/+/status/+", handler).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::{oneshot, watch};

use super::{MessageBus, MessageHandler, Subscription, topic_matches};
use crate::error::ConnectionError;

/// Configuration for an MQTT bus connection.
#[derive(Debug, Clone)]
struct MqttBusConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
    reconnect_delay: Duration,
    client_id_prefix: String,
}

impl Default for MqttBusConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            client_id_prefix: "airstate".to_string(),
        }
    }
}

struct Route {
    filter: String,
    handler: MessageHandler,
    closed: watch::Sender<bool>,
}

/// A shared MQTT broker connection.
///
/// `MqttBus` is cheaply cloneable (via `Arc`).
#[derive(Clone)]
pub struct MqttBus {
    inner: Arc<MqttBusInner>,
}

struct MqttBusInner {
    client: AsyncClient,
    config: MqttBusConfig,
    connected: AtomicBool,
    next_id: AtomicU64,
    routes: RwLock<HashMap<u64, Route>>,
}

impl MqttBus {
    /// Creates a new builder for configuring the connection.
    #[must_use]
    pub fn builder() -> MqttBusBuilder {
        MqttBusBuilder::default()
    }

    /// Returns whether the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.routes.read().len()
    }

    /// Disconnects from the broker and closes every subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );
        self.inner.close_all();
        self.inner.client.disconnect().await?;
        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }
}

impl MqttBusInner {
    /// Closes and forgets every subscription.
    fn close_all(&self) {
        let routes: Vec<Route> = self.routes.write().drain().map(|(_, r)| r).collect();
        if !routes.is_empty() {
            tracing::debug!(count = routes.len(), "Closing MQTT subscriptions");
        }
        for route in routes {
            route.closed.send_replace(true);
        }
    }

    /// Delivers a publish to every matching handler, in subscription order.
    fn route(&self, topic: &str, payload: &[u8]) {
        let mut matching: Vec<(u64, MessageHandler)> = self
            .routes
            .read()
            .iter()
            .filter(|(_, route)| topic_matches(&route.filter, topic))
            .map(|(id, route)| (*id, Arc::clone(&route.handler)))
            .collect();
        if matching.is_empty() {
            tracing::trace!(topic = %topic, "No subscription for MQTT message");
            return;
        }
        matching.sort_by_key(|(id, _)| *id);
        // handlers run without the route lock so they may subscribe
        for (_, handler) in matching {
            handler(topic, payload);
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn subscribe(
        &self,
        filter: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::Unavailable(
                "MQTT broker is not connected".to_string(),
            ));
        }

        self.inner
            .client
            .subscribe(filter, QoS::AtLeastOnce)
            .await?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (closed, closed_rx) = watch::channel(false);
        self.inner.routes.write().insert(
            id,
            Route {
                filter: filter.to_string(),
                handler,
                closed,
            },
        );
        tracing::debug!(filter = %filter, id, "Subscribed to MQTT filter");
        Ok(Subscription::new(id, filter, closed_rx))
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), ConnectionError> {
        let (removed, still_used) = {
            let mut routes = self.inner.routes.write();
            let removed = routes.remove(&subscription.id());
            let still_used = routes
                .values()
                .any(|route| route.filter == subscription.filter());
            (removed, still_used)
        };

        let Some(route) = removed else {
            return Ok(());
        };
        route.closed.send_replace(true);

        if !still_used && self.is_connected() {
            self.inner.client.unsubscribe(subscription.filter()).await?;
        }
        tracing::debug!(filter = %subscription.filter(), id = subscription.id(), "Unsubscribed from MQTT filter");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::Unavailable(
                "MQTT broker is not connected".to_string(),
            ));
        }
        self.inner
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        tracing::debug!(topic = %topic, "Published MQTT message");
        Ok(())
    }
}

impl std::fmt::Debug for MqttBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBus")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builder for an MQTT bus connection.
///
/// # Examples
///
/// ```no_run
/// use airstate::bus::MqttBus;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), airstate::error::ConnectionError> {
/// let bus = MqttBus::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .keep_alive(Duration::from_secs(60))
///     .connection_timeout(Duration::from_secs(5))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttBusBuilder {
    config: MqttBusConfig,
}

impl MqttBusBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets how long to wait for the broker's ConnAck (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the pause between transport reconnection attempts (default: 2
    /// seconds).
    #[must_use]
    pub fn reconnect_delay(mut self, duration: Duration) -> Self {
        self.config.reconnect_delay = duration;
        self
    }

    /// Sets the client id prefix (default: `airstate`).
    #[must_use]
    pub fn client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.client_id_prefix = prefix.into();
        self
    }

    /// Connects to the broker.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - The broker does not acknowledge the connection in time
    pub async fn build(self) -> Result<MqttBus, ConnectionError> {
        if self.config.host.is_empty() {
            return Err(ConnectionError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let client_id = format!("{}-{}", self.config.client_id_prefix, uuid::Uuid::new_v4());
        let mut mqtt_options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, 64);

        let bus = MqttBus {
            inner: Arc::new(MqttBusInner {
                client,
                config: self.config.clone(),
                connected: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                routes: RwLock::new(HashMap::new()),
            }),
        };

        let (connack_tx, connack_rx) = oneshot::channel();
        tokio::spawn(handle_bus_events(
            event_loop,
            Arc::downgrade(&bus.inner),
            connack_tx,
            self.config.reconnect_delay,
        ));

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
                Ok(bus)
            }
            Ok(Err(_)) => Err(ConnectionError::ChannelClosed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => Err(ConnectionError::timeout("connect", timeout)),
        }
    }
}

/// Polls the MQTT event loop until the bus is dropped.
async fn handle_bus_events(
    mut event_loop: EventLoop,
    bus: Weak<MqttBusInner>,
    connack_tx: oneshot::Sender<()>,
    reconnect_delay: Duration,
) {
    use rumqttc::{Event, Outgoing, Packet};

    let mut connack_tx = Some(connack_tx);

    loop {
        let event = event_loop.poll().await;
        let Some(inner) = bus.upgrade() else {
            tracing::debug!("MQTT bus dropped, stopping event loop");
            break;
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                inner.connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(
                    topic = %publish.topic,
                    bytes = publish.payload.len(),
                    "MQTT message received"
                );
                inner.route(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker sent disconnect");
                inner.connected.store(false, Ordering::Release);
                inner.close_all();
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("MQTT client disconnected, stopping event loop");
                inner.connected.store(false, Ordering::Release);
                inner.close_all();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT event loop error");
                inner.connected.store(false, Ordering::Release);
                inner.close_all();
                drop(inner);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}
