// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message bus collaborator.
//!
//! Devices publish their status to, and receive commands from, a
//! publish-subscribe bus. The coordinator reaches the bus through the
//! [`MessageBus`] trait; [`MqttBus`] is the default implementation.
//!
//! Handlers are invoked synchronously, in delivery order, from the bus
//! transport's receive loop. A [`Subscription`] tells its owner when the
//! transport loses it, so the owner can resubscribe.

mod filter;
#[cfg(feature = "mqtt")]
mod mqtt;

pub use filter::topic_matches;
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBus, MqttBusBuilder};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::ConnectionError;

/// Callback receiving `(topic, payload)` for every matching message.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Handle to an active bus subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    filter: String,
    closed: watch::Receiver<bool>,
}

impl Subscription {
    /// Creates a subscription handle.
    ///
    /// The transport flips `closed` to `true` (or drops the sender) when the
    /// subscription is lost.
    #[must_use]
    pub fn new(id: u64, filter: impl Into<String>, closed: watch::Receiver<bool>) -> Self {
        Self {
            id,
            filter: filter.into(),
            closed,
        }
    }

    /// Transport-assigned identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Topic filter the subscription covers.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Returns true if the transport already lost the subscription.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.closed.has_changed().is_err()
    }

    /// Resolves when the transport loses the subscription.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // a dropped sender counts as closed
        let _ = closed.wait_for(|c| *c).await;
    }
}

/// Operations the coordinator needs from the message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribes `handler` to every topic matching `filter`.
    async fn subscribe(
        &self,
        filter: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, ConnectionError>;

    /// Cancels a subscription. Unknown or already closed subscriptions are
    /// ignored.
    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), ConnectionError>;

    /// Publishes a payload.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ConnectionError>;
}
