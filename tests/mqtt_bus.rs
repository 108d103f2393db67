// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT bus using mockforge-mqtt.

use std::sync::Arc;
use std::time::Duration;

use airstate::bus::{MessageBus, MqttBus};
use airstate::error::ConnectionError;
use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use tokio::time::sleep;

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    sleep(Duration::from_millis(500)).await;
}

async fn connect(port: u16) -> MqttBus {
    MqttBus::builder()
        .host("127.0.0.1")
        .port(port)
        .connection_timeout(Duration::from_secs(5))
        .build()
        .await
        .unwrap()
}

// ============================================================================
// Connection
// ============================================================================

mod connection {
    use super::*;

    #[tokio::test]
    async fn connect_to_broker() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let bus = connect(port).await;
        assert!(bus.is_connected());
        assert_eq!(bus.host(), "127.0.0.1");
        assert_eq!(bus.port(), port);
    }

    #[tokio::test]
    async fn no_broker_fails() {
        let port = get_test_port();

        let result = MqttBus::builder()
            .host("127.0.0.1")
            .port(port)
            .connection_timeout(Duration::from_millis(500))
            .build()
            .await;

        assert!(result.is_err());
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

mod subscriptions {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_unsubscribe() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let bus = connect(port).await;

        let first = bus
            .subscribe("438/ABC-1/status/+", Arc::new(|_: &str, _: &[u8]| {}))
            .await
            .unwrap();
        let second = bus
            .subscribe("438/ABC-1/status/+", Arc::new(|_: &str, _: &[u8]| {}))
            .await
            .unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(bus.subscription_count(), 2);

        bus.unsubscribe(&first).await.unwrap();
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(bus.subscription_count(), 1);

        // a second unsubscribe is a no-op
        bus.unsubscribe(&first).await.unwrap();
    }

    #[tokio::test]
    async fn publish_while_connected() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let bus = connect(port).await;

        bus.publish("438/ABC-1/command", br#"{"msg":"REQUEST-CURRENT-STATE"}"#.to_vec())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disconnect_closes_subscriptions() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let bus = connect(port).await;

        let subscription = bus
            .subscribe("438/ABC-1/status/+", Arc::new(|_: &str, _: &[u8]| {}))
            .await
            .unwrap();
        bus.disconnect().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), subscription.closed())
            .await
            .unwrap();
        assert!(!bus.is_connected());

        let err = bus
            .publish("438/ABC-1/command", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Unavailable(_)));
    }
}
