// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Full device lifecycle through the coordinator: discovery, live updates,
//! commands, firmware updates and removal.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use airstate::coordinator::DiagnosticKind;
use airstate::{
    Command, CoordinatorConfig, DeviceEvent, FanSpeed, FirmwareUpdatePhase, PropertyUpdate,
    PropertyValue,
};
use common::{FakeCloud, descriptor, harness, serial, settle};
use parking_lot::Mutex;

#[tokio::test]
async fn registered_device_reports_property_updates() {
    let h = harness(FakeCloud::default(), CoordinatorConfig::default());
    let snapshot = h
        .coordinator
        .register_device(descriptor("ABC-1", &["extendedAQ", "heating"]));
    assert!(snapshot.capabilities.extended_air_quality());
    assert!(snapshot.capabilities.heating());
    assert!(snapshot.capabilities.wifi_diagnostics());
    assert!(!snapshot.capabilities.humidifier());

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    h.coordinator.subscribe(move |snapshot| {
        sink.lock().push(snapshot.clone());
    });

    let changed = h
        .coordinator
        .apply_event(
            &serial("ABC-1"),
            DeviceEvent::PropertyUpdate(PropertyUpdate::new().with("speed", PropertyValue::Integer(5))),
        )
        .unwrap();
    assert!(changed);

    let snapshot = h.coordinator.snapshot(&serial("ABC-1")).unwrap();
    assert_eq!(snapshot.live.integer("speed"), Some(5));
    {
        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].live.integer("speed"), Some(5));
        assert_eq!(received[0].revision, snapshot.revision);
    }

    // the same value again changes nothing and notifies nobody
    let changed = h
        .coordinator
        .apply_event(
            &serial("ABC-1"),
            DeviceEvent::PropertyUpdate(PropertyUpdate::new().with("speed", PropertyValue::Integer(5))),
        )
        .unwrap();
    assert!(!changed);
    assert_eq!(received.lock().len(), 1);
}

#[tokio::test]
async fn zero_diagnostics_capacity_still_records() {
    let config = CoordinatorConfig {
        diagnostics_capacity: 0,
        ..CoordinatorConfig::default()
    };
    let h = harness(FakeCloud::default(), config);
    h.coordinator.register_device(descriptor("ABC-1", &[]));

    for n in 0..3 {
        h.coordinator
            .apply_event(
                &serial("ABC-1"),
                DeviceEvent::Unrecognized {
                    topic: format!("438/ABC-1/status/faults{n}"),
                    payload: Vec::new(),
                },
            )
            .unwrap();
    }

    let snapshot = h.coordinator.snapshot(&serial("ABC-1")).unwrap();
    assert_eq!(snapshot.diagnostics.len(), 1);
    assert!(snapshot.diagnostics[0].detail.starts_with("438/ABC-1/status/faults2"));
}

#[tokio::test(start_paused = true)]
async fn discovered_device_goes_online_and_takes_commands() {
    let cloud = FakeCloud::default().with_device(
        descriptor("ABC-1", &["heating"])
            .with_firmware_version("1.2.0")
            .with_auto_update(true),
    );
    let h = harness(cloud, CoordinatorConfig::default());

    let discovered = h.coordinator.discover().await.unwrap();
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].firmware.version.as_deref(), Some("1.2.0"));
    assert_eq!(discovered[0].firmware.auto_update.value(), Some(true));

    assert!(h.coordinator.connect(&serial("ABC-1")).unwrap());
    settle().await;
    assert!(h.coordinator.snapshot(&serial("ABC-1")).unwrap().is_online());

    h.bus.deliver(
        "438/ABC-1/status/current",
        br#"{"msg":"CURRENT-STATE","product-state":{"fpwr":"ON","fnsp":"AUTO","hmod":"HEAT","hmax":"2980"}}"#,
    );
    let snapshot = h.coordinator.snapshot(&serial("ABC-1")).unwrap();
    assert_eq!(snapshot.live.flag("power"), Some(true));
    assert_eq!(snapshot.live.text("speed"), Some("auto"));

    h.coordinator
        .send_command(&serial("ABC-1"), Command::SetSpeed(FanSpeed::new(7).unwrap()))
        .await
        .unwrap();
    let published = h.bus.published.lock().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "438/ABC-1/command");
    assert_eq!(
        Command::decode(&published[0].1).unwrap(),
        Command::SetSpeed(FanSpeed::new(7).unwrap())
    );
}

#[tokio::test(start_paused = true)]
async fn firmware_update_runs_to_completion() {
    let h = harness(FakeCloud::default(), CoordinatorConfig::default());
    h.coordinator
        .register_device(descriptor("ABC-1", &[]).with_firmware_version("1.2.0"));
    h.coordinator.connect(&serial("ABC-1")).unwrap();
    settle().await;

    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&phases);
    h.coordinator.subscribe(move |snapshot| {
        let mut phases = sink.lock();
        if phases.last() != Some(&snapshot.firmware.phase) {
            phases.push(snapshot.firmware.phase);
        }
    });

    h.coordinator
        .trigger_firmware_update(&serial("ABC-1"))
        .await
        .unwrap();
    for status in ["acknowledged", "downloaded"] {
        h.bus.deliver(
            "438/ABC-1/status/software",
            format!(r#"{{"msg":"SOFTWARE-UPGRADE","status":"{status}"}}"#).as_bytes(),
        );
    }
    h.bus.deliver(
        "438/ABC-1/status/software",
        br#"{"msg":"SOFTWARE-UPGRADE","status":"Installed","version":"1.3.0"}"#,
    );

    let snapshot = h.coordinator.snapshot(&serial("ABC-1")).unwrap();
    assert_eq!(snapshot.firmware.phase, FirmwareUpdatePhase::Completed);
    assert_eq!(snapshot.firmware.version.as_deref(), Some("1.3.0"));
    assert_eq!(
        *phases.lock(),
        vec![
            FirmwareUpdatePhase::Triggered,
            FirmwareUpdatePhase::Acknowledged,
            FirmwareUpdatePhase::Downloaded,
            FirmwareUpdatePhase::Completed,
        ]
    );

    // a late duplicate is out of cycle and recorded, the next event starts over
    h.bus.deliver(
        "438/ABC-1/status/software",
        br#"{"msg":"SOFTWARE-UPGRADE","status":"downloaded"}"#,
    );
    let snapshot = h.coordinator.snapshot(&serial("ABC-1")).unwrap();
    assert_eq!(snapshot.firmware.phase, FirmwareUpdatePhase::Idle);
    assert_eq!(
        snapshot.diagnostics.last().map(|d| d.kind),
        Some(DiagnosticKind::OutOfCycleFirmwareToken)
    );
}

#[tokio::test(start_paused = true)]
async fn status_racing_the_trigger_is_kept() {
    let h = harness(FakeCloud::default(), CoordinatorConfig::default());
    h.coordinator.register_device(descriptor("ABC-1", &[]));
    h.coordinator.connect(&serial("ABC-1")).unwrap();
    settle().await;

    let coordinator = h.coordinator.clone();
    let trigger =
        tokio::spawn(async move { coordinator.trigger_firmware_update(&serial("ABC-1")).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.bus.deliver(
        "438/ABC-1/status/software",
        br#"{"msg":"SOFTWARE-UPGRADE","status":"acknowledged"}"#,
    );
    assert_eq!(
        h.coordinator
            .snapshot(&serial("ABC-1"))
            .unwrap()
            .firmware
            .phase,
        FirmwareUpdatePhase::Idle
    );

    trigger.await.unwrap().unwrap();
    assert_eq!(
        h.coordinator
            .snapshot(&serial("ABC-1"))
            .unwrap()
            .firmware
            .phase,
        FirmwareUpdatePhase::Acknowledged
    );
    assert_eq!(h.cloud.triggers.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_messages_become_diagnostics() {
    let h = harness(FakeCloud::default(), CoordinatorConfig::default());
    h.coordinator.register_device(descriptor("ABC-1", &[]));
    h.coordinator.connect(&serial("ABC-1")).unwrap();
    settle().await;

    h.bus.deliver(
        "438/ABC-1/status/faults",
        br#"{"msg":"CURRENT-FAULTS","product-errors":{}}"#,
    );
    // malformed payloads on known facets are dropped without a trace
    h.bus.deliver("438/ABC-1/status/current", b"{");

    let snapshot = h.coordinator.snapshot(&serial("ABC-1")).unwrap();
    assert_eq!(snapshot.diagnostics.len(), 1);
    assert_eq!(snapshot.diagnostics[0].kind, DiagnosticKind::UnrecognizedMessage);
}

#[tokio::test(start_paused = true)]
async fn disconnect_and_remove() {
    let h = harness(FakeCloud::default(), CoordinatorConfig::default());
    h.coordinator.register_device(descriptor("ABC-1", &[]));
    h.coordinator.connect(&serial("ABC-1")).unwrap();
    settle().await;
    assert_eq!(h.bus.subscription_count(), 1);

    h.coordinator.disconnect(&serial("ABC-1")).await.unwrap();
    let snapshot = h.coordinator.snapshot(&serial("ABC-1")).unwrap();
    assert!(!snapshot.cloud.is_active());
    assert!(!snapshot.bus.is_active());
    assert_eq!(h.bus.subscription_count(), 0);

    // disconnecting twice is harmless
    h.coordinator.disconnect(&serial("ABC-1")).await.unwrap();

    let removed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&removed);
    h.coordinator.on_device_removed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(h.coordinator.remove_device(&serial("ABC-1")).await);
    assert!(!h.coordinator.remove_device(&serial("ABC-1")).await);
    assert_eq!(removed.load(Ordering::SeqCst), 1);
    assert!(h.coordinator.devices().is_empty());
}
