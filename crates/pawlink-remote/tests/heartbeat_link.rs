//! Heartbeats reaching a controller over a real link.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use pawlink_core::{Bridge, LinkState};
use pawlink_remote::{HeartbeatService, SharedSignal};
use pawlink_test_utils::{MockController, TestConfigBuilder};

const WAIT: Duration = Duration::from_secs(5);

async fn connected(controller: &MockController) -> (Bridge, pawlink_config::AppConfig) {
    let config = TestConfigBuilder::new()
        .endpoint(&controller.endpoint())
        .remote_id("joystick-7")
        .heartbeat_interval_ms(50)
        .signal_strength(-61.0)
        .build();
    let bridge = Bridge::start(&config);
    assert!(
        tokio::time::timeout(WAIT, bridge.link().wait_for_state(LinkState::Connected))
            .await
            .unwrap()
    );
    (bridge, config)
}

async fn next_heartbeat(controller: &MockController) -> Value {
    let frame = controller.next_frame(WAIT).await.expect("no heartbeat");
    serde_json::from_str(&frame).unwrap()
}

#[test_log::test(tokio::test)]
async fn test_heartbeat_carries_remote_id_and_signal() {
    let controller = MockController::start().await.unwrap();
    let (bridge, config) = connected(&controller).await;

    let (service, handle) = HeartbeatService::from_config(bridge.dispatcher(), &config.heartbeat);
    let task = tokio::spawn(service.run());

    let beat = next_heartbeat(&controller).await;
    assert_eq!(
        beat,
        json!({"command": "heartbeat", "params": {"remote_id": "joystick-7", "signal_strength": -61.0}})
    );

    // The cadence continues without any user traffic.
    for _ in 0..2 {
        assert_eq!(next_heartbeat(&controller).await["command"], "heartbeat");
    }
    assert!(handle.counts().sent >= 3);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_signal_updates_are_reported() {
    let controller = MockController::start().await.unwrap();
    let (bridge, config) = connected(&controller).await;

    let probe = SharedSignal::new(-80.0);
    let (service, handle) =
        HeartbeatService::new(bridge.dispatcher(), &config.heartbeat, Arc::new(probe.clone()));
    let task = tokio::spawn(service.run());

    let first = next_heartbeat(&controller).await;
    assert_eq!(first["params"]["signal_strength"], json!(-80.0));

    probe.set(-45.5);
    let mut seen = false;
    for _ in 0..10 {
        if next_heartbeat(&controller).await["params"]["signal_strength"] == json!(-45.5) {
            seen = true;
            break;
        }
    }
    assert!(seen, "probe update never reached the controller");

    handle.update_signal(-30.0).await.unwrap();
    let mut pinned = false;
    for _ in 0..10 {
        if next_heartbeat(&controller).await["params"]["signal_strength"] == json!(-30.0) {
            pinned = true;
            break;
        }
    }
    assert!(pinned, "pinned signal never reached the controller");

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_heartbeat_survives_link_loss() {
    let controller = MockController::start().await.unwrap();
    let (bridge, config) = connected(&controller).await;

    let (service, handle) = HeartbeatService::from_config(bridge.dispatcher(), &config.heartbeat);
    let task = tokio::spawn(service.run());
    next_heartbeat(&controller).await;

    assert!(controller.drop_connection());
    assert!(controller.wait_for_connections(2, WAIT).await);

    // Beats resume on the new link.
    let beat = next_heartbeat(&controller).await;
    assert_eq!(beat["command"], "heartbeat");

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    bridge.shutdown().await;
}
