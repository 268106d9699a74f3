//! End-to-end behaviour of the bridge against an in-process controller.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use pawlink_core::codec::{self, Command, Direction, Params, StatusEvent};
use pawlink_core::{Bridge, BridgeError, LinkState, Subscription};
use pawlink_test_utils::{MockController, StallingListener, TestConfigBuilder};

const WAIT: Duration = Duration::from_secs(5);

async fn connected_bridge(controller: &MockController, reconnect_ms: u64) -> (Bridge, Subscription) {
    let config = TestConfigBuilder::new()
        .endpoint(&controller.endpoint())
        .reconnect_delay_ms(reconnect_ms)
        .build();
    let bridge = Bridge::start(&config);
    let mut sub = bridge.subscribe();
    let event = next_event(&mut sub).await;
    assert!(
        matches!(event, StatusEvent::Connected { .. }),
        "expected connected, got {event:?}"
    );
    assert!(bridge.is_connected());
    (bridge, sub)
}

async fn next_event(sub: &mut Subscription) -> StatusEvent {
    tokio::time::timeout(WAIT, sub.recv())
        .await
        .expect("timed out waiting for a status event")
        .expect("subscription closed")
}

#[test_log::test(tokio::test)]
async fn test_move_frame_reaches_controller_exactly() {
    let controller = MockController::start().await.unwrap();
    let (bridge, _sub) = connected_bridge(&controller, 50).await;

    let accepted = bridge
        .dispatch(&Command::movement(Direction::Left, 0.4))
        .await
        .unwrap();
    assert_eq!(Some(accepted.link_id), bridge.link_info().link_id);

    let frame = controller.next_frame(WAIT).await.unwrap();
    assert_eq!(accepted.bytes, frame.len());
    let value: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        value,
        json!({"command": "move", "params": {"direction": "left", "speed": 0.4}})
    );
    assert!(
        controller
            .next_frame(Duration::from_millis(100))
            .await
            .is_none()
    );

    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_frames_arrive_in_submission_order() {
    let controller = MockController::start().await.unwrap();
    let (bridge, _sub) = connected_bridge(&controller, 50).await;

    let commands: Vec<Command> = (0..20)
        .map(|seq| Command::new("status").with_param("seq", seq as i64))
        .collect();
    for command in &commands {
        bridge.dispatch(command).await.unwrap();
    }
    for command in &commands {
        let frame = controller.next_frame(WAIT).await.unwrap();
        assert_eq!(frame, codec::encode(command).unwrap());
    }

    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_request_command_from_front_end_input() {
    let controller = MockController::start().await.unwrap();
    let (bridge, _sub) = connected_bridge(&controller, 50).await;

    let mut params = Params::new();
    params.insert("action".to_string(), "photo".into());
    bridge.request_command("camera", params).await.unwrap();

    let frame = controller.next_frame(WAIT).await.unwrap();
    let value: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value, json!({"command": "camera", "params": {"action": "photo"}}));

    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_dispatch_rejected_while_connecting() {
    let listener = StallingListener::start().await.unwrap();
    let config = TestConfigBuilder::new()
        .endpoint(&listener.endpoint())
        .connect_timeout_ms(5_000)
        .build();
    let bridge = Bridge::start(&config);

    assert!(
        tokio::time::timeout(WAIT, bridge.link().wait_for_state(LinkState::Connecting))
            .await
            .unwrap()
    );
    let result = bridge.dispatch(&Command::status()).await;
    assert_eq!(result, Err(BridgeError::LinkUnavailable));

    // Shutdown cancels the pending handshake.
    tokio::time::timeout(WAIT, bridge.shutdown()).await.unwrap();
    assert_eq!(bridge.link_info().state, LinkState::Disconnected);
}

#[test_log::test(tokio::test)]
async fn test_two_front_ends_receive_inbound_payload() {
    let controller = MockController::start().await.unwrap();
    let (bridge, mut first) = connected_bridge(&controller, 50).await;
    let mut second = bridge.subscribe();

    assert!(controller.push_text(r#"{"status":"success"}"#));

    for sub in [&mut first, &mut second] {
        let event = next_event(sub).await;
        let payload = event.payload().expect("payload event");
        assert_eq!(payload.get("status"), Some(&json!("success")));
        assert!(sub.try_recv().is_none());
    }

    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_unknown_fields_pass_through() {
    let controller = MockController::start().await.unwrap();
    let (bridge, mut sub) = connected_bridge(&controller, 50).await;

    let inbound = json!({
        "robot_status": {"battery": 87.5, "autonomous_mode": false, "temperature": 41},
        "firmware": "2.4.1"
    });
    assert!(controller.push_text(&inbound.to_string()));

    let event = next_event(&mut sub).await;
    let payload = event.payload().unwrap();
    assert_eq!(payload.battery(), Some(87.5));
    assert_eq!(payload.autonomous_mode(), Some(false));
    assert_eq!(Value::Object(payload.fields().clone()), inbound);

    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_malformed_frame_is_discarded() {
    let controller = MockController::start().await.unwrap();
    let (bridge, mut sub) = connected_bridge(&controller, 50).await;
    let link_id = bridge.link_info().link_id;

    assert!(controller.push_text("{not-json"));
    assert!(controller.push_text("[1, 2, 3]"));
    assert!(controller.push_text(r#"{"status":"success"}"#));

    // Only the well-formed frame produces an event.
    let event = next_event(&mut sub).await;
    assert_eq!(
        event.payload().unwrap().get("status"),
        Some(&json!("success"))
    );
    assert!(bridge.is_connected());
    assert_eq!(bridge.link_info().link_id, link_id);
    assert_eq!(controller.connections(), 1);

    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_link_drop_emits_one_disconnect_and_reconnects_after_delay() {
    let controller = MockController::start().await.unwrap();
    let (bridge, mut sub) = connected_bridge(&controller, 300).await;
    let first_link = bridge.link_info().link_id.unwrap();

    assert!(controller.drop_connection());

    let event = next_event(&mut sub).await;
    assert!(
        matches!(event, StatusEvent::Disconnected { .. }),
        "expected disconnected, got {event:?}"
    );

    let event = next_event(&mut sub).await;
    let StatusEvent::Connected { link_id, .. } = event else {
        panic!("expected reconnect, got {event:?}");
    };
    assert!(link_id > first_link);

    let times = controller.connection_times();
    assert_eq!(times.len(), 2);
    let gap = times[1].duration_since(times[0]);
    assert!(gap >= Duration::from_millis(300), "reconnected after {gap:?}");
    assert!(gap < Duration::from_secs(3), "reconnected after {gap:?}");

    assert!(bridge.is_connected());
    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_controller_down_emits_error_events_until_it_returns() {
    let controller = MockController::start().await.unwrap();
    let endpoint = controller.endpoint();
    drop(controller);

    let config = TestConfigBuilder::new()
        .endpoint(&endpoint)
        .reconnect_delay_ms(50)
        .build();
    let bridge = Bridge::start(&config);
    let mut sub = bridge.subscribe();

    for _ in 0..2 {
        let event = next_event(&mut sub).await;
        assert!(
            matches!(event, StatusEvent::Error { .. }),
            "expected error, got {event:?}"
        );
    }
    assert!(bridge.link_info().attempts >= 2);

    bridge.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_shutdown_closes_link_and_stops_events() {
    let controller = MockController::start().await.unwrap();
    let (bridge, mut sub) = connected_bridge(&controller, 50).await;

    bridge.shutdown().await;
    assert!(!bridge.is_connected());
    assert_eq!(
        bridge.dispatch(&Command::status()).await,
        Err(BridgeError::LinkUnavailable)
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sub.try_recv().is_none());
    assert_eq!(controller.connections(), 1);
}
