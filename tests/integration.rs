// tests/integration.rs

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Duration, Instant};

use hub_link::{
    // ---
    ConnectionState,
    EventDecoder,
    Frame,
    GenericEvent,
    HubError,
    HubEvent,
    HubResponse,
    StaticUrl,
    SubscriptionKey,
    TopicFamily,
};

use common::{ack, event, frame_id, reject, subscribe_acked, Harness, HUB_VERSION};

fn state_changed(entity_id: &str, state: &str) -> Value {
    // ---
    json!({
        "event_type": "state_changed",
        "data": {
            "entity_id": entity_id,
            "old_state": null,
            "new_state": {"state": state}
        },
        "time_fired": "2024-06-01T12:00:00+00:00"
    })
}

fn entity_of(event: &HubEvent) -> &str {
    match event {
        HubEvent::StateChanged(changed) => &changed.entity_id,
        other => panic!("expected state_changed, got {other:?}"),
    }
}

// ---
// Requests
// ---

#[tokio::test]
async fn test_ping_round_trip() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    assert_eq!(h.client.state(), ConnectionState::Active);
    assert_eq!(h.client.hub_version().as_deref(), Some(HUB_VERSION));
    assert_eq!(peer.url(), "ws://hub.test:8123/api/websocket");

    let client = h.client.clone();
    let pinging = tokio::spawn(async move { client.ping().await });

    let frame = peer.recv_json().await.unwrap();
    assert_eq!(frame["type"], "ping");
    assert!(peer.send_json(json!({"id": frame_id(&frame), "type": "pong"})));

    pinging.await.unwrap().expect("ping failed");
    assert_eq!(h.client.pending_requests(), 0);
}

#[tokio::test]
async fn test_send_returns_result_and_ids_increase() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let client = h.client.clone();
    let sending = tokio::spawn(async move {
        let first = client.send(&json!({"type": "get_states", "id": 99})).await;
        let second = client.send(&json!({"type": "get_config"})).await;
        (first, second)
    });

    let first = peer.recv_json().await.unwrap();
    assert_eq!(first["type"], "get_states");
    assert_ne!(frame_id(&first), 99, "caller id must be replaced");
    assert!(peer.send_json(json!({
        "id": frame_id(&first),
        "type": "result",
        "success": true,
        "result": [{"entity_id": "sun.sun"}]
    })));

    let second = peer.recv_json().await.unwrap();
    assert!(frame_id(&second) > frame_id(&first));
    reject(&peer, frame_id(&second), "unauthorized", "admin only");

    let (first, second) = sending.await.unwrap();
    assert_eq!(
        first.unwrap().into_result(),
        Some(json!([{"entity_id": "sun.sun"}]))
    );

    match second.unwrap() {
        HubResponse::Result { success, error, .. } => {
            assert!(!success);
            assert_eq!(error.unwrap().code.as_deref(), Some("unauthorized"));
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn test_batched_frame_answers_every_request() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let client = h.client.clone();
    let sending = tokio::spawn(async move {
        let msg_a = json!({"type": "a"});
        let msg_b = json!({"type": "b"});
        tokio::join!(client.send(&msg_a), client.send(&msg_b))
    });

    let first = peer.recv_json().await.unwrap();
    let second = peer.recv_json().await.unwrap();

    // one physical frame, answering each command with its own type
    assert!(peer.send_json(json!([
        {"id": frame_id(&first), "type": "result", "success": true, "result": first["type"].clone()},
        {"id": frame_id(&second), "type": "result", "success": true, "result": second["type"].clone()}
    ])));

    let (a, b) = sending.await.unwrap();
    assert_eq!(a.unwrap().into_result(), Some(json!("a")));
    assert_eq!(b.unwrap().into_result(), Some(json!("b")));
}

#[tokio::test]
async fn test_non_object_payload_is_rejected() {
    // ---
    let h = Harness::new();

    let result = h.client.send(&json!(["not", "an", "object"])).await;

    assert!(matches!(result, Err(HubError::InvalidPayload(_))));
    assert_eq!(h.connector.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_leaves_entry_until_late_response() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let client = h.client.clone();
    let sending = tokio::spawn(async move {
        client
            .send_with_timeout(&json!({"type": "get_states"}), Duration::from_secs(1))
            .await
    });

    let late_id = frame_id(&peer.recv_json().await.unwrap());

    assert!(matches!(sending.await.unwrap(), Err(HubError::Timeout)));
    assert_eq!(h.client.pending_requests(), 1);

    ack(&peer, late_id);

    // the pong is dispatched after the late result
    let client = h.client.clone();
    let pinging = tokio::spawn(async move { client.ping().await });
    let ping = peer.recv_json().await.unwrap();
    assert!(peer.send_json(json!({"id": frame_id(&ping), "type": "pong"})));
    pinging.await.unwrap().unwrap();

    assert_eq!(h.client.pending_requests(), 0);
}

#[tokio::test]
async fn test_in_flight_requests_fail_when_socket_drops() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let mut tasks = Vec::new();
    for n in 0..3 {
        let client = h.client.clone();
        tasks.push(tokio::spawn(async move {
            client.send(&json!({"type": "call_service", "n": n})).await
        }));
    }

    for _ in 0..3 {
        assert_eq!(peer.recv_json().await.unwrap()["type"], "call_service");
    }

    peer.close();

    for task in tasks {
        assert!(matches!(task.await.unwrap(), Err(HubError::ConnectionLost)));
    }
    assert_eq!(h.client.pending_requests(), 0);
    assert_eq!(h.client.state(), ConnectionState::ClosedOther);
}

#[tokio::test]
async fn test_send_bytes_writes_binary_frame() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    h.client
        .send_bytes(Bytes::from_static(&[0x01, 0xff, 0x10]))
        .await
        .unwrap();

    assert_eq!(
        peer.recv().await,
        Some(Frame::Binary(Bytes::from_static(&[0x01, 0xff, 0x10])))
    );
    assert_eq!(h.client.pending_requests(), 0);
}

// ---
// Connection lifecycle
// ---

#[tokio::test]
async fn test_no_url_fails_without_connecting() {
    // ---
    let h = Harness::with(|builder| builder.url_provider(StaticUrl::unset()));

    assert!(matches!(
        h.client.connect().await,
        Err(HubError::ConnectionUnavailable(_))
    ));
    assert!(matches!(
        h.client.send(&json!({"type": "get_states"})).await,
        Err(HubError::NotConnected(_))
    ));
    assert!(!h.client.ensure_connected().await);
    assert_eq!(h.connector.attempts(), 0);
}

#[tokio::test]
async fn test_refused_connection() {
    // ---
    let h = Harness::new();
    h.connector.set_refuse(true);

    assert!(!h.client.ensure_connected().await);
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_auth_invalid_then_fresh_connect() {
    // ---
    let mut h = Harness::new();

    let client = h.client.clone();
    let connecting = tokio::spawn(async move { client.ensure_connected().await });

    let mut rejected = h.listener.accept().await.unwrap();
    rejected.reject_auth("Invalid access token").await.unwrap();

    assert!(!connecting.await.unwrap());
    assert_eq!(h.client.state(), ConnectionState::ClosedAuth);
    rejected.closed().await;

    // no automatic retry after rejected credentials
    assert!(h.listener.try_accept().is_none());

    let client = h.client.clone();
    let connecting = tokio::spawn(async move { client.ensure_connected().await });

    let mut peer = h.accept_authenticated().await;
    assert!(connecting.await.unwrap());
    assert_eq!(h.client.state(), ConnectionState::Active);
    assert_eq!(h.connector.attempts(), 2);
    assert_eq!(peer.recv_json().await.unwrap()["type"], "supported_features");
}

#[tokio::test]
async fn test_auth_invalid_surfaces_hub_message() {
    // ---
    let mut h = Harness::new();

    let client = h.client.clone();
    let connecting = tokio::spawn(async move { client.connect().await });

    let mut peer = h.listener.accept().await.unwrap();
    peer.reject_auth("token expired").await.unwrap();

    match connecting.await.unwrap() {
        Err(HubError::AuthenticationFailed(message)) => assert_eq!(message, "token expired"),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_auth_timeout_closes_socket() {
    // ---
    let mut h = Harness::new();

    let client = h.client.clone();
    let connecting = tokio::spawn(async move { client.connect().await });

    let mut peer = h.listener.accept().await.unwrap();
    assert_eq!(peer.recv_json().await.unwrap()["type"], "auth");

    let started = Instant::now();
    assert!(matches!(connecting.await.unwrap(), Err(HubError::Timeout)));
    assert!(started.elapsed() >= Duration::from_secs(30));

    peer.closed().await;
    assert_eq!(h.client.state(), ConnectionState::ClosedOther);
}

#[tokio::test]
async fn test_socket_closed_during_handshake() {
    // ---
    let mut h = Harness::new();

    let client = h.client.clone();
    let connecting = tokio::spawn(async move { client.connect().await });

    let mut peer = h.listener.accept().await.unwrap();
    assert_eq!(peer.recv_json().await.unwrap()["type"], "auth");
    peer.close();

    assert!(matches!(
        connecting.await.unwrap(),
        Err(HubError::ConnectionUnavailable(_))
    ));
}

#[tokio::test]
async fn test_concurrent_connects_share_one_socket() {
    // ---
    let mut h = Harness::new();

    let first = {
        let client = h.client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let second = {
        let client = h.client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    let _peer = h.accept_authenticated().await;

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(h.connector.attempts(), 1);
}

#[tokio::test]
async fn test_supported_features_only_for_recent_hubs() {
    // ---
    let mut h = Harness::new();

    let client = h.client.clone();
    let connecting = tokio::spawn(async move { client.connect().await });

    let mut peer = h.listener.accept().await.unwrap();
    peer.accept_auth("2021.12.5").await.unwrap();
    connecting.await.unwrap().unwrap();

    let client = h.client.clone();
    let _pinging = tokio::spawn(async move { client.ping().await });

    // first tracked frame is the ping, not a feature negotiation
    assert_eq!(peer.recv_json().await.unwrap()["type"], "ping");
}

#[tokio::test]
async fn test_auth_required_greeting_is_ignored() {
    // ---
    let mut h = Harness::new();

    let client = h.client.clone();
    let connecting = tokio::spawn(async move { client.connect().await });

    let mut peer = h.listener.accept().await.unwrap();
    assert!(peer.send_json(json!({"type": "auth_required", "ha_version": HUB_VERSION})));
    peer.accept_auth(HUB_VERSION).await.unwrap();

    connecting.await.unwrap().unwrap();
    assert_eq!(h.client.state(), ConnectionState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_no_recovery_without_subscriptions() {
    // ---
    let mut h = Harness::new();
    let peer = h.open().await;

    peer.close();
    sleep(Duration::from_secs(60)).await;

    assert_eq!(h.connector.attempts(), 1);
    assert!(h.listener.try_accept().is_none());
    assert_eq!(h.client.state(), ConnectionState::ClosedOther);
}

// ---
// Subscriptions
// ---

#[tokio::test]
async fn test_identical_subscribes_share_one_hub_subscription() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let first = {
        let client = h.client.clone();
        tokio::spawn(async move {
            client
                .subscribe("subscribe_events", json!({"event_type": "state_changed"}))
                .await
        })
    };
    let second = {
        let client = h.client.clone();
        tokio::spawn(async move {
            client
                .subscribe("subscribe_events", json!({"event_type": "state_changed"}))
                .await
        })
    };

    let frame = peer.recv_json().await.unwrap();
    assert_eq!(frame["type"], "subscribe_events");
    assert_eq!(frame["event_type"], "state_changed");
    let id = frame_id(&frame);
    ack(&peer, id);

    let mut first = first.await.unwrap().unwrap();
    let mut second = second.await.unwrap().unwrap();

    assert!(peer.try_recv().is_none(), "only one subscribe frame expected");
    assert_eq!(first.id().get(), id);
    assert_eq!(second.id().get(), id);
    assert_eq!(first.family(), TopicFamily::StateChanged);
    assert_eq!(h.client.subscription_count().await, 1);

    event(&peer, id, state_changed("light.kitchen", "on"));
    event(&peer, id, state_changed("light.hall", "off"));

    for handle in [&mut first, &mut second] {
        assert_eq!(entity_of(&handle.next_event().await.unwrap()), "light.kitchen");
        assert_eq!(entity_of(&handle.next_event().await.unwrap()), "light.hall");
    }

    // each event reaches each handle once
    assert!(timeout(Duration::from_millis(50), first.next_event()).await.is_err());
}

#[tokio::test]
async fn test_distinct_keys_subscribe_separately() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let (mut kitchen, kitchen_id) = subscribe_acked(
        &h.client,
        &mut peer,
        "subscribe_entities",
        json!({"entity_ids": ["light.kitchen"]}),
    )
    .await;
    let (mut template, template_id) = subscribe_acked(
        &h.client,
        &mut peer,
        "render_template",
        json!({"template": "{{ states('sun.sun') }}"}),
    )
    .await;

    assert_ne!(kitchen_id, template_id);
    assert_eq!(h.client.subscription_count().await, 2);

    event(&peer, template_id, json!({"result": "above_horizon", "listeners": {"all": false}}));
    event(&peer, kitchen_id, json!({"a": {"light.kitchen": {"s": "on"}}}));

    match template.next_event().await.unwrap() {
        HubEvent::Template(rendered) => assert_eq!(rendered.result, json!("above_horizon")),
        other => panic!("unexpected event {other:?}"),
    }
    match kitchen.next_event().await.unwrap() {
        HubEvent::CompressedEntities(diff) => assert!(diff.added.contains_key("light.kitchen")),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_subscribe_connects_lazily() {
    // ---
    let mut h = Harness::new();

    let subscribing = {
        let client = h.client.clone();
        tokio::spawn(async move { client.subscribe("subscribe_events", Value::Null).await })
    };

    let mut peer = h.accept_authenticated().await;
    assert_eq!(peer.recv_json().await.unwrap()["type"], "supported_features");

    let frame = peer.recv_json().await.unwrap();
    assert_eq!(frame["type"], "subscribe_events");
    ack(&peer, frame_id(&frame));

    let sub = subscribing.await.unwrap().unwrap();
    assert_eq!(sub.family(), TopicFamily::Generic);
}

#[tokio::test]
async fn test_rejected_subscribe() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let subscribing = {
        let client = h.client.clone();
        tokio::spawn(async move {
            client
                .subscribe("subscribe_trigger", json!({"trigger": {"platform": "bogus"}}))
                .await
        })
    };

    let frame = peer.recv_json().await.unwrap();
    reject(&peer, frame_id(&frame), "invalid_format", "Invalid platform");

    match subscribing.await.unwrap() {
        Err(HubError::SubscriptionRejected(reason)) => assert!(reason.contains("Invalid platform")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.client.pending_requests(), 0);
    assert_eq!(h.client.subscription_count().await, 0);
}

#[tokio::test]
async fn test_last_handle_unsubscribes_then_idle_close() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let (first, id) = subscribe_acked(
        &h.client,
        &mut peer,
        "subscribe_events",
        json!({"event_type": "call_service"}),
    )
    .await;
    let second = h
        .client
        .subscribe("subscribe_events", json!({"event_type": "call_service"}))
        .await
        .unwrap();

    drop(first);
    drop(second);

    let frame = peer.recv_json().await.unwrap();
    assert_eq!(frame["type"], "unsubscribe_events");
    assert_eq!(frame["subscription"], id);
    ack(&peer, frame_id(&frame));

    peer.closed().await;
    assert!(peer.try_recv().is_none(), "exactly one unsubscribe expected");
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(h.client.subscription_count().await, 0);
    assert_eq!(h.client.pending_requests(), 0);
}

#[tokio::test]
async fn test_event_during_unsubscribe_sends_no_second_unsubscribe() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let (sub, id) = subscribe_acked(
        &h.client,
        &mut peer,
        "subscribe_events",
        json!({"event_type": "state_changed"}),
    )
    .await;
    drop(sub);

    let frame = peer.recv_json().await.unwrap();
    assert_eq!(frame["type"], "unsubscribe_events");
    assert_eq!(frame["subscription"], id);

    // hub was still publishing when the unsubscribe reached it
    event(&peer, id, state_changed("light.hall", "on"));
    ack(&peer, frame_id(&frame));

    assert!(timeout(Duration::from_secs(1), peer.closed()).await.is_ok(), "idle socket not closed");
    assert!(peer.try_recv().is_none(), "exactly one unsubscribe expected");
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(h.client.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reattach_within_idle_timeout_keeps_subscription() {
    // ---
    let mut h = Harness::with(|builder| builder.subscribe_idle_timeout(Duration::from_secs(5)));
    let mut peer = h.open().await;

    let (sub, id) = subscribe_acked(
        &h.client,
        &mut peer,
        "subscribe_events",
        json!({"event_type": "state_changed"}),
    )
    .await;
    drop(sub);

    sleep(Duration::from_secs(2)).await;

    let mut again = h
        .client
        .subscribe("subscribe_events", json!({"event_type": "state_changed"}))
        .await
        .unwrap();
    assert_eq!(again.id().get(), id);

    sleep(Duration::from_secs(10)).await;
    assert!(peer.try_recv().is_none(), "no subscribe or unsubscribe expected");

    event(&peer, id, state_changed("sensor.temp", "21"));
    assert_eq!(entity_of(&again.next_event().await.unwrap()), "sensor.temp");

    let released = Instant::now();
    drop(again);

    let frame = peer.recv_json().await.unwrap();
    assert_eq!(frame["type"], "unsubscribe_events");
    assert!(released.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn test_orphan_event_is_unsubscribed_once() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    event(&peer, 999, json!({"event_type": "call_service"}));
    event(&peer, 999, json!({"event_type": "call_service"}));

    let frame = peer.recv_json().await.unwrap();
    assert_eq!(frame["type"], "unsubscribe_events");
    assert_eq!(frame["subscription"], 999);
    ack(&peer, frame_id(&frame));

    let client = h.client.clone();
    let _pinging = tokio::spawn(async move { client.ping().await });
    assert_eq!(peer.recv_json().await.unwrap()["type"], "ping");
}

#[tokio::test]
async fn test_undecodable_event_is_dropped() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let (mut sub, id) = subscribe_acked(
        &h.client,
        &mut peer,
        "subscribe_events",
        json!({"event_type": "state_changed"}),
    )
    .await;

    event(&peer, id, json!({"event_type": "state_changed", "data": {}}));
    event(&peer, id, state_changed("switch.fan", "on"));

    assert_eq!(entity_of(&sub.next_event().await.unwrap()), "switch.fan");
}

struct CountingDecoder {
    calls: Arc<AtomicUsize>,
}

impl EventDecoder for CountingDecoder {
    fn decode(&self, family: TopicFamily, key: &SubscriptionKey, raw: &Value) -> hub_link::Result<HubEvent> {
        // ---
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HubEvent::Generic(GenericEvent {
            event_type: Some(format!("{family:?}/{}", key.kind())),
            raw: raw.clone(),
        }))
    }
}

#[tokio::test]
async fn test_custom_decoder() {
    // ---
    let calls = Arc::new(AtomicUsize::new(0));
    let mut h = {
        let calls = calls.clone();
        Harness::with(move |builder| builder.decoder(CountingDecoder { calls }))
    };
    let mut peer = h.open().await;

    let (mut sub, id) = subscribe_acked(
        &h.client,
        &mut peer,
        "subscribe_events",
        json!({"event_type": "state_changed"}),
    )
    .await;
    event(&peer, id, json!({"anything": true}));

    match sub.next_event().await.unwrap() {
        HubEvent::Generic(generic) => {
            assert_eq!(generic.event_type.as_deref(), Some("StateChanged/subscribe_events"));
            assert_eq!(generic.raw, json!({"anything": true}));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ---
// Recovery
// ---

#[tokio::test(start_paused = true)]
async fn test_drop_with_subscriptions_reconnects_and_resubscribes() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let (mut lights, lights_id) = subscribe_acked(
        &h.client,
        &mut peer,
        "subscribe_events",
        json!({"event_type": "state_changed"}),
    )
    .await;
    let (_template, template_id) = subscribe_acked(
        &h.client,
        &mut peer,
        "render_template",
        json!({"template": "{{ 1 + 1 }}"}),
    )
    .await;

    let dropped = Instant::now();
    peer.close();

    let mut peer = h.accept_authenticated().await;
    assert!(dropped.elapsed() >= Duration::from_secs(10));
    assert_eq!(peer.recv_json().await.unwrap()["type"], "supported_features");

    let first = peer.recv_json().await.unwrap();
    assert_eq!(first["type"], "subscribe_events");
    assert_eq!(first["event_type"], "state_changed");
    let new_lights_id = frame_id(&first);
    assert!(new_lights_id > template_id);
    ack(&peer, new_lights_id);

    let second = peer.recv_json().await.unwrap();
    assert_eq!(second["type"], "render_template");
    assert_eq!(second["template"], "{{ 1 + 1 }}");
    ack(&peer, frame_id(&second));

    // the first resubscribe has completed once the second one is written
    assert_eq!(lights.id().get(), new_lights_id);
    assert_ne!(new_lights_id, lights_id);

    event(&peer, new_lights_id, state_changed("light.porch", "on"));
    assert_eq!(entity_of(&lights.next_event().await.unwrap()), "light.porch");

    assert_eq!(h.client.state(), ConnectionState::Active);
    assert_eq!(h.client.subscription_count().await, 2);
    assert_eq!(h.connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_retries_until_hub_is_back() {
    // ---
    let mut h = Harness::with(|builder| builder.reconnect_delay(Duration::from_secs(3)));
    let mut peer = h.open().await;

    let (_sub, _) = subscribe_acked(&h.client, &mut peer, "subscribe_events", Value::Null).await;

    h.connector.set_refuse(true);
    peer.close();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.connector.attempts(), 1 + 3);

    h.connector.set_refuse(false);
    let mut peer = h.accept_authenticated().await;
    assert_eq!(peer.recv_json().await.unwrap()["type"], "supported_features");
    assert_eq!(peer.recv_json().await.unwrap()["type"], "subscribe_events");
}

#[tokio::test(start_paused = true)]
async fn test_rejected_resubscribe_ends_stream() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let (mut sub, _) = subscribe_acked(
        &h.client,
        &mut peer,
        "subscribe_trigger",
        json!({"trigger": {"platform": "state", "entity_id": "binary_sensor.door"}}),
    )
    .await;

    peer.close();

    let mut peer = h.accept_authenticated().await;
    assert_eq!(peer.recv_json().await.unwrap()["type"], "supported_features");

    let frame = peer.recv_json().await.unwrap();
    assert_eq!(frame["type"], "subscribe_trigger");
    reject(&peer, frame_id(&frame), "not_found", "entity gone");

    assert!(sub.next_event().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_resubscribe_ends_stream() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let (mut sub, _) = subscribe_acked(
        &h.client,
        &mut peer,
        "subscribe_events",
        json!({"event_type": "state_changed"}),
    )
    .await;

    peer.close();

    let mut peer = h.accept_authenticated().await;
    assert_eq!(peer.recv_json().await.unwrap()["type"], "supported_features");
    assert_eq!(peer.recv_json().await.unwrap()["type"], "subscribe_events");

    let started = Instant::now();
    assert!(sub.next_event().await.is_none());
    assert!(started.elapsed() >= Duration::from_secs(30));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.client.state(), ConnectionState::Active);
    assert_eq!(h.client.pending_requests(), 0);
    assert_eq!(h.client.subscription_count().await, 0);
}

// ---
// Shutdown
// ---

#[tokio::test]
async fn test_shutdown_fails_waiters_and_ends_streams() {
    // ---
    let mut h = Harness::new();
    let mut peer = h.open().await;

    let (mut sub, _) = subscribe_acked(&h.client, &mut peer, "subscribe_events", Value::Null).await;

    let sending = {
        let client = h.client.clone();
        tokio::spawn(async move { client.send(&json!({"type": "get_states"})).await })
    };
    assert_eq!(peer.recv_json().await.unwrap()["type"], "get_states");

    h.client.shutdown().await;

    assert!(matches!(sending.await.unwrap(), Err(HubError::Shutdown)));
    assert!(sub.next_event().await.is_none());
    peer.closed().await;

    assert!(matches!(
        h.client.send(&json!({"type": "get_states"})).await,
        Err(HubError::Shutdown)
    ));
    assert!(matches!(
        h.client.subscribe("subscribe_events", Value::Null).await,
        Err(HubError::Shutdown)
    ));
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(h.client.pending_requests(), 0);
    assert_eq!(h.client.subscription_count().await, 0);

    // idempotent
    h.client.shutdown().await;
}
