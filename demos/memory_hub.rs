//! Client and a scripted hub in one process, over the in-memory connector.
//!
//! Shows the handshake, a request, a shared subscription and idle teardown
//! without a real hub.
//!
//! Run with: cargo run --example memory_hub

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::panic_in_result_fn
)]

use hub_link::{memory_connector, HubClientBuilder, HubEvent, Result, StaticToken, StaticUrl};
use serde_json::json;
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let (connector, mut listener) = memory_connector();

    let client = HubClientBuilder::new()
        .connector(connector)
        .url_provider(StaticUrl::new("http://hub.local:8123"))
        .token_provider(StaticToken::new("demo-token"))
        .build()?;

    // Scripted hub: accept, answer get_states, ack one subscription, push
    // two events, then ack the unsubscribe.
    let hub = tokio::spawn(async move {
        let mut peer = listener.accept().await.expect("no connection");
        peer.accept_auth("2024.6.1").await.expect("no auth");

        loop {
            let Some(frame) = peer.recv_json().await else {
                break;
            };
            let id = frame["id"].clone();

            match frame["type"].as_str() {
                Some("get_states") => {
                    peer.send_json(json!({
                        "id": id, "type": "result", "success": true,
                        "result": [{"entity_id": "light.kitchen", "state": "off"}]
                    }));
                }
                Some("subscribe_events") => {
                    peer.send_json(json!({"id": id, "type": "result", "success": true, "result": null}));
                    for state in ["on", "off"] {
                        peer.send_json(json!({
                            "id": id, "type": "event",
                            "event": {
                                "event_type": "state_changed",
                                "data": {"entity_id": "light.kitchen", "new_state": {"state": state}}
                            }
                        }));
                    }
                }
                Some("unsubscribe_events") => {
                    peer.send_json(json!({"id": id, "type": "result", "success": true, "result": null}));
                }
                _ => {}
            }
        }
        println!("hub: client closed the connection");
    });

    let states = client.send(&json!({"type": "get_states"})).await?;
    println!("states: {:?}", states.into_result());

    let mut first = client
        .subscribe("subscribe_events", json!({"event_type": "state_changed"}))
        .await?;
    let second = client
        .subscribe("subscribe_events", json!({"event_type": "state_changed"}))
        .await?;
    println!("shared subscription id {} ({} live)", first.id(), client.subscription_count().await);

    for _ in 0..2 {
        if let Some(HubEvent::StateChanged(changed)) = first.next_event().await {
            println!("{} -> {:?}", changed.entity_id, changed.new_state);
        }
    }

    drop(first);
    drop(second);

    hub.await.expect("hub task panicked");
    println!("client state: {:?}", client.state());

    Ok(())
}
