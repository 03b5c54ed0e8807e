//! Watch state changes on a real hub over WebSocket.
//!
//! Run with:
//!   HUB_URL=http://homeassistant.local:8123 HUB_TOKEN=... \
//!   cargo run --example watch_states -- light.kitchen

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::panic_in_result_fn
)]

use futures::StreamExt;
use hub_link::{HubClientBuilder, HubEvent, Result, StaticToken, StaticUrl};
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

    let url = std::env::var("HUB_URL").unwrap_or_else(|_| "http://homeassistant.local:8123".into());
    let token = std::env::var("HUB_TOKEN").expect("HUB_TOKEN must be set");
    let entity_ids: Vec<String> = std::env::args().skip(1).collect();

    let client = HubClientBuilder::new()
        .url_provider(StaticUrl::new(url))
        .token_provider(StaticToken::new(token))
        .build()?;

    client.ping().await?;
    println!("connected to hub {}", client.hub_version().unwrap_or_default());

    let mut events = client
        .subscribe("subscribe_events", json!({"event_type": "state_changed"}))
        .await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.next() => match event {
                Some(HubEvent::StateChanged(changed)) => {
                    if entity_ids.is_empty() || entity_ids.contains(&changed.entity_id) {
                        let state = changed
                            .new_state
                            .as_ref()
                            .and_then(|s| s.get("state"))
                            .cloned()
                            .unwrap_or_default();
                        println!("{}: {state}", changed.entity_id);
                    }
                }
                Some(other) => println!("{other:?}"),
                None => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}
