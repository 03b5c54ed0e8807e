// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use hub_link::{
    //
    memory_connector,
    HubClient,
    HubClientBuilder,
    HubSubscription,
    MemoryConnector,
    MemoryListener,
    MemoryPeer,
    StaticToken,
    StaticUrl,
};

pub const HUB_URL: &str = "http://hub.test:8123";
pub const HUB_VERSION: &str = "2024.6.1";
pub const TOKEN: &str = "test-token";

pub fn init_logging() {
    // ---
    #[cfg(feature = "logging")]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// A client wired to an in-memory hub.
pub struct Harness {
    // ---
    pub client: HubClient,
    pub connector: Arc<MemoryConnector>,
    pub listener: MemoryListener,
}

impl Harness {
    // ---
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    pub fn with(configure: impl FnOnce(HubClientBuilder) -> HubClientBuilder) -> Self {
        // ---
        init_logging();

        let (connector, listener) = memory_connector();
        let builder = HubClientBuilder::new()
            .connector(connector.clone())
            .url_provider(StaticUrl::new(HUB_URL))
            .token_provider(StaticToken::new(TOKEN));

        let client = configure(builder).build().expect("build failed");

        Self {
            client,
            connector,
            listener,
        }
    }

    /// Connect and authenticate, returning the hub side of the socket with
    /// the `supported_features` frame already consumed.
    pub async fn open(&mut self) -> MemoryPeer {
        // ---
        let client = self.client.clone();
        let connecting = tokio::spawn(async move { client.connect().await });

        let mut peer = self.accept_authenticated().await;

        connecting
            .await
            .expect("connect task panicked")
            .expect("connect failed");

        let features = peer.recv_json().await.expect("no supported_features frame");
        assert_eq!(features["type"], "supported_features");

        peer
    }

    /// Accept the next socket and answer its `auth` with `auth_ok`.
    pub async fn accept_authenticated(&mut self) -> MemoryPeer {
        // ---
        let mut peer = self.listener.accept().await.expect("no connection attempt");
        let token = peer.accept_auth(HUB_VERSION).await.expect("no auth frame");
        assert_eq!(token, TOKEN);
        peer
    }
}

/// Id of a client frame.
pub fn frame_id(frame: &Value) -> u64 {
    frame["id"].as_u64().expect("frame without id")
}

pub fn ack(peer: &MemoryPeer, id: u64) {
    assert!(peer.send_json(json!({"id": id, "type": "result", "success": true, "result": null})));
}

pub fn reject(peer: &MemoryPeer, id: u64, code: &str, message: &str) {
    assert!(peer.send_json(json!({
        "id": id,
        "type": "result",
        "success": false,
        "error": {"code": code, "message": message}
    })));
}

pub fn event(peer: &MemoryPeer, id: u64, payload: Value) {
    assert!(peer.send_json(json!({"id": id, "type": "event", "event": payload})));
}

/// Subscribe through the client while playing the hub side; returns the
/// handle and the id the hub saw.
pub async fn subscribe_acked(
    client: &HubClient,
    peer: &mut MemoryPeer,
    kind: &str,
    data: Value,
) -> (HubSubscription, u64) {
    // ---
    let subscribing = {
        let client = client.clone();
        let kind = kind.to_string();
        tokio::spawn(async move { client.subscribe(&kind, data).await })
    };

    let frame = peer.recv_json().await.expect("no subscribe frame");
    assert_eq!(frame["type"], kind);
    let id = frame_id(&frame);
    ack(peer, id);

    let sub = subscribing
        .await
        .expect("subscribe task panicked")
        .expect("subscribe failed");
    (sub, id)
}
