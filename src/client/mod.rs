// src/client/mod.rs
//! Hub client engine.
//!
//! This module contains the core [`HubClient`] type: one persistent,
//! authenticated socket to the hub, shared by request/response calls and
//! long-lived subscriptions.
//!
//! # Architecture
//!
//! Each request gets a process-unique correlation id and registers a
//! oneshot channel in the correlation table before its frame is written.
//! A per-socket dispatcher task reads inbound frames in order, completes
//! waiters and routes subscription events to their streams.
//!
//! Subscriptions are deduplicated by key in a registry. Identical
//! subscribe calls share one hub subscription; when the socket drops while
//! subscriptions remain, a recovery task reconnects after a delay and
//! resubscribes everything under fresh ids.
//!
//! # Concurrency
//!
//! The correlation table and link state sit behind short-lived std mutexes
//! that are never held across an await. Subscription registration holds an
//! async mutex for the whole subscribe round-trip, so concurrent identical
//! subscribes produce a single frame. Connection establishment is
//! serialized by its own async mutex.

mod connection;
mod dispatcher;
mod key;
mod pending;
mod sender;
mod subscription;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    lock_ignore_poison,
    log_info,
    ConnectorPtr,
    EventDecoderPtr,
    Frame,
    HubConfig,
    HubError,
    HubErrorInfo,
    HubResponse,
    IdGenerator,
    Result,
    TokenProviderPtr,
    UrlProviderPtr,
};

use connection::{CloseIntent, LinkState};
use pending::CorrelationTable;
use subscription::SubscriptionRegistry;

pub use connection::ConnectionState;
pub use key::SubscriptionKey;
pub use subscription::HubSubscription;

/// Shared state behind every clone of a [`HubClient`] and every live
/// [`HubSubscription`].
pub(crate) struct Inner {
    // ---
    config: HubConfig,
    connector: ConnectorPtr,
    url_provider: UrlProviderPtr,
    token_provider: TokenProviderPtr,
    decoder: EventDecoderPtr,
    ids: IdGenerator,

    connect_lock: tokio::sync::Mutex<()>,
    link: Mutex<LinkState>,
    pending: Mutex<CorrelationTable>,
    registry: tokio::sync::Mutex<SubscriptionRegistry>,

    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Persistent, authenticated connection to a hub.
///
/// Cheap to clone; clones share one socket, one correlation table and one
/// subscription registry. The socket is opened lazily by the first call that
/// needs it and closed again once no requests or subscriptions remain.
///
/// # Example
///
/// ```no_run
/// use hub_link::{HubClientBuilder, StaticToken, StaticUrl};
/// use serde_json::json;
///
/// # async fn example() -> hub_link::Result<()> {
/// let client = HubClientBuilder::new()
///     .url_provider(StaticUrl::new("http://homeassistant.local:8123"))
///     .token_provider(StaticToken::new("long-lived-token"))
///     .build()?;
///
/// let states = client.send(&json!({"type": "get_states"})).await?;
///
/// let mut lights = client
///     .subscribe("subscribe_entities", json!({"entity_ids": ["light.kitchen"]}))
///     .await?;
/// while let Some(event) = lights.next_event().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<Inner>,
}

impl HubClient {
    // ---

    /// Create a client (internal use by HubClientBuilder).
    pub(crate) fn new(
        config: HubConfig,
        connector: ConnectorPtr,
        url_provider: UrlProviderPtr,
        token_provider: TokenProviderPtr,
        decoder: EventDecoderPtr,
    ) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                url_provider,
                token_provider,
                decoder,
                ids: IdGenerator::new(),
                connect_lock: tokio::sync::Mutex::new(()),
                link: Mutex::new(LinkState::new()),
                pending: Mutex::new(CorrelationTable::new()),
                registry: tokio::sync::Mutex::new(SubscriptionRegistry::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Open and authenticate the socket if it is not already active.
    ///
    /// # Errors
    ///
    /// - [`HubError::ConnectionUnavailable`] when no hub URL is configured
    ///   or the socket cannot be opened
    /// - [`HubError::AuthenticationFailed`] when the hub rejects the token
    /// - [`HubError::Timeout`] when the handshake exceeds the auth timeout
    /// - [`HubError::Shutdown`] after [`shutdown`](Self::shutdown)
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Whether an authenticated socket is available, connecting if needed.
    pub async fn ensure_connected(&self) -> bool {
        self.inner.connect().await.is_ok()
    }

    /// Send a command and wait for its response, using the configured
    /// request timeout.
    ///
    /// The payload must serialize to a JSON object. Any `id` field is
    /// replaced with a fresh correlation id.
    ///
    /// # Errors
    ///
    /// - [`HubError::NotConnected`] when no authenticated socket can be had
    /// - [`HubError::Timeout`] when no response arrives in time
    /// - [`HubError::ConnectionLost`] when the socket drops first
    pub async fn send<T>(&self, payload: &T) -> Result<HubResponse>
    where
        T: Serialize + ?Sized,
    {
        self.send_with_timeout(payload, self.inner.config.request_timeout).await
    }

    /// Send a command with a custom timeout.
    ///
    /// Overrides the configured request timeout for this single call.
    pub async fn send_with_timeout<T>(&self, payload: &T, timeout: Duration) -> Result<HubResponse>
    where
        T: Serialize + ?Sized,
    {
        // ---
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            other => {
                return Err(HubError::InvalidPayload(format!(
                    "command must be a JSON object, got {other}"
                )))
            }
        };

        self.inner.open_request(&payload, timeout).await?.response().await
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<()> {
        // ---
        match self.send(&serde_json::json!({"type": "ping"})).await? {
            HubResponse::Pong => Ok(()),
            other => Err(HubError::InvalidFrame(format!("expected pong, got {other:?}"))),
        }
    }

    /// Write a binary frame (e.g. voice audio). Nothing is awaited in return.
    pub async fn send_bytes(&self, data: Bytes) -> Result<()> {
        // ---
        self.inner.connect().await.map_err(not_connected)?;
        let link = self
            .inner
            .live_link()
            .ok_or_else(|| HubError::NotConnected("connection closed".into()))?;

        link.socket.send(Frame::Binary(data)).await
    }

    /// Subscribe, sharing an existing hub subscription when one with the
    /// same key is live.
    ///
    /// `kind` is the subscribe command (`subscribe_events`,
    /// `subscribe_entities`, `render_template`...), `data` the remaining
    /// fields as a JSON object.
    ///
    /// # Errors
    ///
    /// - [`HubError::SubscriptionRejected`] when the hub refuses
    /// - [`HubError::NotConnected`], [`HubError::Timeout`],
    ///   [`HubError::ConnectionLost`] as for [`send`](Self::send)
    pub async fn subscribe(&self, kind: &str, data: Value) -> Result<HubSubscription> {
        // ---
        self.subscribe_with_idle_timeout(kind, data, self.inner.config.subscribe_idle_timeout)
            .await
    }

    /// Subscribe with a custom grace period between the last handle
    /// detaching and the unsubscribe going out.
    ///
    /// The grace period of the first subscriber for a key applies to the
    /// shared subscription.
    pub async fn subscribe_with_idle_timeout(
        &self,
        kind: &str,
        data: Value,
        idle_timeout: Duration,
    ) -> Result<HubSubscription> {
        // ---
        let key = SubscriptionKey::new(kind, data)?;
        self.inner.subscribe(key, idle_timeout).await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Version reported by the hub in `auth_ok`, while connected.
    pub fn hub_version(&self) -> Option<String> {
        lock_ignore_poison(&self.inner.link).hub_version.clone()
    }

    /// Entries in the correlation table (in-flight requests plus live
    /// subscriptions).
    pub fn pending_requests(&self) -> usize {
        lock_ignore_poison(&self.inner.pending).len()
    }

    /// Distinct live subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.inner.subscription_count().await
    }

    /// Shut the client down.
    ///
    /// Stops recovery, fails every waiter with [`HubError::Shutdown`], ends
    /// every subscription stream and closes the socket. Later calls fail
    /// with [`HubError::Shutdown`]. Calling it twice is a no-op.
    pub async fn shutdown(&self) {
        // ---
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return;
        }
        inner.shutdown.cancel();

        log_info!("shutting down hub client");

        let (epoch, recovery) = {
            let mut link = lock_ignore_poison(&inner.link);
            (link.epoch, link.recovery.take())
        };
        if let Some(task) = recovery {
            task.abort();
        }

        inner.close_link(epoch, CloseIntent::Shutdown).await;

        let drained = lock_ignore_poison(&inner.pending).drain(|| HubError::Shutdown);
        for stream in drained.into_iter().filter_map(|entry| entry.subscription) {
            stream.close();
        }

        let streams = inner.registry.lock().await.drain();
        for stream in streams {
            stream.close();
        }

        let mut link = lock_ignore_poison(&inner.link);
        link.state = ConnectionState::Disconnected;
        link.recovering = false;
    }
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("state", &self.state())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

/// Failures of the implicit connect in front of a request.
fn not_connected(err: HubError) -> HubError {
    // ---
    match err {
        HubError::Shutdown => HubError::Shutdown,
        other => HubError::NotConnected(other.to_string()),
    }
}

fn rejection_reason(response: &HubResponse) -> String {
    // ---
    match response {
        HubResponse::Result { error, .. } => HubErrorInfo::describe(error.as_ref()),
        HubResponse::Pong => "unexpected pong".to_string(),
    }
}
