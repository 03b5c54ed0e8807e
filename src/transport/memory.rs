//! In-memory connector.
//!
//! This module provides a pure in-process implementation of the domain-level
//! [`Connector`] trait. It is intended primarily for testing, local execution,
//! and as a reference for socket semantics.
//!
//! ## Reference Semantics
//!
//! Each successful `connect()` produces one [`MemoryPeer`] on the paired
//! [`MemoryListener`]. The peer plays the hub: it reads what the client
//! wrote and pushes frames back.
//!
//! - Frames are delivered in order, in both directions.
//! - Closing either side ends the other: a peer that is dropped or closed
//!   ends the client's inbox, and a client-side close ends the peer's stream
//!   of outbound frames.
//! - No frames are dropped due to timing or scheduling.
//!
//! ## Non-Goals
//!
//! This connector does not emulate TLS, HTTP upgrade or WebSocket control
//! frames. It exists to provide a deterministic baseline against which the
//! client engine can be validated.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    Connector,
    Frame,
    HubError,
    Result,
    Socket,
    SocketHandle,
};

const DEFAULT_INBOX_CAPACITY: usize = 512;

/// Create a connector and the listener that receives its connections.
///
/// # ⚠️  Testing Only
///
/// Production code should use a network connector such as the WebSocket one.
pub fn memory_connector() -> (Arc<MemoryConnector>, MemoryListener) {
    // ---
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();

    let connector = Arc::new(MemoryConnector {
        accept_tx,
        refuse: AtomicBool::new(false),
        attempts: AtomicUsize::new(0),
    });

    (connector, MemoryListener { accept_rx })
}

/// Client side of the in-memory link.
pub struct MemoryConnector {
    // ---
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    /// Make subsequent `connect()` calls fail with
    /// [`HubError::ConnectionUnavailable`] (or succeed again with `false`).
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of `connect()` calls so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    // ---
    async fn connect(&self, url: &str) -> Result<SocketHandle> {
        // ---
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.refuse.load(Ordering::SeqCst) {
            log_debug!("memory connector: refusing {url}");
            return Err(HubError::ConnectionUnavailable(format!(
                "connection to {url} refused"
            )));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::channel(DEFAULT_INBOX_CAPACITY);
        let closed = CancellationToken::new();

        tokio::spawn(forward_to_inbox(peer_rx, inbox_tx, closed.clone()));

        let peer = MemoryPeer {
            url: url.to_string(),
            outbound: outbound_rx,
            inbound: Some(peer_tx),
            closed: closed.clone(),
        };

        self.accept_tx.send(peer).map_err(|_| {
            HubError::ConnectionUnavailable(format!("no listener for {url}"))
        })?;

        log_debug!("memory connector: connected to {url}");

        Ok(SocketHandle {
            socket: Arc::new(MemorySocket {
                outbound: Mutex::new(Some(outbound_tx)),
                closed,
            }),
            inbox: inbox_rx,
        })
    }
}

// Moves peer frames into the client inbox until either side closes.
async fn forward_to_inbox(
    mut from_peer: mpsc::UnboundedReceiver<String>,
    inbox: mpsc::Sender<String>,
    closed: CancellationToken,
) {
    // ---
    loop {
        tokio::select! {
            biased;

            frame = from_peer.recv() => match frame {
                Some(text) => {
                    if inbox.send(text).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            _ = closed.cancelled() => break,
        }
    }

    closed.cancel();
}

struct MemorySocket {
    // ---
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    closed: CancellationToken,
}

#[async_trait::async_trait]
impl Socket for MemorySocket {
    // ---
    async fn send(&self, frame: Frame) -> Result<()> {
        // ---
        if self.closed.is_cancelled() {
            return Err(HubError::ConnectionLost);
        }

        let outbound = lock_ignore_poison(&self.outbound);
        match outbound.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| HubError::ConnectionLost),
            None => Err(HubError::ConnectionLost),
        }
    }

    async fn close(&self) -> Result<()> {
        // ---
        lock_ignore_poison(&self.outbound).take();
        self.closed.cancel();
        Ok(())
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Accepts connections made through the paired [`MemoryConnector`].
pub struct MemoryListener {
    // ---
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next connection. `None` once the connector is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Return a connection that is already waiting, if any.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

/// Hub side of one in-memory connection.
pub struct MemoryPeer {
    // ---
    url: String,
    outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: Option<mpsc::UnboundedSender<String>>,
    closed: CancellationToken,
}

impl MemoryPeer {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next frame written by the client. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        // ---
        tokio::select! {
            biased;
            frame = self.outbound.recv() => frame,
            _ = self.closed.cancelled() => self.outbound.try_recv().ok(),
        }
    }

    /// Next text frame written by the client, parsed as JSON.
    ///
    /// Binary frames and text that is not JSON are skipped.
    pub async fn recv_json(&mut self) -> Option<Value> {
        // ---
        loop {
            if let Frame::Text(text) = self.recv().await? {
                if let Ok(value) = serde_json::from_str(&text) {
                    return Some(value);
                }
            }
        }
    }

    /// A frame already written by the client, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }

    /// Push a raw text frame to the client. Returns `false` once closed.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        // ---
        match &self.inbound {
            Some(tx) if !self.closed.is_cancelled() => tx.send(text.into()).is_ok(),
            _ => false,
        }
    }

    /// Push a JSON frame to the client. Returns `false` once closed.
    pub fn send_json(&self, value: Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Read the client's `auth` frame and answer `auth_ok`.
    ///
    /// Returns the access token the client presented.
    pub async fn accept_auth(&mut self, ha_version: &str) -> Option<String> {
        // ---
        let token = self.expect_auth().await?;
        self.send_json(serde_json::json!({"type": "auth_ok", "ha_version": ha_version}));
        Some(token)
    }

    /// Read the client's `auth` frame and answer `auth_invalid`.
    pub async fn reject_auth(&mut self, message: &str) -> Option<String> {
        // ---
        let token = self.expect_auth().await?;
        self.send_json(serde_json::json!({"type": "auth_invalid", "message": message}));
        Some(token)
    }

    async fn expect_auth(&mut self) -> Option<String> {
        // ---
        let frame = self.recv_json().await?;
        if frame.get("type").and_then(Value::as_str) != Some("auth") {
            return None;
        }
        frame
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// Whether the client closed its side.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the client closes its side.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Drop the connection from the hub side. The client sees its inbox end.
    pub fn close(mut self) {
        self.inbound.take();
    }
}
