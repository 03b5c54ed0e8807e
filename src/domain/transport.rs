// src/domain/transport.rs

//! Socket domain abstractions.
//!
//! The engine talks to the hub through these traits only. They say nothing
//! about WebSocket libraries, TLS or HTTP upgrade; concrete connectors live
//! under `src/transport/`.
//!
//! A connector opens exactly one socket per call. The socket owns a single
//! writer (frames are never interleaved) and a reader that feeds the
//! returned inbox in arrival order. The inbox ends when the socket closes
//! for any reason, which is the engine's only close notification.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// One outbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// JSON text frame.
    Text(String),

    /// Opaque binary frame (voice streams and similar).
    Binary(Bytes),
}

impl Frame {
    /// Serialize a JSON value into a text frame.
    pub fn json(value: &serde_json::Value) -> Self {
        // ---
        Frame::Text(value.to_string())
    }
}

/// Write half of an open socket.
///
/// Implementations must serialize concurrent `send` calls so that bytes of
/// two frames are never interleaved on the wire.
#[async_trait::async_trait]
pub trait Socket: Send + Sync {
    // ---
    /// Write one frame.
    ///
    /// Fails with [`HubError::ConnectionLost`](crate::HubError::ConnectionLost)
    /// once the socket is closed.
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Close the socket. The inbox ends shortly after; closing twice is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Shared socket pointer.
pub type SocketPtr = Arc<dyn Socket>;

/// A freshly opened socket and its inbound frame queue.
pub struct SocketHandle {
    // ---
    /// Write half.
    pub socket: SocketPtr,

    /// Inbound text frames, in arrival order. `None` means the socket closed.
    pub inbox: mpsc::Receiver<String>,
}

/// Opens sockets to the hub.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat its methods as
/// normal `async fn`s.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    // ---
    /// Open a socket to `url` (already rewritten to `ws://` or `wss://`).
    ///
    /// Failures are reported as
    /// [`HubError::ConnectionUnavailable`](crate::HubError::ConnectionUnavailable).
    async fn connect(&self, url: &str) -> Result<SocketHandle>;
}

/// Shared connector pointer.
pub type ConnectorPtr = Arc<dyn Connector>;
