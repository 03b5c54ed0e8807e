//! Persistent, authenticated WebSocket client for a home-automation hub.
//!
//! This library keeps one socket to the hub and multiplexes request/response
//! commands and long-lived event subscriptions over it. It handles
//! correlation id assignment, response matching, timeouts, subscription
//! deduplication and fan-out, and reconnect-with-resubscribe after a drop.
//!

// Import all sub modules once...
mod client;
mod decoder;
mod domain;
mod protocol;
mod transport;

mod hub_builder;
mod hub_config;
mod retry;

mod error;
mod macros;

pub(crate) use macros::{log_debug, log_error, log_info, log_trace, log_warn};

use std::sync::{Mutex, MutexGuard};

// Re-export main types
pub use client::{ConnectionState, HubClient, HubSubscription, SubscriptionKey};
pub use hub_builder::HubClientBuilder;

pub use hub_config::{websocket_url, HubConfig, DEFAULT_API_PATH};
pub use retry::ReconnectConfig;

pub use error::{HubError, Result};

pub use protocol::{CorrelationId, HubErrorInfo, HubResponse, HubVersion, IdGenerator};

pub use decoder::{
    // ---
    CompressedEntitiesEvent,
    EventDecoder,
    EventDecoderPtr,
    GenericEvent,
    HubEvent,
    PipelineRunEvent,
    StandardDecoder,
    StateChangedEvent,
    TemplateEvent,
    TopicFamily,
    TriggerEvent,
};

pub use transport::{memory_connector, MemoryConnector, MemoryListener, MemoryPeer};

#[cfg(feature = "transport_websocket")]
pub use transport::create_websocket_connector;

// --- public re-exports
pub use domain::{
    //
    Connector,
    ConnectorPtr,
    Frame,
    Socket,
    SocketHandle,
    SocketPtr,
    StaticToken,
    StaticUrl,
    TokenProvider,
    TokenProviderPtr,
    UrlProvider,
    UrlProviderPtr,
};

/// Acquire mutex guard, ignoring poisoning
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
