//! Public, transport-agnostic hub client configuration.
//!
//! This type contains no WebSocket-library concepts. The connector is
//! responsible for turning the resolved URL into an actual socket.

use std::time::Duration;

use url::Url;

use crate::{HubError, HubVersion, ReconnectConfig, Result};

/// Path appended to the hub base URL to reach the WebSocket API.
pub const DEFAULT_API_PATH: &str = "/api/websocket";

/// Hub client configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    // ---
    /// Path appended to the resolved hub URL.
    ///
    /// Default: `/api/websocket`
    pub api_path: String,

    /// Ceiling for the open + authenticate handshake.
    ///
    /// Default: 30 seconds
    pub auth_timeout: Duration,

    /// Default timeout for [`HubClient::send`](crate::HubClient::send).
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Grace period between the last subscription handle detaching and the
    /// `unsubscribe_events` request going out.
    ///
    /// Default: zero (unsubscribe immediately)
    pub subscribe_idle_timeout: Duration,

    /// Delay policy for reconnect-and-resubscribe after a connection drop.
    ///
    /// Default: fixed 10 second delay, unlimited attempts
    pub reconnect: ReconnectConfig,

    /// Oldest hub version that is sent a `supported_features` frame.
    ///
    /// Default: 2022.9.0
    pub features_min_version: HubVersion,

    /// Per-stream multicast buffer; slower consumers skip older events.
    ///
    /// Default: 256
    pub event_capacity: usize,

    /// Depth of the inbound frame queue feeding the dispatcher.
    ///
    /// Default: 512
    pub inbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        // ---
        Self {
            api_path: DEFAULT_API_PATH.to_string(),
            auth_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            subscribe_idle_timeout: Duration::ZERO,
            reconnect: ReconnectConfig::default(),
            features_min_version: HubVersion::new(2022, 9, 0),
            event_capacity: 256,
            inbox_capacity: 512,
        }
    }
}

impl HubConfig {
    /// Set the handshake ceiling.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the default per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the default idle grace period for subscriptions.
    pub fn with_subscribe_idle_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_idle_timeout = timeout;
        self
    }

    /// Replace the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Override the API path.
    pub fn with_api_path(mut self, path: impl Into<String>) -> Self {
        self.api_path = path.into();
        self
    }

    /// Override the feature-negotiation floor.
    pub fn with_features_min_version(mut self, version: HubVersion) -> Self {
        self.features_min_version = version;
        self
    }

    /// Override the per-stream multicast buffer.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub(crate) fn websocket_url(&self, base: &str) -> Result<String> {
        // ---
        websocket_url(base, &self.api_path)
    }
}

/// Rewrite a hub base URL into its WebSocket API endpoint.
///
/// `http` becomes `ws`, `https` becomes `wss`; `ws`/`wss` are kept. Any
/// existing path is preserved and `api_path` is appended after it.
pub fn websocket_url(base: &str, api_path: &str) -> Result<String> {
    // ---
    let parsed = Url::parse(base.trim())
        .map_err(|err| HubError::ConnectionUnavailable(format!("invalid hub url {base:?}: {err}")))?;

    let scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(HubError::ConnectionUnavailable(format!(
                "unsupported hub url scheme {other:?}"
            )))
        }
    };

    let host = parsed
        .host_str()
        .ok_or_else(|| HubError::ConnectionUnavailable(format!("hub url {base:?} has no host")))?;

    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let prefix = parsed.path().trim_end_matches('/');
    let suffix = api_path.trim_start_matches('/');

    Ok(format!("{scheme}://{authority}{prefix}/{suffix}"))
}
