//! Hub client builder.
//!
//! Provides a fluent builder API for assembling a [`HubClient`] from a
//! connector, the URL and token collaborators, an optional event decoder and
//! configuration overrides.

use std::sync::Arc;
use std::time::Duration;

use crate::{
    // ---
    ConnectorPtr,
    EventDecoder,
    EventDecoderPtr,
    HubClient,
    HubConfig,
    HubError,
    ReconnectConfig,
    Result,
    StandardDecoder,
    TokenProvider,
    TokenProviderPtr,
    UrlProvider,
    UrlProviderPtr,
};

/// Builder for creating hub clients.
///
/// A URL provider and a token provider are required. Without an explicit
/// connector the WebSocket connector is used (feature `transport_websocket`).
///
/// # Examples
///
/// ## Long-lived token
/// ```no_run
/// use hub_link::{HubClientBuilder, StaticToken, StaticUrl};
/// use std::time::Duration;
///
/// # fn example() -> hub_link::Result<()> {
/// let client = HubClientBuilder::new()
///     .url_provider(StaticUrl::new("https://hub.example.org"))
///     .token_provider(StaticToken::new("long-lived-token"))
///     .request_timeout(Duration::from_secs(10))
///     .reconnect_delay(Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
///
/// ## In-memory hub for tests
/// ```
/// use hub_link::{memory_connector, HubClientBuilder, StaticToken, StaticUrl};
///
/// # fn example() -> hub_link::Result<()> {
/// let (connector, _listener) = memory_connector();
///
/// let client = HubClientBuilder::new()
///     .connector(connector)
///     .url_provider(StaticUrl::new("http://hub.test"))
///     .token_provider(StaticToken::new("token"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct HubClientBuilder {
    // ---
    connector: Option<ConnectorPtr>,
    url_provider: Option<UrlProviderPtr>,
    token_provider: Option<TokenProviderPtr>,
    decoder: Option<EventDecoderPtr>,
    config: HubConfig,
}

impl HubClientBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific connector instead of the WebSocket one.
    pub fn connector(mut self, connector: ConnectorPtr) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Where to find the hub. Required.
    pub fn url_provider(mut self, provider: impl UrlProvider + 'static) -> Self {
        self.url_provider = Some(Arc::new(provider));
        self
    }

    /// Where to get access tokens. Required.
    pub fn token_provider(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.token_provider = Some(Arc::new(provider));
        self
    }

    /// Replace the event decoder.
    ///
    /// Default: [`StandardDecoder`].
    pub fn decoder(mut self, decoder: impl EventDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the handshake ceiling.
    ///
    /// Default: 30s.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.auth_timeout = timeout;
        self
    }

    /// Set the default per-request timeout.
    ///
    /// Default: 30s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the default grace period before an unused subscription is
    /// released.
    ///
    /// Default: zero.
    pub fn subscribe_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.subscribe_idle_timeout = timeout;
        self
    }

    /// Use a fixed reconnect delay.
    ///
    /// Default: 10s.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect = ReconnectConfig::fixed(delay);
        self
    }

    /// Replace the reconnect policy.
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// Per-stream event buffer.
    ///
    /// Default: 256.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    /// Build the client (consumes self). Does not connect.
    ///
    /// # Errors
    ///
    /// [`HubError::InvalidConfig`] when a required collaborator is missing.
    pub fn build(self) -> Result<HubClient> {
        // ---
        let url_provider = self
            .url_provider
            .ok_or_else(|| HubError::InvalidConfig("url provider is required".into()))?;
        let token_provider = self
            .token_provider
            .ok_or_else(|| HubError::InvalidConfig("token provider is required".into()))?;

        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector(&self.config)?,
        };

        let decoder = self.decoder.unwrap_or_else(|| Arc::new(StandardDecoder));

        Ok(HubClient::new(
            self.config,
            connector,
            url_provider,
            token_provider,
            decoder,
        ))
    }
}

#[cfg(feature = "transport_websocket")]
fn default_connector(config: &HubConfig) -> Result<ConnectorPtr> {
    Ok(crate::create_websocket_connector(config.inbox_capacity))
}

#[cfg(not(feature = "transport_websocket"))]
fn default_connector(_config: &HubConfig) -> Result<ConnectorPtr> {
    Err(HubError::InvalidConfig(
        "no connector given and the websocket transport is disabled".into(),
    ))
}
