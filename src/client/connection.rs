//! Connection lifecycle: open, authenticate, negotiate, tear down, recover.
//!
//! ```text
//!  Disconnected ──connect──▶ Authenticating ──auth_ok──▶ Active
//!                                 │                        │
//!                            auth_invalid             socket closed
//!                                 ▼                        ▼
//!                             ClosedAuth              ClosedOther ──recovery──▶ Authenticating
//! ```
//!
//! Each opened socket gets a new epoch. Close notifications and auth
//! messages carry the epoch of the socket they came from and are ignored
//! once a newer socket exists.

use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::subscription::SharedStream;
use super::Inner;
use crate::protocol::frames;
use crate::retry::retry_with_backoff;
use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    log_info,
    log_warn,
    CorrelationId,
    Frame,
    HubError,
    HubVersion,
    Result,
    SocketHandle,
    SocketPtr,
};

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket. Initial state, and the state after idle teardown or shutdown.
    Disconnected,
    /// Socket open, waiting for the hub to accept the token.
    Authenticating,
    /// Authenticated; requests and subscriptions can be sent.
    Active,
    /// The hub rejected the token. Not recovered automatically.
    ClosedAuth,
    /// The socket dropped for any other reason.
    ClosedOther,
}

/// Why the engine closed a socket itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CloseIntent {
    Idle,
    Shutdown,
    HandshakeFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Readiness {
    Pending,
    Ready,
    Rejected(String),
    Lost,
}

/// Completes once per socket with the outcome of authentication.
pub(super) struct ReadySignal {
    tx: watch::Sender<Readiness>,
}

impl ReadySignal {
    pub(super) fn new() -> Self {
        // ---
        let (tx, _rx) = watch::channel(Readiness::Pending);
        Self { tx }
    }

    /// First resolution wins. Returns whether this call resolved it.
    pub(super) fn resolve(&self, outcome: Readiness) -> bool {
        // ---
        self.tx.send_if_modified(|current| {
            if *current == Readiness::Pending {
                *current = outcome;
                true
            } else {
                false
            }
        })
    }

    pub(super) async fn wait(&self) -> Readiness {
        // ---
        let mut rx = self.tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if current != Readiness::Pending {
                return current;
            }
            if rx.changed().await.is_err() {
                return Readiness::Lost;
            }
        }
    }
}

pub(super) struct LinkState {
    // ---
    pub(super) state: ConnectionState,
    pub(super) socket: Option<SocketPtr>,
    pub(super) ready: Arc<ReadySignal>,
    pub(super) epoch: u64,
    pub(super) hub_version: Option<String>,
    pub(super) close_intent: Option<CloseIntent>,
    pub(super) recovering: bool,
    pub(super) recovery: Option<JoinHandle<()>>,
}

impl LinkState {
    pub(super) fn new() -> Self {
        // ---
        Self {
            state: ConnectionState::Disconnected,
            socket: None,
            ready: Arc::new(ReadySignal::new()),
            epoch: 0,
            hub_version: None,
            close_intent: None,
            recovering: false,
            recovery: None,
        }
    }
}

impl Inner {
    // ---

    /// Open and authenticate a socket unless one is already active.
    ///
    /// Concurrent callers are serialized; the second one finds the link
    /// active and returns immediately.
    pub(super) async fn connect(self: &Arc<Self>) -> Result<()> {
        // ---
        if self.shutdown.is_cancelled() {
            return Err(HubError::Shutdown);
        }

        let _guard = self.connect_lock.lock().await;

        if self.shutdown.is_cancelled() {
            return Err(HubError::Shutdown);
        }
        if self.live_link().is_some() {
            return Ok(());
        }

        let base = self
            .url_provider
            .hub_url()
            .await
            .ok_or_else(|| HubError::ConnectionUnavailable("no hub url configured".into()))?;
        let url = self.config.websocket_url(&base)?;

        log_debug!("connecting to {url}");
        let SocketHandle { socket, inbox } = self.connector.connect(&url).await?;

        let (epoch, ready) = {
            let mut link = lock_ignore_poison(&self.link);
            link.epoch += 1;
            link.state = ConnectionState::Authenticating;
            link.socket = Some(socket.clone());
            link.ready = Arc::new(ReadySignal::new());
            link.hub_version = None;
            link.close_intent = None;
            (link.epoch, link.ready.clone())
        };

        tokio::spawn(super::dispatcher::run(Arc::downgrade(self), epoch, inbox));

        if let Err(err) = self.authenticate(&socket, &ready).await {
            log_warn!("handshake with {url} failed: {err}");
            self.close_link(epoch, CloseIntent::HandshakeFailed).await;
            if self.shutdown.is_cancelled() {
                return Err(HubError::Shutdown);
            }
            return Err(err);
        }

        let version = lock_ignore_poison(&self.link).hub_version.clone();
        log_info!("connected to {url} (hub {})", version.as_deref().unwrap_or("unknown"));

        self.negotiate_features(&socket, version.as_deref()).await;
        self.schedule_resubscribe(epoch);
        Ok(())
    }

    async fn authenticate(&self, socket: &SocketPtr, ready: &ReadySignal) -> Result<()> {
        // ---
        let handshake = async {
            let token = self.token_provider.access_token().await?;
            socket.send(Frame::json(&frames::auth(&token))).await?;
            Ok::<_, HubError>(ready.wait().await)
        };

        match tokio::time::timeout(self.config.auth_timeout, handshake).await {
            Err(_) => Err(HubError::Timeout),
            Ok(Err(err)) => Err(err),
            Ok(Ok(Readiness::Ready)) => Ok(()),
            Ok(Ok(Readiness::Rejected(message))) => Err(HubError::AuthenticationFailed(message)),
            Ok(Ok(Readiness::Pending | Readiness::Lost)) => Err(HubError::ConnectionUnavailable(
                "socket closed during handshake".into(),
            )),
        }
    }

    async fn negotiate_features(&self, socket: &SocketPtr, version: Option<&str>) {
        // ---
        let supported = version
            .and_then(HubVersion::parse)
            .is_some_and(|v| v.is_at_least(&self.config.features_min_version));

        if !supported {
            log_debug!("hub {version:?} predates feature negotiation");
            return;
        }

        if let Err(err) = self.write_untracked(socket, frames::supported_features).await {
            log_warn!("supported_features not sent: {err}");
        }
    }

    pub(super) fn on_auth_ok(&self, epoch: u64, ha_version: Option<String>) {
        // ---
        let mut link = lock_ignore_poison(&self.link);
        if link.epoch != epoch || link.state != ConnectionState::Authenticating {
            log_debug!("ignoring auth_ok for connection {epoch}");
            return;
        }
        link.state = ConnectionState::Active;
        link.hub_version = ha_version;
        link.ready.resolve(Readiness::Ready);
    }

    pub(super) fn on_auth_invalid(&self, epoch: u64, message: Option<String>) {
        // ---
        let message = message.unwrap_or_else(|| "invalid access token".into());
        let socket = {
            let mut link = lock_ignore_poison(&self.link);
            if link.epoch != epoch {
                return;
            }
            link.state = ConnectionState::ClosedAuth;
            link.ready.resolve(Readiness::Rejected(message.clone()));
            link.socket.clone()
        };

        log_warn!("hub rejected credentials: {message}");

        if let Some(socket) = socket {
            tokio::spawn(async move {
                let _ = socket.close().await;
            });
        }
    }

    /// Close the socket of `epoch` from our side.
    pub(super) async fn close_link(self: &Arc<Self>, epoch: u64, intent: CloseIntent) {
        // ---
        let socket = {
            let mut link = lock_ignore_poison(&self.link);
            if link.epoch != epoch {
                return;
            }
            link.close_intent = Some(intent);
            link.socket.clone()
        };

        self.finish_close(epoch, socket).await;
    }

    /// Mark the active socket for closing. From here on it takes no new
    /// requests. Returns its epoch and socket, or `None` when there is no
    /// active socket or it is already closing.
    pub(super) fn mark_closing(&self, intent: CloseIntent) -> Option<(u64, Option<SocketPtr>)> {
        // ---
        let mut link = lock_ignore_poison(&self.link);
        if link.state != ConnectionState::Active || link.socket.is_none() || link.close_intent.is_some() {
            return None;
        }
        link.close_intent = Some(intent);
        Some((link.epoch, link.socket.clone()))
    }

    pub(super) async fn finish_close(self: &Arc<Self>, epoch: u64, socket: Option<SocketPtr>) {
        // ---
        self.on_socket_closed(epoch);

        if let Some(socket) = socket {
            if let Err(err) = socket.close().await {
                log_debug!("socket close failed: {err}");
            }
        }
    }

    /// Whether socket `epoch` is open and not marked for closing.
    pub(super) fn accepts_requests(&self, epoch: u64) -> bool {
        // ---
        let link = lock_ignore_poison(&self.link);
        link.epoch == epoch && link.socket.is_some() && link.close_intent.is_none()
    }

    /// Tear down the state of a closed socket. Runs once per epoch.
    pub(super) fn on_socket_closed(self: &Arc<Self>, epoch: u64) {
        // ---
        let intent = {
            let mut link = lock_ignore_poison(&self.link);
            if link.epoch != epoch || link.socket.is_none() {
                return;
            }

            link.socket = None;
            link.hub_version = None;
            link.ready.resolve(Readiness::Lost);
            link.ready = Arc::new(ReadySignal::new());

            link.state = match (link.state, link.close_intent) {
                (ConnectionState::ClosedAuth, _) => ConnectionState::ClosedAuth,
                (_, Some(CloseIntent::Idle | CloseIntent::Shutdown)) => ConnectionState::Disconnected,
                _ => ConnectionState::ClosedOther,
            };

            log_info!("connection {epoch} closed ({:?})", link.state);
            link.close_intent
        };

        let woken = {
            let mut pending = lock_ignore_poison(&self.pending);
            match intent {
                Some(CloseIntent::Shutdown) => pending.fail_on_close(|| HubError::Shutdown),
                _ => pending.fail_on_close(|| HubError::ConnectionLost),
            }
        };
        if woken > 0 {
            log_debug!("failed {woken} in-flight requests");
        }

        if intent.is_none() {
            self.schedule_recovery();
        }
    }

    fn schedule_recovery(self: &Arc<Self>) {
        // ---
        if self.shutdown.is_cancelled() || !lock_ignore_poison(&self.pending).has_subscriptions() {
            return;
        }

        let mut link = lock_ignore_poison(&self.link);
        if link.state == ConnectionState::ClosedAuth || link.recovering {
            return;
        }

        log_info!(
            "subscriptions outstanding, reconnecting in {:?}",
            self.config.reconnect.initial_delay
        );
        link.recovering = true;
        link.recovery = Some(tokio::spawn(recover(Arc::downgrade(self))));
    }

    /// Resubscribe everything still bound to an older socket.
    fn schedule_resubscribe(self: &Arc<Self>, epoch: u64) {
        // ---
        let stale = lock_ignore_poison(&self.pending).stale_subscriptions(epoch);
        if stale.is_empty() {
            return;
        }

        log_info!("resubscribing {} subscriptions", stale.len());
        tokio::spawn(self.clone().resubscribe(epoch, stale));
    }

    async fn resubscribe(self: Arc<Self>, epoch: u64, stale: Vec<(CorrelationId, Arc<SharedStream>)>) {
        // ---
        for (old_id, stream) in stale {
            if stream.is_closed() {
                continue;
            }
            match self.resubscribe_one(epoch, old_id, &stream).await {
                Ok(new_id) => log_debug!("resubscribed {} as {new_id} (was {old_id})", stream.key()),
                Err(HubError::SubscriptionRejected(reason)) => {
                    log_warn!("hub rejected resubscribe of {}: {reason}", stream.key());
                    self.retire_stream(&stream).await;
                }
                Err(HubError::Timeout) if self.live_link().is_some_and(|link| link.epoch == epoch) => {
                    log_warn!("hub did not answer resubscribe of {}, ending it", stream.key());
                    self.retire_stream(&stream).await;
                }
                Err(err) => {
                    log_debug!("resubscribe of {} deferred: {err}", stream.key());
                }
            }
        }
    }

    async fn resubscribe_one(
        &self,
        epoch: u64,
        old_id: CorrelationId,
        stream: &Arc<SharedStream>,
    ) -> Result<CorrelationId> {
        // ---
        let link = self
            .live_link()
            .filter(|link| link.epoch == epoch)
            .ok_or_else(|| HubError::NotConnected("connection replaced".into()))?;

        let outstanding = self
            .write_request(
                &link,
                stream.key().payload(),
                self.config.request_timeout,
                Some(stream.clone()),
            )
            .await?;
        let new_id = outstanding.id;

        let response = match outstanding.response().await {
            Ok(response) => response,
            Err(err) => {
                lock_ignore_poison(&self.pending).remove(new_id);
                return Err(err);
            }
        };

        let mut pending = lock_ignore_poison(&self.pending);
        if response.is_success() {
            pending.remove(old_id);
            stream.set_id(new_id);
            Ok(new_id)
        } else {
            pending.remove(new_id);
            pending.remove(old_id);
            Err(HubError::SubscriptionRejected(super::rejection_reason(&response)))
        }
    }

    pub(super) fn state(&self) -> ConnectionState {
        lock_ignore_poison(&self.link).state
    }
}

/// Reconnect loop. Holds only a weak reference between attempts.
async fn recover(inner: Weak<Inner>) {
    // ---
    let Some((reconnect, cancel)) = inner
        .upgrade()
        .map(|strong| (strong.config.reconnect.clone(), strong.shutdown.clone()))
    else {
        return;
    };

    loop {
        let outcome = retry_with_backoff(&reconnect, &cancel, || {
            let inner = inner.clone();
            async move {
                let inner = inner.upgrade().ok_or(HubError::Shutdown)?;
                if !lock_ignore_poison(&inner.pending).has_subscriptions() {
                    return Ok(false);
                }
                inner.connect().await.map(|()| true)
            }
        })
        .await;

        let Some(strong) = inner.upgrade() else {
            return;
        };
        let mut link = lock_ignore_poison(&strong.link);

        match outcome {
            // The link may have dropped again before we got here; its close
            // handler saw `recovering` and left the retry to us.
            Ok(true) if link.state != ConnectionState::Active => continue,
            Ok(true) => log_debug!("recovery complete"),
            Ok(false) => log_debug!("no subscriptions left, recovery stopped"),
            Err(err) => log_warn!("recovery stopped: {err}"),
        }

        link.recovering = false;
        return;
    }
}
