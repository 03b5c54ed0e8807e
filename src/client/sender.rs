//! Outbound sender: correlation id assignment and frame writes.
//!
//! Every tracked write registers its table entry before the frame leaves,
//! so a response can never arrive ahead of its waiter. Writes go through
//! the socket, which serializes concurrent senders.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot;

use super::subscription::SharedStream;
use super::Inner;
use crate::protocol::frames;
use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    log_trace,
    CorrelationId,
    Frame,
    HubError,
    HubResponse,
    Result,
    SocketPtr,
};

/// An authenticated socket and the epoch it belongs to.
#[derive(Clone)]
pub(super) struct LiveLink {
    pub(super) socket: SocketPtr,
    pub(super) epoch: u64,
}

/// A written request whose response has not been awaited yet.
pub(super) struct Outstanding {
    pub(super) id: CorrelationId,
    rx: oneshot::Receiver<Result<HubResponse>>,
    timeout: Duration,
}

impl Outstanding {
    /// Wait for the response.
    ///
    /// On timeout the table entry is left in place; a late response is then
    /// dropped by the dispatcher.
    pub(super) async fn response(self) -> Result<HubResponse> {
        // ---
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(HubError::ConnectionLost),
            Err(_) => {
                log_debug!("request {} timed out after {:?}", self.id, self.timeout);
                Err(HubError::Timeout)
            }
        }
    }
}

impl Inner {
    // ---

    /// Assign an id, register the table entry and write the frame.
    pub(super) async fn write_request(
        &self,
        link: &LiveLink,
        payload: &Map<String, Value>,
        timeout: Duration,
        subscription: Option<Arc<SharedStream>>,
    ) -> Result<Outstanding> {
        // ---
        let id = self.ids.next_id();
        let rx = {
            // Table before link; close_if_idle nests them the same way.
            let mut pending = lock_ignore_poison(&self.pending);
            if !self.accepts_requests(link.epoch) {
                return Err(HubError::NotConnected("connection closing".into()));
            }
            pending.register(id, payload.clone(), timeout, link.epoch, subscription)
        };

        let frame = frames::with_id(payload, id);
        log_trace!("-> {frame}");

        if let Err(err) = link.socket.send(Frame::json(&frame)).await {
            lock_ignore_poison(&self.pending).remove(id);
            log_debug!("write of request {id} failed: {err}");
            return Err(HubError::ConnectionLost);
        }

        Ok(Outstanding { id, rx, timeout })
    }

    /// Write a frame with a fresh id that nobody waits on.
    pub(super) async fn write_untracked(&self, socket: &SocketPtr, frame: impl FnOnce(CorrelationId) -> Value) -> Result<()> {
        // ---
        let frame = frame(self.ids.next_id());
        log_trace!("-> {frame}");
        socket.send(Frame::json(&frame)).await
    }

    /// Connect if needed and write a request on the live socket.
    ///
    /// A socket marked for closing between the connect and the write is
    /// replaced once.
    pub(super) async fn open_request(
        self: &Arc<Self>,
        payload: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Outstanding> {
        // ---
        let mut retried = false;
        loop {
            self.connect().await.map_err(super::not_connected)?;
            let written = match self.live_link() {
                Some(link) => self.write_request(&link, payload, timeout, None).await,
                None => Err(HubError::NotConnected("connection closed".into())),
            };
            match written {
                Err(HubError::NotConnected(reason)) if !retried && !self.shutdown.is_cancelled() => {
                    log_debug!("request deferred to a fresh connection: {reason}");
                    retried = true;
                }
                other => return other,
            }
        }
    }

    /// Release hub subscription `id` and wait for the hub's answer.
    pub(super) async fn unsubscribe(&self, link: &LiveLink, id: CorrelationId) -> Result<()> {
        // ---
        let response = self
            .write_request(
                link,
                &frames::unsubscribe_events(id),
                self.config.request_timeout,
                None,
            )
            .await?
            .response()
            .await?;

        if !response.is_success() {
            log_debug!("hub refused to unsubscribe {id}: {}", super::rejection_reason(&response));
        }
        Ok(())
    }

    /// The current socket, if it is authenticated and not being closed.
    pub(super) fn live_link(&self) -> Option<LiveLink> {
        // ---
        let link = lock_ignore_poison(&self.link);
        match (&link.socket, link.state, link.close_intent) {
            (Some(socket), crate::ConnectionState::Active, None) => Some(LiveLink {
                socket: socket.clone(),
                epoch: link.epoch,
            }),
            _ => None,
        }
    }
}
