//! Inbound dispatcher: one task per socket, frames handled strictly in
//! arrival order.
//!
//! Handling a message never awaits. Anything that needs the network (an
//! orphan unsubscribe, closing after `auth_invalid`) is spawned, so the next
//! frame is never held up and events reach each stream in wire order.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use super::pending::{Delivery, Route};
use super::Inner;
use crate::protocol::{parse_frame, InboundMessage};
use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    log_trace,
    log_warn,
    CorrelationId,
    HubResponse,
};

/// Drain `inbox` until the socket closes, then report the close.
pub(super) async fn run(inner: Weak<Inner>, epoch: u64, mut inbox: mpsc::Receiver<String>) {
    // ---
    log_debug!("dispatcher for connection {epoch} started");

    let mut orphans = HashSet::new();

    while let Some(text) = inbox.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };

        log_trace!("<- {text}");

        let messages = match parse_frame(&text) {
            Ok(messages) => messages,
            Err(err) => {
                log_warn!("dropping frame: {err}");
                continue;
            }
        };

        for message in messages {
            inner.dispatch(epoch, message, &mut orphans);
        }
    }

    log_debug!("dispatcher for connection {epoch} stopped");

    if let Some(inner) = inner.upgrade() {
        inner.on_socket_closed(epoch);
    }
}

impl Inner {
    // ---

    fn dispatch(self: &Arc<Self>, epoch: u64, message: InboundMessage, orphans: &mut HashSet<CorrelationId>) {
        // ---
        match message {
            InboundMessage::AuthRequired { ha_version } => {
                log_debug!("hub {} requires auth", ha_version.as_deref().unwrap_or("unknown"));
            }
            InboundMessage::AuthOk { ha_version } => self.on_auth_ok(epoch, ha_version),
            InboundMessage::AuthInvalid { message } => self.on_auth_invalid(epoch, message),
            InboundMessage::Pong { id } => self.on_response(id, HubResponse::Pong),
            InboundMessage::Result {
                id,
                success,
                result,
                error,
            } => self.on_response(
                id,
                HubResponse::Result {
                    success,
                    result,
                    error,
                },
            ),
            InboundMessage::Event { id, event } => self.on_event(epoch, id, event, orphans),
            InboundMessage::Unknown => log_trace!("ignoring message of unknown type"),
        }
    }

    fn on_response(&self, id: CorrelationId, response: HubResponse) {
        // ---
        let delivery = lock_ignore_poison(&self.pending).complete(id, response);
        match delivery {
            Delivery::Delivered => {}
            Delivery::Abandoned => log_debug!("response for {id} arrived after its caller gave up"),
            Delivery::AlreadyCompleted => log_debug!("duplicate response for {id}"),
            Delivery::Unknown => log_debug!("no pending request for {id}"),
        }
    }

    fn on_event(
        self: &Arc<Self>,
        epoch: u64,
        id: CorrelationId,
        raw: Value,
        orphans: &mut HashSet<CorrelationId>,
    ) {
        // ---
        let route = lock_ignore_poison(&self.pending).route(id);

        match route {
            Route::Stream(stream) => {
                match self.decoder.decode(stream.family(), stream.key(), &raw) {
                    Ok(event) => {
                        let receivers = stream.publish(event);
                        log_trace!("event {id} delivered to {receivers} handles");
                    }
                    Err(err) => log_warn!("dropping event for {}: {err}", stream.key()),
                }
            }
            Route::Request => log_debug!("event for non-subscription request {id}"),
            Route::Released => log_trace!("event {id} arrived while unsubscribing"),
            Route::Missing => {
                if orphans.insert(id) {
                    self.unsubscribe_orphan(epoch, id);
                }
            }
        }
    }

    /// The hub still streams for an id we no longer track.
    fn unsubscribe_orphan(self: &Arc<Self>, epoch: u64, id: CorrelationId) {
        // ---
        let Some(link) = self.live_link().filter(|link| link.epoch == epoch) else {
            return;
        };

        log_debug!("unsubscribing orphan subscription {id}");

        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(err) = inner.unsubscribe(&link, id).await {
                log_debug!("orphan unsubscribe of {id} failed: {err}");
            }
        });
    }
}
