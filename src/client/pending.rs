//! Correlation table: in-flight requests and live subscriptions by id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::subscription::SharedStream;
use crate::{CorrelationId, HubError, HubResponse, Result};

pub(super) type Waiter = oneshot::Sender<Result<HubResponse>>;

/// One request awaiting its response.
///
/// Subscription entries outlive their acknowledgement: they stay in the
/// table so that later events with the same id reach the stream.
pub(super) struct PendingRequest {
    // ---
    pub(super) id: CorrelationId,
    pub(super) payload: Map<String, Value>,
    pub(super) created_at: Instant,
    pub(super) timeout: Duration,
    /// Connection epoch the request was written on.
    pub(super) epoch: u64,
    pub(super) subscription: Option<Arc<SharedStream>>,
    waiter: Option<Waiter>,
}

/// Outcome of delivering a response to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Delivery {
    Delivered,
    /// The caller gave up (timed out) before the response arrived.
    Abandoned,
    AlreadyCompleted,
    Unknown,
}

impl PendingRequest {
    pub(super) fn has_completed_once(&self) -> bool {
        self.waiter.is_none()
    }

    pub(super) fn is_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    fn complete(&mut self, outcome: Result<HubResponse>) -> Delivery {
        // ---
        match self.waiter.take() {
            Some(tx) => match tx.send(outcome) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Abandoned,
            },
            None => Delivery::AlreadyCompleted,
        }
    }
}

/// Routing target of an event frame.
pub(super) enum Route {
    Stream(Arc<SharedStream>),
    /// The id belongs to a plain request, not a subscription.
    Request,
    /// An unsubscribe for this id is on its way to the hub.
    Released,
    Missing,
}

pub(super) struct CorrelationTable {
    // ---
    entries: HashMap<CorrelationId, PendingRequest>,
    /// Hub subscriptions being unsubscribed on the current socket.
    released: HashSet<CorrelationId>,
}

impl CorrelationTable {
    // ---

    pub(super) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            released: HashSet::new(),
        }
    }

    /// Register a new entry and return the receiver its response goes to.
    pub(super) fn register(
        &mut self,
        id: CorrelationId,
        payload: Map<String, Value>,
        timeout: Duration,
        epoch: u64,
        subscription: Option<Arc<SharedStream>>,
    ) -> oneshot::Receiver<Result<HubResponse>> {
        // ---
        let (tx, rx) = oneshot::channel();
        let request = PendingRequest {
            id,
            payload,
            created_at: Instant::now(),
            timeout,
            epoch,
            subscription,
            waiter: Some(tx),
        };
        self.entries.insert(id, request);
        rx
    }

    /// Deliver a response. Plain requests leave the table; subscription
    /// entries stay so their events keep routing.
    pub(super) fn complete(&mut self, id: CorrelationId, response: HubResponse) -> Delivery {
        // ---
        let Some(entry) = self.entries.get_mut(&id) else {
            return Delivery::Unknown;
        };

        let delivery = entry.complete(Ok(response));

        if delivery == Delivery::Abandoned {
            crate::log_debug!(
                "response for {id} arrived {:?} after send (timeout {:?})",
                entry.created_at.elapsed(),
                entry.timeout
            );
        }

        if !entry.is_subscription() {
            self.entries.remove(&id);
        }

        delivery
    }

    pub(super) fn route(&self, id: CorrelationId) -> Route {
        // ---
        match self.entries.get(&id) {
            Some(PendingRequest {
                subscription: Some(stream),
                ..
            }) => Route::Stream(stream.clone()),
            Some(_) => Route::Request,
            None if self.released.contains(&id) => Route::Released,
            None => Route::Missing,
        }
    }

    pub(super) fn remove(&mut self, id: CorrelationId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// The socket closed: wake every waiter with `error()`, drop plain
    /// requests and keep subscription entries for resubscribe.
    ///
    /// Returns the number of waiters that were woken.
    pub(super) fn fail_on_close(&mut self, error: impl Fn() -> HubError) -> usize {
        // ---
        let mut woken = 0;
        for entry in self.entries.values_mut() {
            if entry.complete(Err(error())) != Delivery::AlreadyCompleted {
                woken += 1;
            }
        }
        self.entries.retain(|_, entry| entry.is_subscription());
        self.released.clear();
        woken
    }

    /// Remove everything, waking remaining waiters with `error()`.
    pub(super) fn drain(&mut self, error: impl Fn() -> HubError) -> Vec<PendingRequest> {
        // ---
        self.released.clear();
        let mut drained: Vec<PendingRequest> = self.entries.drain().map(|(_, entry)| entry).collect();
        for entry in &mut drained {
            entry.complete(Err(error()));
        }
        drained
    }

    /// Acknowledged subscriptions written on a connection older than `epoch`.
    ///
    /// Only the entry that currently feeds each stream is returned.
    pub(super) fn stale_subscriptions(&self, epoch: u64) -> Vec<(CorrelationId, Arc<SharedStream>)> {
        // ---
        let mut stale: Vec<_> = self
            .entries
            .values()
            .filter(|entry| entry.epoch < epoch && entry.has_completed_once())
            .filter_map(|entry| {
                let stream = entry.subscription.as_ref()?;
                (stream.current_id() == entry.id).then(|| (entry.id, stream.clone()))
            })
            .collect();
        stale.sort_by_key(|(id, _)| *id);
        stale
    }

    /// Remove every entry feeding `stream`.
    ///
    /// Returns the ids the hub acknowledged, with the epoch each was
    /// written on; those need an unsubscribe.
    pub(super) fn remove_stream(&mut self, stream: &Arc<SharedStream>) -> Vec<(CorrelationId, u64)> {
        // ---
        let ids: Vec<CorrelationId> = self
            .entries
            .values()
            .filter(|entry| {
                entry
                    .subscription
                    .as_ref()
                    .is_some_and(|owned| Arc::ptr_eq(owned, stream))
            })
            .map(|entry| entry.id)
            .collect();

        let mut acknowledged = Vec::new();
        for id in ids {
            if let Some(mut entry) = self.entries.remove(&id) {
                if entry.has_completed_once() {
                    acknowledged.push((id, entry.epoch));
                } else {
                    entry.complete(Err(HubError::ConnectionLost));
                }
            }
        }
        acknowledged.sort();
        acknowledged
    }

    /// Remove every entry feeding `stream` and mark the ids the hub
    /// acknowledged on connection `epoch` as released.
    ///
    /// Events for a released id are dropped until
    /// [`forget_released`](Self::forget_released) instead of being treated
    /// as orphans. Returns the released ids; each needs one unsubscribe.
    pub(super) fn release_stream(
        &mut self,
        stream: &Arc<SharedStream>,
        epoch: Option<u64>,
    ) -> Vec<CorrelationId> {
        // ---
        let released: Vec<CorrelationId> = self
            .remove_stream(stream)
            .into_iter()
            .filter(|(_, written_on)| Some(*written_on) == epoch)
            .map(|(id, _)| id)
            .collect();
        self.released.extend(released.iter().copied());
        released
    }

    /// The unsubscribe round-trip for `id` is over.
    pub(super) fn forget_released(&mut self, id: CorrelationId) {
        self.released.remove(&id);
    }

    pub(super) fn has_subscriptions(&self) -> bool {
        self.entries.values().any(PendingRequest::is_subscription)
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
