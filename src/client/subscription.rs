//! Subscription multiplexer.
//!
//! One hub subscription per distinct [`SubscriptionKey`], fanned out to any
//! number of [`HubSubscription`] handles through a broadcast channel. The
//! registry counts handles per key; when the count drops to zero the
//! unsubscribe is sent after the stream's idle grace period, unless a new
//! handle attached in the meantime.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::{not_connected, rejection_reason, CloseIntent, Inner};
use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    log_info,
    log_warn,
    CorrelationId,
    HubError,
    HubEvent,
    Result,
    SubscriptionKey,
    TopicFamily,
};

/// Multicast source behind every handle of one key.
pub(crate) struct SharedStream {
    // ---
    key: SubscriptionKey,
    family: TopicFamily,
    idle_timeout: Duration,
    current_id: AtomicU64,
    sender: Mutex<Option<broadcast::Sender<HubEvent>>>,
}

impl SharedStream {
    pub(super) fn new(
        key: SubscriptionKey,
        family: TopicFamily,
        idle_timeout: Duration,
        capacity: usize,
    ) -> (Arc<Self>, broadcast::Receiver<HubEvent>) {
        // ---
        let (tx, rx) = broadcast::channel(capacity.max(1));
        let stream = Arc::new(Self {
            key,
            family,
            idle_timeout,
            current_id: AtomicU64::new(0),
            sender: Mutex::new(Some(tx)),
        });
        (stream, rx)
    }

    pub(super) fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub(super) fn family(&self) -> TopicFamily {
        self.family
    }

    pub(super) fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Hub id the stream is currently subscribed under.
    pub(super) fn current_id(&self) -> CorrelationId {
        CorrelationId::from(self.current_id.load(Ordering::SeqCst))
    }

    pub(super) fn set_id(&self, id: CorrelationId) {
        self.current_id.store(id.get(), Ordering::SeqCst);
    }

    fn receiver(&self) -> Option<broadcast::Receiver<HubEvent>> {
        lock_ignore_poison(&self.sender).as_ref().map(broadcast::Sender::subscribe)
    }

    /// Returns the number of handles that will see the event.
    pub(super) fn publish(&self, event: HubEvent) -> usize {
        // ---
        match lock_ignore_poison(&self.sender).as_ref() {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// End every handle's stream once buffered events are consumed.
    pub(super) fn close(&self) {
        lock_ignore_poison(&self.sender).take();
    }

    pub(super) fn is_closed(&self) -> bool {
        lock_ignore_poison(&self.sender).is_none()
    }
}

struct Slot {
    stream: Arc<SharedStream>,
    refs: usize,
    generation: u64,
}

/// Live subscriptions by key, with handle reference counts.
pub(super) struct SubscriptionRegistry {
    // ---
    slots: HashMap<SubscriptionKey, Slot>,
}

impl SubscriptionRegistry {
    // ---

    pub(super) fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Add a handle to an existing subscription.
    pub(super) fn attach(
        &mut self,
        key: &SubscriptionKey,
    ) -> Option<(Arc<SharedStream>, broadcast::Receiver<HubEvent>)> {
        // ---
        let slot = self.slots.get_mut(key)?;

        let Some(events) = slot.stream.receiver() else {
            self.slots.remove(key);
            return None;
        };

        slot.refs += 1;
        slot.generation += 1;
        Some((slot.stream.clone(), events))
    }

    /// Register a freshly acknowledged subscription with one handle.
    pub(super) fn insert(&mut self, stream: Arc<SharedStream>) {
        // ---
        let slot = Slot {
            stream: stream.clone(),
            refs: 1,
            generation: 0,
        };
        self.slots.insert(stream.key().clone(), slot);
    }

    /// Drop one handle. Returns the slot generation when it was the last one.
    pub(super) fn release(&mut self, stream: &Arc<SharedStream>) -> Option<u64> {
        // ---
        let slot = self.slot_mut(stream)?;
        if slot.refs == 0 {
            return None;
        }
        slot.refs -= 1;
        (slot.refs == 0).then_some(slot.generation)
    }

    /// Remove the slot if no handle attached since `generation` was taken.
    pub(super) fn remove_if_idle(&mut self, stream: &Arc<SharedStream>, generation: u64) -> bool {
        // ---
        match self.slot_mut(stream) {
            Some(slot) if slot.refs == 0 && slot.generation == generation => {}
            _ => return false,
        }
        self.slots.remove(stream.key()).is_some()
    }

    pub(super) fn remove_stream(&mut self, stream: &Arc<SharedStream>) -> bool {
        // ---
        if self.slot_mut(stream).is_none() {
            return false;
        }
        self.slots.remove(stream.key()).is_some()
    }

    pub(super) fn drain(&mut self) -> Vec<Arc<SharedStream>> {
        self.slots.drain().map(|(_, slot)| slot.stream).collect()
    }

    pub(super) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot_mut(&mut self, stream: &Arc<SharedStream>) -> Option<&mut Slot> {
        // ---
        self.slots
            .get_mut(stream.key())
            .filter(|slot| Arc::ptr_eq(&slot.stream, stream))
    }
}

/// A consumer's view of one hub subscription.
///
/// Yields decoded events until the subscription ends (rejected on
/// resubscribe, or client shutdown). Dropping the handle detaches it; the
/// hub subscription is released once every handle for the same key is gone.
///
/// A consumer that falls more than the configured event capacity behind
/// skips the oldest events.
pub struct HubSubscription {
    // ---
    inner: Arc<Inner>,
    stream: Arc<SharedStream>,
    events: BroadcastStream<HubEvent>,
}

impl HubSubscription {
    fn new(inner: Arc<Inner>, stream: Arc<SharedStream>, events: broadcast::Receiver<HubEvent>) -> Self {
        // ---
        Self {
            inner,
            stream,
            events: BroadcastStream::new(events),
        }
    }

    /// Deduplication key of this subscription.
    pub fn key(&self) -> &SubscriptionKey {
        self.stream.key()
    }

    pub fn family(&self) -> TopicFamily {
        self.stream.family()
    }

    /// Id the hub currently knows this subscription by. Changes after a
    /// reconnect.
    pub fn id(&self) -> CorrelationId {
        self.stream.current_id()
    }

    /// Wait for the next event. `None` once the subscription has ended.
    pub async fn next_event(&mut self) -> Option<HubEvent> {
        self.next().await
    }

    /// Detach this handle. Same as dropping it.
    pub fn close(self) {}
}

impl Stream for HubSubscription {
    type Item = HubEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<HubEvent>> {
        // ---
        loop {
            match self.events.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    log_warn!("{} consumer lagged, skipped {skipped} events", self.stream.key());
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        // ---
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log_debug!("{} dropped outside a runtime, not detaching", self.stream.key());
            return;
        };
        runtime.spawn(self.inner.clone().detach(self.stream.clone()));
    }
}

impl fmt::Debug for HubSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubSubscription")
            .field("key", self.stream.key())
            .field("id", &self.stream.current_id())
            .finish()
    }
}

impl Inner {
    // ---

    pub(super) async fn subscribe(
        self: &Arc<Self>,
        key: SubscriptionKey,
        idle_timeout: Duration,
    ) -> Result<HubSubscription> {
        // ---
        let mut registry = self.registry.lock().await;

        if self.shutdown.is_cancelled() {
            return Err(HubError::Shutdown);
        }

        if let Some((stream, events)) = registry.attach(&key) {
            log_debug!("sharing existing subscription {key}");
            return Ok(HubSubscription::new(self.clone(), stream, events));
        }

        self.connect().await.map_err(not_connected)?;
        let link = self
            .live_link()
            .ok_or_else(|| HubError::NotConnected("connection closed".into()))?;

        let family = TopicFamily::classify(&key);
        let (stream, events) = SharedStream::new(key, family, idle_timeout, self.config.event_capacity);

        let outstanding = self
            .write_request(
                &link,
                stream.key().payload(),
                self.config.request_timeout,
                Some(stream.clone()),
            )
            .await?;
        let id = outstanding.id;
        stream.set_id(id);

        let response = match outstanding.response().await {
            Ok(response) => response,
            Err(err) => {
                lock_ignore_poison(&self.pending).remove(id);
                return Err(err);
            }
        };

        if !response.is_success() {
            lock_ignore_poison(&self.pending).remove(id);
            let reason = rejection_reason(&response);
            log_warn!("hub rejected {}: {reason}", stream.key());
            return Err(HubError::SubscriptionRejected(reason));
        }

        log_debug!("subscribed {} as {id}", stream.key());
        registry.insert(stream.clone());

        Ok(HubSubscription::new(self.clone(), stream, events))
    }

    async fn detach(self: Arc<Self>, stream: Arc<SharedStream>) {
        // ---
        let generation = {
            let mut registry = self.registry.lock().await;
            match registry.release(&stream) {
                Some(generation) => generation,
                None => return,
            }
        };

        let idle = stream.idle_timeout();
        if !idle.is_zero() {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(idle) => {}
            }
        }

        self.unsubscribe_if_idle(&stream, generation).await;
    }

    async fn unsubscribe_if_idle(self: &Arc<Self>, stream: &Arc<SharedStream>, generation: u64) {
        // ---
        {
            let mut registry = self.registry.lock().await;
            if !registry.remove_if_idle(stream, generation) {
                return;
            }
        }

        stream.close();
        let link = self.live_link();
        let epoch = link.as_ref().map(|link| link.epoch);
        let released = lock_ignore_poison(&self.pending).release_stream(stream, epoch);
        log_debug!("last handle of {} detached", stream.key());

        if let Some(link) = link {
            let mut failed = false;
            for id in released {
                if !failed {
                    if let Err(err) = self.unsubscribe(&link, id).await {
                        log_debug!("unsubscribe of {id} failed: {err}");
                        failed = true;
                    }
                }
                lock_ignore_poison(&self.pending).forget_released(id);
            }
        }

        self.close_if_idle().await;
    }

    /// Retire a stream the hub refused to resubscribe.
    pub(super) async fn retire_stream(&self, stream: &Arc<SharedStream>) {
        // ---
        stream.close();
        lock_ignore_poison(&self.pending).remove_stream(stream);
        self.registry.lock().await.remove_stream(stream);
    }

    /// Close the socket when nothing is left to serve.
    ///
    /// The emptiness check and the close intent are taken under the table
    /// lock. Requests register under the same lock and refuse a socket
    /// marked for closing.
    async fn close_if_idle(self: &Arc<Self>) {
        // ---
        let registry = self.registry.lock().await;
        if !registry.is_empty() {
            return;
        }

        let closing = {
            let pending = lock_ignore_poison(&self.pending);
            if !pending.is_empty() {
                return;
            }
            self.mark_closing(CloseIntent::Idle)
        };

        if let Some((epoch, socket)) = closing {
            log_info!("no requests or subscriptions left, closing idle connection");
            self.finish_close(epoch, socket).await;
        }
        drop(registry);
    }

    pub(super) async fn subscription_count(&self) -> usize {
        self.registry.lock().await.len()
    }
}
