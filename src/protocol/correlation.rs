use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Integer correlation id carried in the `id` field of every tracked frame.
///
/// The hub echoes it on `result`, `pong` and `event` frames so responses and
/// subscription events can be routed back to their originating request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    // ---

    /// Raw integer value as sent on the wire.
    pub fn get(self) -> u64 {
        // ---
        self.0
    }
}

impl From<u64> for CorrelationId {
    // ---

    fn from(value: u64) -> Self {
        // ---
        Self(value)
    }
}

impl fmt::Display for CorrelationId {
    // ---

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source shared by every connection of one client.
///
/// Never reset on reconnect, so an id handed out before a drop can never
/// collide with one handed out after it.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    // ---

    /// Start counting at 1 (the hub treats 0 as invalid).
    pub fn new() -> Self {
        // ---
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Hand out the next id; safe to call from any number of senders.
    pub fn next_id(&self) -> CorrelationId {
        // ---
        CorrelationId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
