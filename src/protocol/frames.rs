//! Outbound frame builders.
//!
//! Every tracked frame is the caller's payload with an integer `id` merged in.
//! The auth frame is the only frame sent without an id.

use serde_json::{json, Map, Value};

use crate::protocol::CorrelationId;

pub(crate) const TYPE_AUTH: &str = "auth";
pub(crate) const TYPE_SUPPORTED_FEATURES: &str = "supported_features";
pub(crate) const TYPE_UNSUBSCRIBE_EVENTS: &str = "unsubscribe_events";

/// `{"type":"auth","access_token":...}`
pub(crate) fn auth(access_token: &str) -> Value {
    // ---
    json!({
        "type": TYPE_AUTH,
        "access_token": access_token,
    })
}

/// Feature negotiation frame; sent once after auth, never tracked.
pub(crate) fn supported_features(id: CorrelationId) -> Value {
    // ---
    json!({
        "type": TYPE_SUPPORTED_FEATURES,
        "id": id,
        "features": { "coalesce_messages": 1 },
    })
}

/// Payload (without id) that cancels the subscription registered under `subscription`.
pub(crate) fn unsubscribe_events(subscription: CorrelationId) -> Map<String, Value> {
    // ---
    let mut payload = Map::new();
    payload.insert("type".into(), Value::from(TYPE_UNSUBSCRIBE_EVENTS));
    payload.insert("subscription".into(), Value::from(subscription.get()));
    payload
}

/// Merge the correlation id into a copy of `payload`.
///
/// A caller-provided `id` is overwritten.
pub(crate) fn with_id(payload: &Map<String, Value>, id: CorrelationId) -> Value {
    // ---
    let mut frame = payload.clone();
    frame.insert("id".into(), Value::from(id.get()));
    Value::Object(frame)
}
