//! Event decoding extension point.
//!
//! Every subscription is classified once into a [`TopicFamily`] from its
//! key. When an event frame arrives, the dispatcher hands the raw `event`
//! payload, the family and the key to an [`EventDecoder`], and multicasts
//! whatever typed [`HubEvent`] comes back. A decode failure drops that one
//! event; the stream keeps running.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{HubError, Result, SubscriptionKey};

/// Decoding family of a subscription, derived from its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicFamily {
    /// `subscribe_events` filtered to `state_changed`.
    StateChanged,
    /// `subscribe_entities` (compressed entity diffs).
    CompressedEntities,
    /// `render_template`.
    Template,
    /// `subscribe_trigger`.
    Trigger,
    /// `assist_pipeline/run`.
    PipelineRun,
    /// Anything else.
    Generic,
}

impl TopicFamily {
    /// Classify a subscription key.
    pub fn classify(key: &SubscriptionKey) -> Self {
        // ---
        match key.kind() {
            "subscribe_events" => match key.field("event_type").and_then(Value::as_str) {
                Some("state_changed") => TopicFamily::StateChanged,
                _ => TopicFamily::Generic,
            },
            "subscribe_entities" => TopicFamily::CompressedEntities,
            "render_template" => TopicFamily::Template,
            "subscribe_trigger" => TopicFamily::Trigger,
            "assist_pipeline/run" => TopicFamily::PipelineRun,
            _ => TopicFamily::Generic,
        }
    }
}

/// A decoded subscription event.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    StateChanged(StateChangedEvent),
    CompressedEntities(CompressedEntitiesEvent),
    Template(TemplateEvent),
    Trigger(TriggerEvent),
    PipelineRun(PipelineRunEvent),
    Generic(GenericEvent),
}

/// One entity's state transition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateChangedEvent {
    pub entity_id: String,
    #[serde(default)]
    pub old_state: Option<Value>,
    #[serde(default)]
    pub new_state: Option<Value>,
    #[serde(default)]
    pub time_fired: Option<String>,
}

/// Compressed entity diff (`a` = added, `c` = changed, `r` = removed).
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CompressedEntitiesEvent {
    #[serde(rename = "a", default)]
    pub added: Map<String, Value>,
    #[serde(rename = "c", default)]
    pub changed: Map<String, Value>,
    #[serde(rename = "r", default)]
    pub removed: Vec<String>,
}

/// Template render result, or a render error reported by the hub.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemplateEvent {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub listeners: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Trigger fired.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TriggerEvent {
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub context: Option<Value>,
}

/// One stage of a voice pipeline run (`run-start`, `stt-end`, `run-end`...).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineRunEvent {
    #[serde(rename = "type")]
    pub stage: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Untyped event.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericEvent {
    pub event_type: Option<String>,
    pub raw: Value,
}

/// Turns raw event payloads into typed events.
///
/// Implement this to support additional subscription families; install the
/// implementation with
/// [`HubClientBuilder::decoder`](crate::HubClientBuilder::decoder).
pub trait EventDecoder: Send + Sync {
    /// Decode one raw `event` payload. An error drops the event.
    fn decode(&self, family: TopicFamily, key: &SubscriptionKey, raw: &Value) -> Result<HubEvent>;
}

pub type EventDecoderPtr = Arc<dyn EventDecoder>;

/// Decoder for the built-in families.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDecoder;

#[derive(Deserialize)]
struct StateChangedEnvelope {
    data: StateChangedData,
    #[serde(default)]
    time_fired: Option<String>,
}

#[derive(Deserialize)]
struct StateChangedData {
    entity_id: String,
    #[serde(default)]
    old_state: Option<Value>,
    #[serde(default)]
    new_state: Option<Value>,
}

impl EventDecoder for StandardDecoder {
    fn decode(&self, family: TopicFamily, _key: &SubscriptionKey, raw: &Value) -> Result<HubEvent> {
        // ---
        let event = match family {
            TopicFamily::StateChanged => {
                let envelope = StateChangedEnvelope::deserialize(raw).map_err(invalid)?;
                HubEvent::StateChanged(StateChangedEvent {
                    entity_id: envelope.data.entity_id,
                    old_state: envelope.data.old_state,
                    new_state: envelope.data.new_state,
                    time_fired: envelope.time_fired,
                })
            }
            TopicFamily::CompressedEntities => {
                HubEvent::CompressedEntities(CompressedEntitiesEvent::deserialize(raw).map_err(invalid)?)
            }
            TopicFamily::Template => HubEvent::Template(TemplateEvent::deserialize(raw).map_err(invalid)?),
            TopicFamily::Trigger => HubEvent::Trigger(TriggerEvent::deserialize(raw).map_err(invalid)?),
            TopicFamily::PipelineRun => {
                HubEvent::PipelineRun(PipelineRunEvent::deserialize(raw).map_err(invalid)?)
            }
            TopicFamily::Generic => HubEvent::Generic(GenericEvent {
                event_type: raw.get("event_type").and_then(Value::as_str).map(str::to_owned),
                raw: raw.clone(),
            }),
        };
        Ok(event)
    }
}

fn invalid(err: serde_json::Error) -> HubError {
    HubError::InvalidFrame(format!("event payload: {err}"))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn key(kind: &str, data: Value) -> SubscriptionKey {
        SubscriptionKey::new(kind, data).unwrap()
    }

    #[test]
    fn test_classify() {
        // ---
        let cases = [
            (key("subscribe_events", json!({"event_type": "state_changed"})), TopicFamily::StateChanged),
            (key("subscribe_events", json!({"event_type": "call_service"})), TopicFamily::Generic),
            (key("subscribe_events", Value::Null), TopicFamily::Generic),
            (key("subscribe_entities", json!({"entity_ids": ["light.a"]})), TopicFamily::CompressedEntities),
            (key("render_template", json!({"template": "{{ 1 }}"})), TopicFamily::Template),
            (key("subscribe_trigger", json!({"trigger": {}})), TopicFamily::Trigger),
            (key("assist_pipeline/run", json!({"start_stage": "stt"})), TopicFamily::PipelineRun),
            (key("persistent_notification/subscribe", Value::Null), TopicFamily::Generic),
        ];

        for (key, expected) in cases {
            assert_eq!(TopicFamily::classify(&key), expected, "{key}");
        }
    }

    #[test]
    fn test_decode_state_changed() {
        // ---
        let raw = json!({
            "event_type": "state_changed",
            "data": {
                "entity_id": "light.kitchen",
                "old_state": {"state": "off"},
                "new_state": {"state": "on"}
            },
            "time_fired": "2024-01-01T00:00:00Z"
        });
        let k = key("subscribe_events", json!({"event_type": "state_changed"}));

        let HubEvent::StateChanged(event) = StandardDecoder.decode(TopicFamily::StateChanged, &k, &raw).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(event.entity_id, "light.kitchen");
        assert_eq!(event.new_state, Some(json!({"state": "on"})));
        assert_eq!(event.time_fired.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_decode_compressed_entities() {
        // ---
        let raw = json!({"a": {"light.a": {"s": "on"}}, "r": ["light.b"]});
        let k = key("subscribe_entities", Value::Null);

        let HubEvent::CompressedEntities(event) =
            StandardDecoder.decode(TopicFamily::CompressedEntities, &k, &raw).unwrap()
        else {
            panic!("wrong variant");
        };
        assert!(event.added.contains_key("light.a"));
        assert!(event.changed.is_empty());
        assert_eq!(event.removed, vec!["light.b".to_string()]);
    }

    #[test]
    fn test_decode_pipeline_stage() {
        // ---
        let raw = json!({"type": "run-start", "data": {"pipeline": "p1"}, "timestamp": "t"});
        let k = key("assist_pipeline/run", Value::Null);

        let HubEvent::PipelineRun(event) = StandardDecoder.decode(TopicFamily::PipelineRun, &k, &raw).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(event.stage, "run-start");
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        // ---
        let k = key("subscribe_events", json!({"event_type": "state_changed"}));
        let result = StandardDecoder.decode(TopicFamily::StateChanged, &k, &json!({"data": 3}));
        assert!(matches!(result, Err(HubError::InvalidFrame(_))));
    }

    #[test]
    fn test_generic_never_fails() {
        // ---
        let k = key("something/new", Value::Null);
        let HubEvent::Generic(event) = StandardDecoder.decode(TopicFamily::Generic, &k, &json!(42)).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(event.event_type, None);
        assert_eq!(event.raw, json!(42));
    }
}
