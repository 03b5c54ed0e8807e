//! Canonical subscription keys.
//!
//! Two subscribe calls share one hub subscription when their `type` and
//! `data` serialize to the same canonical form: object keys sorted at every
//! level, no whitespace. Key order in the caller's JSON never matters.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::{HubError, Result};

/// Canonicalized subscribe payload (`type` + `data`), used for deduplication.
#[derive(Clone)]
pub struct SubscriptionKey {
    canonical: Arc<str>,
    payload: Arc<Map<String, Value>>,
}

impl SubscriptionKey {
    /// Build a key from a subscribe `type` and its `data` object.
    ///
    /// `data` must be a JSON object or `null`. A `type` or `id` entry inside
    /// `data` is dropped; the command type always comes from `kind` and the
    /// id is assigned per send.
    pub fn new(kind: &str, data: Value) -> Result<Self> {
        // ---
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(HubError::InvalidPayload(format!(
                    "subscription data must be an object, got {other}"
                )))
            }
        };

        let mut payload = Map::with_capacity(data.len() + 1);
        payload.insert("type".into(), Value::from(kind));
        for (field, value) in data {
            if field != "type" && field != "id" {
                payload.insert(field, value);
            }
        }

        let mut canonical = String::new();
        write_canonical(&Value::Object(payload.clone()), &mut canonical);

        Ok(Self {
            canonical: canonical.into(),
            payload: Arc::new(payload),
        })
    }

    /// Subscribe command type, e.g. `subscribe_entities`.
    pub fn kind(&self) -> &str {
        // ---
        self.payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Look up one `data` field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        // ---
        if name == "type" {
            return None;
        }
        self.payload.get(name)
    }

    /// Full outbound payload without an id.
    pub fn payload(&self) -> &Map<String, Value> {
        // ---
        &self.payload
    }

    /// Canonical serialized form.
    pub fn as_str(&self) -> &str {
        // ---
        &self.canonical
    }
}

impl PartialEq for SubscriptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for SubscriptionKey {}

impl Hash for SubscriptionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriptionKey").field(&self.canonical).finish()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    // ---
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (idx, (field, inner)) in fields.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(field.as_str()).to_string());
                out.push(':');
                write_canonical(inner, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
