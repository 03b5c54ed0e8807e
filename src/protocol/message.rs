//! Inbound message classification.
//!
//! The hub may coalesce several messages into one physical frame, so a frame
//! is either a single JSON object or an array of objects. Each element is
//! classified by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::CorrelationId;
use crate::{log_warn, HubError, Result};

/// Error details attached to an unsuccessful `result` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubErrorInfo {
    /// Machine-readable code (e.g. `"unknown_command"`).
    #[serde(default)]
    pub code: Option<String>,

    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
}

impl HubErrorInfo {
    pub(crate) fn describe(info: Option<&HubErrorInfo>) -> String {
        // ---
        match info {
            Some(HubErrorInfo {
                code: Some(code),
                message: Some(message),
            }) => format!("{code}: {message}"),
            Some(HubErrorInfo {
                code: Some(text), ..
            })
            | Some(HubErrorInfo {
                message: Some(text),
                ..
            }) => text.clone(),
            _ => "no error details".to_string(),
        }
    }
}

/// Response delivered to a `send` caller.
#[derive(Debug, Clone, PartialEq)]
pub enum HubResponse {
    /// Reply to a `ping`.
    Pong,

    /// Reply to any other command.
    Result {
        /// Whether the hub executed the command.
        success: bool,
        /// Command output (`null` when absent).
        result: Value,
        /// Error details when `success` is false.
        error: Option<HubErrorInfo>,
    },
}

impl HubResponse {
    /// True for `pong` and for successful results.
    pub fn is_success(&self) -> bool {
        // ---
        match self {
            HubResponse::Pong => true,
            HubResponse::Result { success, .. } => *success,
        }
    }

    /// Result payload, if this is a successful `result`.
    pub fn into_result(self) -> Option<Value> {
        // ---
        match self {
            HubResponse::Result {
                success: true,
                result,
                ..
            } => Some(result),
            _ => None,
        }
    }
}

/// One classified inbound message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum InboundMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Pong {
        id: CorrelationId,
    },
    Result {
        id: CorrelationId,
        #[serde(default)]
        success: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<HubErrorInfo>,
    },
    Event {
        id: CorrelationId,
        #[serde(default)]
        event: Value,
    },
    #[serde(other)]
    Unknown,
}

/// Split one text frame into its classified messages, in frame order.
///
/// Elements that are not valid messages are logged and skipped; the rest of
/// the batch is still returned. Only a frame that is not JSON at all, or is
/// neither an object nor an array, is an error.
pub(crate) fn parse_frame(text: &str) -> Result<Vec<InboundMessage>> {
    // ---
    let value: Value =
        serde_json::from_str(text).map_err(|err| HubError::InvalidFrame(err.to_string()))?;

    let elements = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(HubError::InvalidFrame(format!(
                "expected object or array, got {other}"
            )))
        }
    };

    let mut messages = Vec::with_capacity(elements.len());
    for element in &elements {
        match InboundMessage::deserialize(element) {
            Ok(message) => messages.push(message),
            Err(err) => {
                log_warn!("skipping malformed inbound message ({err}): {element}");
            }
        }
    }

    Ok(messages)
}
