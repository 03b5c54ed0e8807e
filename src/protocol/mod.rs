//! Hub wire protocol.
//!
//! Correlation ids, outbound frame builders, inbound message classification
//! and version negotiation. Payloads other than the envelope fields are
//! treated as opaque JSON.
mod correlation;
pub(crate) mod frames;
mod message;
mod version;

pub use correlation::{CorrelationId, IdGenerator};
pub use message::{HubErrorInfo, HubResponse};
pub use version::HubVersion;

pub(crate) use message::{parse_frame, InboundMessage};
