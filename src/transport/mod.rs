//! Connector implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Connector` trait. Network connectors are hidden behind feature flags
//! and exposed only through constructor functions.
//!
//! Engine code must not depend on connector-specific types.

mod memory;

#[cfg(feature = "transport_websocket")]
mod websocket;

pub use memory::{memory_connector, MemoryConnector, MemoryListener, MemoryPeer};

#[cfg(feature = "transport_websocket")]
pub use websocket::create_websocket_connector;
