//! Domain layer public interface.
//!
//! Abstractions that are independent of any WebSocket library: the socket
//! and connector seams, and the collaborator seams that supply the hub URL
//! and access token.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod credentials;
mod transport;

// --- Socket domain re-exports ---

pub use transport::{
    //
    Connector,
    ConnectorPtr,
    Frame,
    Socket,
    SocketHandle,
    SocketPtr,
};

// --- Collaborator re-exports ---

pub use credentials::{
    //
    StaticToken,
    StaticUrl,
    TokenProvider,
    TokenProviderPtr,
    UrlProvider,
    UrlProviderPtr,
};
