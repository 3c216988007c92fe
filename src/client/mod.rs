//! The `client` module provides `RelayClient`, an async WebSocket client for
//! the relay protocol. The CLI uses it for every command except `serve`.

pub mod relay_client;
pub use relay_client::RelayClient;
