//! The `transport` module exposes the delivery engine over WebSockets.
//!
//! It defines the JSON protocol spoken between clients and the relay and
//! implements the server that maps each frame onto an engine call.

pub mod message;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use websocket::{serve, start_websocket_server};
