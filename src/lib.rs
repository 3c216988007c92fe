//! # chat-relay
//!
//! `chat-relay` is a minimal chat message relay. Producers submit messages
//! addressed to a recipient; the delivery engine hands them to that recipient
//! either live, through a subscription, or on the next poll. Messages are
//! held in a bounded in-memory queue or, optionally, in an embedded `sled`
//! database that survives restarts.
//!
//! ## Core Modules
//!
//! - `broker`: message model, retention policy, the volatile queue, store
//!   capabilities, subscription sessions and the `DeliveryEngine` façade.
//! - `persistence`: the durable, replayable log backed by `sled`.
//! - `config`: loading and merging server configuration.
//! - `transport`: the WebSocket server and its JSON protocol.
//! - `client`: an async client for the protocol, used by the CLI.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
