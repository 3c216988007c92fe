//! The `persistence` module provides the durable message backend.
//!
//! Messages are kept in an embedded `sled` database so subscribers can
//! replay a recipient's history after a restart, each from its own
//! watermark.

pub mod sled_store;

pub use sled_store::DurableLog;

#[cfg(test)]
mod tests;
