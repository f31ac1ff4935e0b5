//! SMS Relay - Rust SMS bridge daemon
//!
//! Polls a remote queue for pending outbound messages, sends each one through an injected
//! SMS capability and acknowledges the ones that went out.

pub mod messages;
pub mod queue;
pub mod dedup;
pub mod transmitter;
pub mod status;
pub mod relay;
pub mod config;
pub mod error;

pub use error::{Error, Result};
