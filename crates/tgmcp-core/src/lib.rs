//! Core of the Telegram MCP gateway.
//!
//! Transport-agnostic: the authenticated connection lives behind
//! [`ports::RemoteConnection`], implemented in an adapter crate.

pub mod config;
pub mod domain;
pub mod errors;
pub mod gateway;
pub mod logging;
pub mod ports;

pub use errors::{Error, Result};
