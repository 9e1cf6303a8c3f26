//! # spyglass-client
//!
//! Client library for spyglass.
//!
//! This crate provides:
//! - TCP connection with configurable timeouts
//! - Value-level invoke on named endpoints
//! - Capture export and remote-object proxies
//! - Optional serving of server-initiated calls

pub mod client;
pub mod error;

pub use client::{Client, ClientConfig, DEFAULT_CONNECT_TIMEOUT};
pub use error::ClientError;
