//! # spyglass-server
//!
//! TCP server for spyglass.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Per-connection channels with the object endpoints installed
//! - Application endpoint registration served on every connection
//! - YAML and environment variable configuration

pub mod config;
pub mod error;
pub mod server;

pub use config::{ChannelSection, Config, ConfigError, NetworkConfig};
pub use error::ServerError;
pub use server::{Server, ServerConfig, ServerStats};
