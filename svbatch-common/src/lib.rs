//! # svbatch common library
//!
//! Shared code for the svbatch crates:
//! - Error type used by configuration and transport helpers
//! - Event types (`ConversionEvent`) and the `EventBus`
//! - TOML configuration loading and path resolution
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
