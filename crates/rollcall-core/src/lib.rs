//! Rollcall Core Library
//!
//! Shared functionality for Rollcall components:
//! - Configuration resolution and hierarchy
//! - Tracing initialisation for the binaries
//! - `SQLite` pool helpers and timestamps
//! - Fixed-point scores shared by the biometric engine and the wire protocol
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod score;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use score::Score;
