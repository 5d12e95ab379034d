//! # Cadence Core
//!
//! Configuration model and shared error type used by every Cadence crate.

pub mod config;
pub mod error;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
