//! Trellis Core
//!
//! Core domain types, traits, and error handling for Trellis.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod error;
pub mod events;
pub mod ids;
pub mod instance;
pub mod pipeline;
pub mod ports;
pub mod report;
pub mod secrets;

pub use error::{Error, Result};
pub use ids::*;
