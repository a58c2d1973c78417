//! Core data models for weather-etl.
//!
//! - `config`: run configuration (immutable for the duration of a run)
//! - `error`: error taxonomy shared by every module
//! - `payload`: datasets exchanged between steps
//! - `weather`: raw input record schema

mod config;
mod error;
mod payload;
mod weather;

pub use config::*;
pub use error::*;
pub use payload::*;
pub use weather::*;
