//! Shared configuration, error taxonomy, envelope schemas, logging setup,
//! and SQL value types used across every crate in the pipeline.

pub mod config;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod sql;

pub use config::Config;
pub use error::JacobineError;
