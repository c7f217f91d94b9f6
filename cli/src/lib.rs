//! Thin library surface re-exporting the CLI's modules for its own binary
//! and for doctests; `main.rs` is the actual entrypoint.

pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;

pub use error::AppError;
