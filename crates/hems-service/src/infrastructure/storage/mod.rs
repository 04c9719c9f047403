//! Storage infrastructure: configuration file loading.
//!
//! The service keeps no state on disk between runs; the only file it reads
//! is its TOML configuration.

pub mod config;
