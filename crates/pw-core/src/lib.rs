//! Core types, configuration, and errors for pollwatch.
//!
//! This crate provides the foundational pieces shared by the watcher library
//! and the command-line front end:
//!
//! - [`Config`] and its sections ([`PollingConfig`], [`ServiceConfig`])
//! - [`Sensitivity`], the knob that selects a directory's scan interval
//! - [`ConfigError`] for configuration loading and validation failures
//! - Type aliases for `FxHashMap`/`FxHashSet` (faster than std)

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;

pub use config::{Config, PollingConfig, Sensitivity, ServiceConfig};
pub use error::ConfigError;
pub use hash::{FxHashMap, FxHashSet, fx_hash_map, fx_hash_set};
