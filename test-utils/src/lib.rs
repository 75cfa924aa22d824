//! Shared test utilities for hurley-kit Rust libraries.
//!
//! This crate provides:
//! - Proptest generators for keys, secrets, TTLs and store settings
//! - A manually advanced clock and scripted object getters
//! - Sample store configurations and Vault response bodies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use fixtures::*;
pub use generators::*;
pub use mocks::*;
