//! Shared test utilities for the aof-store workspace.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`TestDir`] - Managed temporary directory with path helpers
//! - [`strategies`] - Proptest generators for fixed-size keys and operation scripts
//! - [`CrashInjector`] - Deterministic failure injection for the append path

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::TestDir;

mod crash_injector;
pub use crash_injector::{CrashInjector, CrashPoint};

pub mod strategies;
pub use strategies::TreeOp;
