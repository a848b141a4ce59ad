//! Background tasks.
//!
//! # Tasks
//!
//! - `registry_cleanup` - Drops sessions older than the maximum age from the
//!   coordinator and the registry

pub mod registry_cleanup;

pub use registry_cleanup::{run_cleanup, start_registry_cleanup, RegistryCleanupConfig, SweepReport};
