//! Kiln Core Library
//!
//! Provisioner compilation for the kiln image builder: build graphs for a
//! container build daemon, component documents for a cloud image pipeline,
//! build-context resolution and multi-architecture manifest assembly.

pub mod ami;
pub mod builder;
pub mod config;
pub mod docker;
pub mod error;
pub mod manifest;
pub mod observability;
pub mod paths;
pub mod provision;
pub mod report;
pub mod types;

// Re-export commonly used items
pub use config::Config;
pub use error::{KilnError, Result};
pub use observability::{
    init as init_observability, init_with_level as init_observability_with_level,
};
pub use provision::{Step, StepKind, TargetOs};
pub use types::{BuildConfig, ManifestEntry, Provisioner};
