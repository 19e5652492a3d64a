//! CLI command implementations

pub mod compile;
pub mod component;
pub mod context;
pub mod manifest;
pub mod report;

pub use compile::compile;
pub use component::component;
pub use context::context;
pub use report::report;

use anyhow::{Context, Result};
use kiln_core::BuildConfig;
use std::path::Path;

/// Load a template, attaching its path to any error.
fn load_template(path: &Path) -> Result<BuildConfig> {
    BuildConfig::from_file(path)
        .with_context(|| format!("Failed to load template: {}", path.display()))
}
