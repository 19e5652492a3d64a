//! Context command: report the directory a template's build would expose.

use super::load_template;
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_core::builder::resolve_context;
use kiln_core::Step;
use std::path::Path;

pub fn context(template: &Path) -> Result<()> {
    let config = load_template(template)?;

    let context_dir =
        resolve_context(&config.provisioners).with_context(|| "Failed to resolve build context")?;

    println!("{} {}", "Build context:".bold(), context_dir.display().to_string().green());

    let files: Vec<String> = config
        .provisioners
        .iter()
        .filter_map(Step::from_provisioner)
        .flat_map(|step| step.files)
        .collect();

    if files.is_empty() {
        println!("  {}", "No local file references".dimmed());
    } else {
        for file in files {
            println!("  {}", file);
        }
    }

    Ok(())
}
