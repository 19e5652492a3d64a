//! Component command: render the image pipeline documents for a template.
//!
//! Documents are rendered locally; registration needs an image pipeline
//! client and is left to the library's `ComponentGenerator`.

use super::load_template;
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_core::ami::{normalize_semantic_version, render};
use kiln_core::{Config, Step};
use std::path::Path;

pub fn component(template: &Path, output: Option<&Path>, settings: &Config) -> Result<()> {
    let config = load_template(template)?;

    let version = normalize_semantic_version(&config.version);
    println!(
        "{} Rendering components for {} (version {})",
        "==>".bold().blue(),
        config.name.green(),
        version.cyan()
    );

    if let Some(dir) = output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }

    let mut rendered = 0;
    for (index, provisioner) in config.provisioners.iter().enumerate() {
        let Some(step) = Step::from_provisioner(provisioner) else {
            println!("  {} {} ({}): unknown type", "skip".yellow(), index, provisioner.kind());
            continue;
        };

        let document = match render(&step, &settings.ami.execution_policy) {
            Ok(document) => document,
            Err(kiln_core::KilnError::UnsupportedProvisioner { kind, .. }) => {
                println!("  {} {} ({}): no component form", "skip".yellow(), index, kind);
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to render provisioner {}", index))
            }
        };

        let name = format!(
            "{}{}-{}-{}",
            settings.ami.component_prefix,
            config.name,
            index,
            step.kind_name()
        );
        let yaml = document.to_yaml()?;

        match output {
            Some(dir) => {
                let path = dir.join(format!("{}.yml", name));
                std::fs::write(&path, &yaml)
                    .with_context(|| format!("Failed to write component: {}", path.display()))?;
                println!("  {} {} ({})", "✓".green(), name, step.target.as_str());
            }
            None => {
                println!("# {} ({})", name.bold(), step.target.as_str());
                println!("{}", yaml);
            }
        }
        rendered += 1;
    }

    println!("{} {} component(s) rendered", "==>".bold().blue(), rendered);
    Ok(())
}
