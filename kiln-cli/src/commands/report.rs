//! Report command: pretty-print a build report.

use anyhow::{Context, Result};
use colored::Colorize;
use kiln_core::report::{read_report, BuildKind};
use std::path::Path;

pub fn report(path: &Path) -> Result<()> {
    let report = read_report(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;

    println!(
        "{} {} ({}) built in {} at {}",
        "==>".bold().blue(),
        report.template.green(),
        report.version.cyan(),
        report.duration.yellow(),
        report.timestamp.to_rfc3339()
    );

    for build in &report.builds {
        match build.kind {
            BuildKind::Container => {
                println!("  {:<10} {:<14} {}", "container", build.platform, build.image_ref);
                if !build.digest.is_empty() {
                    println!("  {:<10} {:<14} {}", "", "", build.digest.dimmed());
                }
            }
            BuildKind::Ami => {
                println!(
                    "  {:<10} {:<14} {} ({})",
                    "ami", build.architecture, build.ami_id, build.region
                );
            }
        }
        for note in &build.notes {
            println!("  {:<10} {:<14} {}", "", "", note.dimmed());
        }
    }

    if let Some(manifest) = &report.manifest {
        println!("  {} {} {}", "manifest".bold(), manifest.reference, manifest.digest.dimmed());
    }
    println!("  pushed: {}  kiln {}", report.pushed, report.kiln_version);

    Ok(())
}
