//! Manifest command: push a multi-arch manifest from per-architecture images.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use kiln_core::docker::DockerCli;
use kiln_core::manifest::{assemble_and_push, OciRegistryClient};
use kiln_core::report::{read_report, write_report, BuildKind};
use kiln_core::ManifestEntry;
use std::path::Path;

/// Parse `IMAGE_REF=OS/ARCH[/VARIANT]@DIGEST`.
pub fn parse_entry(spec: &str) -> Result<ManifestEntry> {
    let Some((image_ref, rest)) = spec.split_once('=') else {
        bail!("Invalid manifest entry (expected IMAGE_REF=OS/ARCH@DIGEST): {}", spec);
    };
    let Some((platform, digest)) = rest.split_once('@') else {
        bail!("Manifest entry has no digest: {}", spec);
    };

    let mut parts = platform.split('/');
    let (Some(os), Some(architecture)) = (parts.next(), parts.next()) else {
        bail!("Invalid platform in manifest entry: {}", platform);
    };

    Ok(ManifestEntry {
        image_ref: image_ref.to_string(),
        os: os.to_string(),
        architecture: architecture.to_string(),
        variant: parts.next().map(str::to_string),
        digest: digest.to_string(),
    })
}

/// Container builds recorded in a build report.
pub fn entries_from_report(path: &Path) -> Result<Vec<ManifestEntry>> {
    let report = read_report(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;

    Ok(report
        .builds
        .into_iter()
        .filter(|build| build.kind == BuildKind::Container)
        .map(|build| {
            let os = build.platform.split('/').next().unwrap_or("linux").to_string();
            ManifestEntry {
                image_ref: build.image_ref,
                os: if os.is_empty() { "linux".to_string() } else { os },
                architecture: build.architecture,
                variant: None,
                digest: build.digest,
            }
        })
        .collect())
}

/// Push the manifest list and return its digest (empty when the registry reported none).
pub async fn push(name: &str, entries: Vec<ManifestEntry>) -> Result<String> {
    println!(
        "{} Creating manifest {} from {} image(s)",
        "[1/2]".bold().blue(),
        name.green(),
        entries.len().to_string().yellow()
    );
    for entry in &entries {
        println!("  {}/{} {}", entry.os, entry.architecture, entry.image_ref.dimmed());
    }

    println!("{} Pushing manifest list", "[2/2]".bold().blue());
    let store = DockerCli::default();
    let registry = OciRegistryClient::from_env();
    let digest = assemble_and_push(name, &entries, &store, &registry)
        .await
        .with_context(|| format!("Failed to push manifest {}", name))?;

    println!("{} {}", "✓ Pushed".green(), name);
    if !digest.is_empty() {
        println!("  Digest: {}", digest.cyan());
    }
    Ok(digest)
}

/// Mark a report as pushed under `name`.
pub fn record_in_report(path: &Path, name: &str, digest: &str) -> Result<()> {
    let report = read_report(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?
        .with_manifest(name, digest);
    write_report(path, &report)
        .with_context(|| format!("Failed to update report: {}", path.display()))?;
    println!("  Recorded manifest in {}", path.display());
    Ok(())
}
