//! Build reports.
//!
//! A report is the JSON summary of one `kiln build` run: every per-target
//! result, the multi-arch manifest if one was pushed, and timing. CI
//! pipelines read it to find the digests and AMI ids they deploy.

use crate::builder::BuildResult;
use crate::error::{KilnError, Result};
use crate::paths;
use crate::types::build_config::BuildConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kind of artifact a build produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    Container,
    Ami,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub template: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Total build time, e.g. "1m2.5s"
    pub duration: String,
    pub builds: Vec<ReportBuild>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestRef>,
    pub pushed: bool,
    pub kiln_version: String,
}

/// One per-target result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportBuild {
    #[serde(rename = "type")]
    pub kind: BuildKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ami_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub duration: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Reference to a pushed multi-arch manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRef {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

impl From<&BuildResult> for ReportBuild {
    fn from(result: &BuildResult) -> Self {
        Self {
            kind: BuildKind::Container,
            platform: result.platform.clone(),
            architecture: result.architecture.clone(),
            image_ref: result.image_ref.clone(),
            digest: result.digest.clone(),
            ami_id: String::new(),
            region: String::new(),
            duration: format_duration(result.duration),
            notes: result.notes.clone(),
        }
    }
}

impl BuildReport {
    pub fn new(config: &BuildConfig, builds: Vec<ReportBuild>, duration: Duration) -> Self {
        Self {
            template: config.name.clone(),
            version: config.version.clone(),
            timestamp: Utc::now(),
            duration: format_duration(duration),
            builds,
            manifest: None,
            pushed: false,
            kiln_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Record the pushed multi-arch manifest.
    pub fn with_manifest(mut self, reference: &str, digest: &str) -> Self {
        self.manifest =
            Some(ManifestRef { reference: reference.to_string(), digest: digest.to_string() });
        self.pushed = true;
        self
    }
}

/// Default report location for a template: `<reports dir>/<name>-<version>.json`.
pub fn default_report_path(config: &BuildConfig) -> PathBuf {
    let version = if config.version.is_empty() { "latest" } else { config.version.as_str() };
    paths::reports_dir().join(format!("{}-{}.json", config.name, version))
}

/// Write a report as pretty JSON, readable only by the owner on unix.
pub fn write_report(path: &Path, report: &BuildReport) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(KilnError::InvalidConfig { reason: "report path cannot be empty".to_string() });
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| KilnError::IoError { path: parent.to_path_buf(), source: e })?;
    }

    let data = serde_json::to_string_pretty(report)
        .map_err(|e| KilnError::Serialization { reason: format!("build report: {}", e) })?;
    std::fs::write(path, data)
        .map_err(|e| KilnError::IoError { path: path.to_path_buf(), source: e })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| KilnError::IoError { path: path.to_path_buf(), source: e })?;
    }

    Ok(())
}

pub fn read_report(path: &Path) -> Result<BuildReport> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| KilnError::IoError { path: path.to_path_buf(), source: e })?;
    serde_json::from_str(&data)
        .map_err(|e| KilnError::Serialization { reason: format!("build report {:?}: {}", path, e) })
}

/// Render a duration rounded to milliseconds: "350ms", "2.5s", "1m2.5s", "1h0m3s".
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis < 1000 {
        return format!("{}ms", millis);
    }

    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis % 60_000) as f64 / 1000.0;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&format!("{}s", seconds));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BuildConfig {
        BuildConfig::from_yaml_str("name: web\nversion: 1.2.0\nbase:\n  image: ubuntu:22.04\n")
            .unwrap()
    }

    fn container_result() -> BuildResult {
        BuildResult {
            image_ref: "ghcr.io/org/web:1.2.0-amd64".to_string(),
            digest: "sha256:abc".to_string(),
            architecture: "amd64".to_string(),
            platform: "linux/amd64".to_string(),
            duration: Duration::from_millis(2500),
            notes: vec![],
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(350)), "350ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_millis(62_500)), "1m2.5s");
        assert_eq!(format_duration(Duration::from_secs(3603)), "1h0m3s");
    }

    #[test]
    fn test_build_kinds() {
        let container = ReportBuild::from(&container_result());
        assert_eq!(container.kind, BuildKind::Container);
        assert_eq!(container.duration, "2.5s");

        let ami: ReportBuild = serde_json::from_str(
            r#"{"type":"ami","architecture":"x86_64","ami_id":"ami-1","region":"eu-west-1"}"#,
        )
        .unwrap();
        assert_eq!(ami.kind, BuildKind::Ami);
        assert!(ami.image_ref.is_empty());
    }

    #[test]
    fn test_report_json_shape() {
        let builds = vec![ReportBuild::from(&container_result())];
        let report = BuildReport::new(&config(), builds, Duration::from_secs(3))
            .with_manifest("ghcr.io/org/web:1.2.0", "sha256:def");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["template"], "web");
        assert_eq!(json["pushed"], true);
        assert_eq!(json["manifest"]["ref"], "ghcr.io/org/web:1.2.0");
        assert_eq!(json["builds"][0]["type"], "container");
        assert!(json["builds"][0].get("ami_id").is_none());
        assert_eq!(json["kiln_version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_write_and_read_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        let builds = vec![ReportBuild::from(&container_result())];
        let report = BuildReport::new(&config(), builds, Duration::from_secs(1));

        write_report(&path, &report).unwrap();
        let loaded = read_report(&path).unwrap();
        assert_eq!(loaded, report);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_write_report_rejects_empty_path() {
        let report = BuildReport::new(&config(), vec![], Duration::ZERO);
        assert!(write_report(Path::new(""), &report).is_err());
    }

    #[test]
    fn test_default_report_path() {
        let path = default_report_path(&config());
        assert!(path.ends_with("reports/web-1.2.0.json"));
    }
}
