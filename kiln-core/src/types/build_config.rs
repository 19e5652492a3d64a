//! Build request types.
//!
//! A [`BuildConfig`] is produced once by the template loader and treated as
//! read-only by everything downstream.

use crate::error::{KilnError, Result};
use crate::types::provisioner::Provisioner;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// An immutable build request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Image name (e.g., "attack-box")
    pub name: String,
    /// Image version, used as the tag and the AMI component version
    pub version: String,
    pub base: BaseImage,
    /// Architectures to build for (e.g., ["amd64", "arm64"])
    pub architectures: Vec<String>,
    /// Build arguments, applied as additional environment
    pub build_args: BTreeMap<String, String>,
    /// Provisioners, applied in order
    pub provisioners: Vec<Provisioner>,
    /// Dockerfile-style instructions applied after all provisioners
    pub post_changes: Vec<String>,
    /// Image labels
    pub labels: BTreeMap<String, String>,
    /// Registry prefix (e.g., "ghcr.io/org")
    pub registry: String,
    pub no_cache: bool,
    /// Template loaded from a local path rather than a published source
    pub is_local_template: bool,
    /// Build from a Dockerfile instead of provisioners
    pub dockerfile: Option<DockerfileConfig>,
}

/// Base image to start from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BaseImage {
    pub image: String,
    /// Platform string ("os/arch")
    pub platform: String,
    pub env: BTreeMap<String, String>,
    /// Dockerfile-style instructions applied before any provisioner
    pub changes: Vec<String>,
}

/// Dockerfile build settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DockerfileConfig {
    /// Path to the Dockerfile (default: `<context>/Dockerfile`)
    pub path: Option<PathBuf>,
    /// Build context directory (default: ".")
    pub context: Option<PathBuf>,
    pub args: BTreeMap<String, String>,
    pub target: Option<String>,
}

impl DockerfileConfig {
    /// Build context directory.
    pub fn build_context(&self) -> PathBuf {
        self.context.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Dockerfile location, defaulting to `Dockerfile` inside the context.
    pub fn dockerfile_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| self.build_context().join("Dockerfile"))
    }
}

impl BuildConfig {
    /// Parse a template from YAML.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| KilnError::InvalidConfig {
            reason: format!("Failed to parse template: {}", e),
        })
    }

    /// Load a template from disk. `.json` files are parsed as JSON, everything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KilnError::IoError { path: path.to_path_buf(), source: e })?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| KilnError::InvalidConfig {
                reason: format!("Failed to parse template {}: {}", path.display(), e),
            })
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Whether this build goes through the Dockerfile frontend.
    pub fn is_dockerfile_based(&self) -> bool {
        self.dockerfile.is_some()
    }

    /// Full image reference: `[registry/]name:version`.
    pub fn image_name(&self) -> String {
        let image = format!("{}:{}", self.name, self.version);
        if self.registry.is_empty() {
            image
        } else {
            format!("{}/{}", self.registry, image)
        }
    }
}
