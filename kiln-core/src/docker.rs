//! Local image store access.
//!
//! Builds are exported as a tarball and loaded into the local Docker image
//! store; digests and sizes are read back from it. [`DockerCli`] talks to
//! the store through the `docker` binary.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, instrument};

/// What the local store knows about an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageDetails {
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(rename = "RepoDigests", default)]
    pub repo_digests: Vec<String>,
    #[serde(rename = "Size", default)]
    pub size: i64,
}

impl ImageDetails {
    /// Content digest: the first repo digest when present, else the image id.
    ///
    /// Empty when the store has neither.
    pub fn digest(&self) -> String {
        if let Some(repo_digest) = self.repo_digests.first() {
            if let Some((_, digest)) = repo_digest.split_once('@') {
                return digest.to_string();
            }
        }
        self.id.clone()
    }
}

/// Local image store.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Load an exported image tarball.
    async fn load(&self, tarball: &Path, image_ref: &str) -> anyhow::Result<()>;

    /// Inspect an image by reference.
    async fn inspect(&self, image_ref: &str) -> anyhow::Result<ImageDetails>;
}

/// [`ImageStore`] backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self { binary: "docker".to_string() }
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<Vec<u8>> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run {}: {}", self.binary, e))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ImageStore for DockerCli {
    #[instrument(skip(self), fields(image = %image_ref))]
    async fn load(&self, tarball: &Path, image_ref: &str) -> anyhow::Result<()> {
        let tarball = tarball.to_string_lossy();
        let stdout = self.run(&["load", "-i", &tarball]).await?;
        debug!("Image load response: {}", String::from_utf8_lossy(&stdout).trim());
        Ok(())
    }

    #[instrument(skip(self), fields(image = %image_ref))]
    async fn inspect(&self, image_ref: &str) -> anyhow::Result<ImageDetails> {
        let stdout = self.run(&["image", "inspect", image_ref]).await?;
        parse_inspect_output(&stdout)
    }
}

fn parse_inspect_output(stdout: &[u8]) -> anyhow::Result<ImageDetails> {
    let mut images: Vec<ImageDetails> = serde_json::from_slice(stdout)?;
    if images.is_empty() {
        anyhow::bail!("docker image inspect returned no images");
    }
    Ok(images.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_prefers_repo_digest() {
        let details = ImageDetails {
            id: "sha256:local".to_string(),
            repo_digests: vec!["ghcr.io/org/app@sha256:remote".to_string()],
            size: 10,
        };
        assert_eq!(details.digest(), "sha256:remote");
    }

    #[test]
    fn test_digest_falls_back_to_id() {
        let details = ImageDetails { id: "sha256:local".to_string(), ..Default::default() };
        assert_eq!(details.digest(), "sha256:local");
        assert_eq!(ImageDetails::default().digest(), "");
    }

    #[test]
    fn test_parse_inspect_output() {
        let raw = br#"[{"Id": "sha256:abc", "RepoDigests": [], "Size": 73400320, "Os": "linux"}]"#;
        let details = parse_inspect_output(raw).unwrap();
        assert_eq!(details.id, "sha256:abc");
        assert_eq!(details.size, 73400320);
    }

    #[test]
    fn test_parse_inspect_output_empty() {
        assert!(parse_inspect_output(b"[]").is_err());
    }
}
