//! Multi-architecture manifest assembly.
//!
//! Per-architecture build results are combined into one image index and
//! pushed under a shared name. Every entry must carry a digest. Entries
//! whose image reference cannot be resolved in the registry are left out
//! with a warning, so a partial index is pushed rather than none.

pub mod oci;

pub use oci::{parse_reference, OciRegistryClient};

use crate::docker::ImageStore;
use crate::error::{KilnError, Result};
use crate::observability::metrics;
use crate::types::manifest::{
    ManifestEntry, ManifestList, ManifestListEntry, ManifestPlatform, MANIFEST_MEDIA_TYPE,
};
use async_trait::async_trait;
use oci_distribution::manifest::{
    ImageIndexEntry, OciImageIndex, Platform, OCI_IMAGE_INDEX_MEDIA_TYPE,
};
use oci_distribution::Reference;
use tracing::{debug, info, instrument, warn};

/// Content descriptor of a manifest stored in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
}

/// Remote registry operations needed to publish an index.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Look up the manifest `reference` points at.
    async fn resolve(&self, reference: &Reference) -> anyhow::Result<Descriptor>;

    /// Push an image index and return its digest.
    async fn push_index(
        &self,
        reference: &Reference,
        index: OciImageIndex,
    ) -> anyhow::Result<String>;
}

/// Assemble `entries` into one index and push it as `manifest_name`.
///
/// Returns the digest reported for the pushed index.
#[instrument(skip(entries, store, registry), fields(entries = entries.len()))]
pub async fn assemble_and_push(
    manifest_name: &str,
    entries: &[ManifestEntry],
    store: &dyn ImageStore,
    registry: &dyn RegistryClient,
) -> Result<String> {
    if entries.is_empty() {
        return Err(KilnError::NoManifestEntries);
    }
    if let Some(entry) = entries.iter().find(|e| e.digest.is_empty()) {
        return Err(KilnError::MissingDigest {
            os: entry.os.clone(),
            architecture: entry.architecture.clone(),
        });
    }

    info!("Creating multi-arch manifest {} with {} entries", manifest_name, entries.len());

    let list = manifest_list(entries, store).await;
    match serde_json::to_string_pretty(&list) {
        Ok(json) => debug!("Manifest list:\n{}", json),
        Err(e) => warn!(error = %e, "Could not render manifest list"),
    }

    let target = parse_reference(manifest_name).map_err(|e| KilnError::ManifestName {
        name: manifest_name.to_string(),
        reason: format!("{:#}", e),
    })?;

    let mut manifests = Vec::with_capacity(entries.len());
    for entry in entries {
        match resolve_entry(entry, registry).await {
            Ok(index_entry) => manifests.push(index_entry),
            Err(e) => {
                warn!(
                    image = %entry.image_ref,
                    platform = %format!("{}/{}", entry.os, entry.architecture),
                    error = %format!("{:#}", e),
                    "Skipping manifest entry"
                );
                metrics::record_manifest_entry_skipped();
            }
        }
    }

    info!("Pushing manifest list with {} of {} entries", manifests.len(), entries.len());

    let index = OciImageIndex {
        schema_version: 2,
        media_type: Some(OCI_IMAGE_INDEX_MEDIA_TYPE.to_string()),
        manifests,
        annotations: None,
    };

    let digest = registry.push_index(&target, index).await.map_err(|e| KilnError::ManifestPush {
        name: manifest_name.to_string(),
        reason: format!("{:#}", e),
    })?;

    info!(manifest = %manifest_name, %digest, "Pushed multi-arch manifest");
    Ok(digest)
}

/// Schema 2 manifest list built from local data. Sizes the store cannot
/// report are recorded as 0.
async fn manifest_list(entries: &[ManifestEntry], store: &dyn ImageStore) -> ManifestList {
    let mut manifests = Vec::with_capacity(entries.len());
    for entry in entries {
        let size = match store.inspect(&entry.image_ref).await {
            Ok(details) => details.size,
            Err(e) => {
                warn!(image = %entry.image_ref, error = %e, "Could not read image size, using 0");
                0
            }
        };

        manifests.push(ManifestListEntry {
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            size,
            digest: entry.digest.clone(),
            platform: ManifestPlatform {
                architecture: entry.architecture.clone(),
                os: entry.os.clone(),
                variant: entry.variant.clone(),
            },
        });
    }
    ManifestList::new(manifests)
}

async fn resolve_entry(
    entry: &ManifestEntry,
    registry: &dyn RegistryClient,
) -> anyhow::Result<ImageIndexEntry> {
    let reference = parse_reference(&entry.image_ref)?;
    let descriptor = registry.resolve(&reference).await?;

    Ok(ImageIndexEntry {
        media_type: descriptor.media_type,
        digest: descriptor.digest,
        size: descriptor.size,
        platform: Some(Platform {
            architecture: entry.architecture.clone(),
            os: entry.os.clone(),
            os_version: None,
            os_features: None,
            variant: entry.variant.clone(),
            features: None,
        }),
        annotations: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::ImageDetails;
    use std::path::Path;

    /// Store that knows the size of one image and fails for the rest.
    struct OneImageStore;

    #[async_trait]
    impl ImageStore for OneImageStore {
        async fn load(&self, _tarball: &Path, _image_ref: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn inspect(&self, image_ref: &str) -> anyhow::Result<ImageDetails> {
            if image_ref != "ghcr.io/org/app:1.0-amd64" {
                anyhow::bail!("no such image: {}", image_ref);
            }
            Ok(ImageDetails {
                id: "sha256:local".to_string(),
                repo_digests: Vec::new(),
                size: 4096,
            })
        }
    }

    fn entry(image_ref: &str, architecture: &str, digest: &str) -> ManifestEntry {
        ManifestEntry {
            image_ref: image_ref.to_string(),
            os: "linux".to_string(),
            architecture: architecture.to_string(),
            variant: None,
            digest: digest.to_string(),
        }
    }

    #[tokio::test]
    async fn test_failed_size_lookup_records_zero() {
        let entries = vec![
            entry("ghcr.io/org/app:1.0-amd64", "amd64", "sha256:aaa"),
            entry("ghcr.io/org/app:1.0-arm64", "arm64", "sha256:bbb"),
        ];

        let list = manifest_list(&entries, &OneImageStore).await;

        assert_eq!(list.schema_version, 2);
        assert_eq!(list.media_type, crate::types::manifest::MANIFEST_LIST_MEDIA_TYPE);
        assert_eq!(list.manifests.len(), 2);
        assert_eq!(list.manifests[0].size, 4096);
        assert_eq!(list.manifests[1].size, 0);
        assert_eq!(list.manifests[1].digest, "sha256:bbb");
        assert_eq!(list.manifests[1].platform.architecture, "arm64");
        assert_eq!(list.manifests[1].media_type, MANIFEST_MEDIA_TYPE);
    }
}
