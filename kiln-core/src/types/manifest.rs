//! Multi-architecture manifest types.

use serde::{Deserialize, Serialize};

pub const MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// One per-architecture image that goes into a manifest list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Pushed image reference (e.g., "ghcr.io/org/app:1.0-arm64")
    pub image_ref: String,
    pub os: String,
    pub architecture: String,
    /// Architecture variant (e.g., "v8")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Content digest of the per-arch image ("sha256:...")
    pub digest: String,
}

/// Docker schema 2 manifest list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    pub schema_version: u32,
    pub media_type: String,
    pub manifests: Vec<ManifestListEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestListEntry {
    pub media_type: String,
    pub size: i64,
    pub digest: String,
    pub platform: ManifestPlatform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestPlatform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl ManifestList {
    pub fn new(manifests: Vec<ManifestListEntry>) -> Self {
        Self {
            schema_version: 2,
            media_type: MANIFEST_LIST_MEDIA_TYPE.to_string(),
            manifests,
        }
    }
}
