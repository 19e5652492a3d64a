//! Error types for kiln.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kiln operations.
pub type Result<T> = std::result::Result<T, KilnError>;

/// Main error type for kiln.
#[derive(Error, Debug)]
pub enum KilnError {
    // Platform errors
    #[error("invalid platform format: {platform} (expected 'os/arch')")]
    InvalidPlatform { platform: String },

    #[error("no platform specified in config: {reason}")]
    NoPlatform { reason: String },

    // Provisioner errors
    #[error("provisioner {index} failed: {source}")]
    ProvisionerFailed {
        index: usize,
        #[source]
        source: Box<KilnError>,
    },

    #[error("source path {path:?} not found: {source}")]
    SourceNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to expand path {path}: {reason}")]
    PathExpansion { path: String, reason: String },

    #[error("failed to make {path:?} relative to build context {context:?}")]
    OutsideContext { path: PathBuf, context: PathBuf },

    #[error("shell provisioner has no inline commands")]
    EmptyShell,

    #[error("ansible provisioner has no playbook path")]
    EmptyPlaybook,

    #[error("{kind} provisioner has no scripts")]
    EmptyScripts { kind: String },

    #[error("failed to read {kind} {path:?}: {source}")]
    ScriptRead {
        kind: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PowerShell script {path:?} has syntax issues: {source}")]
    PowerShellSyntax {
        path: PathBuf,
        #[source]
        source: Box<KilnError>,
    },

    #[error("unbalanced {name}: {detail}")]
    UnbalancedSyntax { name: String, detail: String },

    #[error("unsupported provisioner type for {target}: {kind}")]
    UnsupportedProvisioner { kind: String, target: String },

    // Component registry errors
    #[error("failed to create component {name}: {reason}")]
    ComponentCreate { name: String, reason: String },

    #[error("component exists but failed to get ARN: {reason}")]
    ComponentLookup { reason: String },

    #[error("failed to delete component {arn}: {reason}")]
    ComponentDelete { arn: String, reason: String },

    // Manifest errors
    #[error("no manifest entries provided")]
    NoManifestEntries,

    #[error("no digest found for {os}/{architecture}")]
    MissingDigest { os: String, architecture: String },

    #[error("failed to parse manifest name {name}: {reason}")]
    ManifestName { name: String, reason: String },

    #[error("failed to push manifest list {name}: {reason}")]
    ManifestPush { name: String, reason: String },

    // Build errors
    #[error("build failed: {reason}")]
    BuildFailed { reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KilnError {
    /// Wrap a provisioner failure with its zero-based position in the config.
    pub fn at_provisioner(self, index: usize) -> Self {
        Self::ProvisionerFailed { index, source: Box::new(self) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioner_index_in_message() {
        let err = KilnError::EmptyShell.at_provisioner(3);
        assert_eq!(
            err.to_string(),
            "provisioner 3 failed: shell provisioner has no inline commands"
        );
    }

    #[test]
    fn test_missing_digest_message() {
        let err =
            KilnError::MissingDigest { os: "linux".to_string(), architecture: "arm64".to_string() };
        assert_eq!(err.to_string(), "no digest found for linux/arm64");
    }
}
