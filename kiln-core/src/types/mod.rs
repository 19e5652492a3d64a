//! Core domain types for kiln.

pub mod build_config;
pub mod manifest;
pub mod provisioner;

// Re-exports
pub use build_config::{BaseImage, BuildConfig, DockerfileConfig};
pub use manifest::{ManifestEntry, ManifestList, ManifestListEntry, ManifestPlatform};
pub use provisioner::{
    AnsibleProvisioner, FileProvisioner, PowerShellProvisioner, Provisioner, ScriptProvisioner,
    ShellProvisioner,
};
