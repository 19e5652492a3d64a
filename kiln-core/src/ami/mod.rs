//! AMI component generation.
//!
//! The VM-image counterpart of the container build: provisioners are
//! rendered into image pipeline component documents and registered with a
//! [`ComponentRegistry`].

pub mod component;
pub mod document;
pub mod powershell;
pub mod version;

pub use component::{
    ComponentGenerator, ComponentRegistry, ComponentVersion, CreateComponent, CreateError,
};
pub use document::{render, ComponentDocument, ComponentStep, Phase, StepInputs};
pub use version::normalize_semantic_version;
