//! Container build flow.
//!
//! Provisioners are compiled into an immutable build graph rooted at the
//! base image, submitted to a build backend, and the result loaded into the
//! local image store.

pub mod build;
pub mod compile;
pub mod context;
pub mod graph;

pub use build::{
    arch_from_platform, build_export_attributes, extract_registry_from_image_ref,
    parse_cache_attrs, platform_string, BuildBackend, BuildResult, Builder, CacheOptionsEntry,
    ExportEntry, ExporterKind, SolveRequest, SolveStatus, Vertex, VertexLog,
};
pub use compile::{apply_changes, compile, parse_platform, resolve_platform};
pub use context::{common_ancestor, make_relative, resolve_context};
pub use graph::{
    CacheMount, CacheSharing, CopySpec, Definition, DefinitionOp, GraphState, Op, Platform, RunSpec,
};
