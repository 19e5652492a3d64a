//! Container build driver.
//!
//! Resolves the build context, compiles the config into a graph and submits
//! it to a [`BuildBackend`]. The exported image tarball is loaded into the
//! local image store and then removed, whichever way the build ends.
//!
//! While the backend solves, its status updates are drained by a separate
//! task; the driver waits for that task before returning so no progress
//! output is lost.

use crate::builder::compile::compile;
use crate::builder::context::resolve_context;
use crate::builder::graph::Definition;
use crate::config::Config;
use crate::docker::ImageStore;
use crate::error::{KilnError, Result};
use crate::observability::metrics;
use crate::report::{default_report_path, write_report, BuildReport, ReportBuild};
use crate::types::build_config::BuildConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Frontend name for Dockerfile builds.
pub const DOCKERFILE_FRONTEND: &str = "dockerfile.v0";

const STATUS_BUFFER: usize = 64;

/// Exporter type for a build output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// Docker-loadable tarball.
    Docker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEntry {
    pub kind: ExporterKind,
    pub attrs: BTreeMap<String, String>,
    /// File the exporter writes to.
    pub output: PathBuf,
}

/// Cache import or export configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheOptionsEntry {
    pub kind: String,
    pub attrs: BTreeMap<String, String>,
}

impl CacheOptionsEntry {
    /// Registry cache entry from a `key=value,...` spec.
    pub fn registry(spec: &str) -> Self {
        Self { kind: "registry".to_string(), attrs: parse_cache_attrs(spec) }
    }
}

/// Everything a backend needs to run one build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolveRequest {
    /// Marshalled graph. `None` when a frontend produces the graph.
    pub definition: Option<Definition>,
    pub frontend: Option<String>,
    pub frontend_attrs: BTreeMap<String, String>,
    pub exports: Vec<ExportEntry>,
    /// Named local directories exposed to the build.
    pub local_dirs: BTreeMap<String, PathBuf>,
    pub cache_imports: Vec<CacheOptionsEntry>,
    pub cache_exports: Vec<CacheOptionsEntry>,
}

/// Progress update streamed by a backend while it solves.
#[derive(Debug, Clone, Default)]
pub struct SolveStatus {
    pub vertexes: Vec<Vertex>,
    pub logs: Vec<VertexLog>,
}

#[derive(Debug, Clone, Default)]
pub struct Vertex {
    pub digest: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct VertexLog {
    pub vertex: String,
    pub data: Vec<u8>,
}

/// A remote build daemon.
///
/// Implementations send status updates on `status` while solving and drop
/// the sender when done.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    async fn solve(
        &self,
        request: SolveRequest,
        status: mpsc::Sender<SolveStatus>,
    ) -> anyhow::Result<()>;
}

/// Outcome of a single-architecture build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    pub image_ref: String,
    /// Content digest, empty when the local store could not report one.
    pub digest: String,
    pub architecture: String,
    pub platform: String,
    pub duration: Duration,
    pub notes: Vec<String>,
}

/// Drives builds against a backend and a local image store.
pub struct Builder {
    backend: Arc<dyn BuildBackend>,
    store: Arc<dyn ImageStore>,
    cache_from: Vec<String>,
    cache_to: Vec<String>,
}

impl Builder {
    pub fn new(backend: Arc<dyn BuildBackend>, store: Arc<dyn ImageStore>) -> Self {
        Self { backend, store, cache_from: Vec::new(), cache_to: Vec::new() }
    }

    /// Builder using the cache specs from the persisted configuration.
    pub fn from_config(
        backend: Arc<dyn BuildBackend>,
        store: Arc<dyn ImageStore>,
        config: &Config,
    ) -> Self {
        Self::new(backend, store).with_cache(config.cache_from.clone(), config.cache_to.clone())
    }

    /// Set registry cache sources and destinations (`type=registry,ref=...` specs).
    pub fn with_cache(mut self, cache_from: Vec<String>, cache_to: Vec<String>) -> Self {
        if !cache_from.is_empty() {
            info!(sources = ?cache_from, "Build cache sources");
        }
        if !cache_to.is_empty() {
            info!(destinations = ?cache_to, "Build cache destinations");
        }
        self.cache_from = cache_from;
        self.cache_to = cache_to;
        self
    }

    /// Build an image from a config.
    #[instrument(skip(self, config), fields(image = %config.name))]
    pub async fn build(&self, config: &BuildConfig) -> Result<BuildResult> {
        if config.is_dockerfile_based() {
            return self.build_dockerfile(config).await;
        }

        let start = Instant::now();
        info!("Building image: {}", config.name);

        let context_dir = resolve_context(&config.provisioners)?;
        debug!(context = %context_dir.display(), "Using build context");

        let definition = compile(config, &context_dir)?.marshal()?;
        debug!(ops = definition.ops.len(), "Build graph compiled");

        let image_name = config.image_name();
        let platform = platform_string(config);

        let mut request = SolveRequest {
            definition: Some(definition),
            local_dirs: BTreeMap::from([("context".to_string(), context_dir)]),
            ..Default::default()
        };

        let result = self
            .solve_and_load(config, &image_name, &mut request)
            .await
            .map(|digest| BuildResult {
                image_ref: image_name.clone(),
                digest,
                architecture: arch_from_platform(&platform),
                platform,
                duration: start.elapsed(),
                notes: vec![
                    "Built from compiled build graph".to_string(),
                    "Image loaded to Docker".to_string(),
                ],
            });

        self.record(&image_name, start, result)
    }

    /// Build an image and write its report.
    ///
    /// The report goes to `report_path`, or the default report location for
    /// the template when none is given. Nothing is written when the build fails.
    pub async fn build_with_report(
        &self,
        config: &BuildConfig,
        report_path: Option<&Path>,
    ) -> Result<(BuildResult, PathBuf)> {
        let result = self.build(config).await?;

        let path =
            report_path.map(Path::to_path_buf).unwrap_or_else(|| default_report_path(config));
        let report = BuildReport::new(config, vec![ReportBuild::from(&result)], result.duration);
        write_report(&path, &report)?;
        info!(report = %path.display(), "Build report written");

        Ok((result, path))
    }

    /// Build through the Dockerfile frontend.
    #[instrument(skip(self, config), fields(image = %config.name))]
    pub async fn build_dockerfile(&self, config: &BuildConfig) -> Result<BuildResult> {
        let start = Instant::now();
        info!("Building image from Dockerfile: {}", config.name);

        let dockerfile = config.dockerfile.clone().unwrap_or_default();
        let dockerfile_path = dockerfile.dockerfile_path();
        let context_dir = dockerfile.build_context();
        debug!(
            dockerfile = %dockerfile_path.display(),
            context = %context_dir.display(),
            "Dockerfile build"
        );

        let filename = dockerfile_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| KilnError::InvalidConfig {
                reason: format!("invalid Dockerfile path: {}", dockerfile_path.display()),
            })?;
        let dockerfile_dir = dockerfile_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut attrs = BTreeMap::from([("filename".to_string(), filename)]);
        if let Some(target) = dockerfile.target.as_ref().filter(|t| !t.is_empty()) {
            attrs.insert("target".to_string(), target.clone());
        }
        for (key, value) in dockerfile.args.iter().chain(config.build_args.iter()) {
            attrs.insert(format!("build-arg:{}", key), value.clone());
        }
        if let [arch] = config.architectures.as_slice() {
            attrs.insert("platform".to_string(), format!("linux/{}", arch));
        }
        if config.no_cache {
            attrs.insert("no-cache".to_string(), String::new());
        }

        let image_name = config.image_name();
        let platform = platform_string(config);

        let mut request = SolveRequest {
            frontend: Some(DOCKERFILE_FRONTEND.to_string()),
            frontend_attrs: attrs,
            local_dirs: BTreeMap::from([
                ("context".to_string(), context_dir),
                ("dockerfile".to_string(), dockerfile_dir),
            ]),
            ..Default::default()
        };

        let result = self
            .solve_and_load(config, &image_name, &mut request)
            .await
            .map(|digest| BuildResult {
                image_ref: image_name.clone(),
                digest,
                architecture: arch_from_platform(&platform),
                platform,
                duration: start.elapsed(),
                notes: vec![
                    "Built from Dockerfile".to_string(),
                    "Image loaded to Docker".to_string(),
                ],
            });

        self.record(&image_name, start, result)
    }

    /// Export to a temporary tarball, solve, load the result and read back its digest.
    async fn solve_and_load(
        &self,
        config: &BuildConfig,
        image_name: &str,
        request: &mut SolveRequest,
    ) -> Result<String> {
        let tarball = tempfile::Builder::new()
            .prefix("kiln-image-")
            .suffix(".tar")
            .tempfile()
            .map_err(|e| KilnError::IoError { path: std::env::temp_dir(), source: e })?;

        request.exports = vec![ExportEntry {
            kind: ExporterKind::Docker,
            attrs: build_export_attributes(image_name, &config.labels),
            output: tarball.path().to_path_buf(),
        }];
        self.configure_cache(request, config);

        self.solve(request.clone()).await?;

        info!("Loading image into Docker...");
        self.store.load(tarball.path(), image_name).await.map_err(|e| KilnError::BuildFailed {
            reason: format!("failed to load image into Docker: {:#}", e),
        })?;
        info!("Image loaded successfully: {}", image_name);

        Ok(self.local_digest(image_name).await)
    }

    /// Run the backend while a spawned task drains its status channel.
    async fn solve(&self, request: SolveRequest) -> Result<()> {
        let (tx, rx) = mpsc::channel(STATUS_BUFFER);
        let progress = tokio::spawn(display_progress(rx));

        let result = self.backend.solve(request, tx).await;

        if let Err(e) = progress.await {
            warn!("Progress task failed: {}", e);
        }

        result.map_err(|e| KilnError::BuildFailed { reason: format!("{:#}", e) })
    }

    fn configure_cache(&self, request: &mut SolveRequest, config: &BuildConfig) {
        if config.no_cache || config.is_local_template {
            let reason = if config.is_local_template {
                "local template detected (changes will be reflected immediately)"
            } else {
                "building from scratch"
            };
            info!("Caching disabled - {}", reason);
            return;
        }

        if !self.cache_from.is_empty() {
            info!("Configuring cache import from {} source(s)", self.cache_from.len());
            request.cache_imports =
                self.cache_from.iter().map(|spec| CacheOptionsEntry::registry(spec)).collect();
        }
        if !self.cache_to.is_empty() {
            info!("Configuring cache export to {} destination(s)", self.cache_to.len());
            request.cache_exports =
                self.cache_to.iter().map(|spec| CacheOptionsEntry::registry(spec)).collect();
        }
    }

    async fn local_digest(&self, image_name: &str) -> String {
        match self.store.inspect(image_name).await {
            Ok(details) => details.digest(),
            Err(e) => {
                warn!("Failed to inspect image {}: {:#}", image_name, e);
                String::new()
            }
        }
    }

    fn record(
        &self,
        image_name: &str,
        start: Instant,
        result: Result<BuildResult>,
    ) -> Result<BuildResult> {
        match &result {
            Ok(_) => metrics::record_build(start.elapsed().as_secs_f64(), image_name),
            Err(_) => metrics::record_build_failure(),
        }
        result
    }
}

async fn display_progress(mut rx: mpsc::Receiver<SolveStatus>) {
    while let Some(status) = rx.recv().await {
        for vertex in status.vertexes.iter().filter(|v| !v.name.is_empty()) {
            let short = vertex.digest.get(..19).unwrap_or(&vertex.digest);
            debug!("[{}] {}", short, vertex.name);
        }
        for log in &status.logs {
            info!(target: "kiln::build", "{}", String::from_utf8_lossy(&log.data).trim_end());
        }
    }
}

/// Exporter attributes: the image name plus one `label:<key>` entry per label.
pub fn build_export_attributes(
    image_name: &str,
    labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::from([("name".to_string(), image_name.to_string())]);
    for (key, value) in labels {
        debug!("Adding label to image: {}={}", key, value);
        attrs.insert(format!("label:{}", key), value.clone());
    }
    attrs
}

/// Parse a cache spec such as `type=registry,ref=user/app:cache,mode=max`.
///
/// Pairs without `=` are dropped; keys and values are trimmed; values may contain `=`.
pub fn parse_cache_attrs(spec: &str) -> BTreeMap<String, String> {
    spec.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Platform string reported for a build.
pub fn platform_string(config: &BuildConfig) -> String {
    if !config.base.platform.is_empty() {
        config.base.platform.clone()
    } else if let Some(arch) = config.architectures.first() {
        format!("linux/{}", arch)
    } else {
        "unknown".to_string()
    }
}

/// Architecture component of an `os/arch` platform, empty when absent.
pub fn arch_from_platform(platform: &str) -> String {
    platform.split('/').nth(1).unwrap_or_default().to_string()
}

/// Registry host of an image reference. Bare names resolve to `docker.io`.
pub fn extract_registry_from_image_ref(image_ref: &str) -> String {
    let without_digest = image_ref.split('@').next().unwrap_or_default();
    let mut parts = without_digest.split('/');
    let first = parts.next().unwrap_or_default();

    if parts.next().is_none() {
        return "docker.io".to_string();
    }
    if first.contains('.') || first.contains(':') || first == "localhost" {
        return first.to_string();
    }
    "docker.io".to_string()
}
