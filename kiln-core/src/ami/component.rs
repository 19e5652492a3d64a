//! Component registration.
//!
//! Each provisioner becomes one image pipeline component named
//! `<name>-<kind>`. Registration is idempotent: when a component with the
//! same name and version already exists, its identifier is looked up and
//! reused instead of failing.

use crate::ami::document::render;
use crate::ami::version::normalize_semantic_version;
use crate::config::AmiConfig;
use crate::error::{KilnError, Result};
use crate::observability::metrics;
use crate::provision::{Step, TargetOs};
use crate::types::build_config::BuildConfig;
use crate::types::provisioner::Provisioner;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Request to create one component version.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateComponent {
    pub name: String,
    pub semantic_version: String,
    pub platform: TargetOs,
    /// YAML component document.
    pub data: String,
    pub description: String,
    pub tags: BTreeMap<String, String>,
}

/// A registered version of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentVersion {
    pub version: String,
    pub arn: String,
}

/// Why a create call failed.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("component already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Remote component registry (the image pipeline service).
#[async_trait]
pub trait ComponentRegistry: Send + Sync {
    /// Create a component version and return its identifier.
    async fn create_component(
        &self,
        request: CreateComponent,
    ) -> std::result::Result<String, CreateError>;

    /// List registered versions of a component by name.
    async fn list_components(&self, name: &str) -> anyhow::Result<Vec<ComponentVersion>>;

    async fn delete_component(&self, arn: &str) -> anyhow::Result<()>;
}

/// Builds component documents and registers them.
pub struct ComponentGenerator {
    registry: Arc<dyn ComponentRegistry>,
    config: AmiConfig,
}

impl ComponentGenerator {
    pub fn new(registry: Arc<dyn ComponentRegistry>, config: AmiConfig) -> Self {
        Self { registry, config }
    }

    /// Register a component for one provisioner and return its identifier.
    pub async fn generate(
        &self,
        provisioner: &Provisioner,
        name: &str,
        version: &str,
    ) -> Result<String> {
        self.register(provisioner, name, version).await.map(|(arn, _)| arn)
    }

    /// Like [`generate`](Self::generate), also reporting whether the
    /// component was created by this call rather than reused.
    #[instrument(skip(self, provisioner), fields(kind = provisioner.kind()))]
    async fn register(
        &self,
        provisioner: &Provisioner,
        name: &str,
        version: &str,
    ) -> Result<(String, bool)> {
        let step =
            Step::from_provisioner(provisioner).ok_or_else(|| KilnError::UnsupportedProvisioner {
                kind: provisioner.kind().to_string(),
                target: "AMI component".to_string(),
            })?;

        let document = render(&step, &self.config.execution_policy)?.to_yaml()?;

        let kind = step.kind_name();
        let component_name = format!("{}{}-{}", self.config.component_prefix, name, kind);
        let request = CreateComponent {
            name: component_name.clone(),
            semantic_version: version.to_string(),
            platform: step.target,
            data: document,
            description: format!("Component for {} provisioner", kind),
            tags: BTreeMap::from([
                ("kiln:type".to_string(), kind.to_string()),
                ("kiln:name".to_string(), name.to_string()),
            ]),
        };

        match self.registry.create_component(request).await {
            Ok(arn) => {
                info!(component = %component_name, %arn, "Created component");
                metrics::record_component_registered("created");
                Ok((arn, true))
            }
            Err(CreateError::AlreadyExists(reason)) => {
                info!(
                    component = %component_name,
                    %reason,
                    "Component exists, looking up identifier"
                );
                let arn = self
                    .find_version(&component_name, version)
                    .await
                    .map_err(|e| KilnError::ComponentLookup { reason: format!("{:#}", e) })?;
                metrics::record_component_registered("reused");
                Ok((arn, false))
            }
            Err(CreateError::Other(e)) => Err(KilnError::ComponentCreate {
                name: component_name,
                reason: format!("{:#}", e),
            }),
        }
    }

    /// Register components for every provisioner in a config, in order.
    ///
    /// Components are named `<config name>-<index>-<kind>` and share the
    /// config's version, normalized to `x.y.z`. Provisioners with no
    /// component form are skipped.
    ///
    /// When a provisioner fails, components created earlier in the same call
    /// are deleted before the error is returned. Reused components are left alone.
    pub async fn generate_all(&self, config: &BuildConfig) -> Result<Vec<String>> {
        let version = normalize_semantic_version(&config.version);
        let mut arns = Vec::new();
        let mut created = Vec::new();

        for (index, provisioner) in config.provisioners.iter().enumerate() {
            let name = format!("{}-{}", config.name, index);
            info!("Creating component: {} (index: {})", provisioner.kind(), index);

            match self.register(provisioner, &name, &version).await {
                Ok((arn, fresh)) => {
                    if fresh {
                        created.push(arn.clone());
                    }
                    arns.push(arn);
                }
                Err(KilnError::UnsupportedProvisioner { kind, .. }) => {
                    warn!(%kind, index, "Provisioner has no component form, skipping");
                }
                Err(e) => {
                    self.rollback(&created).await;
                    return Err(e.at_provisioner(index));
                }
            }
        }

        info!("Successfully created {} components", arns.len());
        Ok(arns)
    }

    /// Delete a component version by identifier.
    #[instrument(skip(self))]
    pub async fn delete(&self, arn: &str) -> Result<()> {
        self.registry.delete_component(arn).await.map_err(|e| KilnError::ComponentDelete {
            arn: arn.to_string(),
            reason: format!("{:#}", e),
        })
    }

    /// Best-effort removal of components; failures are logged, not returned.
    async fn rollback(&self, arns: &[String]) {
        for arn in arns.iter().rev() {
            match self.delete(arn).await {
                Ok(()) => info!(%arn, "Deleted component after failed registration"),
                Err(e) => warn!(%arn, error = %e, "Failed to clean up component"),
            }
        }
    }

    async fn find_version(&self, name: &str, version: &str) -> anyhow::Result<String> {
        let versions = self.registry.list_components(name).await?;
        versions
            .into_iter()
            .find(|v| v.version == version)
            .map(|v| v.arn)
            .ok_or_else(|| anyhow::anyhow!("component {} version {} not found", name, version))
    }
}
