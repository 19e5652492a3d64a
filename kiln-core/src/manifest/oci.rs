//! Registry client backed by `oci-distribution`.

use super::{Descriptor, RegistryClient};
use anyhow::Context;
use async_trait::async_trait;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::manifest::{OciImageIndex, IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Reference, RegistryOperation};
use tracing::{debug, instrument, warn};

const USERNAME_ENV: &str = "KILN_REGISTRY_USERNAME";
const PASSWORD_ENV: &str = "KILN_REGISTRY_PASSWORD";

/// Parse an image reference, filling in Docker Hub defaults for short names.
///
/// `nginx` becomes `docker.io/library/nginx:latest`, `user/app` becomes
/// `docker.io/user/app:latest`.
pub fn parse_reference(image: &str) -> anyhow::Result<Reference> {
    let first = image.split('/').next().unwrap_or_default();
    let has_registry = image.contains('/')
        && (first.contains('.') || first.contains(':') || first == "localhost");

    let normalized = if !image.contains('/') {
        format!("docker.io/library/{}", image)
    } else if !has_registry && image.split('/').count() == 2 {
        format!("docker.io/{}", image)
    } else {
        image.to_string()
    };

    let last = normalized.rsplit('/').next().unwrap_or_default();
    let normalized = if !last.contains(':') && !last.contains('@') {
        format!("{}:latest", normalized)
    } else {
        normalized
    };

    Reference::try_from(normalized.as_str())
        .with_context(|| format!("invalid image reference {:?}", image))
}

/// [`RegistryClient`] speaking the OCI distribution protocol.
pub struct OciRegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl OciRegistryClient {
    pub fn new(auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(vec!["localhost".to_string()]),
            ..Default::default()
        };
        Self { client: Client::new(config), auth }
    }

    /// Basic auth from `KILN_REGISTRY_USERNAME`/`KILN_REGISTRY_PASSWORD`, anonymous otherwise.
    pub fn from_env() -> Self {
        let auth = match (std::env::var(USERNAME_ENV), std::env::var(PASSWORD_ENV)) {
            (Ok(user), Ok(password)) if !user.is_empty() => RegistryAuth::Basic(user, password),
            _ => RegistryAuth::Anonymous,
        };
        Self::new(auth)
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    #[instrument(skip(self, reference), fields(reference = %reference))]
    async fn resolve(&self, reference: &Reference) -> anyhow::Result<Descriptor> {
        let (raw, digest) = self
            .client
            .pull_manifest_raw(
                reference,
                &self.auth,
                &[IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE],
            )
            .await
            .context("failed to fetch manifest")?;

        let media_type = serde_json::from_slice::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| v.get("mediaType").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| OCI_IMAGE_MEDIA_TYPE.to_string());

        debug!(%digest, size = raw.len(), %media_type, "Resolved manifest");
        Ok(Descriptor { media_type, digest, size: raw.len() as i64 })
    }

    #[instrument(skip(self, reference, index), fields(reference = %reference))]
    async fn push_index(
        &self,
        reference: &Reference,
        index: OciImageIndex,
    ) -> anyhow::Result<String> {
        self.client
            .auth(reference, &self.auth, RegistryOperation::Push)
            .await
            .context("registry authentication failed")?;

        let url = self
            .client
            .push_manifest_list(reference, &self.auth, index)
            .await
            .context("registry rejected manifest list")?;
        debug!(%url, "Pushed manifest list");

        match self.client.fetch_manifest_digest(reference, &self.auth).await {
            Ok(digest) => Ok(digest),
            Err(e) => {
                warn!(error = %e, "Pushed manifest list but could not read back its digest");
                Ok(String::new())
            }
        }
    }
}
