//! Current-version resolution.
//!
//! Controllers never read cluster state directly; they ask a
//! [`VersionOracle`] chosen by the caller. Live dispatches construct the real
//! query implementations, rehearsal runs use [`FixedVersion`], so an override
//! can never leak into a live upgrade.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::kubeconfig::{self, KubeAuth};
use crate::talosctl::CommandSurface;
use crate::version;

/// Default current versions reported in rehearsal mode when no override is
/// given. Keeps rehearsal deterministic without touching the cluster.
pub const DEFAULT_TALOS_VERSION: &str = "1.10.6";
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.33.3";

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const QUERY_ATTEMPTS: u32 = 3;
const QUERY_RETRY_DELAY: Duration = Duration::from_secs(5);

#[allow(async_fn_in_trait)]
pub trait VersionOracle {
    async fn current_version(&self) -> Result<String>;
}

/// Fixed current version for rehearsal runs.
pub struct FixedVersion(pub String);

impl FixedVersion {
    pub fn or_default(override_version: Option<&str>, default: &str) -> Self {
        Self(override_version.unwrap_or(default).to_string())
    }
}

impl VersionOracle for FixedVersion {
    async fn current_version(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Live Talos version via the command surface.
pub struct TalosVersionOracle<'a, C: CommandSurface> {
    pub surface: &'a C,
}

impl<C: CommandSurface> VersionOracle for TalosVersionOracle<'_, C> {
    async fn current_version(&self) -> Result<String> {
        self.surface.version_short().await
    }
}

/// Live Kubernetes version via the control endpoint's version-reporting path.
///
/// Fetches a short-lived kubeconfig, then issues an authenticated HTTPS
/// request to `<server>/version`, retrying transient failures.
pub struct KubernetesVersionOracle<'a, C: CommandSurface> {
    pub surface: &'a C,
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "gitVersion")]
    git_version: String,
}

impl<C: CommandSurface> VersionOracle for KubernetesVersionOracle<'_, C> {
    async fn current_version(&self) -> Result<String> {
        let raw = self.surface.fetch_kubeconfig(&self.endpoint).await?;
        let creds = kubeconfig::parse(&raw)?;

        let mut builder = reqwest::Client::builder().timeout(QUERY_TIMEOUT);
        if let Some(ca) = &creds.ca_cert {
            let cert =
                reqwest::Certificate::from_pem(ca).context("Invalid cluster CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }

        let mut bearer = None;
        match &creds.auth {
            KubeAuth::ClientCert { cert, key } => {
                let mut pem = cert.clone();
                pem.extend_from_slice(key);
                let identity = reqwest::Identity::from_pem(&pem)
                    .context("Invalid client certificate pair")?;
                builder = builder.identity(identity);
            }
            KubeAuth::BearerToken(token) => bearer = Some(token.clone()),
        }

        let client = builder
            .build()
            .context("Failed to create API server client")?;
        let url = format!("{}/version", creds.server.trim_end_matches('/'));

        let mut last_error = None;
        for attempt in 1..=QUERY_ATTEMPTS {
            match query_version(&client, &url, bearer.as_deref()).await {
                Ok(current) => {
                    debug!(attempt, version = %current, "Resolved Kubernetes version");
                    return Ok(current);
                }
                Err(e) => {
                    if attempt < QUERY_ATTEMPTS {
                        warn!(
                            attempt,
                            max_attempts = QUERY_ATTEMPTS,
                            error = %e,
                            "Kubernetes version query failed, retrying..."
                        );
                        tokio::time::sleep(QUERY_RETRY_DELAY).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("Kubernetes version query failed")))
    }
}

async fn query_version(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
) -> Result<String> {
    let mut request = client.get(url);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.context("API server request failed")?;
    let status = response.status();
    if !status.is_success() {
        bail!("API server returned {status}");
    }

    let info: VersionInfo = response
        .json()
        .await
        .context("API server version response missing gitVersion")?;
    Ok(version::clean(&info.git_version).to_string())
}
