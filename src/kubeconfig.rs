//! Kubeconfig credential bundle parsing.
//!
//! The Kubernetes version oracle fetches a one-shot kubeconfig via talosctl
//! and resolves its active context into a server URL, a trust root, and
//! either a client certificate pair or a bearer token.

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

/// Credentials resolved from a kubeconfig's active context.
#[derive(Debug)]
pub struct KubeCredentials {
    pub server: String,
    /// PEM-encoded cluster CA, when declared.
    pub ca_cert: Option<Vec<u8>>,
    pub auth: KubeAuth,
}

#[derive(Debug)]
pub enum KubeAuth {
    ClientCert { cert: Vec<u8>, key: Vec<u8> },
    BearerToken(String),
}

#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
struct Cluster {
    server: String,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key-data", default)]
    client_key_data: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextRef,
}

#[derive(Debug, Deserialize)]
struct ContextRef {
    cluster: String,
    user: String,
}

/// Resolve the active context of a kubeconfig into usable credentials.
pub fn parse(data: &str) -> Result<KubeCredentials> {
    let config: Kubeconfig = serde_yaml::from_str(data).context("Failed to parse kubeconfig")?;

    let context = match &config.current_context {
        Some(name) => config
            .contexts
            .iter()
            .find(|c| &c.name == name)
            .with_context(|| format!("Kubeconfig context {name} not found"))?,
        None => config
            .contexts
            .first()
            .context("Kubeconfig has no contexts")?,
    };

    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == context.context.cluster)
        .with_context(|| format!("Kubeconfig cluster {} not found", context.context.cluster))?;
    let user = config
        .users
        .iter()
        .find(|u| u.name == context.context.user)
        .with_context(|| format!("Kubeconfig user {} not found", context.context.user))?;

    let ca_cert = cluster
        .cluster
        .certificate_authority_data
        .as_deref()
        .map(decode_field)
        .transpose()?;

    let auth = if let (Some(cert), Some(key)) = (
        &user.user.client_certificate_data,
        &user.user.client_key_data,
    ) {
        KubeAuth::ClientCert {
            cert: decode_field(cert)?,
            key: decode_field(key)?,
        }
    } else if let Some(token) = &user.user.token {
        KubeAuth::BearerToken(token.clone())
    } else {
        bail!(
            "Kubeconfig user {} has neither client certificate nor token",
            user.name
        );
    };

    Ok(KubeCredentials {
        server: cluster.cluster.server.clone(),
        ca_cert,
        auth,
    })
}

fn decode_field(data: &str) -> Result<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact.as_bytes())
        .context("Failed to decode base64 kubeconfig field")
}
