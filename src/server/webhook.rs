//! Webhook handling: signature verification, relevance filtering, and
//! upgrade dispatch.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::TalupError;
use crate::factory::{FactoryInstallerSource, SchematicClient};
use crate::repo::{GitHubClient, TRACK_VERSIONS_PATH};
use crate::talosconfig::TalosConfig;
use crate::talosctl::Talosctl;
use crate::upgrades::kubernetes::KubernetesUpgrader;
use crate::upgrades::oracle::{KubernetesVersionOracle, TalosVersionOracle};
use crate::upgrades::talos::TalosUpgrader;

use super::AppState;

const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const MAIN_REF: &str = "refs/heads/main";

#[derive(Debug, Deserialize)]
pub struct PushEvent {
    #[serde(default)]
    pub r#ref: String,
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub modified: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub clone_url: String,
}

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(&body, signature, state.config.webhook_secret.as_bytes()) {
        warn!("Invalid webhook signature");
        return (StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let event: PushEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Malformed webhook payload");
            return (StatusCode::BAD_REQUEST, "Bad request");
        }
    };

    if event.r#ref != MAIN_REF {
        info!(r#ref = %event.r#ref, "Ignoring push to non-main ref");
        return (StatusCode::OK, "Ignored");
    }

    if !touches_tracked_file(&event) {
        info!(
            file = TRACK_VERSIONS_PATH,
            "Tracked versions file not modified, ignoring push"
        );
        return (StatusCode::OK, "Ignored");
    }

    if let Some(repository) = &event.repository {
        info!(clone_url = %repository.clone_url, "Tracked versions file modified, dispatching upgrade");
    }

    let Ok(_guard) = state.upgrade_lock.try_lock() else {
        let e = TalupError::AlreadyInProgress;
        warn!(error = %e, "Rejecting concurrent dispatch");
        return (StatusCode::CONFLICT, "Upgrade already in progress");
    };

    match dispatch(&state.config).await {
        Ok(()) => (StatusCode::OK, "Upgrade processed successfully"),
        Err(e) => {
            error!(error = %e, "Upgrade dispatch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Upgrade failed")
        }
    }
}

/// Constant-time verification of `X-Hub-Signature-256: sha256=<hex>` over
/// the raw request body.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &[u8]) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

fn touches_tracked_file(event: &PushEvent) -> bool {
    event
        .commits
        .iter()
        .any(|c| c.modified.iter().any(|f| f == TRACK_VERSIONS_PATH))
}

/// Live dispatch: OS layer to completion first, then the Kubernetes layer.
async fn dispatch(config: &Config) -> anyhow::Result<()> {
    let repo = GitHubClient::new(
        config.github_token.clone(),
        config.github_owner.clone(),
        config.github_repo.clone(),
    )?;
    let versions = repo.fetch_versions().await?;
    info!(
        talos = %versions.talos_version,
        kubernetes = %versions.kubernetes_version,
        "Desired versions fetched"
    );

    let inventory = TalosConfig::load(&config.talos_config_path).await?;
    let nodes = inventory.nodes()?;
    let endpoint = inventory.control_endpoint()?;
    info!(endpoint = %endpoint, node_count = nodes.len(), "Cluster inventory loaded");

    let talosctl = Talosctl::new(config.talos_config_path.clone(), config.log_path.clone());
    let factory = SchematicClient::new()?;
    let installer = FactoryInstallerSource {
        repo: &repo,
        factory: &factory,
    };

    let talos_oracle = TalosVersionOracle { surface: &talosctl };
    TalosUpgrader::new(&talosctl, &talos_oracle, &installer)
        .upgrade(&versions.talos_version, &nodes, true)
        .await?;
    info!("Talos layer up to date");

    let k8s_oracle = KubernetesVersionOracle {
        surface: &talosctl,
        endpoint: endpoint.clone(),
    };
    KubernetesUpgrader::new(&talosctl, &k8s_oracle)
        .upgrade(&versions.kubernetes_version, &endpoint, true)
        .await?;
    info!("Kubernetes layer up to date");

    Ok(())
}
