//! Authenticated diagnostics: probes each collaborator independently and
//! rehearses the full upgrade pipeline without touching the cluster.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::config::Config;
use crate::factory::{FactoryInstallerSource, SchematicClient};
use crate::repo::{DesiredVersions, GitHubClient};
use crate::talosconfig::TalosConfig;
use crate::talosctl::Talosctl;
use crate::upgrades::kubernetes::KubernetesUpgrader;
use crate::upgrades::oracle::{
    DEFAULT_KUBERNETES_VERSION, DEFAULT_TALOS_VERSION, FixedVersion, KubernetesVersionOracle,
    TalosVersionOracle, VersionOracle,
};
use crate::upgrades::talos::TalosUpgrader;

use super::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DiagnosticsParams {
    pub scenario: Option<String>,
    pub current_k8s: Option<String>,
    pub current_talos: Option<String>,
}

pub async fn handle(
    State(state): State<AppState>,
    Query(params): Query<DiagnosticsParams>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers, &state.config.diagnostics_token) {
        warn!("Diagnostics request rejected: missing or invalid bearer token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    info!(
        scenario = params.scenario.as_deref().unwrap_or(""),
        current_k8s = params.current_k8s.as_deref().unwrap_or(""),
        current_talos = params.current_talos.as_deref().unwrap_or(""),
        "Running diagnostics"
    );

    match run_checks(&state.config, &params).await {
        Ok(results) => Ok(Json(results)),
        Err(e) => Ok(Json(json!({ "status": "failed", "error": e.to_string() }))),
    }
}

fn authorized(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|t| t == token)
}

/// Current-version override for the Talos rehearsal, from explicit parameter
/// or scenario default.
fn talos_override(params: &DiagnosticsParams) -> Option<&str> {
    params.current_talos.as_deref().or(
        match params.scenario.as_deref() {
            Some("talos-upgrade" | "both-upgrade") => Some("1.10.5"),
            _ => None,
        },
    )
}

fn k8s_override(params: &DiagnosticsParams) -> Option<&str> {
    params.current_k8s.as_deref().or(
        match params.scenario.as_deref() {
            Some("k8s-upgrade" | "both-upgrade") => Some("1.33.2"),
            _ => None,
        },
    )
}

async fn run_checks(config: &Config, params: &DiagnosticsParams) -> anyhow::Result<Value> {
    let mut results = Map::new();

    let repo = GitHubClient::new(
        config.github_token.clone(),
        config.github_owner.clone(),
        config.github_repo.clone(),
    )?;

    // Version source
    let versions = match repo.fetch_versions().await {
        Ok(versions) => {
            results.insert(
                "github_api".to_string(),
                json!({
                    "status": "success",
                    "talos_version": versions.talos_version,
                    "kubernetes_version": versions.kubernetes_version,
                }),
            );
            Some(versions)
        }
        Err(e) => {
            results.insert(
                "github_api".to_string(),
                json!({ "status": "failed", "error": e.to_string() }),
            );
            None
        }
    };

    // Cluster inventory
    let inventory = match TalosConfig::load(&config.talos_config_path).await {
        Ok(inventory) => {
            let nodes = inventory.nodes().unwrap_or_default();
            results.insert(
                "talos_config".to_string(),
                json!({
                    "status": "success",
                    "control_endpoint": inventory.control_endpoint().ok(),
                    "node_count": nodes.len(),
                    "nodes": nodes,
                }),
            );
            Some(inventory)
        }
        Err(e) => {
            results.insert(
                "talos_config".to_string(),
                json!({ "status": "failed", "error": e.to_string() }),
            );
            None
        }
    };

    // Bare-metal extension manifest
    let manifest = match repo.fetch_bare_metal_config().await {
        Ok(manifest) => {
            results.insert(
                "bare_metal_config".to_string(),
                json!({ "status": "success", "size": manifest.len() }),
            );
            Some(manifest)
        }
        Err(e) => {
            results.insert(
                "bare_metal_config".to_string(),
                json!({ "status": "failed", "error": e.to_string() }),
            );
            None
        }
    };

    // Image Factory
    match &manifest {
        Some(manifest) => {
            let factory = SchematicClient::new()?;
            match factory.create_schematic(manifest).await {
                Ok(schematic_id) => results.insert(
                    "image_factory".to_string(),
                    json!({ "status": "success", "schematic_id": schematic_id }),
                ),
                Err(e) => results.insert(
                    "image_factory".to_string(),
                    json!({ "status": "failed", "error": e.to_string() }),
                ),
            };
        }
        None => {
            results.insert(
                "image_factory".to_string(),
                json!({ "status": "skipped", "reason": "bare_metal_config_failed" }),
            );
        }
    }

    let talosctl = Talosctl::new(config.talos_config_path.clone(), config.log_path.clone());

    // Real cluster versions, through the same query paths production uses.
    if let Some(inventory) = &inventory
        && let Ok(endpoint) = inventory.control_endpoint()
    {
        let talos_oracle = TalosVersionOracle { surface: &talosctl };
        let k8s_oracle = KubernetesVersionOracle {
            surface: &talosctl,
            endpoint,
        };
        let real_talos = talos_oracle.current_version().await;
        let real_k8s = k8s_oracle.current_version().await;
        results.insert(
            "cluster_versions".to_string(),
            cluster_versions_check(&real_talos, &real_k8s),
        );
    }

    // Identical controller logic, execution disabled.
    if let (Some(versions), Some(inventory)) = (&versions, &inventory) {
        match rehearse(&repo, &talosctl, versions, inventory, params).await {
            Ok(()) => results.insert(
                "upgrade_test".to_string(),
                json!({ "status": "success", "message": "Full upgrade logic validated" }),
            ),
            Err(e) => results.insert(
                "upgrade_test".to_string(),
                json!({ "status": "failed", "error": e.to_string() }),
            ),
        };

        results.insert(
            "upgrade_decisions".to_string(),
            json!({
                "would_upgrade_talos": versions.talos_version,
                "would_upgrade_kubernetes": versions.kubernetes_version,
                "target_control_endpoint": inventory.control_endpoint().ok(),
                "target_nodes": inventory.nodes().unwrap_or_default(),
            }),
        );
    }

    let ready = all_checks_passed(&results);
    results.insert(
        "summary".to_string(),
        json!({
            "timestamp": chrono::Utc::now().timestamp(),
            "ready": ready,
            "scenario": params.scenario,
            "current_k8s": params.current_k8s,
            "current_talos": params.current_talos,
        }),
    );

    Ok(Value::Object(results))
}

/// Informational probe of the live cluster versions: reports whatever could
/// be resolved without failing the battery, since rehearsal readiness does
/// not depend on reaching the cluster.
fn cluster_versions_check(
    talos: &anyhow::Result<String>,
    k8s: &anyhow::Result<String>,
) -> Value {
    json!({
        "status": "success",
        "real_talos_version": talos.as_ref().ok(),
        "real_kubernetes_version": k8s.as_ref().ok(),
        "talos_error": talos.as_ref().err().map(|e| e.to_string()),
        "kubernetes_error": k8s.as_ref().err().map(|e| e.to_string()),
    })
}

fn all_checks_passed(results: &Map<String, Value>) -> bool {
    results
        .values()
        .all(|check| check.get("status").is_none_or(|s| s == "success"))
}

/// The production decision logic with execution disabled and caller-chosen
/// current versions.
async fn rehearse(
    repo: &GitHubClient,
    talosctl: &Talosctl,
    versions: &DesiredVersions,
    inventory: &TalosConfig,
    params: &DiagnosticsParams,
) -> anyhow::Result<()> {
    let nodes = inventory.nodes()?;
    let endpoint = inventory.control_endpoint()?;

    let factory = SchematicClient::new()?;
    let installer = FactoryInstallerSource {
        repo,
        factory: &factory,
    };

    let talos_oracle = FixedVersion::or_default(talos_override(params), DEFAULT_TALOS_VERSION);
    TalosUpgrader::new(talosctl, &talos_oracle, &installer)
        .upgrade(&versions.talos_version, &nodes, false)
        .await?;

    let k8s_oracle = FixedVersion::or_default(k8s_override(params), DEFAULT_KUBERNETES_VERSION);
    KubernetesUpgrader::new(talosctl, &k8s_oracle)
        .upgrade(&versions.kubernetes_version, &endpoint, false)
        .await?;

    Ok(())
}
