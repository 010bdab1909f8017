//! Cluster command surface: talosctl invocations with transcript capture.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Local;
use tokio::process::Command;
use tracing::info;

use crate::version;

/// Operations talup needs from the cluster control plane CLI.
///
/// Production uses [`Talosctl`]; tests substitute a recording fake so upgrade
/// decisions can be verified without a cluster.
#[allow(async_fn_in_trait)]
pub trait CommandSurface {
    /// Current Talos version as reported by `version --short`.
    async fn version_short(&self) -> Result<String>;

    /// Upgrade a single node to the given installer image.
    async fn upgrade_node(&self, node: &str, installer_image: &str, version: &str) -> Result<()>;

    /// Cluster-wide Kubernetes upgrade against the control endpoint.
    async fn upgrade_k8s(&self, endpoint: &str, version: &str, dry_run: bool) -> Result<()>;

    /// One-shot, non-merging kubeconfig fetch for the control endpoint.
    async fn fetch_kubeconfig(&self, endpoint: &str) -> Result<String>;
}

pub struct Talosctl {
    talosconfig: PathBuf,
    log_dir: PathBuf,
}

impl Talosctl {
    pub fn new(talosconfig: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            talosconfig,
            log_dir,
        }
    }

    fn timestamp() -> String {
        Local::now().format("%Y%m%d-%H%M%S").to_string()
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "--talosconfig".to_string(),
            self.talosconfig.display().to_string(),
        ]
    }

    /// Run talosctl, persisting combined stdout/stderr verbatim to a
    /// transcript file. Transcripts are append-only audit records and are
    /// never read back.
    async fn run_logged(&self, args: &[String], transcript: &str) -> Result<()> {
        let path = self.log_dir.join(transcript);
        info!(
            command = %format!("talosctl {}", args.join(" ")),
            transcript = %path.display(),
            "Running talosctl"
        );

        let output = Command::new("talosctl")
            .args(args)
            .output()
            .await
            .context("Failed to run talosctl")?;

        let mut captured = output.stdout.clone();
        captured.extend_from_slice(&output.stderr);
        tokio::fs::write(&path, &captured)
            .await
            .with_context(|| format!("Failed to write transcript {}", path.display()))?;

        if !output.status.success() {
            bail!("talosctl exited with {}", output.status);
        }
        Ok(())
    }
}

impl CommandSurface for Talosctl {
    async fn version_short(&self) -> Result<String> {
        let mut args = self.base_args();
        args.extend(["version".to_string(), "--short".to_string()]);

        let output = Command::new("talosctl")
            .args(&args)
            .output()
            .await
            .context("Failed to run talosctl version")?;
        if !output.status.success() {
            bail!("talosctl version exited with {}", output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_talos_version(&stdout)
            .ok_or_else(|| anyhow!("Could not parse Talos version from output: {stdout}"))
    }

    async fn upgrade_node(&self, node: &str, installer_image: &str, version: &str) -> Result<()> {
        let transcript = node_transcript(node, version, &Self::timestamp());

        let mut args = self.base_args();
        args.extend([
            "upgrade".to_string(),
            "--nodes".to_string(),
            node.to_string(),
            "--image".to_string(),
            installer_image.to_string(),
            "--preserve".to_string(),
        ]);

        self.run_logged(&args, &transcript).await
    }

    async fn upgrade_k8s(&self, endpoint: &str, version: &str, dry_run: bool) -> Result<()> {
        let transcript = k8s_transcript(version, dry_run, &Self::timestamp());

        let mut args = self.base_args();
        args.extend([
            "upgrade-k8s".to_string(),
            "--to".to_string(),
            version.to_string(),
            "-n".to_string(),
            endpoint.to_string(),
        ]);
        if dry_run {
            args.push("--dry-run".to_string());
        }

        self.run_logged(&args, &transcript).await
    }

    async fn fetch_kubeconfig(&self, endpoint: &str) -> Result<String> {
        // The credential bundle lives only for the duration of this call;
        // the temp directory removes it as soon as we have read it.
        let dir = tempfile::tempdir().context("Failed to create temp dir for kubeconfig")?;
        let path = dir.path().join("kubeconfig");

        let mut args = self.base_args();
        args.extend([
            "kubeconfig".to_string(),
            path.display().to_string(),
            "--nodes".to_string(),
            endpoint.to_string(),
            "--merge=false".to_string(),
            "--force".to_string(),
        ]);

        // The credentials land in the temp file, not on stdout, so the
        // transcript holds only talosctl's progress output.
        let transcript = kubeconfig_transcript(endpoint, &Self::timestamp());
        self.run_logged(&args, &transcript).await?;

        tokio::fs::read_to_string(&path)
            .await
            .context("Failed to read fetched kubeconfig")
    }
}

// Transcript names carry the target, the subject, and a timestamp; IP
// addresses get their dots rewritten so the name stays one dot-free stem.

fn node_transcript(node: &str, version: &str, timestamp: &str) -> String {
    format!(
        "talos-upgrade-node-{}-{}-{}.log",
        node.replace('.', "-"),
        version,
        timestamp
    )
}

fn k8s_transcript(version: &str, dry_run: bool, timestamp: &str) -> String {
    if dry_run {
        format!("k8s-upgrade-{version}-dry-run-{timestamp}.log")
    } else {
        format!("k8s-upgrade-{version}-{timestamp}.log")
    }
}

fn kubeconfig_transcript(endpoint: &str, timestamp: &str) -> String {
    format!(
        "kubeconfig-fetch-{}-{}.log",
        endpoint.replace('.', "-"),
        timestamp
    )
}

/// Extract `X.Y.Z` from the `Client: Talos vX.Y.Z` line of
/// `talosctl version --short` output.
pub fn parse_talos_version(output: &str) -> Option<String> {
    for line in output.lines() {
        let Some(rest) = line.trim().strip_prefix("Client:") else {
            continue;
        };
        let Some(raw) = rest.trim().strip_prefix("Talos ") else {
            continue;
        };
        let candidate = version::clean(raw.trim());
        if version::is_valid(candidate) {
            return Some(candidate.to_string());
        }
    }
    None
}
