//! Kubernetes layer upgrade controller.
//!
//! Runs only after the OS layer is current. Rejects downgrades outright,
//! before any command is issued, and always validates with a talosctl
//! dry-run before mutating the cluster.

use tracing::{info, warn};

use crate::error::TalupError;
use crate::talosctl::CommandSurface;
use crate::upgrades::oracle::VersionOracle;
use crate::version;

pub struct KubernetesUpgrader<'a, C, O> {
    surface: &'a C,
    oracle: &'a O,
}

impl<'a, C, O> KubernetesUpgrader<'a, C, O>
where
    C: CommandSurface,
    O: VersionOracle,
{
    pub fn new(surface: &'a C, oracle: &'a O) -> Self {
        Self { surface, oracle }
    }

    /// Upgrade the cluster to `target` through the control endpoint, or log
    /// the decision without side effects when `execute` is false.
    pub async fn upgrade(
        &self,
        target: &str,
        endpoint: &str,
        execute: bool,
    ) -> Result<(), TalupError> {
        info!(
            target_version = %target,
            endpoint = %endpoint,
            execute,
            "Kubernetes upgrade check started"
        );

        if !version::is_valid(target) {
            return Err(TalupError::InvalidVersion(target.to_string()));
        }
        let clean = version::clean(target);

        let current = match self.oracle.current_version().await {
            Ok(v) => Some(v),
            Err(e) if execute => {
                return Err(TalupError::VersionQueryFailed {
                    component: "Kubernetes".to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Could not determine current Kubernetes version in rehearsal mode"
                );
                None
            }
        };

        if let Some(current) = &current {
            if current.as_str() == clean {
                info!(version = %clean, "Kubernetes already at target version, nothing to do");
                return Ok(());
            }
            // Checked before any command, in rehearsal and live runs alike.
            if version::is_downgrade(current, clean)? {
                return Err(TalupError::DowngradeRejected {
                    current: current.clone(),
                    target: clean.to_string(),
                });
            }
            info!(current = %current, target_version = %clean, "Kubernetes upgrade needed");
        }

        if !execute {
            info!(
                current = current.as_deref().unwrap_or("unknown"),
                target_version = %clean,
                "Rehearsal mode: would upgrade Kubernetes, no commands issued"
            );
            return Ok(());
        }

        info!(target_version = %clean, "Running Kubernetes upgrade dry-run");
        self.surface
            .upgrade_k8s(endpoint, clean, true)
            .await
            .map_err(|e| TalupError::DryRunFailed(e.to_string()))?;

        info!(target_version = %clean, "Dry-run succeeded, running Kubernetes upgrade");
        self.surface
            .upgrade_k8s(endpoint, clean, false)
            .await
            .map_err(|e| TalupError::UpgradeCommandFailed(e.to_string()))?;

        info!(version = %clean, "Kubernetes upgrade completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::talosctl::testing::{Call, RecordingSurface};
    use crate::upgrades::oracle::FixedVersion;

    const ENDPOINT: &str = "10.0.0.10";

    fn oracle(version: &str) -> FixedVersion {
        FixedVersion(version.to_string())
    }

    #[tokio::test]
    async fn test_invalid_target_rejected_before_any_call() {
        let surface = RecordingSurface::default();
        let current = oracle("1.33.2");
        let upgrader = KubernetesUpgrader::new(&surface, &current);

        for target in ["v1.12", "1", "", "1.33.x"] {
            let err = upgrader.upgrade(target, ENDPOINT, true).await.unwrap_err();
            assert!(matches!(err, TalupError::InvalidVersion(_)), "{target}");
        }
        assert!(surface.calls().is_empty());
    }

    #[tokio::test]
    async fn test_already_current_is_noop() {
        let surface = RecordingSurface::default();
        let current = oracle("1.33.2");
        let upgrader = KubernetesUpgrader::new(&surface, &current);

        upgrader.upgrade("v1.33.2", ENDPOINT, true).await.unwrap();
        assert!(surface.calls().is_empty());
    }

    #[tokio::test]
    async fn test_downgrade_rejected_in_both_modes() {
        for execute in [false, true] {
            let surface = RecordingSurface::default();
            let current = oracle("1.34.0");
            let upgrader = KubernetesUpgrader::new(&surface, &current);

            let err = upgrader
                .upgrade("1.33.2", ENDPOINT, execute)
                .await
                .unwrap_err();
            match err {
                TalupError::DowngradeRejected { current, target } => {
                    assert_eq!(current, "1.34.0");
                    assert_eq!(target, "1.33.2");
                }
                other => panic!("unexpected error: {other}"),
            }
            assert!(surface.calls().is_empty());
        }
    }

    #[tokio::test]
    async fn test_multi_digit_minor_is_not_a_downgrade() {
        // "1.10.0" orders above "1.9.0" numerically.
        let surface = RecordingSurface::default();
        let current = oracle("1.9.0");
        let upgrader = KubernetesUpgrader::new(&surface, &current);

        upgrader.upgrade("1.10.0", ENDPOINT, false).await.unwrap();
        assert!(surface.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rehearsal_upgrade_has_no_side_effects() {
        let surface = RecordingSurface::default();
        let current = oracle("1.10.5");
        let upgrader = KubernetesUpgrader::new(&surface, &current);

        upgrader.upgrade("1.12.0", ENDPOINT, false).await.unwrap();
        assert!(surface.calls().is_empty());
    }

    #[tokio::test]
    async fn test_live_upgrade_dry_runs_first() {
        let surface = RecordingSurface::default();
        let current = oracle("1.33.2");
        let upgrader = KubernetesUpgrader::new(&surface, &current);

        upgrader.upgrade("v1.33.4", ENDPOINT, true).await.unwrap();
        assert_eq!(
            surface.calls(),
            vec![
                Call::UpgradeK8s {
                    version: "1.33.4".to_string(),
                    dry_run: true
                },
                Call::UpgradeK8s {
                    version: "1.33.4".to_string(),
                    dry_run: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_failure_blocks_real_upgrade() {
        let surface = RecordingSurface {
            fail_dry_run: true,
            ..Default::default()
        };
        let current = oracle("1.33.2");
        let upgrader = KubernetesUpgrader::new(&surface, &current);

        let err = upgrader.upgrade("1.33.4", ENDPOINT, true).await.unwrap_err();
        assert!(matches!(err, TalupError::DryRunFailed(_)));
        assert_eq!(
            surface.calls(),
            vec![Call::UpgradeK8s {
                version: "1.33.4".to_string(),
                dry_run: true
            }]
        );
    }
}
