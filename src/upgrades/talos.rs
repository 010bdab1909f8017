//! Talos OS layer upgrade controller.
//!
//! Decides whether the OS layer needs upgrading and, in live runs, builds a
//! fresh installer image and rolls it across the nodes one at a time, in
//! declared order. The first node failure aborts the rest; nodes already
//! upgraded stay upgraded.

use tracing::{info, warn};

use crate::error::TalupError;
use crate::factory::InstallerSource;
use crate::talosctl::CommandSurface;
use crate::upgrades::oracle::VersionOracle;
use crate::version;

pub struct TalosUpgrader<'a, C, O, I> {
    surface: &'a C,
    oracle: &'a O,
    installer: &'a I,
}

impl<'a, C, O, I> TalosUpgrader<'a, C, O, I>
where
    C: CommandSurface,
    O: VersionOracle,
    I: InstallerSource,
{
    pub fn new(surface: &'a C, oracle: &'a O, installer: &'a I) -> Self {
        Self {
            surface,
            oracle,
            installer,
        }
    }

    /// Upgrade all nodes to `target`, or log the decision without side
    /// effects when `execute` is false.
    pub async fn upgrade(
        &self,
        target: &str,
        nodes: &[String],
        execute: bool,
    ) -> Result<(), TalupError> {
        info!(
            target_version = %target,
            node_count = nodes.len(),
            execute,
            "Talos upgrade check started"
        );

        if !version::is_valid(target) {
            return Err(TalupError::InvalidVersion(target.to_string()));
        }
        let clean = version::clean(target);

        let current = match self.oracle.current_version().await {
            Ok(v) => Some(v),
            Err(e) if execute => {
                // Never upgrade a cluster whose current state is unknown.
                return Err(TalupError::VersionQueryFailed {
                    component: "Talos".to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                warn!(error = %e, "Could not determine current Talos version in rehearsal mode");
                None
            }
        };

        if let Some(current) = &current {
            if current.as_str() == clean {
                info!(version = %clean, "Talos already at target version, nothing to do");
                return Ok(());
            }
            info!(current = %current, target_version = %clean, "Talos upgrade needed");
        }

        if !execute {
            info!(
                current = current.as_deref().unwrap_or("unknown"),
                target_version = %clean,
                node_count = nodes.len(),
                "Rehearsal mode: would upgrade Talos, skipping artifact build and execution"
            );
            return Ok(());
        }

        // Built fresh every live run; the extension manifest may have
        // changed since the last one.
        let image = self.installer.installer_image(clean).await?;
        info!(image = %image, "Using installer image");

        for (i, node) in nodes.iter().enumerate() {
            info!(node = %node, position = i + 1, total = nodes.len(), "Upgrading node");
            self.surface
                .upgrade_node(node, &image, clean)
                .await
                .map_err(|e| TalupError::NodeUpgradeFailed {
                    node: node.clone(),
                    reason: e.to_string(),
                })?;
            info!(node = %node, "Node upgraded");
        }

        info!(version = %clean, "Talos upgrade completed on all nodes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::talosctl::testing::{Call, RecordingSurface};
    use crate::upgrades::oracle::FixedVersion;

    #[derive(Default)]
    struct FixedInstaller {
        calls: AtomicUsize,
    }

    impl InstallerSource for FixedInstaller {
        async fn installer_image(&self, version: &str) -> Result<String, TalupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("factory.test/installer:v{version}"))
        }
    }

    struct FailingOracle;

    impl VersionOracle for FailingOracle {
        async fn current_version(&self) -> anyhow::Result<String> {
            anyhow::bail!("query failed")
        }
    }

    fn nodes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_invalid_target_rejected_before_any_call() {
        let surface = RecordingSurface::default();
        let oracle = FixedVersion("1.10.5".to_string());
        let installer = FixedInstaller::default();
        let upgrader = TalosUpgrader::new(&surface, &oracle, &installer);

        for target in ["v1.12", "1.12", "", "1.x.0"] {
            let err = upgrader
                .upgrade(target, &nodes(&["a"]), true)
                .await
                .unwrap_err();
            assert!(matches!(err, TalupError::InvalidVersion(_)), "{target}");
        }
        assert!(surface.calls().is_empty());
        assert_eq!(installer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_current_is_noop() {
        let surface = RecordingSurface::default();
        let oracle = FixedVersion("1.12.0".to_string());
        let installer = FixedInstaller::default();
        let upgrader = TalosUpgrader::new(&surface, &oracle, &installer);

        upgrader
            .upgrade("v1.12.0", &nodes(&["a", "b"]), false)
            .await
            .unwrap();
        assert_eq!(surface.mutating_calls(), 0);
        assert_eq!(installer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rehearsal_upgrade_has_no_side_effects() {
        let surface = RecordingSurface::default();
        let oracle = FixedVersion("1.10.5".to_string());
        let installer = FixedInstaller::default();
        let upgrader = TalosUpgrader::new(&surface, &oracle, &installer);

        upgrader
            .upgrade("1.12.0", &nodes(&["a", "b"]), false)
            .await
            .unwrap();
        assert!(surface.calls().is_empty());
        assert_eq!(installer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_live_upgrade_runs_nodes_in_declared_order() {
        let surface = RecordingSurface::default();
        let oracle = FixedVersion("1.10.5".to_string());
        let installer = FixedInstaller::default();
        let upgrader = TalosUpgrader::new(&surface, &oracle, &installer);

        upgrader
            .upgrade("v1.12.0", &nodes(&["c", "a", "b"]), true)
            .await
            .unwrap();

        let upgraded: Vec<String> = surface
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UpgradeNode { node, image } => {
                    assert_eq!(image, "factory.test/installer:v1.12.0");
                    Some(node)
                }
                _ => None,
            })
            .collect();
        assert_eq!(upgraded, vec!["c", "a", "b"]);
        assert_eq!(installer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_node_failure_aborts_remaining_sequence() {
        let surface = RecordingSurface {
            fail_node: Some("b".to_string()),
            ..Default::default()
        };
        let oracle = FixedVersion("1.10.5".to_string());
        let installer = FixedInstaller::default();
        let upgrader = TalosUpgrader::new(&surface, &oracle, &installer);

        let err = upgrader
            .upgrade("1.12.0", &nodes(&["a", "b", "c"]), true)
            .await
            .unwrap_err();
        match err {
            TalupError::NodeUpgradeFailed { node, .. } => assert_eq!(node, "b"),
            other => panic!("unexpected error: {other}"),
        }

        let upgraded: Vec<String> = surface
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UpgradeNode { node, .. } => Some(node),
                _ => None,
            })
            .collect();
        // Node c is never attempted; a stays upgraded.
        assert_eq!(upgraded, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_live_query_failure_is_fatal() {
        let surface = RecordingSurface::default();
        let installer = FixedInstaller::default();
        let upgrader = TalosUpgrader::new(&surface, &FailingOracle, &installer);

        let err = upgrader
            .upgrade("1.12.0", &nodes(&["a"]), true)
            .await
            .unwrap_err();
        assert!(matches!(err, TalupError::VersionQueryFailed { .. }));
        assert_eq!(surface.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_rehearsal_query_failure_is_tolerated() {
        let surface = RecordingSurface::default();
        let installer = FixedInstaller::default();
        let upgrader = TalosUpgrader::new(&surface, &FailingOracle, &installer);

        upgrader
            .upgrade("1.12.0", &nodes(&["a"]), false)
            .await
            .unwrap();
        assert!(surface.calls().is_empty());
    }
}
