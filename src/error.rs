//! Custom error types for talup.

use thiserror::Error;

/// Errors that can occur while deciding on or driving cluster upgrades.
#[derive(Error, Debug)]
pub enum TalupError {
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Refusing to downgrade Kubernetes from {current} to {target}")]
    DowngradeRejected { current: String, target: String },

    #[error("Cannot determine current {component} version: {reason}")]
    VersionQueryFailed { component: String, reason: String },

    #[error("Image Factory schematic build failed: {0}")]
    ArtifactBuildFailed(String),

    #[error("Upgrade failed on node {node}: {reason}")]
    NodeUpgradeFailed { node: String, reason: String },

    #[error("Kubernetes upgrade dry-run failed: {0}")]
    DryRunFailed(String),

    #[error("Kubernetes upgrade failed: {0}")]
    UpgradeCommandFailed(String),

    #[error("An upgrade dispatch is already in progress")]
    AlreadyInProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_version() {
        let err = TalupError::InvalidVersion("1.2".to_string());
        assert_eq!(err.to_string(), "Invalid version format: 1.2");
    }

    #[test]
    fn test_error_display_downgrade() {
        let err = TalupError::DowngradeRejected {
            current: "1.34.0".to_string(),
            target: "1.33.2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Refusing to downgrade Kubernetes from 1.34.0 to 1.33.2"
        );
    }

    #[test]
    fn test_error_display_version_query_failed() {
        let err = TalupError::VersionQueryFailed {
            component: "Talos".to_string(),
            reason: "exit status 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot determine current Talos version: exit status 1"
        );
    }

    #[test]
    fn test_error_display_node_upgrade_failed() {
        let err = TalupError::NodeUpgradeFailed {
            node: "10.0.0.12".to_string(),
            reason: "talosctl exited with exit status 1".to_string(),
        };
        assert!(err.to_string().contains("10.0.0.12"));
    }

    #[test]
    fn test_error_display_already_in_progress() {
        assert_eq!(
            TalupError::AlreadyInProgress.to_string(),
            "An upgrade dispatch is already in progress"
        );
    }
}
