use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

// Environment variable names, shared between config parsing and deployment
// manifests.
pub mod env {
    pub const WEBHOOK_SECRET: &str = "GITHUB_WEBHOOK_SECRET";
    pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
    pub const GITHUB_OWNER: &str = "GITHUB_OWNER";
    pub const GITHUB_REPO: &str = "GITHUB_REPO";
    pub const TALOS_CONFIG_PATH: &str = "TALOS_CONFIG_PATH";
    pub const LOG_PATH: &str = "LOG_PATH";
    pub const PORT: &str = "PORT";
    pub const DIAGNOSTICS_TOKEN: &str = "DIAGNOSTICS_TOKEN";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "talup",
    version,
    about = "Talos cluster upgrade automation webhook service"
)]
pub struct Config {
    /// Shared secret for webhook signature verification
    #[arg(long, env = env::WEBHOOK_SECRET, hide_env_values = true)]
    pub webhook_secret: String,

    /// GitHub API token for the version-tracking repository
    #[arg(long, env = env::GITHUB_TOKEN, hide_env_values = true)]
    pub github_token: String,

    /// Owner of the version-tracking repository
    #[arg(long, env = env::GITHUB_OWNER)]
    pub github_owner: String,

    /// Name of the version-tracking repository
    #[arg(long, env = env::GITHUB_REPO)]
    pub github_repo: String,

    /// Path to the local talosconfig file
    #[arg(long, env = env::TALOS_CONFIG_PATH)]
    pub talos_config_path: PathBuf,

    /// Directory for talosctl transcript files
    #[arg(long, env = env::LOG_PATH)]
    pub log_path: PathBuf,

    /// Listening port
    #[arg(long, env = env::PORT, default_value = "3847")]
    pub port: u16,

    /// Bearer token for the diagnostics endpoint
    #[arg(long, env = env::DIAGNOSTICS_TOKEN, hide_env_values = true)]
    pub diagnostics_token: String,

    /// Log format: json or pretty
    #[arg(long, env = env::LOG_FORMAT, default_value = "json")]
    pub log_format: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = env::LOG_LEVEL, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Cross-field checks clap cannot express. Required values being absent
    /// is already a parse error.
    pub fn validate(&self) -> Result<()> {
        if self.webhook_secret.trim().is_empty() {
            bail!("webhook secret must not be empty");
        }
        if self.diagnostics_token.trim().is_empty() {
            bail!("diagnostics token must not be empty");
        }
        if self.github_owner.trim().is_empty() || self.github_repo.trim().is_empty() {
            bail!("GitHub repository coordinates must not be empty");
        }
        if !self.talos_config_path.is_file() {
            bail!(
                "talosconfig not found at {}",
                self.talos_config_path.display()
            );
        }
        if !self.log_path.is_dir() {
            bail!("log directory not found at {}", self.log_path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(talos_config_path: PathBuf, log_path: PathBuf) -> Config {
        Config {
            webhook_secret: "secret".to_string(),
            github_token: "token".to_string(),
            github_owner: "younsl".to_string(),
            github_repo: "o".to_string(),
            talos_config_path,
            log_path,
            port: 3847,
            diagnostics_token: "diag".to_string(),
            log_format: "json".to_string(),
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_parse_fails_without_required_values() {
        // No env vars, no flags: every required value is absent.
        assert!(Config::try_parse_from(["talup"]).is_err());
    }

    #[test]
    fn test_validate_ok() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_file = dir.path().join("talosconfig");
        std::fs::write(&cfg_file, "contexts: {}").unwrap();

        let config = test_config(cfg_file, dir.path().to_path_buf());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_file = dir.path().join("talosconfig");
        std::fs::write(&cfg_file, "contexts: {}").unwrap();

        let mut config = test_config(cfg_file, dir.path().to_path_buf());
        config.webhook_secret = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_talosconfig() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join("missing"), dir.path().to_path_buf());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_file = dir.path().join("talosconfig");
        std::fs::write(&cfg_file, "contexts: {}").unwrap();

        let config = test_config(cfg_file, dir.path().join("no-such-dir"));
        assert!(config.validate().is_err());
    }
}
