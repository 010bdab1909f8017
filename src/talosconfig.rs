//! Cluster inventory: endpoint and node list from the local talosconfig.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TalosConfig {
    #[serde(default)]
    contexts: BTreeMap<String, TalosContext>,
}

#[derive(Debug, Deserialize)]
struct TalosContext {
    #[serde(default)]
    endpoints: Vec<String>,
    #[serde(default)]
    nodes: Vec<String>,
}

impl TalosConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read talosconfig at {}", path.display()))?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        serde_yaml::from_str(data).context("Failed to parse talosconfig")
    }

    /// First declared endpoint, used as the control endpoint for cluster-wide
    /// operations.
    pub fn control_endpoint(&self) -> Result<String> {
        for context in self.contexts.values() {
            if let Some(endpoint) = context.endpoints.first() {
                return Ok(endpoint.clone());
            }
        }
        bail!("No endpoints found in talosconfig");
    }

    /// All member nodes in declared order. Node upgrades follow this order
    /// exactly.
    pub fn nodes(&self) -> Result<Vec<String>> {
        for context in self.contexts.values() {
            if !context.nodes.is_empty() {
                return Ok(context.nodes.clone());
            }
        }
        bail!("No nodes found in talosconfig");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
context: talos
contexts:
  talos:
    endpoints:
      - 10.0.0.10
    nodes:
      - 10.0.0.10
      - 10.0.0.11
      - 10.0.0.12
    ca: unused
";

    #[test]
    fn test_parse_endpoint_and_nodes() {
        let config = TalosConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.control_endpoint().unwrap(), "10.0.0.10");
        assert_eq!(
            config.nodes().unwrap(),
            vec!["10.0.0.10", "10.0.0.11", "10.0.0.12"]
        );
    }

    #[test]
    fn test_node_order_preserved() {
        let yaml = r"
contexts:
  talos:
    endpoints: [a]
    nodes: [c, a, b]
";
        let config = TalosConfig::parse(yaml).unwrap();
        assert_eq!(config.nodes().unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_missing_endpoints_is_error() {
        let config = TalosConfig::parse("contexts:\n  talos:\n    nodes: [a]\n").unwrap();
        assert!(config.control_endpoint().is_err());
        assert!(config.nodes().is_ok());
    }

    #[test]
    fn test_missing_nodes_is_error() {
        let config = TalosConfig::parse("contexts:\n  talos:\n    endpoints: [a]\n").unwrap();
        assert!(config.nodes().is_err());
    }

    #[test]
    fn test_empty_config_is_error() {
        let config = TalosConfig::parse("contexts: {}").unwrap();
        assert!(config.control_endpoint().is_err());
        assert!(config.nodes().is_err());
    }
}
