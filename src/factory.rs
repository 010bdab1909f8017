//! Image artifact builder: Talos Image Factory schematics and installer
//! image references.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::info;

use crate::error::TalupError;
use crate::repo::GitHubClient;

const DEFAULT_BASE_URL: &str = "https://factory.talos.dev";

#[derive(Debug, Deserialize)]
struct SchematicResponse {
    id: String,
}

pub struct SchematicClient {
    client: reqwest::Client,
    base_url: String,
}

impl SchematicClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Submit the bare-metal extension manifest, returning the opaque
    /// schematic id.
    pub async fn create_schematic(&self, manifest: &[u8]) -> Result<String, TalupError> {
        let url = format!("{}/schematics", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/yaml")
            .body(manifest.to_vec())
            .send()
            .await
            .map_err(|e| TalupError::ArtifactBuildFailed(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(TalupError::ArtifactBuildFailed(format!(
                "Image Factory API error {status}: {body}"
            )));
        }

        let schematic: SchematicResponse = response.json().await.map_err(|e| {
            TalupError::ArtifactBuildFailed(format!("Failed to decode schematic response: {e}"))
        })?;

        Ok(schematic.id)
    }
}

/// Bootable installer image reference for a schematic and a clean target
/// version.
pub fn installer_image(schematic_id: &str, version: &str) -> String {
    format!("factory.talos.dev/metal-installer-secureboot/{schematic_id}:v{version}")
}

/// Produces a bootable installer image reference for a clean target version.
///
/// Production builds one fresh per live upgrade run, since the extension
/// manifest may have changed; tests substitute a fixed reference.
#[allow(async_fn_in_trait)]
pub trait InstallerSource {
    async fn installer_image(&self, version: &str) -> Result<String, TalupError>;
}

pub struct FactoryInstallerSource<'a> {
    pub repo: &'a GitHubClient,
    pub factory: &'a SchematicClient,
}

impl InstallerSource for FactoryInstallerSource<'_> {
    async fn installer_image(&self, version: &str) -> Result<String, TalupError> {
        let manifest = self
            .repo
            .fetch_bare_metal_config()
            .await
            .map_err(|e| TalupError::ArtifactBuildFailed(e.to_string()))?;

        let schematic_id = self.factory.create_schematic(&manifest).await?;
        info!(schematic_id = %schematic_id, "Created Image Factory schematic");

        Ok(installer_image(&schematic_id, version))
    }
}
