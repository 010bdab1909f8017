//! Version source client: GitHub contents API access to the tracking
//! repository.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tracing::debug;

/// Repository path of the file declaring desired cluster versions.
pub const TRACK_VERSIONS_PATH: &str = "infrastructure/cluster/track-versions.yaml";
/// Repository path of the bare-metal extension manifest.
pub const BARE_METAL_PATH: &str = "infrastructure/cluster/bare-metal.yaml";

const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Desired versions declared in the tracking file. Fetched once per
/// orchestration run.
#[derive(Debug, Clone, Deserialize)]
pub struct DesiredVersions {
    #[serde(rename = "talosVersion")]
    pub talos_version: String,
    #[serde(rename = "kubernetesVersion")]
    pub kubernetes_version: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    encoding: String,
}

pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(token: String, owner: String, repo: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
            owner,
            repo,
        })
    }

    pub async fn fetch_versions(&self) -> Result<DesiredVersions> {
        let raw = self
            .fetch_file(TRACK_VERSIONS_PATH)
            .await
            .context("Failed to fetch versions file")?;
        serde_yaml::from_slice(&raw).context("Failed to parse versions YAML")
    }

    /// Raw bare-metal extension manifest, passed verbatim to the Image
    /// Factory.
    pub async fn fetch_bare_metal_config(&self) -> Result<Vec<u8>> {
        self.fetch_file(BARE_METAL_PATH)
            .await
            .context("Failed to fetch bare-metal manifest")
    }

    async fn fetch_file(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.base_url, self.owner, self.repo, path
        );
        debug!(url = %url, "Fetching file via contents API");

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "talup");
        if !self.token.is_empty() {
            request = request.header("Authorization", format!("token {}", self.token));
        }

        let response = request.send().await.context("GitHub API request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub API error {status}: {body}");
        }

        let contents: ContentsResponse = response
            .json()
            .await
            .context("Failed to decode contents API response")?;
        decode_contents(&contents)
    }
}

fn decode_contents(contents: &ContentsResponse) -> Result<Vec<u8>> {
    if contents.encoding != "base64" {
        bail!("Unexpected content encoding: {}", contents.encoding);
    }

    // The contents API wraps base64 payloads with embedded newlines.
    let compact: String = contents
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    BASE64
        .decode(compact.as_bytes())
        .context("Failed to decode base64 content")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_contents_with_wrapped_base64() {
        let contents = ContentsResponse {
            content: "dGFsb3NWZXJzaW9uOiB2MS4xMC42\na3ViZXJuZXRlc1ZlcnNpb246IHYxLjMzLjM=\n"
                .to_string(),
            encoding: "base64".to_string(),
        };
        let decoded = decode_contents(&contents).unwrap();
        let text = String::from_utf8(decoded).unwrap();
        assert!(text.contains("talosVersion: v1.10.6"));
        assert!(text.contains("kubernetesVersion: v1.33.3"));
    }

    #[test]
    fn test_decode_contents_rejects_unknown_encoding() {
        let contents = ContentsResponse {
            content: "whatever".to_string(),
            encoding: "utf-8".to_string(),
        };
        assert!(decode_contents(&contents).is_err());
    }

    #[test]
    fn test_decode_contents_rejects_bad_base64() {
        let contents = ContentsResponse {
            content: "!!not base64!!".to_string(),
            encoding: "base64".to_string(),
        };
        assert!(decode_contents(&contents).is_err());
    }

    #[test]
    fn test_desired_versions_yaml_fields() {
        let yaml = "talosVersion: v1.10.6\nkubernetesVersion: v1.33.4\n";
        let versions: DesiredVersions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(versions.talos_version, "v1.10.6");
        assert_eq!(versions.kubernetes_version, "v1.33.4");
    }
}
