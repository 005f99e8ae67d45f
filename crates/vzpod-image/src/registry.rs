//! OCI registry v2 client for artifact manifests and blobs.

use std::net::IpAddr;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::{ImageError, Result};
use vzpod_oci::Descriptor;

/// Accept header for manifest requests.
const ACCEPT_MANIFEST: &str = concat!(
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.oci.artifact.manifest.v1+json, ",
    "application/vnd.docker.distribution.manifest.v2+json"
);

/// Request timeout for registry calls.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Connect timeout for registry calls.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// A parsed image reference (`host[:port]/repository[:tag]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Registry host, possibly with port.
    pub registry: String,
    /// Repository path.
    pub repository: String,
    /// Tag or digest reference.
    pub reference: String,
}

impl ImageRef {
    /// Parses an image reference string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` when no registry host can be split off.
    pub fn parse(s: &str) -> Result<Self> {
        let (registry, rest) = match s.split_once('/') {
            Some((host, rest))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                (host, rest)
            }
            _ => return Err(ImageError::InvalidReference(s.to_string())),
        };
        if rest.is_empty() {
            return Err(ImageError::InvalidReference(s.to_string()));
        }

        let (repository, reference) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, tag),
            _ => match rest.split_once('@') {
                Some((repo, digest)) => (repo, digest),
                None => (rest, "latest"),
            },
        };

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            reference: reference.to_string(),
        })
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.reference)
    }
}

/// Returns true if the registry host is localhost or a loopback/private
/// IP; such registries are spoken to over plain HTTP.
#[must_use]
pub(crate) fn is_localhost_or_local_ip(host: &str) -> bool {
    let host = host.split(':').next().unwrap_or(host);
    if host == "localhost" {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_private(),
        Ok(IpAddr::V6(ip)) => ip.is_loopback(),
        Err(_) => false,
    }
}

/// An artifact manifest: empty config plus titled layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactManifest {
    /// Schema version, 2.
    pub schema_version: u32,
    /// Manifest media type.
    #[serde(default)]
    pub media_type: String,
    /// Config descriptor (empty JSON for artifacts).
    pub config: Descriptor,
    /// Layer descriptors carrying the title annotations.
    pub layers: Vec<Descriptor>,
}

/// HTTP client for one registry.
pub struct RegistryClient {
    client: Client,
    base_url: String,
}

impl RegistryClient {
    /// Creates a client for the reference's registry.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(registry: &str) -> Result<Self> {
        let scheme = if is_localhost_or_local_ip(registry) {
            "http"
        } else {
            "https"
        };

        let client = Client::builder()
            .user_agent("vzpod/0.1")
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{scheme}://{registry}"),
        })
    }

    /// Fetches a manifest, returning the raw bytes (for digesting) and the
    /// media type the registry declared.
    ///
    /// # Errors
    ///
    /// Returns a status error for non-2xx responses.
    pub async fn get_manifest(&self, repository: &str, reference: &str) -> Result<(Vec<u8>, String)> {
        let url = format!("{}/v2/{repository}/manifests/{reference}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, ACCEPT_MANIFEST)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ImageError::RegistryStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/vnd.oci.image.manifest.v1+json")
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok((bytes, media_type))
    }

    /// Opens a streaming reader over a blob.
    ///
    /// # Errors
    ///
    /// Returns a status error for non-2xx responses.
    pub async fn get_blob(
        &self,
        repository: &str,
        digest: &str,
    ) -> Result<impl AsyncRead + Send + Unpin> {
        let url = format!("{}/v2/{repository}/blobs/{digest}", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ImageError::RegistryStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        let stream = response
            .bytes_stream()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
        Ok(tokio_util::io::StreamReader::new(stream))
    }
}
