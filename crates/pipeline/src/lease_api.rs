//! Client for the coordination API that leases chunks.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use tile_common::{AreaName, Chunk};

use crate::config::LeaseApiConfig;
use crate::error::{PipelineError, Result};

/// Chunk leasing and release.
#[async_trait]
pub trait LeaseClient: Send + Sync {
    /// Lease the next chunk, optionally restricted to one area. `None` when
    /// no work is left.
    async fn acquire_chunk(&self, area: Option<&str>) -> Result<Option<Chunk>>;

    /// Return a processed chunk's lease.
    async fn release_chunk(&self, chunk: &Chunk) -> Result<()>;

    /// Ask the downsampling job to rebuild the coarser zooms over `chunk`.
    async fn request_pyramid(&self, chunk: &Chunk) -> Result<()>;
}

/// Lease record as returned by the coordination API.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkRecord {
    pub uuid: String,
    /// Comma-separated source URIs
    #[serde(default)]
    pub files: String,
    #[serde(deserialize_with = "number_or_string")]
    pub xmin: f64,
    #[serde(deserialize_with = "number_or_string")]
    pub ymin: f64,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub area_name: Option<String>,
}

impl ChunkRecord {
    pub fn into_chunk(self, chunk_size: f64) -> Chunk {
        let files = self
            .files
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect();
        Chunk::from_origin(
            self.uuid,
            self.xmin,
            self.ymin,
            chunk_size,
            AreaName::from_option(self.area_name),
            self.overwrite,
            files,
        )
    }
}

fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parse a lease response. The record sits under `body`, either as an
/// object or as a JSON-encoded string.
pub fn parse_lease_response(response: &Value, chunk_size: f64) -> Result<Chunk> {
    let body = response
        .get("body")
        .ok_or_else(|| PipelineError::LeaseApi("lease response has no body".to_string()))?;

    let record: ChunkRecord = match body {
        Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    }
    .map_err(|e| PipelineError::LeaseApi(format!("invalid lease record: {}", e)))?;

    Ok(record.into_chunk(chunk_size))
}

/// Release endpoint and payload for `chunk`.
pub fn release_request(chunk: &Chunk) -> (&'static str, Value) {
    match &chunk.area_name {
        AreaName::Legacy => ("release_area", json!({ "uuid": chunk.id })),
        AreaName::Named(name) => (
            "release_area_v2",
            json!({ "uuid": chunk.id, "area_name": name }),
        ),
    }
}

/// Payload asking for a pyramid rebuild over `chunk`.
pub fn pyramid_request(chunk: &Chunk) -> Value {
    json!({
        "xmin": chunk.xmin(),
        "ymin": chunk.ymin(),
        "area_name": chunk.area_name.as_str(),
        "uuid": chunk.id,
    })
}

/// [`LeaseClient`] for the HTTP coordination API.
pub struct HttpLeaseClient {
    client: Client,
    base_url: String,
    pyramid_url: Option<String>,
    chunk_size: f64,
}

impl HttpLeaseClient {
    pub fn new(config: &LeaseApiConfig, pyramid_url: Option<String>, chunk_size: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            pyramid_url,
            chunk_size,
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    async fn post(&self, url: &str, payload: &Value) -> Result<reqwest::Response> {
        self.client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| PipelineError::LeaseApi(format!("POST {} failed: {}", url, e)))
    }
}

#[async_trait]
impl LeaseClient for HttpLeaseClient {
    #[instrument(skip(self))]
    async fn acquire_chunk(&self, area: Option<&str>) -> Result<Option<Chunk>> {
        let payload = match area {
            Some(name) => json!({ "area_name": name }),
            None => json!({}),
        };
        let response = self.post(&self.endpoint("new_area_specific"), &payload).await?;

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), "No chunk available");
            return Ok(None);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::LeaseApi(format!("invalid lease response: {}", e)))?;
        let chunk = parse_lease_response(&body, self.chunk_size)?;

        info!(
            chunk = %chunk.id,
            area = %chunk.area_name,
            xmin = chunk.xmin(),
            ymin = chunk.ymin(),
            files = chunk.source_files.len(),
            "Chunk leased"
        );
        Ok(Some(chunk))
    }

    #[instrument(skip(self, chunk), fields(chunk = %chunk.id))]
    async fn release_chunk(&self, chunk: &Chunk) -> Result<()> {
        let (endpoint, payload) = release_request(chunk);
        let response = self.post(&self.endpoint(endpoint), &payload).await?;

        if !response.status().is_success() {
            return Err(PipelineError::LeaseApi(format!(
                "{} returned {}",
                endpoint,
                response.status()
            )));
        }
        info!(endpoint, "Chunk released");
        Ok(())
    }

    #[instrument(skip(self, chunk), fields(chunk = %chunk.id))]
    async fn request_pyramid(&self, chunk: &Chunk) -> Result<()> {
        let Some(url) = &self.pyramid_url else {
            debug!("No pyramid endpoint configured");
            return Ok(());
        };

        let response = self.post(url, &pyramid_request(chunk)).await?;
        if !response.status().is_success() {
            return Err(PipelineError::LeaseApi(format!(
                "pyramid request returned {}",
                response.status()
            )));
        }
        debug!("Pyramid rebuild requested");
        Ok(())
    }
}
