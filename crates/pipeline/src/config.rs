//! Worker configuration.
//!
//! Every section carries serde defaults matching the deployed pipeline, so
//! a configuration file only needs to name what differs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use storage::ObjectStorageConfig;
use tile_common::TileScheme;

use crate::error::{PipelineError, Result};

/// Top-level configuration for a tile worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub lease_api: LeaseApiConfig,
    /// Tile bucket
    pub storage: ObjectStorageConfig,
    pub sources: SourcesConfig,
    pub scheme: TileScheme,
    pub render: RenderConfig,
    pub pipeline: PipelineSettings,
}

/// Coordination API that hands out chunk leases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for LeaseApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Source point-cloud downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Areas whose spatial index sidecars are rebuilt locally and so are not
    /// downloaded
    pub reindex_areas: Vec<String>,
    /// Suffix of spatial index sidecar files
    pub index_suffix: String,
    pub request_timeout_secs: u64,
    /// Attempts after the first failed request
    pub max_retries: u32,
    /// Initial retry delay, doubled after each failure
    pub retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            reindex_areas: Vec::new(),
            index_suffix: ".lax".to_string(),
            request_timeout_secs: 600,
            max_retries: 2,
            retry_delay_secs: 2,
            max_retry_delay_secs: 30,
        }
    }
}

impl SourcesConfig {
    /// Whether index sidecars for `area` must be skipped.
    pub fn reindexes(&self, area: &str) -> bool {
        self.reindex_areas.iter().any(|a| a == area)
    }
}

/// External terrain renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Renderer command line, run inside `working_dir`
    pub command: String,
    /// Optional point-cloud tiler run once before rendering; `{input_dir}`
    /// and `{output_dir}` are substituted
    pub tiler_command: Option<String>,
    /// Directory the renderer reads its configuration files from
    pub working_dir: PathBuf,
    /// Worker processes the renderer may start; also the number of
    /// `tempN` folders it leaves behind
    pub threads: usize,
    pub config_file: String,
    pub vector_rules_file: String,
    /// Render-ready inputs
    pub input_suffix: String,
    /// One file with this suffix per rendered input
    pub output_count_suffix: String,
    /// Georeferenced rasters that feed the mosaic
    pub mosaic_suffix: String,
    pub max_attempts: u32,
    /// Pause after a crashed attempt
    pub crash_backoff_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            command: "rusty-pullauta".to_string(),
            tiler_command: None,
            working_dir: PathBuf::from("."),
            threads: 4,
            config_file: "pullauta.ini".to_string(),
            vector_rules_file: "osm.txt".to_string(),
            input_suffix: ".laz".to_string(),
            output_count_suffix: ".laz.png".to_string(),
            mosaic_suffix: "depr.png".to_string(),
            max_attempts: 20,
            crash_backoff_secs: 5,
        }
    }
}

/// What to do with a chunk whose bounds are off the chunk grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffGridPolicy {
    /// Fail the chunk without processing it
    #[default]
    Reject,
    /// Move the minimum corner to the nearest grid line
    Snap,
}

/// Chunk scheduling and local resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Parent of the per-chunk working directories
    pub work_root: PathBuf,
    /// Restrict leases to one area
    pub area: Option<String>,
    pub concurrent_chunks: usize,
    /// Parallel downloads and uploads within one chunk
    pub transfer_concurrency: usize,
    pub download_permits: usize,
    /// Must be 1: concurrent renders would share `render.working_dir`
    pub render_permits: usize,
    /// Longest wait for a stage lease before the chunk fails
    pub lease_max_wait_secs: u64,
    /// Sleep between lease attempts once the lease API is exhausted
    pub poll_interval_secs: u64,
    pub off_grid: OffGridPolicy,
    /// Endpoint of the zoom-pyramid rebuild job
    pub pyramid_request_url: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("work"),
            area: None,
            concurrent_chunks: 2,
            transfer_concurrency: 8,
            download_permits: 1,
            render_permits: 1,
            lease_max_wait_secs: 6 * 3600,
            poll_interval_secs: 60,
            off_grid: OffGridPolicy::Reject,
            pyramid_request_url: None,
        }
    }
}

impl PipelineSettings {
    pub fn lease_max_wait(&self) -> Duration {
        Duration::from_secs(self.lease_max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl WorkerConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.scheme
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        ensure(!self.lease_api.base_url.is_empty(), "lease_api.base_url cannot be empty")?;
        ensure(!self.render.command.trim().is_empty(), "render.command cannot be empty")?;
        ensure(self.render.threads > 0, "render.threads must be greater than 0")?;
        ensure(self.render.max_attempts > 0, "render.max_attempts must be greater than 0")?;
        ensure(!self.render.input_suffix.is_empty(), "render.input_suffix cannot be empty")?;
        ensure(
            !self.render.output_count_suffix.is_empty(),
            "render.output_count_suffix cannot be empty",
        )?;
        ensure(!self.render.mosaic_suffix.is_empty(), "render.mosaic_suffix cannot be empty")?;
        ensure(
            self.pipeline.concurrent_chunks > 0,
            "pipeline.concurrent_chunks must be greater than 0",
        )?;
        ensure(
            self.pipeline.transfer_concurrency > 0,
            "pipeline.transfer_concurrency must be greater than 0",
        )?;
        ensure(
            self.pipeline.download_permits > 0,
            "pipeline.download_permits must be greater than 0",
        )?;
        // Every render shares render.working_dir and its tempN folders
        ensure(
            self.pipeline.render_permits == 1,
            "pipeline.render_permits must be 1",
        )?;
        Ok(())
    }
}

fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(PipelineError::Config(message.to_string()))
    }
}
