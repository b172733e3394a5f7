//! Chunk orchestrator: drives one chunk from lease to cleanup.
//!
//! ```text
//! Leased -> Downloading -> Downloaded -> RenderLeased -> Rendering
//!        -> Assembling -> Uploading -> Released -> CleanedUp
//! ```
//!
//! Any stage may end in `Failed`. The working directory is removed in
//! every case. The chunk lease is returned only after a successful upload,
//! so a failed chunk is eventually re-leased by the coordination API.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use raster::{assemble_dir, write_tiles, AssemblyParams};
use storage::ObjectStorage;
use tile_common::Chunk;

use crate::config::{OffGridPolicy, WorkerConfig};
use crate::error::{PipelineError, Result};
use crate::lease_api::{HttpLeaseClient, LeaseClient};
use crate::metrics;
use crate::render::{prepare_renderer_dir, render_with_retry, RenderJob, RenderReport, RetryPolicy};
use crate::stage_lease::{Stage, StageLeases};
use crate::tool::{ProcessRunner, ToolCommand, ToolRunner};
use crate::transfer::{
    fetch_sources, fetch_vector_archive, upload_tiles, FetchSummary, HttpSourceFetcher,
    SourceFetcher, UploadSummary,
};
use crate::workspace::ChunkWorkspace;

/// Lifecycle of a chunk inside the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Leased,
    Downloading,
    Downloaded,
    RenderLeased,
    Rendering,
    Assembling,
    Uploading,
    Released,
    CleanedUp,
    Failed,
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkState::Leased => "leased",
            ChunkState::Downloading => "downloading",
            ChunkState::Downloaded => "downloaded",
            ChunkState::RenderLeased => "render_leased",
            ChunkState::Rendering => "rendering",
            ChunkState::Assembling => "assembling",
            ChunkState::Uploading => "uploading",
            ChunkState::Released => "released",
            ChunkState::CleanedUp => "cleaned_up",
            ChunkState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Clients and configuration shared by every chunk of a worker.
pub struct PipelineContext {
    pub config: WorkerConfig,
    pub storage: Arc<ObjectStorage>,
    pub lease_client: Arc<dyn LeaseClient>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub runner: Arc<dyn ToolRunner>,
    pub leases: StageLeases,
    render_command: ToolCommand,
    tiler_command: Option<ToolCommand>,
}

impl PipelineContext {
    /// Assemble a context from explicit collaborators.
    pub fn new(
        config: WorkerConfig,
        storage: Arc<ObjectStorage>,
        lease_client: Arc<dyn LeaseClient>,
        fetcher: Arc<dyn SourceFetcher>,
        runner: Arc<dyn ToolRunner>,
    ) -> Result<Self> {
        config.validate()?;
        let render_command = ToolCommand::parse(&config.render.command)?;
        let tiler_command = config
            .render
            .tiler_command
            .as_deref()
            .map(ToolCommand::parse)
            .transpose()?;
        let leases = StageLeases::from_settings(&config.pipeline);

        Ok(Self {
            config,
            storage,
            lease_client,
            fetcher,
            runner,
            leases,
            render_command,
            tiler_command,
        })
    }

    /// Build the production clients described by `config`.
    pub fn from_config(config: WorkerConfig) -> Result<Self> {
        let storage = Arc::new(ObjectStorage::new(&config.storage)?);
        let lease_client = Arc::new(HttpLeaseClient::new(
            &config.lease_api,
            config.pipeline.pyramid_request_url.clone(),
            config.scheme.chunk_size,
        )?);
        let fetcher = Arc::new(HttpSourceFetcher::new(&config.sources)?);
        Self::new(config, storage, lease_client, fetcher, Arc::new(ProcessRunner))
    }

    pub fn assembly_params(&self) -> AssemblyParams {
        AssemblyParams::from_scheme(&self.config.scheme)
    }
}

/// What happened to one chunk.
#[derive(Debug)]
pub struct ChunkReport {
    pub chunk_id: String,
    /// Last state reached before cleanup
    pub state: ChunkState,
    pub fetch: Option<FetchSummary>,
    pub render: Option<RenderReport>,
    pub tiles_written: usize,
    pub upload: Option<UploadSummary>,
    pub released: bool,
    pub cleaned_up: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ChunkReport {
    fn new(chunk_id: &str) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            state: ChunkState::Leased,
            fetch: None,
            render: None,
            tiles_written: 0,
            upload: None,
            released: false,
            cleaned_up: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn advance(&mut self, next: ChunkState) {
        debug!(chunk = %self.chunk_id, from = %self.state, to = %next, "Chunk state");
        self.state = next;
    }
}

/// Check the chunk lies on the chunk grid, snapping it when configured to.
pub fn normalize_chunk(chunk: Chunk, chunk_size: f64, policy: OffGridPolicy) -> Result<Chunk> {
    if chunk.is_grid_aligned(chunk_size) {
        return Ok(chunk);
    }
    match policy {
        OffGridPolicy::Reject => Err(PipelineError::OffGridChunk {
            chunk: chunk.id.clone(),
            xmin: chunk.xmin(),
            ymin: chunk.ymin(),
            chunk_size,
        }),
        OffGridPolicy::Snap => {
            let snapped = chunk.snap_to_grid(chunk_size);
            warn!(
                chunk = %chunk.id,
                xmin = chunk.xmin(),
                ymin = chunk.ymin(),
                snapped_xmin = snapped.xmin(),
                snapped_ymin = snapped.ymin(),
                "Chunk off the grid, snapping"
            );
            Ok(snapped)
        }
    }
}

/// Drive `chunk` through every stage.
///
/// Returns the report of a chunk whose tiles were uploaded; its lease
/// release is best-effort. Any stage failure is returned as an error after
/// the working directory has been removed.
#[instrument(skip_all, fields(chunk = %chunk.id, area = %chunk.area_name))]
pub async fn process_chunk(ctx: &PipelineContext, chunk: Chunk) -> Result<ChunkReport> {
    let started = Instant::now();
    let chunk = normalize_chunk(chunk, ctx.config.scheme.chunk_size, ctx.config.pipeline.off_grid)
        .map_err(|e| {
            error!(error = %e, "Rejecting chunk");
            metrics::record_chunk("failed");
            e
        })?;

    let mut report = ChunkReport::new(&chunk.id);
    let workspace = match ChunkWorkspace::create(
        &ctx.config.pipeline.work_root,
        &chunk.id,
        ctx.tiler_command.is_some(),
    )
    .await
    {
        Ok(workspace) => workspace,
        Err(e) => {
            error!(error = %e, "Failed to create chunk workspace");
            metrics::record_chunk("failed");
            return Err(e);
        }
    };

    let result = run_stages(ctx, &chunk, &workspace, &mut report).await;

    report.cleaned_up = workspace.remove().await;
    report.finished_at = Some(Utc::now());
    metrics::record_chunk_duration(started.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            report.advance(ChunkState::CleanedUp);
            metrics::record_chunk("completed");
            info!(
                tiles = report.tiles_written,
                released = report.released,
                elapsed_secs = started.elapsed().as_secs(),
                "Chunk complete"
            );
            Ok(report)
        }
        Err(e) => {
            error!(state = %report.state, error = %e, "Chunk failed");
            report.advance(ChunkState::Failed);
            metrics::record_chunk("failed");
            Err(e)
        }
    }
}

async fn run_stages(
    ctx: &PipelineContext,
    chunk: &Chunk,
    workspace: &ChunkWorkspace,
    report: &mut ChunkReport,
) -> Result<()> {
    let config = &ctx.config;

    // Download
    report.advance(ChunkState::Downloading);
    let download_lease = ctx.leases.acquire(Stage::Download).await?;
    let fetched = fetch_sources(
        ctx.fetcher.as_ref(),
        chunk,
        &workspace.download_dir,
        &config.sources,
        config.pipeline.transfer_concurrency,
    )
    .await;
    drop(download_lease);
    report.fetch = Some(fetched);
    report.advance(ChunkState::Downloaded);

    // Render
    let render_lease = ctx.leases.acquire(Stage::Render).await?;
    report.advance(ChunkState::RenderLeased);

    fetch_vector_archive(&ctx.storage, &config.scheme, chunk, &workspace.download_dir).await;

    if let (Some(tiler), Some(tiles_dir)) = (&ctx.tiler_command, &workspace.tiles_dir) {
        run_tiler(ctx, tiler, workspace, tiles_dir).await;
    }

    let input_dir = workspace.render_input_dir();
    prepare_renderer_dir(&config.render, input_dir, &workspace.output_dir).await?;

    report.advance(ChunkState::Rendering);
    let job = RenderJob {
        command: &ctx.render_command,
        working_dir: &config.render.working_dir,
        input_dir,
        input_suffix: &config.render.input_suffix,
        output_dir: &workspace.output_dir,
        output_suffix: &config.render.output_count_suffix,
    };
    let rendered = render_with_retry(
        ctx.runner.as_ref(),
        &job,
        &RetryPolicy::from_config(&config.render),
    )
    .await;
    drop(render_lease);
    report.render = Some(rendered);

    // Assemble
    report.advance(ChunkState::Assembling);
    let tile_files = assemble_chunk(ctx, chunk, workspace).await?;
    report.tiles_written = tile_files.len();

    // Upload
    report.advance(ChunkState::Uploading);
    let uploaded = upload_tiles(
        ctx.storage.clone(),
        &config.scheme,
        chunk,
        &tile_files,
        config.pipeline.transfer_concurrency,
    )
    .await?;
    report.upload = Some(uploaded);

    // Release
    match ctx.lease_client.release_chunk(chunk).await {
        Ok(()) => report.released = true,
        Err(e) => warn!(error = %e, "Chunk lease release failed"),
    }
    if let Err(e) = ctx.lease_client.request_pyramid(chunk).await {
        warn!(error = %e, "Pyramid rebuild request failed");
    }
    report.advance(ChunkState::Released);
    Ok(())
}

async fn run_tiler(
    ctx: &PipelineContext,
    tiler: &ToolCommand,
    workspace: &ChunkWorkspace,
    tiles_dir: &Path,
) {
    let input = workspace.download_dir.to_string_lossy();
    let output = tiles_dir.to_string_lossy();
    let command = tiler.with_placeholders(&[("input_dir", input.as_ref()), ("output_dir", output.as_ref())]);

    match ctx.runner.run(&command, &workspace.root).await {
        Ok(out) if out.success() => debug!(elapsed_ms = out.elapsed.as_millis() as u64, "Tiler finished"),
        Ok(out) => warn!(exit_code = ?out.exit_code, stderr = %out.stderr_tail(5), "Tiler failed"),
        Err(e) => warn!(error = %e, "Tiler could not be started"),
    }
}

/// Mosaic, resample and retile the render output on the blocking pool.
async fn assemble_chunk(
    ctx: &PipelineContext,
    chunk: &Chunk,
    workspace: &ChunkWorkspace,
) -> Result<Vec<PathBuf>> {
    let output_dir = workspace.output_dir.clone();
    let upload_dir = workspace.upload_dir.clone();
    let suffix = ctx.config.render.mosaic_suffix.clone();
    let bounds = chunk.bounds;
    let params = ctx.assembly_params();

    let files = tokio::task::spawn_blocking(move || {
        let tiles = assemble_dir(&output_dir, &suffix, &bounds, &params)?;
        write_tiles(&tiles, &upload_dir)
    })
    .await??;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_common::AreaName;

    fn chunk_at(xmin: f64, ymin: f64) -> Chunk {
        Chunk::from_origin("c1", xmin, ymin, 5000.0, AreaName::Legacy, false, vec![])
    }

    #[test]
    fn test_aligned_chunk_passes() {
        let chunk = chunk_at(1_600_000.0, 5_000_000.0);
        let normalized = normalize_chunk(chunk.clone(), 5000.0, OffGridPolicy::Reject).unwrap();
        assert_eq!(normalized, chunk);
    }

    #[test]
    fn test_off_grid_rejected() {
        let err = normalize_chunk(chunk_at(1_602_600.0, 5_000_300.0), 5000.0, OffGridPolicy::Reject)
            .unwrap_err();
        assert!(matches!(err, PipelineError::OffGridChunk { .. }));
    }

    #[test]
    fn test_off_grid_snapped() {
        let snapped = normalize_chunk(chunk_at(1_602_600.0, 5_000_300.0), 5000.0, OffGridPolicy::Snap)
            .unwrap();
        assert_eq!(snapped.xmin(), 1_605_000.0);
        assert_eq!(snapped.ymin(), 5_000_000.0);
        assert_eq!(snapped.bounds.max_x, 1_610_000.0);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ChunkState::RenderLeased.to_string(), "render_leased");
        assert_eq!(ChunkState::CleanedUp.to_string(), "cleaned_up");
    }
}
