//! Chunk tile-production pipeline.
//!
//! A worker leases grid-aligned chunks from the coordination API, downloads
//! their point-cloud sources, runs the external terrain renderer under a
//! stage lease until its outputs are complete, assembles the rendered
//! rasters into fixed-size tiles and uploads them to the tile bucket.

pub mod config;
pub mod error;
pub mod lease_api;
pub mod metrics;
pub mod orchestrator;
pub mod render;
pub mod stage_lease;
pub mod tool;
pub mod transfer;
pub mod worker;
pub mod workspace;

pub use config::{
    LeaseApiConfig, OffGridPolicy, PipelineSettings, RenderConfig, SourcesConfig, WorkerConfig,
};
pub use error::{PipelineError, Result};
pub use lease_api::{HttpLeaseClient, LeaseClient};
pub use orchestrator::{normalize_chunk, process_chunk, ChunkReport, ChunkState, PipelineContext};
pub use render::{render_with_retry, RenderJob, RenderOutcome, RenderReport, RetryPolicy};
pub use stage_lease::{Stage, StageLease, StageLeases};
pub use tool::{ProcessRunner, ToolCommand, ToolOutput, ToolRunner};
pub use transfer::{FetchSummary, HttpSourceFetcher, SourceFetcher, UploadSummary};
pub use worker::{BatchSummary, Worker};
pub use workspace::ChunkWorkspace;
