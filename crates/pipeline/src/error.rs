//! Error types for the chunk pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::stage_lease::Stage;

/// Errors that can occur while processing a chunk.
///
/// Renderer non-convergence and renderer crashes are not errors; they are
/// reported through [`crate::render::RenderOutcome`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to fetch {uri}: {message}")]
    Fetch { uri: String, message: String },

    #[error("Assembly failed: {0}")]
    Raster(#[from] raster::RasterError),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Timed out after {waited:?} waiting for the {stage} stage")]
    LeaseTimeout { stage: Stage, waited: Duration },

    #[error("Chunk {chunk} is off the {chunk_size} unit grid: ({xmin}, {ymin})")]
    OffGridChunk {
        chunk: String,
        xmin: f64,
        ymin: f64,
        chunk_size: f64,
    },

    #[error("Lease API error: {0}")]
    LeaseApi(String),

    #[error("Failed to start {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] tile_common::TileError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
