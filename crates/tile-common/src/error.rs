//! Error types for the tile pipeline.

use thiserror::Error;

/// Result type alias using TileError.
pub type TileResult<T> = Result<T, TileError>;

/// Primary error type for tile addressing and storage operations.
#[derive(Debug, Error)]
pub enum TileError {
    // === Addressing Errors ===
    #[error("Invalid tile file name: {0}")]
    InvalidTileName(String),

    #[error("Invalid tile scheme: {0}")]
    InvalidScheme(String),

    #[error("Zoom level {zoom} is outside the pyramid (base zoom {base})")]
    ZoomOutOfRange { zoom: u32, base: u32 },

    // === Storage Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    // === Infrastructure Errors ===
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for TileError {
    fn from(err: std::io::Error) -> Self {
        TileError::InternalError(err.to_string())
    }
}
