//! Error types for raster decoding and assembly.

use std::path::PathBuf;

use thiserror::Error;

pub type RasterResult<T> = Result<T, RasterError>;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("No input rasters to mosaic")]
    NoInputRasters,

    #[error("Missing world file for {0}")]
    MissingWorldFile(PathBuf),

    #[error("Invalid world file {path}: {message}")]
    InvalidWorldFile { path: PathBuf, message: String },

    #[error("Unsupported raster: {0}")]
    Unsupported(String),

    #[error("Raster dimensions mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("PNG encode error: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
