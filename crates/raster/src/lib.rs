//! Georeferenced rasters and the tile assembler.
//!
//! The assembler turns the rendered rasters of one chunk into fixed-size,
//! deterministically addressed tiles:
//!
//! 1. [`mosaic`] merges the sources over the padded chunk extent
//! 2. [`resample`] moves the mosaic onto the global canonical pixel grid
//! 3. [`crop`] cuts the grid back to the chunk bounds
//! 4. [`retile`] slices the result into `tile_pixel_size` squares
//!
//! [`assemble_dir`] runs the whole sequence over a render output directory.

pub mod assemble;
pub mod error;
pub mod grid;
pub mod io;
pub mod png;
pub mod raster;
pub mod world_file;

pub use assemble::{
    assemble, assemble_dir, crop, mosaic, resample, retile, write_tiles, AssemblyParams, Tile,
};
pub use error::{RasterError, RasterResult};
pub use grid::{GeoTransform, GridRaster, PixelGrid};
pub use raster::Raster;
pub use world_file::WorldFile;
