//! Raster tile assembler: mosaic, resample, crop and retile.
//!
//! The renderer's native resolution is close to, but not exactly, the tile
//! scheme's `tile_world_size / tile_pixel_size`. Chunks are assembled
//! independently, so every chunk is resampled onto one global lattice of
//! that exact resolution anchored at the world origin. Pixel centres are
//! computed from integer lattice indices rather than accumulated offsets,
//! which makes neighbouring chunks agree bit for bit along shared edges.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tile_common::{BoundingBox, TileCoord, TileName, TileScheme};
use tracing::{debug, info, warn};

use crate::grid::{GridRaster, PixelGrid};
use crate::io::{list_sources, load_georeferenced};
use crate::png::encode_rgb_auto;
use crate::{Raster, RasterError, RasterResult};

/// Bands in every emitted tile.
const TILE_BANDS: usize = 3;

/// Parameters of one assembly run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblyParams {
    pub tile_world_size: f64,
    pub tile_pixel_size: u32,
    /// Background value; a pixel is nodata when every band equals it
    pub nodata: u8,
    /// World units added around the chunk before merging
    pub pad: f64,
}

impl AssemblyParams {
    pub fn from_scheme(scheme: &TileScheme) -> Self {
        Self {
            tile_world_size: scheme.tile_world_size,
            tile_pixel_size: scheme.tile_pixel_size,
            nodata: 255,
            pad: 1.0,
        }
    }

    /// Canonical world units per pixel.
    pub fn target_resolution(&self) -> f64 {
        self.tile_world_size / self.tile_pixel_size as f64
    }
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self::from_scheme(&TileScheme::default())
    }
}

/// One output tile: `size` x `size` RGB pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub name: TileName,
    pub size: usize,
    pub data: Vec<u8>,
}

impl Tile {
    pub fn coord(&self, scheme: &TileScheme) -> TileCoord {
        self.name.coord(scheme)
    }

    pub fn pixel(&self, col: usize, row: usize) -> &[u8] {
        let start = (row * self.size + col) * TILE_BANDS;
        &self.data[start..start + TILE_BANDS]
    }

    pub fn encode_png(&self) -> RasterResult<Vec<u8>> {
        encode_rgb_auto(&self.data, self.size, self.size)
    }
}

/// Merge `sources` over `extent`.
///
/// The mosaic lives on the first source's pixel lattice at that source's
/// resolution. Where sources overlap the first one holding data wins;
/// uncovered pixels are nodata.
pub fn mosaic(sources: &[Raster], extent: &BoundingBox, nodata: u8) -> RasterResult<GridRaster> {
    let first = sources.first().ok_or(RasterError::NoInputRasters)?;
    if !extent.is_valid() {
        return Err(RasterError::DimensionMismatch(format!(
            "invalid mosaic extent {:?}",
            extent
        )));
    }

    let grid = first.transform.grid();
    let bands = sources.iter().map(|s| s.bands).max().unwrap_or(first.bands);
    let sources: Vec<Raster> = sources
        .iter()
        .map(|s| {
            let mut s = s.with_bands(bands);
            s.nodata = nodata;
            s
        })
        .collect();

    let (c0, c1) = grid.column_span(extent.min_x, extent.max_x);
    let (r0, r1) = grid.row_span(extent.min_y, extent.max_y);
    let width = (c1 - c0) as usize;
    let height = (r1 - r0) as usize;

    let mut out = GridRaster::filled(grid, c0, r0, width, height, bands, nodata);

    out.raster
        .data
        .par_chunks_mut(width * bands)
        .enumerate()
        .for_each(|(r, row)| {
            let y = grid.row_centre(r0 + r as i64);
            for (c, px) in row.chunks_exact_mut(bands).enumerate() {
                let x = grid.column_centre(c0 + c as i64);
                for source in &sources {
                    if let Some((sc, sr)) = source.locate(x, y) {
                        if !source.is_nodata(sc, sr) {
                            px.copy_from_slice(source.pixel(sc, sr));
                            break;
                        }
                    }
                }
            }
        });

    debug!(
        sources = sources.len(),
        width = width,
        height = height,
        res_x = grid.res_x,
        "Built mosaic"
    );

    Ok(out)
}

/// Resample `mosaic` onto the canonical lattice of `target_res`, nearest
/// neighbour, snapping its extent outward to whole target pixels.
pub fn resample(mosaic: &GridRaster, target_res: f64) -> GridRaster {
    let grid = PixelGrid::canonical(target_res);
    let bounds = mosaic.bounds();
    let bands = mosaic.raster.bands;
    let nodata = mosaic.raster.nodata;

    let (c0, c1) = grid.column_span(bounds.min_x, bounds.max_x);
    let (r0, r1) = grid.row_span(bounds.min_y, bounds.max_y);
    let width = (c1 - c0) as usize;
    let height = (r1 - r0) as usize;

    let mut out = GridRaster::filled(grid, c0, r0, width, height, bands, nodata);

    out.raster
        .data
        .par_chunks_mut(width * bands)
        .enumerate()
        .for_each(|(r, row)| {
            let y = grid.row_centre(r0 + r as i64);
            for (c, px) in row.chunks_exact_mut(bands).enumerate() {
                let x = grid.column_centre(c0 + c as i64);
                if let Some(sample) = mosaic.sample(x, y) {
                    px.copy_from_slice(sample);
                }
            }
        });

    debug!(width = width, height = height, target_res = target_res, "Resampled mosaic");
    out
}

/// Cut `raster` to `bounds`, rounding the window to the nearest pixel edges.
pub fn crop(raster: &GridRaster, bounds: &BoundingBox) -> RasterResult<GridRaster> {
    let grid = raster.grid;
    let width = raster.raster.width as i64;
    let height = raster.raster.height as i64;

    let col_start = (grid.nearest_column_edge(bounds.min_x) - raster.col0).clamp(0, width);
    let col_end = (grid.nearest_column_edge(bounds.max_x) - raster.col0).clamp(0, width);
    let row_start = (grid.nearest_row_edge(bounds.max_y) - raster.row0).clamp(0, height);
    let row_end = (grid.nearest_row_edge(bounds.min_y) - raster.row0).clamp(0, height);

    if col_end <= col_start || row_end <= row_start {
        return Err(RasterError::DimensionMismatch(format!(
            "crop window for {:?} is empty",
            bounds
        )));
    }

    let (col_start, col_end) = (col_start as usize, col_end as usize);
    let (row_start, row_end) = (row_start as usize, row_end as usize);
    let bands = raster.raster.bands;
    let out_width = col_end - col_start;
    let out_height = row_end - row_start;

    let mut out = GridRaster::filled(
        grid,
        raster.col0 + col_start as i64,
        raster.row0 + row_start as i64,
        out_width,
        out_height,
        bands,
        raster.raster.nodata,
    );

    let src_stride = raster.raster.width * bands;
    for (r, dst) in out
        .raster
        .data
        .chunks_exact_mut(out_width * bands)
        .enumerate()
    {
        let start = (row_start + r) * src_stride + col_start * bands;
        dst.copy_from_slice(&raster.raster.data[start..start + out_width * bands]);
    }

    Ok(out)
}

/// Slice `raster` into `tile_pixel_size` squares, left to right, top to
/// bottom. Ragged edges are padded with nodata and every tile is RGB.
pub fn retile(raster: &GridRaster, params: &AssemblyParams) -> Vec<Tile> {
    let size = params.tile_pixel_size as usize;
    let rgb = if raster.raster.bands == TILE_BANDS {
        std::borrow::Cow::Borrowed(&raster.raster)
    } else {
        std::borrow::Cow::Owned(raster.raster.with_bands(TILE_BANDS))
    };
    let xmin = rgb.transform.origin_x;
    let ymax = rgb.transform.origin_y;
    let step = params.tile_world_size / params.tile_pixel_size as f64;

    let offsets: Vec<(usize, usize)> = (0..rgb.height)
        .step_by(size)
        .flat_map(|j| (0..rgb.width).step_by(size).map(move |i| (i, j)))
        .collect();

    offsets
        .par_iter()
        .map(|&(i, j)| {
            let mut data = vec![params.nodata; size * size * TILE_BANDS];
            let cols = size.min(rgb.width - i);
            let rows = size.min(rgb.height - j);
            for r in 0..rows {
                let src = ((j + r) * rgb.width + i) * TILE_BANDS;
                let dst = r * size * TILE_BANDS;
                data[dst..dst + cols * TILE_BANDS]
                    .copy_from_slice(&rgb.data[src..src + cols * TILE_BANDS]);
            }

            let world_x = (xmin + i as f64 * step).round() as i64;
            let world_y = (ymax - (j + size) as f64 * step).round() as i64;
            Tile {
                name: TileName::new(world_x, world_y),
                size,
                data,
            }
        })
        .collect()
}

/// Run the full assembly for one chunk.
pub fn assemble(
    sources: &[Raster],
    chunk_bounds: &BoundingBox,
    params: &AssemblyParams,
) -> RasterResult<Vec<Tile>> {
    let merged = mosaic(sources, &chunk_bounds.padded(params.pad), params.nodata)?;
    let resampled = resample(&merged, params.target_resolution());
    let cropped = crop(&resampled, chunk_bounds)?;
    let tiles = retile(&cropped, params);

    info!(
        sources = sources.len(),
        width = cropped.raster.width,
        height = cropped.raster.height,
        tiles = tiles.len(),
        "Assembled tiles"
    );
    Ok(tiles)
}

/// Load every file in `dir` ending with `suffix` and assemble them.
///
/// Unreadable sources are logged and skipped; having none left is
/// [`RasterError::NoInputRasters`].
pub fn assemble_dir(
    dir: &Path,
    suffix: &str,
    chunk_bounds: &BoundingBox,
    params: &AssemblyParams,
) -> RasterResult<Vec<Tile>> {
    let paths = list_sources(dir, suffix)?;
    let mut sources = Vec::with_capacity(paths.len());
    for path in &paths {
        match load_georeferenced(path, params.nodata) {
            Ok(raster) => sources.push(raster),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable raster"),
        }
    }
    if sources.is_empty() {
        return Err(RasterError::NoInputRasters);
    }
    assemble(&sources, chunk_bounds, params)
}

/// Encode `tiles` as PNG files named after each tile in `dir`.
pub fn write_tiles(tiles: &[Tile], dir: &Path) -> RasterResult<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    tiles
        .par_iter()
        .map(|tile| {
            let path = dir.join(tile.name.to_string());
            fs::write(&path, tile.encode_png()?)?;
            Ok(path)
        })
        .collect()
}
