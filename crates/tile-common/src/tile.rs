//! Tile scheme, tile-grid addressing and the tile file naming convention.
//!
//! The published map uses a fixed partition of the projected plane into
//! square tiles. At the base zoom every tile spans `tile_world_size` metres
//! and `tile_pixel_size` pixels. Column indices grow eastward from x = 0;
//! row indices grow southward from a fixed reference northing, so a tile's
//! row is derived from the northing of its lower-left corner.
//!
//! Coarser levels aggregate an N×N block of the next finer level, and one
//! aggregation step moves `log2(N)` zoom levels (15 → 12 → 9 → ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{TileError, TileResult};

/// A tile coordinate (z/x/y) in the published pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column (x), growing eastward
    pub x: i64,
    /// Row (y), growing southward from the reference northing
    pub y: i64,
}

impl TileCoord {
    pub fn new(z: u32, x: i64, y: i64) -> Self {
        Self { z, x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Parameters of the published tile grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileScheme {
    /// World units covered by one base-zoom tile edge
    pub tile_world_size: f64,
    /// Pixels along one tile edge
    pub tile_pixel_size: u32,
    /// Reference northing from which row indices are counted
    pub origin_northing: f64,
    /// Zoom level of the tiles produced directly from chunks
    pub base_zoom: u32,
    /// Edge length of the block of finer tiles merged into one coarser tile
    pub pyramid_factor: u32,
    /// Edge length of a leased chunk in world units
    pub chunk_size: f64,
}

impl Default for TileScheme {
    fn default() -> Self {
        Self {
            tile_world_size: 200.0,
            tile_pixel_size: 472,
            origin_northing: 6_553_600.0,
            base_zoom: 15,
            pyramid_factor: 8,
            chunk_size: 5000.0,
        }
    }
}

impl TileScheme {
    /// Check the scheme is internally consistent.
    pub fn validate(&self) -> TileResult<()> {
        if !(self.tile_world_size.is_finite() && self.tile_world_size > 0.0) {
            return Err(TileError::InvalidScheme(format!(
                "tile_world_size must be positive, got {}",
                self.tile_world_size
            )));
        }
        if self.tile_pixel_size == 0 {
            return Err(TileError::InvalidScheme(
                "tile_pixel_size must be positive".to_string(),
            ));
        }
        if self.pyramid_factor < 2 || !self.pyramid_factor.is_power_of_two() {
            return Err(TileError::InvalidScheme(format!(
                "pyramid_factor must be a power of two >= 2, got {}",
                self.pyramid_factor
            )));
        }
        let tiles_per_chunk = self.chunk_size / self.tile_world_size;
        if !(tiles_per_chunk >= 1.0 && tiles_per_chunk.fract() == 0.0) {
            return Err(TileError::InvalidScheme(format!(
                "chunk_size {} is not a whole multiple of tile_world_size {}",
                self.chunk_size, self.tile_world_size
            )));
        }
        Ok(())
    }

    /// Canonical world units per pixel of the published tiles.
    ///
    /// This is the exact ratio of the scheme, not the renderer's native
    /// resolution.
    pub fn target_resolution(&self) -> f64 {
        self.tile_world_size / self.tile_pixel_size as f64
    }

    /// Number of zoom levels crossed by one aggregation step.
    pub fn zoom_step(&self) -> u32 {
        self.pyramid_factor.trailing_zeros()
    }

    /// Whether `zoom` is one of the levels produced by the pyramid.
    pub fn is_pyramid_level(&self, zoom: u32) -> bool {
        zoom <= self.base_zoom && (self.base_zoom - zoom) % self.zoom_step() == 0
    }

    /// World size of a tile edge at `zoom`.
    pub fn tile_world_size_at(&self, zoom: u32) -> TileResult<f64> {
        if !self.is_pyramid_level(zoom) {
            return Err(TileError::ZoomOutOfRange {
                zoom,
                base: self.base_zoom,
            });
        }
        let steps = (self.base_zoom - zoom) / self.zoom_step();
        Ok(self.tile_world_size * (self.pyramid_factor as f64).powi(steps as i32))
    }

    /// Address the base-zoom tile whose lower-left corner is `(world_x, world_y)`.
    pub fn address(&self, world_x: f64, world_y: f64) -> TileCoord {
        let size = self.tile_world_size;
        TileCoord {
            z: self.base_zoom,
            x: (world_x / size).floor() as i64,
            y: ((self.origin_northing - world_y) / size).floor() as i64,
        }
    }

    /// Address a tile origin at an arbitrary pyramid level.
    pub fn address_at(&self, zoom: u32, world_x: f64, world_y: f64) -> TileResult<TileCoord> {
        let size = self.tile_world_size_at(zoom)?;
        Ok(TileCoord {
            z: zoom,
            x: (world_x / size).floor() as i64,
            y: ((self.origin_northing - world_y) / size).floor() as i64,
        })
    }

    /// World coordinates of the lower-left corner of `coord`.
    ///
    /// Inverse of [`TileScheme::address_at`] for every valid coordinate.
    pub fn origin(&self, coord: &TileCoord) -> TileResult<(f64, f64)> {
        let size = self.tile_world_size_at(coord.z)?;
        Ok((
            coord.x as f64 * size,
            self.origin_northing - coord.y as f64 * size,
        ))
    }

    /// The coarser tile this tile is merged into, if any.
    pub fn parent(&self, coord: &TileCoord) -> Option<TileCoord> {
        let step = self.zoom_step();
        if coord.z < step || !self.is_pyramid_level(coord.z) {
            return None;
        }
        let factor = self.pyramid_factor as i64;
        Some(TileCoord {
            z: coord.z - step,
            x: coord.x.div_euclid(factor),
            y: coord.y.div_euclid(factor),
        })
    }

    /// Position of `coord` inside its parent's N×N block.
    pub fn offset_in_parent(&self, coord: &TileCoord) -> (u32, u32) {
        let factor = self.pyramid_factor as i64;
        (
            coord.x.rem_euclid(factor) as u32,
            coord.y.rem_euclid(factor) as u32,
        )
    }

    /// The N×N finer tiles merged into `coord`, row by row.
    pub fn children(&self, coord: &TileCoord) -> Vec<TileCoord> {
        if coord.z >= self.base_zoom || !self.is_pyramid_level(coord.z) {
            return Vec::new();
        }
        let factor = self.pyramid_factor as i64;
        let z = coord.z + self.zoom_step();
        let mut children = Vec::with_capacity((factor * factor) as usize);
        for dy in 0..factor {
            for dx in 0..factor {
                children.push(TileCoord {
                    z,
                    x: coord.x * factor + dx,
                    y: coord.y * factor + dy,
                });
            }
        }
        children
    }
}

/// Output tile file name: `tile_{world_x}_{world_y}.png`.
///
/// The integers are the world coordinates of the tile's lower-left corner,
/// so the name alone is enough to address the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileName {
    pub world_x: i64,
    pub world_y: i64,
}

impl TileName {
    const PREFIX: &'static str = "tile_";
    const SUFFIX: &'static str = ".png";

    pub fn new(world_x: i64, world_y: i64) -> Self {
        Self { world_x, world_y }
    }

    /// Base-zoom tile coordinate encoded by this name.
    pub fn coord(&self, scheme: &TileScheme) -> TileCoord {
        scheme.address(self.world_x as f64, self.world_y as f64)
    }
}

impl fmt::Display for TileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}_{}{}",
            Self::PREFIX,
            self.world_x,
            self.world_y,
            Self::SUFFIX
        )
    }
}

impl FromStr for TileName {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TileError::InvalidTileName(s.to_string());

        let stem = s
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.strip_suffix(Self::SUFFIX))
            .ok_or_else(invalid)?;

        let (x, y) = stem.split_once('_').ok_or_else(invalid)?;
        let world_x = x.parse().map_err(|_| invalid())?;
        let world_y = y.parse().map_err(|_| invalid())?;

        Ok(Self { world_x, world_y })
    }
}
