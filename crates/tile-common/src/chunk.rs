//! Chunk descriptor: one grid-aligned geographic work unit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::BoundingBox;

/// Area a chunk was leased from.
///
/// Chunks leased without an area name belong to the legacy pool and are
/// released through a different endpoint than named areas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum AreaName {
    Legacy,
    Named(String),
}

impl AreaName {
    pub fn from_option(name: Option<String>) -> Self {
        match name {
            Some(name) if !name.is_empty() && name != "LEGACY" => AreaName::Named(name),
            _ => AreaName::Legacy,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AreaName::Legacy => "LEGACY",
            AreaName::Named(name) => name,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, AreaName::Legacy)
    }
}

impl From<Option<String>> for AreaName {
    fn from(name: Option<String>) -> Self {
        AreaName::from_option(name)
    }
}

impl From<AreaName> for Option<String> {
    fn from(area: AreaName) -> Self {
        match area {
            AreaName::Legacy => None,
            AreaName::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for AreaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leased chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Opaque lease token issued by the coordination API
    pub id: String,
    pub bounds: BoundingBox,
    pub area_name: AreaName,
    /// Replace tiles that already exist in the bucket
    pub overwrite: bool,
    /// Source file URIs, in lease order
    pub source_files: Vec<String>,
}

impl Chunk {
    /// Build a square chunk of edge `chunk_size` from its minimum corner.
    pub fn from_origin(
        id: impl Into<String>,
        xmin: f64,
        ymin: f64,
        chunk_size: f64,
        area_name: AreaName,
        overwrite: bool,
        source_files: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            bounds: BoundingBox::new(xmin, ymin, xmin + chunk_size, ymin + chunk_size),
            area_name,
            overwrite,
            source_files,
        }
    }

    pub fn xmin(&self) -> f64 {
        self.bounds.min_x
    }

    pub fn ymin(&self) -> f64 {
        self.bounds.min_y
    }

    /// Whether both minimum corners lie on the chunk grid and the extent is
    /// exactly one chunk.
    pub fn is_grid_aligned(&self, chunk_size: f64) -> bool {
        on_grid(self.bounds.min_x, chunk_size)
            && on_grid(self.bounds.min_y, chunk_size)
            && self.bounds.width() == chunk_size
            && self.bounds.height() == chunk_size
    }

    /// Move the minimum corner to the nearest grid line and reset the extent
    /// to exactly one chunk.
    pub fn snap_to_grid(&self, chunk_size: f64) -> Chunk {
        let xmin = (self.bounds.min_x / chunk_size).round() * chunk_size;
        let ymin = (self.bounds.min_y / chunk_size).round() * chunk_size;
        Chunk {
            bounds: BoundingBox::new(xmin, ymin, xmin + chunk_size, ymin + chunk_size),
            ..self.clone()
        }
    }
}

fn on_grid(value: f64, size: f64) -> bool {
    (value / size).fract() == 0.0
}
