//! Common test fixtures for the tile pipeline.
//!
//! Values mirror the deployed tile scheme so tests read like production
//! cases.

/// Tile scheme constants.
pub mod scheme {
    /// World units per base-zoom tile edge
    pub const TILE_WORLD_SIZE: f64 = 200.0;

    /// Pixels per tile edge
    pub const TILE_PIXEL_SIZE: u32 = 472;

    /// Reference northing for tile rows
    pub const ORIGIN_NORTHING: f64 = 6_553_600.0;

    /// Zoom level of tiles cut from chunks
    pub const BASE_ZOOM: u32 = 15;

    /// Edge length of a leased chunk
    pub const CHUNK_SIZE: f64 = 5000.0;

    /// Tiles along one chunk edge
    pub const TILES_PER_CHUNK_EDGE: usize = 25;

    /// Canonical world units per pixel (200 / 472)
    pub fn target_res() -> f64 {
        TILE_WORLD_SIZE / TILE_PIXEL_SIZE as f64
    }

    /// Typical native resolution of the terrain renderer, slightly off the
    /// canonical one
    pub const RENDERER_RES: f64 = 0.42333;
}

/// Chunk origins on the 5000-unit grid.
pub mod chunks {
    /// A chunk in the middle of the deployed map
    pub const ORIGIN: (f64, f64) = (1_600_000.0, 5_000_000.0);

    /// The chunk directly east of [`ORIGIN`]
    pub const EAST_NEIGHBOUR: (f64, f64) = (1_605_000.0, 5_000_000.0);

    /// Off the chunk grid by a few hundred units
    pub const OFF_GRID: (f64, f64) = (1_602_600.0, 5_000_300.0);

    /// `(min_x, min_y, max_x, max_y)` of a chunk starting at `origin`
    pub fn bounds(origin: (f64, f64)) -> (f64, f64, f64, f64) {
        (
            origin.0,
            origin.1,
            origin.0 + super::scheme::CHUNK_SIZE,
            origin.1 + super::scheme::CHUNK_SIZE,
        )
    }
}

/// Lease API response bodies.
pub mod lease {
    /// A named-area lease, coordinates as numbers
    pub const NAMED_AREA_BODY: &str = r#"{"uuid":"6f1c2d9e-area","files":"s3://lidar/a.laz,s3://lidar/a.lax,s3://lidar/b.laz","xmin":1600000,"ymin":5000000,"overwrite":false,"area_name":"NZ20_Hawkes"}"#;

    /// A legacy lease, coordinates as strings and no area name
    pub const LEGACY_BODY: &str = r#"{"uuid":"legacy-1","files":"s3://lidar/c.laz","xmin":"1605000","ymin":"5000000","overwrite":true}"#;
}
