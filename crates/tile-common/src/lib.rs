//! Common types shared across the LIDAR tile pipeline crates.

pub mod bbox;
pub mod chunk;
pub mod error;
pub mod tile;

pub use bbox::BoundingBox;
pub use chunk::{AreaName, Chunk};
pub use error::{TileError, TileResult};
pub use tile::{TileCoord, TileName, TileScheme};
