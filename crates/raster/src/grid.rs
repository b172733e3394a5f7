//! Affine transforms and pixel lattices.
//!
//! All rasters in the pipeline are north-up: no rotation terms, columns grow
//! eastward, rows grow southward. A [`PixelGrid`] is an infinite lattice of
//! pixels anchored at one world point; rasters that live on the same lattice
//! are addressed by integer lattice indices, so two rasters computed
//! independently agree on which pixel a world point falls in.

use tile_common::BoundingBox;

use crate::Raster;

/// Pixel-to-world transform of a north-up raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// World x of the upper-left corner of the upper-left pixel
    pub origin_x: f64,
    /// World y of the upper-left corner of the upper-left pixel
    pub origin_y: f64,
    /// World units per column
    pub pixel_width: f64,
    /// World units per row (positive; y decreases as the row grows)
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// World extent of a `width` x `height` raster under this transform.
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        BoundingBox::new(
            self.origin_x,
            self.origin_y - height as f64 * self.pixel_height,
            self.origin_x + width as f64 * self.pixel_width,
            self.origin_y,
        )
    }

    /// World coordinates of the centre of pixel (`col`, `row`).
    pub fn pixel_centre(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// The lattice this transform's pixels lie on, anchored at its origin.
    pub fn grid(&self) -> PixelGrid {
        PixelGrid::new(
            self.origin_x,
            self.origin_y,
            self.pixel_width,
            self.pixel_height,
        )
    }
}

/// An unbounded pixel lattice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelGrid {
    pub anchor_x: f64,
    pub anchor_y: f64,
    pub res_x: f64,
    pub res_y: f64,
}

impl PixelGrid {
    pub fn new(anchor_x: f64, anchor_y: f64, res_x: f64, res_y: f64) -> Self {
        Self {
            anchor_x,
            anchor_y,
            res_x,
            res_y,
        }
    }

    /// Square lattice anchored at the world origin.
    ///
    /// Every chunk resampled onto this lattice shares pixel edges with its
    /// neighbours.
    pub fn canonical(res: f64) -> Self {
        Self::new(0.0, 0.0, res, res)
    }

    /// Lattice column containing world x.
    #[inline]
    pub fn column_of(&self, x: f64) -> i64 {
        ((x - self.anchor_x) / self.res_x).floor() as i64
    }

    /// Lattice row containing world y.
    #[inline]
    pub fn row_of(&self, y: f64) -> i64 {
        ((self.anchor_y - y) / self.res_y).floor() as i64
    }

    /// Lattice column edge nearest to world x.
    pub fn nearest_column_edge(&self, x: f64) -> i64 {
        ((x - self.anchor_x) / self.res_x).round() as i64
    }

    /// Lattice row edge nearest to world y.
    pub fn nearest_row_edge(&self, y: f64) -> i64 {
        ((self.anchor_y - y) / self.res_y).round() as i64
    }

    /// Column edges covering `[min_x, max_x]`, snapped outward.
    pub fn column_span(&self, min_x: f64, max_x: f64) -> (i64, i64) {
        (
            ((min_x - self.anchor_x) / self.res_x).floor() as i64,
            ((max_x - self.anchor_x) / self.res_x).ceil() as i64,
        )
    }

    /// Row edges covering `[min_y, max_y]`, snapped outward.
    pub fn row_span(&self, min_y: f64, max_y: f64) -> (i64, i64) {
        (
            ((self.anchor_y - max_y) / self.res_y).floor() as i64,
            ((self.anchor_y - min_y) / self.res_y).ceil() as i64,
        )
    }

    /// World x of the centre of lattice column `col`.
    #[inline]
    pub fn column_centre(&self, col: i64) -> f64 {
        self.anchor_x + (col as f64 + 0.5) * self.res_x
    }

    /// World y of the centre of lattice row `row`.
    #[inline]
    pub fn row_centre(&self, row: i64) -> f64 {
        self.anchor_y - (row as f64 + 0.5) * self.res_y
    }

    /// Transform of a raster whose upper-left pixel is lattice cell (`col0`, `row0`).
    pub fn transform_at(&self, col0: i64, row0: i64) -> GeoTransform {
        GeoTransform::new(
            self.anchor_x + col0 as f64 * self.res_x,
            self.anchor_y - row0 as f64 * self.res_y,
            self.res_x,
            self.res_y,
        )
    }
}

/// A raster placed on a lattice at integer offset (`col0`, `row0`).
///
/// Both the mosaic and the resampled mosaic are grid rasters: the mosaic on
/// its first source's lattice, the resampled mosaic on the canonical one.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRaster {
    pub grid: PixelGrid,
    pub col0: i64,
    pub row0: i64,
    pub raster: Raster,
}

impl GridRaster {
    /// An all-nodata raster covering lattice columns `col0..col0+width` and
    /// rows `row0..row0+height`.
    pub fn filled(
        grid: PixelGrid,
        col0: i64,
        row0: i64,
        width: usize,
        height: usize,
        bands: usize,
        nodata: u8,
    ) -> Self {
        let transform = grid.transform_at(col0, row0);
        Self {
            grid,
            col0,
            row0,
            raster: Raster::filled(width, height, bands, transform, nodata),
        }
    }

    /// Local pixel containing world point (`x`, `y`), if inside the raster.
    #[inline]
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = self.grid.column_of(x) - self.col0;
        let row = self.grid.row_of(y) - self.row0;
        if col < 0 || row < 0 {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        (col < self.raster.width && row < self.raster.height).then_some((col, row))
    }

    /// Samples of the pixel containing (`x`, `y`), if inside the raster.
    #[inline]
    pub fn sample(&self, x: f64, y: f64) -> Option<&[u8]> {
        self.locate(x, y)
            .map(|(col, row)| self.raster.pixel(col, row))
    }

    pub fn bounds(&self) -> BoundingBox {
        self.raster.bounds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_bounds() {
        let t = GeoTransform::new(100.0, 500.0, 0.5, 0.5);
        assert_eq!(t.bounds(10, 4), BoundingBox::new(100.0, 498.0, 105.0, 500.0));
        assert_eq!(t.pixel_centre(0, 0), (100.25, 499.75));
    }

    #[test]
    fn test_canonical_grid_span_snaps_outward() {
        let grid = PixelGrid::canonical(0.5);
        assert_eq!(grid.column_span(-0.9, 10.1), (-2, 21));
        // Rows count southward from y = 0
        assert_eq!(grid.row_span(1.2, 3.3), (-7, -2));
    }

    #[test]
    fn test_grid_raster_locate() {
        let grid = PixelGrid::canonical(1.0);
        let gr = GridRaster::filled(grid, 10, -20, 5, 5, 1, 255);
        assert_eq!(gr.raster.transform.origin_x, 10.0);
        assert_eq!(gr.raster.transform.origin_y, 20.0);
        assert_eq!(gr.locate(10.5, 19.5), Some((0, 0)));
        assert_eq!(gr.locate(14.9, 15.1), Some((4, 4)));
        assert_eq!(gr.locate(15.0, 19.5), None);
        assert_eq!(gr.locate(9.9, 19.5), None);
    }
}
