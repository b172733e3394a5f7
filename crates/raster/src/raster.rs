//! In-memory multi-band 8-bit raster.

use crate::grid::GeoTransform;
use crate::{RasterError, RasterResult};
use tile_common::BoundingBox;

/// A georeferenced raster with band-interleaved, row-major 8-bit samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    /// `width * height * bands` samples, pixel by pixel
    pub data: Vec<u8>,
    pub transform: GeoTransform,
    pub nodata: u8,
}

impl Raster {
    /// A raster filled entirely with `nodata`.
    pub fn filled(
        width: usize,
        height: usize,
        bands: usize,
        transform: GeoTransform,
        nodata: u8,
    ) -> Self {
        Self {
            width,
            height,
            bands,
            data: vec![nodata; width * height * bands],
            transform,
            nodata,
        }
    }

    /// Wrap existing samples, checking the buffer size.
    pub fn from_data(
        width: usize,
        height: usize,
        bands: usize,
        data: Vec<u8>,
        transform: GeoTransform,
        nodata: u8,
    ) -> RasterResult<Self> {
        if bands == 0 {
            return Err(RasterError::Unsupported("raster has no bands".to_string()));
        }
        let expected = width * height * bands;
        if data.len() != expected {
            return Err(RasterError::DimensionMismatch(format!(
                "expected {} samples for {}x{}x{}, got {}",
                expected,
                width,
                height,
                bands,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            bands,
            data,
            transform,
            nodata,
        })
    }

    #[inline]
    fn offset(&self, col: usize, row: usize) -> usize {
        (row * self.width + col) * self.bands
    }

    /// Samples of the pixel at (`col`, `row`).
    #[inline]
    pub fn pixel(&self, col: usize, row: usize) -> &[u8] {
        let start = self.offset(col, row);
        &self.data[start..start + self.bands]
    }

    /// A pixel is nodata when every band holds the nodata value.
    #[inline]
    pub fn is_nodata(&self, col: usize, row: usize) -> bool {
        self.pixel(col, row).iter().all(|&v| v == self.nodata)
    }

    /// Pixel containing world point (`x`, `y`), if inside the raster.
    #[inline]
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let grid = self.transform.grid();
        let col = grid.column_of(x);
        let row = grid.row_of(y);
        if col < 0 || row < 0 {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        (col < self.width && row < self.height).then_some((col, row))
    }

    /// Number of pixels that are entirely nodata.
    pub fn nodata_count(&self) -> usize {
        self.data
            .chunks_exact(self.bands)
            .filter(|px| px.iter().all(|&v| v == self.nodata))
            .count()
    }

    /// World extent covered by the raster.
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// Convert to `bands` bands. Gray expands by replication; wider rasters
    /// keep their leading bands.
    pub fn with_bands(&self, bands: usize) -> Raster {
        if bands == self.bands {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.width * self.height * bands);
        for px in self.data.chunks_exact(self.bands) {
            for b in 0..bands {
                data.push(if self.bands == 1 { px[0] } else { px[b.min(self.bands - 1)] });
            }
        }
        Raster {
            width: self.width,
            height: self.height,
            bands,
            data,
            transform: self.transform,
            nodata: self.nodata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> GeoTransform {
        GeoTransform::new(0.0, 10.0, 1.0, 1.0)
    }

    #[test]
    fn test_from_data_checks_length() {
        assert!(Raster::from_data(2, 2, 3, vec![0; 12], transform(), 255).is_ok());
        assert!(matches!(
            Raster::from_data(2, 2, 3, vec![0; 11], transform(), 255),
            Err(RasterError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_nodata_requires_every_band() {
        let raster = Raster::from_data(
            2,
            1,
            3,
            vec![255, 255, 255, 255, 0, 255],
            transform(),
            255,
        )
        .unwrap();
        assert!(raster.is_nodata(0, 0));
        assert!(!raster.is_nodata(1, 0));
        assert_eq!(raster.nodata_count(), 1);
    }

    #[test]
    fn test_gray_expands_to_rgb() {
        let raster = Raster::from_data(2, 1, 1, vec![10, 20], transform(), 255).unwrap();
        let rgb = raster.with_bands(3);
        assert_eq!(rgb.data, vec![10, 10, 10, 20, 20, 20]);
    }
}
