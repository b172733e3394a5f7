//! Synthetic georeferenced rasters for assembler and pipeline tests.
//!
//! Rasters are written the way the terrain renderer writes them: a PNG next
//! to an ESRI world file (`.pgw`) whose `C`/`F` lines hold the centre of the
//! upper-left pixel.

use std::fs;
use std::path::{Path, PathBuf};

/// Deterministic RGB value for a pixel.
///
/// No channel ever reaches 255, so pattern pixels are never mistaken for
/// nodata.
///
/// # Example
///
/// ```
/// use test_utils::pattern_rgb;
///
/// assert_eq!(pattern_rgb(0, 0), [0, 0, 0]);
/// assert_eq!(pattern_rgb(251, 0), [0, 10, 36]);
/// ```
pub fn pattern_rgb(col: usize, row: usize) -> [u8; 3] {
    [
        (col % 251) as u8,
        ((col + row * 7) % 241) as u8,
        ((col * 3 + row) % 239) as u8,
    ]
}

/// An RGB or gray raster with a north-up transform.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticRaster {
    pub width: usize,
    pub height: usize,
    /// 1 (gray) or 3 (RGB)
    pub bands: usize,
    /// Upper-left corner of the upper-left pixel
    pub origin_x: f64,
    pub origin_y: f64,
    pub res: f64,
    pub data: Vec<u8>,
}

impl SyntheticRaster {
    /// RGB raster filled with [`pattern_rgb`].
    pub fn pattern(width: usize, height: usize, origin_x: f64, origin_y: f64, res: f64) -> Self {
        let mut data = Vec::with_capacity(width * height * 3);
        for row in 0..height {
            for col in 0..width {
                data.extend_from_slice(&pattern_rgb(col, row));
            }
        }
        Self {
            width,
            height,
            bands: 3,
            origin_x,
            origin_y,
            res,
            data,
        }
    }

    /// RGB raster of one color.
    pub fn solid(
        width: usize,
        height: usize,
        origin_x: f64,
        origin_y: f64,
        res: f64,
        rgb: [u8; 3],
    ) -> Self {
        let data = rgb.iter().copied().cycle().take(width * height * 3).collect();
        Self {
            width,
            height,
            bands: 3,
            origin_x,
            origin_y,
            res,
            data,
        }
    }

    /// Solid raster covering at least `[min_x, max_x] x [min_y, max_y]`,
    /// anchored at the upper-left corner.
    pub fn covering(min_x: f64, min_y: f64, max_x: f64, max_y: f64, res: f64, rgb: [u8; 3]) -> Self {
        let width = ((max_x - min_x) / res).ceil() as usize;
        let height = ((max_y - min_y) / res).ceil() as usize;
        Self::solid(width, height, min_x, max_y, res, rgb)
    }

    /// Single-band raster of one gray level.
    pub fn gray(width: usize, height: usize, origin_x: f64, origin_y: f64, res: f64, level: u8) -> Self {
        Self {
            width,
            height,
            bands: 1,
            origin_x,
            origin_y,
            res,
            data: vec![level; width * height],
        }
    }

    /// `(min_x, min_y, max_x, max_y)` covered by the raster.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.origin_x,
            self.origin_y - self.height as f64 * self.res,
            self.origin_x + self.width as f64 * self.res,
            self.origin_y,
        )
    }

    /// World-file text (`A D B E C F`).
    pub fn world_file_text(&self) -> String {
        format!(
            "{}\n0\n0\n{}\n{}\n{}\n",
            self.res,
            -self.res,
            self.origin_x + self.res / 2.0,
            self.origin_y - self.res / 2.0
        )
    }

    /// Write `{dir}/{name}` as PNG plus a `.pgw` sidecar; returns the PNG path.
    pub fn write_png(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let color = if self.bands == 1 {
            image::ColorType::L8
        } else {
            image::ColorType::Rgb8
        };
        image::save_buffer_with_format(
            &path,
            &self.data,
            self.width as u32,
            self.height as u32,
            color,
            image::ImageFormat::Png,
        )
        .expect("write synthetic png");
        fs::write(path.with_extension("pgw"), self.world_file_text()).expect("write world file");
        path
    }
}

/// Create `count` empty files named `{stem}{i}{suffix}` in `dir`.
pub fn touch_files(dir: &Path, stem: &str, suffix: &str, count: usize) -> Vec<PathBuf> {
    fs::create_dir_all(dir).expect("create dir");
    (0..count)
        .map(|i| {
            let path = dir.join(format!("{}{}{}", stem, i, suffix));
            fs::write(&path, b"").expect("touch file");
            path
        })
        .collect()
}

/// Number of files in `dir` whose name ends with `suffix`.
pub fn count_files_with_suffix(dir: &Path, suffix: &str) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().ends_with(suffix))
                .count()
        })
        .unwrap_or(0)
}
