//! Reading rendered rasters from disk.

use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::debug;

use crate::png::encode_rgb_auto;
use crate::world_file::WorldFile;
use crate::{Raster, RasterError, RasterResult};

/// Files in `dir` whose name ends with `suffix` (ASCII case-insensitive),
/// sorted by file name.
pub fn list_sources(dir: &Path, suffix: &str) -> RasterResult<Vec<PathBuf>> {
    let suffix = suffix.to_ascii_lowercase();
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().to_ascii_lowercase().ends_with(&suffix) {
            paths.push(entry.path());
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Load a PNG and its world-file sidecar.
///
/// Gray sources stay single-band and color sources become RGB. Alpha is
/// dropped; fully transparent pixels become nodata.
pub fn load_georeferenced(path: &Path, nodata: u8) -> RasterResult<Raster> {
    let (sidecar, world) = WorldFile::read_for(path)?;
    let transform = world.to_transform(&sidecar)?;
    let image = image::open(path)?;
    let (width, height) = (image.width() as usize, image.height() as usize);

    let (bands, data) = match image {
        DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
        DynamicImage::ImageLumaA8(buf) => (1, strip_alpha(&buf.into_raw(), 1, nodata)),
        DynamicImage::ImageRgb8(buf) => (3, buf.into_raw()),
        DynamicImage::ImageRgba8(buf) => (3, strip_alpha(&buf.into_raw(), 3, nodata)),
        other => (3, strip_alpha(&other.to_rgba8().into_raw(), 3, nodata)),
    };

    debug!(
        path = %path.display(),
        width = width,
        height = height,
        bands = bands,
        "Loaded rendered raster"
    );

    Raster::from_data(width, height, bands, data, transform, nodata)
}

fn strip_alpha(data: &[u8], color_bands: usize, nodata: u8) -> Vec<u8> {
    let stride = color_bands + 1;
    let mut out = Vec::with_capacity(data.len() / stride * color_bands);
    for px in data.chunks_exact(stride) {
        if px[color_bands] == 0 {
            out.extend(std::iter::repeat(nodata).take(color_bands));
        } else {
            out.extend_from_slice(&px[..color_bands]);
        }
    }
    out
}

/// Write a raster as an RGB PNG with a `.pgw` sidecar.
pub fn save_georeferenced(raster: &Raster, path: &Path) -> RasterResult<()> {
    if raster.bands != 1 && raster.bands != 3 {
        return Err(RasterError::Unsupported(format!(
            "cannot save a {}-band raster",
            raster.bands
        )));
    }
    let rgb = raster.with_bands(3);
    let png = encode_rgb_auto(&rgb.data, rgb.width, rgb.height)?;
    fs::write(path, png)?;
    WorldFile::from_transform(&raster.transform).write_for(path)?;
    Ok(())
}
