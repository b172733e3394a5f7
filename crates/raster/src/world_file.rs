//! ESRI world-file sidecars (`.pgw`).
//!
//! Six lines, in order: `A` (pixel width), `D` and `B` (rotation terms),
//! `E` (pixel height, negative for north-up), `C` and `F` (world
//! coordinates of the centre of the upper-left pixel).

use std::fs;
use std::path::{Path, PathBuf};

use crate::grid::GeoTransform;
use crate::{RasterError, RasterResult};

/// Sidecar extensions tried in order.
const SIDECAR_EXTENSIONS: [&str; 2] = ["pgw", "pngw"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldFile {
    pub a: f64,
    pub d: f64,
    pub b: f64,
    pub e: f64,
    pub c: f64,
    pub f: f64,
}

impl WorldFile {
    pub fn parse(text: &str, path: &Path) -> RasterResult<Self> {
        let invalid = |message: String| RasterError::InvalidWorldFile {
            path: path.to_path_buf(),
            message,
        };

        let values = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse::<f64>()
                    .map_err(|_| invalid(format!("not a number: {:?}", line)))
            })
            .collect::<RasterResult<Vec<f64>>>()?;

        if values.len() != 6 {
            return Err(invalid(format!("expected 6 values, found {}", values.len())));
        }

        Ok(Self {
            a: values[0],
            d: values[1],
            b: values[2],
            e: values[3],
            c: values[4],
            f: values[5],
        })
    }

    pub fn from_transform(transform: &GeoTransform) -> Self {
        Self {
            a: transform.pixel_width,
            d: 0.0,
            b: 0.0,
            e: -transform.pixel_height,
            c: transform.origin_x + transform.pixel_width / 2.0,
            f: transform.origin_y - transform.pixel_height / 2.0,
        }
    }

    /// North-up transform described by this world file.
    pub fn to_transform(&self, path: &Path) -> RasterResult<GeoTransform> {
        let invalid = |message: &str| RasterError::InvalidWorldFile {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        if self.d != 0.0 || self.b != 0.0 {
            return Err(invalid("rotated rasters are not supported"));
        }
        if !(self.a > 0.0 && self.e < 0.0) {
            return Err(invalid("expected positive pixel width and negative pixel height"));
        }

        let pixel_height = -self.e;
        Ok(GeoTransform::new(
            self.c - self.a / 2.0,
            self.f + pixel_height / 2.0,
            self.a,
            pixel_height,
        ))
    }

    pub fn to_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n",
            self.a, self.d, self.b, self.e, self.c, self.f
        )
    }

    /// Read the sidecar of `image_path`.
    pub fn read_for(image_path: &Path) -> RasterResult<(PathBuf, Self)> {
        let sidecar = find_sidecar(image_path)
            .ok_or_else(|| RasterError::MissingWorldFile(image_path.to_path_buf()))?;
        let text = fs::read_to_string(&sidecar)?;
        let world = Self::parse(&text, &sidecar)?;
        Ok((sidecar, world))
    }

    /// Write the `.pgw` sidecar of `image_path`.
    pub fn write_for(&self, image_path: &Path) -> RasterResult<PathBuf> {
        let sidecar = image_path.with_extension(SIDECAR_EXTENSIONS[0]);
        fs::write(&sidecar, self.to_text())?;
        Ok(sidecar)
    }
}

fn find_sidecar(image_path: &Path) -> Option<PathBuf> {
    SIDECAR_EXTENSIONS
        .iter()
        .map(|ext| image_path.with_extension(ext))
        .find(|candidate| candidate.is_file())
}
