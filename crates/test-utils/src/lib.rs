//! Test support for the tile pipeline crates.
//!
//! [`fixtures`] holds the deployed tile scheme, chunk origins and lease
//! bodies; [`generators`] writes synthetic georeferenced rasters and
//! renderer outputs to disk.

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;

/// Assert two world coordinates or resolutions agree within `epsilon`.
///
/// Rasters georeferenced through world files pick up float noise from the
/// centre-to-corner shift, so exact comparison is too strict for them.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "values differ by more than {}: left {}, right {} (diff {})",
                epsilon, left, right, diff
            );
        }
    }};
}

/// [`assert_approx_eq!`] over an `(x, y)` pair.
#[macro_export]
macro_rules! assert_coords_approx_eq {
    (($x1:expr, $y1:expr), ($x2:expr, $y2:expr), $epsilon:expr) => {{
        $crate::assert_approx_eq!($x1, $x2, $epsilon);
        $crate::assert_approx_eq!($y1, $y2, $epsilon);
    }};
}
