//! Search sub-regions around a source position
//!
//! Both mask optimisation and parametrisation operate on a clipped box
//! around the seed position, sized from the source's recorded bounding box
//! where available and from fixed default radii otherwise.

use crate::cube::{Cube, CubeElement};
use crate::source::Source;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionError {
    #[error("source {0} position ({1}, {2}, {3}) is outside the cube")]
    PositionOutsideCube(u32, f64, f64, f64),
}

/// Inclusive voxel bounds of a search box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRegion {
    pub x1: usize,
    pub x2: usize,
    pub y1: usize,
    pub y2: usize,
    pub z1: usize,
    pub z2: usize,
}

impl SubRegion {
    /// Build the search box for a source.
    ///
    /// The radius along each spatial axis is the recorded bounding-box
    /// extent (`BBOX_*_MAX - BBOX_*_MIN`) when both bounds are defined,
    /// otherwise `default_spatial`. The spectral radius is 0.6 times the
    /// spectral bounding-box extent, or `default_spectral`. The box is
    /// clipped to the cube and fails when the seed position itself lies
    /// outside.
    pub fn around_source<T: CubeElement>(
        source: &Source,
        cube: &Cube<'_, T>,
        default_spatial: i64,
        default_spectral: i64,
    ) -> Result<Self, RegionError> {
        Self::with_radii(source, cube, [None; 3], default_spatial, default_spectral)
    }

    /// Like [`Self::around_source`], with fixed per-axis radii taking
    /// precedence over the bounding box where given
    pub fn with_radii<T: CubeElement>(
        source: &Source,
        cube: &Cube<'_, T>,
        radii: [Option<i64>; 3],
        default_spatial: i64,
        default_spectral: i64,
    ) -> Result<Self, RegionError> {
        let pos_x = source.value_of("X");
        let pos_y = source.value_of("Y");
        let pos_z = source.value_of("Z");

        let nx = cube.size_x() as f64;
        let ny = cube.size_y() as f64;
        let nz = cube.size_z() as f64;

        if !(pos_x >= 0.0 && pos_y >= 0.0 && pos_z >= 0.0)
            || pos_x >= nx
            || pos_y >= ny
            || pos_z >= nz
        {
            return Err(RegionError::PositionOutsideCube(
                source.id(),
                pos_x,
                pos_y,
                pos_z,
            ));
        }

        let radius_x = radii[0].unwrap_or_else(|| {
            Self::spatial_radius(source, "BBOX_X_MIN", "BBOX_X_MAX", default_spatial)
        });
        let radius_y = radii[1].unwrap_or_else(|| {
            Self::spatial_radius(source, "BBOX_Y_MIN", "BBOX_Y_MAX", default_spatial)
        });
        let radius_z = radii[2].unwrap_or_else(|| Self::spectral_radius(source, default_spectral));

        Ok(Self {
            x1: Self::lower(pos_x, radius_x),
            x2: Self::upper(pos_x, radius_x, cube.size_x()),
            y1: Self::lower(pos_y, radius_y),
            y2: Self::upper(pos_y, radius_y, cube.size_y()),
            z1: Self::lower(pos_z, radius_z),
            z2: Self::upper(pos_z, radius_z, cube.size_z()),
        })
    }

    pub fn extent_x(&self) -> usize {
        self.x2 - self.x1 + 1
    }

    pub fn extent_y(&self) -> usize {
        self.y2 - self.y1 + 1
    }

    pub fn extent_z(&self) -> usize {
        self.z2 - self.z1 + 1
    }

    fn spatial_radius(source: &Source, key_min: &str, key_max: &str, default: i64) -> i64 {
        if source.is_defined(key_min) && source.is_defined(key_max) {
            (source.value_of(key_max) - source.value_of(key_min)) as i64
        } else {
            log::warn!(
                "source {}: no bounding box defined; using default spatial search radius",
                source.id()
            );
            default
        }
    }

    fn spectral_radius(source: &Source, default: i64) -> i64 {
        if source.is_defined("BBOX_Z_MIN") && source.is_defined("BBOX_Z_MAX") {
            (0.6 * (source.value_of("BBOX_Z_MAX") - source.value_of("BBOX_Z_MIN"))) as i64
        } else {
            log::warn!(
                "source {}: no bounding box defined; using default spectral search radius",
                source.id()
            );
            default
        }
    }

    fn lower(position: f64, radius: i64) -> usize {
        (position as i64 - radius).max(0) as usize
    }

    fn upper(position: f64, radius: i64, size: usize) -> usize {
        ((position as i64 + radius).max(0) as usize).min(size - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Unit;

    fn seeded_source(x: f64, y: f64, z: f64) -> Source {
        let mut source = Source::new(1, "s");
        source.set_value("X", x, Unit::dimensionless());
        source.set_value("Y", y, Unit::dimensionless());
        source.set_value("Z", z, Unit::dimensionless());
        source
    }

    #[test]
    fn defaults_clip_to_cube() {
        let cube = Cube::<f32>::zeros(20, 20, 20).unwrap();
        let source = seeded_source(10.0, 10.0, 5.0);

        let region = SubRegion::around_source(&source, &cube, 30, 30).unwrap();
        assert_eq!(
            region,
            SubRegion {
                x1: 0,
                x2: 19,
                y1: 0,
                y2: 19,
                z1: 0,
                z2: 19
            }
        );
    }

    #[test]
    fn bounding_box_extent_sets_radius() {
        let cube = Cube::<f32>::zeros(100, 100, 100).unwrap();
        let mut source = seeded_source(50.0, 50.0, 50.0);
        source.set_value("BBOX_X_MIN", 45.0, Unit::dimensionless());
        source.set_value("BBOX_X_MAX", 55.0, Unit::dimensionless());
        source.set_value("BBOX_Y_MIN", 48.0, Unit::dimensionless());
        source.set_value("BBOX_Y_MAX", 52.0, Unit::dimensionless());
        source.set_value("BBOX_Z_MIN", 40.0, Unit::dimensionless());
        source.set_value("BBOX_Z_MAX", 60.0, Unit::dimensionless());

        let region = SubRegion::around_source(&source, &cube, 30, 30).unwrap();
        assert_eq!((region.x1, region.x2), (40, 60));
        assert_eq!((region.y1, region.y2), (46, 54));
        // Spectral radius is 0.6 times the extent of 20
        assert_eq!((region.z1, region.z2), (38, 62));
    }

    #[test]
    fn position_outside_cube_fails() {
        let cube = Cube::<f32>::zeros(10, 10, 10).unwrap();
        let source = seeded_source(10.0, 5.0, 5.0);
        assert!(SubRegion::around_source(&source, &cube, 5, 5).is_err());

        let unseeded = Source::new(2, "no position");
        assert!(SubRegion::around_source(&unseeded, &cube, 5, 5).is_err());
    }
}
