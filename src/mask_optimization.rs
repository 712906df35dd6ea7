//! Mask optimisation by elliptical aperture growth
//!
//! Refines a source's mask footprint: a 2-D moment map of the source's
//! already-masked voxels seeds an ellipse via second-order image moments,
//! the ellipse is grown in fixed steps until the enclosed flux stops
//! increasing, and the final aperture is committed back into the mask cube.
//! Voxels owned by a different source are never claimed.

use ndarray::Array2;
use thiserror::Error;

use crate::cube::Cube;
use crate::ellipse::{Ellipse, EllipseError, MomentAccumulator};
use crate::region::{RegionError, SubRegion};
use crate::source::Source;
use crate::unit::Unit;

const DEFAULT_SPATIAL_RADIUS: i64 = 30;
const DEFAULT_SPECTRAL_RADIUS: i64 = 30;
const MAX_GROWTH_ITERATIONS: u32 = 40;
const INITIAL_ELLIPSE_SIZE: f64 = 2.0;
const ELLIPSE_GROWTH_STEP: f64 = 1.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaskOptimizationError {
    #[error("mask and data cube have different sizes")]
    SizeMismatch,
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error(transparent)]
    Ellipse(#[from] EllipseError),
}

/// Per-source mask refinement.
///
/// Search radii of zero or below select automatic sizing from the source's
/// bounding box (with fixed defaults as fallback).
#[derive(Debug, Clone, Copy)]
pub struct MaskOptimizer {
    search_radius_x: i64,
    search_radius_y: i64,
    search_radius_z: i64,
}

impl Default for MaskOptimizer {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

impl MaskOptimizer {
    pub fn new(search_radius_x: i64, search_radius_y: i64, search_radius_z: i64) -> Self {
        Self {
            search_radius_x,
            search_radius_y,
            search_radius_z,
        }
    }

    /// Optimise one source's mask in place.
    ///
    /// Degenerate growth (fewer than two completed iterations, or the
    /// iteration cap reached) is a warning: the mask is left unchanged and
    /// `Ok` is returned.
    pub fn optimize(
        &self,
        data: &Cube<'_, f32>,
        mask: &mut Cube<'_, i32>,
        source: &mut Source,
    ) -> Result<(), MaskOptimizationError> {
        if !data.same_shape(mask) {
            return Err(MaskOptimizationError::SizeMismatch);
        }

        let radii = [
            (self.search_radius_x > 0).then_some(self.search_radius_x),
            (self.search_radius_y > 0).then_some(self.search_radius_y),
            (self.search_radius_z > 0).then_some(self.search_radius_z),
        ];
        let region = SubRegion::with_radii(
            source,
            data,
            radii,
            DEFAULT_SPATIAL_RADIUS,
            DEFAULT_SPECTRAL_RADIUS,
        )?;

        let moment_map = Self::moment_map(data, mask, source, &region);
        let seed = Self::fit_seed_ellipse(&moment_map, source, &region)?;

        match self.grow_ellipse(data, mask, source, &region, seed) {
            Some(aperture) => {
                self.commit(mask, source, &region, &aperture);
                Ok(())
            }
            None => {
                log::warn!(
                    "source {}: aperture growth failed to converge or flux negative; mask left unchanged",
                    source.id()
                );
                Ok(())
            }
        }
    }

    // Sum this source's masked voxels over the spectral window into a 2-D
    // map. No flux cut-off is applied here; the map seeds the ellipse fit.
    fn moment_map(
        data: &Cube<'_, f32>,
        mask: &Cube<'_, i32>,
        source: &Source,
        region: &SubRegion,
    ) -> Array2<f64> {
        let mut map = Array2::<f64>::zeros((region.extent_x(), region.extent_y()));

        for x in region.x1..=region.x2 {
            for y in region.y1..=region.y2 {
                for z in region.z1..=region.z2 {
                    if mask.get(x, y, z) == source.id() as i32 {
                        map[[x - region.x1, y - region.y1]] += f64::from(data.get(x, y, z));
                    }
                }
            }
        }

        map
    }

    // Second-order moments of the positive moment-map pixels about the seed
    // position, rescaled to the fixed initial aperture size.
    fn fit_seed_ellipse(
        moment_map: &Array2<f64>,
        source: &Source,
        region: &SubRegion,
    ) -> Result<Ellipse, MaskOptimizationError> {
        let pos_x = source.value_of("X");
        let pos_y = source.value_of("Y");
        let mut moments = MomentAccumulator::new();

        for x in region.x1..=region.x2 {
            for y in region.y1..=region.y2 {
                let value = moment_map[[x - region.x1, y - region.y1]];
                if value > 0.0 {
                    moments.add(x as f64 - pos_x, y as f64 - pos_y, value);
                }
            }
        }

        let ellipse = moments.fit()?;
        Ok(ellipse.rescaled(INITIAL_ELLIPSE_SIZE))
    }

    // Grow the aperture until enclosed flux stops increasing, then back off
    // one step. Returns None when the growth never passed a real maximum.
    fn grow_ellipse(
        &self,
        data: &Cube<'_, f32>,
        mask: &Cube<'_, i32>,
        source: &Source,
        region: &SubRegion,
        seed: Ellipse,
    ) -> Option<Ellipse> {
        let mut ellipse = seed;
        let mut iteration = 0u32;
        let mut sum = 0.0f64;
        // Starting from zero discards sources with negative total flux.
        let mut sum_max = 0.0f64;

        while sum >= sum_max && iteration <= MAX_GROWTH_ITERATIONS {
            iteration += 1;

            ellipse.minor += ELLIPSE_GROWTH_STEP * ellipse.minor / ellipse.major;
            ellipse.major += ELLIPSE_GROWTH_STEP;

            sum = Self::enclosed_flux(data, mask, source, region, &ellipse);
            if sum > sum_max {
                sum_max = sum;
            }
        }

        // The maximum occurred one iteration earlier.
        ellipse.minor -= ELLIPSE_GROWTH_STEP * ellipse.minor / ellipse.major;
        ellipse.major -= ELLIPSE_GROWTH_STEP;

        if iteration > MAX_GROWTH_ITERATIONS || iteration <= 1 {
            None
        } else {
            Some(ellipse)
        }
    }

    // Flux of all voxels inside the aperture whose mask value is free or
    // already this source's.
    fn enclosed_flux(
        data: &Cube<'_, f32>,
        mask: &Cube<'_, i32>,
        source: &Source,
        region: &SubRegion,
        ellipse: &Ellipse,
    ) -> f64 {
        let pos_x = source.value_of("X");
        let pos_y = source.value_of("Y");
        let id = source.id() as i32;
        let mut sum = 0.0f64;

        for x in region.x1..=region.x2 {
            for y in region.y1..=region.y2 {
                if !ellipse.contains(x as f64 - pos_x, y as f64 - pos_y) {
                    continue;
                }
                // The full cube is consulted rather than the moment map so
                // that voxels claimed by other sources can be excluded.
                for z in region.z1..=region.z2 {
                    let owner = mask.get(x, y, z);
                    if owner == 0 || owner == id {
                        sum += f64::from(data.get(x, y, z));
                    }
                }
            }
        }

        sum
    }

    fn commit(
        &self,
        mask: &mut Cube<'_, i32>,
        source: &mut Source,
        region: &SubRegion,
        aperture: &Ellipse,
    ) {
        let pos_x = source.value_of("X");
        let pos_y = source.value_of("Y");
        let id = source.id() as i32;
        let mut voxel_count = 0u64;

        for x in region.x1..=region.x2 {
            for y in region.y1..=region.y2 {
                if !aperture.contains(x as f64 - pos_x, y as f64 - pos_y) {
                    continue;
                }
                for z in region.z1..=region.z2 {
                    let owner = mask.get(x, y, z);
                    if owner == 0 || owner == id {
                        // In-region writes cannot fail; the region is clipped.
                        let _ = mask.set(x, y, z, id);
                        voxel_count += 1;

                        Self::widen_bbox(source, "BBOX_X_MIN", "BBOX_X_MAX", x as f64);
                        Self::widen_bbox(source, "BBOX_Y_MIN", "BBOX_Y_MAX", y as f64);
                        Self::widen_bbox(source, "BBOX_Z_MIN", "BBOX_Z_MAX", z as f64);
                    }
                }
            }
        }

        source.set_value("NRvox", voxel_count as f64, Unit::dimensionless());
    }

    fn widen_bbox(source: &mut Source, key_min: &str, key_max: &str, position: f64) {
        if !source.is_defined(key_min) || position < source.value_of(key_min) {
            source.set_value(key_min, position, Unit::dimensionless());
        }
        if !source.is_defined(key_max) || position > source.value_of(key_max) {
            source.set_value(key_max, position, Unit::dimensionless());
        }
    }
}
