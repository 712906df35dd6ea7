//! Source parametrisation
//!
//! Measures one source given the data cube, the mask cube and its seed
//! position: centroid, peak/total/integrated flux, W50/W20/Wm50 line
//! widths, moment-based ellipse shape, local RMS noise and an optional
//! Busy Function fit of the integrated spectrum. All results are written
//! into the source's parameter dictionary under fixed names.
//!
//! Only the initial voxel walk is fatal: every later measurement is
//! best-effort, and a failed step is logged and skipped without touching
//! the source's previous value for that parameter.

use std::f64::consts::PI;
use thiserror::Error;

use crate::busyfit::{BusyFit, BusyFitResult, TroughOrder};
use crate::cube::Cube;
use crate::ellipse::{Ellipse, MomentAccumulator};
use crate::measurement::Measurement;
use crate::metadata::MetaValue;
use crate::region::{RegionError, SubRegion};
use crate::source::Source;
use crate::unit::Unit;

const DEFAULT_SPATIAL_RADIUS: i64 = 50;
const DEFAULT_SPECTRAL_RADIUS: i64 = 50;

/// Fraction of total flux clipped from each end of the profile before the
/// Wm50 mean level is computed
const WM50_FLUX_CLIP: f64 = 0.05;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParametrizationError {
    #[error("mask and data cube have different sizes")]
    SizeMismatch,
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error("no data found for source {0}")]
    NoData(u32),
}

// One source voxel: position plus intensity.
#[derive(Debug, Clone, Copy)]
struct DataPoint {
    x: usize,
    y: usize,
    z: usize,
    value: f64,
}

/// Measurement stage configuration
#[derive(Debug, Clone, Copy)]
pub struct Parametrizer {
    do_busy_fit: bool,
    trough_order: TroughOrder,
}

impl Default for Parametrizer {
    fn default() -> Self {
        Self::new(true, TroughOrder::Parabolic)
    }
}

impl Parametrizer {
    pub fn new(do_busy_fit: bool, trough_order: TroughOrder) -> Self {
        Self {
            do_busy_fit,
            trough_order,
        }
    }

    /// Measure one source and write the results into it.
    ///
    /// Fails without modifying the source when the cubes disagree in shape,
    /// the seed position lies outside the cube, or the mask contains no
    /// voxels for this source.
    pub fn parametrize(
        &self,
        data: &Cube<'_, f32>,
        mask: &Cube<'_, i32>,
        source: &mut Source,
    ) -> Result<(), ParametrizationError> {
        if !data.same_shape(mask) {
            return Err(ParametrizationError::SizeMismatch);
        }

        let region = SubRegion::around_source(
            source,
            data,
            DEFAULT_SPATIAL_RADIUS,
            DEFAULT_SPECTRAL_RADIUS,
        )?;

        // Partition the sub-region into this source's voxels and the local
        // background used for the noise estimate.
        let id = source.id() as i32;
        let mut points = Vec::new();
        let mut background_sum_sq = 0.0f64;
        let mut background_count = 0u64;

        for x in region.x1..=region.x2 {
            for y in region.y1..=region.y2 {
                for z in region.z1..=region.z2 {
                    let owner = mask.get(x, y, z);
                    let value = f64::from(data.get(x, y, z));
                    if owner == id {
                        points.push(DataPoint { x, y, z, value });
                    } else if owner == 0 {
                        background_sum_sq += value * value;
                        background_count += 1;
                    }
                }
            }
        }

        if points.is_empty() {
            return Err(ParametrizationError::NoData(source.id()));
        }

        let rms = if background_count > 0 {
            (background_sum_sq / background_count as f64).sqrt()
        } else {
            log::warn!(
                "source {}: no background voxels in search region; noise estimate unavailable",
                source.id()
            );
            f64::NAN
        };

        let (spectrum, channel_counts) = Self::integrated_spectrum(&points, &region);
        let flux_unit = Self::flux_unit(data);

        // All measurements below are staged and committed together so a
        // failing step leaves the source's previous parameters in place.
        let centroid = Self::measure_centroid(&points, source.id());
        let (peak_flux, total_flux) = Self::measure_peak_and_total(&points);
        let integrated_flux = Self::beam_corrected_flux(data, total_flux);
        let widths = Self::measure_line_widths(&spectrum, source.id());
        let ellipse = Self::measure_ellipse(&points, centroid, source);
        let busy = if self.do_busy_fit {
            self.fit_busy_function(&spectrum, &channel_counts, rms, source.id())
        } else {
            None
        };

        source.set_value("ID", f64::from(source.id()), Unit::dimensionless());

        if let Some((cx, cy, cz)) = centroid {
            source.set_value("X", cx, Unit::dimensionless());
            source.set_value("Y", cy, Unit::dimensionless());
            source.set_value("Z", cz, Unit::dimensionless());
        }

        source.set_value("F_PEAK", peak_flux, flux_unit);
        source.set_value("F_TOT", total_flux, flux_unit);
        source.set_value("F_INT", integrated_flux, flux_unit);

        if let Some((w50, w20, wm50)) = widths {
            source.set_value("W50", w50, Unit::dimensionless());
            source.set_value("W20", w20, Unit::dimensionless());
            source.set_value("Wm50", wm50, Unit::dimensionless());
        }

        if let Some(ellipse) = ellipse {
            source.set_value("ELL_MAJ", ellipse.major, Unit::dimensionless());
            source.set_value("ELL_MIN", ellipse.minor, Unit::dimensionless());
            source.set_value(
                "ELL_PA",
                Self::astronomical_position_angle(ellipse.theta),
                Unit::dimensionless(),
            );
        }

        if rms.is_finite() {
            source.set_value("RMS_CUBE", rms, flux_unit);
        }

        if let Some(result) = busy {
            Self::write_busy_parameters(source, &result);
        }

        Ok(())
    }

    // Sum of the source voxels per spectral channel, plus per-channel voxel
    // counts for the noise weighting.
    fn integrated_spectrum(points: &[DataPoint], region: &SubRegion) -> (Vec<f64>, Vec<u64>) {
        let mut spectrum = vec![0.0f64; region.extent_z()];
        let mut counts = vec![0u64; region.extent_z()];

        for point in points {
            spectrum[point.z - region.z1] += point.value;
            counts[point.z - region.z1] += 1;
        }

        (spectrum, counts)
    }

    // Intensity-weighted mean position over the positive-valued voxels.
    fn measure_centroid(points: &[DataPoint], id: u32) -> Option<(f64, f64, f64)> {
        let mut sum = 0.0;
        let (mut cx, mut cy, mut cz) = (0.0, 0.0, 0.0);

        for point in points.iter().filter(|p| p.value > 0.0) {
            cx += point.value * point.x as f64;
            cy += point.value * point.y as f64;
            cz += point.value * point.z as f64;
            sum += point.value;
        }

        if sum <= 0.0 {
            log::warn!("source {id}: no positive flux; centroid not measured");
            return None;
        }

        Some((cx / sum, cy / sum, cz / sum))
    }

    // Peak and summed flux over all source voxels, negatives included.
    fn measure_peak_and_total(points: &[DataPoint]) -> (f64, f64) {
        let mut peak = f64::NEG_INFINITY;
        let mut total = 0.0;
        for point in points {
            total += point.value;
            peak = peak.max(point.value);
        }
        (peak, total)
    }

    // Integrated flux: total flux times the spectral channel width, divided
    // by the beam solid angle in pixels. Missing header values degrade to
    // an unadjusted measurement with a warning.
    fn beam_corrected_flux(data: &Cube<'_, f32>, total_flux: f64) -> f64 {
        let header = data.header();

        let cdelt3 = match header.get_f64("CDELT3") {
            Ok(value) => value,
            Err(_) => {
                log::warn!("no spectral channel width information; flux not adjusted");
                1.0
            }
        };

        let mut bmaj = (4.0 * 2.0f64.ln() / PI).sqrt();
        let mut bmin = bmaj;
        match header.get_f64("BMAJ") {
            Ok(value) => {
                bmaj = value;
                match header.get_f64("BMIN") {
                    Ok(minor) => bmin = minor,
                    Err(_) => {
                        log::warn!("no beam minor axis information; assuming circular beam");
                        bmin = bmaj;
                    }
                }
            }
            Err(_) => log::warn!("no beam information found; flux not adjusted"),
        }

        let mut cdelt1 = 1.0;
        let mut cdelt2 = 1.0;
        match header.get_f64("CDELT1") {
            Ok(value) => {
                cdelt1 = value.abs();
                match header.get_f64("CDELT2") {
                    Ok(lat) => cdelt2 = lat.abs(),
                    Err(_) => {
                        log::warn!("no latitude pixel size information; assuming square pixels");
                        cdelt2 = cdelt1;
                    }
                }
            }
            Err(_) => log::warn!("no longitude pixel size information; flux not adjusted"),
        }

        // Pixels must be square to within 1% for the beam correction.
        if (cdelt1 - cdelt2).abs() > cdelt1 * 0.01 {
            log::warn!("pixels deviate from square shape by more than 1%; flux not adjusted");
            cdelt1 = 1.0;
        } else {
            cdelt1 = 0.5 * (cdelt1 + cdelt2);
        }

        let mut beam_corr = PI * (bmaj / cdelt1) * (bmin / cdelt1) / (4.0 * 2.0f64.ln());
        if !(0.5..=50.0).contains(&beam_corr) {
            log::warn!(
                "unusual beam correction factor of {beam_corr}; values normally range from about 1 to 20"
            );
        }
        if beam_corr == 0.0 {
            log::warn!("beam correction factor is zero; flux not adjusted");
            beam_corr = 1.0;
        }

        total_flux * cdelt3 / beam_corr
    }

    // W50, W20 and Wm50 in channels, with linearly interpolated threshold
    // crossings.
    fn measure_line_widths(spectrum: &[f64], id: u32) -> Option<(f64, f64, f64)> {
        let max = spectrum.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max <= 0.0 {
            log::warn!("source {id}: spectrum has no positive maximum; line widths not measured");
            return None;
        }

        let w50 = Self::crossing_width(spectrum, 0.5 * max)?;
        let w20 = Self::crossing_width(spectrum, 0.2 * max)?;
        let wm50 = Self::mean_based_width(spectrum, id)?;
        Some((w50, w20, wm50))
    }

    // Distance between the first and last crossings of `threshold`, each
    // interpolated between the two bracketing channels.
    fn crossing_width(spectrum: &[f64], threshold: f64) -> Option<f64> {
        let first = spectrum.iter().position(|&s| s > threshold)?;
        let last = spectrum.iter().rposition(|&s| s > threshold)?;

        let left = if first == 0 {
            0.0
        } else {
            let below = spectrum[first - 1];
            (first - 1) as f64 + (threshold - below) / (spectrum[first] - below)
        };

        let right = if last == spectrum.len() - 1 {
            last as f64
        } else {
            let below = spectrum[last + 1];
            last as f64 + (spectrum[last] - threshold) / (spectrum[last] - below)
        };

        Some(right - left)
    }

    // Width at 50% of the mean flux over the central 90%-flux interval of
    // the profile.
    fn mean_based_width(spectrum: &[f64], id: u32) -> Option<f64> {
        let total: f64 = spectrum.iter().sum();
        if total <= 0.0 {
            log::warn!("source {id}: total flux not positive; Wm50 not measured");
            return None;
        }

        let clip = WM50_FLUX_CLIP * total;
        let mut cumulative = 0.0;
        let mut lo = 0;
        for (i, &value) in spectrum.iter().enumerate() {
            cumulative += value;
            if cumulative > clip {
                lo = i;
                break;
            }
        }
        cumulative = 0.0;
        let mut hi = spectrum.len() - 1;
        for (i, &value) in spectrum.iter().enumerate().rev() {
            cumulative += value;
            if cumulative > clip {
                hi = i;
                break;
            }
        }

        if hi < lo {
            log::warn!("source {id}: degenerate flux interval; Wm50 not measured");
            return None;
        }

        let mean: f64 =
            spectrum[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64;
        if mean <= 0.0 {
            log::warn!("source {id}: mean flux not positive; Wm50 not measured");
            return None;
        }

        Self::crossing_width(spectrum, 0.5 * mean)
    }

    // Moment-based ellipse over the positive source voxels, centred on the
    // measured centroid (seed position when the centroid step failed).
    fn measure_ellipse(
        points: &[DataPoint],
        centroid: Option<(f64, f64, f64)>,
        source: &Source,
    ) -> Option<Ellipse> {
        let (cx, cy) = match centroid {
            Some((cx, cy, _)) => (cx, cy),
            None => (source.value_of("X"), source.value_of("Y")),
        };

        let mut moments = MomentAccumulator::new();
        for point in points.iter().filter(|p| p.value > 0.0) {
            moments.add(point.x as f64 - cx, point.y as f64 - cy, point.value);
        }

        match moments.fit() {
            Ok(ellipse) => Some(ellipse),
            Err(error) => {
                log::warn!("source {}: {error}", source.id());
                None
            }
        }
    }

    /// Position angle in degrees, rotated to the astronomical north-up
    /// convention and wrapped to `[0°, 180°)`
    fn astronomical_position_angle(theta: f64) -> f64 {
        let mut pa = theta.to_degrees() + 90.0;
        pa = pa.rem_euclid(180.0);
        pa
    }

    // Busy Function fit of the integrated spectrum, weighted per channel by
    // sqrt(count) times the local RMS; empty channels get infinite noise
    // and drop out of the fit.
    fn fit_busy_function(
        &self,
        spectrum: &[f64],
        channel_counts: &[u64],
        rms: f64,
        id: u32,
    ) -> Option<BusyFitResult> {
        let sigma: Vec<f64> = channel_counts
            .iter()
            .map(|&count| {
                if count == 0 {
                    f64::INFINITY
                } else if rms.is_finite() && rms > 0.0 {
                    (count as f64).sqrt() * rms
                } else {
                    1.0
                }
            })
            .collect();

        match BusyFit::new(spectrum.to_vec(), sigma, self.trough_order) {
            Ok(fit) => Some(fit.fit()),
            Err(error) => {
                log::warn!("source {id}: Busy Function fit skipped: {error}");
                None
            }
        }
    }

    fn write_busy_parameters(source: &mut Source, result: &BusyFitResult) {
        let names = ["BF_A", "BF_B1", "BF_B2", "BF_C", "BF_XE0", "BF_XP0", "BF_W"];

        source.set_value(
            "BF_FLAG",
            f64::from(result.quality.code()),
            Unit::dimensionless(),
        );
        source.set_value("BF_CHI2", result.reduced_chi2, Unit::dimensionless());

        for (i, name) in names.iter().enumerate() {
            source.set_parameter(Measurement::new(
                name,
                result.params[i],
                result.uncertainties[i],
                Unit::dimensionless(),
            ));
        }

        source.set_value("BF_Z", result.centroid, Unit::dimensionless());
        source.set_value("BF_W20", result.w20, Unit::dimensionless());
        source.set_value("BF_W50", result.w50, Unit::dimensionless());
        source.set_value("BF_F_PEAK", result.peak_flux, Unit::dimensionless());
        source.set_value("BF_F_INT", result.integrated_flux, Unit::dimensionless());
    }

    // Flux unit from the header's BUNIT keyword, dimensionless when absent
    // or unparseable.
    fn flux_unit(data: &Cube<'_, f32>) -> Unit {
        match data.header().get("BUNIT") {
            Some(MetaValue::Str(text)) => match Unit::parse(text) {
                Ok(unit) => unit,
                Err(error) => {
                    log::warn!("cannot parse BUNIT '{text}': {error}");
                    Unit::dimensionless()
                }
            },
            _ => Unit::dimensionless(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seeded_source(id: u32, x: f64, y: f64, z: f64) -> Source {
        let mut source = Source::new(id, "test");
        source.set_value("X", x, Unit::dimensionless());
        source.set_value("Y", y, Unit::dimensionless());
        source.set_value("Z", z, Unit::dimensionless());
        source
    }

    #[test]
    fn single_voxel_source() {
        let mut data = Cube::<f32>::zeros(20, 20, 20).unwrap();
        let mut mask = Cube::<i32>::zeros(20, 20, 20).unwrap();
        data.set(10, 10, 5, 5.0).unwrap();
        mask.set(10, 10, 5, 3).unwrap();

        let mut source = seeded_source(3, 10.0, 10.0, 5.0);
        Parametrizer::new(false, TroughOrder::Parabolic)
            .parametrize(&data, &mask, &mut source)
            .unwrap();

        assert_eq!(source.value_of("F_PEAK"), 5.0);
        assert_eq!(source.value_of("F_TOT"), 5.0);
        assert_eq!(source.value_of("X"), 10.0);
        assert_eq!(source.value_of("Y"), 10.0);
        assert_eq!(source.value_of("Z"), 5.0);
        assert_eq!(source.value_of("ID"), 3.0);
    }

    #[test]
    fn empty_mask_leaves_source_untouched() {
        let data = Cube::<f32>::zeros(20, 20, 20).unwrap();
        let mask = Cube::<i32>::zeros(20, 20, 20).unwrap();

        let mut source = seeded_source(4, 10.0, 10.0, 10.0);
        source.set_value("F_TOT", 123.0, Unit::dimensionless());

        let result = Parametrizer::default().parametrize(&data, &mask, &mut source);
        assert_eq!(result, Err(ParametrizationError::NoData(4)));
        assert_eq!(source.value_of("F_TOT"), 123.0);
        assert_eq!(source.value_of("X"), 10.0);
        assert!(!source.is_defined("W50"));
    }

    #[test]
    fn rectangular_spectrum_widths() {
        // A rectangular profile: W50 must equal the exact channel extent
        // and Wm50 must equal W50. The half-height crossings interpolate to
        // 1.5 and 6.5 on the 0-to-4 step edges.
        let spectrum = vec![0.0, 0.0, 4.0, 4.0, 4.0, 4.0, 4.0, 0.0, 0.0, 0.0];
        let w50 = Parametrizer::crossing_width(&spectrum, 2.0).unwrap();
        assert_relative_eq!(w50, 5.0, epsilon = 1e-12);

        // At 20% of the peak the same edges interpolate to 1.2 and 6.8.
        let w20 = Parametrizer::crossing_width(&spectrum, 0.8).unwrap();
        assert_relative_eq!(w20, 5.6, epsilon = 1e-12);

        let wm50 = Parametrizer::mean_based_width(&spectrum, 1).unwrap();
        assert_relative_eq!(wm50, w50, epsilon = 1e-12);
    }

    #[test]
    fn triangular_spectrum_interpolates() {
        let spectrum = vec![0.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0, 1.0, 0.0];
        // Threshold 2.0 crosses exactly at channels 2 and 6.
        let width = Parametrizer::crossing_width(&spectrum, 2.0).unwrap();
        assert_relative_eq!(width, 4.0, epsilon = 1e-12);

        // Threshold 2.5 crosses halfway between channels.
        let width = Parametrizer::crossing_width(&spectrum, 2.5).unwrap();
        assert_relative_eq!(width, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn position_angle_wrapping() {
        assert_relative_eq!(
            Parametrizer::astronomical_position_angle(0.0),
            90.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            Parametrizer::astronomical_position_angle(PI / 2.0),
            0.0,
            epsilon = 1e-9
        );
        let wrapped = Parametrizer::astronomical_position_angle(-3.0);
        assert!((0.0..180.0).contains(&wrapped));
    }

    #[test]
    fn extended_source_measurements() {
        // Elongated blob along x in a handful of channels.
        let (nx, ny, nz) = (40, 40, 30);
        let mut data = Cube::<f32>::zeros(nx, ny, nz).unwrap();
        let mut mask = Cube::<i32>::zeros(nx, ny, nz).unwrap();

        for x in 10..30 {
            for y in 17..23 {
                for z in 10..20 {
                    data.set(x, y, z, 2.0).unwrap();
                    mask.set(x, y, z, 9).unwrap();
                }
            }
        }

        let mut source = seeded_source(9, 20.0, 20.0, 15.0);
        Parametrizer::new(false, TroughOrder::Parabolic)
            .parametrize(&data, &mask, &mut source)
            .unwrap();

        // Major axis along x, so the astronomical position angle is 90°.
        assert!(source.value_of("ELL_MAJ") > source.value_of("ELL_MIN"));
        assert_relative_eq!(source.value_of("ELL_PA"), 90.0, epsilon = 1.0);

        // Rectangular spectral profile of 10 channels.
        assert_relative_eq!(source.value_of("W50"), 10.0, epsilon = 1e-9);
        assert_relative_eq!(source.value_of("Wm50"), source.value_of("W50"), epsilon = 1e-9);
        assert!(source.is_defined("RMS_CUBE"));
        assert_eq!(source.value_of("RMS_CUBE"), 0.0);
    }

    #[test]
    fn flux_adjustment_uses_header() {
        let mut data = Cube::<f32>::zeros(20, 20, 20).unwrap();
        let mut mask = Cube::<i32>::zeros(20, 20, 20).unwrap();
        data.set(10, 10, 5, 6.0).unwrap();
        mask.set(10, 10, 5, 1).unwrap();

        data.header_mut().set("CDELT3", 2.0);
        data.header_mut().set("BUNIT", "Jy");

        let mut source = seeded_source(1, 10.0, 10.0, 5.0);
        Parametrizer::new(false, TroughOrder::Parabolic)
            .parametrize(&data, &mask, &mut source)
            .unwrap();

        // Total flux 6 times channel width 2, default beam correction 1.
        assert_relative_eq!(source.value_of("F_INT"), 12.0, epsilon = 1e-9);
    }
}
