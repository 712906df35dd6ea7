//! Named physical measurements: value ± uncertainty with an attached [`Unit`]
//!
//! Arithmetic propagates uncertainties to first order and refuses
//! dimensionally incompatible additions. A fixed conversion table maps a set
//! of common non-SI astronomical units (Jansky, arcsec, parsec, ...) to
//! their SI magnitude and unit string, so values can be stored in SI and
//! exported back.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::ops::{Div, Mul, Neg};
use thiserror::Error;

use crate::unit::{Unit, UnitError, UnitFormat};

/// Errors that can occur on measurement operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasurementError {
    #[error("cannot combine measurements; dimensions differ")]
    DimensionMismatch,
    #[error("cannot convert measurement; target dimension differs")]
    ConversionMismatch,
    #[error("value is zero; cannot invert")]
    ZeroValue,
    #[error(transparent)]
    Unit(#[from] UnitError),
}

/// Common non-SI units with fixed SI conversion factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStandard {
    Jansky,
    MilliJansky,
    Degree,
    Arcmin,
    Arcsec,
    Mas,
    Gauss,
    Parsec,
    Kiloparsec,
    Megaparsec,
    LightYear,
    AstronomicalUnit,
    Minute,
    Hour,
    Year,
    Erg,
    Dyne,
    SpeedOfLight,
    ElementaryCharge,
    None,
}

/// SI magnitude factor and SI unit string for each [`UnitStandard`]
static CONVERSION_TABLE: Lazy<HashMap<UnitStandard, (f64, &'static str)>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(UnitStandard::Jansky, (1.0e-26, "W/m2/Hz"));
    map.insert(UnitStandard::MilliJansky, (1.0e-29, "W/m2/Hz"));
    map.insert(UnitStandard::Degree, (PI / 180.0, "rad"));
    map.insert(UnitStandard::Arcmin, (PI / 1.08e+4, "rad"));
    map.insert(UnitStandard::Arcsec, (PI / 6.48e+5, "rad"));
    map.insert(UnitStandard::Mas, (PI / 6.48e+8, "rad"));
    map.insert(UnitStandard::Gauss, (1.0e-4, "T"));
    map.insert(UnitStandard::Parsec, (3.0856775814671900e+16, "m"));
    map.insert(UnitStandard::Kiloparsec, (3.0856775814671900e+19, "m"));
    map.insert(UnitStandard::Megaparsec, (3.0856775814671900e+22, "m"));
    map.insert(UnitStandard::LightYear, (9.460730472580800e+15, "m"));
    map.insert(UnitStandard::AstronomicalUnit, (1.49597870700e+11, "m"));
    map.insert(UnitStandard::Minute, (60.0, "s"));
    map.insert(UnitStandard::Hour, (3600.0, "s"));
    map.insert(UnitStandard::Year, (3.1557600e+7, "s"));
    map.insert(UnitStandard::Erg, (1.0e-7, "J"));
    map.insert(UnitStandard::Dyne, (1.0e-5, "N"));
    map.insert(UnitStandard::SpeedOfLight, (299792458.0, "m/s"));
    map.insert(UnitStandard::ElementaryCharge, (1.602176565e-19, "C"));
    map.insert(UnitStandard::None, (1.0, ""));
    map
});

/// A named scalar value with uncertainty and unit.
///
/// The uncertainty is normalised to be non-negative on every assignment.
///
/// # Examples
/// ```
/// use parametrizer::measurement::Measurement;
///
/// let flux = Measurement::with_unit("F_PEAK", 2.5, 0.1, "W/m2/Hz").unwrap();
/// let doubled = flux.clone() * flux;
/// assert!(doubled.value() > 6.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Measurement {
    name: String,
    value: f64,
    uncertainty: f64,
    unit: Unit,
}

impl Measurement {
    /// Create a measurement with an explicit [`Unit`]
    pub fn new(name: &str, value: f64, uncertainty: f64, unit: Unit) -> Self {
        Self {
            name: name.to_string(),
            value,
            uncertainty: uncertainty.abs(),
            unit,
        }
    }

    /// Create a dimensionless measurement
    pub fn dimensionless(name: &str, value: f64, uncertainty: f64) -> Self {
        Self::new(name, value, uncertainty, Unit::dimensionless())
    }

    /// Create a measurement, parsing the unit from a string
    pub fn with_unit(
        name: &str,
        value: f64,
        uncertainty: f64,
        unit: &str,
    ) -> Result<Self, MeasurementError> {
        Ok(Self::new(name, value, uncertainty, Unit::parse(unit)?))
    }

    /// Create a measurement given in a non-SI unit, storing it in SI.
    ///
    /// The value and uncertainty are multiplied by the standard's SI
    /// magnitude factor and the unit is set to the standard's SI unit.
    pub fn from_standard(
        name: &str,
        value: f64,
        uncertainty: f64,
        standard: UnitStandard,
    ) -> Result<Self, MeasurementError> {
        let (factor, unit_str) = CONVERSION_TABLE[&standard];
        Ok(Self::new(
            name,
            value * factor,
            uncertainty.abs() * factor,
            Unit::parse(unit_str)?,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn uncertainty(&self) -> f64 {
        self.uncertainty
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    pub fn set_uncertainty(&mut self, uncertainty: f64) {
        self.uncertainty = uncertainty.abs();
    }

    pub fn set_unit(&mut self, unit: Unit) {
        self.unit = unit;
    }

    /// Express the measurement in a non-SI unit.
    ///
    /// Fails when the measurement's dimension differs from the standard's.
    /// The stored prefix is folded into the returned magnitude.
    pub fn convert(&self, standard: UnitStandard) -> Result<(f64, f64), MeasurementError> {
        let (factor, unit_str) = CONVERSION_TABLE[&standard];
        let target = Unit::parse(unit_str)?;

        if self.unit != target {
            return Err(MeasurementError::ConversionMismatch);
        }

        let scale = 10.0_f64.powi(self.unit.prefix()) / factor;
        Ok((self.value * scale, self.uncertainty * scale))
    }

    /// Replace the measurement by its reciprocal, propagating uncertainty
    pub fn invert(&mut self) -> Result<(), MeasurementError> {
        if self.value == 0.0 {
            return Err(MeasurementError::ZeroValue);
        }

        self.uncertainty /= self.value * self.value;
        self.value = 1.0 / self.value;
        self.unit.invert();
        Ok(())
    }

    /// Add a measurement of the same dimension.
    ///
    /// The right-hand value is rescaled to this measurement's prefix;
    /// uncertainties add in quadrature. Name and unit are kept.
    pub fn try_add(&self, rhs: &Measurement) -> Result<Measurement, MeasurementError> {
        if self.unit != rhs.unit {
            return Err(MeasurementError::DimensionMismatch);
        }

        let rescale = 10.0_f64.powi(rhs.unit.prefix() - self.unit.prefix());
        let unc_rhs = rhs.uncertainty * rescale;

        Ok(Measurement {
            name: self.name.clone(),
            value: self.value + rhs.value * rescale,
            uncertainty: (self.uncertainty * self.uncertainty + unc_rhs * unc_rhs).sqrt(),
            unit: self.unit,
        })
    }

    /// Subtract a measurement of the same dimension (see [`Self::try_add`])
    pub fn try_sub(&self, rhs: &Measurement) -> Result<Measurement, MeasurementError> {
        self.try_add(&-rhs.clone())
    }

    /// Render the measurement as `value ± uncertainty unit`
    pub fn print(&self, format: UnitFormat) -> String {
        let mut out = format!("{} = {}", self.name, self.value);
        if self.uncertainty != 0.0 {
            out.push_str(&format!(" ± {}", self.uncertainty));
        }
        if !self.unit.is_dimensionless() || self.unit.prefix() != 0 {
            if self.unit.prefix() == 0 {
                out.push_str(&format!(" {}", self.unit.print(format)));
            } else {
                out.push_str(&format!(" × {}", self.unit.print(format)));
            }
        }
        out
    }
}

impl Mul for Measurement {
    type Output = Measurement;

    /// Multiply two measurements: `σ(ab) = sqrt(b²σa² + a²σb²)`
    fn mul(self, rhs: Measurement) -> Measurement {
        let uncertainty = (rhs.value * rhs.value * self.uncertainty * self.uncertainty
            + self.value * self.value * rhs.uncertainty * rhs.uncertainty)
            .sqrt();

        Measurement {
            name: format!("{} × {}", self.name, rhs.name),
            value: self.value * rhs.value,
            uncertainty,
            unit: self.unit * rhs.unit,
        }
    }
}

impl Div for Measurement {
    type Output = Result<Measurement, MeasurementError>;

    /// Divide two measurements; fails when the divisor's value is zero
    fn div(self, rhs: Measurement) -> Result<Measurement, MeasurementError> {
        let mut divisor = rhs;
        divisor.invert().map_err(|_| MeasurementError::ZeroValue)?;
        Ok(self * divisor)
    }
}

impl Neg for Measurement {
    type Output = Measurement;

    fn neg(mut self) -> Measurement {
        self.value = -self.value;
        self
    }
}

impl PartialEq for Measurement {
    /// Value equality after folding in the prefix, on equal dimensions
    fn eq(&self, other: &Self) -> bool {
        self.unit == other.unit
            && self.value * 10.0_f64.powi(self.unit.prefix())
                == other.value * 10.0_f64.powi(other.unit.prefix())
    }
}

impl PartialOrd for Measurement {
    /// Ordering is only defined between equal dimensions
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.unit != other.unit {
            return None;
        }
        let lhs = self.value * 10.0_f64.powi(self.unit.prefix());
        let rhs = other.value * 10.0_f64.powi(other.unit.prefix());
        lhs.partial_cmp(&rhs)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.print(UnitFormat::Plain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uncertainty_normalized_non_negative() {
        let m = Measurement::dimensionless("x", 1.0, -0.5);
        assert_eq!(m.uncertainty(), 0.5);

        let mut m = Measurement::dimensionless("x", 1.0, 0.1);
        m.set_uncertainty(-0.2);
        assert_eq!(m.uncertainty(), 0.2);
    }

    #[test]
    fn add_then_sub_recovers_value() {
        let a = Measurement::with_unit("a", 3.25, 0.1, "m/s").unwrap();
        let b = Measurement::with_unit("b", 1.75, 0.2, "m/s").unwrap();

        let sum = a.try_add(&b).unwrap();
        let back = sum.try_sub(&b).unwrap();
        assert_relative_eq!(back.value(), a.value(), epsilon = 1e-12);
    }

    #[test]
    fn add_rejects_dimension_mismatch() {
        let a = Measurement::with_unit("a", 1.0, 0.0, "m").unwrap();
        let b = Measurement::with_unit("b", 1.0, 0.0, "s").unwrap();
        assert_eq!(a.try_add(&b), Err(MeasurementError::DimensionMismatch));
    }

    #[test]
    fn product_uncertainty_propagation() {
        let a = Measurement::with_unit("a", 2.0, 0.3, "m").unwrap();
        let b = Measurement::with_unit("b", 5.0, 0.4, "s").unwrap();

        let product = a * b;
        let expected = (5.0_f64 * 5.0 * 0.3 * 0.3 + 2.0 * 2.0 * 0.4 * 0.4).sqrt();
        assert_relative_eq!(product.uncertainty(), expected, epsilon = 1e-12);
        assert_eq!(product.unit(), &Unit::parse("m s").unwrap());
    }

    #[test]
    fn prefix_rescaling_in_addition() {
        // 1 km + 500 m = 1.5 km
        let a = Measurement::with_unit("a", 1.0, 0.0, "km").unwrap();
        let b = Measurement::with_unit("b", 500.0, 0.0, "m").unwrap();

        let sum = a.try_add(&b).unwrap();
        assert_relative_eq!(sum.value(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn jansky_round_trip() {
        let m = Measurement::from_standard("F", 2.0, 0.1, UnitStandard::Jansky).unwrap();
        assert_relative_eq!(m.value(), 2.0e-26, epsilon = 1e-38);

        let (value, uncertainty) = m.convert(UnitStandard::Jansky).unwrap();
        assert_relative_eq!(value, 2.0, epsilon = 1e-12);
        assert_relative_eq!(uncertainty, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn convert_rejects_wrong_dimension() {
        let m = Measurement::with_unit("x", 1.0, 0.0, "m").unwrap();
        assert_eq!(
            m.convert(UnitStandard::Jansky),
            Err(MeasurementError::ConversionMismatch)
        );
    }

    #[test]
    fn invert_propagates_uncertainty() {
        let mut m = Measurement::with_unit("x", 4.0, 0.8, "s").unwrap();
        m.invert().unwrap();
        assert_relative_eq!(m.value(), 0.25, epsilon = 1e-12);
        assert_relative_eq!(m.uncertainty(), 0.8 / 16.0, epsilon = 1e-12);
        assert_eq!(m.unit(), &Unit::parse("Hz").unwrap());

        let mut zero = Measurement::dimensionless("z", 0.0, 0.0);
        assert_eq!(zero.invert(), Err(MeasurementError::ZeroValue));
    }

    #[test]
    fn division_by_zero_fails() {
        let a = Measurement::dimensionless("a", 1.0, 0.0);
        let b = Measurement::dimensionless("b", 0.0, 0.0);
        assert!((a / b).is_err());
    }

    #[test]
    fn ordering_requires_equal_dimension() {
        let a = Measurement::with_unit("a", 1.0, 0.0, "m").unwrap();
        let b = Measurement::with_unit("b", 2.0, 0.0, "m").unwrap();
        let c = Measurement::with_unit("c", 2.0, 0.0, "s").unwrap();

        assert!(a < b);
        assert_eq!(a.partial_cmp(&c), None);
    }
}
