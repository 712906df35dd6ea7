//! Dimensional units as vectors of SI base-dimension exponents
//!
//! A [`Unit`] stores one signed exponent per SI base dimension (kg, m, s, A,
//! K, mol, cd) plus a decimal-prefix exponent, so `kJy` and `mJy` share the
//! same dimension but differ in prefix. Units are parsed from compact header
//! strings such as `"W/m2/Hz"` or `"kg m^-1 s^-2"` and can be rendered back
//! with plain or Unicode-superscript exponents.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Mul, MulAssign};
use thiserror::Error;

/// Number of SI base dimensions tracked per unit
pub const NUM_BASE_DIMENSIONS: usize = 7;

/// Symbols of the SI base units, in the order of the exponent vector
const BASE_UNIT_SYMBOLS: [&str; NUM_BASE_DIMENSIONS] = ["kg", "m", "s", "A", "K", "mol", "cd"];

/// Errors that can occur while parsing a unit string
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
    #[error("failed to tokenise unit string '{0}'")]
    Tokenize(String),
    #[error("malformed exponent in unit token '{0}'")]
    BadExponent(String),
}

/// Dimension vectors of the recognised base and derived unit symbols.
///
/// The gram is the lookup key for the mass dimension; `Unit::parse` corrects
/// its prefix by -3 so that `kg` ends up with prefix 0.
static UNIT_MAP: Lazy<BTreeMap<&'static str, [i32; NUM_BASE_DIMENSIONS]>> = Lazy::new(|| {
    let mut map = BTreeMap::new();
    // Base units (kg, m, s, A, K, mol, cd)
    map.insert("g", [1, 0, 0, 0, 0, 0, 0]);
    map.insert("m", [0, 1, 0, 0, 0, 0, 0]);
    map.insert("s", [0, 0, 1, 0, 0, 0, 0]);
    map.insert("A", [0, 0, 0, 1, 0, 0, 0]);
    map.insert("K", [0, 0, 0, 0, 1, 0, 0]);
    map.insert("mol", [0, 0, 0, 0, 0, 1, 0]);
    map.insert("cd", [0, 0, 0, 0, 0, 0, 1]);
    map.insert("lm", [0, 0, 0, 0, 0, 0, 1]);
    // Dimensionless derived units
    map.insert("rad", [0, 0, 0, 0, 0, 0, 0]);
    map.insert("sr", [0, 0, 0, 0, 0, 0, 0]);
    // Derived units
    map.insert("Hz", [0, 0, -1, 0, 0, 0, 0]);
    map.insert("Bq", [0, 0, -1, 0, 0, 0, 0]);
    map.insert("N", [1, 1, -2, 0, 0, 0, 0]);
    map.insert("Pa", [1, -1, -2, 0, 0, 0, 0]);
    map.insert("J", [1, 2, -2, 0, 0, 0, 0]);
    map.insert("W", [1, 2, -3, 0, 0, 0, 0]);
    map.insert("C", [0, 0, 1, 1, 0, 0, 0]);
    map.insert("V", [1, 2, -3, -1, 0, 0, 0]);
    map.insert("F", [-1, -2, 4, 2, 0, 0, 0]);
    map.insert("Ω", [1, 2, -3, -2, 0, 0, 0]);
    map.insert("S", [-1, -2, 3, 2, 0, 0, 0]);
    map.insert("Wb", [1, 2, -2, -1, 0, 0, 0]);
    map.insert("T", [1, 0, -2, -1, 0, 0, 0]);
    map.insert("H", [1, 2, -2, -2, 0, 0, 0]);
    map.insert("lx", [0, -2, 0, 0, 0, 0, 1]);
    map.insert("Gy", [0, 2, -2, 0, 0, 0, 1]);
    map.insert("Sv", [0, 2, -2, 0, 0, 0, 1]);
    map.insert("kat", [0, 0, -1, 0, 0, 1, 0]);
    map
});

/// Decimal exponents of the recognised SI prefixes (empty string = none)
static PREFIX_MAP: Lazy<BTreeMap<&'static str, i32>> = Lazy::new(|| {
    let mut map = BTreeMap::new();
    map.insert("", 0);
    map.insert("da", 1);
    map.insert("h", 2);
    map.insert("k", 3);
    map.insert("M", 6);
    map.insert("G", 9);
    map.insert("T", 12);
    map.insert("P", 15);
    map.insert("E", 18);
    map.insert("Z", 21);
    map.insert("Y", 24);
    map.insert("d", -1);
    map.insert("c", -2);
    map.insert("m", -3);
    map.insert("µ", -6);
    map.insert("n", -9);
    map.insert("p", -12);
    map.insert("f", -15);
    map.insert("a", -18);
    map.insert("z", -21);
    map.insert("y", -24);
    map
});

const SUPERSCRIPT_DIGITS: [&str; 10] = ["⁰", "¹", "²", "³", "⁴", "⁵", "⁶", "⁷", "⁸", "⁹"];

/// Rendering style for [`Unit::print`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFormat {
    /// ASCII exponents, e.g. `kg m^-1 s^-2`
    Plain,
    /// Unicode superscript exponents, e.g. `kg m⁻¹ s⁻²`
    Superscript,
}

/// A physical unit as a vector of SI base-dimension exponents plus a
/// decimal-prefix exponent.
///
/// Equality compares the seven dimension exponents only; two units that
/// differ merely in prefix (e.g. `Jy` vs `mJy`) are considered equal in
/// dimension. The prefix is carried separately so that value conversions
/// can fold it back in via `10^prefix`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unit {
    exponents: [i32; NUM_BASE_DIMENSIONS],
    prefix: i32,
}

impl Unit {
    /// Create a dimensionless unit with no prefix
    pub fn dimensionless() -> Self {
        Self::default()
    }

    /// Parse a unit expression into a `Unit`.
    ///
    /// Tokens are separated by whitespace or `*`; a leading `/` negates the
    /// following token's exponent; `**` and `^` before an integer exponent
    /// are accepted and ignored. An unrecognised token yields
    /// `Err(UnitError::UnknownUnit)`.
    ///
    /// # Examples
    /// ```
    /// use parametrizer::unit::Unit;
    ///
    /// let pressure = Unit::parse("kg m^-1 s^-2").unwrap();
    /// let pascal = Unit::parse("Pa").unwrap();
    /// assert_eq!(pressure, pascal);
    /// ```
    pub fn parse(text: &str) -> Result<Self, UnitError> {
        let mut unit = Unit::dimensionless();

        let cleaned = text.replace("**", "").replace('^', "").replace('*', " ");
        // Reattach division signs to the token they negate.
        let cleaned = cleaned.replace('/', " /");
        let mut normalized = cleaned;
        while normalized.contains("/ ") {
            normalized = normalized.replace("/ ", "/");
        }

        for raw_token in normalized.split_whitespace() {
            let (token, sign) = match raw_token.strip_prefix('/') {
                Some(rest) => (rest, -1),
                None => (raw_token, 1),
            };

            if token.is_empty() {
                return Err(UnitError::Tokenize(text.to_string()));
            }

            // Split the token into a symbol stem and an optional exponent.
            let exp_pos = token
                .char_indices()
                .find(|(_, ch)| ch.is_ascii_digit() || *ch == '+' || *ch == '-')
                .map(|(i, _)| i);

            let (stem, exponent) = match exp_pos {
                Some(pos) => {
                    let exp: i32 = token[pos..]
                        .parse()
                        .map_err(|_| UnitError::BadExponent(token.to_string()))?;
                    (&token[..pos], exp)
                }
                None => (token, 1),
            };

            let exponent = exponent * sign;

            // Unity and zero exponents contribute nothing.
            if exponent == 0 || token == "1" {
                continue;
            }

            let mut matched = false;
            'search: for (symbol, dims) in UNIT_MAP.iter() {
                for (prefix_symbol, prefix_exp) in PREFIX_MAP.iter() {
                    if format!("{prefix_symbol}{symbol}") == stem {
                        // The gram is keyed as 'g' but carries the kg
                        // dimension, so its prefix is shifted by -3.
                        let prefix_exp = if *symbol == "g" {
                            prefix_exp - 3
                        } else {
                            *prefix_exp
                        };

                        for (acc, dim) in unit.exponents.iter_mut().zip(dims.iter()) {
                            *acc += dim * exponent;
                        }
                        unit.prefix += prefix_exp * exponent;

                        matched = true;
                        break 'search;
                    }
                }
            }

            if !matched {
                return Err(UnitError::UnknownUnit(text.to_string()));
            }
        }

        Ok(unit)
    }

    /// True if all seven dimension exponents are zero
    pub fn is_dimensionless(&self) -> bool {
        self.exponents.iter().all(|&e| e == 0)
    }

    /// The decimal-prefix exponent (e.g. 3 for `km`, -3 for `mJy`)
    pub fn prefix(&self) -> i32 {
        self.prefix
    }

    /// The seven SI base-dimension exponents (kg, m, s, A, K, mol, cd)
    pub fn exponents(&self) -> &[i32; NUM_BASE_DIMENSIONS] {
        &self.exponents
    }

    /// Negate all dimension exponents and the prefix (unit of the reciprocal)
    pub fn invert(&mut self) {
        for e in self.exponents.iter_mut() {
            *e = -*e;
        }
        self.prefix = -self.prefix;
    }

    /// Return the inverted unit without modifying `self`
    pub fn inverted(&self) -> Self {
        let mut unit = *self;
        unit.invert();
        unit
    }

    /// Render the unit as a string.
    ///
    /// A non-zero prefix is rendered as a leading power of ten, followed by
    /// one factor per non-zero dimension exponent.
    pub fn print(&self, format: UnitFormat) -> String {
        let mut parts: Vec<String> = Vec::new();

        if self.prefix != 0 {
            parts.push(match format {
                UnitFormat::Plain => format!("10^{}", self.prefix),
                UnitFormat::Superscript => format!("10{}", superscript(self.prefix)),
            });
        }

        for (symbol, &exp) in BASE_UNIT_SYMBOLS.iter().zip(self.exponents.iter()) {
            match exp {
                0 => {}
                1 => parts.push((*symbol).to_string()),
                _ => parts.push(match format {
                    UnitFormat::Plain => format!("{symbol}^{exp}"),
                    UnitFormat::Superscript => format!("{symbol}{}", superscript(exp)),
                }),
            }
        }

        parts.join(" ")
    }
}

fn superscript(value: i32) -> String {
    let mut out = String::new();
    if value < 0 {
        out.push('⁻');
    }
    for byte in value.unsigned_abs().to_string().bytes() {
        out.push_str(SUPERSCRIPT_DIGITS[usize::from(byte - b'0')]);
    }
    out
}

impl PartialEq for Unit {
    /// Dimension equality only; the prefix is not compared
    fn eq(&self, other: &Self) -> bool {
        self.exponents == other.exponents
    }
}

impl Eq for Unit {}

impl MulAssign for Unit {
    fn mul_assign(&mut self, rhs: Self) {
        for (a, b) in self.exponents.iter_mut().zip(rhs.exponents.iter()) {
            *a += b;
        }
        self.prefix += rhs.prefix;
    }
}

impl Mul for Unit {
    type Output = Unit;

    fn mul(mut self, rhs: Self) -> Unit {
        self *= rhs;
        self
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.print(UnitFormat::Plain))
    }
}
