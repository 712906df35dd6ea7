//! Moment-based ellipse fitting
//!
//! Closed-form eigen-solution of the second-order image moments, used by
//! mask optimisation (aperture seed) and parametrisation (shape output).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EllipseError {
    #[error("no positive flux found; cannot fit ellipse")]
    NoPositiveFlux,
}

/// Accumulator for flux-weighted second-order moments about a fixed centre
#[derive(Debug, Clone, Copy, Default)]
pub struct MomentAccumulator {
    mom_x: f64,
    mom_y: f64,
    mom_xy: f64,
    sum: f64,
}

impl MomentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one positively-weighted sample at offset `(dx, dy)` from the centre
    pub fn add(&mut self, dx: f64, dy: f64, weight: f64) {
        self.mom_x += dx * dx * weight;
        self.mom_y += dy * dy * weight;
        self.mom_xy += dx * dy * weight;
        self.sum += weight;
    }

    pub fn total_weight(&self) -> f64 {
        self.sum
    }

    /// Solve for the ellipse; fails when no positive weight was accumulated
    pub fn fit(&self) -> Result<Ellipse, EllipseError> {
        if self.sum <= 0.0 {
            return Err(EllipseError::NoPositiveFlux);
        }

        let mom_x = self.mom_x / self.sum;
        let mom_y = self.mom_y / self.sum;
        let mom_xy = self.mom_xy / self.sum;

        let theta = 0.5 * (2.0 * mom_xy).atan2(mom_x - mom_y);
        let discriminant =
            ((mom_x - mom_y) * (mom_x - mom_y) + 4.0 * mom_xy * mom_xy).sqrt();
        let major = (2.0 * (mom_x + mom_y + discriminant)).sqrt();
        let minor = (2.0 * (mom_x + mom_y - discriminant)).sqrt();

        Ok(Ellipse {
            major,
            minor,
            theta,
        })
    }
}

/// An ellipse centred on a source position: semi-major and semi-minor axes
/// in pixels and position angle in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    pub major: f64,
    pub minor: f64,
    pub theta: f64,
}

impl Ellipse {
    /// Ellipse radius at position angle `phi` (measured against the ellipse
    /// orientation): `r(φ) = ab / sqrt(a²sin²φ + b²cos²φ)`
    pub fn radius_at(&self, phi: f64) -> f64 {
        let (sin_phi, cos_phi) = phi.sin_cos();
        self.major * self.minor
            / (self.major * self.major * sin_phi * sin_phi
                + self.minor * self.minor * cos_phi * cos_phi)
                .sqrt()
    }

    /// Whether the offset `(dx, dy)` from the ellipse centre lies inside
    pub fn contains(&self, dx: f64, dy: f64) -> bool {
        let phi = dy.atan2(dx) - self.theta;
        let radius = self.radius_at(phi);
        dx * dx + dy * dy <= radius * radius
    }

    /// Rescale to semi-major axis `size`, preserving the axis ratio
    pub fn rescaled(&self, size: f64) -> Ellipse {
        Ellipse {
            major: size,
            minor: size * self.minor / self.major,
            theta: self.theta,
        }
    }
}
