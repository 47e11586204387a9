//! Per-tile pixel to sky transforms.
//!
//! The calibration stages only ever compose transforms: project pixels, shift,
//! rotate about a pivot, left-multiply the linear part and add distortion
//! terms. [`TileTransform`] is that surface; [`TanTransform`] is the gnomonic
//! implementation used by the binary and the tests.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::rotation::ShiftRotation;


/// Opaque pixel to sky mapping of one detector tile.
///
/// Every update returns a new transform; the receiver is left untouched.
pub trait TileTransform: Clone + Send + Sync {
    /// Sky position (RA, Dec degrees) of a pixel.
    fn project_to_sky(&self, pixel: DVec2) -> DVec2;

    /// Moves the projection by (ΔRA, ΔDec) degrees, ΔRA unscaled.
    fn apply_shift(&self, delta: DVec2) -> Self;

    /// Rotates the projection by `angle` degrees about `pivot`, with the same
    /// convention as [`ShiftRotation::apply`].
    fn apply_rotation(&self, angle: f64, pivot: DVec2) -> Self;

    /// Left-multiplies the linear pixel to intermediate mapping by `matrix`.
    fn apply_linear(&self, matrix: [[f64; 2]; 2]) -> Self;

    /// Adds to the quadratic distortion coefficients of each intermediate
    /// axis, ordered `[xi², xi·eta, eta²]`, in 1/degree.
    fn update_distortion(&self, dxi: [f64; 3], deta: [f64; 3]) -> Self;
}

/// One detector tile of a mosaic camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile<T> {
    pub id: i64,
    pub transform: T,
    /// Guide and focus sensors are carried but never fit or reported.
    #[serde(default = "science_default")]
    pub is_science: bool,
}

fn science_default() -> bool {
    true
}

impl<T> Tile<T> {
    pub fn science(id: i64, transform: T) -> Self {
        Self {
            id,
            transform,
            is_science: true,
        }
    }

    pub fn auxiliary(id: i64, transform: T) -> Self {
        Self {
            id,
            transform,
            is_science: false,
        }
    }
}

/// Gnomonic (TAN) projection with a CD matrix and quadratic distortion.
///
/// Pixel offsets from `crpix` are mapped through `cd` to intermediate
/// coordinates (xi, eta) in degrees, the distortion polynomial is added, and
/// the result is deprojected about `crval`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TanTransform {
    pub crpix: DVec2,
    pub crval: DVec2,
    /// Degrees per pixel.
    pub cd: [[f64; 2]; 2],
    /// `[xi², xi·eta, eta²]` coefficients for xi and for eta.
    #[serde(default)]
    pub distortion: [[f64; 3]; 2],
}

impl TanTransform {
    pub fn new(crpix: DVec2, crval: DVec2, cd: [[f64; 2]; 2]) -> Self {
        Self {
            crpix,
            crval,
            cd,
            distortion: [[0.0; 3]; 2],
        }
    }

    /// Intermediate coordinates (degrees) of a pixel, distortion included.
    pub fn intermediate(&self, pixel: DVec2) -> DVec2 {
        let d = pixel - self.crpix;
        let linear = DVec2::new(
            self.cd[0][0] * d.x + self.cd[0][1] * d.y,
            self.cd[1][0] * d.x + self.cd[1][1] * d.y,
        );
        linear + self.distortion_at(linear)
    }

    fn distortion_at(&self, p: DVec2) -> DVec2 {
        let terms = [p.x * p.x, p.x * p.y, p.y * p.y];
        let [a, b] = self.distortion;
        DVec2::new(
            a[0] * terms[0] + a[1] * terms[1] + a[2] * terms[2],
            b[0] * terms[0] + b[1] * terms[1] + b[2] * terms[2],
        )
    }

    /// Inverse of [`TileTransform::project_to_sky`].
    ///
    /// The distortion is inverted by fixed-point iteration, which converges
    /// for the small corrections a calibration produces.
    pub fn sky_to_pixel(&self, sky: DVec2) -> DVec2 {
        let ra = sky.x.to_radians();
        let dec = sky.y.to_radians();
        let ra0 = self.crval.x.to_radians();
        let dec0 = self.crval.y.to_radians();

        let (sin_dec, cos_dec) = dec.sin_cos();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let (sin_dra, cos_dra) = (ra - ra0).sin_cos();

        let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        let distorted = DVec2::new(
            (cos_dec * sin_dra / denom).to_degrees(),
            ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / denom).to_degrees(),
        );

        let mut linear = distorted;
        for _ in 0..8 {
            linear = distorted - self.distortion_at(linear);
        }

        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        debug_assert!(det.abs() > 1e-15, "CD matrix is singular (det = {})", det);
        let dx = (self.cd[1][1] * linear.x - self.cd[0][1] * linear.y) / det;
        let dy = (-self.cd[1][0] * linear.x + self.cd[0][0] * linear.y) / det;
        self.crpix + DVec2::new(dx, dy)
    }
}

impl TileTransform for TanTransform {
    fn project_to_sky(&self, pixel: DVec2) -> DVec2 {
        let p = self.intermediate(pixel);
        let xi = p.x.to_radians();
        let eta = p.y.to_radians();

        let ra0 = self.crval.x.to_radians();
        let (sin_dec0, cos_dec0) = self.crval.y.to_radians().sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = (ra0 + xi.atan2(denom)).to_degrees().rem_euclid(360.0);
        let dec = (sin_dec0 + eta * cos_dec0).atan2(xi.hypot(denom));
        DVec2::new(ra, dec.to_degrees())
    }

    fn apply_shift(&self, delta: DVec2) -> Self {
        Self {
            crval: self.crval + delta,
            ..*self
        }
    }

    fn apply_rotation(&self, angle: f64, pivot: DVec2) -> Self {
        let crval = ShiftRotation::rotation(angle).apply(self.crval, pivot);
        let (sin_a, cos_a) = angle.to_radians().sin_cos();
        Self {
            crval,
            ..self.apply_linear([[cos_a, -sin_a], [sin_a, cos_a]])
        }
    }

    fn apply_linear(&self, m: [[f64; 2]; 2]) -> Self {
        let cd = self.cd;
        Self {
            cd: [
                [
                    m[0][0] * cd[0][0] + m[0][1] * cd[1][0],
                    m[0][0] * cd[0][1] + m[0][1] * cd[1][1],
                ],
                [
                    m[1][0] * cd[0][0] + m[1][1] * cd[1][0],
                    m[1][0] * cd[0][1] + m[1][1] * cd[1][1],
                ],
            ],
            ..*self
        }
    }

    fn update_distortion(&self, dxi: [f64; 3], deta: [f64; 3]) -> Self {
        let mut distortion = self.distortion;
        for k in 0..3 {
            distortion[0][k] += dxi[k];
            distortion[1][k] += deta[k];
        }
        Self {
            distortion,
            ..*self
        }
    }
}
