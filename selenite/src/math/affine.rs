// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Six-parameter affine transform between raster pixel coordinates and
//! projected map coordinates.

use cgmath::Vector2;
use std::ops::{Index, Mul};

use crate::math::FreeCoordinate;

/// An affine transform stored as `[a, b, c, d, e, f]` such that a pixel
/// `(u, v)` maps to `(a·u + b·v + c, d·u + e·v + f)`.
///
/// `c` and `f` are the map coordinates of the upper-left pixel (pixel-centre
/// convention); `a` and `e` are the pixel sizes along x and y (`e` is
/// negative for north-up rasters).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    e: [FreeCoordinate; 6],
}

impl Affine {
    /// Construct from the six coefficients in `[a, b, c, d, e, f]` order.
    pub const fn new(
        a: FreeCoordinate,
        b: FreeCoordinate,
        c: FreeCoordinate,
        d: FreeCoordinate,
        e: FreeCoordinate,
        f: FreeCoordinate,
    ) -> Self {
        Self {
            e: [a, b, c, d, e, f],
        }
    }

    /// The identity transform.
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// A transform that scales the x and y axes independently.
    pub const fn scale(sx: FreeCoordinate, sy: FreeCoordinate) -> Self {
        Self::new(sx, 0.0, 0.0, 0.0, sy, 0.0)
    }

    /// Construct from a GDAL-style geotransform
    /// `[x0, px_w, rot_x, y0, rot_y, px_h]`, reordering into `[a..f]`.
    pub const fn from_geotransform(gt: [FreeCoordinate; 6]) -> Self {
        Self::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3])
    }

    /// x-coordinate of the upper-left pixel.
    #[inline]
    pub fn xoff(&self) -> FreeCoordinate {
        self.e[2]
    }

    /// y-coordinate of the upper-left pixel.
    #[inline]
    pub fn yoff(&self) -> FreeCoordinate {
        self.e[5]
    }

    /// Determinant of the linear part.
    #[inline]
    pub fn det(&self) -> FreeCoordinate {
        self.e[0] * self.e[4] - self.e[1] * self.e[3]
    }

    /// The inverse transform, or [`None`] if the transform is singular.
    pub fn inverse(&self) -> Option<Affine> {
        let det = self.det();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let [a, b, c, d, e, f] = self.e;
        let (ia, ib) = (e / det, -b / det);
        let (id, ie) = (-d / det, a / det);
        Some(Affine::new(
            ia,
            ib,
            -(ia * c + ib * f),
            id,
            ie,
            -(id * c + ie * f),
        ))
    }

    /// Apply the transform to a 2-dimensional point.
    #[inline]
    pub fn apply(&self, p: Vector2<FreeCoordinate>) -> Vector2<FreeCoordinate> {
        Vector2::new(
            self.e[0] * p.x + self.e[1] * p.y + self.e[2],
            self.e[3] * p.x + self.e[4] * p.y + self.e[5],
        )
    }
}

impl Index<usize> for Affine {
    type Output = FreeCoordinate;

    #[inline]
    fn index(&self, i: usize) -> &FreeCoordinate {
        &self.e[i]
    }
}

impl Mul<Affine> for Affine {
    type Output = Affine;

    fn mul(self, rhs: Affine) -> Affine {
        let [a1, b1, c1, d1, e1, f1] = self.e;
        let [a2, b2, c2, d2, e2, f2] = rhs.e;
        Affine::new(
            a1 * a2 + b1 * d2,
            a1 * b2 + b1 * e2,
            a1 * c2 + b1 * f2 + c1,
            d1 * a2 + e1 * d2,
            d1 * b2 + e1 * e2,
            d1 * c2 + e1 * f2 + f1,
        )
    }
}

impl Mul<Vector2<FreeCoordinate>> for Affine {
    type Output = Vector2<FreeCoordinate>;

    #[inline]
    fn mul(self, p: Vector2<FreeCoordinate>) -> Vector2<FreeCoordinate> {
        self.apply(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: Affine = Affine::new(50.0, 0.0, -303_850.0, 0.0, -50.0, 911_550.0);

    #[test]
    fn inverse_composes_to_identity() {
        let inv = MAP.inverse().unwrap();
        let id = inv * MAP;
        for k in 0..6 {
            assert!((id[k] - Affine::identity()[k]).abs() <= 1e-9, "e[{}]", k);
        }
    }

    #[test]
    fn round_trips_points() {
        let inv = MAP.inverse().unwrap();
        let pix = Vector2::new(123.0, 456.0);
        let back = inv * (MAP * pix);
        assert!((back.x - pix.x).abs() <= 1e-9);
        assert!((back.y - pix.y).abs() <= 1e-9);
    }

    #[test]
    fn singular_has_no_inverse() {
        assert_eq!(Affine::scale(1.0, 0.0).inverse(), None);
    }

    #[test]
    fn geotransform_reorder() {
        let a = Affine::from_geotransform([-303_850.0, 50.0, 0.0, 911_550.0, 0.0, -50.0]);
        assert_eq!(a, MAP);
        assert_eq!(a.xoff(), -303_850.0);
        assert_eq!(a.yoff(), 911_550.0);
    }
}
