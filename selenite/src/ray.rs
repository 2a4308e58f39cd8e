// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! View rays and their intersections with body-centred spheres.

use cgmath::{EuclideanSpace as _, InnerSpace as _, Point3, Vector3};

use crate::math::FreeCoordinate;

/// A half-line `origin + t·direction` with unit direction.
///
/// The dot products recurring in sphere-intersection formulas (`p·d`,
/// `(p·d)²`, `|p|²`) are cached at construction since every DEM march
/// evaluates them repeatedly.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    p: Point3<FreeCoordinate>,
    d: Vector3<FreeCoordinate>,
    pd: FreeCoordinate,
    pd2: FreeCoordinate,
    p2: FreeCoordinate,
}

impl Ray {
    /// Create a ray; `direction` need not be normalised.
    pub fn new(origin: Point3<FreeCoordinate>, direction: Vector3<FreeCoordinate>) -> Self {
        let d = direction.normalize();
        let pd = origin.to_vec().dot(d);
        Self {
            p: origin,
            d,
            pd,
            pd2: pd * pd,
            p2: origin.to_vec().magnitude2(),
        }
    }

    #[inline]
    pub fn origin(&self) -> Point3<FreeCoordinate> {
        self.p
    }

    #[inline]
    pub fn direction(&self) -> Vector3<FreeCoordinate> {
        self.d
    }

    /// Position of the ray at parameter `t`.
    #[inline]
    pub fn at(&self, t: FreeCoordinate) -> Point3<FreeCoordinate> {
        self.p + t * self.d
    }

    /// Minimum distance of the (infinite) line from the body centre.
    #[inline]
    pub fn min_distance(&self) -> FreeCoordinate {
        (self.p2 - self.pd2).max(0.0).sqrt()
    }

    /// Parameters `(t₋, t₊)` at which the ray crosses the sphere of radius
    /// `r` centred at the origin, or [`None`] when it misses it.
    ///
    /// The roots solve `t² + 2(p·d)t + (|p|² − r²) = 0`; `t₋ ≤ t₊` always,
    /// and either may be negative when the origin lies inside the sphere or
    /// the sphere is behind the ray.
    #[inline]
    pub fn parameters(&self, r: FreeCoordinate) -> Option<(FreeCoordinate, FreeCoordinate)> {
        let delta = self.pd2 - self.p2 + r * r;
        if delta < 0.0 {
            return None;
        }
        let s = delta.sqrt();
        Some((-self.pd - s, -self.pd + s))
    }
}
