// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Mathematical utilities: angle conversions, cartesian↔spherical transforms,
//! raster affine transforms and attitude (DCM) helpers.

use cgmath::{EuclideanSpace as _, InnerSpace as _, Point3};

mod affine;
mod dcm;
pub use affine::Affine;
pub use dcm::{axis_rotation, euler_rotation, nadir_attitude, Axis};

/// Continuous world coordinates and distances (metres, ray parameters),
/// as opposed to the integer pixel/raster grids.
pub type FreeCoordinate = f64;

/// Mean radius of the Moon's spherical datum (`MOON_2000_IAU_IAG`), metres.
pub const MOON_MEAN_RADIUS: FreeCoordinate = 1_737_400.0;

/// Convert an angle from degrees to radians.
#[inline]
pub fn deg2rad(x: FreeCoordinate) -> FreeCoordinate {
    x.to_radians()
}

/// Convert an angle from radians to degrees.
#[inline]
pub fn rad2deg(x: FreeCoordinate) -> FreeCoordinate {
    x.to_degrees()
}

/// Convert a cartesian position to spherical `(radius, longitude, latitude)`,
/// with angles in radians, longitude in `(-π, π]` and latitude in `[-π/2, π/2]`.
#[inline]
pub fn car2sph(pos: Point3<FreeCoordinate>) -> Point3<FreeCoordinate> {
    let r = pos.to_vec().magnitude();
    Point3::new(r, pos.y.atan2(pos.x), (pos.z / r).asin())
}

/// Convert spherical `(radius, longitude, latitude)` (radians) to a cartesian
/// position. Inverse of [`car2sph`].
#[inline]
pub fn sph2car(sph: Point3<FreeCoordinate>) -> Point3<FreeCoordinate> {
    let (clon, slon) = (sph.y.cos(), sph.y.sin());
    let rclat = sph.x * sph.z.cos();
    let rslat = sph.x * sph.z.sin();
    Point3::new(clon * rclat, slon * rclat, rslat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point3<f64>, b: Point3<f64>, eps: f64) {
        assert!(
            (a.x - b.x).abs() <= eps && (a.y - b.y).abs() <= eps && (a.z - b.z).abs() <= eps,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn spherical_round_trip() {
        let p = Point3::new(1_737_400.0, -250_000.0, 812_000.0);
        let s = car2sph(p);
        assert_close(sph2car(s), p, 1e-6);
    }

    #[test]
    fn spherical_axes() {
        let s = car2sph(Point3::new(0.0, 2.0, 0.0));
        assert_close(s, Point3::new(2.0, std::f64::consts::FRAC_PI_2, 0.0), 1e-12);

        let s = car2sph(Point3::new(0.0, 0.0, -3.0));
        assert!((s.x - 3.0).abs() <= 1e-12);
        assert!((s.z + std::f64::consts::FRAC_PI_2).abs() <= 1e-12);
    }
}
