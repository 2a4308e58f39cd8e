// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Direction-cosine-matrix constructors for camera attitudes.
//!
//! A camera DCM maps camera-frame vectors into the body-fixed frame; its
//! columns are the camera axes expressed in world coordinates, with the
//! z-axis along the boresight.

use cgmath::{InnerSpace as _, Matrix3, Point3, SquareMatrix as _, Vector3};

use crate::math::FreeCoordinate;

/// A body axis, used to build rotation sequences.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// The DCM of a right-handed rotation by `angle` (radians) about `axis`.
#[rustfmt::skip]
pub fn axis_rotation(axis: Axis, angle: FreeCoordinate) -> Matrix3<FreeCoordinate> {
    let (s, c) = angle.sin_cos();
    match axis {
        Axis::X => Matrix3::new(
            1.0, 0.0, 0.0,
            0.0, c, s,
            0.0, -s, c,
        ),
        Axis::Y => Matrix3::new(
            c, 0.0, -s,
            0.0, 1.0, 0.0,
            s, 0.0, c,
        ),
        Axis::Z => Matrix3::new(
            c, s, 0.0,
            -s, c, 0.0,
            0.0, 0.0, 1.0,
        ),
    }
}

/// Compose a rotation sequence into a single DCM. Rotations are applied in
/// the order given, i.e. `euler_rotation(&[(Z, a), (Y, b)])` rotates about
/// Z first.
pub fn euler_rotation(sequence: &[(Axis, FreeCoordinate)]) -> Matrix3<FreeCoordinate> {
    sequence.iter().fold(Matrix3::identity(), |m, &(ax, angle)| {
        axis_rotation(ax, angle) * m
    })
}

/// Attitude whose boresight (camera z-axis) points from `pos` towards the
/// body centre, with the remaining axes completing a right-handed triad.
///
/// Useful for nadir-looking survey cameras; the cross-track axis is chosen
/// orthogonal to the polar axis, falling back to +X when `pos` lies on it.
pub fn nadir_attitude(pos: Point3<FreeCoordinate>) -> Matrix3<FreeCoordinate> {
    let uz = -Vector3::new(pos.x, pos.y, pos.z).normalize();

    let k = Vector3::unit_z();
    let mut uy = uz.cross(k);
    if uy.magnitude2() < 1e-12 {
        uy = uz.cross(Vector3::unit_x());
    }
    let uy = uy.normalize();
    let ux = uy.cross(uz).normalize();

    Matrix3::from_cols(ux, uy, uz)
}
