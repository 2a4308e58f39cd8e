// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Camera models: pixel grid, pose, and ray generation.
//!
//! A [`Camera`] is a plain value: immutable intrinsics (the [`Projection`])
//! plus a mutable pose. The camera frame has +z along the boresight, +x
//! towards the top of the image and +y completing the triad; the pose DCM
//! maps camera-frame vectors into the body-fixed frame.

use cgmath::{Matrix3, Point3, SquareMatrix as _, Vector3};
use rand::Rng;

use crate::math::FreeCoordinate;
use crate::ray::Ray;

/// Camera intrinsics.
///
/// `Pinhole` produces exact per-pixel rays and is the model that benefits
/// from super-sampled anti-aliasing. `ThinLens` adds an aperture and a
/// physical sensor; its non-central rays sample the lens disk and the pixel
/// square, producing defocus blur.
#[derive(Clone, Copy, Debug)]
pub enum Projection {
    Pinhole {
        /// Full field of view, radians.
        fov: FreeCoordinate,
    },
    ThinLens {
        /// Focal length, mm.
        focal_length: FreeCoordinate,
        /// Sensor (film) width, mm.
        sensor_size: FreeCoordinate,
        /// f-number; the aperture diameter is `focal_length / fstop`.
        fstop: FreeCoordinate,
    },
}

/// A camera: pixel dimensions, pose and projection.
#[derive(Clone, Debug)]
pub struct Camera {
    width: u32,
    height: u32,
    position: Point3<FreeCoordinate>,
    dcm: Matrix3<FreeCoordinate>,
    projection: Projection,
    /// tan(fov/2), precomputed for ray generation.
    scale: FreeCoordinate,
}

impl Camera {
    /// A pinhole camera with the given resolution and full field of view
    /// (radians).
    pub fn pinhole(width: u32, height: u32, fov: FreeCoordinate) -> Self {
        Self {
            width,
            height,
            position: Point3::new(0.0, 0.0, 0.0),
            dcm: Matrix3::identity(),
            projection: Projection::Pinhole { fov },
            scale: (0.5 * fov).tan(),
        }
    }

    /// A thin-lens camera with a square `res × res` sensor. Lengths in mm.
    pub fn thin_lens(
        res: u32,
        focal_length: FreeCoordinate,
        sensor_size: FreeCoordinate,
        fstop: FreeCoordinate,
    ) -> Self {
        let fov = 2.0 * (sensor_size / (2.0 * focal_length)).atan();
        Self {
            width: res,
            height: res,
            position: Point3::new(0.0, 0.0, 0.0),
            dcm: Matrix3::identity(),
            projection: Projection::ThinLens {
                focal_length,
                sensor_size,
                fstop,
            },
            scale: (0.5 * fov).tan(),
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn n_pixels(&self) -> u32 {
        self.width * self.height
    }

    #[inline]
    pub fn position(&self) -> Point3<FreeCoordinate> {
        self.position
    }

    #[inline]
    pub fn dcm(&self) -> Matrix3<FreeCoordinate> {
        self.dcm
    }

    #[inline]
    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn set_position(&mut self, position: Point3<FreeCoordinate>) {
        self.position = position;
    }

    pub fn set_dcm(&mut self, dcm: Matrix3<FreeCoordinate>) {
        self.dcm = dcm;
    }

    /// Global id of the pixel at `(u, v)`: pixels are numbered row-major.
    #[inline]
    pub fn pixel_id(&self, u: u32, v: u32) -> u32 {
        u + self.width * v
    }

    /// Inverse of [`Self::pixel_id`].
    #[inline]
    pub fn pixel_coordinates(&self, id: u32) -> (u32, u32) {
        let v = id / self.width;
        (id - v * self.width, v)
    }

    /// Whether the renderer should run the super-sampling pass on this
    /// camera's output.
    #[inline]
    pub fn has_anti_aliasing(&self) -> bool {
        matches!(self.projection, Projection::Pinhole { .. })
    }

    /// Whether the renderer should run the defocus-blur pass on this
    /// camera's output.
    #[inline]
    pub fn has_defocus_blur(&self) -> bool {
        matches!(self.projection, Projection::ThinLens { .. })
    }

    /// Generate the ray through the (fractional) pixel coordinate `(u, v)`.
    ///
    /// With `centre == true` the ray is the deterministic central projection
    /// through the pixel centre, for every camera model. Otherwise a
    /// thin-lens camera draws a stochastic lens/pixel sample from `rng`;
    /// a pinhole camera never consults the RNG.
    pub fn get_ray(
        &self,
        u: FreeCoordinate,
        v: FreeCoordinate,
        centre: bool,
        rng: &mut impl Rng,
    ) -> Ray {
        match self.projection {
            Projection::Pinhole { .. } => self.centre_ray(u, v),
            Projection::ThinLens {
                focal_length,
                sensor_size,
                fstop,
            } => {
                if centre {
                    return self.centre_ray(u, v);
                }

                // Sample the aperture disk uniformly by area.
                let aperture = focal_length / fstop;
                let r = aperture * rng.gen::<f64>().sqrt();
                let th = std::f64::consts::TAU * rng.gen::<f64>();
                let lens_point = Vector3::new(r * th.cos(), r * th.sin(), 0.0);

                // Lens coordinates are mm; positions are metres.
                let origin = self.position + 1e-3 * (self.dcm * lens_point);

                // Jitter the target inside the pixel square on the sensor
                // plane at z = focal length.
                let pix_size = sensor_size / f64::from(self.width);
                let x = -0.5 * (sensor_size - pix_size) + (u + rng.gen::<f64>() - 0.5) * pix_size;
                let y = -0.5 * (sensor_size - pix_size) + (v + rng.gen::<f64>() - 0.5) * pix_size;
                let pix_sample = Vector3::new(x, y, focal_length);

                Ray::new(origin, self.dcm * (pix_sample - lens_point))
            }
        }
    }

    /// The deterministic central-projection ray through `(u, v)`, for every
    /// camera model; what [`Self::get_ray`] does with `centre == true`.
    pub fn centre_ray(&self, u: FreeCoordinate, v: FreeCoordinate) -> Ray {
        let x = (1.0 - 2.0 * (u + 0.5) / f64::from(self.width)) * self.scale;
        let y = (1.0 - 2.0 * (v + 0.5) / f64::from(self.height)) * self.scale;
        Ray::new(self.position, self.dcm * Vector3::new(x, y, 1.0))
    }

    /// tan(fov/2); the half-extent of the image plane at unit distance.
    #[inline]
    pub fn scale(&self) -> FreeCoordinate {
        self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::InnerSpace as _;
    use rand::SeedableRng as _;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn rng() -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(7)
    }

    #[test]
    fn pinhole_centre_ray_is_boresight() {
        // An odd resolution puts a pixel centre exactly on the axis.
        let cam = Camera::pinhole(65, 65, std::f64::consts::FRAC_PI_4);
        let ray = cam.get_ray(32.0, 32.0, true, &mut rng());
        assert!((ray.direction() - Vector3::unit_z()).magnitude() <= 1e-12);
    }

    #[test]
    fn pinhole_edge_ray_spans_half_fov() {
        let fov = std::f64::consts::FRAC_PI_3;
        let cam = Camera::pinhole(512, 512, fov);
        // u = -0.5 maps to the left image border.
        let ray = cam.get_ray(-0.5, 255.5, true, &mut rng());
        let angle = ray.direction().x.atan2(ray.direction().z);
        assert!((angle - 0.5 * fov).abs() <= 1e-12);
    }

    #[test]
    fn capability_flags_follow_projection() {
        let pinhole = Camera::pinhole(64, 64, 1.0);
        assert!(pinhole.has_anti_aliasing() && !pinhole.has_defocus_blur());

        let lens = Camera::thin_lens(64, 105.0, 35.0, 4.0);
        assert!(!lens.has_anti_aliasing() && lens.has_defocus_blur());
    }

    #[test]
    fn thin_lens_centre_matches_pinhole_formula() {
        let lens = Camera::thin_lens(128, 105.0, 35.0, 4.0);
        let fov = 2.0 * (35.0f64 / (2.0 * 105.0)).atan();
        let pinhole = Camera::pinhole(128, 128, fov);
        let a = lens.get_ray(10.0, 90.0, true, &mut rng());
        let b = pinhole.get_ray(10.0, 90.0, true, &mut rng());
        assert!((a.direction() - b.direction()).magnitude() <= 1e-12);
    }

    #[test]
    fn thin_lens_samples_stay_within_aperture() {
        let mut rng = rng();
        let lens = Camera::thin_lens(128, 105.0, 35.0, 4.0);
        let aperture_m = 1e-3 * 105.0 / 4.0;
        for _ in 0..100 {
            let ray = lens.get_ray(64.0, 64.0, false, &mut rng);
            let offset = ray.origin() - lens.position();
            assert!(offset.magnitude() <= aperture_m + 1e-12);
        }
    }

    #[test]
    fn pixel_id_round_trip() {
        let cam = Camera::pinhole(33, 21, 1.0);
        for &(u, v) in &[(0, 0), (32, 0), (5, 20), (32, 20)] {
            let id = cam.pixel_id(u, v);
            assert_eq!(cam.pixel_coordinates(id), (u, v));
        }
    }
}
