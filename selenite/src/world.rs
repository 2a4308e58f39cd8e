// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The world being imaged: a DEM as the implicit surface, an optional DOM
//! for albedo, and the ray-marching intersection search.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cgmath::{EuclideanSpace as _, InnerSpace as _, Vector2};
use log::{debug, info};

use crate::camera::Camera;
use crate::math::{car2sph, rad2deg, FreeCoordinate};
use crate::options::WorldOptions;
use crate::pixel::PixelData;
use crate::raster::{Dem, Dom, RasterError, RasterFile};
use crate::ray::Ray;

/// Bisection iteration cap for [`World::trace_ray`] refinement.
const MAX_REFINE_ITERATIONS: u32 = 64;

/// The scene: DEM + DOM plus the marching resolution.
///
/// `World` is shared immutably with render workers; the marching step and
/// interpolation flag are retuned between frames through atomics so the
/// sharing needs no lock.
pub struct World {
    dem: Dem,
    dom: Dom,
    opts: WorldOptions,

    /// Ray-marching step, metres, as `f64` bits.
    dt: AtomicU64,
    /// Whether DEM samples are bilinearly interpolated.
    interp: AtomicBool,
}

impl World {
    /// Open every raster named in `opts` and assemble the world.
    pub fn new(opts: WorldOptions, n_threads: usize) -> Result<Self, RasterError> {
        let dem_files = opts
            .dem_files
            .iter()
            .map(|d| RasterFile::open(&d.path, n_threads))
            .collect::<Result<Vec<_>, _>>()?;
        let dom_files = opts
            .dom_files
            .iter()
            .map(|d| RasterFile::open(&d.path, n_threads))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_parts(
            Dem::new(dem_files)?,
            Dom::new(dom_files),
            opts,
        ))
    }

    /// Assemble a world from already constructed mosaics (synthetic scenes,
    /// tests).
    pub fn from_parts(dem: Dem, dom: Dom, opts: WorldOptions) -> Self {
        info!(
            "world: {} DEM tile(s), {} DOM tile(s), radii [{:.1}, {:.1}] m",
            dem.manager().n_rasters(),
            dom.manager().n_rasters(),
            dem.min_radius(),
            dem.max_radius()
        );
        Self {
            dem,
            dom,
            opts,
            dt: AtomicU64::new(0.0f64.to_bits()),
            interp: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn dem(&self) -> &Dem {
        &self.dem
    }

    #[inline]
    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    /// DEM altitude (metres above the mean radius) at `(lon, lat)` degrees.
    #[inline]
    pub fn sample_dem(
        &self,
        lonlat: Vector2<FreeCoordinate>,
        thread_id: usize,
    ) -> Option<FreeCoordinate> {
        self.dem
            .get_data(lonlat, self.interp.load(Ordering::Relaxed), thread_id)
    }

    /// DOM albedo at `(lon, lat)` degrees.
    #[inline]
    pub fn sample_dom(
        &self,
        lonlat: Vector2<FreeCoordinate>,
        thread_id: usize,
    ) -> Option<FreeCoordinate> {
        self.dom
            .get_color(lonlat, self.interp.load(Ordering::Relaxed), thread_id)
    }

    #[inline]
    pub fn max_radius(&self) -> FreeCoordinate {
        self.dem.max_radius()
    }

    #[inline]
    pub fn min_radius(&self) -> FreeCoordinate {
        self.dem.min_radius()
    }

    /// Outer bounding radius used to bracket intersections: the maximum
    /// surface radius padded against rounding, so that a constant-altitude
    /// mosaic (min radius == max radius) still brackets its own surface.
    #[inline]
    pub fn outer_radius(&self) -> FreeCoordinate {
        self.max_radius() + self.radius_padding()
    }

    /// Inner bounding radius used to bracket intersections; see
    /// [`Self::outer_radius`].
    #[inline]
    pub fn inner_radius(&self) -> FreeCoordinate {
        (self.min_radius() - self.radius_padding()).max(0.0)
    }

    /// Sphere-intersection roots lose about `R·√ε` of precision on grazing
    /// rays; a few metres of padding at planetary scale covers that.
    #[inline]
    fn radius_padding(&self) -> FreeCoordinate {
        1e-6 * self.mean_radius()
    }

    #[inline]
    pub fn mean_radius(&self) -> FreeCoordinate {
        self.dem.mean_radius()
    }

    #[inline]
    pub fn min_altitude(&self) -> FreeCoordinate {
        self.dem.min_altitude()
    }

    #[inline]
    pub fn max_altitude(&self) -> FreeCoordinate {
        self.dem.max_altitude()
    }

    /// Refinement tolerance for surface hits, metres; negative disables
    /// refinement and accepts the coarse march sample.
    #[inline]
    pub fn max_error(&self) -> FreeCoordinate {
        self.opts.max_err
    }

    /// Current ray-marching step, metres.
    #[inline]
    pub fn ray_resolution(&self) -> FreeCoordinate {
        f64::from_bits(self.dt.load(Ordering::Relaxed))
    }

    /// Override the marching step computed by
    /// [`Self::compute_ray_resolution`].
    #[inline]
    pub fn set_ray_resolution(&self, dt: FreeCoordinate) {
        self.dt.store(dt.to_bits(), Ordering::Relaxed);
    }

    /// Whether DEM sampling currently interpolates.
    #[inline]
    pub fn interpolation_enabled(&self) -> bool {
        self.interp.load(Ordering::Relaxed)
    }

    /// Set the marching step from the camera's ground sampling distance:
    /// half a GSD, but never finer than one DEM pixel (marching below the
    /// data resolution only re-samples the same cells), nor than the
    /// configured floor. Interpolation turns on when the camera out-resolves
    /// the DEM.
    pub fn compute_ray_resolution(&self, cam: &Camera) {
        let gsd = self.compute_gsd(cam);
        let resolution = self.dem.resolution();

        let dt = (0.5 * gsd).max(resolution).max(self.opts.min_res);
        self.set_ray_resolution(dt);
        self.interp.store(gsd < resolution, Ordering::Relaxed);

        debug!(
            "ray resolution {:.2} m (GSD {:.2} m, DEM {:.2} m, interpolation {})",
            dt,
            gsd,
            resolution,
            self.interpolation_enabled()
        );
    }

    /// Ground sampling distance at the mean radius: the arc one pixel spans
    /// on the surface directly below the camera.
    fn compute_gsd(&self, cam: &Camera) -> FreeCoordinate {
        let altitude = (cam.position().to_vec().magnitude() - self.mean_radius()).max(0.0);
        altitude * 2.0 * cam.scale() / f64::from(cam.width())
    }

    /// Unload DEM and DOM tiles that have gone unused, per the configured
    /// dwell threshold. Called between frames.
    pub fn cleanup(&self) {
        self.dem.cleanup(self.opts.raster_usage_threshold);
        self.dom.cleanup(self.opts.raster_usage_threshold);
    }

    /// March `ray` through `[t_min, t_max]` and return the first DEM
    /// intersection, refined to `max_err` metres (negative: accept the
    /// coarse sample).
    ///
    /// Geographic points outside every DEM tile, or inside a no-data
    /// stencil, count as "no terrain there" and the march continues.
    pub fn trace_ray(
        &self,
        ray: &Ray,
        t_min: FreeCoordinate,
        t_max: FreeCoordinate,
        thread_id: usize,
        max_err: FreeCoordinate,
    ) -> PixelData {
        // The ray passes farther out than any surface point.
        let outer = self.outer_radius();
        if ray.min_distance() > outer {
            return PixelData::MISS;
        }
        let (outer_enter, outer_exit) = match ray.parameters(outer) {
            Some(ts) => ts,
            None => return PixelData::MISS,
        };

        // Clamp the search to the part of [t_min, t_max] inside the outer
        // sphere and in front of the origin.
        let t_start = t_min.max(outer_enter).max(0.0);
        let t_end = t_max.min(outer_exit);
        if t_start > t_end {
            return PixelData::MISS;
        }

        let dt = self.ray_resolution();
        assert!(dt > 0.0, "ray resolution must be set before tracing");
        let mean_radius = self.mean_radius();

        let mut tk = t_start;
        loop {
            let sph = car2sph(ray.at(tk));
            let lonlat = Vector2::new(rad2deg(sph.y), rad2deg(sph.z));
            if let Some(h) = self.sample_dem(lonlat, thread_id) {
                if sph.x <= mean_radius + h {
                    let t_above = (tk - dt).max(t_start);
                    return self.find_impact_location(ray, t_above, tk, thread_id, max_err);
                }
            }
            if tk >= t_end {
                break;
            }
            tk = (tk + dt).min(t_end);
        }

        PixelData::MISS
    }

    /// Bisect the bracket `[t_above, t_below]` on the signed height
    /// `r(t) − (mean_radius + h(t))` until it is within `max_err` metres of
    /// the surface (or the iteration cap is hit). DEM gaps during the
    /// bisection count as "above the surface".
    fn find_impact_location(
        &self,
        ray: &Ray,
        t_above: FreeCoordinate,
        t_below: FreeCoordinate,
        thread_id: usize,
        max_err: FreeCoordinate,
    ) -> PixelData {
        let hit = |t: FreeCoordinate| PixelData {
            t,
            s: car2sph(ray.at(t)),
        };
        if max_err < 0.0 {
            return hit(t_below);
        }

        let mean_radius = self.mean_radius();
        let (mut lo, mut hi) = (t_above, t_below);
        for _ in 0..MAX_REFINE_ITERATIONS {
            let tm = 0.5 * (lo + hi);
            let sph = car2sph(ray.at(tm));
            let lonlat = Vector2::new(rad2deg(sph.y), rad2deg(sph.z));
            match self.sample_dem(lonlat, thread_id) {
                Some(h) => {
                    let height = sph.x - (mean_radius + h);
                    if height.abs() <= max_err {
                        return PixelData { t: tm, s: sph };
                    }
                    if height > 0.0 {
                        lo = tm;
                    } else {
                        hi = tm;
                    }
                }
                None => lo = tm,
            }
        }
        hit(hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Affine;
    use crate::options::WorldOptions;
    use crate::raster::{MemoryDataset, RasterFile};
    use cgmath::{Point3, Vector3};

    const R: f64 = 1_000_000.0;

    /// A whole-globe constant-altitude DEM on a radius-R sphere.
    fn sphere_world(altitude: f32) -> World {
        let proj = format!("+proj=longlat +R={}", R);
        // Half-degree grid covering lon [-180, 180], lat [-90, 90].
        let transform = Affine::new(0.5, 0.0, -179.75, 0.0, -0.5, 89.75);
        let source = MemoryDataset::constant("globe.tif", 720, 360, transform, proj, altitude);
        let file = RasterFile::from_source(Box::new(source), 1).unwrap();
        let dem = Dem::new(vec![file]).unwrap();
        let world = World::from_parts(dem, Dom::new(Vec::new()), WorldOptions::default());
        world.set_ray_resolution(1000.0);
        world
    }

    #[test]
    fn central_ray_hits_the_subpoint() {
        let world = sphere_world(0.0);
        let ray = Ray::new(Point3::new(3.0 * R, 0.0, 0.0), Vector3::new(-1.0, 0.0, 0.0));
        let data = world.trace_ray(&ray, 0.0, f64::INFINITY, 0, 1e-3);
        assert!(data.is_hit());
        assert!((data.t - 2.0 * R).abs() < 1e-2);
        assert!((data.s.x - R).abs() < 1e-2);
    }

    #[test]
    fn coarse_hit_without_refinement() {
        let world = sphere_world(0.0);
        let ray = Ray::new(Point3::new(3.0 * R, 0.0, 0.0), Vector3::new(-1.0, 0.0, 0.0));
        let data = world.trace_ray(&ray, 0.0, f64::INFINITY, 0, -1.0);
        assert!(data.is_hit());
        // Within one marching step of the analytic intersection.
        assert!((data.t - 2.0 * R).abs() <= world.ray_resolution());
    }

    #[test]
    fn tangent_ray_misses() {
        let world = sphere_world(0.0);
        let ray = Ray::new(
            Point3::new(3.0 * R, 1.5 * R, 0.0),
            Vector3::new(-1.0, 0.0, 0.0),
        );
        assert!(!world.trace_ray(&ray, 0.0, f64::INFINITY, 0, -1.0).is_hit());
    }

    #[test]
    fn empty_interval_is_a_miss() {
        let world = sphere_world(0.0);
        let ray = Ray::new(Point3::new(3.0 * R, 0.0, 0.0), Vector3::new(-1.0, 0.0, 0.0));
        assert!(!world.trace_ray(&ray, 100.0, 50.0, 0, -1.0).is_hit());
    }

    #[test]
    fn altitude_raises_the_surface() {
        let world = sphere_world(50_000.0);
        let ray = Ray::new(Point3::new(3.0 * R, 0.0, 0.0), Vector3::new(-1.0, 0.0, 0.0));
        let data = world.trace_ray(&ray, 0.0, f64::INFINITY, 0, 1e-3);
        assert!((data.t - (2.0 * R - 50_000.0)).abs() < 1e-2);
    }

    #[test]
    fn ray_resolution_tracks_the_camera() {
        let world = sphere_world(0.0);
        let mut cam = Camera::pinhole(64, 64, std::f64::consts::FRAC_PI_4);
        cam.set_position(Point3::new(3.0 * R, 0.0, 0.0));
        world.compute_ray_resolution(&cam);

        // GSD ≈ 2R · 2·tan(fov/2)/64; dt is half of it, well above the DEM
        // resolution for this coarse camera.
        let gsd = 2.0 * R * 2.0 * (std::f64::consts::FRAC_PI_8).tan() / 64.0;
        assert!((world.ray_resolution() - 0.5 * gsd).abs() < 1e-6);
        assert!(!world.interpolation_enabled());
    }
}
