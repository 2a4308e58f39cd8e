// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! End-to-end rendering scenarios on synthetic worlds.

use cgmath::Point3;

use selenite::camera::Camera;
use selenite::math::{nadir_attitude, Affine};
use selenite::options::{RayTracerOptions, WorldOptions};
use selenite::raster::{Dem, Dom, MemoryDataset, RasterFile};
use selenite::tracer::RayTracer;
use selenite::world::World;
use selenite::RenderingStatus;

/// Body radius used by every synthetic scene.
const R: f64 = 1_000_000.0;

/// A whole-globe half-degree DEM whose altitude is `f(lon_deg, lat_deg)`.
fn globe_source(name: &str, f: impl Fn(f64, f64) -> f32) -> MemoryDataset {
    let (w, h) = (720u32, 360u32);
    let transform = Affine::new(0.5, 0.0, -179.75, 0.0, -0.5, 89.75);
    let mut data = Vec::with_capacity((w * h) as usize);
    for v in 0..h {
        for u in 0..w {
            let lon = -179.75 + 0.5 * f64::from(u);
            let lat = 89.75 - 0.5 * f64::from(v);
            data.push(f(lon, lat));
        }
    }
    MemoryDataset::new(name, w, h, transform, format!("+proj=longlat +R={R}")).with_band(data, -9999.0)
}

fn globe_world(max_err: f64, f: impl Fn(f64, f64) -> f32) -> World {
    let dem_file =
        RasterFile::from_source(Box::new(globe_source("dem.tif", f)), 2).expect("dem opens");
    let dom_file = RasterFile::from_source(Box::new(globe_source("dom.tif", |_, _| 128.0)), 2)
        .expect("dom opens");
    let mut opts = WorldOptions::default();
    opts.max_err = max_err;
    World::from_parts(
        Dem::new(vec![dem_file]).expect("dem has a file"),
        Dom::new(vec![dom_file]),
        opts,
    )
}

fn tracer_options(adaptive: bool, ssaa: bool) -> RayTracerOptions {
    let mut opts = RayTracerOptions::default();
    opts.n_threads = 2;
    opts.renderer.adaptive_tracing = adaptive;
    opts.renderer.ssaa.active = ssaa;
    opts
}

/// 64×64 pinhole camera at `(3R, 0, 0)` looking at the body centre.
fn survey_camera() -> Camera {
    let mut cam = Camera::pinhole(64, 64, std::f64::consts::FRAC_PI_4);
    let pos = Point3::new(3.0 * R, 0.0, 0.0);
    cam.set_position(pos);
    cam.set_dcm(nadir_attitude(pos));
    cam
}

fn centre_distances(tracer: &RayTracer) -> Vec<f64> {
    tracer
        .renderer()
        .rendered_pixels()
        .iter()
        .map(|p| p.distance())
        .collect()
}

#[test]
fn sphere_without_dem_detail() {
    let mut tracer = RayTracer::with_world(globe_world(1e-3, |_, _| 0.0), &tracer_options(true, true));
    tracer.set_camera(survey_camera());
    tracer.run().expect("render succeeds");

    assert_eq!(tracer.renderer().status(), RenderingStatus::Completed);
    let pixels = tracer.renderer().rendered_pixels();
    assert_eq!(pixels.len(), 64 * 64);

    // Coverage is total and id-indexed.
    for (k, p) in pixels.iter().enumerate() {
        assert_eq!(p.id as usize, k);
        assert!(!p.data.is_empty());
    }

    let dt = tracer.world().ray_resolution();
    let camera = tracer.camera().expect("camera attached");

    // The boresight pixel sees the sub-camera point at range 2R.
    let centre_id = camera.pixel_id(32, 32) as usize;
    let t_centre = pixels[centre_id].distance();
    assert!(
        (t_centre - 2.0 * R).abs() <= dt,
        "centre t {} should be within one step of {}",
        t_centre,
        2.0 * R
    );

    // Every finite hit lies between the world's radius bounds.
    for p in pixels {
        for d in &p.data {
            if d.is_hit() {
                assert!(d.s.x >= tracer.world().min_radius() - 1.0);
                assert!(d.s.x <= tracer.world().max_radius() + 1.0);
            }
        }
    }

    // The image corners look past the limb.
    assert!(!pixels[camera.pixel_id(0, 0) as usize].data[0].is_hit());
}

#[test]
fn camera_looking_away_misses_everything() {
    let mut tracer = RayTracer::with_world(globe_world(-1.0, |_, _| 0.0), &tracer_options(true, true));
    let mut cam = survey_camera();
    // Flip the boresight from nadir to zenith.
    cam.set_dcm(nadir_attitude(Point3::new(-3.0 * R, 0.0, 0.0)));
    tracer.set_camera(cam);
    tracer.run().expect("render succeeds");

    assert_eq!(tracer.renderer().status(), RenderingStatus::Completed);
    let pixels = tracer.renderer().rendered_pixels();
    assert_eq!(pixels.len(), 64 * 64);
    for p in pixels {
        assert!(!p.data[0].is_hit(), "pixel {} should miss", p.id);
    }
}

#[test]
fn adaptive_tracing_matches_basic() {
    let terrain = |lon: f64, lat: f64| (1000.0 * (lon * 0.2).sin() * (lat * 0.3).cos()) as f32;

    let mut basic = RayTracer::with_world(globe_world(-1.0, terrain), &tracer_options(false, false));
    basic.set_camera(survey_camera());
    basic.run().expect("basic render succeeds");

    let mut adaptive =
        RayTracer::with_world(globe_world(-1.0, terrain), &tracer_options(true, false));
    adaptive.set_camera(survey_camera());
    adaptive.run().expect("adaptive render succeeds");

    let dt = basic.world().ray_resolution();
    assert_eq!(dt, adaptive.world().ray_resolution());

    let tb = centre_distances(&basic);
    let ta = centre_distances(&adaptive);
    for (id, (a, b)) in ta.iter().zip(&tb).enumerate() {
        match (a.is_finite(), b.is_finite()) {
            (true, true) => assert!(
                (a - b).abs() <= dt,
                "pixel {}: adaptive {} vs basic {}",
                id,
                a,
                b
            ),
            (hit_a, hit_b) => assert_eq!(hit_a, hit_b, "pixel {} hit/miss disagrees", id),
        }
    }
}

#[test]
fn ssaa_refines_ridge_pixels() {
    // A tall meridian ridge through the image centre.
    let ridge = |lon: f64, _lat: f64| if lon.abs() < 1.0 { 100_000.0 } else { 0.0 };

    let mut opts = tracer_options(false, true);
    opts.renderer.ssaa.n_samples = 4;
    let mut tracer = RayTracer::with_world(globe_world(-1.0, ridge), &opts);
    tracer.set_camera(survey_camera());
    tracer.run().expect("render succeeds");

    let pixels = tracer.renderer().rendered_pixels();
    let refined: Vec<_> = pixels.iter().filter(|p| p.n_samples > 1).collect();
    assert!(
        !refined.is_empty(),
        "the ridge must flag at least one pixel for SSAA"
    );

    for p in &refined {
        assert_eq!(p.n_samples, 4);
        assert_eq!(p.data.len(), 4);
        // The sub-pixel samples stay within the distance range spanned by
        // the pixel's own samples, padded by the search margin.
        let mean = p.mean_distance();
        if mean.is_finite() {
            assert!(mean >= p.min_distance() && mean <= p.max_distance());
        }
    }

    // Pixels far from the ridge and the limb keep their single sample.
    let camera = tracer.camera().expect("camera attached");
    let quiet = &pixels[camera.pixel_id(24, 32) as usize];
    assert_eq!(quiet.n_samples, 1);
}
