// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The ray-tracer façade: orchestrates a frame and exports its products
//! (grayscale images, ground control points, binary dumps, altitude
//! queries).

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use cgmath::{EuclideanSpace as _, InnerSpace as _, Matrix3, Point3, Vector2};
use image::{ImageBuffer, Luma};
use itertools::{Itertools as _, MinMaxResult};
use log::info;
use thiserror::Error;

use crate::camera::Camera;
use crate::math::{rad2deg, FreeCoordinate};
use crate::options::RayTracerOptions;
use crate::pixel::{PixelData, RenderedPixel};
use crate::raster::RasterError;
use crate::ray::Ray;
use crate::renderer::{Renderer, RenderingStatus};
use crate::world::World;

/// Bit depth of exported grayscale images.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageDepth {
    Bit8,
    Bit16,
}

/// Failures surfaced at the façade's API boundary.
#[derive(Debug, Error)]
pub enum TracerError {
    #[error("no camera has been attached")]
    MissingCamera,
    #[error("the frame has not been rendered yet")]
    NotRendered,
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("failed to write {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path:?}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("GCPs can only be exported to .txt or .csv, got {path:?}")]
    GcpFormat { path: PathBuf },
    #[error("dump was rendered at {width}×{height}, camera is {cam_width}×{cam_height}")]
    ResolutionMismatch {
        width: u32,
        height: u32,
        cam_width: u32,
        cam_height: u32,
    },
}

/// The top-level tracer: owns the [`World`] and [`Renderer`], borrows a
/// camera per frame.
pub struct RayTracer {
    world: Arc<World>,
    renderer: Renderer,
    camera: Option<Camera>,
}

impl RayTracer {
    /// Build a tracer, opening every raster referenced by the options.
    pub fn new(opts: RayTracerOptions) -> Result<Self, TracerError> {
        let world = World::new(opts.world.clone(), opts.n_threads)?;
        Ok(Self::with_world(world, &opts))
    }

    /// Build a tracer around an already constructed world (synthetic
    /// scenes, tests).
    pub fn with_world(world: World, opts: &RayTracerOptions) -> Self {
        Self {
            world: Arc::new(world),
            renderer: Renderer::new(opts.renderer.clone(), opts.n_threads, opts.seed),
            camera: None,
        }
    }

    #[inline]
    pub fn world(&self) -> &World {
        &self.world
    }

    #[inline]
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Attach (or replace) the camera used by subsequent frames.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = Some(camera);
    }

    #[inline]
    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn update_camera_position(
        &mut self,
        position: Point3<FreeCoordinate>,
    ) -> Result<(), TracerError> {
        self.camera
            .as_mut()
            .ok_or(TracerError::MissingCamera)?
            .set_position(position);
        Ok(())
    }

    pub fn update_camera_orientation(
        &mut self,
        dcm: Matrix3<FreeCoordinate>,
    ) -> Result<(), TracerError> {
        self.camera
            .as_mut()
            .ok_or(TracerError::MissingCamera)?
            .set_dcm(dcm);
        Ok(())
    }

    /// Render a frame: evict stale rasters, tune the marching resolution to
    /// the camera, and trace every pixel.
    pub fn run(&mut self) -> Result<(), TracerError> {
        let camera = self.camera.as_ref().ok_or(TracerError::MissingCamera)?;
        self.world.cleanup();
        self.world.compute_ray_resolution(camera);
        self.renderer.render(camera, &self.world);
        Ok(())
    }

    /// Height of `pos` above the terrain directly below it.
    ///
    /// Shoots a single nadir ray marched at `dt` metres; the returned
    /// altitude is the closed form `|pos| − (R_mean + h(lon, lat))` at the
    /// hit's geographic coordinate, independent of the marched `t`. [`None`]
    /// when there is no DEM below `pos`.
    pub fn get_altitude(
        &self,
        pos: Point3<FreeCoordinate>,
        dt: FreeCoordinate,
        max_err: FreeCoordinate,
    ) -> Option<FreeCoordinate> {
        self.world.set_ray_resolution(dt);
        let nadir = Ray::new(pos, -pos.to_vec());
        let data = self
            .world
            .trace_ray(&nadir, 0.0, f64::INFINITY, 0, max_err);
        if !data.is_hit() {
            return None;
        }
        let lonlat = Vector2::new(rad2deg(data.s.y), rad2deg(data.s.z));
        let h = self.world.sample_dem(lonlat, 0)?;
        Some(pos.to_vec().magnitude() - (self.world.mean_radius() + h))
    }

    /// Unload every resident DEM and DOM band.
    pub fn unload(&self) {
        self.world.dem().manager().unload_rasters();
        self.world.dom().manager().unload_rasters();
    }

    /// Grayscale image of the DOM albedo seen by each pixel.
    pub fn generate_image_optical(
        &self,
        path: impl AsRef<Path>,
        depth: ImageDepth,
    ) -> Result<(), TracerError> {
        let camera = self.camera.as_ref().ok_or(TracerError::MissingCamera)?;
        let pixels = self.rendered()?;

        let values = per_pixel_values(pixels, |p| {
            average_finite(p, |d| {
                let lonlat = Vector2::new(rad2deg(d.s.y), rad2deg(d.s.z));
                // DOM samples live in [0, 255].
                self.world.sample_dom(lonlat, 0).map(|c| c / 255.0)
            })
        });
        write_grayscale(path.as_ref(), camera, &values, depth)?;
        info!("generated optical image: {:?}", path.as_ref());
        Ok(())
    }

    /// Grayscale image of the DEM radius, normalised over the world's
    /// radius span.
    pub fn generate_image_dem(
        &self,
        path: impl AsRef<Path>,
        depth: ImageDepth,
    ) -> Result<(), TracerError> {
        let camera = self.camera.as_ref().ok_or(TracerError::MissingCamera)?;
        let pixels = self.rendered()?;

        let min_radius = self.world.min_radius();
        let span = self.world.max_radius() - min_radius;
        let values = per_pixel_values(pixels, |p| {
            average_finite(p, |d| {
                // A flat mosaic has no radius span to normalise over.
                Some(if span > 0.0 {
                    (d.s.x - min_radius) / span
                } else {
                    0.0
                })
            })
        });
        write_grayscale(path.as_ref(), camera, &values, depth)?;
        info!("generated DEM image: {:?}", path.as_ref());
        Ok(())
    }

    /// Depth map normalised over the frame's distance span; nearer is
    /// brighter.
    pub fn generate_depth_map(
        &self,
        path: impl AsRef<Path>,
        depth: ImageDepth,
    ) -> Result<(), TracerError> {
        let camera = self.camera.as_ref().ok_or(TracerError::MissingCamera)?;
        let pixels = self.rendered()?;

        let range = pixels
            .iter()
            .flat_map(|p| [p.min_distance(), p.max_distance()])
            .filter(|t| t.is_finite())
            .minmax();
        let (d_min, d_max) = match range {
            // Every ray missed: the image is entirely blank.
            MinMaxResult::NoElements => {
                let values = vec![0.0; pixels.len()];
                write_grayscale(path.as_ref(), camera, &values, depth)?;
                return Ok(());
            }
            MinMaxResult::OneElement(t) => (t, t),
            MinMaxResult::MinMax(a, b) => (a, b),
        };
        let span = d_max - d_min;

        let values = per_pixel_values(pixels, |p| {
            average_finite(p, |d| {
                Some(if span > 0.0 {
                    (d_max - d.t) / span
                } else {
                    1.0
                })
            })
        });
        write_grayscale(path.as_ref(), camera, &values, depth)?;
        info!("generated depth map: {:?}", path.as_ref());
        Ok(())
    }

    /// Write ground control points, one `u v lon lat` line per sampled
    /// pixel whose centre ray hit. `.csv` uses `", "` separators, `.txt`
    /// single spaces.
    pub fn generate_gcps(&self, path: impl AsRef<Path>, stride: usize) -> Result<(), TracerError> {
        let path = path.as_ref();
        let camera = self.camera.as_ref().ok_or(TracerError::MissingCamera)?;
        let pixels = self.rendered()?;

        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some("txt") => " ",
            Some("csv") => ", ",
            _ => {
                return Err(TracerError::GcpFormat {
                    path: path.to_owned(),
                })
            }
        };

        let file = File::create(path).map_err(|source| TracerError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut out = BufWriter::new(file);
        let stride = stride.max(1) as u32;

        let mut write = || -> std::io::Result<()> {
            let mut u = 0;
            while u < camera.width() {
                let mut v = 0;
                while v < camera.height() {
                    let id = camera.pixel_id(u, v);
                    let data = pixels[id as usize].data[0];
                    if data.is_hit() {
                        let lon = rad2deg(data.s.y);
                        let lat = rad2deg(data.s.z);
                        writeln!(out, "{u}{delimiter}{v}{delimiter}{lon}{delimiter}{lat}")?;
                    }
                    v += stride;
                }
                u += stride;
            }
            out.flush()
        };
        write().map_err(|source| TracerError::Io {
            path: path.to_owned(),
            source,
        })?;
        info!("exported GCPs to {:?}", path);
        Ok(())
    }

    /// Serialise the rendered frame (camera pose included) to a
    /// little-endian binary dump.
    pub fn export_ray_traced_info(&self, path: impl AsRef<Path>) -> Result<(), TracerError> {
        let path = path.as_ref();
        let camera = self.camera.as_ref().ok_or(TracerError::MissingCamera)?;
        let pixels = self.rendered()?;

        let io_err = |source| TracerError::Io {
            path: path.to_owned(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut out = BufWriter::new(file);

        let mut write = || -> std::io::Result<()> {
            out.write_u32::<LittleEndian>(camera.width())?;
            out.write_u32::<LittleEndian>(camera.height())?;

            let pos = camera.position();
            for c in [pos.x, pos.y, pos.z] {
                out.write_f64::<LittleEndian>(c)?;
            }
            for c in dcm_row_major(camera.dcm()) {
                out.write_f64::<LittleEndian>(c)?;
            }

            out.write_u64::<LittleEndian>(pixels.len() as u64)?;
            for p in pixels {
                out.write_u32::<LittleEndian>(p.id)?;
                out.write_u64::<LittleEndian>(p.n_samples as u64)?;
                for d in &p.data {
                    out.write_f64::<LittleEndian>(d.t)?;
                    out.write_f64::<LittleEndian>(d.s.x)?;
                    out.write_f64::<LittleEndian>(d.s.y)?;
                    out.write_f64::<LittleEndian>(d.s.z)?;
                }
            }
            out.flush()
        };
        write().map_err(io_err)?;
        info!("exported ray-traced data to {:?}", path);
        Ok(())
    }

    /// Restore a frame from [`Self::export_ray_traced_info`] output: checks
    /// the resolution against the attached camera, restores the camera
    /// pose, and marks the renderer COMPLETED.
    pub fn import_ray_traced_info(&mut self, path: impl AsRef<Path>) -> Result<(), TracerError> {
        let path = path.as_ref();
        let camera = self.camera.as_mut().ok_or(TracerError::MissingCamera)?;

        let io_err = |source| TracerError::Io {
            path: path.to_owned(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        let mut input = BufReader::new(file);

        let mut read = || -> std::io::Result<Vec<RenderedPixel>> {
            let width = input.read_u32::<LittleEndian>()?;
            let height = input.read_u32::<LittleEndian>()?;
            if width != camera.width() || height != camera.height() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    ResolutionGuard {
                        width,
                        height,
                        cam_width: camera.width(),
                        cam_height: camera.height(),
                    },
                ));
            }

            let mut pos = [0.0; 3];
            input.read_f64_into::<LittleEndian>(&mut pos)?;
            let mut dcm = [0.0; 9];
            input.read_f64_into::<LittleEndian>(&mut dcm)?;
            camera.set_position(Point3::new(pos[0], pos[1], pos[2]));
            camera.set_dcm(dcm_from_row_major(dcm));

            let n_pixels = input.read_u64::<LittleEndian>()?;
            let mut pixels = Vec::with_capacity(n_pixels as usize);
            for _ in 0..n_pixels {
                let id = input.read_u32::<LittleEndian>()?;
                let n_samples = input.read_u64::<LittleEndian>()? as usize;
                let mut pixel = RenderedPixel::new(id, n_samples);
                for _ in 0..n_samples {
                    let t = input.read_f64::<LittleEndian>()?;
                    let mut s = [0.0; 3];
                    input.read_f64_into::<LittleEndian>(&mut s)?;
                    pixel.add_pixel_data(PixelData {
                        t,
                        s: Point3::new(s[0], s[1], s[2]),
                    });
                }
                pixels.push(pixel);
            }
            Ok(pixels)
        };
        let pixels = read().map_err(|e| unwrap_resolution_guard(e, path))?;
        self.renderer.import_rendered_data(pixels);
        info!("imported ray-traced data from {:?}", path);
        Ok(())
    }

    /// The rendered buffer, available once the renderer reaches COMPLETED.
    fn rendered(&self) -> Result<&[RenderedPixel], TracerError> {
        if self.renderer.status() != RenderingStatus::Completed {
            return Err(TracerError::NotRendered);
        }
        Ok(self.renderer.rendered_pixels())
    }
}

/// cgmath matrices are column-major; the dump stores rows.
fn dcm_row_major(m: Matrix3<f64>) -> [f64; 9] {
    [
        m.x.x, m.y.x, m.z.x, //
        m.x.y, m.y.y, m.z.y, //
        m.x.z, m.y.z, m.z.z,
    ]
}

fn dcm_from_row_major(e: [f64; 9]) -> Matrix3<f64> {
    Matrix3::new(
        e[0], e[3], e[6], //
        e[1], e[4], e[7], //
        e[2], e[5], e[8],
    )
}

/// Smuggles a resolution mismatch out through `std::io::Error` so the
/// reader closure stays uniform.
#[derive(Debug, Error)]
#[error("dump was rendered at {width}×{height}, camera is {cam_width}×{cam_height}")]
struct ResolutionGuard {
    width: u32,
    height: u32,
    cam_width: u32,
    cam_height: u32,
}

fn unwrap_resolution_guard(e: std::io::Error, path: &Path) -> TracerError {
    if e.get_ref().map_or(false, |r| r.is::<ResolutionGuard>()) {
        let guard = e
            .into_inner()
            .expect("checked above")
            .downcast::<ResolutionGuard>()
            .expect("checked above");
        TracerError::ResolutionMismatch {
            width: guard.width,
            height: guard.height,
            cam_width: guard.cam_width,
            cam_height: guard.cam_height,
        }
    } else {
        TracerError::Io {
            path: path.to_owned(),
            source: e,
        }
    }
}

/// Evaluate one normalised scalar per pixel, in pixel-id order.
fn per_pixel_values(
    pixels: &[RenderedPixel],
    mut value: impl FnMut(&RenderedPixel) -> f64,
) -> Vec<f64> {
    pixels.iter().map(|p| value(p).clamp(0.0, 1.0)).collect()
}

/// Average `sample` over the pixel's finite samples, skipping misses (and
/// samples the mapper declines); 0 when nothing contributes.
fn average_finite(pixel: &RenderedPixel, mut sample: impl FnMut(&PixelData) -> Option<f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0u32;
    for d in &pixel.data {
        if !d.is_hit() {
            continue;
        }
        if let Some(c) = sample(d) {
            sum += c;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}

/// Encode `values` (normalised to [0, 1], pixel-id order) as a grayscale
/// image at the requested bit depth.
fn write_grayscale(
    path: &Path,
    camera: &Camera,
    values: &[f64],
    depth: ImageDepth,
) -> Result<(), TracerError> {
    let (width, height) = (camera.width(), camera.height());
    let image_err = |source| TracerError::Image {
        path: path.to_owned(),
        source,
    };
    match depth {
        ImageDepth::Bit8 => {
            let data = values.iter().map(|&c| (255.999 * c) as u8).collect();
            let img: ImageBuffer<Luma<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, data).expect("pixel count mismatch");
            img.save(path).map_err(image_err)
        }
        ImageDepth::Bit16 => {
            let data = values.iter().map(|&c| (65535.999 * c) as u16).collect();
            let img: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_raw(width, height, data).expect("pixel count mismatch");
            img.save(path).map_err(image_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dcm_row_major_round_trip() {
        let m = crate::math::euler_rotation(&[
            (crate::math::Axis::Z, 0.4),
            (crate::math::Axis::X, -0.9),
        ]);
        let rows = dcm_row_major(m);
        let back = dcm_from_row_major(rows);
        assert_eq!(m, back);
        // Row 0 is the first row of the matrix.
        assert_eq!(rows[1], m.y.x);
    }

    #[test]
    fn averaging_skips_misses() {
        let mut p = RenderedPixel::new(0, 2);
        p.add_pixel_data(PixelData {
            t: 2.0,
            s: Point3::new(1.0, 0.0, 0.0),
        });
        p.add_pixel_data(PixelData::MISS);
        let avg = average_finite(&p, |d| Some(d.t));
        assert_eq!(avg, 2.0);

        let mut all_miss = RenderedPixel::new(1, 1);
        all_miss.add_pixel_data(PixelData::MISS);
        assert_eq!(average_finite(&all_miss, |d| Some(d.t)), 0.0);
    }
}
