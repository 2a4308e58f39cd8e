// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Mosaics of overlapping raster files, with usage-driven eviction, and the
//! DEM/DOM specialisations built on top of them.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use cgmath::Vector2;
use log::{debug, trace};

use super::{RasterError, RasterFile};

/// Per-file usage bookkeeping. Counters are relaxed atomics: they only feed
/// coarse eviction thresholds, so lost increments are acceptable.
struct FileUsage {
    used: AtomicU32,
    touched: AtomicBool,
}

/// A set of overlapping [`RasterFile`]s covering a region.
///
/// Geographic queries are routed to the first file whose bounds contain the
/// point; sampled values come from band 0. Between frames,
/// [`RasterManager::cleanup`] evicts the band data of files that have gone
/// unused for a configurable number of cycles; they are transparently
/// re-loaded on the next access.
pub struct RasterManager {
    files: Vec<RasterFile>,
    /// Coarsest resolution across all files, metres per pixel.
    resolution: f64,
    usage: Vec<FileUsage>,
    /// Guards band load/unload decisions; holds the per-file count of
    /// consecutive cleanup cycles without a touch.
    update_lock: Mutex<Vec<u32>>,
}

impl RasterManager {
    pub fn new(files: Vec<RasterFile>) -> Self {
        let resolution = files
            .iter()
            .map(RasterFile::resolution)
            .fold(0.0, f64::max);
        let usage = files
            .iter()
            .map(|_| FileUsage {
                used: AtomicU32::new(0),
                touched: AtomicBool::new(false),
            })
            .collect();
        let idle_cycles = vec![0; files.len()];
        Self {
            files,
            resolution,
            usage,
            update_lock: Mutex::new(idle_cycles),
        }
    }

    /// Open every descriptor path as a GeoTIFF raster file.
    pub fn open(
        descriptors: &[crate::options::RasterDescriptor],
        n_threads: usize,
    ) -> Result<Self, RasterError> {
        let files = descriptors
            .iter()
            .map(|d| RasterFile::open(&d.path, n_threads))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(files))
    }

    #[inline]
    pub fn n_rasters(&self) -> usize {
        self.files.len()
    }

    /// Coarsest (least accurate) resolution across the mosaic, metres.
    #[inline]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn raster_file(&self, i: usize) -> &RasterFile {
        &self.files[i]
    }

    /// Times file `i` has served a query since construction.
    pub fn usage_count(&self, i: usize) -> u32 {
        self.usage[i].used.load(Ordering::Relaxed)
    }

    /// Sample the mosaic at geographic `(lon, lat)` degrees.
    ///
    /// Returns [`None`] when no file covers the point or the stencil hits
    /// the file's no-data sentinel; the caller treats that as "no terrain".
    pub fn get_data(&self, lonlat: Vector2<f64>, interp: bool, thread_id: usize) -> Option<f64> {
        for (i, file) in self.files.iter().enumerate() {
            if !file.is_within_geographic_bounds(lonlat) {
                continue;
            }
            self.usage[i].used.fetch_add(1, Ordering::Relaxed);
            self.usage[i].touched.store(true, Ordering::Relaxed);
            self.ensure_loaded(i);

            let pix = file.sph2pix(lonlat, thread_id);
            return if interp {
                interpolate(file, pix)
            } else {
                let band = file.band(0);
                let u = clamp_pixel(pix.x, file.width());
                let v = clamp_pixel(pix.y, file.height());
                let value = band.get_uv(u, v);
                if band.info().is_no_data(value) {
                    None
                } else {
                    Some(value)
                }
            };
        }
        None
    }

    /// Load every file's first band now instead of on first access.
    pub fn load_rasters(&self) -> Result<(), RasterError> {
        let _guard = self.lock_updates();
        for file in &self.files {
            file.load_band(0)?;
        }
        Ok(())
    }

    /// Drop every file's resident band data.
    pub fn unload_rasters(&self) {
        let _guard = self.lock_updates();
        for file in &self.files {
            file.unload_bands();
        }
    }

    /// Evict files untouched for `threshold` consecutive cleanup cycles.
    /// Called between frames; touched flags are cleared for the next cycle.
    pub fn cleanup(&self, threshold: u32) {
        let mut idle_cycles = self.lock_updates();
        for (i, file) in self.files.iter().enumerate() {
            if self.usage[i].touched.swap(false, Ordering::Relaxed) {
                idle_cycles[i] = 0;
                continue;
            }
            idle_cycles[i] += 1;
            if idle_cycles[i] >= threshold && file.is_band_loaded(0) {
                debug!("evicting raster {}", file.file_name());
                file.unload_bands();
            }
        }
    }

    /// Band 0 of file `i` is lazily re-loaded after an eviction. Raster I/O
    /// failure here is fatal to the frame; no partial image is produced.
    fn ensure_loaded(&self, i: usize) {
        let file = &self.files[i];
        if file.is_band_loaded(0) {
            return;
        }
        let _guard = self.lock_updates();
        if !file.is_band_loaded(0) {
            trace!("loading raster {}", file.file_name());
            file.load_band(0)
                .unwrap_or_else(|e| panic!("failed to load raster band: {}", e));
        }
    }

    fn lock_updates(&self) -> std::sync::MutexGuard<'_, Vec<u32>> {
        self.update_lock.lock().expect("raster update lock poisoned")
    }
}

/// Truncate a fractional pixel coordinate into the raster, matching the
/// nearest-neighbour convention of the sampling path.
fn clamp_pixel(x: f64, size: u32) -> u32 {
    (x.max(0.0) as u32).min(size - 1)
}

/// Bilinear interpolation over the four enclosing pixels. Any no-data
/// contribution collapses the result to no-data; mixing real samples with
/// the sentinel would fabricate terrain.
fn interpolate(file: &RasterFile, pix: Vector2<f64>) -> Option<f64> {
    let band = file.band(0);
    let info = band.info();

    let max_u = file.width() - 1;
    let max_v = file.height() - 1;
    let u0 = clamp_pixel(pix.x.floor(), file.width()).min(max_u.saturating_sub(1));
    let v0 = clamp_pixel(pix.y.floor(), file.height()).min(max_v.saturating_sub(1));
    let u1 = (u0 + 1).min(max_u);
    let v1 = (v0 + 1).min(max_v);

    let du = (pix.x - f64::from(u0)).clamp(0.0, 1.0);
    let dv = (pix.y - f64::from(v0)).clamp(0.0, 1.0);

    let mut value = 0.0;
    for (u, v, w) in [
        (u0, v0, (1.0 - du) * (1.0 - dv)),
        (u1, v0, du * (1.0 - dv)),
        (u0, v1, (1.0 - du) * dv),
        (u1, v1, du * dv),
    ] {
        let sample = band.get_uv(u, v);
        if info.is_no_data(sample) {
            return None;
        }
        value += w * sample;
    }
    Some(value)
}

/// A digital elevation model: a raster mosaic whose band values are
/// altitudes (metres) above the datum's mean radius.
pub struct Dem {
    manager: RasterManager,
    min_altitude: f64,
    max_altitude: f64,
    mean_radius: f64,
}

impl Dem {
    /// Build from at least one raster file. The mean radius is taken from
    /// the first file's datum; the products this consumes share one datum.
    pub fn new(files: Vec<RasterFile>) -> Result<Self, RasterError> {
        if files.is_empty() {
            return Err(RasterError::EmptyMosaic);
        }

        let mut min_altitude = f64::INFINITY;
        let mut max_altitude = f64::NEG_INFINITY;
        for file in &files {
            min_altitude = min_altitude.min(file.band(0).min());
            max_altitude = max_altitude.max(file.band(0).max());
        }
        let mean_radius = files[0].crs().semi_major_axis();

        Ok(Self {
            manager: RasterManager::new(files),
            min_altitude,
            max_altitude,
            mean_radius,
        })
    }

    #[inline]
    pub fn manager(&self) -> &RasterManager {
        &self.manager
    }

    /// Altitude (metres above the mean radius) at `(lon, lat)` degrees.
    #[inline]
    pub fn get_data(&self, lonlat: Vector2<f64>, interp: bool, thread_id: usize) -> Option<f64> {
        self.manager.get_data(lonlat, interp, thread_id)
    }

    #[inline]
    pub fn resolution(&self) -> f64 {
        self.manager.resolution()
    }

    pub fn cleanup(&self, threshold: u32) {
        self.manager.cleanup(threshold);
    }

    /// Smallest altitude over every band of the mosaic.
    #[inline]
    pub fn min_altitude(&self) -> f64 {
        self.min_altitude
    }

    /// Largest altitude over every band of the mosaic.
    #[inline]
    pub fn max_altitude(&self) -> f64 {
        self.max_altitude
    }

    /// Semi-major axis of the geodetic datum.
    #[inline]
    pub fn mean_radius(&self) -> f64 {
        self.mean_radius
    }

    #[inline]
    pub fn min_radius(&self) -> f64 {
        self.mean_radius + self.min_altitude
    }

    #[inline]
    pub fn max_radius(&self) -> f64 {
        self.mean_radius + self.max_altitude
    }
}

/// A digital orthophoto map: a (possibly empty) albedo mosaic.
pub struct Dom {
    manager: RasterManager,
}

impl Dom {
    pub fn new(files: Vec<RasterFile>) -> Self {
        Self {
            manager: RasterManager::new(files),
        }
    }

    #[inline]
    pub fn manager(&self) -> &RasterManager {
        &self.manager
    }

    /// Albedo at `(lon, lat)` degrees, clamped to non-negative values.
    #[inline]
    pub fn get_color(&self, lonlat: Vector2<f64>, interp: bool, thread_id: usize) -> Option<f64> {
        self.manager
            .get_data(lonlat, interp, thread_id)
            .map(|c| c.max(0.0))
    }

    pub fn cleanup(&self, threshold: u32) {
        self.manager.cleanup(threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Affine;
    use crate::raster::MemoryDataset;

    const PROJ: &str = "+proj=longlat +R=1737400";

    /// One-degree-per-pixel tile covering lon [lon0, lon0+w], lat [0, h].
    fn tile(name: &str, lon0: f64, w: u32, h: u32, data: Vec<f32>) -> RasterFile {
        let transform = Affine::new(1.0, 0.0, lon0 + 0.5, 0.0, -1.0, f64::from(h) - 0.5);
        let source = MemoryDataset::new(name, w, h, transform, PROJ).with_band(data, -9999.0);
        RasterFile::from_source(Box::new(source), 1).unwrap()
    }

    #[test]
    fn routes_to_the_covering_file() {
        let a = tile("a.tif", 0.0, 4, 4, vec![1.0; 16]);
        let b = tile("b.tif", 4.0, 4, 4, vec![2.0; 16]);
        let manager = RasterManager::new(vec![a, b]);

        assert_eq!(manager.get_data(Vector2::new(2.0, 2.0), false, 0), Some(1.0));
        assert_eq!(manager.get_data(Vector2::new(6.0, 2.0), false, 0), Some(2.0));
        assert_eq!(manager.get_data(Vector2::new(30.0, 2.0), false, 0), None);

        assert_eq!(manager.usage_count(0), 1);
        assert_eq!(manager.usage_count(1), 1);
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        // 2×1: values 10 at lon 0.5, 20 at lon 1.5.
        let file = tile("g.tif", 0.0, 2, 1, vec![10.0, 20.0]);
        let manager = RasterManager::new(vec![file]);
        let v = manager.get_data(Vector2::new(1.0, 0.5), true, 0).unwrap();
        assert!((v - 15.0).abs() < 1e-9);
    }

    #[test]
    fn no_data_collapses_the_stencil() {
        let file = tile("n.tif", 0.0, 2, 1, vec![10.0, -9999.0]);
        let manager = RasterManager::new(vec![file]);
        assert_eq!(manager.get_data(Vector2::new(1.0, 0.5), true, 0), None);
        // Nearest-neighbour still works on the valid side.
        assert_eq!(manager.get_data(Vector2::new(0.6, 0.5), false, 0), Some(10.0));
    }

    #[test]
    fn eviction_after_idle_cycles() {
        let a = tile("a.tif", 0.0, 2, 2, vec![1.0; 4]);
        let b = tile("b.tif", 4.0, 2, 2, vec![2.0; 4]);
        let manager = RasterManager::new(vec![a, b]);

        // Frame A touches only tile 0.
        manager.get_data(Vector2::new(1.0, 1.0), false, 0);
        manager.cleanup(2);
        // Frame B touches only tile 1, twice over.
        manager.get_data(Vector2::new(5.0, 1.0), false, 0);
        manager.cleanup(2);
        manager.get_data(Vector2::new(5.0, 1.0), false, 0);
        manager.cleanup(2);

        assert!(!manager.raster_file(0).is_band_loaded(0));
        assert!(manager.raster_file(1).is_band_loaded(0));

        // The evicted tile reloads transparently on the next query.
        assert_eq!(manager.get_data(Vector2::new(1.0, 1.0), false, 0), Some(1.0));
    }

    #[test]
    fn dem_aggregates() {
        let a = tile("a.tif", 0.0, 2, 1, vec![-120.0, 40.0]);
        let b = tile("b.tif", 4.0, 2, 1, vec![0.0, 350.0]);
        let dem = Dem::new(vec![a, b]).unwrap();
        assert_eq!(dem.min_altitude(), -120.0);
        assert_eq!(dem.max_altitude(), 350.0);
        assert_eq!(dem.mean_radius(), 1_737_400.0);
        assert_eq!(dem.min_radius(), 1_737_280.0);
        assert_eq!(dem.max_radius(), 1_737_750.0);
    }

    #[test]
    fn dem_requires_a_file() {
        assert!(matches!(Dem::new(Vec::new()), Err(RasterError::EmptyMosaic)));
    }

    #[test]
    fn dom_clamps_negative_albedo() {
        let file = tile("d.tif", 0.0, 2, 1, vec![-5.0, 128.0]);
        let dom = Dom::new(vec![file]);
        assert_eq!(dom.get_color(Vector2::new(0.6, 0.5), false, 0), Some(0.0));
        assert_eq!(dom.get_color(Vector2::new(1.6, 0.5), false, 0), Some(128.0));
    }
}
