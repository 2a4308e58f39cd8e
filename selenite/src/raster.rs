// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Raster substrate: dataset sources, bands and georeferenced files.
//!
//! A [`DatasetSource`] is the capability the tracer consumes from a
//! geospatial format: raster geometry, the pixel→map affine, a projection
//! string, per-band metadata and a full-band `f32` read. [`GeoTiffDataset`]
//! implements it for GeoTIFF files with a `.prj` sidecar; [`MemoryDataset`]
//! serves synthetic grids for tests and demo scenes.
//!
//! A [`RasterFile`] owns one source plus everything derived from it: the
//! inverse affine, geographic bounds, lazily loaded [`RasterBand`]s and one
//! projection transformer per worker thread.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use cgmath::Vector2;
use thiserror::Error;

use crate::crs::{CrsError, CrsTransform};
use crate::math::Affine;

mod geotiff;
mod manager;
mod memory;

pub use geotiff::GeoTiffDataset;
pub use manager::{Dem, Dom, RasterManager};
pub use memory::MemoryDataset;

/// Errors for dataset opening and raster reads.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path:?}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("dataset {path:?} has no georeferencing tags")]
    MissingGeoreference { path: PathBuf },
    #[error("dataset {path:?} has a singular affine transform")]
    SingularTransform { path: PathBuf },
    #[error("dataset {path:?} does not contain band {band}")]
    NoSuchBand { path: PathBuf, band: usize },
    #[error("projection of {path:?} is not usable")]
    Projection {
        path: PathBuf,
        #[source]
        source: CrsError,
    },
    #[error("a DEM requires at least one raster file")]
    EmptyMosaic,
}

/// Static metadata of one raster band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandInfo {
    pub min: f64,
    pub max: f64,
    pub scale: f64,
    pub offset: f64,
    pub no_data: f64,
}

impl BandInfo {
    /// Whether a value read from this band is the no-data sentinel.
    /// NaN samples always count as no-data.
    #[inline]
    pub fn is_no_data(&self, value: f64) -> bool {
        value.is_nan() || value == self.no_data
    }
}

/// The raster-dataset capability consumed by [`RasterFile`].
pub trait DatasetSource: Send + Sync {
    /// Path (or synthetic name) identifying the dataset in messages.
    fn path(&self) -> &Path;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn band_count(&self) -> usize;
    /// Pixel→map affine, pixel-centre convention.
    fn geotransform(&self) -> Affine;
    /// PROJ-style string describing the projected CRS.
    fn projection(&self) -> &str;
    fn band_info(&self, band: usize) -> BandInfo;
    /// Read a band's full raster as `f32`, row-major.
    fn read_band(&self, band: usize) -> Result<Vec<f32>, RasterError>;
}

/// One band of a raster file: metadata plus an optional dense `f32` grid.
///
/// The grid is loaded on demand and can be dropped between frames; while
/// loaded it is immutable, so concurrent reads need no coordination beyond
/// the load/unload lock.
#[derive(Debug)]
pub struct RasterBand {
    info: BandInfo,
    width: u32,
    height: u32,
    data: RwLock<Option<Vec<f32>>>,
}

impl RasterBand {
    fn new(info: BandInfo, width: u32, height: u32) -> Self {
        Self {
            info,
            width,
            height,
            data: RwLock::new(None),
        }
    }

    #[inline]
    pub fn min(&self) -> f64 {
        self.info.min
    }

    #[inline]
    pub fn max(&self) -> f64 {
        self.info.max
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.info.scale
    }

    #[inline]
    pub fn offset(&self) -> f64 {
        self.info.offset
    }

    #[inline]
    pub fn no_data_value(&self) -> f64 {
        self.info.no_data
    }

    #[inline]
    pub fn info(&self) -> BandInfo {
        self.info
    }

    pub fn is_loaded(&self) -> bool {
        self.read_guard().is_some()
    }

    /// Materialise the band from `source` if it is not already resident.
    fn load_from(&self, source: &dyn DatasetSource, band: usize) -> Result<(), RasterError> {
        let mut slot = self.data.write().expect("raster band lock poisoned");
        if slot.is_none() {
            *slot = Some(source.read_band(band)?);
        }
        Ok(())
    }

    /// Drop the resident grid, if any.
    pub fn unload(&self) {
        *self.data.write().expect("raster band lock poisoned") = None;
    }

    /// Value at flat index `i`, with scale and offset applied. The no-data
    /// sentinel is returned untouched for the caller to recognise.
    ///
    /// Panics when the band is not loaded or `i` is out of range; both are
    /// programming errors on the rendering path.
    pub fn get(&self, i: u32) -> f64 {
        let guard = self.read_guard();
        let data = guard
            .as_ref()
            .unwrap_or_else(|| panic!("raster band read while unloaded"));
        let raw = f64::from(data[i as usize]);
        if self.info.is_no_data(raw) {
            raw
        } else {
            self.info.scale * raw + self.info.offset
        }
    }

    /// Value at pixel `(u, v)`; see [`Self::get`].
    #[inline]
    pub fn get_uv(&self, u: u32, v: u32) -> f64 {
        debug_assert!(u < self.width && v < self.height);
        self.get(v * self.width + u)
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, Option<Vec<f32>>> {
        self.data.read().expect("raster band lock poisoned")
    }
}

/// A georeferenced raster file: one dataset source, its bands, and the
/// transform chain between pixel, map and geographic coordinates.
pub struct RasterFile {
    source: Box<dyn DatasetSource>,
    n_threads: usize,

    width: u32,
    height: u32,

    transform: Affine,
    i_transform: Affine,

    top: f64,
    bottom: f64,
    left: f64,
    right: f64,

    /// Coarsest axis resolution, metres per pixel.
    resolution: f64,

    lon_bounds: [f64; 2],
    lat_bounds: [f64; 2],

    /// One transformer per worker thread, indexed by worker id, so the
    /// rendering path never locks.
    transformers: Vec<CrsTransform>,

    bands: Vec<RasterBand>,
}

impl RasterFile {
    /// Open a GeoTIFF (plus `.prj` sidecar) from `path`.
    pub fn open(path: impl AsRef<Path>, n_threads: usize) -> Result<Self, RasterError> {
        Self::from_source(Box::new(GeoTiffDataset::open(path)?), n_threads)
    }

    /// Wrap an already opened dataset source.
    pub fn from_source(
        source: Box<dyn DatasetSource>,
        n_threads: usize,
    ) -> Result<Self, RasterError> {
        let n_threads = n_threads.max(1);
        let width = source.width();
        let height = source.height();

        let transform = source.geotransform();
        let i_transform = transform
            .inverse()
            .ok_or_else(|| RasterError::SingularTransform {
                path: source.path().to_owned(),
            })?;

        let crs = CrsTransform::from_proj_string(source.projection()).map_err(|source_err| {
            RasterError::Projection {
                path: source.path().to_owned(),
                source: source_err,
            }
        })?;
        let transformers = vec![crs; n_threads];

        // Map extent of the outer pixel corners.
        let corner = transform * Vector2::new(f64::from(width), f64::from(height));
        let left = transform.xoff();
        let top = transform.yoff();
        let right = corner.x;
        let bottom = corner.y;

        let metres = transformers[0].metres_per_map_unit();
        let resolution = (transform[0].abs().max(transform[4].abs())) * metres;

        let bands = (0..source.band_count())
            .map(|k| RasterBand::new(source.band_info(k), width, height))
            .collect();

        let mut file = Self {
            source,
            n_threads,
            width,
            height,
            transform,
            i_transform,
            top,
            bottom,
            left,
            right,
            resolution,
            lon_bounds: [0.0; 2],
            lat_bounds: [0.0; 2],
            transformers,
            bands,
        };
        file.compute_geographic_bounds();
        Ok(file)
    }

    /// Geographic hull of the four raster corners, in the projection's
    /// native longitude convention.
    fn compute_geographic_bounds(&mut self) {
        let w = f64::from(self.width);
        let h = f64::from(self.height);
        let mut lon = [f64::INFINITY, f64::NEG_INFINITY];
        let mut lat = [f64::INFINITY, f64::NEG_INFINITY];
        for corner in [
            Vector2::new(-0.5, -0.5),
            Vector2::new(w - 0.5, -0.5),
            Vector2::new(-0.5, h - 0.5),
            Vector2::new(w - 0.5, h - 0.5),
        ] {
            let g = self.transformers[0].projected_to_geographic(self.transform * corner);
            lon[0] = lon[0].min(g.x);
            lon[1] = lon[1].max(g.x);
            lat[0] = lat[0].min(g.y);
            lat[1] = lat[1].max(g.y);
        }
        self.lon_bounds = lon;
        self.lat_bounds = lat;
    }

    pub fn file_name(&self) -> String {
        self.source
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[inline]
    pub fn file_path(&self) -> &Path {
        self.source.path()
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
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// The raster's coarsest axis resolution in metres per pixel. "Coarsest"
    /// means the least accurate: a raster with 20 m × 50 m pixels reports
    /// 50 m.
    #[inline]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    #[inline]
    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    #[inline]
    pub fn top(&self) -> f64 {
        self.top
    }

    #[inline]
    pub fn bottom(&self) -> f64 {
        self.bottom
    }

    #[inline]
    pub fn left(&self) -> f64 {
        self.left
    }

    #[inline]
    pub fn right(&self) -> f64 {
        self.right
    }

    #[inline]
    pub fn affine(&self) -> Affine {
        self.transform
    }

    #[inline]
    pub fn inv_affine(&self) -> Affine {
        self.i_transform
    }

    pub fn longitude_bounds(&self) -> [f64; 2] {
        self.lon_bounds
    }

    pub fn latitude_bounds(&self) -> [f64; 2] {
        self.lat_bounds
    }

    /// Inclusive point-in-rectangle test in geographic degrees. Longitudes
    /// are also tested shifted by ±360° so queries in the canonical
    /// convention match rasters stored across the antimeridian.
    pub fn is_within_geographic_bounds(&self, p: Vector2<f64>) -> bool {
        let lat_ok = p.y >= self.lat_bounds[0] && p.y <= self.lat_bounds[1];
        lat_ok
            && [p.x, p.x + 360.0, p.x - 360.0]
                .iter()
                .any(|&lon| lon >= self.lon_bounds[0] && lon <= self.lon_bounds[1])
    }

    // Raster band interfaces

    pub fn band(&self, i: usize) -> &RasterBand {
        &self.bands[i]
    }

    pub fn load_band(&self, i: usize) -> Result<(), RasterError> {
        self.bands[i].load_from(self.source.as_ref(), i)
    }

    pub fn unload_band(&self, i: usize) {
        self.bands[i].unload();
    }

    pub fn is_band_loaded(&self, i: usize) -> bool {
        self.bands[i].is_loaded()
    }

    pub fn load_bands(&self) -> Result<(), RasterError> {
        for i in 0..self.bands.len() {
            self.load_band(i)?;
        }
        Ok(())
    }

    pub fn unload_bands(&self) {
        for band in &self.bands {
            band.unload();
        }
    }

    #[inline]
    pub fn band_no_data_value(&self, i: usize) -> f64 {
        self.bands[i].no_data_value()
    }

    #[inline]
    pub fn band_data(&self, u: u32, v: u32, i: usize) -> f64 {
        self.bands[i].get_uv(u, v)
    }

    // Transformation functions

    /// Pixel to projected map coordinates.
    #[inline]
    pub fn pix2map(&self, p: Vector2<f64>) -> Vector2<f64> {
        self.transform * p
    }

    /// Projected map to pixel coordinates.
    #[inline]
    pub fn map2pix(&self, m: Vector2<f64>) -> Vector2<f64> {
        self.i_transform * m
    }

    /// Geographic degrees to projected map coordinates, using the worker's
    /// transformer.
    #[inline]
    pub fn sph2map(&self, s: Vector2<f64>, thread_id: usize) -> Vector2<f64> {
        self.transformers[thread_id].geographic_to_projected(s)
    }

    /// Projected map coordinates to geographic degrees.
    #[inline]
    pub fn map2sph(&self, m: Vector2<f64>, thread_id: usize) -> Vector2<f64> {
        self.transformers[thread_id].projected_to_geographic(m)
    }

    /// Geographic degrees to pixel coordinates.
    #[inline]
    pub fn sph2pix(&self, s: Vector2<f64>, thread_id: usize) -> Vector2<f64> {
        self.map2pix(self.sph2map(s, thread_id))
    }

    /// Pixel coordinates to geographic degrees.
    #[inline]
    pub fn pix2sph(&self, p: Vector2<f64>, thread_id: usize) -> Vector2<f64> {
        self.map2sph(self.pix2map(p), thread_id)
    }

    /// The projected CRS shared by all of this file's transformers.
    #[inline]
    pub fn crs(&self) -> &CrsTransform {
        &self.transformers[0]
    }
}

impl std::fmt::Debug for RasterFile {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("RasterFile")
            .field("path", &self.source.path())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bands", &self.bands.len())
            .field("resolution", &self.resolution)
            .field("lon_bounds", &self.lon_bounds)
            .field("lat_bounds", &self.lat_bounds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Vector2<f64>, b: Vector2<f64>, eps: f64) {
        assert!(
            (a.x - b.x).abs() <= eps && (a.y - b.y).abs() <= eps,
            "{:?} != {:?}",
            a,
            b
        );
    }

    /// 10×10 raster over lon [0, 10], lat [0, 10] degrees, equirectangular.
    fn square_file() -> RasterFile {
        let radius: f64 = 1_737_400.0;
        let step = radius.to_radians(); // one degree in metres
        let transform = Affine::new(step, 0.0, 0.5 * step, 0.0, -step, 9.5 * step);
        let source = MemoryDataset::new(
            "square.tif",
            10,
            10,
            transform,
            "+proj=eqc +lat_ts=0 +lon_0=0 +R=1737400",
        )
        .with_band((0..100).map(|i| i as f32).collect(), -9999.0);
        RasterFile::from_source(Box::new(source), 2).unwrap()
    }

    #[test]
    fn affine_chain_is_identity() {
        let file = square_file();
        let p = Vector2::new(3.25, 7.5);
        assert_close(file.map2pix(file.pix2map(p)), p, 1e-9);
    }

    #[test]
    fn geographic_round_trip_through_pixels() {
        let file = square_file();
        let g = Vector2::new(4.2, 6.7);
        let pix = file.sph2pix(g, 0);
        assert_close(file.pix2sph(pix, 1), g, 1e-9);
    }

    #[test]
    fn geographic_bounds_cover_the_raster() {
        let file = square_file();
        assert!(file.is_within_geographic_bounds(Vector2::new(5.0, 5.0)));
        assert!(file.is_within_geographic_bounds(Vector2::new(0.0, 10.0)));
        assert!(!file.is_within_geographic_bounds(Vector2::new(11.0, 5.0)));
        assert!(!file.is_within_geographic_bounds(Vector2::new(5.0, -1.0)));
    }

    #[test]
    fn bands_load_lazily() {
        let file = square_file();
        assert!(!file.is_band_loaded(0));
        file.load_band(0).unwrap();
        assert!(file.is_band_loaded(0));
        assert_eq!(file.band_data(3, 2, 0), 23.0);
        file.unload_band(0);
        assert!(!file.is_band_loaded(0));
    }

    #[test]
    fn no_data_is_returned_untouched() {
        let transform = Affine::scale(1.0, 1.0);
        let source = MemoryDataset::new("nd.tif", 2, 1, transform, "+proj=longlat +R=1737400")
            .with_scaled_band(vec![-9999.0, 2.0], -9999.0, 0.5, 100.0);
        let file = RasterFile::from_source(Box::new(source), 1).unwrap();
        file.load_band(0).unwrap();
        assert_eq!(file.band_data(0, 0, 0), -9999.0);
        assert_eq!(file.band_data(1, 0, 0), 101.0);
    }

    #[test]
    fn resolution_is_the_coarsest_axis() {
        let transform = Affine::new(20.0, 0.0, 0.0, 0.0, -50.0, 0.0);
        let source = MemoryDataset::new("r.tif", 4, 4, transform, "+proj=eqc +R=1737400")
            .with_band(vec![0.0; 16], -9999.0);
        let file = RasterFile::from_source(Box::new(source), 1).unwrap();
        assert!((file.resolution() - 50.0).abs() <= 1e-12);
    }

    #[test]
    #[should_panic]
    fn unloaded_read_is_fatal() {
        let file = square_file();
        file.band_data(0, 0, 0);
    }
}
