// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! In-memory dataset source for synthetic terrains and tests.

use std::path::{Path, PathBuf};

use crate::math::Affine;

use super::{BandInfo, DatasetSource, RasterError};

struct MemoryBand {
    data: Vec<f32>,
    info: BandInfo,
}

/// A [`DatasetSource`] backed by grids built in memory.
///
/// Band min/max are computed on insertion, skipping no-data samples, so the
/// dataset behaves like a decoded file with statistics.
pub struct MemoryDataset {
    name: PathBuf,
    width: u32,
    height: u32,
    transform: Affine,
    projection: String,
    bands: Vec<MemoryBand>,
}

impl MemoryDataset {
    pub fn new(
        name: impl Into<PathBuf>,
        width: u32,
        height: u32,
        transform: Affine,
        projection: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            transform,
            projection: projection.into(),
            bands: Vec::new(),
        }
    }

    /// Append a band with unit scale and zero offset.
    ///
    /// Panics if `data` does not hold `width·height` samples.
    pub fn with_band(self, data: Vec<f32>, no_data: f64) -> Self {
        self.with_scaled_band(data, no_data, 1.0, 0.0)
    }

    /// Append a band with an explicit scale/offset pair.
    pub fn with_scaled_band(mut self, data: Vec<f32>, no_data: f64, scale: f64, offset: f64) -> Self {
        assert_eq!(
            data.len(),
            self.width as usize * self.height as usize,
            "band size does not match the dataset dimensions"
        );

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &raw in &data {
            let raw = f64::from(raw);
            if raw.is_nan() || raw == no_data {
                continue;
            }
            let value = scale * raw + offset;
            min = min.min(value);
            max = max.max(value);
        }

        self.bands.push(MemoryBand {
            data,
            info: BandInfo {
                min,
                max,
                scale,
                offset,
                no_data,
            },
        });
        self
    }

    /// A single-band dataset holding `value` everywhere.
    pub fn constant(
        name: impl Into<PathBuf>,
        width: u32,
        height: u32,
        transform: Affine,
        projection: impl Into<String>,
        value: f32,
    ) -> Self {
        Self::new(name, width, height, transform, projection)
            .with_band(vec![value; width as usize * height as usize], -32768.0)
    }
}

impl DatasetSource for MemoryDataset {
    fn path(&self) -> &Path {
        &self.name
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn geotransform(&self) -> Affine {
        self.transform
    }

    fn projection(&self) -> &str {
        &self.projection
    }

    fn band_info(&self, band: usize) -> BandInfo {
        self.bands[band].info
    }

    fn read_band(&self, band: usize) -> Result<Vec<f32>, RasterError> {
        self.bands
            .get(band)
            .map(|b| b.data.clone())
            .ok_or_else(|| RasterError::NoSuchBand {
                path: self.name.clone(),
                band,
            })
    }
}
