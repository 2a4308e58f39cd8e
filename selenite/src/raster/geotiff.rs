// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! GeoTIFF-backed dataset source.
//!
//! Georeferencing is read from the `ModelPixelScale`/`ModelTiepoint` tags;
//! the projected CRS comes from a PROJ-format `.prj` sidecar next to the
//! file, matching how the survey products this tracer consumes are shipped.
//! Each TIFF directory (IFD) is exposed as one band.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::math::Affine;

use super::{BandInfo, DatasetSource, RasterError};

pub struct GeoTiffDataset {
    path: PathBuf,
    width: u32,
    height: u32,
    transform: Affine,
    projection: String,
    infos: Vec<BandInfo>,
}

impl GeoTiffDataset {
    /// Open `path`, reading geometry, geo-tags, the `.prj` sidecar and
    /// per-band statistics. Band data itself is not kept resident; it is
    /// re-read on [`DatasetSource::read_band`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RasterError> {
        let path = path.as_ref().to_owned();
        let mut decoder = Self::decoder(&path)?;

        let (width, height) = decoder
            .dimensions()
            .map_err(|e| decode_error(&path, &e))?;

        let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok();
        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok();
        let transform = match (pixel_scale, tiepoint) {
            (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
                // Tiepoint maps raster-space (i, j) onto map (x, y); raster
                // space is pixel-is-area, so shift half a pixel to get the
                // pixel-centre affine used everywhere else.
                let (sx, sy) = (scale[0], scale[1]);
                let x0 = tie[3] - tie[0] * sx;
                let y0 = tie[4] + tie[1] * sy;
                Affine::new(sx, 0.0, x0 + 0.5 * sx, 0.0, -sy, y0 - 0.5 * sy)
            }
            _ => {
                return Err(RasterError::MissingGeoreference { path });
            }
        };

        let no_data = decoder
            .get_tag_ascii_string(Tag::GdalNodata)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(f64::NAN);

        // One band per image directory; scan each once for its statistics.
        let mut infos = Vec::new();
        loop {
            let data = read_current_band(&mut decoder, &path)?;
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for &raw in &data {
                let raw = f64::from(raw);
                if raw.is_nan() || raw == no_data {
                    continue;
                }
                min = min.min(raw);
                max = max.max(raw);
            }
            infos.push(BandInfo {
                min,
                max,
                scale: 1.0,
                offset: 0.0,
                no_data,
            });

            if !decoder.more_images() {
                break;
            }
            decoder
                .next_image()
                .map_err(|e| decode_error(&path, &e))?;
        }

        let projection = read_sidecar_projection(&path)?;

        Ok(Self {
            path,
            width,
            height,
            transform,
            projection,
            infos,
        })
    }

    fn decoder(path: &Path) -> Result<Decoder<BufReader<File>>, RasterError> {
        let file = File::open(path).map_err(|source| RasterError::Io {
            path: path.to_owned(),
            source,
        })?;
        Decoder::new(BufReader::new(file)).map_err(|e| decode_error(path, &e))
    }
}

impl DatasetSource for GeoTiffDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn band_count(&self) -> usize {
        self.infos.len()
    }

    fn geotransform(&self) -> Affine {
        self.transform
    }

    fn projection(&self) -> &str {
        &self.projection
    }

    fn band_info(&self, band: usize) -> BandInfo {
        self.infos[band]
    }

    fn read_band(&self, band: usize) -> Result<Vec<f32>, RasterError> {
        if band >= self.infos.len() {
            return Err(RasterError::NoSuchBand {
                path: self.path.clone(),
                band,
            });
        }
        let mut decoder = Self::decoder(&self.path)?;
        for _ in 0..band {
            decoder
                .next_image()
                .map_err(|e| decode_error(&self.path, &e))?;
        }
        read_current_band(&mut decoder, &self.path)
    }
}

/// The `.prj` sidecar holding the PROJ string, next to the raster.
fn read_sidecar_projection(path: &Path) -> Result<String, RasterError> {
    let sidecar = path.with_extension("prj");
    std::fs::read_to_string(&sidecar).map_err(|source| RasterError::Io {
        path: sidecar,
        source,
    })
}

fn read_current_band(
    decoder: &mut Decoder<BufReader<File>>,
    path: &Path,
) -> Result<Vec<f32>, RasterError> {
    let image = decoder
        .read_image()
        .map_err(|e| decode_error(path, &e))?;
    // Integer rasters are common for DOMs; widen everything to f32.
    Ok(match image {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
    })
}

fn decode_error(path: &Path, error: &dyn std::fmt::Display) -> RasterError {
    RasterError::Decode {
        path: path.to_owned(),
        message: error.to_string(),
    }
}
