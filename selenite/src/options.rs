// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! User-facing configuration for the tracer, renderer and world.

use std::path::PathBuf;

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};

/// Verbosity of the tracer's stderr reporting.
///
/// The library itself emits everything through the [`log`] macros; frontends
/// map this level to a `log` filter (`None` → off, `Minimal` → info,
/// `Detailed` → debug).
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Minimal,
    Detailed,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Minimal
    }
}

/// Super-sampled anti-aliasing options (pinhole cameras only).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SsaaOptions {
    /// Whether the post-tracing SSAA pass runs at all.
    pub active: bool,
    /// Samples per flagged pixel; one of {4, 8, 16}.
    pub n_samples: usize,
    /// A pixel is flagged when its centre `t` differs from a neighbour's by
    /// more than `threshold` ray-resolution steps.
    pub threshold: NotNan<f64>,
    /// Neighbourhood radius (pixels) used for flagging and for gathering the
    /// refined search interval.
    pub boundary_size: u16,
    /// Padding applied to the refined `t` interval, in ray-resolution steps.
    pub res_multiplier: f64,
}

impl Default for SsaaOptions {
    fn default() -> Self {
        Self {
            active: true,
            n_samples: 4,
            threshold: NotNan::new(3.0).unwrap(),
            boundary_size: 1,
            res_multiplier: 5.0,
        }
    }
}

/// Defocus-blur options (thin-lens cameras only).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DefocusOptions {
    /// Stochastic lens/pixel samples per pixel.
    pub n_samples: usize,
}

impl Default for DefocusOptions {
    fn default() -> Self {
        Self { n_samples: 8 }
    }
}

/// Renderer scheduling and refinement options.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct RenderingOptions {
    pub ssaa: SsaaOptions,
    pub defocus: DefocusOptions,

    /// Probe grid dimensions; clamped to the image dimensions.
    pub grid_width: usize,
    pub grid_height: usize,

    pub log_level: LogLevel,

    /// Use adaptive row/column tracing instead of per-pixel probe bounds.
    pub adaptive_tracing: bool,
    /// In adaptive tracing, a pixel's search interval ends at the previous
    /// pixel's hit distance plus this many ray-resolution steps.
    pub adaptive_margin: f64,
}

impl Default for RenderingOptions {
    fn default() -> Self {
        Self {
            ssaa: SsaaOptions::default(),
            defocus: DefocusOptions::default(),
            grid_width: 128,
            grid_height: 128,
            log_level: LogLevel::default(),
            adaptive_tracing: true,
            adaptive_margin: 10.0,
        }
    }
}

impl RenderingOptions {
    /// Constrain fields to valid/practical values.
    pub fn repair(mut self) -> Self {
        if ![4, 8, 16].contains(&self.ssaa.n_samples) {
            self.ssaa.n_samples = 4;
        }
        self.ssaa.threshold = self.ssaa.threshold.max(NotNan::new(0.0).unwrap());
        self.ssaa.boundary_size = self.ssaa.boundary_size.max(1);
        self.ssaa.res_multiplier = self.ssaa.res_multiplier.max(1.0);
        self.defocus.n_samples = self.defocus.n_samples.clamp(1, 64);
        self.grid_width = self.grid_width.max(1);
        self.grid_height = self.grid_height.max(1);
        self.adaptive_margin = self.adaptive_margin.max(1.0);
        self
    }
}

/// Reference to one raster file on disk (a GeoTIFF plus its `.prj`
/// projection sidecar).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RasterDescriptor {
    pub path: PathBuf,
}

impl RasterDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// World construction options: the rasters to mosaic and their lifecycle.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct WorldOptions {
    /// Elevation tiles; at least one is required.
    pub dem_files: Vec<RasterDescriptor>,
    /// Albedo tiles; optional.
    pub dom_files: Vec<RasterDescriptor>,

    pub log_level: LogLevel,

    /// Number of consecutive cleanup cycles a file must go untouched before
    /// its bands are evicted from memory.
    pub raster_usage_threshold: u32,

    /// Lower clamp on the ray-marching resolution, metres.
    pub min_res: f64,

    /// Surface-hit refinement tolerance, metres; negative accepts the
    /// coarse marching sample unrefined.
    pub max_err: f64,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl WorldOptions {
    pub fn new(dem_files: Vec<RasterDescriptor>, dom_files: Vec<RasterDescriptor>) -> Self {
        Self {
            dem_files,
            dom_files,
            log_level: LogLevel::default(),
            raster_usage_threshold: 2,
            min_res: 1.0,
            max_err: -1.0,
        }
    }
}

/// Top-level tracer options.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct RayTracerOptions {
    /// Worker threads (at least 1).
    pub n_threads: usize,
    pub log_level: LogLevel,
    /// Base seed for the per-worker RNGs; fixed seed ⇒ identical defocus
    /// and SSAA sample sequences across runs.
    pub seed: u64,
    pub world: WorldOptions,
    pub renderer: RenderingOptions,
}

impl Default for RayTracerOptions {
    fn default() -> Self {
        Self {
            n_threads: 1,
            log_level: LogLevel::default(),
            seed: 0,
            world: WorldOptions::new(Vec::new(), Vec::new()),
            renderer: RenderingOptions::default(),
        }
    }
}

impl RayTracerOptions {
    pub fn new(n_threads: usize, log_level: LogLevel) -> Self {
        let mut opts = Self::default();
        opts.n_threads = n_threads.max(1);
        opts.log_level = log_level;
        opts.world.log_level = log_level;
        opts.renderer.log_level = log_level;
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_fixes_sample_count() {
        let mut opts = RenderingOptions::default();
        opts.ssaa.n_samples = 5;
        opts.grid_width = 0;
        let repaired = opts.repair();
        assert_eq!(repaired.ssaa.n_samples, 4);
        assert_eq!(repaired.grid_width, 1);
    }

    #[test]
    fn log_levels_are_ordered() {
        assert!(LogLevel::Detailed > LogLevel::Minimal);
        assert!(LogLevel::Minimal > LogLevel::None);
    }

    #[test]
    fn options_round_trip_through_json() {
        let opts = RayTracerOptions::new(4, LogLevel::Detailed);
        let json = serde_json::to_string(&opts).unwrap();
        let back: RayTracerOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }
}
