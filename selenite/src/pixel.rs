// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Per-pixel data exchanged between the renderer and its tasks.

use cgmath::Point3;

use crate::math::FreeCoordinate;

/// Outcome of tracing a single ray sample.
///
/// `t` is the ray parameter at the intersection, or `f64::INFINITY` when the
/// ray missed the surface; in that case `s` is meaningless and must not be
/// read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelData {
    /// Ray parameter at the intersection.
    pub t: FreeCoordinate,
    /// Spherical coordinates `(radius, longitude, latitude)` of the hit,
    /// radians.
    pub s: Point3<FreeCoordinate>,
}

impl PixelData {
    /// The "no intersection" sample.
    pub const MISS: PixelData = PixelData {
        t: f64::INFINITY,
        s: Point3 {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        },
    };

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.t.is_finite()
    }
}

/// A pixel queued for rendering: the sample coordinates to trace and the
/// `t` interval the search is restricted to.
#[derive(Clone, Debug)]
pub struct TaskedPixel {
    /// Global pixel id (row-major over the camera image).
    pub id: u32,
    /// Number of samples; the `u`/`v` vectors have exactly this length.
    pub n_samples: usize,
    pub t_min: FreeCoordinate,
    pub t_max: FreeCoordinate,
    /// Fractional pixel coordinates of each sample.
    pub u: Vec<FreeCoordinate>,
    pub v: Vec<FreeCoordinate>,
}

impl TaskedPixel {
    /// A pixel with `n_samples` samples, all initially at `(u, v)`.
    pub fn new(id: u32, u: FreeCoordinate, v: FreeCoordinate, n_samples: usize) -> Self {
        Self {
            id,
            n_samples,
            t_min: 0.0,
            t_max: f64::INFINITY,
            u: vec![u; n_samples],
            v: vec![v; n_samples],
        }
    }
}

/// Spread the samples of `tp` over the pixel square according to the
/// super-sampling patterns: a rotated 2×2 grid for 4 samples, a 3×3 grid
/// minus the centre for 8, and a regular 4×4 grid for 16.
///
/// Panics on an unsupported sample count; [`crate::options::SsaaOptions`]
/// is repaired to one of {4, 8, 16} before reaching this point.
pub fn update_ssaa_coordinates(tp: &mut TaskedPixel) {
    let u = tp.u[0];
    let v = tp.v[0];

    match tp.n_samples {
        4 => {
            for (k, (du, dv)) in [(-0.25, -0.25), (0.25, -0.25), (-0.25, 0.25), (0.25, 0.25)]
                .into_iter()
                .enumerate()
            {
                tp.u[k] = u + du;
                tp.v[k] = v + dv;
            }
        }
        8 => {
            // 3×3 grid with the centre left out.
            let mut k = 0;
            for du in [-0.25, 0.0, 0.25] {
                for dv in [-0.25, 0.0, 0.25] {
                    if du == 0.0 && dv == 0.0 {
                        continue;
                    }
                    tp.u[k] = u + du;
                    tp.v[k] = v + dv;
                    k += 1;
                }
            }
        }
        16 => {
            let mut k = 0;
            for i in 0..4 {
                for j in 0..4 {
                    tp.u[k] = u - 0.375 + 0.25 * j as f64;
                    tp.v[k] = v - 0.375 + 0.25 * i as f64;
                    k += 1;
                }
            }
        }
        n => panic!("unsupported number of SSAA pixel samples: {}", n),
    }
}

/// The traced samples of one pixel, as assembled back by the renderer.
///
/// `data[0]` is the centre sample; `t_min`/`t_max` track the finite sample
/// range only.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedPixel {
    pub id: u32,
    pub n_samples: usize,
    pub data: Vec<PixelData>,
    t_min: FreeCoordinate,
    t_max: FreeCoordinate,
}

impl RenderedPixel {
    pub fn new(id: u32, n_samples: usize) -> Self {
        Self {
            id,
            n_samples,
            data: Vec::with_capacity(n_samples),
            t_min: f64::INFINITY,
            t_max: f64::NEG_INFINITY,
        }
    }

    /// Append a traced sample, updating the finite distance range.
    pub fn add_pixel_data(&mut self, d: PixelData) {
        if d.is_hit() {
            self.t_min = self.t_min.min(d.t);
            self.t_max = self.t_max.max(d.t);
        }
        self.data.push(d);
    }

    /// Distance of the centre sample.
    #[inline]
    pub fn distance(&self) -> FreeCoordinate {
        self.data[0].t
    }

    /// Smallest finite sample distance, or `+∞` when every sample missed.
    #[inline]
    pub fn min_distance(&self) -> FreeCoordinate {
        self.t_min
    }

    /// Largest finite sample distance, or `-∞` when every sample missed.
    #[inline]
    pub fn max_distance(&self) -> FreeCoordinate {
        self.t_max
    }

    /// Mean distance over the finite samples; `+∞` when every sample missed.
    pub fn mean_distance(&self) -> FreeCoordinate {
        let mut t = 0.0;
        let mut hits = 0;
        for d in &self.data {
            if d.is_hit() {
                t += d.t;
                hits += 1;
            }
        }
        if hits == 0 {
            f64::INFINITY
        } else {
            t / hits as f64
        }
    }

    /// Replace this pixel's samples with a super-sampled set, keeping the
    /// previously traced centre ray as sample 0.
    pub fn merge_supersamples(&mut self, refined: RenderedPixel) {
        let centre = self.data[0];
        self.n_samples = refined.n_samples;
        self.data.clear();
        self.t_min = f64::INFINITY;
        self.t_max = f64::NEG_INFINITY;
        self.add_pixel_data(centre);
        for &d in refined.data.iter().skip(1) {
            self.add_pixel_data(d);
        }
    }
}
