// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Coarse probe grid estimating per-pixel `t` search bounds.
//!
//! Before any DEM sampling, a lattice of probe pixels is solved against the
//! bounding spheres of the terrain: the outer sphere (maximum radius) gives
//! the interval a surface hit must lie in, and the inner sphere (minimum
//! radius), when hit, caps it, since the surface is crossed no later than
//! the inner-sphere entry. Per-pixel bounds are then bilinear blends of the
//! enclosing probes.

use crate::camera::Camera;
use crate::world::World;

/// Analytic `t` bounds of one probe ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ProbeBounds {
    pub t_min: f64,
    pub t_max: f64,
}

/// A `(gw+1) × (gh+1)` lattice of probe pixels over the camera image.
pub(crate) struct ScreenGrid {
    /// Probe columns (pixel u of each lattice column).
    cols: Vec<u32>,
    /// Probe rows (pixel v of each lattice row).
    rows: Vec<u32>,
    /// Per-probe bounds, row-major over the lattice; `None` when the probe
    /// ray misses the outer sphere entirely ("black" probe).
    bounds: Vec<Option<ProbeBounds>>,
}

impl ScreenGrid {
    /// Build the lattice and solve every probe. `grid_width`/`grid_height`
    /// are clamped to the image dimensions.
    pub fn new(cam: &Camera, world: &World, grid_width: usize, grid_height: usize) -> Self {
        let cols = lattice(cam.width(), grid_width);
        let rows = lattice(cam.height(), grid_height);

        let max_radius = world.outer_radius();
        let min_radius = world.inner_radius();

        let mut bounds = Vec::with_capacity(cols.len() * rows.len());
        for &v in &rows {
            for &u in &cols {
                let ray = cam.centre_ray(f64::from(u), f64::from(v));
                bounds.push(ray.parameters(max_radius).map(|(outer_enter, outer_exit)| {
                    let t_max = match ray.parameters(min_radius) {
                        Some((inner_enter, _)) => inner_enter,
                        None => outer_exit,
                    };
                    ProbeBounds {
                        t_min: outer_enter.max(0.0),
                        t_max,
                    }
                }));
            }
        }

        Self { cols, rows, bounds }
    }

    fn probe(&self, col: usize, row: usize) -> Option<ProbeBounds> {
        self.bounds[row * self.cols.len() + col]
    }

    /// Search bounds for the pixel at `(u, v)`: the bilinear blend of the
    /// four enclosing probes. Cells with some black corners fall back to the
    /// conservative envelope of the finite ones; fully black cells return
    /// [`None`] and the pixel is skipped as a guaranteed miss.
    pub fn pixel_bounds(&self, u: u32, v: u32) -> Option<ProbeBounds> {
        let (c0, fu) = locate(&self.cols, u);
        let (r0, fv) = locate(&self.rows, v);
        let c1 = (c0 + 1).min(self.cols.len() - 1);
        let r1 = (r0 + 1).min(self.rows.len() - 1);

        let corners = [
            (self.probe(c0, r0), (1.0 - fu) * (1.0 - fv)),
            (self.probe(c1, r0), fu * (1.0 - fv)),
            (self.probe(c0, r1), (1.0 - fu) * fv),
            (self.probe(c1, r1), fu * fv),
        ];

        if corners.iter().all(|(b, _)| b.is_some()) {
            let mut t_min = 0.0;
            let mut t_max = 0.0;
            for (b, w) in corners {
                let b = b.expect("corner checked above");
                t_min += w * b.t_min;
                t_max += w * b.t_max;
            }
            return Some(ProbeBounds { t_min, t_max });
        }

        // Mixed cell: near the limb the interpolation weights are
        // meaningless, so take the extremes of what remains.
        let mut envelope: Option<ProbeBounds> = None;
        for (b, _) in corners {
            if let Some(b) = b {
                envelope = Some(match envelope {
                    None => b,
                    Some(e) => ProbeBounds {
                        t_min: e.t_min.min(b.t_min),
                        t_max: e.t_max.max(b.t_max),
                    },
                });
            }
        }
        envelope
    }

    /// Pick the adaptive marching orientation: compare the mean finite
    /// excursion of probe entry distances along rows against columns, and
    /// march along the direction that varies more.
    pub fn is_row_adaptive(&self) -> bool {
        let n_cols = self.cols.len();
        let n_rows = self.rows.len();

        let mut col_mean = 0.0;
        for c in 0..n_cols {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for r in 0..n_rows {
                if let Some(b) = self.probe(c, r) {
                    lo = lo.min(b.t_min);
                    hi = hi.max(b.t_min);
                }
            }
            if hi > 0.0 {
                col_mean += hi - lo;
            }
        }
        col_mean /= n_cols as f64;

        let mut row_mean = 0.0;
        for r in 0..n_rows {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for c in 0..n_cols {
                if let Some(b) = self.probe(c, r) {
                    lo = lo.min(b.t_min);
                    hi = hi.max(b.t_min);
                }
            }
            if hi > 0.0 {
                row_mean += hi - lo;
            }
        }
        row_mean /= n_rows as f64;

        row_mean > col_mean
    }

    #[cfg(test)]
    fn from_bounds(cols: Vec<u32>, rows: Vec<u32>, bounds: Vec<Option<ProbeBounds>>) -> Self {
        assert_eq!(bounds.len(), cols.len() * rows.len());
        Self { cols, rows, bounds }
    }
}

/// Evenly spaced pixel coordinates, first and last pixel included, with at
/// most `cells + 1` entries.
fn lattice(size: u32, cells: usize) -> Vec<u32> {
    let last = size - 1;
    let cells = cells.min(last.max(1) as usize).max(1) as u32;
    let mut coords: Vec<u32> = (0..=cells)
        .map(|k| ((u64::from(k) * u64::from(last)) / u64::from(cells)) as u32)
        .collect();
    coords.dedup();
    coords
}

/// Find the lattice cell containing pixel `x`: the index of its left probe
/// and the fractional position between the two probes.
fn locate(coords: &[u32], x: u32) -> (usize, f64) {
    debug_assert!(x <= *coords.last().expect("lattice is never empty"));
    if coords.len() == 1 {
        return (0, 0.0);
    }
    let i = match coords.binary_search(&x) {
        Ok(i) => i,
        Err(i) => i - 1,
    };
    let i = i.min(coords.len() - 2);
    let span = coords[i + 1] - coords[i];
    let frac = f64::from(x - coords[i]) / f64::from(span);
    (i, frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_covers_the_image() {
        let l = lattice(64, 128);
        assert_eq!(l.first(), Some(&0));
        assert_eq!(l.last(), Some(&63));
        assert_eq!(l.len(), 64);

        let l = lattice(1000, 4);
        assert_eq!(l, vec![0, 249, 499, 749, 999]);
    }

    #[test]
    fn locate_brackets_pixels() {
        let coords = vec![0, 10, 20];
        assert_eq!(locate(&coords, 0), (0, 0.0));
        assert_eq!(locate(&coords, 5), (0, 0.5));
        assert_eq!(locate(&coords, 10), (1, 0.0));
        assert_eq!(locate(&coords, 20), (1, 1.0));
    }

    fn grid_from_tmin(cols: usize, rows: usize, f: impl Fn(usize, usize) -> f64) -> ScreenGrid {
        let mut bounds = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                bounds.push(Some(ProbeBounds {
                    t_min: f(c, r),
                    t_max: f(c, r) + 1.0,
                }));
            }
        }
        ScreenGrid::from_bounds(
            (0..cols as u32).collect(),
            (0..rows as u32).collect(),
            bounds,
        )
    }

    #[test]
    fn vertical_discontinuities_pick_row_marching() {
        // Depth varies along each row (vertical stripe edges), constant
        // along columns.
        let grid = grid_from_tmin(8, 8, |c, _| if c < 4 { 100.0 } else { 500.0 });
        assert!(grid.is_row_adaptive());
    }

    #[test]
    fn horizontal_discontinuities_pick_column_marching() {
        let grid = grid_from_tmin(8, 8, |_, r| if r < 4 { 100.0 } else { 500.0 });
        assert!(!grid.is_row_adaptive());
    }

    #[test]
    fn mixed_cells_use_the_envelope() {
        let some = Some(ProbeBounds {
            t_min: 10.0,
            t_max: 20.0,
        });
        let wider = Some(ProbeBounds {
            t_min: 5.0,
            t_max: 30.0,
        });
        let grid = ScreenGrid::from_bounds(vec![0, 4], vec![0, 4], vec![some, None, wider, None]);
        let b = grid.pixel_bounds(2, 2).unwrap();
        assert_eq!(b.t_min, 5.0);
        assert_eq!(b.t_max, 30.0);

        let grid = ScreenGrid::from_bounds(vec![0, 4], vec![0, 4], vec![None; 4]);
        assert!(grid.pixel_bounds(2, 2).is_none());
    }
}
