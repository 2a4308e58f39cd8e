// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The rendering scheduler: batches pixels into pool tasks, merges task
//! output into a deterministic pixel-indexed buffer, and drives the
//! refinement phases (adaptive tracing, SSAA, defocus blur).

use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::camera::Camera;
use crate::options::RenderingOptions;
use crate::pixel::{update_ssaa_coordinates, PixelData, RenderedPixel, TaskedPixel};
use crate::pool::{ThreadPool, ThreadWorker};
use crate::world::World;

mod grid;
use grid::ScreenGrid;

/// Progress of the renderer through a frame. Monotone within one `render`
/// call; only the renderer itself (never a task) mutates it.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum RenderingStatus {
    Waiting,
    Initialised,
    Tracing,
    PostSsaa,
    PostDefocus,
    Completed,
}

/// How a task turns a [`TaskedPixel`] sample into a ray.
#[derive(Clone, Copy)]
enum TraceMode {
    /// Deterministic centre-projection rays at the sample coordinates.
    Centre,
    /// Single-sample marching along a row/column, carrying the previous
    /// pixel's hit forward as a cap on the search interval.
    Adaptive { margin: f64, stride: u32 },
    /// Stochastic thin-lens rays (defocus blur).
    Lens,
}

/// How task output lands in the frame buffer.
#[derive(Clone, Copy)]
enum MergeMode {
    /// Overwrite the pixel slot (first pass).
    Replace,
    /// Keep the traced centre as sample 0, replace the rest (refinement).
    Supersample,
}

type FrameBuffer = Arc<Mutex<Vec<RenderedPixel>>>;

/// The scheduling and adaptive-sampling engine.
pub struct Renderer {
    pool: ThreadPool,
    opts: RenderingOptions,
    status: RenderingStatus,
    /// Final pixel buffer, ordered by id; filled at COMPLETED.
    rendered: Vec<RenderedPixel>,
}

impl Renderer {
    pub fn new(opts: RenderingOptions, n_threads: usize, seed: u64) -> Self {
        Self {
            pool: ThreadPool::with_seed(n_threads, seed),
            opts: opts.repair(),
            status: RenderingStatus::Waiting,
            rendered: Vec::new(),
        }
    }

    #[inline]
    pub fn status(&self) -> RenderingStatus {
        self.status
    }

    /// Replace the rendering options for subsequent frames.
    pub fn update_options(&mut self, opts: RenderingOptions) {
        self.opts = opts.repair();
    }

    /// The completed frame, ordered by pixel id. Empty before the first
    /// `render` (or import) finishes.
    pub fn rendered_pixels(&self) -> &[RenderedPixel] {
        &self.rendered
    }

    /// Adopt externally produced pixels (deserialized from a dump) as the
    /// completed frame.
    pub fn import_rendered_data(&mut self, mut pixels: Vec<RenderedPixel>) {
        pixels.sort_by_key(|p| p.id);
        self.rendered = pixels;
        self.status = RenderingStatus::Completed;
    }

    /// Render a full frame. On return the status is COMPLETED and
    /// [`Self::rendered_pixels`] holds one entry per camera pixel.
    pub fn render(&mut self, cam: &Camera, world: &Arc<World>) {
        self.status = RenderingStatus::Waiting;
        self.rendered.clear();

        let grid = ScreenGrid::new(cam, world, self.opts.grid_width, self.opts.grid_height);
        let buffer: FrameBuffer = Arc::new(Mutex::new(
            (0..cam.n_pixels()).map(|id| RenderedPixel::new(id, 1)).collect(),
        ));
        let cam_shared = Arc::new(cam.clone());
        self.status = RenderingStatus::Initialised;

        if !self.pool.is_running() {
            self.pool.start();
        }

        self.status = RenderingStatus::Tracing;
        let n_skipped = if self.opts.adaptive_tracing {
            self.generate_adaptive_tasks(cam, world, &grid, &cam_shared, &buffer)
        } else {
            self.generate_basic_tasks(cam, world, &grid, &cam_shared, &buffer)
        };
        self.drain_pool();
        info!(
            "traced {} pixels ({} skipped as guaranteed misses)",
            cam.n_pixels() - n_skipped,
            n_skipped
        );

        if cam.has_anti_aliasing() && self.opts.ssaa.active {
            self.status = RenderingStatus::PostSsaa;
            let n_flagged = self.generate_anti_aliasing_tasks(cam, world, &grid, &cam_shared, &buffer);
            self.drain_pool();
            info!("anti-aliased {} pixels", n_flagged);
        }

        if cam.has_defocus_blur() {
            self.status = RenderingStatus::PostDefocus;
            let n_queued = self.generate_defocus_tasks(cam, world, &grid, &cam_shared, &buffer);
            self.drain_pool();
            info!("defocus-sampled {} pixels", n_queued);
        }

        drop(cam_shared);
        self.rendered = match Arc::try_unwrap(buffer) {
            Ok(mutex) => mutex.into_inner().expect("frame buffer lock poisoned"),
            // A task outlived the drain; fall back to copying out.
            Err(arc) => arc.lock().expect("frame buffer lock poisoned").clone(),
        };
        self.status = RenderingStatus::Completed;
    }

    /// Wait for the queue to drain; a task failure (e.g. a raster read
    /// error) is fatal to the frame, so re-raise it here on the render
    /// thread.
    fn drain_pool(&self) {
        self.pool.wait_completion();
        if self.pool.take_panicked() {
            panic!("a render task failed; no frame was produced");
        }
    }

    /// Basic tracing: every pixel gets one centred sample with probe-derived
    /// bounds; one task per image row. Returns the number of pixels skipped
    /// as misses.
    fn generate_basic_tasks(
        &self,
        cam: &Camera,
        world: &Arc<World>,
        grid: &ScreenGrid,
        cam_shared: &Arc<Camera>,
        buffer: &FrameBuffer,
    ) -> u32 {
        let mut misses = Vec::new();
        for v in 0..cam.height() {
            let mut batch = Vec::with_capacity(cam.width() as usize);
            for u in 0..cam.width() {
                let id = cam.pixel_id(u, v);
                match grid.pixel_bounds(u, v) {
                    Some(b) => {
                        let mut tp = TaskedPixel::new(id, f64::from(u), f64::from(v), 1);
                        tp.t_min = b.t_min;
                        tp.t_max = b.t_max;
                        batch.push(tp);
                    }
                    None => misses.push(id),
                }
            }
            if !batch.is_empty() {
                self.dispatch(batch, TraceMode::Centre, MergeMode::Replace, cam_shared, world, buffer);
            }
        }
        self.write_misses(buffer, &misses);
        misses.len() as u32
    }

    /// Adaptive tracing: whole rows (or columns, whichever direction the
    /// probe distances vary more along) become single tasks so the
    /// carried-forward hit distance lives inside one worker.
    fn generate_adaptive_tasks(
        &self,
        cam: &Camera,
        world: &Arc<World>,
        grid: &ScreenGrid,
        cam_shared: &Arc<Camera>,
        buffer: &FrameBuffer,
    ) -> u32 {
        let margin = self.opts.adaptive_margin * world.ray_resolution();
        let row_adaptive = grid.is_row_adaptive();
        debug!(
            "adaptive tracing along {}",
            if row_adaptive { "rows" } else { "columns" }
        );

        let mut misses = Vec::new();
        let (outer, inner) = if row_adaptive {
            (cam.height(), cam.width())
        } else {
            (cam.width(), cam.height())
        };
        for line in 0..outer {
            let mut batch = Vec::with_capacity(inner as usize);
            for step in 0..inner {
                let (u, v) = if row_adaptive { (step, line) } else { (line, step) };
                let id = cam.pixel_id(u, v);
                match grid.pixel_bounds(u, v) {
                    Some(b) => {
                        let mut tp = TaskedPixel::new(id, f64::from(u), f64::from(v), 1);
                        tp.t_min = b.t_min;
                        tp.t_max = b.t_max;
                        batch.push(tp);
                    }
                    None => misses.push(id),
                }
            }
            if !batch.is_empty() {
                let stride = if row_adaptive { 1 } else { cam.width() };
                self.dispatch(
                    batch,
                    TraceMode::Adaptive { margin, stride },
                    MergeMode::Replace,
                    cam_shared,
                    world,
                    buffer,
                );
            }
        }
        self.write_misses(buffer, &misses);
        misses.len() as u32
    }

    /// Flag pixels whose centre distance jumps against a 4-neighbour (or
    /// which border a miss) and re-queue them with sub-pixel samples.
    /// Returns the number of flagged pixels.
    fn generate_anti_aliasing_tasks(
        &self,
        cam: &Camera,
        world: &Arc<World>,
        _grid: &ScreenGrid,
        cam_shared: &Arc<Camera>,
        buffer: &FrameBuffer,
    ) -> u32 {
        let dt = world.ray_resolution();
        let threshold = self.opts.ssaa.threshold.into_inner() * dt;
        let pad = self.opts.ssaa.res_multiplier * dt;
        let n_samples = self.opts.ssaa.n_samples;

        let mut flagged = Vec::new();
        {
            let frame = buffer.lock().expect("frame buffer lock poisoned");
            for v in 0..cam.height() {
                for u in 0..cam.width() {
                    let id = cam.pixel_id(u, v);
                    let t_centre = frame[id as usize].distance();
                    if !t_centre.is_finite() {
                        continue;
                    }

                    let mut flag = false;
                    let (mut lo, mut hi) = (t_centre, t_centre);
                    self.for_each_neighbour(cam, u, v, |qid| {
                        let t_q = frame[qid as usize].distance();
                        if t_q.is_finite() {
                            lo = lo.min(t_q);
                            hi = hi.max(t_q);
                            if (t_centre - t_q).abs() > threshold {
                                flag = true;
                            }
                        } else {
                            // Surface/sky boundary.
                            flag = true;
                        }
                    });

                    if flag {
                        let mut tp = TaskedPixel::new(id, f64::from(u), f64::from(v), n_samples);
                        update_ssaa_coordinates(&mut tp);
                        tp.t_min = (lo - pad).max(0.0);
                        tp.t_max = hi + pad;
                        flagged.push(tp);
                    }
                }
            }
        }

        let n_flagged = flagged.len() as u32;
        self.dispatch_chunked(
            flagged,
            cam.width() as usize,
            TraceMode::Centre,
            MergeMode::Supersample,
            cam_shared,
            world,
            buffer,
        );
        n_flagged
    }

    /// Re-queue every pixel with stochastic lens samples. Returns the number
    /// of queued pixels.
    fn generate_defocus_tasks(
        &self,
        cam: &Camera,
        world: &Arc<World>,
        grid: &ScreenGrid,
        cam_shared: &Arc<Camera>,
        buffer: &FrameBuffer,
    ) -> u32 {
        let dt = world.ray_resolution();
        let pad = self.opts.ssaa.res_multiplier * dt;
        let n_samples = self.opts.defocus.n_samples;

        let mut queued = Vec::new();
        {
            let frame = buffer.lock().expect("frame buffer lock poisoned");
            for v in 0..cam.height() {
                for u in 0..cam.width() {
                    let id = cam.pixel_id(u, v);

                    // Lens rays diverge from the centre ray, so search around
                    // the distances seen in the neighbourhood; pixels whose
                    // whole neighbourhood missed keep their probe bounds.
                    let mut lo = f64::INFINITY;
                    let mut hi = f64::NEG_INFINITY;
                    let t_centre = frame[id as usize].distance();
                    if t_centre.is_finite() {
                        lo = t_centre;
                        hi = t_centre;
                    }
                    self.for_each_neighbour(cam, u, v, |qid| {
                        let t_q = frame[qid as usize].distance();
                        if t_q.is_finite() {
                            lo = lo.min(t_q);
                            hi = hi.max(t_q);
                        }
                    });

                    let (t_min, t_max) = if hi.is_finite() {
                        ((lo - pad).max(0.0), hi + pad)
                    } else {
                        match grid.pixel_bounds(u, v) {
                            Some(b) => (b.t_min, b.t_max),
                            None => continue,
                        }
                    };

                    let mut tp = TaskedPixel::new(id, f64::from(u), f64::from(v), n_samples);
                    tp.t_min = t_min;
                    tp.t_max = t_max;
                    queued.push(tp);
                }
            }
        }

        let n_queued = queued.len() as u32;
        self.dispatch_chunked(
            queued,
            cam.width() as usize,
            TraceMode::Lens,
            MergeMode::Supersample,
            cam_shared,
            world,
            buffer,
        );
        n_queued
    }

    /// Visit the axis-aligned neighbours of `(u, v)` within the configured
    /// boundary size, in image bounds.
    fn for_each_neighbour(&self, cam: &Camera, u: u32, v: u32, mut visit: impl FnMut(u32)) {
        let bs = i64::from(self.opts.ssaa.boundary_size);
        for step in 1..=bs {
            for (du, dv) in [(-step, 0), (step, 0), (0, -step), (0, step)] {
                let uq = i64::from(u) + du;
                let vq = i64::from(v) + dv;
                if uq >= 0 && uq < i64::from(cam.width()) && vq >= 0 && vq < i64::from(cam.height())
                {
                    visit(cam.pixel_id(uq as u32, vq as u32));
                }
            }
        }
    }

    /// Mark pixels that cannot intersect anything as rendered misses.
    fn write_misses(&self, buffer: &FrameBuffer, ids: &[u32]) {
        if ids.is_empty() {
            return;
        }
        let mut frame = buffer.lock().expect("frame buffer lock poisoned");
        for &id in ids {
            let mut rp = RenderedPixel::new(id, 1);
            rp.add_pixel_data(PixelData::MISS);
            frame[id as usize] = rp;
        }
    }

    fn dispatch_chunked(
        &self,
        pixels: Vec<TaskedPixel>,
        batch_size: usize,
        mode: TraceMode,
        merge: MergeMode,
        cam: &Arc<Camera>,
        world: &Arc<World>,
        buffer: &FrameBuffer,
    ) {
        let mut pixels = pixels;
        while !pixels.is_empty() {
            let rest = pixels.split_off(pixels.len().min(batch_size.max(1)));
            self.dispatch(pixels, mode, merge, cam, world, buffer);
            pixels = rest;
        }
    }

    /// Move one batch into the pool. The task traces every pixel end-to-end
    /// and then splices its output into the frame buffer by pixel id under
    /// the buffer lock.
    fn dispatch(
        &self,
        batch: Vec<TaskedPixel>,
        mode: TraceMode,
        merge: MergeMode,
        cam: &Arc<Camera>,
        world: &Arc<World>,
        buffer: &FrameBuffer,
    ) {
        let cam = Arc::clone(cam);
        let world = Arc::clone(world);
        let buffer = Arc::clone(buffer);
        self.pool.add_task(move |worker| {
            let rendered = run_batch(&cam, &world, batch, mode, worker);
            let mut frame = buffer.lock().expect("frame buffer lock poisoned");
            for rp in rendered {
                let slot = rp.id as usize;
                match merge {
                    MergeMode::Replace => frame[slot] = rp,
                    MergeMode::Supersample => frame[slot].merge_supersamples(rp),
                }
            }
        });
    }
}

/// Trace one batch of pixels on a worker.
fn run_batch(
    cam: &Camera,
    world: &World,
    pixels: Vec<TaskedPixel>,
    mode: TraceMode,
    worker: &mut ThreadWorker,
) -> Vec<RenderedPixel> {
    let max_err = world.max_error();
    let mut out = Vec::with_capacity(pixels.len());
    // Previous pixel's hit distance in adaptive mode.
    let mut carry: Option<f64> = None;
    let mut prev_id: Option<u32> = None;

    for tp in pixels {
        let mut rp = RenderedPixel::new(tp.id, tp.n_samples);
        match mode {
            TraceMode::Centre => {
                for k in 0..tp.n_samples {
                    let ray = cam.centre_ray(tp.u[k], tp.v[k]);
                    rp.add_pixel_data(world.trace_ray(
                        &ray,
                        tp.t_min,
                        tp.t_max,
                        worker.id(),
                        max_err,
                    ));
                }
            }
            TraceMode::Lens => {
                for k in 0..tp.n_samples {
                    let ray = cam.get_ray(tp.u[k], tp.v[k], false, &mut worker.rng);
                    rp.add_pixel_data(world.trace_ray(
                        &ray,
                        tp.t_min,
                        tp.t_max,
                        worker.id(),
                        max_err,
                    ));
                }
            }
            TraceMode::Adaptive { margin, stride } => {
                // A gap in the id sequence means skipped pixels; the carried
                // distance no longer describes the neighbour.
                if let Some(prev) = prev_id {
                    if tp.id != prev + stride {
                        carry = None;
                    }
                }

                let ray = cam.centre_ray(tp.u[0], tp.v[0]);
                let capped = carry.map(|t_prev| t_prev + margin);
                let t_max = match capped {
                    Some(cap) if cap < tp.t_max => cap,
                    _ => tp.t_max,
                };

                let mut data = if tp.t_min > t_max {
                    PixelData::MISS
                } else {
                    world.trace_ray(&ray, tp.t_min, t_max, worker.id(), max_err)
                };
                if !data.is_hit() && t_max < tp.t_max {
                    // The surface receded past the carried cap; resume the
                    // march over the rest of the probe interval.
                    data = world.trace_ray(&ray, t_max, tp.t_max, worker.id(), max_err);
                }

                carry = if data.is_hit() { Some(data.t) } else { None };
                rp.add_pixel_data(data);
            }
        }
        prev_id = Some(tp.id);
        out.push(rp);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_is_monotone() {
        assert!(RenderingStatus::Waiting < RenderingStatus::Initialised);
        assert!(RenderingStatus::Initialised < RenderingStatus::Tracing);
        assert!(RenderingStatus::Tracing < RenderingStatus::PostSsaa);
        assert!(RenderingStatus::PostSsaa < RenderingStatus::PostDefocus);
        assert!(RenderingStatus::PostDefocus < RenderingStatus::Completed);
    }

    #[test]
    fn import_sorts_by_id() {
        let mut renderer = Renderer::new(RenderingOptions::default(), 1, 0);
        let mut a = RenderedPixel::new(1, 1);
        a.add_pixel_data(PixelData::MISS);
        let mut b = RenderedPixel::new(0, 1);
        b.add_pixel_data(PixelData::MISS);
        renderer.import_rendered_data(vec![a, b]);

        assert_eq!(renderer.status(), RenderingStatus::Completed);
        let ids: Vec<u32> = renderer.rendered_pixels().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
