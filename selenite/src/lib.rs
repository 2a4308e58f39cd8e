// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Selenite is an offline ray tracer that synthesises camera imagery of a
//! planetary body (the Moon, by default) from geospatial rasters: a DEM
//! giving surface altitude per geographic coordinate and an optional DOM
//! giving albedo. Given a camera pose, it computes per pixel the first
//! intersection of the view ray with the DEM surface and derives optical
//! images, DEM-height images, depth maps, ground control points and
//! altitude queries from it.
//!
//! The crate is organised bottom-up:
//!
//! * [`math`], [`ray`], [`crs`]: geometry substrate.
//! * [`raster`]: dataset sources, bands, files and mosaics (DEM/DOM).
//! * [`camera`], [`pixel`], [`pool`]: sampling and scheduling primitives.
//! * [`world`]: the implicit surface and the ray-marching search.
//! * [`renderer`]: the multi-threaded adaptive scheduler.
//! * [`tracer`]: the façade tying a frame together and exporting products.

#![deny(rust_2018_idioms)]
#![warn(unused_extern_crates)]
#![warn(clippy::cast_lossless)]

pub mod camera;
pub mod crs;
pub mod math;
pub mod options;
pub mod pixel;
pub mod pool;
pub mod raster;
pub mod ray;
pub mod renderer;
pub mod tracer;
pub mod world;

pub use camera::{Camera, Projection};
pub use options::{LogLevel, RayTracerOptions, RenderingOptions, WorldOptions};
pub use renderer::RenderingStatus;
pub use tracer::{ImageDepth, RayTracer, TracerError};
pub use world::World;

/// Re-export of the linear-algebra crate used throughout the public API.
pub use cgmath;
