// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Command-line frontend: load a JSON scene, render it, and write the
//! requested products.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use log::info;

use selenite::{ImageDepth, LogLevel, RayTracer};

mod scene;

#[derive(Debug, Parser)]
#[clap(name = "selenite", version, about = "Offline Moon DEM/DOM ray tracer")]
struct Args {
    /// Scene description file (JSON).
    scene: PathBuf,

    /// Write the optical (DOM albedo) image here.
    #[clap(long, value_name = "PNG")]
    optical: Option<PathBuf>,

    /// Write the normalised DEM-height image here.
    #[clap(long, value_name = "PNG")]
    dem_image: Option<PathBuf>,

    /// Write the depth map here (near is bright).
    #[clap(long, value_name = "PNG")]
    depth_map: Option<PathBuf>,

    /// Write ground control points here (.txt or .csv).
    #[clap(long, value_name = "FILE")]
    gcp: Option<PathBuf>,

    /// Pixel stride between ground control points.
    #[clap(long, default_value_t = 16)]
    gcp_stride: usize,

    /// Export the ray-traced frame to this binary dump.
    #[clap(long, value_name = "BRD")]
    export: Option<PathBuf>,

    /// Skip rendering and restore the frame from this binary dump instead.
    #[clap(long, value_name = "BRD", conflicts_with = "export")]
    import: Option<PathBuf>,

    /// Write 16-bit instead of 8-bit grayscale images.
    #[clap(long)]
    sixteen_bit: bool,

    /// Override the scene's worker-thread count.
    #[clap(long)]
    threads: Option<usize>,

    /// Print the camera's altitude above the terrain.
    #[clap(long)]
    altitude: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let scene = scene::load(&args.scene)?;

    let mut opts = scene.tracer_options();
    if let Some(threads) = args.threads {
        opts.n_threads = threads.max(1);
    }
    init_logging(opts.log_level)?;

    let mut tracer = RayTracer::new(opts).context("failed to assemble the world")?;
    let camera = scene
        .camera
        .build(tracer.world().mean_radius())
        .context("failed to build the camera")?;
    tracer.set_camera(camera);

    if let Some(dump) = &args.import {
        tracer
            .import_ray_traced_info(dump)
            .context("failed to import the ray-traced dump")?;
    } else {
        tracer.run().context("rendering failed")?;
    }

    if args.altitude {
        let camera = tracer.camera().expect("camera was attached above");
        let probe_dt = tracer.world().dem().resolution().max(1.0);
        match tracer.get_altitude(camera.position(), probe_dt, 0.5) {
            Some(altitude) => println!("altitude: {:.3} m", altitude),
            None => println!("altitude: no DEM below the camera"),
        }
    }

    let depth = if args.sixteen_bit {
        ImageDepth::Bit16
    } else {
        ImageDepth::Bit8
    };
    if let Some(path) = &args.optical {
        tracer.generate_image_optical(path, depth)?;
    }
    if let Some(path) = &args.dem_image {
        tracer.generate_image_dem(path, depth)?;
    }
    if let Some(path) = &args.depth_map {
        tracer.generate_depth_map(path, depth)?;
    }
    if let Some(path) = &args.gcp {
        tracer.generate_gcps(path, args.gcp_stride)?;
    }
    if let Some(path) = &args.export {
        tracer.export_ray_traced_info(path)?;
    }

    info!("done");
    Ok(())
}

/// The library logs everything through `log`; the scene's log level picks
/// how much of it reaches stderr.
fn init_logging(level: LogLevel) -> anyhow::Result<()> {
    let filter = match level {
        LogLevel::None => log::LevelFilter::Off,
        LogLevel::Minimal => log::LevelFilter::Info,
        LogLevel::Detailed => log::LevelFilter::Debug,
    };
    simplelog::TermLogger::init(
        filter,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )
    .context("failed to initialise logging")
}
