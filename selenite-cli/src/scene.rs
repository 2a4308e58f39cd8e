// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! JSON scene descriptions: camera intrinsics and pose, raster file lists,
//! and tracer options.

use std::path::PathBuf;

use anyhow::{bail, Context as _};
use cgmath::{Matrix3, Point3};
use serde::Deserialize;

use selenite::math::{deg2rad, euler_rotation, nadir_attitude, sph2car, Axis};
use selenite::options::RasterDescriptor;
use selenite::{Camera, RayTracerOptions};

/// A complete scene file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scene {
    pub camera: CameraConfig,
    /// DEM tiles, in routing order.
    pub dem: Vec<PathBuf>,
    /// DOM tiles; may be empty for geometry-only products.
    #[serde(default)]
    pub dom: Vec<PathBuf>,
    #[serde(default)]
    pub options: RayTracerOptions,
}

impl Scene {
    /// Tracer options with the scene's raster lists filled in.
    pub fn tracer_options(&self) -> RayTracerOptions {
        let mut opts = self.options.clone();
        opts.world.dem_files = self.dem.iter().map(RasterDescriptor::new).collect();
        opts.world.dom_files = self.dom.iter().map(RasterDescriptor::new).collect();
        opts
    }
}

// No deny_unknown_fields here: serde cannot combine it with #[serde(flatten)].
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CameraConfig {
    Pinhole {
        width: u32,
        height: u32,
        fov_deg: f64,
        #[serde(flatten)]
        pose: PoseConfig,
    },
    /// Thin-lens camera with a square sensor.
    Real {
        res: u32,
        focal_length_mm: f64,
        sensor_size_mm: f64,
        fstop: f64,
        #[serde(flatten)]
        pose: PoseConfig,
    },
}

impl CameraConfig {
    /// Instantiate the camera. `mean_radius` resolves altitude-style
    /// positions against the world's datum.
    pub fn build(&self, mean_radius: f64) -> anyhow::Result<Camera> {
        let (mut camera, pose) = match self {
            CameraConfig::Pinhole {
                width,
                height,
                fov_deg,
                pose,
            } => (Camera::pinhole(*width, *height, deg2rad(*fov_deg)), pose),
            CameraConfig::Real {
                res,
                focal_length_mm,
                sensor_size_mm,
                fstop,
                pose,
            } => (
                Camera::thin_lens(*res, *focal_length_mm, *sensor_size_mm, *fstop),
                pose,
            ),
        };

        let position = pose.position.build(mean_radius)?;
        camera.set_position(position);
        camera.set_dcm(pose.attitude.build(position)?);
        Ok(camera)
    }
}

#[derive(Debug, Deserialize)]
pub struct PoseConfig {
    pub position: PositionConfig,
    #[serde(default)]
    pub attitude: AttitudeConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum PositionConfig {
    /// Body-fixed cartesian metres.
    Cartesian([f64; 3]),
    /// Geographic placement; exactly one of `radius_m` (from the body
    /// centre) or `altitude_m` (above the mean radius) must be given.
    Spherical {
        #[serde(default)]
        radius_m: Option<f64>,
        #[serde(default)]
        altitude_m: Option<f64>,
        lon_deg: f64,
        lat_deg: f64,
    },
}

impl PositionConfig {
    fn build(&self, mean_radius: f64) -> anyhow::Result<Point3<f64>> {
        match *self {
            PositionConfig::Cartesian([x, y, z]) => Ok(Point3::new(x, y, z)),
            PositionConfig::Spherical {
                radius_m,
                altitude_m,
                lon_deg,
                lat_deg,
            } => {
                let radius = match (radius_m, altitude_m) {
                    (Some(r), None) => r,
                    (None, Some(h)) => mean_radius + h,
                    _ => bail!("spherical position needs exactly one of radius_m, altitude_m"),
                };
                Ok(sph2car(Point3::new(
                    radius,
                    deg2rad(lon_deg),
                    deg2rad(lat_deg),
                )))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum AttitudeConfig {
    /// Boresight towards the body centre (survey default).
    Nadir,
    /// Row-major direction cosine matrix.
    Dcm([f64; 9]),
    /// Rotation sequence applied in order; axes are "x", "y" or "z",
    /// angles in degrees.
    Euler(Vec<(String, f64)>),
}

impl Default for AttitudeConfig {
    fn default() -> Self {
        AttitudeConfig::Nadir
    }
}

impl AttitudeConfig {
    fn build(&self, position: Point3<f64>) -> anyhow::Result<Matrix3<f64>> {
        match self {
            AttitudeConfig::Nadir => Ok(nadir_attitude(position)),
            AttitudeConfig::Dcm(e) => Ok(Matrix3::new(
                e[0], e[3], e[6], //
                e[1], e[4], e[7], //
                e[2], e[5], e[8],
            )),
            AttitudeConfig::Euler(sequence) => {
                let mut rotations = Vec::with_capacity(sequence.len());
                for (axis, angle_deg) in sequence {
                    let axis = match axis.as_str() {
                        "x" | "X" => Axis::X,
                        "y" | "Y" => Axis::Y,
                        "z" | "Z" => Axis::Z,
                        other => bail!("unknown rotation axis {:?}", other),
                    };
                    rotations.push((axis, deg2rad(*angle_deg)));
                }
                Ok(euler_rotation(&rotations))
            }
        }
    }
}

/// Load and parse a scene file.
pub fn load(path: &std::path::Path) -> anyhow::Result<Scene> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scene file {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse scene file {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_scene() {
        let scene: Scene = serde_json::from_str(
            r#"{
                "camera": {
                    "type": "pinhole", "width": 64, "height": 64, "fov_deg": 40,
                    "position": {"spherical": {"altitude_m": 40000, "lon_deg": -165, "lat_deg": 62}}
                },
                "dem": ["dem.tif"]
            }"#,
        )
        .unwrap();
        let cam = scene.camera.build(1_737_400.0).unwrap();
        assert_eq!(cam.width(), 64);
        assert!(cam.has_anti_aliasing());
        assert!(scene.dom.is_empty());
    }

    #[test]
    fn real_camera_with_euler_attitude() {
        let scene: Scene = serde_json::from_str(
            r#"{
                "camera": {
                    "type": "real", "res": 128,
                    "focal_length_mm": 105.0, "sensor_size_mm": 35.0, "fstop": 4.0,
                    "position": {"cartesian": [2000000.0, 0.0, 0.0]},
                    "attitude": {"euler": [["z", 90.0], ["x", -10.0]]}
                },
                "dem": ["dem.tif"],
                "dom": ["dom.tif"]
            }"#,
        )
        .unwrap();
        let cam = scene.camera.build(1_737_400.0).unwrap();
        assert!(cam.has_defocus_blur());
    }

    #[test]
    fn rejects_ambiguous_position() {
        let pos = PositionConfig::Spherical {
            radius_m: Some(1.0),
            altitude_m: Some(2.0),
            lon_deg: 0.0,
            lat_deg: 0.0,
        };
        assert!(pos.build(10.0).is_err());
    }
}
