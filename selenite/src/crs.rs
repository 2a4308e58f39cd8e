// Copyright 2024-2025 Selenite developers under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Coordinate reference systems for a spherical planetary body.
//!
//! Rasters carry a projected CRS described by a PROJ-style sidecar string;
//! geographic coordinates are `(longitude, latitude)` degrees on a spherical
//! datum whose radius defaults to the Moon's mean radius. A [`CrsTransform`]
//! is a small value type so each worker thread can own an independent copy
//! and convert lock-free.

use cgmath::Vector2;
use thiserror::Error;

use crate::math::{deg2rad, rad2deg, FreeCoordinate};

pub use crate::math::MOON_MEAN_RADIUS;

/// Errors arising while interpreting a projection description.
#[derive(Debug, Error)]
pub enum CrsError {
    #[error("unsupported projection: {0:?}")]
    UnsupportedProjection(String),
    #[error("projection string has no +proj parameter")]
    MissingProjection,
    #[error("malformed projection parameter: {0:?}")]
    MalformedParameter(String),
}

/// The map projection of a raster, on a spherical datum.
#[derive(Clone, Copy, Debug, PartialEq)]
enum MapProjection {
    /// Geographic coordinates stored directly; map units are degrees.
    Longlat,
    /// Equidistant cylindrical with standard parallel `lat_ts` (radians).
    Equirectangular { lat_ts: f64 },
    /// Polar stereographic, `north` selecting the aspect.
    PolarStereographic { north: bool },
}

/// A bidirectional transform between a raster's projected coordinates
/// (metres, unless `longlat`) and geographic `(lon, lat)` degrees.
#[derive(Clone, Debug, PartialEq)]
pub struct CrsTransform {
    projection: MapProjection,
    /// Datum radius, metres.
    radius: FreeCoordinate,
    /// Central meridian, radians.
    lon_0: f64,
    false_easting: f64,
    false_northing: f64,
    /// Scale factor at the projection origin.
    k_0: f64,
}

impl CrsTransform {
    /// Parse a PROJ-style string such as
    /// `+proj=eqc +lat_ts=0 +lon_0=0 +R=1737400 +units=m`.
    ///
    /// Supported projections: `longlat`, `eqc`, `stere` (polar aspect only).
    /// The datum radius falls back to [`MOON_MEAN_RADIUS`] when neither `+R`
    /// nor `+a` is given.
    pub fn from_proj_string(s: &str) -> Result<Self, CrsError> {
        let mut proj = None;
        let mut radius = MOON_MEAN_RADIUS;
        let mut lat_ts = 0.0;
        let mut lat_0 = 0.0;
        let mut lon_0 = 0.0;
        let mut x_0 = 0.0;
        let mut y_0 = 0.0;
        let mut k_0 = 1.0;

        for token in s.split_whitespace() {
            let token = token.trim_start_matches('+');
            let (key, value) = match token.split_once('=') {
                Some(kv) => kv,
                None => continue, // bare flags such as +no_defs
            };
            let mut number = || -> Result<f64, CrsError> {
                value
                    .parse::<f64>()
                    .map_err(|_| CrsError::MalformedParameter(token.to_owned()))
            };
            match key {
                "proj" => proj = Some(value.to_owned()),
                "R" | "a" => radius = number()?,
                "lat_ts" => lat_ts = deg2rad(number()?),
                "lat_0" => lat_0 = deg2rad(number()?),
                "lon_0" => lon_0 = deg2rad(number()?),
                "x_0" => x_0 = number()?,
                "y_0" => y_0 = number()?,
                "k" | "k_0" => k_0 = number()?,
                _ => {}
            }
        }

        let proj = proj.ok_or(CrsError::MissingProjection)?;
        let projection = match proj.as_str() {
            "longlat" | "lonlat" | "latlong" => MapProjection::Longlat,
            "eqc" => MapProjection::Equirectangular { lat_ts },
            "stere" => {
                if (lat_0.abs() - std::f64::consts::FRAC_PI_2).abs() > 1e-9 {
                    return Err(CrsError::UnsupportedProjection(format!(
                        "{} with oblique lat_0",
                        proj
                    )));
                }
                MapProjection::PolarStereographic { north: lat_0 > 0.0 }
            }
            _ => return Err(CrsError::UnsupportedProjection(proj)),
        };

        Ok(Self {
            projection,
            radius,
            lon_0,
            false_easting: x_0,
            false_northing: y_0,
            k_0,
        })
    }

    /// Semi-major axis of the datum, metres.
    #[inline]
    pub fn semi_major_axis(&self) -> FreeCoordinate {
        self.radius
    }

    /// How many metres one projected map unit spans at the projection's
    /// reference latitude. Used to express raster resolutions in metres.
    pub fn metres_per_map_unit(&self) -> FreeCoordinate {
        match self.projection {
            MapProjection::Longlat => deg2rad(1.0) * self.radius,
            _ => 1.0,
        }
    }

    /// Project geographic `(lon, lat)` degrees to map coordinates.
    pub fn geographic_to_projected(&self, lonlat: Vector2<f64>) -> Vector2<f64> {
        let lon = deg2rad(lonlat.x);
        let lat = deg2rad(lonlat.y);
        // Wrap the meridian offset so files near the antimeridian keep
        // working in their native convention.
        let dlon = wrap_angle(lon - self.lon_0);

        let (x, y) = match self.projection {
            MapProjection::Longlat => (lonlat.x, lonlat.y),
            MapProjection::Equirectangular { lat_ts } => (
                self.radius * dlon * lat_ts.cos(),
                self.radius * lat,
            ),
            MapProjection::PolarStereographic { north } => {
                if north {
                    let rho = 2.0 * self.radius * self.k_0
                        * (std::f64::consts::FRAC_PI_4 - 0.5 * lat).tan();
                    (rho * dlon.sin(), -rho * dlon.cos())
                } else {
                    let rho = 2.0 * self.radius * self.k_0
                        * (std::f64::consts::FRAC_PI_4 + 0.5 * lat).tan();
                    (rho * dlon.sin(), rho * dlon.cos())
                }
            }
        };
        match self.projection {
            MapProjection::Longlat => Vector2::new(x, y),
            _ => Vector2::new(x + self.false_easting, y + self.false_northing),
        }
    }

    /// Inverse of [`Self::geographic_to_projected`]; returns `(lon, lat)`
    /// degrees in the projection's native longitude convention.
    pub fn projected_to_geographic(&self, map: Vector2<f64>) -> Vector2<f64> {
        match self.projection {
            MapProjection::Longlat => map,
            MapProjection::Equirectangular { lat_ts } => {
                let x = map.x - self.false_easting;
                let y = map.y - self.false_northing;
                let lat = y / self.radius;
                let lon = self.lon_0 + x / (self.radius * lat_ts.cos());
                Vector2::new(rad2deg(lon), rad2deg(lat))
            }
            MapProjection::PolarStereographic { north } => {
                let x = map.x - self.false_easting;
                let y = map.y - self.false_northing;
                let rho = x.hypot(y);
                let c = 2.0 * (rho / (2.0 * self.radius * self.k_0)).atan();
                if north {
                    let lat = std::f64::consts::FRAC_PI_2 - c;
                    let lon = self.lon_0 + x.atan2(-y);
                    Vector2::new(rad2deg(lon), rad2deg(lat))
                } else {
                    let lat = -(std::f64::consts::FRAC_PI_2 - c);
                    let lon = self.lon_0 + x.atan2(y);
                    Vector2::new(rad2deg(lon), rad2deg(lat))
                }
            }
        }
    }
}

/// Wrap an angle into `(-π, π]`.
fn wrap_angle(a: f64) -> f64 {
    let mut a = a % std::f64::consts::TAU;
    if a <= -std::f64::consts::PI {
        a += std::f64::consts::TAU;
    } else if a > std::f64::consts::PI {
        a -= std::f64::consts::TAU;
    }
    a
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

    #[test]
    fn parses_equirectangular() {
        let t = CrsTransform::from_proj_string(
            "+proj=eqc +lat_ts=0 +lat_0=0 +lon_0=0 +x_0=0 +y_0=0 +R=1737400 +units=m +no_defs",
        )
        .unwrap();
        assert_eq!(t.semi_major_axis(), MOON_MEAN_RADIUS);

        // One degree of longitude at the equator.
        let m = t.geographic_to_projected(Vector2::new(1.0, 0.0));
        assert!((m.x - deg2rad(1.0) * MOON_MEAN_RADIUS).abs() <= 1e-6);
        assert!(m.y.abs() <= 1e-12);
    }

    #[test]
    fn equirectangular_round_trip() {
        let t = CrsTransform::from_proj_string("+proj=eqc +lat_ts=30 +lon_0=-165 +R=1737400")
            .unwrap();
        let g = Vector2::new(-163.25, 61.75);
        assert_close(t.projected_to_geographic(t.geographic_to_projected(g)), g, 1e-9);
    }

    #[test]
    fn polar_stereographic_round_trip() {
        for proj in [
            "+proj=stere +lat_0=90 +lon_0=0 +R=1737400",
            "+proj=stere +lat_0=-90 +lon_0=0 +R=1737400",
        ] {
            let t = CrsTransform::from_proj_string(proj).unwrap();
            let lat = if proj.contains("-90") { -80.0 } else { 80.0 };
            let g = Vector2::new(133.0, lat);
            assert_close(t.projected_to_geographic(t.geographic_to_projected(g)), g, 1e-9);
        }
    }

    #[test]
    fn north_pole_projects_to_origin() {
        let t = CrsTransform::from_proj_string("+proj=stere +lat_0=90 +lon_0=0 +R=1000").unwrap();
        let m = t.geographic_to_projected(Vector2::new(45.0, 90.0));
        assert_close(m, Vector2::new(0.0, 0.0), 1e-9);
    }

    #[test]
    fn longlat_is_identity_in_degrees() {
        let t = CrsTransform::from_proj_string("+proj=longlat +R=1737400").unwrap();
        let g = Vector2::new(-165.0, 62.0);
        assert_eq!(t.geographic_to_projected(g), g);
        let metres = MOON_MEAN_RADIUS * std::f64::consts::PI / 180.0;
        assert!((t.metres_per_map_unit() - metres).abs() <= 1e-9);
    }

    #[test]
    fn rejects_oblique_stereographic() {
        assert!(CrsTransform::from_proj_string("+proj=stere +lat_0=45 +R=1").is_err());
        assert!(CrsTransform::from_proj_string("+proj=tmerc +R=1").is_err());
        assert!(CrsTransform::from_proj_string("+R=1").is_err());
    }
}
