//! Equirectangular projection and viewport normalization
//!
//! World space spans `[0, 1]` horizontally and `[0, 0.5]` vertically, with `y` growing
//! southwards like screen pixels. One degree covers the same world distance on both axes,
//! so a world distance multiplied by `extent * 2^zoom` is a distance in pixels.

use geo::{Coord, Rect};
use smallvec::{SmallVec, smallvec};

/// Largest representable latitude in degrees
pub const MAX_LATITUDE: f64 = 90.0;

/// Largest representable longitude in degrees
pub const MAX_LONGITUDE: f64 = 180.0;

/// World width in projected units
pub const WORLD_WIDTH: f64 = 1.0;

/// World height in projected units (half the width, square degrees)
pub const WORLD_HEIGHT: f64 = 0.5;

/// Precomputed constant: 1.0 / 360.0
const DEGREES_TO_WORLD: f64 = 1.0 / 360.0;

/// Wrap a longitude into `[-180, 180)`
#[inline(always)]
pub fn wrap_longitude(lng: f64) -> f64 {
    if (-MAX_LONGITUDE..MAX_LONGITUDE).contains(&lng) {
        return lng;
    }
    (lng + MAX_LONGITUDE).rem_euclid(360.0) - MAX_LONGITUDE
}

/// Longitude in degrees to world `x`, wrapping out-of-range input
#[inline(always)]
pub fn lng_to_x(lng: f64) -> f64 {
    (wrap_longitude(lng) + MAX_LONGITUDE) * DEGREES_TO_WORLD
}

/// Latitude in degrees to world `y`, clamping to the poles
#[inline(always)]
pub fn lat_to_y(lat: f64) -> f64 {
    (MAX_LATITUDE - lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)) * DEGREES_TO_WORLD
}

/// World `x` back to longitude in degrees
#[inline(always)]
pub fn x_to_lng(x: f64) -> f64 {
    x * 360.0 - MAX_LONGITUDE
}

/// World `y` back to latitude in degrees
#[inline(always)]
pub fn y_to_lat(y: f64) -> f64 {
    MAX_LATITUDE - y * 360.0
}

/// Project a WGS84 coordinate into world space
///
/// # Arguments
/// * `lat` - Latitude in degrees (clamped to -90..90)
/// * `lng` - Longitude in degrees (wrapped into -180..180)
#[inline(always)]
pub fn project(lat: f64, lng: f64) -> Coord<f64> {
    Coord {
        x: lng_to_x(lng),
        y: lat_to_y(lat),
    }
}

/// Convert a radius in pixels at `zoom` into world units
///
/// `extent` is the tile size in pixels, so the world is `extent * 2^zoom` pixels wide.
#[inline]
pub fn pixel_radius_to_world(radius: f64, extent: f64, zoom: u8) -> f64 {
    radius / (extent * 2f64.powi(i32::from(zoom)))
}

/// A geographic bounding box as sent by the renderer: west, south, east, north in degrees
///
/// The box may wrap the antimeridian (`west > east`), exceed the valid longitude range,
/// or contain non-finite values. [`ViewportBox::to_world_rects`] normalizes all of these.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewportBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl ViewportBox {
    /// Create a new viewport box
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// The whole world
    pub fn world() -> Self {
        Self::new(-MAX_LONGITUDE, -MAX_LATITUDE, MAX_LONGITUDE, MAX_LATITUDE)
    }

    /// Convert to one or two world-space rectangles
    ///
    /// Non-finite edges fall back to the world edge, inverted latitudes are swapped,
    /// spans of 360 degrees or more cover the whole world, and boxes that cross the
    /// antimeridian are split in two.
    pub fn to_world_rects(&self) -> SmallVec<[Rect<f64>; 2]> {
        let or = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };

        let mut south = or(self.south, -MAX_LATITUDE).clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let mut north = or(self.north, MAX_LATITUDE).clamp(-MAX_LATITUDE, MAX_LATITUDE);
        if south > north {
            std::mem::swap(&mut south, &mut north);
        }

        let west = or(self.west, -MAX_LONGITUDE);
        let east = or(self.east, MAX_LONGITUDE);

        let (west, east) = if east - west >= 360.0 {
            (-MAX_LONGITUDE, MAX_LONGITUDE)
        } else {
            let east = if east == MAX_LONGITUDE {
                MAX_LONGITUDE
            } else {
                wrap_longitude(east)
            };
            (wrap_longitude(west), east)
        };

        let rect = |w: f64, e: f64| {
            Rect::new(
                Coord {
                    x: lng_to_x_unwrapped(w),
                    y: lat_to_y(north),
                },
                Coord {
                    x: lng_to_x_unwrapped(e),
                    y: lat_to_y(south),
                },
            )
        };

        if west > east {
            smallvec![rect(west, MAX_LONGITUDE), rect(-MAX_LONGITUDE, east)]
        } else {
            smallvec![rect(west, east)]
        }
    }
}

/// Longitude to world `x` without wrapping, so that 180 maps to the east edge
#[inline(always)]
fn lng_to_x_unwrapped(lng: f64) -> f64 {
    (lng + MAX_LONGITUDE) * DEGREES_TO_WORLD
}
