//! Geometry over E7 fixed-point coordinates.
//!
//! Rectangles arrive with their corners in any order, so containment is
//! always evaluated against [`Bounds`], the normalized min/max box of the two
//! corners, inclusive on all four edges. Distances use the haversine formula
//! on a sphere of radius [`EARTH_RADIUS_METRES`].

use crate::{
    proto::{Point, Rectangle},
    types::{COORD_FACTOR, EARTH_RADIUS_METRES, MAX_LATITUDE, MAX_LONGITUDE},
};

/// Hashable copy of a [`Point`], used to key per-location state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub latitude: i32,
    pub longitude: i32,
}

impl Location {
    pub const fn new(latitude: i32, longitude: i32) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are within the valid E7 ranges.
    pub const fn is_valid(&self) -> bool {
        self.latitude >= -MAX_LATITUDE
            && self.latitude <= MAX_LATITUDE
            && self.longitude >= -MAX_LONGITUDE
            && self.longitude <= MAX_LONGITUDE
    }

    pub fn latitude_degrees(&self) -> f64 {
        f64::from(self.latitude) / COORD_FACTOR
    }

    pub fn longitude_degrees(&self) -> f64 {
        f64::from(self.longitude) / COORD_FACTOR
    }
}

impl From<&Point> for Location {
    fn from(point: &Point) -> Self {
        Self::new(point.latitude, point.longitude)
    }
}

impl From<Location> for Point {
    fn from(location: Location) -> Self {
        Point {
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

/// Normalized, inclusive bounding box of a [`Rectangle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub min_latitude: i32,
    pub max_latitude: i32,
    pub min_longitude: i32,
    pub max_longitude: i32,
}

impl Bounds {
    /// Builds the box spanned by two corners given in any order.
    pub fn from_corners(a: Location, b: Location) -> Self {
        Self {
            min_latitude: a.latitude.min(b.latitude),
            max_latitude: a.latitude.max(b.latitude),
            min_longitude: a.longitude.min(b.longitude),
            max_longitude: a.longitude.max(b.longitude),
        }
    }

    pub fn contains(&self, location: Location) -> bool {
        location.latitude >= self.min_latitude
            && location.latitude <= self.max_latitude
            && location.longitude >= self.min_longitude
            && location.longitude <= self.max_longitude
    }
}

impl From<&Rectangle> for Bounds {
    /// A missing corner is read as the origin, matching proto3 defaults.
    fn from(rect: &Rectangle) -> Self {
        let lo = rect.lo.as_ref().map(Location::from).unwrap_or_default();
        let hi = rect.hi.as_ref().map(Location::from).unwrap_or_default();
        Self::from_corners(lo, hi)
    }
}

/// Great-circle distance in metres between two locations.
pub fn haversine(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude_degrees().to_radians();
    let lat2 = b.latitude_degrees().to_radians();
    let lng1 = a.longitude_degrees().to_radians();
    let lng2 = b.longitude_degrees().to_radians();

    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METRES * c
}
