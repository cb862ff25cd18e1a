//! Point records and the identifier-indexed point store
//!
//! This module provides the immutable [`Point`] record, the [`PointStore`] built once per
//! dataset load, and the [`PointStoreBuilder`] used by ingestion to append to it.

use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Optional attributes carried by a point for presentation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointAttributes {
    /// Street address or free-form location description
    pub address: Option<String>,
    /// Status code used for filtering
    pub status: Option<String>,
    /// Link to the record in an external system
    pub external_link: Option<String>,
}

/// One normalized geolocated record
///
/// Both coordinates are always finite. Points are immutable once created.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    identifier: Option<String>,
    lat: f64,
    lng: f64,
    attributes: PointAttributes,
}

impl Point {
    /// Create a new point
    ///
    /// Returns `None` unless both coordinates are finite. An empty identifier is
    /// treated as absent.
    pub fn new(
        identifier: Option<String>,
        lat: f64,
        lng: f64,
        attributes: PointAttributes,
    ) -> Option<Self> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        Some(Self {
            identifier: identifier.filter(|id| !id.is_empty()),
            lat,
            lng,
            attributes,
        })
    }

    /// Create a point without attributes
    pub fn at(lat: f64, lng: f64) -> Option<Self> {
        Self::new(None, lat, lng, PointAttributes::default())
    }

    #[inline]
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    #[inline]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    #[inline]
    pub fn lng(&self) -> f64 {
        self.lng
    }

    #[inline]
    pub fn attributes(&self) -> &PointAttributes {
        &self.attributes
    }

    #[inline]
    pub fn status(&self) -> Option<&str> {
        self.attributes.status.as_deref()
    }
}

/// Geographic bounds in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeoBounds {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl GeoBounds {
    /// Bounds covering a single coordinate
    pub fn from_point(lat: f64, lng: f64) -> Self {
        Self {
            min_lat: lat,
            min_lng: lng,
            max_lat: lat,
            max_lng: lng,
        }
    }

    /// Grow to include a coordinate
    #[inline]
    pub fn extend(&mut self, lat: f64, lng: f64) {
        self.min_lat = self.min_lat.min(lat);
        self.min_lng = self.min_lng.min(lng);
        self.max_lat = self.max_lat.max(lat);
        self.max_lng = self.max_lng.max(lng);
    }

    /// Center point as `(lat, lng)`
    #[inline]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Ordered, identifier-indexed collection of points
///
/// Built once per load and never mutated afterwards. Insertion order is preserved,
/// and duplicate identifiers resolve to the last inserted point.
#[derive(Debug, Clone, Default)]
pub struct PointStore {
    /// All points in insertion order
    points: Vec<Point>,
    /// Non-empty identifier -> index into `points`
    by_identifier: HashMap<String, usize>,
    /// Cached bounds over all points (None if empty)
    bounds: Option<GeoBounds>,
}

impl PointStore {
    /// Build a store from points in order
    pub fn from_points(points: impl IntoIterator<Item = Point>) -> Self {
        let mut builder = PointStoreBuilder::new();
        for point in points {
            builder.push(point);
        }
        builder.finish()
    }

    /// Get number of points
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the store is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get a point by insertion index
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    /// Get all points in insertion order
    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Iterate points in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    /// Look up a point by identifier
    ///
    /// A miss is an expected outcome, not an error.
    #[inline]
    pub fn lookup(&self, identifier: &str) -> Option<&Point> {
        let index = *self.by_identifier.get(identifier)?;
        self.points.get(index)
    }

    /// Number of distinct non-empty identifiers
    #[inline]
    pub fn identifier_count(&self) -> usize {
        self.by_identifier.len()
    }

    /// Get the bounds of all points
    ///
    /// This is O(1) as the bounds are computed while the store is built.
    #[inline]
    pub fn bounds(&self) -> Option<GeoBounds> {
        self.bounds
    }
}

impl<'a> IntoIterator for &'a PointStore {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Append-only builder for a [`PointStore`]
#[derive(Debug, Default)]
pub struct PointStoreBuilder {
    store: PointStore,
}

impl PointStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point, returning its index
    ///
    /// A point whose identifier was already seen replaces the earlier one in the lookup
    /// table; both remain in the ordered sequence.
    pub fn push(&mut self, point: Point) -> usize {
        let index = self.store.points.len();

        if let Some(identifier) = point.identifier()
            && let Some(previous) = self
                .store
                .by_identifier
                .insert(identifier.to_string(), index)
        {
            tracing::trace!(
                "Duplicate identifier {:?}: point {} replaces point {}",
                identifier,
                index,
                previous
            );
        }

        match &mut self.store.bounds {
            Some(bounds) => bounds.extend(point.lat(), point.lng()),
            None => self.store.bounds = Some(GeoBounds::from_point(point.lat(), point.lng())),
        }

        self.store.points.push(point);
        index
    }

    /// Get number of points appended so far
    #[inline]
    pub fn len(&self) -> usize {
        self.store.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.points.is_empty()
    }

    /// Finish building and return the immutable store
    pub fn finish(self) -> PointStore {
        self.store
    }
}
