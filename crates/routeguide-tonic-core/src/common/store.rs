//! Read-only spatial index of named point features.
//!
//! The store is loaded once at process start and shared by every call behind
//! an [`Arc`]. Nothing mutates it afterwards, so lookups and queries never
//! lock or suspend.
//!
//! A feature with an empty name encodes "nothing here". Such records may be
//! present in the database, but they never satisfy a [`FeatureStore::lookup`]
//! and are never yielded by a [`FeatureStore::query`].

use crate::{
    Error, Result,
    geo::{Bounds, Location},
    proto::{Feature, Point, Rectangle},
};
use serde::Deserialize;
use std::{collections::HashMap, fs::File, io::BufReader, io::Read, path::Path, sync::Arc};

/// On-disk representation of a single feature record.
#[derive(Debug, Deserialize)]
struct FeatureRecord {
    location: LocationRecord,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct LocationRecord {
    latitude: i32,
    longitude: i32,
}

/// Immutable collection of features, indexed by exact location.
#[derive(Debug, Default)]
pub struct FeatureStore {
    features: Vec<Feature>,
    /// First named feature at each location.
    by_location: HashMap<Location, usize>,
}

impl FeatureStore {
    /// Builds a store from features in iteration order.
    pub fn new(features: Vec<Feature>) -> Self {
        let mut by_location = HashMap::with_capacity(features.len());
        for (idx, feature) in features.iter().enumerate() {
            if feature.name.is_empty() {
                continue;
            }
            if let Some(point) = &feature.location {
                by_location.entry(Location::from(point)).or_insert(idx);
            }
        }
        Self {
            features,
            by_location,
        }
    }

    /// Loads a JSON feature database from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeatureDatabase`] if the file cannot be opened, is not
    /// a JSON array of `{location, name}` records, or holds a coordinate
    /// outside the valid E7 range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let file = File::open(path).map_err(|e| Error::FeatureDatabase {
            path: origin.clone(),
            reason: e.to_string(),
        })?;
        Self::from_reader(BufReader::new(file), &origin)
    }

    /// Parses a JSON feature database from any reader. `origin` names the
    /// source in error messages.
    pub fn from_reader<R: Read>(reader: R, origin: &str) -> Result<Self> {
        let records: Vec<FeatureRecord> =
            serde_json::from_reader(reader).map_err(|e| Error::FeatureDatabase {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        let mut features = Vec::with_capacity(records.len());
        for (idx, record) in records.into_iter().enumerate() {
            let location = Location::new(record.location.latitude, record.location.longitude);
            if !location.is_valid() {
                return Err(Error::FeatureDatabase {
                    path: origin.to_string(),
                    reason: format!("record {idx} has out-of-range location {location:?}"),
                });
            }
            features.push(Feature {
                name: record.name,
                location: Some(location.into()),
            });
        }

        Ok(Self::new(features))
    }

    /// Number of records, named or not.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of records that name a feature.
    pub fn named_len(&self) -> usize {
        self.features.iter().filter(|f| !f.name.is_empty()).count()
    }

    /// Returns the feature stored at exactly `point`.
    ///
    /// When nothing is stored there, the returned feature carries `point` and
    /// an empty name. Absence is a value, not an error.
    pub fn lookup(&self, point: &Point) -> Feature {
        match self.by_location.get(&Location::from(point)) {
            Some(&idx) => self.features[idx].clone(),
            None => Feature {
                name: String::new(),
                location: Some(Point {
                    latitude: point.latitude,
                    longitude: point.longitude,
                }),
            },
        }
    }

    /// Whether a named feature is stored at exactly `point`.
    pub fn contains(&self, point: &Point) -> bool {
        self.by_location.contains_key(&Location::from(point))
    }

    /// Named features inside `bounds`, borrowed, in store order.
    pub fn iter_within(&self, bounds: Bounds) -> impl Iterator<Item = &Feature> + '_ {
        self.features.iter().filter(move |f| matches_bounds(f, &bounds))
    }

    /// Starts a fresh lazy scan for named features inside `rect`.
    ///
    /// The returned [`Query`] owns a handle to the store, so it can be moved
    /// into a producer task and drained at the transport's pace.
    pub fn query(self: &Arc<Self>, rect: &Rectangle) -> Query {
        Query {
            store: Arc::clone(self),
            bounds: Bounds::from(rect),
            next: 0,
        }
    }
}

fn matches_bounds(feature: &Feature, bounds: &Bounds) -> bool {
    !feature.name.is_empty()
        && feature
            .location
            .as_ref()
            .is_some_and(|p| bounds.contains(Location::from(p)))
}

/// Lazy, single-pass scan over a [`FeatureStore`].
#[derive(Debug)]
pub struct Query {
    store: Arc<FeatureStore>,
    bounds: Bounds,
    next: usize,
}

impl Query {
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }
}

impl Iterator for Query {
    type Item = Feature;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(feature) = self.store.features.get(self.next) {
            self.next += 1;
            if matches_bounds(feature, &self.bounds) {
                return Some(feature.clone());
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.store.features.len() - self.next))
    }
}
