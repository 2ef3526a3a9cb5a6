//! Route summary accumulation for `RecordRoute`.

use crate::server::streaming::Inbound;
use routeguide_tonic_core::{
    Error, FeatureStore,
    geo::{Location, haversine},
    proto::{Point, RouteSummary},
};
use std::time::Instant;

/// Running totals over a stream of points.
///
/// Distances are accumulated in `f64` and only rounded when the summary is
/// produced, so many short legs do not lose their fractional metres.
#[derive(Debug, Default)]
pub struct RouteAccumulator {
    point_count: i32,
    feature_count: i32,
    distance: f64,
    previous: Option<Location>,
    started: Option<Instant>,
}

impl RouteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one point into the totals. The clock starts at the first point.
    pub fn record(&mut self, store: &FeatureStore, point: &Point) {
        let location = Location::from(point);
        self.started.get_or_insert_with(Instant::now);

        self.point_count = self.point_count.saturating_add(1);
        if store.contains(point) {
            self.feature_count = self.feature_count.saturating_add(1);
        }
        if let Some(previous) = self.previous {
            self.distance += haversine(previous, location);
        }
        self.previous = Some(location);
    }

    /// Produces the summary. Elapsed time runs from the first point to now,
    /// in whole seconds.
    pub fn summary(&self) -> RouteSummary {
        let elapsed = self
            .started
            .map_or(0, |started| started.elapsed().as_secs());

        RouteSummary {
            point_count: self.point_count,
            feature_count: self.feature_count,
            // Float-to-int casts saturate.
            distance: self.distance.round() as i32,
            elapsed_time: i32::try_from(elapsed).unwrap_or(i32::MAX),
        }
    }
}

/// Drains `inbound` to end-of-stream and summarizes the route.
///
/// The summary is only built once the client has half-closed; an error on
/// the inbound stream (including cancellation) ends the call without one.
pub async fn record_route(
    store: &FeatureStore,
    mut inbound: Inbound<Point>,
) -> Result<RouteSummary, Error> {
    let mut route = RouteAccumulator::new();
    while let Some(point) = inbound.next().await? {
        route.record(store, &point);
    }

    let summary = route.summary();
    tracing::debug!(
        points = summary.point_count,
        features = summary.feature_count,
        distance = summary.distance,
        "route recorded"
    );
    Ok(summary)
}
