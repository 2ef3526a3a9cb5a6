//! gRPC service implementation for `routeguide.RouteGuide`.
//!
//! This module defines [`RouteGuideService`], the concrete implementation of
//! the [`RouteGuide`] service generated from `proto/route_guide.proto`. Each
//! method is admitted through the [`CallRegistry`] so that every call, of any
//! shape, has a tracked lifecycle, observes cancellation and shutdown, and
//! never lets a handler fault escape as anything but a terminal status.
//!
//! ## Responsibilities
//!
//! - Answer point lookups and region queries from the shared [`FeatureStore`].
//! - Summarize client-streamed routes once the client half-closes.
//! - Relay chat notes through the process-wide [`NoteLog`].
//! - Coordinate graceful shutdown of in-flight calls.

use crate::server::{
    config::ServerConfig,
    dispatch::{CallRegistry, requested_timeout},
    service::{chat::NoteLog, route::record_route},
    streaming::{Inbound, ResponseStream, relay, stream_responses},
};
use routeguide_tonic_core::{
    Error, FeatureStore,
    proto::{Feature, Point, Rectangle, RouteNote, RouteSummary, route_guide_server::RouteGuide},
    types::Method,
};
use std::sync::Arc;
use tonic::{Request, Response, Status, Streaming};

/// Route guide service over an immutable feature store.
///
/// Cheap to clone: every clone shares the same store, note log and call
/// registry.
#[derive(Clone, Debug)]
pub struct RouteGuideService {
    store: Arc<FeatureStore>,
    notes: Arc<NoteLog>,
    calls: Arc<CallRegistry>,
    config: ServerConfig,
}

impl RouteGuideService {
    pub fn new(store: FeatureStore, config: ServerConfig) -> Self {
        Self {
            store: Arc::new(store),
            notes: Arc::new(NoteLog::new()),
            calls: Arc::new(
                CallRegistry::new(config.shutdown_timeout)
                    .with_request_timeout(config.request_timeout),
            ),
            config,
        }
    }

    pub fn store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    pub fn calls(&self) -> &Arc<CallRegistry> {
        &self.calls
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Initiates a graceful shutdown.
    ///
    /// New calls are refused, in-flight calls are drained (or cancelled once
    /// the configured timeout elapses), and the chat log is closed.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.calls.shutdown().await?;
        tracing::debug!("Closing chat note log after {} notes", self.notes.len());
        self.notes.close();
        Ok(())
    }
}

#[tonic::async_trait]
impl RouteGuide for RouteGuideService {
    type ListFeaturesStream = ResponseStream<Feature>;
    type RouteChatStream = ResponseStream<RouteNote>;

    /// Returns the feature at a point, or an unnamed feature when there is
    /// none.
    #[tracing::instrument(skip_all, fields(
        latitude = req.get_ref().latitude,
        longitude = req.get_ref().longitude,
    ))]
    async fn get_feature(&self, req: Request<Point>) -> Result<Response<Feature>, Status> {
        let requested = requested_timeout(req.metadata());
        let point = req.into_inner();
        let store = Arc::clone(&self.store);

        let feature = self
            .calls
            .run(Method::GetFeature, requested, |_| async move {
                Ok(store.lookup(&point))
            })
            .await?;

        Ok(Response::new(feature))
    }

    /// Streams every named feature inside the rectangle, in store order.
    ///
    /// The query is pulled lazily as the transport drains the response queue.
    #[tracing::instrument(skip_all)]
    async fn list_features(
        &self,
        req: Request<Rectangle>,
    ) -> Result<Response<Self::ListFeaturesStream>, Status> {
        let call = self
            .calls
            .admit(Method::ListFeatures, requested_timeout(req.metadata()))?;
        let rect = req.into_inner();
        let query = self.store.query(&rect);
        tracing::debug!(call_id = call.handle().id(), bounds = ?query.bounds(), "listing features");

        let stream = stream_responses(
            call,
            self.config.stream_buffer_size,
            futures::stream::iter(query.map(Ok)),
        );
        Ok(Response::new(stream))
    }

    /// Consumes the whole route, then answers with its summary.
    #[tracing::instrument(skip_all)]
    async fn record_route(
        &self,
        req: Request<Streaming<Point>>,
    ) -> Result<Response<RouteSummary>, Status> {
        let requested = requested_timeout(req.metadata());
        let points = req.into_inner();
        let store = Arc::clone(&self.store);
        let buffer = self.config.stream_buffer_size;

        let summary = self
            .calls
            .run(Method::RecordRoute, requested, |call| async move {
                let inbound = Inbound::spawn(points, buffer, call);
                record_route(&store, inbound).await
            })
            .await?;

        Ok(Response::new(summary))
    }

    /// Answers each note with the earlier notes at its location that this
    /// caller has not seen yet.
    #[tracing::instrument(skip_all)]
    async fn route_chat(
        &self,
        req: Request<Streaming<RouteNote>>,
    ) -> Result<Response<Self::RouteChatStream>, Status> {
        let call = self
            .calls
            .admit(Method::RouteChat, requested_timeout(req.metadata()))?;
        let buffer = self.config.stream_buffer_size;
        let inbound = Inbound::spawn(req.into_inner(), buffer, call.handle());

        let mut session = self.notes.session();
        let stream = relay(call, inbound, buffer, move |note| session.exchange(note));
        Ok(Response::new(stream))
    }
}
