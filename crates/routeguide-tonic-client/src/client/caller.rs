//! Typed entry points for the four `RouteGuide` methods.
//!
//! [`RouteGuideCaller`] awaits each call until its result is fully available
//! and raises any non-OK status as an [`Error`]. [`DeferredCaller`] builds the
//! same calls as [`Operation`] handles that run only when executed.

use super::{config::ClientConfig, operation::Operation};
use core::{future::Future, time::Duration};
use futures::Stream;
use routeguide_tonic_core::{
    Error,
    proto::{Feature, Point, Rectangle, RouteNote, RouteSummary, route_guide_client::RouteGuideClient},
    types::Method,
};
use tokio::time::timeout;
use tonic::{
    Request, Streaming,
    codec::CompressionEncoding,
    transport::{Channel, Endpoint},
};

#[derive(Clone, Debug)]
pub struct RouteGuideCaller {
    client: RouteGuideClient<Channel>,
    deadline: Option<Duration>,
}

impl RouteGuideCaller {
    /// Connects to `config.endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the endpoint is malformed or the
    /// server cannot be reached within the connect timeout.
    pub async fn connect(config: ClientConfig) -> Result<Self, Error> {
        let channel = Endpoint::from_shared(config.endpoint.clone())?
            .connect_timeout(config.connect_timeout)
            .connect()
            .await?;
        tracing::debug!(endpoint = %config.endpoint, "connected");
        Ok(Self::from_channel(channel, &config))
    }

    /// Wraps an already established channel.
    pub fn from_channel(channel: Channel, config: &ClientConfig) -> Self {
        let mut client = RouteGuideClient::new(channel);
        if config.compression {
            client = client
                .send_compressed(CompressionEncoding::Zstd)
                .accept_compressed(CompressionEncoding::Zstd)
                .accept_compressed(CompressionEncoding::Gzip);
        }

        Self {
            client,
            deadline: config.default_deadline,
        }
    }

    /// Returns a caller whose calls expire after `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Builds deferred operations that share this caller's channel.
    pub fn deferred(&self) -> DeferredCaller {
        DeferredCaller {
            caller: self.clone(),
        }
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(deadline) = self.deadline {
            request.set_timeout(deadline);
        }
        request
    }

    /// Bounds `call` by the deadline on this side too, so a stalled server
    /// or network cannot hold it open. Dropping the call on expiry resets the
    /// stream, which the server observes as cancellation.
    async fn within<T, F>(&self, call: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        match self.deadline {
            Some(deadline) => timeout(deadline, call)
                .await
                .unwrap_or(Err(Error::DeadlineExceeded)),
            None => call.await,
        }
    }

    /// Looks up the feature at `point`. An empty name means nothing is
    /// there.
    pub async fn get_feature(&self, point: Point) -> Result<Feature, Error> {
        let mut client = self.client.clone();
        self.within(async {
            let response = client.get_feature(self.request(point)).await?;
            Ok(response.into_inner())
        })
        .await
    }

    /// Collects every named feature inside `rect`.
    pub async fn list_features(&self, rect: Rectangle) -> Result<Vec<Feature>, Error> {
        let mut client = self.client.clone();
        self.within(async {
            let stream = client.list_features(self.request(rect)).await?.into_inner();
            drain(stream).await
        })
        .await
    }

    /// Streams `points` and waits for the route summary.
    pub async fn record_route<I>(&self, points: I) -> Result<RouteSummary, Error>
    where
        I: IntoIterator<Item = Point>,
    {
        let points: Vec<Point> = points.into_iter().collect();
        self.record_route_stream(tokio_stream::iter(points)).await
    }

    /// Like [`record_route`](Self::record_route), for points produced
    /// asynchronously. The summary arrives once `points` ends.
    pub async fn record_route_stream<S>(&self, points: S) -> Result<RouteSummary, Error>
    where
        S: Stream<Item = Point> + Send + 'static,
    {
        let mut client = self.client.clone();
        self.within(async {
            let response = client.record_route(self.request(points)).await?;
            Ok(response.into_inner())
        })
        .await
    }

    /// Sends every note, then collects all replies.
    pub async fn route_chat<I>(&self, notes: I) -> Result<Vec<RouteNote>, Error>
    where
        I: IntoIterator<Item = RouteNote>,
    {
        let notes: Vec<RouteNote> = notes.into_iter().collect();
        let mut client = self.client.clone();
        self.within(async {
            let request = self.request(tokio_stream::iter(notes));
            let stream = client.route_chat(request).await?.into_inner();
            drain(stream).await
        })
        .await
    }

    /// Opens a chat and returns the live reply stream.
    ///
    /// Notes are sent as `notes` yields them, independently of how fast
    /// replies are read. The deadline bounds opening the call here; the
    /// server receives it as `grpc-timeout` and expires the rest of the call
    /// with `DEADLINE_EXCEEDED`.
    pub async fn route_chat_stream<S>(&self, notes: S) -> Result<Streaming<RouteNote>, Error>
    where
        S: Stream<Item = RouteNote> + Send + 'static,
    {
        let mut client = self.client.clone();
        self.within(async {
            let response = client.route_chat(self.request(notes)).await?;
            Ok(response.into_inner())
        })
        .await
    }
}

/// Reads a response stream to its end, raising a non-OK trailing status.
async fn drain<T>(mut stream: Streaming<T>) -> Result<Vec<T>, Error> {
    let mut items = Vec::new();
    while let Some(item) = stream.message().await? {
        items.push(item);
    }
    Ok(items)
}

/// Builds [`Operation`]s instead of running calls.
///
/// Request values are captured when the operation is built; nothing is sent
/// until [`Operation::execute`].
#[derive(Clone, Debug)]
pub struct DeferredCaller {
    caller: RouteGuideCaller,
}

impl DeferredCaller {
    pub fn get_feature(&self, point: Point) -> Operation<Feature> {
        let caller = self.caller.clone();
        Operation::new(Method::GetFeature, async move {
            caller.get_feature(point).await
        })
    }

    pub fn list_features(&self, rect: Rectangle) -> Operation<Vec<Feature>> {
        let caller = self.caller.clone();
        Operation::new(Method::ListFeatures, async move {
            caller.list_features(rect).await
        })
    }

    pub fn record_route<I>(&self, points: I) -> Operation<RouteSummary>
    where
        I: IntoIterator<Item = Point>,
    {
        let caller = self.caller.clone();
        let points: Vec<Point> = points.into_iter().collect();
        Operation::new(Method::RecordRoute, async move {
            caller.record_route(points).await
        })
    }

    pub fn route_chat<I>(&self, notes: I) -> Operation<Vec<RouteNote>>
    where
        I: IntoIterator<Item = RouteNote>,
    {
        let caller = self.caller.clone();
        let notes: Vec<RouteNote> = notes.into_iter().collect();
        Operation::new(Method::RouteChat, async move {
            caller.route_chat(notes).await
        })
    }
}
