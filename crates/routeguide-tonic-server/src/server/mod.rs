//! Route guide server internals.
//!
//! - [`config`] - CLI and environment configuration.
//! - [`dispatch`] - per-call lifecycle, admission and graceful shutdown.
//! - [`streaming`] - per-direction handoff queues between handlers and tonic.
//! - [`service`] - the `RouteGuide` implementation.
//! - [`telemetry`] - logging, tracing and metrics setup.

pub mod config;
pub mod dispatch;
pub mod service;
pub mod streaming;
pub mod telemetry;

use core::future::Future;
use futures::Stream;
use routeguide_tonic_core::proto::{FILE_DESCRIPTOR_SET, route_guide_server::RouteGuideServer};
use service::handler::RouteGuideService;
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::{
    codec::CompressionEncoding,
    transport::{Server, server::Connected},
};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Serves `service` on `incoming` until `signal` resolves, then shuts down
/// gracefully.
///
/// Alongside `RouteGuide`, the server exposes the gRPC health service and
/// reflection, accepts gRPC-Web from any origin, and negotiates zstd, gzip or
/// deflate compression.
pub async fn serve<I, IO, IE, F>(
    service: RouteGuideService,
    incoming: I,
    signal: F,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
    F: Future<Output = ()>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<RouteGuideServer<RouteGuideService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    // Request deadlines are enforced per call by the dispatcher.
    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_route_guide_service(service.clone()))
        .serve_with_incoming_shutdown(incoming, shutdown(service, health_reporter, signal))
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn build_route_guide_service(service: RouteGuideService) -> RouteGuideServer<RouteGuideService> {
    RouteGuideServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

/// Resolves once in-flight calls have drained, which lets tonic release the
/// listener.
async fn shutdown<F>(service: RouteGuideService, health_reporter: HealthReporter, signal: F)
where
    F: Future<Output = ()>,
{
    signal.await;
    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<RouteGuideServer<RouteGuideService>>()
        .await;

    // 2. Drain, then cancel, in-flight calls
    if let Err(e) = service.shutdown().await {
        tracing::error!("Error during service shutdown: {e:?}");
    }
}
