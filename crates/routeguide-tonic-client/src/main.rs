use anyhow::Context;
use clap::Parser;
use core::time::Duration;
use rand::{Rng, seq::IndexedRandom};
use routeguide_tonic_client::{ClientConfig, RouteGuideCaller};
use routeguide_tonic_core::proto::{Feature, Point, Rectangle, RouteNote};
use tracing_subscriber::EnvFilter;

/// Demo client that exercises every `RouteGuide` method.
#[derive(Parser, Debug, Clone)]
#[command(name = "routeguide-client", version, about)]
struct CliArgs {
    /// Server URI.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("http://127.0.0.1:10000"))]
    server_addr: String,

    /// Deadline for every call, in milliseconds.
    ///
    /// Environment variable: `DEADLINE_MS`
    #[arg(long, env = "DEADLINE_MS")]
    deadline_ms: Option<u64>,

    /// Number of random points to send to `RecordRoute`.
    #[arg(long, default_value_t = 10)]
    route_points: usize,

    /// Also demonstrate deferred operations.
    #[arg(long, default_value_t = false)]
    deferred: bool,
}

impl From<&CliArgs> for ClientConfig {
    fn from(args: &CliArgs) -> Self {
        let config = ClientConfig::new(args.server_addr.clone());
        match args.deadline_ms {
            Some(ms) => config.with_deadline(Duration::from_millis(ms)),
            None => config,
        }
    }
}

fn point(latitude: i32, longitude: i32) -> Point {
    Point {
        latitude,
        longitude,
    }
}

fn note(latitude: i32, longitude: i32, message: &str) -> RouteNote {
    RouteNote {
        location: Some(point(latitude, longitude)),
        message: message.to_string(),
    }
}

fn coords(point: Option<&Point>) -> (i32, i32) {
    point.map_or((0, 0), |p| (p.latitude, p.longitude))
}

fn describe(feature: &Feature) -> String {
    let (latitude, longitude) = coords(feature.location.as_ref());
    if feature.name.is_empty() {
        format!("no feature at ({latitude}, {longitude})")
    } else {
        format!("'{}' at ({latitude}, {longitude})", feature.name)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let caller = RouteGuideCaller::connect(ClientConfig::from(&args))
        .await
        .with_context(|| format!("failed to connect to {}", args.server_addr))?;

    // Unary
    for p in [point(409_146_138, -746_188_906), point(0, 0)] {
        let feature = caller.get_feature(p).await?;
        tracing::info!("GetFeature: {}", describe(&feature));
    }

    // Server streaming
    let region = Rectangle {
        lo: Some(point(400_000_000, -750_000_000)),
        hi: Some(point(420_000_000, -730_000_000)),
    };
    let features = caller.list_features(region).await?;
    tracing::info!("ListFeatures: {} features in region", features.len());
    for feature in features.iter().take(5) {
        tracing::info!("  {}", describe(feature));
    }

    // Client streaming
    let route: Vec<Point> = {
        let mut rng = rand::rng();
        (0..args.route_points)
            .filter_map(|_| {
                if rng.random_bool(0.8) {
                    features.choose(&mut rng).and_then(|f| f.location.clone())
                } else {
                    Some(point(
                        rng.random_range(400_000_000..420_000_000),
                        rng.random_range(-750_000_000..-730_000_000),
                    ))
                }
            })
            .collect()
    };
    let summary = caller.record_route(route).await?;
    tracing::info!(
        "RecordRoute: {} points, {} features, {} m, {} s",
        summary.point_count,
        summary.feature_count,
        summary.distance,
        summary.elapsed_time
    );

    // Bidirectional
    let replies = caller
        .route_chat([
            note(0, 1, "First message"),
            note(0, 2, "Second message"),
            note(0, 3, "Third message"),
            note(0, 1, "Fourth message"),
            note(0, 2, "Fifth message"),
            note(0, 3, "Sixth message"),
        ])
        .await?;
    for reply in &replies {
        let (latitude, longitude) = coords(reply.location.as_ref());
        tracing::info!("RouteChat: '{}' at ({latitude}, {longitude})", reply.message);
    }

    if args.deferred {
        run_deferred(&caller).await?;
    }

    Ok(())
}

async fn run_deferred(caller: &RouteGuideCaller) -> anyhow::Result<()> {
    let deferred = caller.deferred();

    // Executed on another task while this one keeps polling the status.
    let listing = deferred.list_features(Rectangle {
        lo: Some(point(400_000_000, -750_000_000)),
        hi: Some(point(420_000_000, -730_000_000)),
    });
    tracing::info!("Deferred ListFeatures created: {}", listing.status());
    let running = listing.spawn();
    while !listing.status().is_terminal() {
        tracing::debug!("Deferred ListFeatures: {}", listing.status());
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let features = running.await.context("deferred task panicked")??;
    tracing::info!(
        "Deferred ListFeatures finished ({}): {} features",
        listing.status(),
        features.len()
    );

    // Cancelled before it runs: no I/O happens.
    let chat = deferred.route_chat([note(1, 1, "never sent")]);
    chat.cancel();
    match chat.execute().await {
        Ok(replies) => tracing::info!("Deferred RouteChat unexpectedly got {} replies", replies.len()),
        Err(e) => tracing::info!(
            "Deferred RouteChat: {} (cancelled: {})",
            e,
            chat.is_cancelled()
        ),
    }
    Ok(())
}
