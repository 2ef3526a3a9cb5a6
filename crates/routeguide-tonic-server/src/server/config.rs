use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `routeguide-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is honoured), with defaults suitable for local use.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "routeguide-server",
    version,
    about = "A gRPC route guide exercising every streaming shape"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:10000" or "/tmp/routeguide.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:10000"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a
    /// file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Path to the JSON feature database loaded at startup.
    ///
    /// Environment variable: `FEATURE_DB`
    #[arg(long, env = "FEATURE_DB", default_value = "data/route_guide_db.json")]
    pub feature_db: PathBuf,

    /// Capacity of each per-direction handoff queue.
    ///
    /// Bounds how many messages a producer may run ahead of the transport (or
    /// the transport ahead of a consumer) before it is suspended.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 16)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight calls to finish on shutdown before
    /// cancelling them. `0` waits indefinitely.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Optional deadline, in milliseconds, applied to every call.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_MS`
    #[arg(long, env = "REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub feature_db: PathBuf,
    pub stream_buffer_size: usize,
    /// `None` waits for in-flight calls without bound.
    pub shutdown_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:10000"),
            uds: false,
            feature_db: PathBuf::from("data/route_guide_db.json"),
            stream_buffer_size: 16,
            shutdown_timeout: Some(Duration::from_secs(10)),
            request_timeout: None,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.server_addr.is_empty() {
            bail!("SERVER_ADDR must not be empty");
        }

        let request_timeout = match args.request_timeout_ms {
            Some(0) => bail!("REQUEST_TIMEOUT_MS must be greater than 0 when set"),
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        };

        let shutdown_timeout =
            (args.shutdown_timeout_secs > 0).then(|| Duration::from_secs(args.shutdown_timeout_secs));

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            feature_db: args.feature_db,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout,
            request_timeout,
        })
    }
}
