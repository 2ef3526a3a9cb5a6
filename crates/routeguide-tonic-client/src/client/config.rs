use core::time::Duration;

/// Connection settings for a [`RouteGuideCaller`](super::RouteGuideCaller).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URI, e.g. `http://127.0.0.1:10000`.
    pub endpoint: String,
    pub connect_timeout: Duration,
    /// Deadline applied to every call that does not set its own. Expiry
    /// cancels the call.
    pub default_deadline: Option<Duration>,
    /// Compress requests with zstd and accept zstd or gzip responses.
    pub compression: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("http://127.0.0.1:10000"),
            connect_timeout: Duration::from_secs(5),
            default_deadline: None,
            compression: true,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }
}
