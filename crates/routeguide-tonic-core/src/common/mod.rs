//! Types shared by the route guide server and client.
//!
//! - [`proto`] - generated messages, service traits and client stubs.
//! - [`error`] - the unified [`Error`] and its `tonic::Status` mapping.
//! - [`types`] - the method catalogue and coordinate constants.
//! - [`geo`] - bounds normalization and great-circle distance.
//! - [`store`] - the read-only [`FeatureStore`](store::FeatureStore).

pub mod error;
pub mod geo;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use store::FeatureStore;

/// Generated protobuf messages and gRPC bindings for `routeguide.RouteGuide`.
pub mod proto {
    tonic::include_proto!("routeguide");

    /// Encoded file descriptor set, registered with the reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("routeguide_descriptor");
}
