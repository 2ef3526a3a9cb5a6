//! Call dispatcher.
//!
//! Routing by method name is performed by the generated `RouteGuideServer`,
//! which matches each request path against the service definition. This
//! module owns what happens around that routing:
//!
//! - [`registry`] - admission, in-flight accounting and graceful shutdown.
//! - [`call`] - the per-call state machine and the supervision boundary that
//!   converts handler faults and expired deadlines into terminal statuses.
//! - [`deadline`] - the caller's `grpc-timeout` header.

pub mod call;
pub mod deadline;
pub mod registry;

pub use call::{Call, CallHandle, CallState, Direction, supervise};
pub use deadline::requested_timeout;
pub use registry::CallRegistry;
