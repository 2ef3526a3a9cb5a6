//! Client invocation layer.
//!
//! - [`config`] - connection settings.
//! - [`caller`] - blocking and deferred entry points for the four methods.
//! - [`operation`] - the deferred [`Operation`] handle.

pub mod caller;
pub mod config;
pub mod operation;

pub use caller::{DeferredCaller, RouteGuideCaller};
pub use config::ClientConfig;
pub use operation::{Operation, OperationStatus};
