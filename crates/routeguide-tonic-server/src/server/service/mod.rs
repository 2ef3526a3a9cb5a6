//! gRPC service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`RouteGuideService`).
//! - [`route`] - route summary accumulation for `RecordRoute`.
//! - [`chat`] - the shared note log behind `RouteChat`.

pub mod chat;
pub mod handler;
pub mod route;

#[cfg(test)]
mod tests;
