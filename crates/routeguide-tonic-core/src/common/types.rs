//! # Route Guide Method Catalogue and Constants
//!
//! This module defines the shared vocabulary used by both the server and the
//! client: the four RPC methods exposed by `routeguide.RouteGuide`, the
//! streaming shape of each, and the constants that govern the E7 coordinate
//! encoding.
//!
//! ## Overview
//!
//! - [`Method`] - one entry per RPC, with its stable wire path
//! - [`Shape`] - unary, server-streaming, client-streaming or bidirectional
//! - [`COORD_FACTOR`] - scale between degrees and E7 fixed-point values
//! - [`EARTH_RADIUS_METRES`] - radius used by the haversine distance
//!
//! Method paths are part of the client-server contract. They are derived from
//! the `package` and `service` declared in `proto/route_guide.proto` and must
//! change together with it.

use core::fmt;

/// Fully qualified gRPC service name.
pub const SERVICE_NAME: &str = "routeguide.RouteGuide";

/// Scale between degrees and the E7 fixed-point representation.
pub const COORD_FACTOR: f64 = 1e7;

/// Largest valid latitude in E7 (90 degrees).
pub const MAX_LATITUDE: i32 = 900_000_000;

/// Largest valid longitude in E7 (180 degrees).
pub const MAX_LONGITUDE: i32 = 1_800_000_000;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_METRES: f64 = 6_371_000.0;

/// Number of values carried in each direction of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Single request, single response.
    Unary,
    /// Single request, multiple responses.
    ServerStreaming,
    /// Multiple requests, single response.
    ClientStreaming,
    /// Multiple requests and responses, independently ordered.
    Bidirectional,
}

impl Shape {
    /// Whether the inbound direction carries a stream.
    pub const fn streams_requests(self) -> bool {
        matches!(self, Shape::ClientStreaming | Shape::Bidirectional)
    }
}

/// The RPC methods exposed by `routeguide.RouteGuide`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    GetFeature,
    ListFeatures,
    RecordRoute,
    RouteChat,
}

impl Method {
    /// Every method, in declaration order.
    pub const ALL: [Method; 4] = [
        Method::GetFeature,
        Method::ListFeatures,
        Method::RecordRoute,
        Method::RouteChat,
    ];

    /// The method name as declared in the service definition.
    pub const fn name(self) -> &'static str {
        match self {
            Method::GetFeature => "GetFeature",
            Method::ListFeatures => "ListFeatures",
            Method::RecordRoute => "RecordRoute",
            Method::RouteChat => "RouteChat",
        }
    }

    /// The HTTP/2 path the call is dispatched on.
    pub const fn path(self) -> &'static str {
        match self {
            Method::GetFeature => "/routeguide.RouteGuide/GetFeature",
            Method::ListFeatures => "/routeguide.RouteGuide/ListFeatures",
            Method::RecordRoute => "/routeguide.RouteGuide/RecordRoute",
            Method::RouteChat => "/routeguide.RouteGuide/RouteChat",
        }
    }

    pub const fn shape(self) -> Shape {
        match self {
            Method::GetFeature => Shape::Unary,
            Method::ListFeatures => Shape::ServerStreaming,
            Method::RecordRoute => Shape::ClientStreaming,
            Method::RouteChat => Shape::Bidirectional,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
