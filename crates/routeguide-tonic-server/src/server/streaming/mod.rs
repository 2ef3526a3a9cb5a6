//! Bridges lazy producers and consumers to tonic's stream primitives.
//!
//! Each direction of a call gets its own bounded handoff queue:
//!
//! - [`inbound`] - a reader task drains the transport into a queue that the
//!   handler pulls from.
//! - [`outbound`] - the handler pushes responses into a queue that the
//!   transport drains; a full queue suspends the handler.
//! - [`coordinator`] - drives server-streaming and bidirectional calls on a
//!   spawned task and maps their outcome to the stream's terminal status.
//!
//! Values within one direction keep their send order. Nothing orders the two
//! directions relative to each other.

pub mod coordinator;
pub mod inbound;
pub mod outbound;

pub use coordinator::{relay, stream_responses};
pub use inbound::Inbound;
pub use outbound::ResponseStream;
