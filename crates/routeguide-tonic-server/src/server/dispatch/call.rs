//! Per-call lifecycle.
//!
//! A call moves `Received -> Active` and then into exactly one terminal state:
//! `Completed`, `Cancelled` or `Failed`. While active, its inbound and
//! outbound directions progress independently and are tracked separately so
//! the reader task and the writer task can each report on their own side.
//!
//! [`Call`] is the owning guard held by whichever task finishes the call.
//! [`CallHandle`] is a cheap, cloneable view handed to the stream adapter.
//! Dropping a [`Call`] that never finished records it as cancelled: this is
//! what happens when the transport drops a handler future because the peer
//! went away.

use crate::server::{
    dispatch::registry::CallRegistry,
    telemetry::{
        decrement_calls_inflight, increment_call_failures, record_call_duration,
    },
};
use core::{any::Any, future::Future, panic::AssertUnwindSafe, time::Duration};
use futures::{FutureExt, future};
use portable_atomic::{AtomicU8, AtomicU64, Ordering};
use routeguide_tonic_core::{
    Error,
    types::Method,
};
use std::sync::Arc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CallState {
    Received = 0,
    Active = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl CallState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CallState::Received,
            1 => CallState::Active,
            2 => CallState::Completed,
            3 => CallState::Cancelled,
            _ => CallState::Failed,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Cancelled | CallState::Failed
        )
    }
}

/// State of one direction of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Open = 0,
    /// The sender signalled end-of-stream.
    Closed = 1,
    /// Abandoned before end-of-stream; no further reads or writes happen.
    Abandoned = 2,
}

impl Direction {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Direction::Open,
            1 => Direction::Closed,
            _ => Direction::Abandoned,
        }
    }
}

#[derive(Debug)]
struct CallInner {
    id: u64,
    method: Method,
    started: Instant,
    deadline: Option<Instant>,
    token: CancellationToken,
    state: AtomicU8,
    inbound: AtomicU8,
    outbound: AtomicU8,
    received: AtomicU64,
    sent: AtomicU64,
}

/// Shared view of an in-flight call.
#[derive(Clone, Debug)]
pub struct CallHandle {
    inner: Arc<CallInner>,
}

impl CallHandle {
    fn new(id: u64, method: Method, token: CancellationToken, timeout: Option<Duration>) -> Self {
        // A unary request has already been read in full when the handler runs.
        let inbound = if method.shape().streams_requests() {
            Direction::Open
        } else {
            Direction::Closed
        };

        let started = Instant::now();
        Self {
            inner: Arc::new(CallInner {
                id,
                method,
                started,
                deadline: timeout.and_then(|limit| started.checked_add(limit)),
                token,
                state: AtomicU8::new(CallState::Received as u8),
                inbound: AtomicU8::new(inbound as u8),
                outbound: AtomicU8::new(Direction::Open as u8),
                received: AtomicU64::new(0),
                sent: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn method(&self) -> Method {
        self.inner.method
    }

    /// When the call expires, if it has a deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Token cancelled when the call must stop: explicit cancellation,
    /// deadline expiry or service shutdown.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Requests cancellation. Every suspension point on this call's streams
    /// wakes and reports [`Error::RequestCancelled`].
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    pub fn state(&self) -> CallState {
        CallState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn inbound(&self) -> Direction {
        Direction::from_u8(self.inner.inbound.load(Ordering::Acquire))
    }

    pub fn outbound(&self) -> Direction {
        Direction::from_u8(self.inner.outbound.load(Ordering::Acquire))
    }

    pub fn received(&self) -> u64 {
        self.inner.received.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    /// `Received -> Active`. No-op in any other state.
    pub fn activate(&self) {
        let _ = self.inner.state.compare_exchange(
            CallState::Received as u8,
            CallState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        tracing::trace!(call_id = self.id(), method = %self.method(), "call active");
    }

    pub fn close_inbound(&self) {
        Self::settle(&self.inner.inbound, Direction::Closed);
    }

    pub fn abandon_inbound(&self) {
        Self::settle(&self.inner.inbound, Direction::Abandoned);
    }

    pub fn close_outbound(&self) {
        Self::settle(&self.inner.outbound, Direction::Closed);
    }

    pub fn abandon_outbound(&self) {
        Self::settle(&self.inner.outbound, Direction::Abandoned);
    }

    pub fn record_received(&self) {
        self.inner.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.inner.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Moves a direction out of `Open`; the first transition wins.
    fn settle(slot: &AtomicU8, to: Direction) {
        let _ = slot.compare_exchange(
            Direction::Open as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Moves the call into `to` unless it is already terminal.
    fn terminate(&self, to: CallState) -> bool {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if CallState::from_u8(current).is_terminal() {
                return false;
            }
            match self.inner.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Owning guard for an admitted call.
///
/// Holds the call's in-flight slot in the [`CallRegistry`] until dropped.
#[derive(Debug)]
pub struct Call {
    handle: CallHandle,
    registry: Arc<CallRegistry>,
}

impl Call {
    pub(crate) fn new(
        id: u64,
        method: Method,
        token: CancellationToken,
        timeout: Option<Duration>,
        registry: Arc<CallRegistry>,
    ) -> Self {
        Self {
            handle: CallHandle::new(id, method, token, timeout),
            registry,
        }
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    /// Records the terminal state for `outcome` and releases the call.
    pub fn finish(self, outcome: Result<(), &Error>) {
        let handle = &self.handle;
        match outcome {
            Ok(()) => {
                handle.close_inbound();
                handle.close_outbound();
                if handle.terminate(CallState::Completed) {
                    tracing::trace!(
                        call_id = handle.id(),
                        method = %handle.method(),
                        received = handle.received(),
                        sent = handle.sent(),
                        "call completed"
                    );
                }
            }
            Err(err) => {
                handle.abandon_inbound();
                handle.abandon_outbound();
                let state = if err.is_cancellation() {
                    CallState::Cancelled
                } else {
                    CallState::Failed
                };
                if handle.terminate(state) {
                    increment_call_failures(err.code());
                    match state {
                        CallState::Cancelled => tracing::debug!(
                            call_id = handle.id(),
                            method = %handle.method(),
                            "call cancelled: {err}"
                        ),
                        _ if err.code() == tonic::Code::Internal => tracing::error!(
                            call_id = handle.id(),
                            method = %handle.method(),
                            "call failed: {err}"
                        ),
                        _ => tracing::warn!(
                            call_id = handle.id(),
                            method = %handle.method(),
                            "call failed: {err}"
                        ),
                    }
                }
            }
        }
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        let handle = &self.handle;
        if handle.terminate(CallState::Cancelled) {
            handle.abandon_inbound();
            handle.abandon_outbound();
            increment_call_failures(tonic::Code::Cancelled);
            tracing::debug!(
                call_id = handle.id(),
                method = %handle.method(),
                "call dropped before completion"
            );
        }

        let method = handle.method().name();
        record_call_duration(method, handle.inner.started.elapsed().as_secs_f64() * 1000.0);
        decrement_calls_inflight();
        self.registry.release();
    }
}

/// Runs `work` for `call` until it resolves, the call is cancelled, its
/// deadline passes, or it panics.
///
/// A panic never escapes: it becomes [`Error::Internal`] carrying the panic
/// message, so one faulty handler cannot take down the connection or any
/// other call. On expiry the call's token is cancelled as well, which stops
/// its reader task and wakes any send still waiting on the transport.
pub async fn supervise<T, F>(call: &CallHandle, work: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    let token = call.token();
    let expiry = async {
        match call.deadline() {
            Some(deadline) => sleep_until(deadline).await,
            None => future::pending().await,
        }
    };

    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::RequestCancelled),
        () = expiry => {
            call.cancel();
            Err(Error::DeadlineExceeded)
        }
        outcome = AssertUnwindSafe(work).catch_unwind() => {
            outcome.unwrap_or_else(|panic| Err(Error::Internal {
                context: panic_message(panic.as_ref()),
            }))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        String::from("handler panicked")
    }
}
