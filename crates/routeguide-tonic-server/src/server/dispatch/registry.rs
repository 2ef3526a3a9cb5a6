//! Admission and graceful shutdown for in-flight calls.
//!
//! The [`CallRegistry`] hands out a [`Call`] for every admitted invocation,
//! counts calls that have not yet reached a terminal state, and coordinates
//! shutdown through a shared [`CancellationToken`]: each call's token is a
//! child of the registry's, so cancelling the registry reaches every
//! suspension point of every call at once.

use crate::server::{
    dispatch::{
        call::{Call, CallHandle, supervise},
        deadline::earliest,
    },
    telemetry::{increment_calls, increment_calls_inflight},
};
use core::{future::Future, time::Duration};
use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use routeguide_tonic_core::{Error, types::Method};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// How often the drain loop re-checks the in-flight count.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Upper bound on waiting for cancelled calls to unwind after the drain.
const CANCEL_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct CallRegistry {
    inflight: AtomicUsize,
    next_id: AtomicU64,
    accepting: AtomicBool,
    shutdown_token: CancellationToken,
    /// `None` drains without bound.
    shutdown_timeout: Option<Duration>,
    /// Server-side limit applied to every call.
    request_timeout: Option<Duration>,
}

impl CallRegistry {
    pub fn new(shutdown_timeout: Option<Duration>) -> Self {
        Self {
            inflight: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            accepting: AtomicBool::new(true),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout,
            request_timeout: None,
        }
    }

    /// Expires every call after `limit`, or sooner if the caller asks for
    /// less.
    pub fn with_request_timeout(mut self, limit: Option<Duration>) -> Self {
        self.request_timeout = limit;
        self
    }

    /// Number of admitted calls that have not reached a terminal state.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Admits a new call for `method`.
    ///
    /// `requested` is the caller's own deadline, if it sent one. The call
    /// expires at the earlier of that and the server's request timeout.
    ///
    /// The call is counted before the accepting flag is read, so a shutdown
    /// that has stopped admission always sees it in the in-flight count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once shutdown has begun.
    pub fn admit(
        self: &Arc<Self>,
        method: Method,
        requested: Option<Duration>,
    ) -> Result<Call, Error> {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        if !self.is_accepting() {
            self.release();
            return Err(Error::ServiceShutdown);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = earliest(self.request_timeout, requested);
        increment_calls(method.name());
        increment_calls_inflight();

        tracing::trace!(call_id = id, %method, path = method.path(), ?timeout, "call received");
        Ok(Call::new(
            id,
            method,
            self.shutdown_token.child_token(),
            timeout,
            Arc::clone(self),
        ))
    }

    pub(crate) fn release(&self) {
        self.inflight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Admits, runs and finishes a call whose response is a single value
    /// (unary and client-streaming shapes).
    ///
    /// Handler errors and panics are converted to a terminal status here;
    /// they never propagate past this point.
    pub async fn run<T, F, Fut>(
        self: &Arc<Self>,
        method: Method,
        requested: Option<Duration>,
        handler: F,
    ) -> Result<T, Status>
    where
        F: FnOnce(CallHandle) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let call = self.admit(method, requested)?;
        let handle = call.handle();
        handle.activate();

        let outcome = supervise(&handle, handler(handle.clone())).await;

        call.finish(outcome.as_ref().map(|_| ()));
        outcome.map_err(Status::from)
    }

    /// Gracefully shuts down the dispatcher.
    ///
    /// - Stops admitting calls; later arrivals get `UNAVAILABLE`.
    /// - Waits for in-flight calls to finish, bounded by the configured
    ///   timeout (or without bound).
    /// - Cancels whatever is still running and waits briefly for it to
    ///   unwind.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new calls ===
        tracing::info!("Refusing new calls");
        self.accepting.store(false, Ordering::SeqCst);

        // === Phase 1: Wait for in-flight calls to drain ===
        tracing::info!("Draining in-flight calls ({} active)", self.inflight());
        let drained = match self.shutdown_timeout {
            Some(limit) => timeout(limit, self.wait_idle()).await.is_ok(),
            None => {
                self.wait_idle().await;
                true
            }
        };

        if drained {
            tracing::debug!("All in-flight calls drained");
            return Ok(());
        }

        tracing::warn!(
            "Graceful drain timed out ({} calls still active)",
            self.inflight()
        );

        // === Phase 2: Cancel remaining calls ===
        tracing::debug!("Cancelling remaining calls via shutdown token");
        self.shutdown_token.cancel();

        // === Phase 3: Give cancelled calls a moment to unwind ===
        if timeout(CANCEL_GRACE, self.wait_idle()).await.is_err() {
            tracing::warn!(
                "{} calls did not unwind after cancellation",
                self.inflight()
            );
        }

        tracing::info!("Call dispatcher shutdown complete");
        Ok(())
    }

    async fn wait_idle(&self) {
        while self.inflight() > 0 {
            sleep(DRAIN_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::dispatch::call::CallState;
    use tonic::Code;

    #[tokio::test]
    async fn run_maps_outcomes_to_statuses() {
        let calls = Arc::new(CallRegistry::new(Some(Duration::from_secs(1))));

        let ok = calls.run(Method::GetFeature, None, |_| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let failed = calls
            .run(Method::GetFeature, None, |_| async {
                Err::<(), _>(Error::Internal {
                    context: "fault while scanning".into(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(failed.code(), Code::Internal);
        assert_eq!(failed.message(), "fault while scanning");

        let panicked = calls
            .run(Method::RecordRoute, None, |handle| async move {
                if handle.id() > 0 {
                    panic!("bad route");
                }
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(panicked.code(), Code::Internal);
        assert!(panicked.message().contains("bad route"));

        assert_eq!(calls.inflight(), 0);
    }

    #[tokio::test]
    async fn admission_stops_once_shutdown_begins() {
        let calls = Arc::new(CallRegistry::new(Some(Duration::from_millis(100))));
        calls.shutdown().await.unwrap();

        assert!(!calls.is_accepting());
        assert!(matches!(
            calls.admit(Method::GetFeature, None),
            Err(Error::ServiceShutdown)
        ));
        let status = calls
            .run(Method::GetFeature, None, |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_waits_for_inflight_calls() {
        let calls = Arc::new(CallRegistry::new(Some(Duration::from_secs(5))));
        let call = calls.admit(Method::RecordRoute, None).unwrap();
        let handle = call.handle();

        let finisher = tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            call.finish(Ok(()));
        });

        calls.shutdown().await.unwrap();
        finisher.await.unwrap();

        assert_eq!(handle.state(), CallState::Completed);
        assert!(!handle.is_cancelled());
        assert_eq!(calls.inflight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_cancels_calls_that_outlive_the_drain() {
        let calls = Arc::new(CallRegistry::new(Some(Duration::from_millis(100))));

        let stuck = {
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                calls
                    .run(Method::RouteChat, None, |_| futures::future::pending::<Result<(), Error>>())
                    .await
            })
        };

        while calls.inflight() == 0 {
            tokio::task::yield_now().await;
        }

        calls.shutdown().await.unwrap();

        let status = stuck.await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
        assert_eq!(calls.inflight(), 0);
    }

    #[test]
    fn calls_expire_at_the_earlier_limit() {
        let calls = Arc::new(
            CallRegistry::new(None).with_request_timeout(Some(Duration::from_secs(60))),
        );

        let server_limited = calls.admit(Method::ListFeatures, None).unwrap();
        let caller_limited = calls
            .admit(Method::ListFeatures, Some(Duration::from_millis(10)))
            .unwrap();
        let server = server_limited.handle().deadline().unwrap();
        let caller = caller_limited.handle().deadline().unwrap();
        assert!(caller < server);

        let unlimited = Arc::new(CallRegistry::new(None));
        let call = unlimited.admit(Method::RouteChat, None).unwrap();
        assert_eq!(call.handle().deadline(), None);
    }

    #[tokio::test]
    async fn refused_admissions_leave_no_inflight_trace() {
        let calls = Arc::new(CallRegistry::new(Some(Duration::from_millis(50))));
        calls.shutdown().await.unwrap();

        for _ in 0..10 {
            assert!(calls.admit(Method::GetFeature, None).is_err());
        }
        assert_eq!(calls.inflight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_drains_calls_admitted_while_it_starts() {
        let calls = Arc::new(CallRegistry::new(Some(Duration::from_secs(10))));
        let admitted = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let admitters: Vec<_> = (0..4)
            .map(|_| {
                let calls = Arc::clone(&calls);
                let admitted = Arc::clone(&admitted);
                let finished = Arc::clone(&finished);
                tokio::spawn(async move {
                    while let Ok(call) = calls.admit(Method::GetFeature, None) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        call.finish(Ok(()));
                        finished.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        while admitted.load(Ordering::SeqCst) < 100 {
            tokio::task::yield_now().await;
        }
        calls.shutdown().await.unwrap();

        // Every call admitted before admission stopped has been drained.
        assert_eq!(calls.inflight(), 0);
        for admitter in admitters {
            admitter.await.unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), finished.load(Ordering::SeqCst));
    }
}
