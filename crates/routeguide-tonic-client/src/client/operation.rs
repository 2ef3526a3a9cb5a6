//! Deferred call handles.
//!
//! An [`Operation`] is created without touching the network. Whoever calls
//! [`Operation::execute`] performs the call and waits for its result; every
//! other clone of the handle can meanwhile read [`Operation::status`] or
//! request [`Operation::cancel`] from any task or thread.
//!
//! Cancellation races with completion. A call that finishes before the
//! cancellation is observed keeps its own terminal status, so
//! [`Operation::is_cancelled`] may be `true` while the status is `Ok`.

use core::{fmt, future::Future};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use routeguide_tonic_core::{Error, types::Method};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Code;

/// Last known state of an [`Operation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    /// Created; no I/O has happened yet.
    Pending,
    Executing,
    Ok,
    /// Cancelled by request or by deadline expiry.
    Cancelled,
    Failed { code: Code, message: String },
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Pending | OperationStatus::Executing)
    }

    /// The gRPC code the operation ended with, if it has ended.
    pub fn code(&self) -> Option<Code> {
        match self {
            OperationStatus::Pending | OperationStatus::Executing => None,
            OperationStatus::Ok => Some(Code::Ok),
            OperationStatus::Cancelled => Some(Code::Cancelled),
            OperationStatus::Failed { code, .. } => Some(*code),
        }
    }

    fn from_outcome<T>(outcome: &Result<T, Error>) -> Self {
        match outcome {
            Ok(_) => OperationStatus::Ok,
            Err(err) if err.is_cancellation() => OperationStatus::Cancelled,
            Err(Error::Rpc { code, message }) => OperationStatus::Failed {
                code: *code,
                message: message.clone(),
            },
            Err(err) => OperationStatus::Failed {
                code: err.code(),
                message: err.to_string(),
            },
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Pending => f.write_str("pending"),
            OperationStatus::Executing => f.write_str("executing"),
            OperationStatus::Ok => f.write_str("ok"),
            OperationStatus::Cancelled => f.write_str("cancelled"),
            OperationStatus::Failed { code, message } => write!(f, "failed ({code:?}): {message}"),
        }
    }
}

struct OperationInner<T> {
    method: Method,
    call: Mutex<Option<BoxFuture<'static, Result<T, Error>>>>,
    status: Mutex<OperationStatus>,
    started: AtomicBool,
    token: CancellationToken,
}

/// Cloneable, thread-safe handle to a deferred call.
pub struct Operation<T> {
    inner: Arc<OperationInner<T>>,
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("method", &self.inner.method)
            .field("status", &*self.inner.status.lock())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl<T> Operation<T> {
    /// Wraps `call` without polling it.
    pub fn new<F>(method: Method, call: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Self {
            inner: Arc::new(OperationInner {
                method,
                call: Mutex::new(Some(Box::pin(call))),
                status: Mutex::new(OperationStatus::Pending),
                started: AtomicBool::new(false),
                token: CancellationToken::new(),
            }),
        }
    }

    pub fn method(&self) -> Method {
        self.inner.method
    }

    /// Current or terminal status. Never blocks on the call.
    pub fn status(&self) -> OperationStatus {
        self.inner.status.lock().clone()
    }

    /// Whether cancellation has been requested, either through
    /// [`Operation::cancel`] or because the operation was never going to run.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Requests cancellation.
    ///
    /// A pending operation becomes `Cancelled` immediately and will never
    /// perform I/O. An executing one is interrupted at its next suspension
    /// point unless it completes first.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        if !self.inner.started.load(Ordering::Acquire) {
            drop(self.inner.call.lock().take());
            self.settle(OperationStatus::Cancelled);
        }
        tracing::debug!(method = %self.inner.method, status = %self.status(), "cancel requested");
    }

    /// Performs the call and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::OperationConsumed`] if the operation was already executed.
    /// - [`Error::RequestCancelled`] if it was cancelled first, or while
    ///   running.
    /// - The call's own failure otherwise.
    pub async fn execute(&self) -> Result<T, Error> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(Error::OperationConsumed);
        }

        let call = self.inner.call.lock().take();
        let Some(call) = call else {
            self.settle(OperationStatus::Cancelled);
            return Err(Error::RequestCancelled);
        };
        if self.inner.token.is_cancelled() {
            self.settle(OperationStatus::Cancelled);
            return Err(Error::RequestCancelled);
        }

        self.settle(OperationStatus::Executing);
        let outcome = tokio::select! {
            biased;
            () = self.inner.token.cancelled() => Err(Error::RequestCancelled),
            outcome = call => outcome,
        };

        self.settle(OperationStatus::from_outcome(&outcome));
        outcome
    }

    /// Runs [`Operation::execute`] on a new task, leaving this one free.
    pub fn spawn(&self) -> JoinHandle<Result<T, Error>>
    where
        T: Send + 'static,
    {
        let operation = self.clone();
        tokio::spawn(async move { operation.execute().await })
    }

    /// Moves the status forward; a terminal status is never overwritten.
    fn settle(&self, to: OperationStatus) {
        let mut status = self.inner.status.lock();
        if !status.is_terminal() {
            *status = to;
        }
    }
}
