//! Inbound half of a streaming call.
//!
//! [`Inbound`] turns the transport's request stream into a pull-based queue.
//! A dedicated reader task drains the transport into a bounded channel, so
//! reading progresses independently of whatever the handler is doing with the
//! outbound side. The handler pulls with [`Inbound::next`], which suspends
//! until a value arrives, the client half-closes, or the call is cancelled.
//!
//! Dropping an [`Inbound`] before end-of-stream abandons the direction: the
//! reader task is aborted and no further reads happen.

use crate::server::{dispatch::CallHandle, telemetry::increment_messages_received};
use core::pin::pin;
use futures::{Stream, StreamExt};
use routeguide_tonic_core::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tonic::Status;

#[derive(Debug)]
pub struct Inbound<T> {
    rx: mpsc::Receiver<Result<T, Status>>,
    reader: JoinHandle<()>,
    call: CallHandle,
    token: CancellationToken,
    finished: bool,
}

impl<T> Inbound<T>
where
    T: Send + 'static,
{
    /// Starts reading `stream` into a queue of `buffer` messages.
    pub fn spawn<S>(stream: S, buffer: usize, call: CallHandle) -> Self
    where
        S: Stream<Item = Result<T, Status>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let token = call.token();
        let reader = tokio::spawn(read_into(stream, tx, token.clone()));

        Self {
            rx,
            reader,
            call,
            token,
            finished: false,
        }
    }

    /// Waits for the next request value.
    ///
    /// Returns `Ok(None)` once the client has signalled end-of-stream.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestCancelled`] if the call was cancelled or the peer
    ///   reset the stream.
    /// - Any other transport status, converted through [`Error::from`].
    pub async fn next(&mut self) -> Result<Option<T>, Error> {
        if self.finished {
            return Ok(None);
        }

        let item = tokio::select! {
            biased;
            () = self.token.cancelled() => {
                self.finished = true;
                self.call.abandon_inbound();
                return Err(Error::RequestCancelled);
            }
            item = self.rx.recv() => item,
        };

        match item {
            Some(Ok(value)) => {
                self.call.record_received();
                increment_messages_received();
                Ok(Some(value))
            }
            Some(Err(status)) => {
                self.finished = true;
                self.call.abandon_inbound();
                Err(Error::from(status))
            }
            None => {
                self.finished = true;
                self.call.close_inbound();
                Ok(None)
            }
        }
    }
}

impl<T> Drop for Inbound<T> {
    fn drop(&mut self) {
        self.reader.abort();
        if !self.finished {
            self.call.abandon_inbound();
        }
    }
}

/// Reader task: forwards transport messages until end-of-stream, the first
/// error, cancellation, or the consumer going away.
async fn read_into<S, T>(stream: S, tx: mpsc::Sender<Result<T, Status>>, token: CancellationToken)
where
    S: Stream<Item = Result<T, Status>>,
{
    let mut stream = pin!(stream);
    loop {
        let item = tokio::select! {
            biased;
            () = token.cancelled() => break,
            item = stream.next() => item,
        };

        let Some(item) = item else {
            break;
        };

        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}
