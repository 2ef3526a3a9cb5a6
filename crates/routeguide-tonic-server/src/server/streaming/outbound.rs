//! Outbound half of a streaming call.
//!
//! Responses flow through a bounded channel whose receiving end is the stream
//! tonic writes to the wire. When the transport falls behind, the channel
//! fills and [`Outbound::send`] suspends the producer, which is how a slow
//! client throttles a fast handler.

use crate::server::{dispatch::CallHandle, telemetry::increment_messages_sent};
use core::pin::Pin;
use futures::Stream;
use routeguide_tonic_core::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

/// Response stream type handed back to tonic for every streaming method.
pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

#[derive(Debug)]
pub struct Outbound<T> {
    tx: mpsc::Sender<Result<T, Status>>,
    call: CallHandle,
}

impl<T> Clone for Outbound<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            call: self.call.clone(),
        }
    }
}

/// Creates an outbound queue of `buffer` messages and the response stream
/// that drains it.
pub fn channel<T>(buffer: usize, call: CallHandle) -> (Outbound<T>, ResponseStream<T>)
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (Outbound { tx, call }, Box::pin(ReceiverStream::new(rx)))
}

impl<T> Outbound<T> {
    /// Queues one response, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestCancelled`] if the call was cancelled or the
    /// transport has dropped the response stream.
    pub async fn send(&self, value: T) -> Result<(), Error> {
        let token = self.call.token();
        tokio::select! {
            biased;
            () = token.cancelled() => {
                self.call.abandon_outbound();
                Err(Error::RequestCancelled)
            }
            sent = self.tx.send(Ok(value)) => match sent {
                Ok(()) => {
                    self.call.record_sent();
                    increment_messages_sent();
                    Ok(())
                }
                Err(_) => {
                    self.call.abandon_outbound();
                    Err(Error::RequestCancelled)
                }
            },
        }
    }

    /// Terminates the response stream with `err`. Best effort: if the
    /// receiver is gone there is nobody left to tell, and once the call is
    /// cancelled a full queue is not waited on.
    pub async fn fail(&self, err: &Error) {
        self.call.abandon_outbound();
        let status = Err(Status::from(err.clone()));
        let token = self.call.token();

        let delivered = if token.is_cancelled() {
            self.tx.try_send(status).is_ok()
        } else {
            tokio::select! {
                biased;
                () = token.cancelled() => false,
                sent = self.tx.send(status) => sent.is_ok(),
            }
        };

        if !delivered {
            tracing::trace!(
                call_id = self.call.id(),
                "response stream gone before error delivery"
            );
        }
    }

    /// Marks end-of-stream. The stream itself ends once every clone of this
    /// sender has been dropped.
    pub fn close(&self) {
        self.call.close_outbound();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::dispatch::{CallRegistry, Direction};
    use core::time::Duration;
    use futures::StreamExt;
    use routeguide_tonic_core::types::Method;
    use std::sync::Arc;
    use tonic::Code;

    fn registry() -> Arc<CallRegistry> {
        Arc::new(CallRegistry::new(Some(Duration::from_secs(1))))
    }

    #[tokio::test]
    async fn delivers_in_order_and_ends_when_dropped() {
        let calls = registry();
        let call = calls.admit(Method::ListFeatures, None).unwrap();
        let (tx, mut stream) = channel(4, call.handle());

        for i in 0..3 {
            tx.send(i).await.unwrap();
        }
        tx.close();
        drop(tx);

        let mut seen = Vec::new();
        while let Some(item) = stream.next().await {
            seen.push(item.unwrap());
        }
        assert_eq!(seen, [0, 1, 2]);
        assert_eq!(call.handle().sent(), 3);
        assert_eq!(call.handle().outbound(), Direction::Closed);
    }

    #[tokio::test]
    async fn full_queue_suspends_the_producer() {
        let calls = registry();
        let call = calls.admit(Method::ListFeatures, None).unwrap();
        let (tx, mut stream) = channel(1, call.handle());

        tx.send(1).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(2)).await;
        assert!(blocked.is_err(), "send should wait for the consumer");

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        tx.send(3).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn dropped_receiver_reports_cancellation() {
        let calls = registry();
        let call = calls.admit(Method::RouteChat, None).unwrap();
        let (tx, stream) = channel(1, call.handle());
        drop(stream);

        assert!(matches!(tx.send(1).await, Err(Error::RequestCancelled)));
        assert_eq!(call.handle().outbound(), Direction::Abandoned);
    }

    #[tokio::test]
    async fn fail_terminates_the_stream_with_a_status() {
        let calls = registry();
        let call = calls.admit(Method::ListFeatures, None).unwrap();
        let (tx, mut stream) = channel::<u32>(2, call.handle());

        tx.fail(&Error::Internal {
            context: "scan failed".into(),
        })
        .await;
        drop(tx);

        let status = stream.next().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(stream.next().await.is_none());
    }
}
