use super::{
    inbound::Inbound,
    outbound::{Outbound, ResponseStream, channel},
};
use crate::server::dispatch::{Call, supervise};
use core::{future::Future, pin::pin};
use futures::{Stream, StreamExt};
use routeguide_tonic_core::Error;
use tracing::Instrument;

/// Streams every item of `producer` back to the client.
///
/// Used for the server-streaming shape. The producer is polled lazily: the
/// next item is only pulled once the previous one has been accepted by the
/// outbound queue, so a slow client holds back the producer rather than
/// growing memory.
///
/// # Arguments
///
/// - `call`: The admitted call. Ownership moves into the driving task, which
///   records the terminal state.
/// - `buffer`: Capacity of the outbound queue.
/// - `producer`: Source of responses. An `Err` item ends the stream with that
///   error's status.
///
/// # Behavior
///
/// - Producer exhausted: the stream ends with `OK`.
/// - Producer error or panic: the stream ends with the mapped status.
/// - Client gone or call cancelled: production stops at the next send and the
///   call is recorded as cancelled.
pub fn stream_responses<T, S>(call: Call, buffer: usize, producer: S) -> ResponseStream<T>
where
    T: Send + 'static,
    S: Stream<Item = Result<T, Error>> + Send + 'static,
{
    let (outbound, responses) = channel(buffer, call.handle());
    let tx = outbound.clone();
    drive(call, outbound, async move {
        let mut producer = pin!(producer);
        while let Some(item) = producer.next().await {
            tx.send(item?).await?;
        }
        Ok(())
    });
    responses
}

/// Answers each inbound request with zero or more responses.
///
/// Used for the bidirectional shape. Requests are read by the inbound reader
/// task while responses drain through the outbound queue, so neither
/// direction waits on the other beyond the queue bounds. Responses produced
/// for one request are written, in order, before the next request is taken.
///
/// `respond` runs on the driving task; an error from it ends the call.
pub fn relay<T, U, I, F>(
    call: Call,
    mut inbound: Inbound<T>,
    buffer: usize,
    mut respond: F,
) -> ResponseStream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    I: IntoIterator<Item = U> + Send,
    I::IntoIter: Send,
    F: FnMut(T) -> Result<I, Error> + Send + 'static,
{
    let (outbound, responses) = channel(buffer, call.handle());
    let tx = outbound.clone();
    drive(call, outbound, async move {
        while let Some(request) = inbound.next().await? {
            for response in respond(request)? {
                tx.send(response).await?;
            }
        }
        Ok(())
    });
    responses
}

/// Spawns `work` under supervision and finishes `call` with its outcome.
///
/// On failure the error is delivered as the response stream's terminal
/// status through `outbound`. The stream then ends once every sender clone
/// is dropped.
pub fn drive<T, F>(call: Call, outbound: Outbound<T>, work: F)
where
    T: Send + 'static,
    F: Future<Output = Result<(), Error>> + Send + 'static,
{
    let handle = call.handle();
    let span = tracing::debug_span!("call", call_id = handle.id(), method = %handle.method());
    handle.activate();

    tokio::spawn(
        async move {
            let outcome = supervise(&handle, work).await;

            match &outcome {
                Ok(()) => outbound.close(),
                Err(err) => outbound.fail(err).await,
            }
            drop(outbound);

            call.finish(outcome.as_ref().map(|_| ()));
        }
        .instrument(span),
    );
}
