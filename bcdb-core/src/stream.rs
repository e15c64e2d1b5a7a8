//! Channel-backed result streams for List, Find and Acl.List.
//!
//! A producer task feeds a bounded channel of items. A failure travels on a
//! separate oneshot that the consumer polls ahead of the item channel, so
//! the error ends the stream immediately and anything still buffered is
//! discarded.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;

/// Create a connected sink and stream holding at most `buffer` items
pub fn result_channel<T>(buffer: usize) -> (ResultSink<T>, ResultStream<T>) {
    let (items_tx, items_rx) = mpsc::channel(buffer.max(1));
    let (failure_tx, failure_rx) = oneshot::channel();
    (
        ResultSink {
            items: items_tx,
            failure: failure_tx,
        },
        ResultStream {
            items: items_rx,
            failure: Some(failure_rx),
            done: false,
        },
    )
}

/// Producer half, owned by the sweep task
pub struct ResultSink<T> {
    items: mpsc::Sender<T>,
    failure: oneshot::Sender<DbError>,
}

impl<T> ResultSink<T> {
    /// Wait for buffer space. `None` once the consumer is gone.
    pub async fn reserve(&self) -> Option<mpsc::Permit<'_, T>> {
        self.items.reserve().await.ok()
    }

    pub fn is_closed(&self) -> bool {
        self.items.is_closed()
    }

    /// End the stream with `err`, dropping items not yet delivered
    pub fn fail(self, err: DbError) {
        let _ = self.failure.send(err);
    }
}

/// Lazily produced query results. An error is always the final item.
pub struct ResultStream<T> {
    items: mpsc::Receiver<T>,
    failure: Option<oneshot::Receiver<DbError>>,
    done: bool,
}

impl<T> Unpin for ResultStream<T> {}

impl<T> ResultStream<T> {
    fn finish_with(&mut self, err: DbError) -> Poll<Option<DbResult<T>>> {
        self.done = true;
        self.items.close();
        Poll::Ready(Some(Err(err)))
    }
}

impl<T> Stream for ResultStream<T> {
    type Item = DbResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(failure) = this.failure.as_mut() {
            match Pin::new(failure).poll(cx) {
                Poll::Ready(Ok(err)) => return this.finish_with(err),
                // Producer finished without failing
                Poll::Ready(Err(_)) => this.failure = None,
                Poll::Pending => {}
            }
        }

        match this.items.poll_recv(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(None) => {
                // The failure is sent before the sink is dropped
                if let Some(mut failure) = this.failure.take() {
                    if let Ok(err) = failure.try_recv() {
                        return this.finish_with(err);
                    }
                }
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
