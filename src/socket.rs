//! `ThreadSafeWriter`: a WebSocket sink guarded by an exclusive write lock
//! (spec §4.D; `original_source/types/thread_safe_writer.go`).
//!
//! Only the writer task drains a client's outbound queue, so contention is
//! rare in practice; the lock exists to make "one message at a time" an
//! invariant of the type rather than a convention callers have to honor.
//!
//! `OutboundWriter` is the seam: production wires a real `ThreadSafeWriter`
//! over the split WebSocket sink, tests wire a `RecordingWriter` so the
//! per-client actor can be exercised without a live socket.

use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) trait OutboundWriter: Send + Sync {
    fn write_text(&self, text: String) -> BoxFuture<'_, Result<()>>;
    fn close(&self) -> BoxFuture<'_, ()>;
}

pub struct ThreadSafeWriter {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl ThreadSafeWriter {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

impl OutboundWriter for ThreadSafeWriter {
    fn write_text(&self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(text)).await?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut sink = self.sink.lock().await;
            let _ = sink.close().await;
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every message a client would have sent, instead of pushing
    /// bytes over a socket. Used by `client::test_support` to build a
    /// `ClientHandle` that exercises the hub/registration/disconnect paths
    /// without a live WebSocket.
    #[derive(Default)]
    pub(crate) struct RecordingWriter {
        pub sent: Mutex<Vec<String>>,
        pub closed: AtomicBool,
    }

    impl OutboundWriter for RecordingWriter {
        fn write_text(&self, text: String) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.sent.lock().await.push(text);
                Ok(())
            })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.closed.store(true, Ordering::SeqCst);
            })
        }
    }
}
