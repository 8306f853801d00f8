//! Listener variants for the event bus.
//!
//! Three capability levels:
//!
//! - **callback**: synchronous handler, may fail; failures are logged by the
//!   bus and never halt delivery to other subscribers.
//! - **channel**: non-blocking forward into a tokio mpsc sender; a full or
//!   closed channel drops the message with a log line.
//! - **stream**: a bounded ring drained by an owned worker thread into a
//!   closable byte sink; a sink error closes the ring and the bus collects
//!   the listener on the next publish.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Error returned by callback listeners.
#[derive(Debug, thiserror::Error)]
#[error("listener rejected event: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

type Callback = dyn Fn(Vec<u8>) -> Result<(), ListenerError> + Send + Sync;

/// Capacity of the ring between the bus and a stream worker.
const STREAM_RING_CAPACITY: usize = 100;

/// A subscriber attached to a topic.
pub enum Listener {
    Callback(Box<Callback>),
    Channel(tokio::sync::mpsc::Sender<Vec<u8>>),
    Stream(StreamListener),
}

impl Listener {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Vec<u8>) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Listener::Callback(Box::new(f))
    }

    pub fn channel(tx: tokio::sync::mpsc::Sender<Vec<u8>>) -> Self {
        Listener::Channel(tx)
    }

    pub fn stream<W>(sink: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Listener::Stream(StreamListener::new(sink))
    }

    /// Deliver one payload. Returns `false` if the listener is dead and
    /// should be garbage-collected.
    pub(crate) fn deliver(&self, payload: Vec<u8>) -> bool {
        match self {
            Listener::Callback(cb) => {
                if let Err(err) = cb(payload) {
                    warn!(target: "eventbus", %err, "callback listener failed");
                }
                true
            }
            Listener::Channel(tx) => {
                use tokio::sync::mpsc::error::TrySendError;
                match tx.try_send(payload) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!(target: "eventbus", "channel listener full, dropping event");
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                }
            }
            Listener::Stream(stream) => stream.push(payload),
        }
    }
}

/// A stream subscriber: ring buffer plus the worker that drains it.
pub struct StreamListener {
    ring: crossbeam::channel::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl StreamListener {
    fn new<W>(mut sink: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = crossbeam::channel::bounded::<Vec<u8>>(STREAM_RING_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let worker_closed = Arc::clone(&closed);

        std::thread::spawn(move || {
            // Drains until the ring disconnects or the sink fails.
            while let Ok(frame) = rx.recv() {
                if sink.write_all(&frame).and_then(|_| sink.flush()).is_err() {
                    warn!(target: "eventbus", "stream sink failed, closing listener");
                    worker_closed.store(true, Ordering::Release);
                    return;
                }
            }
        });

        Self { ring: tx, closed }
    }

    /// Whether the worker shut down after a sink error.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Push a frame onto the ring. Returns `false` once closed.
    fn push(&self, frame: Vec<u8>) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.ring.try_send(frame).is_err() {
            warn!(target: "eventbus", "stream ring full, dropping frame");
        }
        true
    }
}
