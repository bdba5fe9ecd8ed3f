//! Bounded batch streams with completion acknowledgment.
//!
//! Producers push [`Message`]s into a bounded crossbeam channel. Every send
//! bumps a pending counter that the consumer decrements with
//! [`BatchReceiver::done`] once it has fully processed the message. A
//! producer that must know when its units have been consumed calls
//! [`BatchSender::wait`]. Once the consumer closes the stream, sends hand the
//! message back instead of queueing it.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{ExecError, Result};
use crate::memory::Arena;

use super::vectorized::Batch;

pub use crossbeam_channel::SendError;

/// One unit sent over a batch stream.
#[derive(Debug)]
pub enum Message {
    /// A batch of rows. A batch without attributes carries no data.
    Batch(Batch),
    /// The producer failed; the error is passed on unchanged.
    Error(ExecError),
    /// No more batches will follow.
    End,
}

#[derive(Debug, Default)]
struct PendingState {
    outstanding: usize,
    closed: bool,
}

/// Counter of sent but unacknowledged messages.
#[derive(Debug, Default)]
struct Pending {
    state: Mutex<PendingState>,
    cond: Condvar,
}

impl Pending {
    /// Counts one more message in flight, unless the consumer has closed.
    fn try_add(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.outstanding += 1;
        true
    }

    fn sub(&self) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.cond.notify_all();
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut state = self.state.lock();
        while state.outstanding > 0 && !state.closed {
            self.cond.wait(&mut state);
        }
    }

    fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }
}

/// Producer half of a batch stream.
#[derive(Clone)]
pub struct BatchSender {
    tx: Sender<Message>,
    pending: Arc<Pending>,
    name: Arc<str>,
}

impl BatchSender {
    /// Sends a message, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns the message back if the consumer is gone or has closed the
    /// stream; the caller still owns any batch inside it.
    pub fn send(&self, message: Message) -> std::result::Result<(), SendError<Message>> {
        if !self.pending.try_add() {
            return Err(SendError(message));
        }
        self.tx.send(message).map_err(|e| {
            self.pending.sub();
            e
        })
    }

    /// Sends a batch.
    ///
    /// # Errors
    ///
    /// See [`BatchSender::send`].
    pub fn batch(&self, batch: Batch) -> std::result::Result<(), SendError<Message>> {
        self.send(Message::Batch(batch))
    }

    /// Sends the end-of-stream marker.
    ///
    /// # Errors
    ///
    /// See [`BatchSender::send`].
    pub fn finish(&self) -> std::result::Result<(), SendError<Message>> {
        self.send(Message::End)
    }

    /// Reports a producer failure to the consumer.
    ///
    /// # Errors
    ///
    /// See [`BatchSender::send`].
    pub fn fail(&self, error: ExecError) -> std::result::Result<(), SendError<Message>> {
        self.send(Message::Error(error))
    }

    /// Blocks until every sent message has been acknowledged, or the
    /// consumer has gone away.
    pub fn wait(&self) {
        self.pending.wait();
    }

    /// Messages sent but not yet acknowledged.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.outstanding()
    }

    /// Name of the stream.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for BatchSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSender")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Consumer half of a batch stream. There is exactly one per stream.
pub struct BatchReceiver {
    rx: Receiver<Message>,
    pending: Arc<Pending>,
    name: Arc<str>,
}

impl BatchReceiver {
    /// Blocks for the next message.
    ///
    /// # Errors
    ///
    /// Returns `Channel` if every sender hung up without sending
    /// [`Message::End`].
    pub fn recv(&self) -> Result<Message> {
        self.rx.recv().map_err(|_| {
            ExecError::Channel(format!("stream {} closed without end marker", self.name))
        })
    }

    /// Acknowledges the last received message.
    pub fn done(&self) {
        self.pending.sub();
    }

    /// Closes the stream and discards everything still in it.
    ///
    /// Later sends return their message in [`SendError`]. Messages queued or
    /// already in flight are received, their batches released and each one
    /// acknowledged. Every message received before the call must already be
    /// acknowledged. Closing twice is a no-op.
    ///
    /// Returns the number of messages discarded.
    pub fn close(&self, arena: &Arena) -> usize {
        self.pending.close();
        let mut discarded = 0;
        while self.pending.outstanding() > 0 {
            let Ok(message) = self.rx.recv() else {
                break;
            };
            if let Message::Batch(batch) = message {
                batch.release(arena);
            }
            self.done();
            discarded += 1;
        }
        if discarded > 0 {
            trace!(stream = %self.name, discarded, "discarded queued messages");
        }
        discarded
    }

    /// Whether [`BatchReceiver::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pending.state.lock().closed
    }

    /// Name of the stream.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for BatchReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchReceiver")
            .field("name", &self.name)
            .field("queued", &self.rx.len())
            .finish_non_exhaustive()
    }
}

impl Drop for BatchReceiver {
    fn drop(&mut self) {
        self.pending.close();
    }
}

/// Creates a named stream holding at most `capacity` queued messages.
#[must_use]
pub fn channel(name: &str, capacity: usize) -> (BatchSender, BatchReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let pending = Arc::new(Pending::default());
    let name: Arc<str> = Arc::from(name);
    (
        BatchSender {
            tx,
            pending: Arc::clone(&pending),
            name: Arc::clone(&name),
        },
        BatchReceiver { rx, pending, name },
    )
}
