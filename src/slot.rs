use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::{GenerationError, SessionError};
use crate::session::GenerationChunk;

#[derive(Default)]
struct SlotState {
    pending: Option<GenerationChunk>,
    /// A final chunk has been accepted; later offers are ignored.
    finished: bool,
    /// The producer is gone and the engine has returned.
    closed: bool,
    /// The consumer walked away; later offers are ignored.
    cancelled: bool,
    /// The consumer has taken the final chunk.
    final_taken: bool,
    failure: Option<GenerationError>,
    /// Terminal error or truncation already handed to the consumer.
    reported: bool,
    dropped: usize,
}

/// Single-slot hand-off between an engine listener and one consumer.
///
/// Holds at most one unconsumed chunk. A newer intermediate chunk replaces
/// the pending one. A final chunk is never replaced and is always handed
/// to the consumer before the slot reports the end of the request. The end
/// itself is only reported once the producer has closed the slot.
pub(crate) struct ChunkSlot {
    state: Mutex<SlotState>,
    notify: Notify,
}

impl ChunkSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a chunk from the producer side. Returns `false` when ignored.
    pub fn offer(&self, chunk: GenerationChunk) -> bool {
        {
            let mut state = self.lock();
            if state.finished || state.closed || state.cancelled {
                return false;
            }
            state.finished = chunk.is_final;
            if state.pending.replace(chunk).is_some() {
                state.dropped += 1;
            }
        }
        self.notify.notify_one();
        true
    }

    /// Mark the producer as gone, recording why if it failed.
    pub fn close(&self, failure: Option<GenerationError>) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            if !state.finished {
                state.failure = failure;
            }
        }
        self.notify.notify_one();
    }

    /// Stop delivery from the consumer side. The pending chunk is discarded
    /// and later offers are ignored; the producer still closes the slot.
    pub fn cancel(&self) {
        {
            let mut state = self.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.pending = None;
        }
        self.notify.notify_one();
    }

    /// Wait for the next item. `None` once the producer has closed the slot
    /// and everything has been handed over.
    ///
    /// A request that ends without its final chunk reaching the consumer
    /// yields one error: [`SessionError::Cancelled`] after a cancel, otherwise
    /// the engine failure or [`SessionError::Truncated`].
    pub async fn take(&self) -> Option<Result<GenerationChunk, SessionError>> {
        loop {
            {
                let mut state = self.lock();
                if let Some(chunk) = state.pending.take() {
                    state.final_taken = chunk.is_final;
                    return Some(Ok(chunk));
                }
                if state.closed {
                    if state.reported || state.final_taken {
                        return None;
                    }
                    state.reported = true;
                    let err = if state.cancelled {
                        SessionError::Cancelled
                    } else {
                        match state.failure.take() {
                            Some(failure) => SessionError::Generation(failure),
                            None => SessionError::Truncated,
                        }
                    };
                    return Some(Err(err));
                }
            }
            self.notify.notified().await;
        }
    }

    /// Intermediate chunks replaced before the consumer saw them.
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }
}
