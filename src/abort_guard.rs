use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::{JoinError, JoinHandle};

/// Guard that aborts a task when dropped.
///
/// Awaiting the guard yields the task's output. Once the task has finished
/// the abort on drop is a no-op, so the guard can simply be discarded.
pub(crate) struct AbortGuard<T> {
    handle: JoinHandle<T>,
}

impl<T> AbortGuard<T> {
    /// Create a new guard from a [`JoinHandle`].
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self { handle }
    }
}

impl<T> Future for AbortGuard<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

impl<T> Drop for AbortGuard<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
