//! Futures that carry a store frame across suspension points.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use tokio::task::futures::TaskLocalFuture;

use super::active::{self, ActiveFrames};
use super::frame::FrameRef;
use super::ContextStore;

/// A future that runs inside a fixed frame of a store.
///
/// Built on a tokio task-local scope: the frame is active on every poll of
/// the inner future, whichever worker thread polls it, and never leaks into
/// other tasks polled on the same thread.
#[must_use = "futures do nothing unless polled"]
pub struct Scoped<F> {
    store: Arc<ContextStore>,
    frame: FrameRef,
    inner: Pin<Box<TaskLocalFuture<ActiveFrames, F>>>,
}

impl<F: Future> Scoped<F> {
    pub(crate) fn new(store: Arc<ContextStore>, frame: FrameRef, inner: F) -> Self {
        let inner = Box::pin(active::scope(store.id(), frame.clone(), inner));
        Self {
            store,
            frame,
            inner,
        }
    }
}

impl<F> Scoped<F> {
    /// The frame this future runs in.
    pub fn frame(&self) -> &FrameRef {
        &self.frame
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

impl<F> fmt::Debug for Scoped<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoped")
            .field("scope", &self.store.name())
            .field("frame", &self.frame.id())
            .finish()
    }
}
