//! Task-local record of the frames each store has active.
//!
//! Every task (or synchronous extent) carries an [`ActiveFrames`] map from
//! store id to frame in a `tokio::task_local!`. Entering a frame re-scopes
//! the task-local with a copy of the enclosing map plus the new entry:
//! `sync_scope` for closures and `scope` for futures. Leaving the scope
//! restores the enclosing map, including during unwinding.

use std::collections::HashMap;
use std::future::Future;

use tokio::task::futures::TaskLocalFuture;

use super::frame::FrameRef;

tokio::task_local! {
    static ACTIVE: ActiveFrames;
}

/// Frames active for one task, keyed by store id.
#[derive(Clone, Default)]
pub(crate) struct ActiveFrames(HashMap<u64, FrameRef>);

impl ActiveFrames {
    /// The frames active for the caller, with `frame` entered for `store_id`.
    fn entering(store_id: u64, frame: FrameRef) -> Self {
        let mut frames = ACTIVE.try_with(ActiveFrames::clone).unwrap_or_default();
        frames.0.insert(store_id, frame);
        frames
    }
}

/// Runs `f` with `frame` active for `store_id`.
pub(crate) fn enter<R>(store_id: u64, frame: FrameRef, f: impl FnOnce() -> R) -> R {
    ACTIVE.sync_scope(ActiveFrames::entering(store_id, frame), f)
}

/// Wraps `future` so that every poll runs with `frame` active for
/// `store_id`, along with the frames of other stores active right now.
pub(crate) fn scope<F: Future>(
    store_id: u64,
    frame: FrameRef,
    future: F,
) -> TaskLocalFuture<ActiveFrames, F> {
    ACTIVE.scope(ActiveFrames::entering(store_id, frame), future)
}

/// The frame of `store_id` active for the caller.
pub(crate) fn current(store_id: u64) -> Option<FrameRef> {
    ACTIVE
        .try_with(|frames| frames.0.get(&store_id).cloned())
        .ok()
        .flatten()
}
