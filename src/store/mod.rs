//! Named context stores.
//!
//! A [`ContextStore`] is a named key-value bag whose values are partitioned
//! per task. Code sees the partition (a [`Frame`]) of whatever `run`,
//! `scope` or bound callback it is executing inside, and nothing when it is
//! outside all of them.
//!
//! # Entering a store
//!
//! - [`run`](ContextStore::run) forks a new frame from the active one and
//!   runs a closure in it.
//! - [`scope`](ContextStore::scope) does the same for a future; the frame is
//!   re-entered on every poll.
//! - [`bind`](ContextStore::bind), [`bind_fn`](ContextStore::bind_fn) and
//!   [`bind_future`](ContextStore::bind_future) capture the values visible at
//!   registration time. Each invocation runs in a fresh frame forked from
//!   that capture, however late and from whatever call stack, so later
//!   writes by the registering task or by other callbacks never leak in.
//!
//! The active frames live in a `tokio::task_local!`, scoped with
//! `sync_scope` for closures and `scope` for futures.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use taskctx::{Context, Registry};
//!
//! let registry = Registry::new();
//! let store = registry.namespace("requests").unwrap();
//!
//! let callback = store.run(|| {
//!     store.set("user_id", json!(42)).unwrap();
//!     let reader = store.clone();
//!     store.bind(move || reader.get("user_id"))
//! });
//!
//! // Outside of any frame the value is not visible...
//! assert_eq!(store.get("user_id"), None);
//! // ...but the bound callback sees the values captured when it was bound.
//! assert_eq!(callback(), Some(json!(42)));
//! ```

pub(crate) mod active;
pub mod frame;
pub mod scoped;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::boundary::ReenterScope;
use crate::context::Context;
use crate::error::{ContextError, Result};

pub use frame::{Frame, FrameRef};
pub use scoped::Scoped;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// A named store with task-local partitions.
///
/// Stores are created through a [`Registry`](crate::registry::Registry),
/// which guarantees one store per scope name, and are always handled as
/// `Arc<ContextStore>`.
pub struct ContextStore {
    id: u64,
    name: Arc<str>,
}

impl ContextStore {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
        })
    }

    /// The scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` if the calling code runs inside a frame of this store.
    pub fn is_active(&self) -> bool {
        active::current(self.id).is_some()
    }

    /// The frame the calling code runs inside, if any.
    pub fn active_frame(&self) -> Option<FrameRef> {
        active::current(self.id)
    }

    /// Length of the active frame's parent chain, `0` outside the store.
    pub fn nesting_depth(&self) -> usize {
        self.active_frame().map_or(0, |frame| frame.depth() + 1)
    }

    /// Runs `f` in a new frame forked from the active one.
    ///
    /// Writes made by `f` stay in the new frame; values of the enclosing
    /// frame remain readable.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let frame = Frame::fork(self.active_frame());
        self.enter(&frame, f)
    }

    /// Runs `future` in a new frame forked from the one active now.
    pub fn scope<F: Future>(self: &Arc<Self>, future: F) -> Scoped<F> {
        let frame = Frame::fork(self.active_frame());
        Scoped::new(Arc::clone(self), frame, future)
    }

    /// Runs `f` with `frame` active.
    pub fn enter<R>(&self, frame: &FrameRef, f: impl FnOnce() -> R) -> R {
        active::enter(self.id, Arc::clone(frame), f)
    }

    /// Freezes the values visible right now (none outside the store).
    pub fn capture(self: &Arc<Self>) -> CapturedFrame {
        let values = self.snapshot().unwrap_or_default();
        let frame = Frame::frozen(values);
        CapturedFrame {
            store: Arc::clone(self),
            frame,
        }
    }

    /// Wraps `callback` so that it runs against the values visible right
    /// now.
    pub fn bind<F, R>(self: &Arc<Self>, callback: F) -> impl FnOnce() -> R
    where
        F: FnOnce() -> R,
    {
        self.capture().wrap(callback)
    }

    /// Like [`bind`](Self::bind) for callbacks invoked many times with an
    /// argument, such as event handlers.
    pub fn bind_fn<A, R, F>(self: &Arc<Self>, callback: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        self.capture().wrap_fn(callback)
    }

    /// Wraps `future` so that it runs against the values visible right now.
    pub fn bind_future<F: Future>(self: &Arc<Self>, future: F) -> Scoped<F> {
        self.capture().wrap_future(future)
    }

    /// All values visible in the active frame, or `None` outside the store.
    pub fn snapshot(&self) -> Option<HashMap<String, Value>> {
        self.active_frame().map(|frame| frame.snapshot())
    }

    fn require_frame(&self) -> Result<FrameRef> {
        self.active_frame().ok_or_else(|| ContextError::Inactive {
            scope: self.name.to_string(),
        })
    }
}

impl Context for ContextStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.active_frame().and_then(|frame| frame.lookup(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.require_frame()?.insert(key, value);
        Ok(())
    }

    fn reset(&self, key: &str, value: Value) -> Result<()> {
        self.require_frame()?.replace(key, value);
        Ok(())
    }
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// The values of a store captured at registration time.
///
/// Produced by [`ContextStore::capture`]. Every [`enter`](Self::enter) runs
/// in a new frame forked from the frozen capture, so two invocations never
/// see each other's writes. Used to wrap callbacks and to re-establish the
/// context later, for example while an isolation boundary reports an error
/// raised by one of those callbacks.
#[derive(Clone)]
pub struct CapturedFrame {
    store: Arc<ContextStore>,
    frame: FrameRef,
}

impl CapturedFrame {
    /// The store the frame belongs to.
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// The frozen frame holding the captured values.
    pub fn frame(&self) -> &FrameRef {
        &self.frame
    }

    /// Reads `key` from the capture without entering it.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.frame.lookup(key)
    }

    /// Runs `f` in a fresh frame forked from the capture.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let invocation = Frame::fork(Some(Arc::clone(&self.frame)));
        self.store.enter(&invocation, f)
    }

    /// Turns `callback` into one that runs against the capture.
    pub fn wrap<F, R>(self, callback: F) -> impl FnOnce() -> R
    where
        F: FnOnce() -> R,
    {
        move || self.enter(callback)
    }

    /// Turns a reusable `callback` into one that runs against the capture,
    /// in a fresh frame per call.
    pub fn wrap_fn<A, R, F>(self, callback: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        move |arg| self.enter(|| callback(arg))
    }

    /// Turns `future` into one polled in a fresh frame forked from the
    /// capture.
    pub fn wrap_future<F: Future>(self, future: F) -> Scoped<F> {
        let invocation = Frame::fork(Some(self.frame));
        Scoped::new(self.store, invocation, future)
    }
}

impl ReenterScope for CapturedFrame {
    fn reenter(&self, f: &mut dyn FnMut()) {
        self.enter(f)
    }
}

impl fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("scope", &self.store.name())
            .field("frame", &self.frame.id())
            .finish()
    }
}
