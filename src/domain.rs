//! Running code inside a context store and an isolation boundary at once.
//!
//! A [`ContextDomain`] pairs a store with a fresh [`Boundary`]. Every
//! callback it binds is wrapped twice, in a fixed order:
//!
//! ```text
//! wrap(cb) = boundary_wrap(store_wrap(cb))
//! ```
//!
//! The store wrapper runs the callback against the values captured at bind
//! time; the boundary wrapper contains panics and errors. The boundary is
//! also given the capture, so its error handlers run with the failing
//! callback's context active.

use std::future::Future;
use std::sync::Arc;

use crate::boundary::{Boundary, Guarded, ReenterScope};
use crate::error::BoundaryError;
use crate::store::{ContextStore, Scoped};

/// A store and an isolation boundary composed into one handle.
///
/// Handed to the function run by
/// [`Registry::run_in_context`](crate::registry::Registry::run_in_context).
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use taskctx::{Context, ContextDomain, Registry};
///
/// let registry = Registry::new();
/// let store = registry.namespace("jobs").unwrap();
/// let domain = ContextDomain::new(store.clone());
///
/// let later = domain
///     .run_in(|store, domain| {
///         store.set("job", json!("nightly")).unwrap();
///         let reader = store.clone();
///         domain.bind(move || reader.get("job"))
///     })
///     .unwrap();
///
/// assert_eq!(later(), Some(Some(json!("nightly"))));
/// ```
#[derive(Clone, Debug)]
pub struct ContextDomain {
    store: Arc<ContextStore>,
    boundary: Arc<Boundary>,
}

impl ContextDomain {
    /// Pairs `store` with a new boundary.
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self::with_boundary(store, Boundary::new())
    }

    /// Pairs `store` with an existing boundary, for example one whose error
    /// handlers are already registered.
    pub fn with_boundary(store: Arc<ContextStore>, boundary: Arc<Boundary>) -> Self {
        Self { store, boundary }
    }

    /// The store.
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// The isolation boundary.
    pub fn boundary(&self) -> &Arc<Boundary> {
        &self.boundary
    }

    /// Registers an error handler on the boundary.
    pub fn on_error<H>(&self, handler: H)
    where
        H: Fn(&BoundaryError) + Send + Sync + 'static,
    {
        self.boundary.on_error(handler);
    }

    /// Runs `f` inside the boundary and a new frame of the store.
    ///
    /// Returns `None` when the boundary contained a panic raised by `f`.
    pub fn run_in<R>(
        &self,
        f: impl FnOnce(&Arc<ContextStore>, &ContextDomain) -> R,
    ) -> Option<R> {
        self.boundary.run(|| self.store.run(|| f(&self.store, self)))
    }

    /// Async counterpart of [`run_in`](Self::run_in). The frame is forked
    /// when this is called; `f` runs on first poll.
    pub fn run_in_async<F, Fut>(&self, f: F) -> impl Future<Output = Option<Fut::Output>>
    where
        F: FnOnce(Arc<ContextStore>, ContextDomain) -> Fut,
        Fut: Future,
    {
        let store = Arc::clone(&self.store);
        let domain = self.clone();
        let body = async move { f(store, domain).await };
        self.boundary.run_future(self.store.scope(body))
    }

    /// Wraps `callback` so that, whenever it runs, the values visible now
    /// are active and failures are contained by the boundary.
    pub fn bind<F, R>(&self, callback: F) -> impl FnOnce() -> Option<R>
    where
        F: FnOnce() -> R,
    {
        let captured = self.store.capture();
        let inner = captured.clone().wrap(callback);
        let boundary = Arc::clone(&self.boundary);
        move || boundary.guard(Some(&captured as &dyn ReenterScope), inner)
    }

    /// Like [`bind`](Self::bind) for reusable callbacks taking an argument.
    pub fn bind_fn<A, R, F>(&self, callback: F) -> impl Fn(A) -> Option<R>
    where
        F: Fn(A) -> R,
    {
        let captured = self.store.capture();
        let inner = captured.clone().wrap_fn(callback);
        let boundary = Arc::clone(&self.boundary);
        move |arg| boundary.guard(Some(&captured as &dyn ReenterScope), || inner(arg))
    }

    /// Like [`bind`](Self::bind) for callbacks returning `Result`; an `Err`
    /// is contained like a panic.
    pub fn bind_fallible<F, R, E>(&self, callback: F) -> impl FnOnce() -> Option<R>
    where
        F: FnOnce() -> Result<R, E>,
        E: Into<anyhow::Error>,
    {
        let captured = self.store.capture();
        let inner = captured.clone().wrap(callback);
        let boundary = Arc::clone(&self.boundary);
        move || boundary.guard_fallible(Some(&captured as &dyn ReenterScope), inner)
    }

    /// Wraps `future` so that every poll runs against the values visible
    /// now, inside the boundary.
    pub fn bind_future<F: Future>(&self, future: F) -> Guarded<Scoped<F>> {
        let captured = self.store.capture();
        let scope: Arc<dyn ReenterScope> = Arc::new(captured.clone());
        self.boundary.guard_future(Some(scope), captured.wrap_future(future))
    }

    /// Like [`bind_future`](Self::bind_future) for futures resolving to
    /// `Result`; an `Err` is contained like a panic.
    pub fn bind_future_fallible<F, R, E>(&self, future: F) -> impl Future<Output = Option<R>>
    where
        F: Future<Output = Result<R, E>>,
        E: Into<anyhow::Error>,
    {
        let captured = self.store.capture();
        let scope: Arc<dyn ReenterScope> = Arc::new(captured.clone());
        self.boundary
            .guard_future_fallible(Some(scope), captured.wrap_future(future))
    }

    /// Spawns `future` on the tokio runtime, bound to the values visible now
    /// and contained by the boundary.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(self.bind_future(future))
    }
}
