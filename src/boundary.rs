//! Isolation boundaries: error containment for blocks of async work.
//!
//! A [`Boundary`] runs closures and futures, catching panics and `Err`
//! results and handing them to its registered error handlers as a
//! [`BoundaryError`]. Callbacks wrapped with [`Boundary::bind`] are
//! contained the same way whenever they eventually run.
//!
//! A boundary knows nothing about context stores. Callers that want the
//! failing callback's context to be visible inside the error handlers pass a
//! [`ReenterScope`]; the handlers then run inside that scope.
//!
//! An error raised inside a boundary with no handlers is not swallowed: a
//! panic resumes unwinding and a failure panics with its message.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use parking_lot::RwLock;

use crate::error::BoundaryError;

static NEXT_BOUNDARY_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT: Arc<Boundary>;
}

/// Something that can run a closure "inside" itself, such as a captured
/// store frame.
pub trait ReenterScope: Send + Sync {
    /// Runs `f` with this scope active.
    fn reenter(&self, f: &mut dyn FnMut());
}

/// Callback invoked with every error a boundary contains.
pub type ErrorHandler = Arc<dyn Fn(&BoundaryError) + Send + Sync>;

/// A unit of error containment.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use taskctx::Boundary;
///
/// let boundary = Boundary::new();
/// let seen = Arc::new(AtomicBool::new(false));
/// let flag = seen.clone();
/// boundary.on_error(move |err| {
///     assert!(err.is_panic());
///     flag.store(true, Ordering::SeqCst);
/// });
///
/// let result: Option<()> = boundary.run(|| panic!("contained"));
/// assert!(result.is_none());
/// assert!(seen.load(Ordering::SeqCst));
/// ```
pub struct Boundary {
    id: u64,
    handlers: RwLock<Vec<ErrorHandler>>,
    caught: AtomicU64,
}

impl Boundary {
    /// Creates a boundary with no error handlers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_BOUNDARY_ID.fetch_add(1, Ordering::Relaxed),
            handlers: RwLock::new(Vec::new()),
            caught: AtomicU64::new(0),
        })
    }

    /// Unique boundary id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The innermost boundary the caller runs inside.
    pub fn current() -> Option<Arc<Boundary>> {
        CURRENT.try_with(Arc::clone).ok()
    }

    /// Registers an error handler.
    pub fn on_error<H>(&self, handler: H)
    where
        H: Fn(&BoundaryError) + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Returns `true` if at least one error handler is registered.
    pub fn has_handlers(&self) -> bool {
        !self.handlers.read().is_empty()
    }

    /// Number of errors contained so far.
    pub fn errors_caught(&self) -> u64 {
        self.caught.load(Ordering::Relaxed)
    }

    /// Runs `f` inside the boundary. Returns `None` if it panicked.
    pub fn run<R>(self: &Arc<Self>, f: impl FnOnce() -> R) -> Option<R> {
        self.guard(None, f)
    }

    /// Runs a fallible `f` inside the boundary. Returns `None` if it panicked
    /// or returned an error.
    pub fn run_fallible<R, E>(self: &Arc<Self>, f: impl FnOnce() -> Result<R, E>) -> Option<R>
    where
        E: Into<anyhow::Error>,
    {
        self.guard_fallible(None, f)
    }

    /// Wraps `callback` so that it runs inside this boundary when invoked.
    pub fn bind<F, R>(self: &Arc<Self>, callback: F) -> impl FnOnce() -> Option<R>
    where
        F: FnOnce() -> R,
    {
        let boundary = Arc::clone(self);
        move || boundary.run(callback)
    }

    /// Polls `future` inside this boundary.
    pub fn run_future<F: Future>(self: &Arc<Self>, future: F) -> Guarded<F> {
        Guarded::new(Arc::clone(self), None, future)
    }

    /// Polls a fallible `future` inside this boundary, containing both
    /// panics and errors.
    pub fn run_future_fallible<F, R, E>(
        self: &Arc<Self>,
        future: F,
    ) -> impl Future<Output = Option<R>>
    where
        F: Future<Output = Result<R, E>>,
        E: Into<anyhow::Error>,
    {
        self.guard_future_fallible(None, future)
    }

    pub(crate) fn guard<R>(
        self: &Arc<Self>,
        scope: Option<&dyn ReenterScope>,
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        let outcome = CURRENT.sync_scope(Arc::clone(self), || {
            panic::catch_unwind(AssertUnwindSafe(f))
        });
        match outcome {
            Ok(value) => Some(value),
            Err(payload) => {
                self.contain(BoundaryError::from_panic(&*payload), scope, Some(payload));
                None
            }
        }
    }

    pub(crate) fn guard_fallible<R, E>(
        self: &Arc<Self>,
        scope: Option<&dyn ReenterScope>,
        f: impl FnOnce() -> Result<R, E>,
    ) -> Option<R>
    where
        E: Into<anyhow::Error>,
    {
        match self.guard(scope, f)? {
            Ok(value) => Some(value),
            Err(err) => {
                self.contain(BoundaryError::Failed { error: err.into() }, scope, None);
                None
            }
        }
    }

    pub(crate) fn guard_future<F: Future>(
        self: &Arc<Self>,
        scope: Option<Arc<dyn ReenterScope>>,
        future: F,
    ) -> Guarded<F> {
        Guarded::new(Arc::clone(self), scope, future)
    }

    pub(crate) fn guard_future_fallible<F, R, E>(
        self: &Arc<Self>,
        scope: Option<Arc<dyn ReenterScope>>,
        future: F,
    ) -> impl Future<Output = Option<R>>
    where
        F: Future<Output = Result<R, E>>,
        E: Into<anyhow::Error>,
    {
        let boundary = Arc::clone(self);
        let guarded = Guarded::new(Arc::clone(self), scope.clone(), future);
        async move {
            match guarded.await? {
                Ok(value) => Some(value),
                Err(err) => {
                    boundary.contain(
                        BoundaryError::Failed { error: err.into() },
                        scope.as_deref(),
                        None,
                    );
                    None
                }
            }
        }
    }

    fn contain(
        self: &Arc<Self>,
        error: BoundaryError,
        scope: Option<&dyn ReenterScope>,
        payload: Option<Box<dyn Any + Send>>,
    ) {
        let handlers = self.handlers.read().clone();
        if handlers.is_empty() {
            match payload {
                Some(payload) => panic::resume_unwind(payload),
                None => panic!("unhandled error in isolation boundary {}: {error}", self.id),
            }
        }

        self.caught.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(boundary = self.id, %error, "dispatching contained error");

        let mut dispatch = || {
            for handler in &handlers {
                handler(&error);
            }
        };
        CURRENT.sync_scope(Arc::clone(self), || match scope {
            Some(scope) => scope.reenter(&mut dispatch),
            None => dispatch(),
        });
    }
}

impl fmt::Debug for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Boundary")
            .field("id", &self.id)
            .field("handlers", &self.handlers.read().len())
            .field("caught", &self.errors_caught())
            .finish()
    }
}

/// A future polled inside a boundary.
///
/// Resolves to `Some(output)`, or to `None` when a poll panicked and the
/// panic was handed to the boundary's error handlers.
#[must_use = "futures do nothing unless polled"]
pub struct Guarded<F> {
    boundary: Arc<Boundary>,
    scope: Option<Arc<dyn ReenterScope>>,
    inner: Option<Pin<Box<F>>>,
}

impl<F> Guarded<F> {
    fn new(boundary: Arc<Boundary>, scope: Option<Arc<dyn ReenterScope>>, future: F) -> Self {
        Self {
            boundary,
            scope,
            inner: Some(Box::pin(future)),
        }
    }
}

impl<F: Future> Future for Guarded<F> {
    type Output = Option<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        let outcome = CURRENT.sync_scope(Arc::clone(&this.boundary), || {
            panic::catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx)))
        });
        match outcome {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(value)) => {
                this.inner = None;
                Poll::Ready(Some(value))
            }
            Err(payload) => {
                this.inner = None;
                this.boundary.contain(
                    BoundaryError::from_panic(&*payload),
                    this.scope.as_deref(),
                    Some(payload),
                );
                Poll::Ready(None)
            }
        }
    }
}

impl<F> fmt::Debug for Guarded<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guarded")
            .field("boundary", &self.boundary.id)
            .field("done", &self.inner.is_none())
            .finish()
    }
}
