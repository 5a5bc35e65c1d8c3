//! Layered contexts built from independent providers.
//!
//! A [`ChainedContext`] composes a child and a parent context: reads try the
//! child first and fall back to the parent on a miss, writes always land in
//! the child, or in the parent when there is no child.
//!
//! Components that keep their own context (a request logger, a tenant
//! resolver, a third-party library) are represented by a [`Chainable`].
//! Chaining it through the [`Registry`](crate::registry::Registry) rewires
//! its accessor so that it resolves through the registry's default store:
//!
//! - a chainable backed by a [`ContextProvider`] gets a fixed
//!   `ChainedContext(provider context, default store)`, composed once at
//!   chain time;
//! - a chainable without a provider is aliased to the registry's resolver.
//!
//! The child side is resolved once, when chaining happens, and is not
//! re-resolved per lookup.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::context::{Context, SharedContext};
use crate::error::{ContextError, Result};
use crate::store::ContextStore;

/// Read-fallback, write-biased composition of two contexts.
///
/// Neither side is owned in any lifecycle sense: both are shared handles
/// that must already exist.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use taskctx::{ChainedContext, Context, Registry};
///
/// let registry = Registry::new();
/// let parent = registry.namespace("parent").unwrap();
/// let child = registry.namespace("child").unwrap();
/// let chained = ChainedContext::new(Some(child.clone()), Some(parent.clone()));
///
/// parent.run(|| child.run(|| {
///     parent.set("k", json!(1)).unwrap();
///     assert_eq!(chained.get("k"), Some(json!(1)));
///
///     chained.set("k", json!(2)).unwrap();
///     assert_eq!(chained.get("k"), Some(json!(2)));
///     assert_eq!(parent.get("k"), Some(json!(1)));
/// }));
/// ```
#[derive(Clone)]
pub struct ChainedContext {
    child: Option<SharedContext>,
    parent: Option<SharedContext>,
}

impl ChainedContext {
    /// Composes `child` over `parent`.
    pub fn new<C, P>(child: Option<Arc<C>>, parent: Option<Arc<P>>) -> Self
    where
        C: Context + 'static,
        P: Context + 'static,
    {
        Self {
            child: child.map(|c| c as SharedContext),
            parent: parent.map(|p| p as SharedContext),
        }
    }

    /// Composes two type-erased contexts.
    pub fn from_shared(child: Option<SharedContext>, parent: Option<SharedContext>) -> Self {
        Self { child, parent }
    }

    /// The child layer.
    pub fn child(&self) -> Option<&SharedContext> {
        self.child.as_ref()
    }

    /// The parent layer.
    pub fn parent(&self) -> Option<&SharedContext> {
        self.parent.as_ref()
    }

    fn write_target(&self) -> Result<&SharedContext> {
        self.child
            .as_ref()
            .or(self.parent.as_ref())
            .ok_or(ContextError::Unbound)
    }
}

impl Context for ChainedContext {
    fn get(&self, key: &str) -> Option<Value> {
        self.child
            .as_ref()
            .and_then(|child| child.get(key))
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.get(key)))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.write_target()?.set(key, value)
    }

    fn reset(&self, key: &str, value: Value) -> Result<()> {
        self.write_target()?.reset(key, value)
    }
}

impl fmt::Debug for ChainedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedContext")
            .field("child", &self.child)
            .field("parent", &self.parent)
            .finish()
    }
}

/// A component that can report its own current context.
pub trait ContextProvider: Send + Sync {
    /// The context active for the calling task, if any.
    fn current_context(&self) -> Option<SharedContext>;
}

/// A store is a provider of itself while one of its frames is active.
impl ContextProvider for Arc<ContextStore> {
    fn current_context(&self) -> Option<SharedContext> {
        self.is_active().then(|| Arc::clone(self) as SharedContext)
    }
}

/// How a [`Chainable`] answers `current_context`.
#[derive(Clone)]
enum Accessor {
    /// No context capability.
    Absent,
    /// The component's own provider.
    Provider(Arc<dyn ContextProvider>),
    /// A context composed at chain time.
    Composed(SharedContext),
    /// Alias of a registry resolver: the store when active, else nothing.
    Resolver(Option<Arc<ContextStore>>),
}

impl Accessor {
    fn resolve(&self) -> Option<SharedContext> {
        match self {
            Self::Absent => None,
            Self::Provider(provider) => provider.current_context(),
            Self::Composed(context) => Some(Arc::clone(context)),
            Self::Resolver(store) => store
                .as_ref()
                .filter(|store| store.is_active())
                .map(|store| Arc::clone(store) as SharedContext),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Provider(_) => "provider",
            Self::Composed(_) => "composed",
            Self::Resolver(_) => "resolver",
        }
    }
}

/// A component whose context accessor can be rewired by chaining.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use taskctx::{Chainable, Context, Registry};
///
/// let registry = Registry::new();
/// let app = registry.create_context("app", &[]).unwrap();
/// let logger_store = registry.namespace("logger").unwrap();
///
/// let logger = Chainable::with_provider("logger", Arc::new(logger_store.clone()));
/// logger_store.run(|| registry.chain(&logger));
///
/// app.run(|| {
///     app.set("request_id", json!("r-1")).unwrap();
///     let ctx = logger.current_context().unwrap();
///     assert_eq!(ctx.get("request_id"), Some(json!("r-1")));
/// });
/// ```
pub struct Chainable {
    name: String,
    accessor: RwLock<Accessor>,
}

impl Chainable {
    /// A component with no context capability of its own.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accessor: RwLock::new(Accessor::Absent),
        }
    }

    /// A component exposing its own context through `provider`.
    pub fn with_provider(name: impl Into<String>, provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            name: name.into(),
            accessor: RwLock::new(Accessor::Provider(provider)),
        }
    }

    /// The component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the component can report a context.
    pub fn has_capability(&self) -> bool {
        !matches!(*self.accessor.read(), Accessor::Absent)
    }

    /// Returns `true` once the accessor holds a composed context.
    pub fn is_composed(&self) -> bool {
        matches!(*self.accessor.read(), Accessor::Composed(_))
    }

    /// The component's current context.
    pub fn current_context(&self) -> Option<SharedContext> {
        self.accessor.read().resolve()
    }

    /// Rewires the accessor against `parent`, the registry's default store.
    pub(crate) fn chain_onto(&self, parent: Option<Arc<ContextStore>>) {
        let mut accessor = self.accessor.write();
        let next = match &*accessor {
            Accessor::Absent => Accessor::Resolver(parent),
            current => {
                let child = current.resolve();
                let parent = parent.map(|store| store as SharedContext);
                Accessor::Composed(Arc::new(ChainedContext::from_shared(child, parent)))
            }
        };
        tracing::debug!(
            component = %self.name,
            from = accessor.kind(),
            to = next.kind(),
            "chained context accessor"
        );
        *accessor = next;
    }
}

impl ContextProvider for Chainable {
    fn current_context(&self) -> Option<SharedContext> {
        Chainable::current_context(self)
    }
}

impl fmt::Debug for Chainable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chainable")
            .field("name", &self.name)
            .field("accessor", &self.accessor.read().kind())
            .finish()
    }
}
