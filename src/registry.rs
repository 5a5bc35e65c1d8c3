//! Process-wide registry of context stores and the active-context resolver.
//!
//! A [`Registry`] maps scope names to stores, one store per name, created
//! lazily. One of its stores can be published as the *default*; the
//! resolver [`Registry::current_context`] answers with that store while the
//! calling task runs inside it, and with `None` otherwise.
//!
//! [`Registry::global`] is the process-wide instance behind the free
//! functions [`current_context`], [`create_context`], [`run_in_context`],
//! [`run_in_context_async`] and [`chain`]. It is configured once from the
//! environment (see [`RegistryConfig::from_env`]).
//!
//! Publishing is explicit: once a default exists, asking to publish a
//! different scope follows the configured [`DefaultScopePolicy`] instead of
//! silently overwriting it.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::chain::Chainable;
use crate::config::{DefaultScopePolicy, RegistryConfig};
use crate::domain::ContextDomain;
use crate::error::{ContextError, Result};
use crate::store::ContextStore;

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Scope-name to store table with a published default.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use taskctx::{Context, Registry};
///
/// let registry = Registry::new();
/// let app = registry.create_context("app", &[]).unwrap();
/// assert!(Arc::ptr_eq(&app, &registry.create_context("app", &[]).unwrap()));
///
/// assert!(registry.current_context().is_none());
/// registry.run_in_context(|store, _domain| {
///     store.set("user_id", json!(42)).unwrap();
///     let current = registry.current_context().unwrap();
///     assert_eq!(current.get("user_id"), Some(json!(42)));
/// }, None);
/// ```
pub struct Registry {
    config: RegistryConfig,
    stores: DashMap<String, Arc<ContextStore>>,
    default: RwLock<Option<Arc<ContextStore>>>,
}

impl Registry {
    /// Creates an empty registry with the default configuration.
    pub fn new() -> Self {
        Self::from_valid_config(RegistryConfig::default())
    }

    /// Creates an empty registry with `config`.
    pub fn with_config(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: RegistryConfig) -> Self {
        Self {
            config,
            stores: DashMap::new(),
            default: RwLock::new(None),
        }
    }

    /// The process-wide registry, configured from the environment on first
    /// use. Invalid environment configuration is logged and replaced by the
    /// defaults.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| {
            let config = RegistryConfig::from_env().unwrap_or_else(|err| {
                tracing::warn!(%err, "ignoring invalid context registry configuration");
                RegistryConfig::default()
            });
            Self::from_valid_config(config)
        })
    }

    /// The registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns the store for `name`, creating it if needed. Never publishes.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidScopeName`] for an empty name.
    pub fn namespace(&self, name: &str) -> Result<Arc<ContextStore>> {
        validate_scope_name(name)?;
        Ok(self.intern(name))
    }

    fn intern(&self, name: &str) -> Arc<ContextStore> {
        if let Some(store) = self.stores.get(name) {
            return Arc::clone(store.value());
        }
        let entry = self.stores.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(scope = name, "created context store");
            ContextStore::new(name)
        });
        Arc::clone(entry.value())
    }

    /// The store registered under `name`, without creating it.
    pub fn lookup(&self, name: &str) -> Option<Arc<ContextStore>> {
        self.stores.get(name).map(|store| Arc::clone(store.value()))
    }

    /// Names of all registered scopes, sorted.
    pub fn scope_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns the store for `name`, creating and publishing it as the
    /// default when it does not exist yet.
    ///
    /// A repeat call returns the same store and ignores `chains`. For a new
    /// store, each element of `chains` goes through [`chain`](Self::chain)
    /// in order, so it resolves through the published default. Under
    /// [`DefaultScopePolicy::KeepFirst`] that is the kept default, not the
    /// new store.
    ///
    /// # Errors
    ///
    /// - [`ContextError::InvalidScopeName`] for an empty name.
    /// - [`ContextError::DefaultScopeConflict`] when another scope is
    ///   already the default and the policy is [`DefaultScopePolicy::Reject`].
    pub fn create_context(&self, name: &str, chains: &[&Chainable]) -> Result<Arc<ContextStore>> {
        validate_scope_name(name)?;
        let mut default = self.default.write();

        if let Some(existing) = self.lookup(name) {
            if default.is_none() {
                tracing::debug!(scope = name, "published default context scope");
                *default = Some(Arc::clone(&existing));
            }
            return Ok(existing);
        }

        let publish = match default.as_ref() {
            None => true,
            Some(current) => match self.config.on_conflict {
                DefaultScopePolicy::Reject => {
                    return Err(ContextError::DefaultScopeConflict {
                        current: current.name().to_string(),
                        requested: name.to_string(),
                    });
                }
                DefaultScopePolicy::KeepFirst => {
                    tracing::debug!(
                        scope = name,
                        default = current.name(),
                        "default scope kept; new store must be passed explicitly"
                    );
                    false
                }
                DefaultScopePolicy::Replace => {
                    tracing::warn!(
                        scope = name,
                        replaced = current.name(),
                        "replacing default context scope"
                    );
                    true
                }
            },
        };

        let store = self.intern(name);
        if publish {
            tracing::debug!(scope = name, "published default context scope");
            *default = Some(Arc::clone(&store));
        }
        drop(default);

        for target in chains {
            self.chain(target);
        }
        Ok(store)
    }

    /// The published default store, active or not.
    pub fn default_store(&self) -> Option<Arc<ContextStore>> {
        self.default.read().clone()
    }

    /// The default store if the calling task runs inside it.
    pub fn current_context(&self) -> Option<Arc<ContextStore>> {
        self.default_store().filter(|store| store.is_active())
    }

    /// Rewires `target` so that its context resolves through the default
    /// store. See [`chain`](crate::chain) for the rules.
    pub fn chain(&self, target: &Chainable) {
        target.chain_onto(self.default_store());
    }

    /// Runs `f` with `store` (or the default store) active inside a fresh
    /// isolation boundary.
    ///
    /// With no `store` and nothing published yet, the configured default
    /// scope is created and published. Returns `None` when the boundary
    /// contained a panic raised by `f`.
    pub fn run_in_context<R>(
        &self,
        f: impl FnOnce(&Arc<ContextStore>, &ContextDomain) -> R,
        store: Option<Arc<ContextStore>>,
    ) -> Option<R> {
        let store = store.unwrap_or_else(|| self.default_or_create());
        ContextDomain::new(store).run_in(f)
    }

    /// Async counterpart of [`run_in_context`](Self::run_in_context).
    pub fn run_in_context_async<F, Fut>(
        &self,
        f: F,
        store: Option<Arc<ContextStore>>,
    ) -> impl Future<Output = Option<Fut::Output>>
    where
        F: FnOnce(Arc<ContextStore>, ContextDomain) -> Fut,
        Fut: Future,
    {
        let store = store.unwrap_or_else(|| self.default_or_create());
        ContextDomain::new(store).run_in_async(f)
    }

    fn default_or_create(&self) -> Arc<ContextStore> {
        if let Some(store) = self.default_store() {
            return store;
        }
        let mut default = self.default.write();
        if let Some(store) = default.as_ref() {
            return Arc::clone(store);
        }
        let store = self.intern(&self.config.default_scope);
        tracing::debug!(scope = store.name(), "published default context scope");
        *default = Some(Arc::clone(&store));
        store
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("scopes", &self.scope_names())
            .field(
                "default",
                &self.default.read().as_ref().map(|store| store.name().to_string()),
            )
            .finish()
    }
}

fn validate_scope_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ContextError::InvalidScopeName(name.to_string()));
    }
    Ok(())
}

/// The global default store if the calling task runs inside it.
///
/// Returns `None` before any context has been created.
pub fn current_context() -> Option<Arc<ContextStore>> {
    Registry::global().current_context()
}

/// [`Registry::create_context`] on the global registry.
pub fn create_context(name: &str, chains: &[&Chainable]) -> Result<Arc<ContextStore>> {
    Registry::global().create_context(name, chains)
}

/// [`Registry::run_in_context`] on the global registry.
pub fn run_in_context<R>(
    f: impl FnOnce(&Arc<ContextStore>, &ContextDomain) -> R,
    store: Option<Arc<ContextStore>>,
) -> Option<R> {
    Registry::global().run_in_context(f, store)
}

/// [`Registry::run_in_context_async`] on the global registry.
pub fn run_in_context_async<F, Fut>(
    f: F,
    store: Option<Arc<ContextStore>>,
) -> impl Future<Output = Option<Fut::Output>>
where
    F: FnOnce(Arc<ContextStore>, ContextDomain) -> Fut,
    Fut: Future,
{
    Registry::global().run_in_context_async(f, store)
}

/// [`Registry::chain`] on the global registry.
pub fn chain(target: &Chainable) {
    Registry::global().chain(target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn namespace_is_idempotent() {
        let registry = Registry::new();
        let a = registry.namespace("a").unwrap();
        let again = registry.namespace("a").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert!(registry.default_store().is_none());
        assert_eq!(registry.scope_names(), vec!["a".to_string()]);
    }

    #[test]
    fn empty_names_are_rejected() {
        let registry = Registry::new();
        assert!(matches!(
            registry.namespace(""),
            Err(ContextError::InvalidScopeName(_))
        ));
        assert!(registry.create_context("  ", &[]).is_err());
    }

    #[test]
    fn lookup_does_not_create() {
        let registry = Registry::new();
        assert!(registry.lookup("ghost").is_none());
        assert!(registry.scope_names().is_empty());
    }

    #[test]
    fn create_context_publishes_first_scope() {
        let registry = Registry::new();
        let app = registry.create_context("app", &[]).unwrap();
        let published = registry.default_store().unwrap();
        assert!(Arc::ptr_eq(&app, &published));
    }

    #[test]
    fn create_context_publishes_existing_namespace_when_nothing_is_published() {
        let registry = Registry::new();
        let ns = registry.namespace("early").unwrap();
        let created = registry.create_context("early", &[]).unwrap();
        assert!(Arc::ptr_eq(&ns, &created));
        assert_eq!(registry.default_store().map(|s| s.name().to_string()), Some("early".into()));
    }

    #[test]
    fn reject_policy_refuses_second_default() {
        let registry = Registry::new();
        registry.create_context("app", &[]).unwrap();
        let err = registry.create_context("other", &[]).unwrap_err();
        assert!(matches!(
            err,
            ContextError::DefaultScopeConflict { ref current, ref requested }
                if current == "app" && requested == "other"
        ));
        assert!(registry.lookup("other").is_none());
    }

    #[test]
    fn keep_first_policy_creates_without_publishing() {
        let registry = Registry::with_config(
            RegistryConfig::new().with_conflict_policy(DefaultScopePolicy::KeepFirst),
        )
        .unwrap();
        let app = registry.create_context("app", &[]).unwrap();
        let other = registry.create_context("other", &[]).unwrap();
        assert_eq!(other.name(), "other");
        assert!(Arc::ptr_eq(&registry.default_store().unwrap(), &app));
    }

    #[test]
    fn keep_first_chains_onto_the_published_default() {
        let registry = Registry::with_config(
            RegistryConfig::new().with_conflict_policy(DefaultScopePolicy::KeepFirst),
        )
        .unwrap();
        let app = registry.create_context("app", &[]).unwrap();
        let late = Chainable::new("late");
        let other = registry.create_context("other", &[&late]).unwrap();

        other.run(|| assert!(late.current_context().is_none()));
        app.run(|| {
            app.set("k", json!("app")).unwrap();
            assert_eq!(late.current_context().unwrap().get("k"), Some(json!("app")));
        });
    }

    #[test]
    fn replace_policy_overwrites_default() {
        let registry = Registry::with_config(
            RegistryConfig::new().with_conflict_policy(DefaultScopePolicy::Replace),
        )
        .unwrap();
        registry.create_context("app", &[]).unwrap();
        let other = registry.create_context("other", &[]).unwrap();
        assert!(Arc::ptr_eq(&registry.default_store().unwrap(), &other));
    }

    #[test]
    fn repeat_create_ignores_chains() {
        let registry = Registry::new();
        registry.create_context("app", &[]).unwrap();
        let late = Chainable::new("late");
        registry.create_context("app", &[&late]).unwrap();
        assert!(!late.has_capability());
    }

    #[test]
    fn create_context_chains_each_target() {
        let registry = Registry::new();
        let first = Chainable::new("first");
        let second = Chainable::new("second");
        let app = registry.create_context("app", &[&first, &second]).unwrap();

        assert!(first.current_context().is_none());
        app.run(|| {
            first.current_context().unwrap().set("k", json!(1)).unwrap();
            assert_eq!(second.current_context().unwrap().get("k"), Some(json!(1)));
        });
    }

    #[test]
    fn resolver_only_answers_inside_the_default_store() {
        let registry = Registry::new();
        assert!(registry.current_context().is_none());

        let app = registry.create_context("app", &[]).unwrap();
        assert!(registry.current_context().is_none());
        app.run(|| {
            let current = registry.current_context().unwrap();
            assert!(Arc::ptr_eq(&current, &app));
        });
        assert!(registry.current_context().is_none());
    }

    #[test]
    fn run_in_context_creates_configured_default() {
        let registry = Registry::with_config(RegistryConfig::new().with_default_scope("fallback"))
            .unwrap();
        let name = registry.run_in_context(|store, _| store.name().to_string(), None);
        assert_eq!(name.as_deref(), Some("fallback"));
        assert_eq!(registry.default_store().unwrap().name(), "fallback");
    }

    #[test]
    fn run_in_context_uses_explicit_store() {
        let registry = Registry::new();
        registry.create_context("app", &[]).unwrap();
        let side = registry.namespace("side").unwrap();
        let active = registry.run_in_context(
            |store, _| (store.name().to_string(), registry.current_context().is_some()),
            Some(side),
        );
        assert_eq!(active, Some(("side".to_string(), false)));
    }

    #[test]
    fn debug_lists_scopes() {
        let registry = Registry::new();
        registry.create_context("app", &[]).unwrap();
        let debug = format!("{registry:?}");
        assert!(debug.contains("app"));
    }
}
