//! Implicit context propagation across async call chains.
//!
//! A value stored in a context before an asynchronous operation begins stays
//! visible to every callback, continuation and nested step that descends from
//! it, without threading it through function signatures.
//!
//! # Overview
//!
//! - A [`ContextStore`] is a named key-value bag partitioned per task. Code
//!   sees the partition of the `run`, `scope` or bound callback it executes
//!   inside.
//! - A [`Registry`] guarantees one store per scope name and publishes one of
//!   them as the default that [`current_context`] resolves to.
//! - [`run_in_context`] runs a function inside a store and a fresh isolation
//!   [`Boundary`]; the [`ContextDomain`] it hands to the function binds
//!   callbacks so they re-enter the same context whenever they fire.
//! - [`ChainedContext`] and [`Chainable`] layer independent providers: reads
//!   fall back from child to parent, writes stay on the child.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use taskctx::{Context, Registry};
//!
//! let registry = Registry::new();
//! registry.create_context("app", &[]).unwrap();
//!
//! let deferred = registry
//!     .run_in_context(
//!         |store, domain| {
//!             store.set("user_id", json!(42)).unwrap();
//!             let registry = &registry;
//!             let check = move || {
//!                 registry
//!                     .current_context()
//!                     .and_then(|ctx| ctx.get("user_id"))
//!             };
//!             domain.bind(check)
//!         },
//!         None,
//!     )
//!     .unwrap();
//!
//! // Later, from an unrelated call stack:
//! assert_eq!(deferred(), Some(Some(json!(42))));
//! ```
//!
//! # Module Organization
//!
//! - [`store`] - Context stores, task partitions and scoped futures
//! - [`registry`] - Registry, resolver and the process-wide free functions
//! - [`domain`] - The run-in-context orchestrator
//! - [`chain`] - Chained contexts and providers
//! - [`boundary`] - Isolation boundaries
//! - [`config`] - Registry configuration
//! - [`error`] - Error types

pub mod boundary;
pub mod chain;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod registry;
pub mod store;

// Re-exports for ergonomic access
pub use boundary::{Boundary, ErrorHandler, Guarded, ReenterScope};
pub use chain::{Chainable, ChainedContext, ContextProvider};
pub use config::{DefaultScopePolicy, RegistryConfig, DEFAULT_SCOPE};
pub use context::{Context, ContextExt, SharedContext};
pub use domain::ContextDomain;
pub use error::{BoundaryError, ContextError, Result};
pub use registry::{
    chain, create_context, current_context, run_in_context, run_in_context_async, Registry,
};
pub use store::{CapturedFrame, ContextStore, Frame, FrameRef, Scoped};
