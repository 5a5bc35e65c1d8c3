//! The context capability shared by stores and chained contexts.
//!
//! Anything that can answer `get`/`set`/`reset` for string keys implements
//! [`Context`]. Consumers hold a [`SharedContext`] and never need to know
//! whether it is a raw [`ContextStore`](crate::store::ContextStore) or a
//! layered [`ChainedContext`](crate::chain::ChainedContext).
//!
//! Absence is `None`. A stored `Value::Null` is a present value, so layered
//! lookups only fall through on a genuine miss.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

/// Key-value operations scoped to whatever partition is active for the
/// calling task.
pub trait Context: Send + Sync + fmt::Debug {
    /// Look up `key`. Returns `None` when no value is visible.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store `value` under `key` in the most specific layer.
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Overwrite `key` where it is currently defined, or store it in the
    /// most specific layer when it is not defined anywhere.
    fn reset(&self, key: &str, value: Value) -> Result<()>;

    /// Returns `true` if a value is visible under `key`.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Reference-counted, type-erased context.
pub type SharedContext = Arc<dyn Context>;

/// Typed accessors over any [`Context`].
///
/// Accessors return `None` when the key is absent or the stored value does
/// not have the requested type.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use taskctx::{Context, ContextExt, Registry};
///
/// let registry = Registry::new();
/// let store = registry.namespace("docs").unwrap();
/// store.run(|| {
///     store.set("user_id", json!(42)).unwrap();
///     assert_eq!(store.get_i64("user_id"), Some(42));
///     assert_eq!(store.get_str("user_id"), None);
/// });
/// ```
pub trait ContextExt: Context {
    /// Gets a string value.
    fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Gets an integer value.
    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// Gets a floating point value.
    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    /// Gets a boolean value.
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// Deserializes a value into `T`.
    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }
}

impl<C: Context + ?Sized> ContextExt for C {}
