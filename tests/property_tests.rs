//! Property-based tests for store, chain and registry invariants.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};

use taskctx::{ChainedContext, Context, DefaultScopePolicy, Registry, RegistryConfig};

// ─── Arbitrary Strategies ───────────────────────────────────────────────────

fn arb_key() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_.]{0,15}"
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::from),
        proptest::collection::vec(any::<i32>(), 0..4).prop_map(|v| json!(v)),
    ]
}

fn arb_scope_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}"
}

// ─── Store Invariants ───────────────────────────────────────────────────────

proptest! {
    /// Within one frame, the last write to a key is what a read returns.
    #[test]
    fn last_write_wins_within_a_frame(
        writes in proptest::collection::vec((arb_key(), arb_value()), 1..24),
    ) {
        let registry = Registry::new();
        let store = registry.namespace("props").unwrap();

        let expected: HashMap<String, Value> = writes.iter().cloned().collect();
        store.run(|| {
            for (key, value) in &writes {
                store.set(key, value.clone()).unwrap();
            }
            for (key, value) in &expected {
                let got = store.get(key);
                prop_assert_eq!(got.as_ref(), Some(value));
            }
            Ok(())
        })?;
        prop_assert!(!store.is_active());
    }

    /// Writes in a nested frame never leak into the enclosing frame.
    #[test]
    fn nested_writes_do_not_leak(
        key in arb_key(),
        outer in arb_value(),
        inner in arb_value(),
    ) {
        let registry = Registry::new();
        let store = registry.namespace("nested").unwrap();

        let seen = store.run(|| {
            store.set(&key, outer.clone()).unwrap();
            let nested = store.run(|| {
                store.set(&key, inner.clone()).unwrap();
                store.get(&key)
            });
            (nested, store.get(&key))
        });
        prop_assert_eq!(seen, (Some(inner), Some(outer)));
    }

    /// A bound callback observes the values of the frame it was bound in,
    /// however the frame is written to afterwards by sibling runs.
    #[test]
    fn bound_callbacks_keep_their_frame(
        key in arb_key(),
        values in proptest::collection::vec(arb_value(), 1..8),
    ) {
        let registry = Registry::new();
        let store = registry.namespace("bound").unwrap();

        let callbacks: Vec<_> = values
            .iter()
            .map(|value| {
                store.run(|| {
                    store.set(&key, value.clone()).unwrap();
                    let reader = Arc::clone(&store);
                    let key = key.clone();
                    store.bind(move || reader.get(&key))
                })
            })
            .collect();

        for (callback, value) in callbacks.into_iter().zip(values).rev() {
            prop_assert_eq!(callback(), Some(value));
        }
    }

    /// Whatever is written after a callback is bound, by its own frame or by
    /// a sibling callback, the callback only sees the registration values.
    #[test]
    fn writes_after_registration_never_reach_a_callback(
        key in arb_key(),
        registered in proptest::option::of(arb_value()),
        later in arb_value(),
    ) {
        let registry = Registry::new();
        let store = registry.namespace("snapshot").unwrap();

        let reader = store.run(|| {
            if let Some(value) = &registered {
                store.set(&key, value.clone()).unwrap();
            }
            let (r, w) = (Arc::clone(&store), Arc::clone(&store));
            let (rk, wk, wv) = (key.clone(), key.clone(), later.clone());
            let reader = store.bind(move || r.get(&rk));
            let writer = store.bind(move || w.set(&wk, wv).unwrap());
            store.set(&key, later.clone()).unwrap();
            writer();
            reader
        });
        prop_assert_eq!(reader(), registered);
    }
}

// ─── Chain Invariants ───────────────────────────────────────────────────────

proptest! {
    /// A chained read returns the child's value when present and the
    /// parent's value otherwise.
    #[test]
    fn chained_reads_prefer_the_child(
        key in arb_key(),
        in_child in proptest::option::of(arb_value()),
        in_parent in proptest::option::of(arb_value()),
    ) {
        let registry = Registry::new();
        let parent = registry.namespace("parent").unwrap();
        let child = registry.namespace("child").unwrap();
        let chained = ChainedContext::new(Some(child.clone()), Some(parent.clone()));

        let seen = parent.run(|| {
            child.run(|| {
                if let Some(value) = &in_parent {
                    parent.set(&key, value.clone()).unwrap();
                }
                if let Some(value) = &in_child {
                    child.set(&key, value.clone()).unwrap();
                }
                chained.get(&key)
            })
        });
        prop_assert_eq!(seen, in_child.or(in_parent));
    }

    /// Writes through a chain never touch the parent.
    #[test]
    fn chained_writes_leave_the_parent_untouched(
        key in arb_key(),
        before in arb_value(),
        written in arb_value(),
    ) {
        let registry = Registry::new();
        let parent = registry.namespace("parent").unwrap();
        let child = registry.namespace("child").unwrap();
        let chained = ChainedContext::new(Some(child.clone()), Some(parent.clone()));

        let seen = parent.run(|| {
            child.run(|| {
                parent.set(&key, before.clone()).unwrap();
                chained.set(&key, written.clone()).unwrap();
                (parent.get(&key), child.get(&key), chained.get(&key))
            })
        });
        prop_assert_eq!(seen, (Some(before), Some(written.clone()), Some(written)));
    }
}

// ─── Registry Invariants ────────────────────────────────────────────────────

proptest! {
    /// Every name maps to exactly one store, however often it is requested.
    #[test]
    fn namespaces_are_unique_per_name(
        names in proptest::collection::vec(arb_scope_name(), 1..16),
    ) {
        let registry = Registry::new();
        for name in &names {
            let first = registry.namespace(name).unwrap();
            let again = registry.namespace(name).unwrap();
            prop_assert!(Arc::ptr_eq(&first, &again));
            prop_assert_eq!(first.name(), name.as_str());
        }

        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(registry.scope_names(), unique);
    }

    /// Under the keep-first policy the first created scope stays the default.
    #[test]
    fn keep_first_never_moves_the_default(
        names in proptest::collection::vec(arb_scope_name(), 1..8),
    ) {
        let config = RegistryConfig::new().with_conflict_policy(DefaultScopePolicy::KeepFirst);
        let registry = Registry::with_config(config).unwrap();
        for name in &names {
            registry.create_context(name, &[]).unwrap();
        }
        let default = registry.default_store().unwrap();
        prop_assert_eq!(default.name(), names[0].as_str());
    }
}
