//! Task partitions of a context store.
//!
//! A [`Frame`] is the key-value partition a task sees while it runs inside
//! a store. Frames form a parent chain: a frame forked by `run` starts empty
//! and reads through to the frame that was active when it was forked, while
//! its own writes stay local. Sibling frames never see each other's writes.
//!
//! A *frozen* frame holds the values captured when a callback was bound.
//! It is never written to: every invocation of the callback forks a fresh
//! child from it, so the callback sees exactly what was visible at
//! registration and its own writes stay local to that invocation.
//!
//! Frames are reference counted. A frame lives as long as a running task,
//! a bound callback or a child frame still refers to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a frame.
pub type FrameRef = Arc<Frame>;

/// One task-local partition of a store.
pub struct Frame {
    id: u64,
    parent: Option<FrameRef>,
    frozen: bool,
    values: RwLock<HashMap<String, Value>>,
}

impl Frame {
    /// Creates a frame with no parent.
    #[cfg(test)]
    pub(crate) fn root() -> FrameRef {
        Self::fork(None)
    }

    /// Creates a frame that reads through to `parent`.
    pub(crate) fn fork(parent: Option<FrameRef>) -> FrameRef {
        Arc::new(Self {
            id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
            parent,
            frozen: false,
            values: RwLock::new(HashMap::new()),
        })
    }

    /// Creates a read-only root frame holding `values`.
    pub(crate) fn frozen(values: HashMap<String, Value>) -> FrameRef {
        Arc::new(Self {
            id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
            parent: None,
            frozen: true,
            values: RwLock::new(values),
        })
    }

    /// Returns `true` for a frame captured at registration time.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Unique frame id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The frame this one was forked from.
    pub fn parent(&self) -> Option<&FrameRef> {
        self.parent.as_ref()
    }

    /// Number of frames between this one and its root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent.as_ref();
        while let Some(frame) = cursor {
            depth += 1;
            cursor = frame.parent.as_ref();
        }
        depth
    }

    /// Looks `key` up in this frame, then in its ancestors.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.values.read().get(key) {
            return Some(value.clone());
        }
        let mut cursor = self.parent.as_ref();
        while let Some(frame) = cursor {
            if let Some(value) = frame.values.read().get(key) {
                return Some(value.clone());
            }
            cursor = frame.parent.as_ref();
        }
        None
    }

    /// Stores `value` in this frame, shadowing any ancestor.
    pub(crate) fn insert(&self, key: &str, value: Value) {
        debug_assert!(!self.frozen, "write into a frozen frame");
        self.values.write().insert(key.to_string(), value);
    }

    /// Overwrites `key` in the nearest frame defining it, or in this frame.
    /// Frozen frames are never written; the search stops at the first one.
    pub(crate) fn replace(&self, key: &str, value: Value) {
        if self.values.read().contains_key(key) {
            self.insert(key, value);
            return;
        }
        let mut cursor = self.parent.as_ref();
        while let Some(frame) = cursor {
            if frame.frozen {
                break;
            }
            if frame.values.read().contains_key(key) {
                frame.insert(key, value);
                return;
            }
            cursor = frame.parent.as_ref();
        }
        self.insert(key, value);
    }

    /// All values visible from this frame, nearer frames winning.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let mut chain = vec![self];
        let mut cursor = self.parent.as_deref();
        while let Some(frame) = cursor {
            chain.push(frame);
            cursor = frame.parent.as_deref();
        }

        let mut merged = HashMap::new();
        for frame in chain.into_iter().rev() {
            for (key, value) in frame.values.read().iter() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("depth", &self.depth())
            .field("frozen", &self.frozen)
            .field("keys", &self.values.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn child_reads_through_to_parent() {
        let root = Frame::root();
        root.insert("a", json!(1));
        let child = Frame::fork(Some(root.clone()));

        assert_eq!(child.lookup("a"), Some(json!(1)));
        assert_eq!(child.depth(), 1);
        assert!(child.parent().is_some());
    }

    #[test]
    fn child_writes_shadow_without_touching_parent() {
        let root = Frame::root();
        root.insert("a", json!(1));
        let child = Frame::fork(Some(root.clone()));
        child.insert("a", json!(2));

        assert_eq!(child.lookup("a"), Some(json!(2)));
        assert_eq!(root.lookup("a"), Some(json!(1)));
    }

    #[test]
    fn siblings_are_isolated() {
        let root = Frame::root();
        let left = Frame::fork(Some(root.clone()));
        let right = Frame::fork(Some(root));
        left.insert("k", json!("left"));

        assert_eq!(right.lookup("k"), None);
        assert_ne!(left.id(), right.id());
    }

    #[test]
    fn replace_updates_defining_frame() {
        let root = Frame::root();
        root.insert("count", json!(1));
        let child = Frame::fork(Some(root.clone()));

        child.replace("count", json!(2));
        assert_eq!(root.lookup("count"), Some(json!(2)));

        child.replace("fresh", json!(true));
        assert_eq!(root.lookup("fresh"), None);
        assert_eq!(child.lookup("fresh"), Some(json!(true)));
    }

    #[test]
    fn null_is_a_stored_value() {
        let root = Frame::root();
        root.insert("k", json!(1));
        let child = Frame::fork(Some(root));
        child.insert("k", Value::Null);

        assert_eq!(child.lookup("k"), Some(Value::Null));
    }

    #[test]
    fn replace_never_writes_into_a_frozen_frame() {
        let captured = Frame::frozen(HashMap::from([("count".to_string(), json!(1))]));
        let invocation = Frame::fork(Some(captured.clone()));

        invocation.replace("count", json!(2));
        assert_eq!(invocation.lookup("count"), Some(json!(2)));
        assert_eq!(captured.lookup("count"), Some(json!(1)));
        assert!(captured.is_frozen());
        assert!(!invocation.is_frozen());
    }

    #[test]
    fn snapshot_prefers_nearest_frame() {
        let root = Frame::root();
        root.insert("a", json!(1));
        root.insert("b", json!(1));
        let child = Frame::fork(Some(root));
        child.insert("b", json!(2));

        let snapshot = child.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a"], json!(1));
        assert_eq!(snapshot["b"], json!(2));
    }
}
