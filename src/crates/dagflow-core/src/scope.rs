//! Scope tree: the hierarchical result store
//!
//! A [`Scope`] is one tree node of the result namespace. Each scope maps keys
//! - node identities or a small set of well-known string keys - to the
//! [`NodeOutput`] produced there. Loop fan-outs materialize sibling child
//! scopes, one per call, so the tree mirrors the shape of the run.
//!
//! Lookup is by inheritance: [`Scope::get_inherited`] walks the parent chain
//! until the key is found, so a child created for one loop iteration sees
//! everything bound at its ancestors. [`Scope::collect`] goes the other way,
//! gathering every binding of a key in the subtree in pre-order - the order
//! loop strategies emitted the calls in.
//!
//! Scopes are compared and hashed by identity. Two scopes are **related** iff
//! one lies on the other's ancestor chain; the executor uses relatedness and
//! [`Scope::path_len`] to reconcile multi-predecessor inputs.
//!
//! # Example
//!
//! ```rust
//! use dagflow_core::{CollectFilter, Scope, SCOPE_NAME};
//! use serde_json::json;
//!
//! let root = Scope::new_root();
//! let child = root.birth();
//! child.bind(SCOPE_NAME, json!("iteration")).unwrap();
//!
//! assert_eq!(child.path_len(), 1);
//! assert!(root.is_related(&child));
//! assert_eq!(root.collect(SCOPE_NAME, CollectFilter::Any).len(), 1);
//! ```

use crate::node::Node;
use crate::outcome::NodeOutput;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;
use uuid::Uuid;

/// Well-known string key naming the loop fan-out a scope belongs to.
pub const SCOPE_NAME: &str = "scope_name";

/// Unique scope identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(Uuid);

/// Key of a scope entry: a node identity or a well-known string key.
#[derive(Clone)]
pub enum ScopeKey {
    /// Value produced by this node
    Node(Node),
    /// Well-known string key, e.g. [`SCOPE_NAME`]
    Name(String),
}

impl ScopeKey {
    /// String form of the key, used by [`Scope::dump`].
    pub fn key_string(&self) -> String {
        match self {
            ScopeKey::Node(node) => node.name().to_string(),
            ScopeKey::Name(name) => name.clone(),
        }
    }

    fn is_secret(&self) -> bool {
        matches!(self, ScopeKey::Node(node) if node.secret())
    }
}

impl PartialEq for ScopeKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScopeKey::Node(a), ScopeKey::Node(b)) => a.id() == b.id(),
            (ScopeKey::Name(a), ScopeKey::Name(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScopeKey {}

impl fmt::Debug for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Node(node) => f.debug_tuple("Node").field(&node.name()).finish(),
            ScopeKey::Name(name) => f.debug_tuple("Name").field(name).finish(),
        }
    }
}

impl From<&Node> for ScopeKey {
    fn from(node: &Node) -> Self {
        ScopeKey::Node(node.clone())
    }
}

impl From<Node> for ScopeKey {
    fn from(node: Node) -> Self {
        ScopeKey::Node(node)
    }
}

impl From<&str> for ScopeKey {
    fn from(name: &str) -> Self {
        ScopeKey::Name(name.to_string())
    }
}

impl From<String> for ScopeKey {
    fn from(name: String) -> Self {
        ScopeKey::Name(name)
    }
}

/// Filter applied by [`Scope::collect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectFilter {
    /// Every binding, live or ignored
    Any,
    /// Only live values
    Valid,
    /// Only ignore sentinels
    Ignored,
}

impl CollectFilter {
    fn admits(&self, output: &NodeOutput) -> bool {
        match self {
            CollectFilter::Any => true,
            CollectFilter::Valid => !output.is_ignored(),
            CollectFilter::Ignored => output.is_ignored(),
        }
    }
}

/// Binding a key that is already bound in the same scope.
///
/// Each node writes at most once per scope; a second bind is always a bug in
/// the caller.
#[derive(Debug, Error)]
#[error("key '{key}' is already bound in this scope")]
pub struct AlreadyBound {
    /// String form of the offending key
    pub key: String,
}

struct ScopeInner {
    id: ScopeId,
    depth: usize,
    parent: Option<Weak<ScopeInner>>,
    entries: RwLock<Vec<(ScopeKey, NodeOutput)>>,
    children: RwLock<Vec<Scope>>,
}

/// One tree node of the hierarchical result store.
///
/// Cheap-clone handle; clones refer to the same scope. Children hold strong
/// references from their parent and weak references back, so the whole tree
/// stays alive exactly as long as the root returned by the executor.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a root scope with no parent.
    pub fn new_root() -> Self {
        Scope {
            inner: Arc::new(ScopeInner {
                id: ScopeId(Uuid::new_v4()),
                depth: 0,
                parent: None,
                entries: RwLock::new(Vec::new()),
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create and link a fresh empty child.
    pub fn birth(&self) -> Scope {
        let child = Scope {
            inner: Arc::new(ScopeInner {
                id: ScopeId(Uuid::new_v4()),
                depth: self.inner.depth + 1,
                parent: Some(Arc::downgrade(&self.inner)),
                entries: RwLock::new(Vec::new()),
                children: RwLock::new(Vec::new()),
            }),
        };
        self.inner.children.write().push(child.clone());
        child
    }

    /// Scope identity.
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Number of ancestors up to the root.
    pub fn path_len(&self) -> usize {
        self.inner.depth
    }

    /// Parent scope, if any.
    pub fn parent(&self) -> Option<Scope> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Scope { inner })
    }

    /// Ordered children of this scope.
    pub fn children(&self) -> Vec<Scope> {
        self.inner.children.read().clone()
    }

    /// Scope-local lookup.
    pub fn get(&self, key: impl Into<ScopeKey>) -> Option<NodeOutput> {
        let key = key.into();
        self.inner
            .entries
            .read()
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    }

    /// Lookup walking the parent chain: local first, then each ancestor.
    pub fn get_inherited(&self, key: impl Into<ScopeKey>) -> Option<NodeOutput> {
        let key = key.into();
        let mut cursor = Some(self.clone());
        while let Some(scope) = cursor {
            if let Some(found) = scope
                .inner
                .entries
                .read()
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
            {
                return Some(found);
            }
            cursor = scope.parent();
        }
        None
    }

    /// Bind a value locally. Each key binds at most once per scope.
    pub fn bind(
        &self,
        key: impl Into<ScopeKey>,
        value: impl Into<NodeOutput>,
    ) -> std::result::Result<(), AlreadyBound> {
        let key = key.into();
        let mut entries = self.inner.entries.write();
        if entries.iter().any(|(k, _)| *k == key) {
            return Err(AlreadyBound {
                key: key.key_string(),
            });
        }
        entries.push((key, value.into()));
        Ok(())
    }

    /// Gather every binding of `key` in this subtree, pre-order: the binding
    /// at this scope (if present and admitted by the filter) followed by the
    /// recursive collection from each child in insertion order.
    ///
    /// Presence, not truthiness, decides participation: `0`, `""`, `null` and
    /// `[]` all collect.
    pub fn collect(&self, key: impl Into<ScopeKey>, filter: CollectFilter) -> Vec<NodeOutput> {
        let key = key.into();
        let mut out = Vec::new();
        self.collect_into(&key, filter, &mut out);
        out
    }

    /// Convenience over [`collect`](Self::collect): live values only,
    /// unwrapped to plain JSON.
    pub fn collect_values(&self, key: impl Into<ScopeKey>) -> Vec<Value> {
        self.collect(key, CollectFilter::Valid)
            .into_iter()
            .filter_map(NodeOutput::into_value)
            .collect()
    }

    fn collect_into(&self, key: &ScopeKey, filter: CollectFilter, out: &mut Vec<NodeOutput>) {
        if let Some(value) = self
            .inner
            .entries
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
        {
            if filter.admits(&value) {
                out.push(value);
            }
        }
        for child in self.inner.children.read().iter() {
            child.collect_into(key, filter, out);
        }
    }

    /// True iff `other` lies on this scope's ancestor chain or vice versa.
    pub fn is_related(&self, other: &Scope) -> bool {
        let (deep, shallow) = if self.path_len() >= other.path_len() {
            (self, other)
        } else {
            (other, self)
        };
        match deep.ancestor_at_depth(shallow.path_len()) {
            Some(ancestor) => ancestor.id() == shallow.id(),
            None => false,
        }
    }

    fn ancestor_at_depth(&self, depth: usize) -> Option<Scope> {
        let mut cursor = self.clone();
        while cursor.path_len() > depth {
            cursor = cursor.parent()?;
        }
        Some(cursor)
    }

    /// JSON projection of this subtree: an object keyed by the string form of
    /// each bound key, plus a `"children"` array when the scope has children.
    /// With `redact_secrets`, values keyed by secret nodes become `"***"`.
    pub fn dump(&self, redact_secrets: bool) -> Value {
        let mut map = serde_json::Map::new();
        for (key, value) in self.inner.entries.read().iter() {
            let projected = if redact_secrets && key.is_secret() {
                Value::String("***".to_string())
            } else {
                value.dump_value()
            };
            map.insert(key.key_string(), projected);
        }
        let children = self.inner.children.read();
        if !children.is_empty() {
            map.insert(
                "children".to_string(),
                Value::Array(children.iter().map(|c| c.dump(redact_secrets)).collect()),
            );
        }
        Value::Object(map)
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Scope {}

impl std::hash::Hash for Scope {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("depth", &self.inner.depth)
            .field("entries", &self.inner.entries.read().len())
            .field("children", &self.inner.children.read().len())
            .finish()
    }
}
