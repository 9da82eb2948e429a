//! Hierarchical, hash-stable path identifiers
//!
//! A [`NavigablePath`] names a position in the association graph relative to
//! a query root, e.g. `Order(o).lineItems.{element}.product`. It is the key
//! used to correlate plan nodes, table groups and joins.

use serde::{Serialize, Serializer};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};

/// Local name used for the element part of a plural attribute
pub const ELEMENT_PART: &str = "{element}";
/// Local name used for the index/key part of a plural attribute
pub const INDEX_PART: &str = "{index}";
/// Local name used for an entity identifier
pub const IDENTIFIER_PART: &str = "{id}";

#[derive(Debug)]
struct PathNode {
    parent: Option<NavigablePath>,
    local_name: String,
    alias: Option<String>,
    full_path: String,
    hash: u64,
    depth: usize,
    children: Mutex<HashMap<String, Weak<PathNode>>>,
}

/// Immutable path with structural sharing of common prefixes
#[derive(Clone)]
pub struct NavigablePath {
    node: Arc<PathNode>,
}

impl NavigablePath {
    /// Create a root path
    pub fn new(local_name: impl Into<String>) -> Self {
        Self::build(None, local_name.into(), None)
    }

    /// Create a root path carrying an identification alias
    pub fn with_alias(local_name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::build(None, local_name.into(), Some(alias.into()))
    }

    fn build(parent: Option<NavigablePath>, local_name: String, alias: Option<String>) -> Self {
        let mut full_path = match &parent {
            Some(parent) => format!("{}.{}", parent.full_path(), local_name),
            None => local_name.clone(),
        };
        if let Some(alias) = &alias {
            full_path.push('(');
            full_path.push_str(alias);
            full_path.push(')');
        }

        let mut hasher = DefaultHasher::new();
        full_path.hash(&mut hasher);
        let depth = parent.as_ref().map(|p| p.depth() + 1).unwrap_or(0);

        Self {
            node: Arc::new(PathNode {
                parent,
                local_name,
                alias,
                full_path,
                hash: hasher.finish(),
                depth,
                children: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Append a child segment, returning the cached child when one is alive
    pub fn append(&self, local_name: &str) -> NavigablePath {
        self.append_child(local_name, None)
    }

    /// Append a child segment carrying an alias
    pub fn append_with_alias(&self, local_name: &str, alias: &str) -> NavigablePath {
        self.append_child(local_name, Some(alias))
    }

    fn append_child(&self, local_name: &str, alias: Option<&str>) -> NavigablePath {
        let key = match alias {
            Some(alias) => format!("{}({})", local_name, alias),
            None => local_name.to_string(),
        };

        // A poisoned cache only loses sharing, never correctness.
        let mut children = match self.node.children.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = children.get(&key).and_then(Weak::upgrade) {
            return NavigablePath { node: existing };
        }

        let child = Self::build(
            Some(self.clone()),
            local_name.to_string(),
            alias.map(str::to_string),
        );
        children.retain(|_, cached| cached.strong_count() > 0);
        children.insert(key, Arc::downgrade(&child.node));
        child
    }

    /// Parent path, `None` for a root
    pub fn parent(&self) -> Option<&NavigablePath> {
        self.node.parent.as_ref()
    }

    /// Last segment name without alias
    pub fn local_name(&self) -> &str {
        &self.node.local_name
    }

    /// Alias of the last segment, if any
    pub fn alias(&self) -> Option<&str> {
        self.node.alias.as_deref()
    }

    /// Full dotted representation
    pub fn full_path(&self) -> &str {
        &self.node.full_path
    }

    /// Number of segments above this one
    pub fn depth(&self) -> usize {
        self.node.depth
    }

    pub fn is_root(&self) -> bool {
        self.node.parent.is_none()
    }

    /// The root of this path
    pub fn root(&self) -> &NavigablePath {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// True when `self` is the direct parent of `other`
    pub fn is_parent(&self, other: &NavigablePath) -> bool {
        other.parent().map(|p| p == self).unwrap_or(false)
    }

    /// True when `self` equals `other` or is one of its ancestors
    pub fn is_parent_or_equal(&self, other: &NavigablePath) -> bool {
        if self.depth() > other.depth() {
            return false;
        }
        let mut current = Some(other);
        while let Some(path) = current {
            if path.depth() < self.depth() {
                return false;
            }
            if path == self {
                return true;
            }
            current = path.parent();
        }
        false
    }

    /// Dotted local names from `ancestor` (exclusive) down to `self`
    pub fn relative_to(&self, ancestor: &NavigablePath) -> Option<String> {
        if !ancestor.is_parent_or_equal(self) {
            return None;
        }
        let mut segments = Vec::with_capacity(self.depth() - ancestor.depth());
        let mut current = self;
        while current != ancestor {
            segments.push(current.local_name());
            current = current.parent()?;
        }
        segments.reverse();
        Some(segments.join("."))
    }

    /// Identity comparison (same shared node)
    pub fn ptr_eq(&self, other: &NavigablePath) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl PartialEq for NavigablePath {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
            || (self.node.hash == other.node.hash && self.node.full_path == other.node.full_path)
    }
}

impl Eq for NavigablePath {}

impl Hash for NavigablePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.node.hash);
    }
}

impl fmt::Display for NavigablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full_path())
    }
}

impl fmt::Debug for NavigablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NavigablePath({})", self.full_path())
    }
}

impl Serialize for NavigablePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.full_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_full_path_and_alias() {
        let root = NavigablePath::with_alias("Order", "o");
        let items = root.append("lineItems");
        let element = items.append(ELEMENT_PART);
        let product = element.append("product");

        assert_eq!(root.full_path(), "Order(o)");
        assert_eq!(product.full_path(), "Order(o).lineItems.{element}.product");
        assert_eq!(product.local_name(), "product");
        assert_eq!(product.depth(), 3);
        assert_eq!(product.root(), &root);
    }

    #[test]
    fn test_append_returns_cached_child() {
        let root = NavigablePath::new("Order");
        let first = root.append("customer");
        let second = root.append("customer");
        assert!(first.ptr_eq(&second));
        assert!(first.parent().unwrap().ptr_eq(&root));
    }

    #[test]
    fn test_dropped_children_leave_the_cache() {
        let root = NavigablePath::new("Order");
        for index in 0..8 {
            let _ = root.append(&format!("attribute{}", index));
        }
        let kept = root.append("customer");

        let cached = root.node.children.lock().unwrap().len();
        assert_eq!(cached, 1);
        assert!(root.append("customer").ptr_eq(&kept));
    }

    #[test]
    fn test_equality_is_by_full_path() {
        let a = NavigablePath::new("Order").append("customer");
        let b = NavigablePath::new("Order").append("customer");
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_parent_relationships() {
        let root = NavigablePath::new("Order");
        let customer = root.append("customer");
        let address = customer.append("address");

        assert!(root.is_parent(&customer));
        assert!(!root.is_parent(&address));
        assert!(root.is_parent_or_equal(&address));
        assert!(customer.is_parent_or_equal(&customer));
        assert!(!address.is_parent_or_equal(&customer));

        let other = NavigablePath::new("Customer");
        assert!(!other.is_parent_or_equal(&address));
    }

    #[test]
    fn test_relative_to() {
        let root = NavigablePath::new("Order");
        let street = root.append("billing").append("street");
        assert_eq!(street.relative_to(&root).as_deref(), Some("billing.street"));
        assert_eq!(root.relative_to(&root).as_deref(), Some(""));
        assert_eq!(root.relative_to(&street), None);
    }
}
