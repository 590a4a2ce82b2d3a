//! Path-addressed cache for one unit of work.
//!
//! The cache is a tree of nodes addressed by path segments, with three
//! namespaces:
//!
//! - `entity/<class>/<key>` holds the single live instance (identity map)
//! - `relation/<class>/<key>/<other>/<other key>` flags a related pair,
//!   stored once per direction; a value on the `<other>` node marks that
//!   direction as completely loaded
//! - `collection/<root class>/<query key>` holds query results as rows of
//!   `(class, key)` references, never the entities themselves
//!
//! Dropping an entity drops its relation entries and then its collection
//! references, so nothing is left pointing at an evicted instance.

use hereyougo_core::{EntityClass, EntityHandle};
use std::collections::BTreeMap;
use std::fmt;

/// Path segment matching every child in [`Cache::drop`].
pub const WILDCARD: &str = "*";

const ENTITY: &str = "entity";
const RELATION: &str = "relation";
const COLLECTION: &str = "collection";

/// Cached query result: one row of per-node references per fetched row.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    /// Class of each query node, in node order
    pub classes: Vec<EntityClass>,
    /// Entity cache keys, `None` where a node matched nothing
    pub rows: Vec<Vec<Option<String>>>,
}

impl Collection {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn mentions(&self, class: &str, key: &str) -> bool {
        self.rows.iter().any(|row| self.row_mentions(row, class, key))
    }

    fn row_mentions(&self, row: &[Option<String>], class: &str, key: &str) -> bool {
        row.iter()
            .zip(&self.classes)
            .any(|(k, c)| c.name() == class && k.as_deref() == Some(key))
    }

    /// Remove references to an entity; rows rooted on it go away entirely.
    fn prune(&mut self, class: &str, key: &str) {
        let root_is = |row: &Vec<Option<String>>, classes: &[EntityClass]| {
            classes.first().is_some_and(|c| c.name() == class)
                && row.first().and_then(|k| k.as_deref()) == Some(key)
        };
        let classes = self.classes.clone();
        self.rows.retain(|row| !root_is(row, &classes));
        for row in &mut self.rows {
            for (reference, c) in row.iter_mut().zip(&classes) {
                if c.name() == class && reference.as_deref() == Some(key) {
                    *reference = None;
                }
            }
        }
    }
}

/// A cached value.
#[derive(Clone)]
pub enum Slot {
    Entity(EntityHandle),
    Flag,
    Collection(Collection),
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Entity(entity) => write!(f, "Entity({})", entity.class()),
            Slot::Flag => f.write_str("Flag"),
            Slot::Collection(collection) => f
                .debug_struct("Collection")
                .field("classes", &collection.classes)
                .field("rows", &collection.rows.len())
                .finish(),
        }
    }
}

/// One node of the cache tree.
#[derive(Debug, Clone, Default)]
pub struct Node {
    value: Option<Slot>,
    children: BTreeMap<String, Node>,
}

impl Node {
    pub fn value(&self) -> Option<&Slot> {
        self.value.as_ref()
    }

    pub fn children(&self) -> &BTreeMap<String, Node> {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

/// Hierarchical cache: identity map, relation pairs, query results.
#[derive(Debug, Default)]
pub struct Cache {
    root: Node,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk to the node at `path`.
    pub fn lookup(&self, path: &[&str]) -> Option<&Node> {
        path.iter()
            .try_fold(&self.root, |node, segment| node.children.get(*segment))
    }

    /// Walk to the node at `path`, creating missing nodes when `create` is set.
    pub fn find(&mut self, path: &[&str], create: bool) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for segment in path {
            node = if create {
                node.children.entry((*segment).to_string()).or_default()
            } else {
                node.children.get_mut(*segment)?
            };
        }
        Some(node)
    }

    pub fn get(&self, path: &[&str]) -> Option<&Slot> {
        self.lookup(path).and_then(Node::value)
    }

    pub fn set(&mut self, path: &[&str], slot: Slot) {
        if let Some(node) = self.find(path, true) {
            node.value = Some(slot);
        }
    }

    /// Remove the subtree at `path`; a [`WILDCARD`] segment applies the rest
    /// of the path to every child. Nodes left empty are pruned.
    ///
    /// Returns the number of removed subtrees.
    pub fn drop(&mut self, path: &[&str]) -> usize {
        if path.is_empty() {
            let removed = usize::from(!self.root.is_empty());
            self.root = Node::default();
            return removed;
        }
        drop_in(&mut self.root, path)
    }

    /// Reset every namespace.
    pub fn clear(&mut self) {
        tracing::debug!("Clearing cache");
        self.root = Node::default();
    }

    pub fn get_entity(&self, class: &str, key: &str) -> Option<EntityHandle> {
        let hit = match self.get(&[ENTITY, class, key]) {
            Some(Slot::Entity(entity)) => Some(EntityHandle::clone(entity)),
            _ => None,
        };
        tracing::trace!(class = class, key = key, hit = hit.is_some(), "Entity cache lookup");
        hit
    }

    /// Store the live instance for `class`/`key`, replacing any previous one.
    pub fn set_entity(&mut self, class: &str, key: &str, entity: EntityHandle) {
        self.set(&[ENTITY, class, key], Slot::Entity(entity));
    }

    /// Evict an entity with its relation entries and collection references.
    pub fn drop_entity(&mut self, class: &str, key: &str) {
        self.drop(&[ENTITY, class, key]);
        self.drop_relations_of(class, key);
        self.drop_collection(class, key);
    }

    pub fn has_relation(&self, class: &str, key: &str, other: &str, other_key: &str) -> bool {
        matches!(
            self.get(&[RELATION, class, key, other, other_key]),
            Some(Slot::Flag)
        )
    }

    /// Keys of `other` entities related to `class`/`key`, only when that
    /// direction has been completely loaded.
    pub fn get_relation(&self, class: &str, key: &str, other: &str) -> Option<Vec<String>> {
        let node = self.lookup(&[RELATION, class, key, other])?;
        match node.value {
            Some(Slot::Flag) => Some(node.children.keys().cloned().collect()),
            _ => None,
        }
    }

    /// Record a related pair in both directions.
    pub fn set_relation(&mut self, class: &str, key: &str, other: &str, other_key: &str) {
        self.set(&[RELATION, class, key, other, other_key], Slot::Flag);
        self.set(&[RELATION, other, other_key, class, key], Slot::Flag);
    }

    /// Mark the `class`/`key` -> `other` direction as completely loaded.
    pub fn mark_relation_complete(&mut self, class: &str, key: &str, other: &str) {
        self.set(&[RELATION, class, key, other], Slot::Flag);
    }

    /// Forget what is known about the `class`/`key` -> `other` direction.
    pub fn forget_relation(&mut self, class: &str, key: &str, other: &str) {
        if let Some(node) = self.find(&[RELATION, class, key, other], false) {
            node.value = None;
        }
        self.drop(&[RELATION, class, key, other, WILDCARD]);
    }

    /// Remove a related pair in both directions.
    pub fn drop_relation(&mut self, class: &str, key: &str, other: &str, other_key: &str) {
        self.drop(&[RELATION, class, key, other, other_key]);
        self.drop(&[RELATION, other, other_key, class, key]);
    }

    /// Make `other_key` the only `other` related to `class`/`key`, in both
    /// directions. `None` removes every pair.
    pub fn replace_relation(
        &mut self,
        class: &str,
        key: &str,
        other: &str,
        other_key: Option<&str>,
    ) {
        let stale: Vec<String> = self
            .lookup(&[RELATION, class, key, other])
            .map(|node| {
                node.children
                    .keys()
                    .filter(|k| Some(k.as_str()) != other_key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for stale_key in &stale {
            self.drop_relation(class, key, other, stale_key);
        }
        if let Some(other_key) = other_key {
            self.set_relation(class, key, other, other_key);
        }
    }

    /// Remove every relation entry mentioning `class`/`key`.
    ///
    /// Directions pointing at the entity stop being complete.
    pub fn drop_relations_of(&mut self, class: &str, key: &str) {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(node) = self.lookup(&[RELATION, class, key]) {
            for (other, keys) in &node.children {
                for other_key in keys.children.keys() {
                    pairs.push((other.clone(), other_key.clone()));
                }
            }
        }
        for (other, other_key) in &pairs {
            if let Some(node) = self.find(&[RELATION, other, other_key, class], false) {
                node.value = None;
            }
            self.drop(&[RELATION, other, other_key, class, key]);
            self.drop(&[RELATION, other, other_key, class]);
        }
        self.drop(&[RELATION, class, key]);
    }

    pub fn get_collection(&self, root: &str, query_key: &str) -> Option<&Collection> {
        let hit = match self.get(&[COLLECTION, root, query_key]) {
            Some(Slot::Collection(collection)) => Some(collection),
            _ => None,
        };
        tracing::trace!(class = root, query = query_key, hit = hit.is_some(), "Collection cache lookup");
        hit
    }

    pub fn set_collection(&mut self, root: &str, query_key: &str, collection: Collection) {
        self.set(&[COLLECTION, root, query_key], Slot::Collection(collection));
    }

    /// Prune references to `class`/`key` from every collection, removing
    /// collections left empty.
    pub fn drop_collection(&mut self, class: &str, key: &str) {
        let Some(namespace) = self.find(&[COLLECTION], false) else {
            return;
        };
        for root in namespace.children.values_mut() {
            for node in root.children.values_mut() {
                if let Some(Slot::Collection(collection)) = &mut node.value {
                    if collection.mentions(class, key) {
                        collection.prune(class, key);
                        if collection.is_empty() {
                            node.value = None;
                        }
                    }
                }
            }
            root.children.retain(|_, node| !node.is_empty());
        }
        namespace.children.retain(|_, node| !node.is_empty());
    }

    /// Drop every collection involving `class` in any of its nodes.
    pub fn drop_collections_of(&mut self, class: &str) {
        let Some(namespace) = self.find(&[COLLECTION], false) else {
            return;
        };
        for root in namespace.children.values_mut() {
            root.children.retain(|_, node| match &node.value {
                Some(Slot::Collection(collection)) => {
                    !collection.classes.iter().any(|c| c.name() == class)
                }
                _ => true,
            });
        }
        namespace.children.retain(|_, node| !node.is_empty());
    }
}

fn drop_in(node: &mut Node, path: &[&str]) -> usize {
    let Some((head, rest)) = path.split_first() else {
        return 0;
    };

    if *head == WILDCARD {
        let removed = if rest.is_empty() {
            let count = node.children.len();
            node.children.clear();
            count
        } else {
            node.children
                .values_mut()
                .map(|child| drop_in(child, rest))
                .sum()
        };
        node.children.retain(|_, child| !child.is_empty());
        return removed;
    }

    if rest.is_empty() {
        return usize::from(node.children.remove(*head).is_some());
    }

    let Some(child) = node.children.get_mut(*head) else {
        return 0;
    };
    let removed = drop_in(child, rest);
    if child.is_empty() {
        node.children.remove(*head);
    }
    removed
}
