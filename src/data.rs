//! Structured data stored in the tree.
//!
//! A [`NormalizedNode`] is either a [`LeafNode`] carrying a [`Value`] or a
//! [`ContainerNode`] holding children keyed by their [`PathArgument`]. The
//! [`ContainerKind`] tells plain containers apart from keyed lists, list
//! entries and leaf-lists.
//!
//! Container children live in a persistent [`im::OrdMap`], so cloning a node
//! is constant time and replacing one child shares every untouched sibling
//! with the previous version.

use im::OrdMap;

use crate::path::{KeyValues, PathArgument, QName};
use crate::value::Value;

/// Identifier of the implicit container at the root of every tree.
pub fn root_identifier() -> PathArgument {
    PathArgument::node("data")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Container,
    /// A keyed list; children are [`ContainerKind::MapEntry`] nodes.
    Map,
    MapEntry,
    /// A leaf-list; children are leaves identified by their value.
    LeafSet,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedNode {
    Leaf(LeafNode),
    Container(ContainerNode),
}

impl NormalizedNode {
    pub fn identifier(&self) -> &PathArgument {
        match self {
            NormalizedNode::Leaf(leaf) => &leaf.identifier,
            NormalizedNode::Container(container) => &container.identifier,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            NormalizedNode::Leaf(leaf) => Some(leaf),
            NormalizedNode::Container(_) => None,
        }
    }

    pub fn as_container(&self) -> Option<&ContainerNode> {
        match self {
            NormalizedNode::Leaf(_) => None,
            NormalizedNode::Container(container) => Some(container),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.as_leaf().map(LeafNode::value)
    }

    pub fn child(&self, argument: &PathArgument) -> Option<&NormalizedNode> {
        self.as_container()?.child(argument)
    }

    /// Follows `path` relative to this node.
    pub fn find(&self, path: &[PathArgument]) -> Option<&NormalizedNode> {
        path.iter()
            .try_fold(self, |node, argument| node.child(argument))
    }
}

impl From<LeafNode> for NormalizedNode {
    fn from(leaf: LeafNode) -> Self {
        NormalizedNode::Leaf(leaf)
    }
}

impl From<ContainerNode> for NormalizedNode {
    fn from(container: ContainerNode) -> Self {
        NormalizedNode::Container(container)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafNode {
    identifier: PathArgument,
    value: Value,
}

impl LeafNode {
    pub fn new(name: impl Into<QName>, value: impl Into<Value>) -> Self {
        LeafNode {
            identifier: PathArgument::node(name),
            value: value.into(),
        }
    }

    /// A leaf-list entry; its identifier carries the value.
    pub fn entry(name: impl Into<QName>, value: impl Into<Value>) -> Self {
        let value = value.into();
        LeafNode {
            identifier: PathArgument::NodeWithValue(name.into(), value.clone()),
            value,
        }
    }

    pub fn identifier(&self) -> &PathArgument {
        &self.identifier
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerNode {
    identifier: PathArgument,
    kind: ContainerKind,
    children: OrdMap<PathArgument, NormalizedNode>,
}

impl ContainerNode {
    pub fn new(kind: ContainerKind, identifier: PathArgument) -> Self {
        ContainerNode {
            identifier,
            kind,
            children: OrdMap::new(),
        }
    }

    pub fn root() -> Self {
        ContainerNode::new(ContainerKind::Container, root_identifier())
    }

    pub fn container(name: impl Into<QName>) -> Self {
        ContainerNode::new(ContainerKind::Container, PathArgument::node(name))
    }

    pub fn map(name: impl Into<QName>) -> Self {
        ContainerNode::new(ContainerKind::Map, PathArgument::node(name))
    }

    pub fn leaf_set(name: impl Into<QName>) -> Self {
        ContainerNode::new(ContainerKind::LeafSet, PathArgument::node(name))
    }

    /// A list entry holding one leaf per key.
    pub fn map_entry<K, V>(name: impl Into<QName>, keys: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<QName>,
        V: Into<Value>,
    {
        ContainerNode::entry_for(PathArgument::entry(name, keys))
    }

    /// An empty list entry for `identifier`, with its key leaves filled in.
    ///
    /// Any other identifier yields an empty entry without keys.
    pub fn entry_for(identifier: PathArgument) -> Self {
        let keys: Option<KeyValues> = identifier.keys().cloned();
        let mut entry = ContainerNode::new(ContainerKind::MapEntry, identifier);
        for (key, value) in keys.into_iter().flatten() {
            entry.insert(LeafNode::new(key, value));
        }
        entry
    }

    pub fn identifier(&self) -> &PathArgument {
        &self.identifier
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn children(&self) -> &OrdMap<PathArgument, NormalizedNode> {
        &self.children
    }

    pub fn child(&self, argument: &PathArgument) -> Option<&NormalizedNode> {
        self.children.get(argument)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn with_child(mut self, child: impl Into<NormalizedNode>) -> Self {
        self.insert(child);
        self
    }

    /// Adds or replaces the child with the same identifier.
    pub fn insert(&mut self, child: impl Into<NormalizedNode>) -> Option<NormalizedNode> {
        let child = child.into();
        self.children.insert(child.identifier().clone(), child)
    }

    pub fn remove(&mut self, argument: &PathArgument) -> Option<NormalizedNode> {
        self.children.remove(argument)
    }

    /// A copy of this node without any children.
    pub fn emptied(&self) -> Self {
        ContainerNode::new(self.kind, self.identifier.clone())
    }
}
