//! Immutable versioned nodes.
//!
//! A [`TreeNode`] pairs a data payload with two versions: the
//! `node_version`, which changes when the node itself is written, and the
//! `subtree_version`, which changes whenever anything at or below the node
//! changes. Optimistic concurrency control compares these against the
//! versions a modification observed.
//!
//! Nodes never change once built. Updating a node produces a new one through
//! [`TreeNodeBuilder`] while every untouched child stays shared by reference,
//! so a snapshot costs one reference count and old snapshots stay valid for
//! as long as someone holds them.

use std::fmt;
use std::sync::Arc;

use im::OrdMap;

use crate::data::{ContainerNode, NormalizedNode};
use crate::path::PathArgument;

/// A monotonically increasing commit counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    pub const fn initial() -> Self {
        Version(0)
    }

    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug)]
pub struct TreeNode {
    data: NormalizedNode,
    node_version: Version,
    subtree_version: Version,
    children: OrdMap<PathArgument, Arc<TreeNode>>,
}

impl TreeNode {
    /// Builds the versioned form of `data`; every node of the subtree gets
    /// `version` as both its node and subtree version.
    pub fn from_data(data: NormalizedNode, version: Version) -> Arc<TreeNode> {
        let children = match &data {
            NormalizedNode::Leaf(_) => OrdMap::new(),
            NormalizedNode::Container(container) => container
                .children()
                .iter()
                .map(|(argument, child)| (argument.clone(), TreeNode::from_data(child.clone(), version)))
                .collect(),
        };
        Arc::new(TreeNode {
            data,
            node_version: version,
            subtree_version: version,
            children,
        })
    }

    pub fn data(&self) -> &NormalizedNode {
        &self.data
    }

    pub fn identifier(&self) -> &PathArgument {
        self.data.identifier()
    }

    pub fn node_version(&self) -> Version {
        self.node_version
    }

    pub fn subtree_version(&self) -> Version {
        self.subtree_version
    }

    pub fn child(&self, argument: &PathArgument) -> Option<&Arc<TreeNode>> {
        self.children.get(argument)
    }

    pub fn children(&self) -> impl Iterator<Item = (&PathArgument, &Arc<TreeNode>)> {
        self.children.iter()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Follows `path` relative to this node.
    pub fn descendant(self: &Arc<Self>, path: &[PathArgument]) -> Option<Arc<TreeNode>> {
        let mut node = self;
        for argument in path {
            node = node.child(argument)?;
        }
        Some(node.clone())
    }
}

/// Rebuilds a container node, keeping its data and its versioned children in
/// lock-step.
#[derive(Debug)]
pub struct TreeNodeBuilder {
    data: ContainerNode,
    node_version: Version,
    subtree_version: Version,
    children: OrdMap<PathArgument, Arc<TreeNode>>,
}

impl TreeNodeBuilder {
    /// Starts from `node`, keeping its node version and stamping
    /// `subtree_version`. Returns `None` for leaves.
    pub fn from_node(node: &TreeNode, subtree_version: Version) -> Option<Self> {
        let data = node.data.as_container()?.clone();
        Some(TreeNodeBuilder {
            data,
            node_version: node.node_version,
            subtree_version,
            children: node.children.clone(),
        })
    }

    pub fn add_child(&mut self, child: Arc<TreeNode>) -> &mut Self {
        self.data.insert(child.data.clone());
        self.children.insert(child.identifier().clone(), child);
        self
    }

    pub fn remove_child(&mut self, argument: &PathArgument) -> &mut Self {
        self.data.remove(argument);
        self.children.remove(argument);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn build(self) -> Arc<TreeNode> {
        Arc::new(TreeNode {
            data: NormalizedNode::Container(self.data),
            node_version: self.node_version,
            subtree_version: self.subtree_version,
            children: self.children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LeafNode;

    fn sample() -> NormalizedNode {
        ContainerNode::container("a")
            .with_child(ContainerNode::container("b").with_child(LeafNode::new("x", 1i64)))
            .with_child(ContainerNode::container("c"))
            .into()
    }

    #[test]
    fn from_data_stamps_every_node() {
        let node = TreeNode::from_data(sample(), Version(3));
        let x = node
            .descendant(&[PathArgument::node("b"), PathArgument::node("x")])
            .expect("x");
        assert_eq!(x.node_version(), Version(3));
        assert_eq!(x.subtree_version(), Version(3));
        assert_eq!(node.len(), 2);
    }

    #[test]
    fn builder_keeps_data_and_children_in_step() {
        let node = TreeNode::from_data(sample(), Version(1));
        let mut builder = TreeNodeBuilder::from_node(&node, Version(2)).expect("container");
        builder
            .add_child(TreeNode::from_data(LeafNode::new("y", 2i64).into(), Version(2)))
            .remove_child(&PathArgument::node("c"));
        let updated = builder.build();

        assert_eq!(updated.node_version(), Version(1));
        assert_eq!(updated.subtree_version(), Version(2));
        assert!(updated.child(&PathArgument::node("c")).is_none());
        assert!(updated.data().child(&PathArgument::node("c")).is_none());
        assert_eq!(
            updated.data().child(&PathArgument::node("y")).and_then(NormalizedNode::value),
            Some(&crate::value::Value::Int(2))
        );
        assert!(Arc::ptr_eq(
            updated.child(&PathArgument::node("b")).expect("b"),
            node.child(&PathArgument::node("b")).expect("b"),
        ));
    }

    #[test]
    fn leaves_have_no_builder() {
        let leaf = TreeNode::from_data(LeafNode::new("x", 1i64).into(), Version(1));
        assert!(TreeNodeBuilder::from_node(&leaf, Version(2)).is_none());
    }
}
