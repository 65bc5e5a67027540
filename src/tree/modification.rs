//! The per-transaction overlay recorded on top of a snapshot.
//!
//! A [`NodeModification`] mirrors the part of the tree a transaction touched.
//! Each node remembers the [`TreeNode`] it was derived from (`original`),
//! what happened to it ([`ModificationType`]) and the modifications of its
//! children in the order they were first touched. Untouched parts of the tree
//! never get a modification node.

use std::cell::OnceCell;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::data::NormalizedNode;
use crate::path::PathArgument;

use super::node::TreeNode;
use super::DataTreeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModificationType {
    /// Nothing happened to the node or below it.
    Unmodified,
    /// Some descendant changed; the node itself was not replaced.
    SubtreeModified,
    /// The node was replaced with a new value.
    Write,
    /// The node was removed.
    Delete,
}

#[derive(Debug)]
pub struct NodeModification {
    identifier: PathArgument,
    original: Option<Arc<TreeNode>>,
    modification_type: ModificationType,
    value: Option<NormalizedNode>,
    merge: bool,
    children: IndexMap<PathArgument, NodeModification>,
    sealed: bool,
    resolved: OnceCell<Option<Arc<TreeNode>>>,
}

impl NodeModification {
    pub fn new(identifier: PathArgument, original: Option<Arc<TreeNode>>) -> Self {
        NodeModification {
            identifier,
            original,
            modification_type: ModificationType::Unmodified,
            value: None,
            merge: false,
            children: IndexMap::new(),
            sealed: false,
            resolved: OnceCell::new(),
        }
    }

    pub fn identifier(&self) -> &PathArgument {
        &self.identifier
    }

    pub fn original(&self) -> Option<&Arc<TreeNode>> {
        self.original.as_ref()
    }

    pub fn modification_type(&self) -> ModificationType {
        self.modification_type
    }

    /// The written value, present only for [`ModificationType::Write`].
    pub fn value(&self) -> Option<&NormalizedNode> {
        self.value.as_ref()
    }

    /// Whether the written value is merged into the node found at apply
    /// time instead of replacing it.
    pub fn is_merge(&self) -> bool {
        self.merge
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn child(&self, argument: &PathArgument) -> Option<&NodeModification> {
        self.children.get(argument)
    }

    /// Child modifications in the order they were first touched.
    pub fn children(&self) -> impl Iterator<Item = &NodeModification> {
        self.children.values()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// The modification of child `argument`, created on first use.
    ///
    /// A new child captures the matching child of this node's original.
    /// Touching a child of an unmodified node marks it subtree-modified;
    /// written and deleted nodes keep their type.
    pub fn modify_child(&mut self, argument: &PathArgument) -> Result<&mut NodeModification, DataTreeError> {
        self.check_open()?;
        self.resolved.take();
        if self.modification_type == ModificationType::Unmodified {
            self.modification_type = ModificationType::SubtreeModified;
        }
        let original = &self.original;
        Ok(self
            .children
            .entry(argument.clone())
            .or_insert_with(|| {
                let child = original.as_ref().and_then(|node| node.child(argument)).cloned();
                NodeModification::new(argument.clone(), child)
            }))
    }

    /// Replaces the node with `value`, discarding earlier child modifications.
    pub fn write(&mut self, value: NormalizedNode) -> Result<(), DataTreeError> {
        self.replace(value, false)
    }

    /// Records `value` to be merged into whatever node exists when the
    /// modification is applied. An absent node is written.
    pub fn merge(&mut self, value: NormalizedNode) -> Result<(), DataTreeError> {
        self.replace(value, true)
    }

    fn replace(&mut self, value: NormalizedNode, merge: bool) -> Result<(), DataTreeError> {
        self.check_open()?;
        self.resolved.take();
        self.children.clear();
        self.modification_type = ModificationType::Write;
        self.value = Some(value);
        self.merge = merge;
        Ok(())
    }

    /// Removes the node, discarding earlier child modifications.
    pub fn delete(&mut self) -> Result<(), DataTreeError> {
        self.check_open()?;
        self.resolved.take();
        self.children.clear();
        self.modification_type = ModificationType::Delete;
        self.value = None;
        self.merge = false;
        Ok(())
    }

    /// Freezes this node and every descendant. Sealing twice is a no-op.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }
        self.sealed = true;
        for child in self.children.values_mut() {
            child.seal();
        }
    }

    /// The node this modification resolves to, computed by `resolve` on first
    /// use and cached until the next mutation.
    pub(crate) fn resolved_or_else(
        &self,
        resolve: impl FnOnce() -> Result<Option<Arc<TreeNode>>, DataTreeError>,
    ) -> Result<Option<Arc<TreeNode>>, DataTreeError> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(resolved.clone());
        }
        let resolved = resolve()?;
        let _ = self.resolved.set(resolved.clone());
        Ok(resolved)
    }

    fn check_open(&self) -> Result<(), DataTreeError> {
        if self.sealed {
            return Err(DataTreeError::IllegalState(format!(
                "modification of {} is sealed",
                self.identifier
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ContainerNode, LeafNode};
    use crate::tree::node::Version;
    #[cfg(feature = "proptest")]
    use proptest::prelude::*;

    fn original() -> Arc<TreeNode> {
        TreeNode::from_data(
            ContainerNode::container("a")
                .with_child(ContainerNode::container("b").with_child(LeafNode::new("x", 1i64)))
                .into(),
            Version::initial(),
        )
    }

    #[test]
    fn modify_child_captures_original_and_promotes() {
        let root = original();
        let mut modification = NodeModification::new(PathArgument::node("a"), Some(root.clone()));
        let b = modification.modify_child(&PathArgument::node("b")).expect("open");
        assert_eq!(b.modification_type(), ModificationType::Unmodified);
        assert!(Arc::ptr_eq(
            b.original().expect("b exists"),
            root.child(&PathArgument::node("b")).expect("b")
        ));
        let missing = modification
            .modify_child(&PathArgument::node("missing"))
            .expect("open");
        assert!(missing.original().is_none());
        assert_eq!(modification.modification_type(), ModificationType::SubtreeModified);
    }

    #[test]
    fn write_and_delete_clear_children() {
        let mut modification = NodeModification::new(PathArgument::node("a"), Some(original()));
        modification
            .modify_child(&PathArgument::node("b"))
            .and_then(|b| b.delete())
            .expect("open");
        assert!(modification.has_children());

        modification
            .write(ContainerNode::container("a").into())
            .expect("open");
        assert!(!modification.has_children());
        assert_eq!(modification.modification_type(), ModificationType::Write);

        modification.modify_child(&PathArgument::node("c")).expect("open");
        assert_eq!(modification.modification_type(), ModificationType::Write);

        modification.delete().expect("open");
        assert!(!modification.has_children());
        assert!(modification.value().is_none());
    }

    #[test]
    fn merge_intent_is_kept_until_replaced() {
        let mut modification = NodeModification::new(PathArgument::node("a"), None);
        modification
            .merge(ContainerNode::container("a").into())
            .expect("open");
        assert_eq!(modification.modification_type(), ModificationType::Write);
        assert!(modification.is_merge());

        modification
            .write(ContainerNode::container("a").into())
            .expect("open");
        assert!(!modification.is_merge());

        modification
            .merge(ContainerNode::container("a").into())
            .expect("open");
        modification.delete().expect("open");
        assert!(!modification.is_merge());
    }

    #[test]
    fn children_keep_insertion_order() {
        let mut modification = NodeModification::new(PathArgument::node("a"), None);
        for name in ["z", "a", "m"] {
            modification.modify_child(&PathArgument::node(name)).expect("open");
        }
        let order: Vec<_> = modification
            .children()
            .map(|child| child.identifier().to_string())
            .collect();
        assert_eq!(order, ["z", "a", "m"]);
    }

    #[test]
    fn mutation_invalidates_resolution() {
        let root = original();
        let mut modification = NodeModification::new(PathArgument::node("a"), Some(root.clone()));
        let first = modification
            .resolved_or_else(|| Ok(Some(root.clone())))
            .expect("resolved");
        assert!(first.is_some());
        let cached = modification
            .resolved_or_else(|| panic!("cached value must be reused"))
            .expect("resolved");
        assert!(cached.is_some());

        modification.delete().expect("open");
        let refreshed = modification.resolved_or_else(|| Ok(None)).expect("resolved");
        assert!(refreshed.is_none());
    }

    #[cfg(feature = "proptest")]
    proptest! {
        #[test]
        fn sealed_modifications_reject_every_mutation(
            names in proptest::collection::vec("[a-z]{1,4}", 1..8),
            seal_twice in any::<bool>(),
        ) {
            let mut modification = NodeModification::new(PathArgument::node("root"), None);
            for name in &names {
                let child = modification.modify_child(&PathArgument::node(name.as_str())).expect("open");
                child.write(LeafNode::new(name.as_str(), 1i64).into()).expect("open");
            }
            modification.seal();
            if seal_twice {
                modification.seal();
            }
            prop_assert!(modification.is_sealed());
            prop_assert!(modification.children().all(NodeModification::is_sealed));
            prop_assert!(modification.modify_child(&PathArgument::node("new")).is_err());
            prop_assert!(modification.write(ContainerNode::container("root").into()).is_err());
            prop_assert!(modification.delete().is_err());
            prop_assert_eq!(modification.children().count(), names.iter().collect::<std::collections::BTreeSet<_>>().len());
        }
    }
}
