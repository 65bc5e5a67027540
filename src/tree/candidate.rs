use std::sync::Arc;

use crate::data::NormalizedNode;
use crate::path::{InstanceIdentifier, PathArgument};

use super::modification::{ModificationType, NodeModification};
use super::node::{TreeNode, Version};
use super::TreeState;

/// A prepared modification: the diff between the tree it was prepared on
/// and the tree it will produce once committed.
///
/// Candidates are consumed by [`DataTree::commit`](super::DataTree::commit),
/// which rejects them if the tree moved in the meantime.
#[derive(Debug, Clone)]
pub struct DataTreeCandidate {
    root_path: InstanceIdentifier,
    root: CandidateNode,
    base: Arc<TreeState>,
    after: Arc<TreeNode>,
    version: Version,
}

impl DataTreeCandidate {
    pub(crate) fn new(
        root_path: InstanceIdentifier,
        root: CandidateNode,
        base: Arc<TreeState>,
        after: Arc<TreeNode>,
        version: Version,
    ) -> Self {
        DataTreeCandidate {
            root_path,
            root,
            base,
            after,
            version,
        }
    }

    pub fn root_path(&self) -> &InstanceIdentifier {
        &self.root_path
    }

    pub fn root_node(&self) -> &CandidateNode {
        &self.root
    }

    /// The version every node changed by this candidate is stamped with.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn before(&self) -> &Arc<TreeNode> {
        &self.base.root
    }

    pub fn after(&self) -> &Arc<TreeNode> {
        &self.after
    }

    pub(crate) fn base(&self) -> &Arc<TreeState> {
        &self.base
    }

    /// The candidate node at `path` relative to the candidate root.
    pub fn node(&self, path: &InstanceIdentifier) -> Option<&CandidateNode> {
        path.iter()
            .try_fold(&self.root, |node, argument| node.child(argument))
    }
}

/// One changed node of a [`DataTreeCandidate`].
#[derive(Debug, Clone)]
pub struct CandidateNode {
    identifier: PathArgument,
    modification_type: ModificationType,
    before: Option<Arc<TreeNode>>,
    after: Option<Arc<TreeNode>>,
    children: Vec<CandidateNode>,
}

impl CandidateNode {
    pub fn identifier(&self) -> &PathArgument {
        &self.identifier
    }

    pub fn modification_type(&self) -> ModificationType {
        self.modification_type
    }

    pub fn data_before(&self) -> Option<&NormalizedNode> {
        self.before.as_deref().map(TreeNode::data)
    }

    pub fn data_after(&self) -> Option<&NormalizedNode> {
        self.after.as_deref().map(TreeNode::data)
    }

    pub fn node_before(&self) -> Option<&Arc<TreeNode>> {
        self.before.as_ref()
    }

    pub fn node_after(&self) -> Option<&Arc<TreeNode>> {
        self.after.as_ref()
    }

    /// Changed children, in the order the modification first touched them.
    pub fn children(&self) -> &[CandidateNode] {
        &self.children
    }

    pub fn child(&self, argument: &PathArgument) -> Option<&CandidateNode> {
        self.children
            .iter()
            .find(|child| child.identifier == *argument)
    }

    /// Root node of a candidate that changes nothing.
    pub(crate) fn unmodified(before: Arc<TreeNode>, after: Arc<TreeNode>) -> Self {
        CandidateNode {
            identifier: before.identifier().clone(),
            modification_type: ModificationType::Unmodified,
            before: Some(before),
            after: Some(after),
            children: Vec::new(),
        }
    }

    /// Diffs `modification` between the node it was applied to and the node
    /// it produced. Returns `None` where nothing observable changed.
    pub(crate) fn build(
        modification: &NodeModification,
        before: Option<&Arc<TreeNode>>,
        after: Option<&Arc<TreeNode>>,
    ) -> Option<CandidateNode> {
        let leaf = |modification_type| CandidateNode {
            identifier: modification.identifier().clone(),
            modification_type,
            before: before.cloned(),
            after: after.cloned(),
            children: Vec::new(),
        };
        match (modification.modification_type(), before, after) {
            (ModificationType::Unmodified, _, _) | (_, None, None) => None,
            (ModificationType::Delete, _, _) => Some(leaf(ModificationType::Delete)),
            (ModificationType::Write, _, _) => Some(leaf(ModificationType::Write)),
            // Created implicitly by a modification below it.
            (ModificationType::SubtreeModified, None, Some(_)) => Some(leaf(ModificationType::Write)),
            (ModificationType::SubtreeModified, Some(_), None) => Some(leaf(ModificationType::Delete)),
            (ModificationType::SubtreeModified, Some(before_node), Some(after_node)) => {
                let children: Vec<CandidateNode> = modification
                    .children()
                    .filter_map(|child| {
                        let argument = child.identifier();
                        CandidateNode::build(child, before_node.child(argument), after_node.child(argument))
                    })
                    .collect();
                if children.is_empty() {
                    return None;
                }
                Some(CandidateNode {
                    children,
                    ..leaf(ModificationType::SubtreeModified)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ContainerNode, LeafNode};

    fn node(data: impl Into<NormalizedNode>, version: u64) -> Arc<TreeNode> {
        let mut v = Version::initial();
        for _ in 0..version {
            v = v.next();
        }
        TreeNode::from_data(data.into(), v)
    }

    #[test]
    fn delete_of_absent_node_is_skipped() {
        let mut modification = NodeModification::new(PathArgument::node("x"), None);
        modification.delete().expect("open");
        assert!(CandidateNode::build(&modification, None, None).is_none());
    }

    #[test]
    fn subtree_with_only_noop_children_is_skipped() {
        let before = node(ContainerNode::container("a"), 0);
        let after = node(ContainerNode::container("a"), 1);
        let mut modification = NodeModification::new(PathArgument::node("a"), Some(before.clone()));
        modification
            .modify_child(&PathArgument::node("gone"))
            .and_then(NodeModification::delete)
            .expect("open");
        assert!(CandidateNode::build(&modification, Some(&before), Some(&after)).is_none());
    }

    #[test]
    fn implicit_creation_reported_as_write() {
        let after = node(ContainerNode::container("a").with_child(LeafNode::new("x", 1i64)), 1);
        let mut modification = NodeModification::new(PathArgument::node("a"), None);
        modification
            .modify_child(&PathArgument::node("x"))
            .and_then(|x| x.write(LeafNode::new("x", 1i64).into()))
            .expect("open");
        let candidate = CandidateNode::build(&modification, None, Some(&after)).expect("changed");
        assert_eq!(candidate.modification_type(), ModificationType::Write);
        assert!(candidate.data_before().is_none());
        assert_eq!(candidate.data_after(), Some(after.data()));
    }
}
