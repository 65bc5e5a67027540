//! Checking and applying modifications against a tree.
//!
//! [`check_applicable`] decides whether a sealed modification can be applied
//! to the current tree: the written data must conform to the schema, removals
//! must respect mandatory nodes and list keys, and every node that was
//! written or deleted must still carry the versions the modification saw when
//! it captured its original. Nodes that were only modified below are not
//! version checked, so transactions touching disjoint subtrees never conflict.
//! A merge only conflicts when the node it saw was changed by someone else;
//! a node created concurrently is merged into.
//!
//! [`apply`] then produces the new versioned nodes, sharing everything the
//! modification did not touch.

use std::sync::Arc;

use crate::data::NormalizedNode;
use crate::path::{InstanceIdentifier, PathArgument};
use crate::schema::{ApplyOperation, SchemaViolation};

use super::modification::{ModificationType, NodeModification};
use super::node::{TreeNode, TreeNodeBuilder, Version};
use super::DataTreeError;

/// What a modification is checked against.
#[derive(Clone, Copy)]
enum Base<'a> {
    /// Committed nodes; conflicts are detected against these.
    Tree(Option<&'a Arc<TreeNode>>),
    /// Data written earlier in the same modification.
    Written(Option<&'a NormalizedNode>),
}

impl<'a> Base<'a> {
    fn child(self, argument: &PathArgument) -> Base<'a> {
        match self {
            Base::Tree(node) => Base::Tree(node.and_then(|node| node.child(argument))),
            Base::Written(data) => Base::Written(data.and_then(|data| data.child(argument))),
        }
    }

    fn exists(self) -> bool {
        match self {
            Base::Tree(node) => node.is_some(),
            Base::Written(data) => data.is_some(),
        }
    }
}

pub(crate) fn check_applicable(
    operation: &ApplyOperation,
    path: &InstanceIdentifier,
    modification: &NodeModification,
    current: Option<&Arc<TreeNode>>,
) -> Result<(), DataTreeError> {
    check_node(operation, path, modification, Base::Tree(current))
}

fn check_node(
    operation: &ApplyOperation,
    path: &InstanceIdentifier,
    modification: &NodeModification,
    base: Base<'_>,
) -> Result<(), DataTreeError> {
    match modification.modification_type() {
        ModificationType::Unmodified => Ok(()),
        ModificationType::Delete => {
            if let Base::Tree(current) = base {
                check_not_conflicting(path, modification.original(), current)?;
            }
            Ok(())
        }
        ModificationType::Write if modification.is_merge() => {
            if let Base::Tree(current) = base {
                check_merge_not_conflicting(path, modification.original(), current)?;
            }
            let value = modification.value().ok_or_else(|| missing_value(path))?;
            if base.exists() {
                operation.verify_partial(path, value)?;
            } else {
                operation.verify(path, value)?;
            }
            check_children(operation, path, modification, Base::Written(Some(value)))
        }
        ModificationType::Write => {
            if let Base::Tree(current) = base {
                check_not_conflicting(path, modification.original(), current)?;
            }
            let value = modification.value().ok_or_else(|| missing_value(path))?;
            operation.verify(path, value)?;
            check_children(operation, path, modification, Base::Written(Some(value)))
        }
        ModificationType::SubtreeModified => {
            if let (Base::Tree(None), Some(original)) = (base, modification.original()) {
                return Err(DataTreeError::ConflictingVersion {
                    path: path.clone(),
                    message: "node was deleted by another transaction".to_owned(),
                    expected: Some(original.subtree_version()),
                    actual: None,
                });
            }
            if !base.exists() && creates_node(modification) {
                operation.check_mandatory(path, |argument| {
                    operation.is_key_leaf(argument) || modification.child(argument).is_some_and(creates_node)
                })?;
            }
            check_children(operation, path, modification, base)
        }
    }
}

fn check_children(
    operation: &ApplyOperation,
    path: &InstanceIdentifier,
    modification: &NodeModification,
    base: Base<'_>,
) -> Result<(), DataTreeError> {
    for child in modification.children() {
        let argument = child.identifier();
        let child_path = path.child(argument.clone());
        let child_operation = operation.child(argument).ok_or_else(|| {
            SchemaViolation::new(child_path.clone(), "node is not allowed by the schema")
        })?;

        match child.modification_type() {
            ModificationType::Delete if child_operation.is_mandatory() => {
                return Err(DataTreeError::DataPreconditionFailed {
                    path: child_path,
                    message: "mandatory node cannot be deleted".to_owned(),
                });
            }
            ModificationType::Delete if operation.is_key_leaf(argument) => {
                return Err(DataTreeError::DataPreconditionFailed {
                    path: child_path,
                    message: "list key leaf cannot be deleted".to_owned(),
                });
            }
            ModificationType::Write if operation.is_key_leaf(argument) => {
                let expected = modification
                    .identifier()
                    .keys()
                    .and_then(|keys| keys.get(argument.node_type()));
                let actual = child.value().and_then(NormalizedNode::value);
                if expected != actual {
                    return Err(DataTreeError::DataValidationFailed {
                        path: child_path,
                        message: "list key leaf must keep the value of the entry predicate".to_owned(),
                    });
                }
            }
            _ => {}
        }

        check_node(&child_operation, &child_path, child, base.child(argument))?;
    }
    Ok(())
}

/// Whether applying `modification` to a missing node leaves a node behind.
/// Deletes below a missing node create nothing.
fn creates_node(modification: &NodeModification) -> bool {
    match modification.modification_type() {
        ModificationType::Write => true,
        ModificationType::SubtreeModified => modification.children().any(creates_node),
        ModificationType::Unmodified | ModificationType::Delete => false,
    }
}

/// A merge conflicts only with a concurrent change to data it had already
/// seen. Identical data is accepted whatever its versions.
fn check_merge_not_conflicting(
    path: &InstanceIdentifier,
    original: Option<&Arc<TreeNode>>,
    current: Option<&Arc<TreeNode>>,
) -> Result<(), DataTreeError> {
    match (original, current) {
        (Some(original), Some(current)) if original.data() != current.data() => {
            check_not_conflicting(path, Some(original), Some(current))
        }
        _ => Ok(()),
    }
}

/// Fails unless `current` still is the node `original` was captured from.
fn check_not_conflicting(
    path: &InstanceIdentifier,
    original: Option<&Arc<TreeNode>>,
    current: Option<&Arc<TreeNode>>,
) -> Result<(), DataTreeError> {
    let conflict = |message: &str, expected, actual| DataTreeError::ConflictingVersion {
        path: path.clone(),
        message: message.to_owned(),
        expected,
        actual,
    };
    match (original, current) {
        (None, None) => Ok(()),
        (Some(original), None) => Err(conflict(
            "node was deleted by another transaction",
            Some(original.subtree_version()),
            None,
        )),
        (None, Some(current)) => Err(conflict(
            "node was created by another transaction",
            None,
            Some(current.subtree_version()),
        )),
        (Some(original), Some(current)) if Arc::ptr_eq(original, current) => Ok(()),
        (Some(original), Some(current)) => {
            if original.node_version() != current.node_version() {
                return Err(conflict(
                    "node was replaced by another transaction",
                    Some(original.node_version()),
                    Some(current.node_version()),
                ));
            }
            if original.subtree_version() != current.subtree_version() {
                return Err(conflict(
                    "node children were modified by another transaction",
                    Some(original.subtree_version()),
                    Some(current.subtree_version()),
                ));
            }
            Ok(())
        }
    }
}

/// Applies `modification` on top of `current`, stamping changed nodes with
/// `version`. Returns `None` when the node does not exist afterwards.
pub(crate) fn apply(
    operation: &ApplyOperation,
    path: &InstanceIdentifier,
    modification: &NodeModification,
    current: Option<&Arc<TreeNode>>,
    version: Version,
) -> Result<Option<Arc<TreeNode>>, DataTreeError> {
    match modification.modification_type() {
        ModificationType::Unmodified => Ok(current.cloned()),
        ModificationType::Delete => Ok(None),
        ModificationType::Write => {
            let value = modification.value().ok_or_else(|| missing_value(path))?;
            let written = match current {
                Some(current) if modification.is_merge() => merge_node(path, current, value, version)?,
                _ => TreeNode::from_data(value.clone(), version),
            };
            if !modification.has_children() {
                return Ok(Some(written));
            }
            let (node, _) = apply_children(operation, path, modification, &written, version)?;
            Ok(Some(node))
        }
        ModificationType::SubtreeModified => match current {
            Some(current) => {
                let (node, _) = apply_children(operation, path, modification, current, version)?;
                Ok(Some(node))
            }
            None => {
                let empty = operation
                    .empty_container(modification.identifier())
                    .ok_or_else(|| DataTreeError::IllegalState(format!("{path} cannot be created implicitly")))?;
                let created = TreeNode::from_data(empty, version);
                let (node, populated) = apply_children(operation, path, modification, &created, version)?;
                Ok(populated.then_some(node))
            }
        },
    }
}

/// Merges `data` into `current`. Containers keep the children `data` does
/// not mention, leaves are replaced.
fn merge_node(
    path: &InstanceIdentifier,
    current: &Arc<TreeNode>,
    data: &NormalizedNode,
    version: Version,
) -> Result<Arc<TreeNode>, DataTreeError> {
    let NormalizedNode::Container(incoming) = data else {
        return Ok(TreeNode::from_data(data.clone(), version));
    };
    let mut builder = TreeNodeBuilder::from_node(current, version)
        .ok_or_else(|| DataTreeError::IllegalState(format!("{path} is a leaf and cannot be merged into")))?;
    for (argument, child) in incoming.children() {
        let node = match current.child(argument) {
            Some(existing) => merge_node(&path.child(argument.clone()), existing, child, version)?,
            None => TreeNode::from_data(child.clone(), version),
        };
        builder.add_child(node);
    }
    Ok(builder.build())
}

/// Rebuilds `base` with every child modification applied. The flag reports
/// whether any modified child exists afterwards.
fn apply_children(
    operation: &ApplyOperation,
    path: &InstanceIdentifier,
    modification: &NodeModification,
    base: &Arc<TreeNode>,
    version: Version,
) -> Result<(Arc<TreeNode>, bool), DataTreeError> {
    let mut builder = TreeNodeBuilder::from_node(base, version)
        .ok_or_else(|| DataTreeError::IllegalState(format!("{path} is a leaf and cannot have children")))?;
    let mut populated = false;
    for child in modification.children() {
        if child.modification_type() == ModificationType::Unmodified {
            continue;
        }
        let argument = child.identifier();
        let child_path = path.child(argument.clone());
        let child_operation = operation.child(argument).ok_or_else(|| {
            SchemaViolation::new(child_path.clone(), "node is not allowed by the schema")
        })?;
        match apply(&child_operation, &child_path, child, base.child(argument), version)? {
            Some(node) => {
                populated = true;
                builder.add_child(node);
            }
            None => {
                builder.remove_child(argument);
            }
        }
    }
    Ok((builder.build(), populated))
}

/// The node `modification` resolves to on top of its own original, cached on
/// the modification until it changes again.
pub(crate) fn resolve(
    operation: &ApplyOperation,
    path: &InstanceIdentifier,
    modification: &NodeModification,
    version: Version,
) -> Result<Option<Arc<TreeNode>>, DataTreeError> {
    modification.resolved_or_else(|| apply(operation, path, modification, modification.original(), version))
}

fn missing_value(path: &InstanceIdentifier) -> DataTreeError {
    DataTreeError::IllegalState(format!("write at {path} carries no value"))
}
