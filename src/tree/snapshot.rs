use std::sync::Arc;

use tracing::trace;

use crate::data::{root_identifier, ContainerNode, NormalizedNode};
use crate::path::InstanceIdentifier;
use crate::schema::{ApplyOperation, SchemaContext, SchemaViolation};

use super::apply;
use super::modification::{ModificationType, NodeModification};
use super::node::{TreeNode, Version};
use super::{DataTreeError, TreeState};

/// An immutable view of the tree as of one commit.
#[derive(Debug, Clone)]
pub struct DataTreeSnapshot {
    state: Arc<TreeState>,
}

impl DataTreeSnapshot {
    pub(crate) fn new(state: Arc<TreeState>) -> Self {
        DataTreeSnapshot { state }
    }

    pub fn root(&self) -> &Arc<TreeNode> {
        &self.state.root
    }

    pub fn schema(&self) -> &Arc<SchemaContext> {
        &self.state.schema
    }

    /// The subtree version of the root, which grows with every commit.
    pub fn version(&self) -> Version {
        self.state.root.subtree_version()
    }

    pub fn node(&self, path: &InstanceIdentifier) -> Option<Arc<TreeNode>> {
        self.state.root.descendant(path.as_slice())
    }

    pub fn read(&self, path: &InstanceIdentifier) -> Option<NormalizedNode> {
        self.node(path).map(|node| node.data().clone())
    }

    pub fn exists(&self, path: &InstanceIdentifier) -> bool {
        self.node(path).is_some()
    }

    pub fn new_modification(&self) -> DataTreeModification {
        DataTreeModification {
            root: NodeModification::new(root_identifier(), Some(self.state.root.clone())),
            operation: ApplyOperation::root(&self.state.schema),
            snapshot: self.clone(),
        }
    }
}

/// Changes recorded against a snapshot.
///
/// Writes create missing parents on demand, merges keep existing children
/// that the merged data does not mention, and reads observe the
/// modification's own changes on top of the snapshot. Once [`ready`] seals
/// the modification every further change fails.
///
/// [`ready`]: DataTreeModification::ready
#[derive(Debug)]
pub struct DataTreeModification {
    snapshot: DataTreeSnapshot,
    root: NodeModification,
    operation: ApplyOperation,
}

impl DataTreeModification {
    pub fn snapshot(&self) -> &DataTreeSnapshot {
        &self.snapshot
    }

    pub(crate) fn root(&self) -> &NodeModification {
        &self.root
    }

    pub fn is_sealed(&self) -> bool {
        self.root.is_sealed()
    }

    /// Seals the modification. Calling it again has no effect.
    pub fn ready(&mut self) {
        self.root.seal();
    }

    /// Replaces the node at `path` with `data`.
    pub fn write(&mut self, path: &InstanceIdentifier, data: NormalizedNode) -> Result<(), DataTreeError> {
        self.check_open()?;
        check_identifier(path, &data)?;
        ApplyOperation::for_path(self.snapshot.schema(), path)?.verify(path, &data)?;
        trace!(%path, "write");
        self.modification_mut(path)?.write(data)
    }

    /// Merges `data` into the node at `path`. Containers visible to this
    /// modification are merged child by child and leaves are replaced. A node
    /// missing here is merged into whatever exists at commit time.
    pub fn merge(&mut self, path: &InstanceIdentifier, data: NormalizedNode) -> Result<(), DataTreeError> {
        self.check_open()?;
        check_identifier(path, &data)?;
        ApplyOperation::for_path(self.snapshot.schema(), path)?.verify_partial(path, &data)?;
        let existing = self.read(path)?;
        trace!(%path, "merge");
        merge_into(self.modification_mut(path)?, data, existing.as_ref())
    }

    /// Removes the node at `path`. Deleting the root empties the tree.
    pub fn delete(&mut self, path: &InstanceIdentifier) -> Result<(), DataTreeError> {
        self.check_open()?;
        if path.is_root() {
            return self.write(path, ContainerNode::root().into());
        }
        ApplyOperation::for_path(self.snapshot.schema(), path)?;
        if self.deleted_ancestor(path) {
            return Ok(());
        }
        trace!(%path, "delete");
        self.modification_mut(path)?.delete()
    }

    /// Reads `path` as it would look if this modification were committed on
    /// top of its snapshot.
    pub fn read(&self, path: &InstanceIdentifier) -> Result<Option<NormalizedNode>, DataTreeError> {
        Ok(self.node(path)?.map(|node| node.data().clone()))
    }

    pub fn exists(&self, path: &InstanceIdentifier) -> Result<bool, DataTreeError> {
        Ok(self.node(path)?.is_some())
    }

    pub fn node(&self, path: &InstanceIdentifier) -> Result<Option<Arc<TreeNode>>, DataTreeError> {
        let mut operation = self.operation.clone();
        let mut node = &self.root;
        let mut depth = 0;
        for argument in path {
            if matches!(
                node.modification_type(),
                ModificationType::Write | ModificationType::Delete
            ) {
                break;
            }
            let Some(child) = node.child(argument) else {
                break;
            };
            operation = operation.child(argument).ok_or_else(|| {
                DataTreeError::IllegalState(format!("{} is modified but not in the schema", path.prefix(depth + 1)))
            })?;
            node = child;
            depth += 1;
        }

        let resolved = apply::resolve(&operation, &path.prefix(depth), node, self.snapshot.version().next())?;
        Ok(resolved.and_then(|resolved| resolved.descendant(&path.as_slice()[depth..])))
    }

    fn check_open(&self) -> Result<(), DataTreeError> {
        if self.is_sealed() {
            return Err(DataTreeError::IllegalState("modification is sealed".to_owned()));
        }
        Ok(())
    }

    /// Whether a strict ancestor of `path` is already deleted.
    fn deleted_ancestor(&self, path: &InstanceIdentifier) -> bool {
        let mut node = &self.root;
        for argument in path {
            if node.modification_type() == ModificationType::Delete {
                return true;
            }
            match node.child(argument) {
                Some(child) => node = child,
                None => return false,
            }
        }
        false
    }

    /// The modification node for `path`, creating it and its ancestors.
    /// Deleted ancestors become empty containers again.
    fn modification_mut(&mut self, path: &InstanceIdentifier) -> Result<&mut NodeModification, DataTreeError> {
        let mut operation = self.operation.clone();
        let mut node = &mut self.root;
        for (depth, argument) in path.iter().enumerate() {
            if node.modification_type() == ModificationType::Delete {
                let empty = operation.empty_container(node.identifier()).ok_or_else(|| {
                    DataTreeError::IllegalState(format!("{} cannot hold children", path.prefix(depth)))
                })?;
                node.write(empty)?;
            }
            operation = operation.child(argument).ok_or_else(|| {
                SchemaViolation::new(path.prefix(depth + 1), "node is not allowed by the schema")
            })?;
            node = node.modify_child(argument)?;
        }
        Ok(node)
    }
}

fn check_identifier(path: &InstanceIdentifier, data: &NormalizedNode) -> Result<(), DataTreeError> {
    let expected = path.last().cloned().unwrap_or_else(root_identifier);
    if *data.identifier() != expected {
        return Err(DataTreeError::DataValidationFailed {
            path: path.clone(),
            message: format!("data identifier {} does not match the path", data.identifier()),
        });
    }
    Ok(())
}

fn merge_into(
    node: &mut NodeModification,
    data: NormalizedNode,
    existing: Option<&NormalizedNode>,
) -> Result<(), DataTreeError> {
    match (node.modification_type(), data, existing) {
        (ModificationType::Delete, data, _) => node.write(data),
        (_, NormalizedNode::Container(incoming), Some(NormalizedNode::Container(current))) => {
            for (argument, child) in incoming.children() {
                merge_into(node.modify_child(argument)?, child.clone(), current.child(argument))?;
            }
            Ok(())
        }
        (ModificationType::Write, data, _) if !node.is_merge() => node.write(data),
        (_, data, _) => node.merge(data),
    }
}
