use im::{OrdMap, OrdSet};

use crate::data::NormalizedNode;
use crate::path::InstanceIdentifier;

use super::DataChangeScope;

/// The changes one commit made within a listener's scope.
///
/// Paths are absolute. A replaced node appears in both
/// [`original_data`](Self::original_data) and
/// [`updated_data`](Self::updated_data); a removed node appears in
/// [`original_data`](Self::original_data) and
/// [`removed_paths`](Self::removed_paths).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataChangeEvent {
    scope: DataChangeScope,
    created: OrdMap<InstanceIdentifier, NormalizedNode>,
    updated: OrdMap<InstanceIdentifier, NormalizedNode>,
    original: OrdMap<InstanceIdentifier, NormalizedNode>,
    removed: OrdSet<InstanceIdentifier>,
    original_subtree: Option<NormalizedNode>,
    updated_subtree: Option<NormalizedNode>,
}

impl DataChangeEvent {
    pub(crate) fn builder(scope: DataChangeScope) -> DataChangeEventBuilder {
        DataChangeEventBuilder {
            event: DataChangeEvent {
                scope,
                created: OrdMap::new(),
                updated: OrdMap::new(),
                original: OrdMap::new(),
                removed: OrdSet::new(),
                original_subtree: None,
                updated_subtree: None,
            },
        }
    }

    pub fn scope(&self) -> DataChangeScope {
        self.scope
    }

    pub fn created_data(&self) -> &OrdMap<InstanceIdentifier, NormalizedNode> {
        &self.created
    }

    /// New data of replaced nodes.
    pub fn updated_data(&self) -> &OrdMap<InstanceIdentifier, NormalizedNode> {
        &self.updated
    }

    /// Previous data of replaced and removed nodes.
    pub fn original_data(&self) -> &OrdMap<InstanceIdentifier, NormalizedNode> {
        &self.original
    }

    pub fn removed_paths(&self) -> &OrdSet<InstanceIdentifier> {
        &self.removed
    }

    /// The listener's node before the commit.
    pub fn original_subtree(&self) -> Option<&NormalizedNode> {
        self.original_subtree.as_ref()
    }

    /// The listener's node after the commit.
    pub fn updated_subtree(&self) -> Option<&NormalizedNode> {
        self.updated_subtree.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

pub(crate) struct DataChangeEventBuilder {
    event: DataChangeEvent,
}

impl DataChangeEventBuilder {
    pub(crate) fn before(mut self, data: &NormalizedNode) -> Self {
        self.event.original_subtree = Some(data.clone());
        self
    }

    pub(crate) fn after(mut self, data: &NormalizedNode) -> Self {
        self.event.updated_subtree = Some(data.clone());
        self
    }

    pub(crate) fn created(mut self, path: &InstanceIdentifier, after: &NormalizedNode) -> Self {
        self.event.created.insert(path.clone(), after.clone());
        self
    }

    pub(crate) fn updated(
        mut self,
        path: &InstanceIdentifier,
        before: &NormalizedNode,
        after: &NormalizedNode,
    ) -> Self {
        self.event.original.insert(path.clone(), before.clone());
        self.event.updated.insert(path.clone(), after.clone());
        self
    }

    pub(crate) fn removed(mut self, path: &InstanceIdentifier, before: &NormalizedNode) -> Self {
        self.event.original.insert(path.clone(), before.clone());
        self.event.removed.insert(path.clone());
        self
    }

    /// Takes over every change recorded in `other`. The subtrees are only
    /// taken when this builder has none of its own.
    pub(crate) fn merge(&mut self, other: &DataChangeEvent) -> &mut Self {
        let event = &mut self.event;
        event.created = other.created.clone().union(std::mem::take(&mut event.created));
        event.updated = other.updated.clone().union(std::mem::take(&mut event.updated));
        event.original = other.original.clone().union(std::mem::take(&mut event.original));
        event.removed = other.removed.clone().union(std::mem::take(&mut event.removed));
        if event.original_subtree.is_none() {
            event.original_subtree = other.original_subtree.clone();
        }
        if event.updated_subtree.is_none() {
            event.updated_subtree = other.updated_subtree.clone();
        }
        self
    }

    pub(crate) fn build(self) -> DataChangeEvent {
        self.event
    }
}
