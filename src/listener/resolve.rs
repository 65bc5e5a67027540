//! Turning a committed candidate into per-listener events.
//!
//! The candidate is walked top-down together with every listener node that
//! matches the current path, including wildcard nodes registered for all
//! entries of a list. Each step produces an event describing the changes at
//! and below it; events are attached to the listener nodes they concern and
//! bubble up to be merged into their parents' events.
//!
//! A node that was written or removed yields a [`DataChangeScope::Base`]
//! event. A node whose children changed yields a [`DataChangeScope::One`]
//! event for direct child changes and a [`DataChangeScope::Subtree`] event
//! covering everything below. A listener receives the merge of all events at
//! its node whose scope does not exceed its own.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::data::{ContainerNode, NormalizedNode};
use crate::path::{InstanceIdentifier, PathArgument};
use crate::tree::{CandidateNode, DataTreeCandidate, ModificationType};

use super::event::DataChangeEvent;
use super::tree::{ListenerNodeRef, ListenerTree};
use super::{DataChangeListener, DataChangeScope};

/// One event for one listener.
pub(crate) struct Notification {
    pub(crate) listener: Arc<dyn DataChangeListener>,
    pub(crate) event: Arc<DataChangeEvent>,
}

#[derive(Clone, Copy)]
enum Change {
    Created,
    Removed,
}

pub(crate) fn resolve_notifications(listeners: &ListenerTree, candidate: &DataTreeCandidate) -> Vec<Notification> {
    let walker = listeners.walker();
    let root = walker.root();
    if root.is_empty() {
        return Vec::new();
    }
    let mut resolver = Resolver {
        events: IndexMap::new(),
    };
    resolver.any_change(candidate.root_path(), &[root], candidate.root_node());
    let notifications = resolver.into_notifications();
    trace!(
        version = candidate.version().get(),
        count = notifications.len(),
        "resolved change notifications"
    );
    notifications
}

struct Resolver<'a> {
    events: IndexMap<usize, (ListenerNodeRef<'a>, Vec<Arc<DataChangeEvent>>)>,
}

impl<'a> Resolver<'a> {
    fn any_change(
        &mut self,
        path: &InstanceIdentifier,
        listeners: &[ListenerNodeRef<'a>],
        node: &CandidateNode,
    ) -> Option<Arc<DataChangeEvent>> {
        match (node.modification_type(), node.data_before(), node.data_after()) {
            (ModificationType::Unmodified, _, _) | (_, None, None) => None,
            (ModificationType::SubtreeModified, Some(before), Some(after)) => {
                self.subtree_change(path, listeners, node, before, after)
            }
            (_, Some(before), Some(after)) => self.replaced(path, listeners, before, after),
            (_, None, Some(after)) => self.same_recursively(path, listeners, after, Change::Created),
            (_, Some(before), None) => self.same_recursively(path, listeners, before, Change::Removed),
        }
    }

    fn replaced(
        &mut self,
        path: &InstanceIdentifier,
        listeners: &[ListenerNodeRef<'a>],
        before: &NormalizedNode,
        after: &NormalizedNode,
    ) -> Option<Arc<DataChangeEvent>> {
        if before == after {
            return None;
        }
        match (before, after) {
            (NormalizedNode::Container(before_container), NormalizedNode::Container(after_container)) => {
                self.container_replaced(path, listeners, before, after, before_container, after_container)
            }
            _ => {
                let event = DataChangeEvent::builder(DataChangeScope::Base)
                    .before(before)
                    .after(after)
                    .updated(path, before, after)
                    .build();
                Some(self.add(listeners, event))
            }
        }
    }

    fn container_replaced(
        &mut self,
        path: &InstanceIdentifier,
        listeners: &[ListenerNodeRef<'a>],
        before: &NormalizedNode,
        after: &NormalizedNode,
        before_container: &ContainerNode,
        after_container: &ContainerNode,
    ) -> Option<Arc<DataChangeEvent>> {
        let mut changes = Vec::new();
        for (argument, before_child) in before_container.children() {
            let child_path = path.child(argument.clone());
            let child_listeners = listener_children(listeners, argument);
            let change = match after_container.child(argument) {
                Some(after_child) => self.replaced(&child_path, &child_listeners, before_child, after_child),
                None => self.same_recursively(&child_path, &child_listeners, before_child, Change::Removed),
            };
            changes.extend(change);
        }
        for (argument, after_child) in after_container.children() {
            if before_container.child(argument).is_some() {
                continue;
            }
            let child_path = path.child(argument.clone());
            let child_listeners = listener_children(listeners, argument);
            changes.extend(self.same_recursively(&child_path, &child_listeners, after_child, Change::Created));
        }
        if changes.is_empty() {
            return None;
        }

        let mut builder = DataChangeEvent::builder(DataChangeScope::Base)
            .before(before)
            .after(after)
            .updated(path, before, after);
        for change in &changes {
            builder.merge(change);
        }
        Some(self.add(listeners, builder.build()))
    }

    /// Reports `data` and everything below it as created or removed.
    fn same_recursively(
        &mut self,
        path: &InstanceIdentifier,
        listeners: &[ListenerNodeRef<'a>],
        data: &NormalizedNode,
        change: Change,
    ) -> Option<Arc<DataChangeEvent>> {
        let builder = DataChangeEvent::builder(DataChangeScope::Base);
        let mut builder = match change {
            Change::Created => builder.created(path, data).after(data),
            Change::Removed => builder.removed(path, data).before(data),
        };
        if let NormalizedNode::Container(container) = data {
            for (argument, child) in container.children() {
                let child_listeners = listener_children(listeners, argument);
                let child_path = path.child(argument.clone());
                if let Some(event) = self.same_recursively(&child_path, &child_listeners, child, change) {
                    builder.merge(&event);
                }
            }
        }
        let event = builder.build();
        Some(self.add(listeners, event))
    }

    fn subtree_change(
        &mut self,
        path: &InstanceIdentifier,
        listeners: &[ListenerNodeRef<'a>],
        node: &CandidateNode,
        before: &NormalizedNode,
        after: &NormalizedNode,
    ) -> Option<Arc<DataChangeEvent>> {
        let mut one = DataChangeEvent::builder(DataChangeScope::One)
            .before(before)
            .after(after);
        let mut subtree = DataChangeEvent::builder(DataChangeScope::Subtree)
            .before(before)
            .after(after);
        let mut one_modified = false;

        for child in node.children() {
            let argument = child.identifier();
            let child_path = path.child(argument.clone());
            let child_listeners = listener_children(listeners, argument);
            match child.modification_type() {
                ModificationType::Write | ModificationType::Delete => {
                    if let Some(event) = self.any_change(&child_path, &child_listeners, child) {
                        one.merge(&event);
                        one_modified = true;
                    }
                }
                ModificationType::SubtreeModified => {
                    if let Some(event) = self.any_change(&child_path, &child_listeners, child) {
                        subtree.merge(&event);
                    }
                }
                ModificationType::Unmodified => {}
            }
        }

        let one = one.build();
        subtree.merge(&one);
        let subtree = subtree.build();
        if subtree.is_empty() {
            return None;
        }
        if one_modified {
            self.add(listeners, one);
        }
        Some(self.add(listeners, subtree))
    }

    /// Attaches `event` to every listener node in `listeners` that holds
    /// registrations.
    fn add(&mut self, listeners: &[ListenerNodeRef<'a>], event: DataChangeEvent) -> Arc<DataChangeEvent> {
        let event = Arc::new(event);
        for node in listeners {
            if node.has_listeners() {
                self.events
                    .entry(node.index())
                    .or_insert_with(|| (*node, Vec::new()))
                    .1
                    .push(event.clone());
            }
        }
        event
    }

    fn into_notifications(self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        for (_, (node, events)) in self.events {
            let merged = merge_by_scope(&events);
            for (scope, listener) in node.listeners() {
                if let Some(event) = &merged[scope as usize] {
                    notifications.push(Notification {
                        listener: listener.clone(),
                        event: event.clone(),
                    });
                }
            }
        }
        notifications
    }
}

/// Listener nodes below `listeners` matching `argument`, wildcard matches
/// first.
fn listener_children<'a>(listeners: &[ListenerNodeRef<'a>], argument: &PathArgument) -> Vec<ListenerNodeRef<'a>> {
    if listeners.is_empty() {
        return Vec::new();
    }
    let mut children = Vec::new();
    if let Some(wildcard) = argument.wildcard() {
        children.extend(listeners.iter().filter_map(|node| node.child(&wildcard)));
    }
    children.extend(listeners.iter().filter_map(|node| node.child(argument)));
    children
}

/// For each scope, the merge of all events whose scope does not exceed it.
fn merge_by_scope(events: &[Arc<DataChangeEvent>]) -> [Option<Arc<DataChangeEvent>>; 3] {
    DataChangeScope::ALL.map(|scope| {
        let mut matching = events.iter().filter(|event| event.scope() <= scope);
        let first = matching.next()?;
        let Some(second) = matching.next() else {
            return Some(first.clone());
        };
        let mut builder = DataChangeEvent::builder(scope);
        builder.merge(first).merge(second);
        for event in matching {
            builder.merge(event);
        }
        Some(Arc::new(builder.build()))
    })
}
