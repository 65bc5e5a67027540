//! Path-indexed listener registrations.
//!
//! Nodes live in an arena and refer to their parent by index, so walking up
//! for pruning needs no owning back-references. A node exists only while it
//! or one of its descendants holds a registration; the root is permanent.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::trace;

use crate::path::{InstanceIdentifier, PathArgument};

use super::{DataChangeListener, DataChangeScope};

const ROOT: usize = 0;

pub(crate) struct Registration {
    id: u64,
    scope: DataChangeScope,
    listener: Arc<dyn DataChangeListener>,
}

struct ListenerNode {
    identifier: Option<PathArgument>,
    parent: Option<usize>,
    children: HashMap<PathArgument, usize>,
    registrations: Vec<Registration>,
}

impl ListenerNode {
    fn new(identifier: Option<PathArgument>, parent: Option<usize>) -> Self {
        ListenerNode {
            identifier,
            parent,
            children: HashMap::new(),
            registrations: Vec::new(),
        }
    }
}

struct Arena {
    nodes: Vec<Option<ListenerNode>>,
    free: Vec<usize>,
}

impl Arena {
    fn node(&self, index: usize) -> Option<&ListenerNode> {
        self.nodes.get(index).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut ListenerNode> {
        self.nodes.get_mut(index).and_then(Option::as_mut)
    }

    fn allocate(&mut self, node: ListenerNode) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// The node for `argument` below `parent`, created if missing.
    fn child_or_insert(&mut self, parent: usize, argument: &PathArgument) -> usize {
        if let Some(&index) = self.node(parent).and_then(|node| node.children.get(argument)) {
            return index;
        }
        let index = self.allocate(ListenerNode::new(Some(argument.clone()), Some(parent)));
        if let Some(node) = self.node_mut(parent) {
            node.children.insert(argument.clone(), index);
        }
        index
    }

    /// Removes empty nodes from `index` upwards.
    fn prune(&mut self, mut index: usize) -> usize {
        let mut removed = 0;
        while index != ROOT {
            let Some(node) = self.node(index) else {
                break;
            };
            if !node.registrations.is_empty() || !node.children.is_empty() {
                break;
            }
            let parent = node.parent;
            let identifier = node.identifier.clone();
            self.nodes[index] = None;
            self.free.push(index);
            removed += 1;
            match (parent, identifier) {
                (Some(parent), Some(identifier)) => {
                    if let Some(parent_node) = self.node_mut(parent) {
                        parent_node.children.remove(&identifier);
                    }
                    index = parent;
                }
                _ => break,
            }
        }
        removed
    }
}

/// The registry of data change listeners of one data tree.
pub struct ListenerTree {
    arena: RwLock<Arena>,
    next_id: AtomicU64,
}

impl ListenerTree {
    pub fn new() -> Self {
        ListenerTree {
            arena: RwLock::new(Arena {
                nodes: vec![Some(ListenerNode::new(None, None))],
                free: Vec::new(),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Attaches `listener` at `path`. The listener stays registered until the
    /// returned handle is closed or dropped.
    pub fn register(
        self: &Arc<Self>,
        path: &InstanceIdentifier,
        listener: Arc<dyn DataChangeListener>,
        scope: DataChangeScope,
    ) -> ListenerRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut arena = self.write();
        let node = path
            .iter()
            .fold(ROOT, |index, argument| arena.child_or_insert(index, argument));
        if let Some(target) = arena.node_mut(node) {
            target.registrations.push(Registration { id, scope, listener });
        }
        trace!(%path, %scope, id, "listener registered");
        ListenerRegistration {
            tree: Arc::downgrade(self),
            path: path.clone(),
            node,
            id,
            closed: false,
        }
    }

    /// Read access to the registrations. Registering and closing wait until
    /// the walker is dropped.
    pub fn walker(&self) -> Walker<'_> {
        Walker {
            arena: self.arena.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Number of live nodes, including the root.
    pub fn node_count(&self) -> usize {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        arena.nodes.len() - arena.free.len()
    }

    pub fn contains_node(&self, path: &InstanceIdentifier) -> bool {
        let walker = self.walker();
        let mut node = walker.root();
        for argument in path {
            match node.child(argument) {
                Some(child) => node = child,
                None => return false,
            }
        }
        true
    }

    fn unregister(&self, node: usize, id: u64) {
        let mut arena = self.write();
        if let Some(target) = arena.node_mut(node) {
            target.registrations.retain(|registration| registration.id != id);
        }
        let pruned = arena.prune(node);
        trace!(id, pruned, "listener closed");
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ListenerTree {
    fn default() -> Self {
        ListenerTree::new()
    }
}

impl fmt::Debug for ListenerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerTree")
            .field("nodes", &self.node_count())
            .finish()
    }
}

/// Holds the listener tree's read lock for as long as it lives.
pub struct Walker<'a> {
    arena: RwLockReadGuard<'a, Arena>,
}

impl Walker<'_> {
    pub fn root(&self) -> ListenerNodeRef<'_> {
        ListenerNodeRef {
            arena: &*self.arena,
            index: ROOT,
        }
    }
}

/// A node of the listener tree, valid while its [`Walker`] is.
#[derive(Clone, Copy)]
pub struct ListenerNodeRef<'a> {
    arena: &'a Arena,
    index: usize,
}

impl<'a> ListenerNodeRef<'a> {
    fn node(&self) -> &'a ListenerNode {
        match self.arena.node(self.index) {
            Some(node) => node,
            None => unreachable!("listener node references are only handed out for live nodes"),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// `None` for the root.
    pub fn identifier(&self) -> Option<&'a PathArgument> {
        self.node().identifier.as_ref()
    }

    pub fn child(&self, argument: &PathArgument) -> Option<ListenerNodeRef<'a>> {
        let index = *self.node().children.get(argument)?;
        Some(ListenerNodeRef {
            arena: self.arena,
            index,
        })
    }

    pub fn children(&self) -> impl Iterator<Item = ListenerNodeRef<'a>> + 'a {
        let arena = self.arena;
        self.node()
            .children
            .values()
            .map(move |&index| ListenerNodeRef { arena, index })
    }

    pub fn parent(&self) -> Option<ListenerNodeRef<'a>> {
        let index = self.node().parent?;
        Some(ListenerNodeRef {
            arena: self.arena,
            index,
        })
    }

    pub fn has_listeners(&self) -> bool {
        !self.node().registrations.is_empty()
    }

    /// Whether no listener is registered here or anywhere below.
    pub fn is_empty(&self) -> bool {
        self.node().registrations.is_empty() && self.node().children.is_empty()
    }

    /// Scopes and listeners registered at this node, in registration order.
    pub fn listeners(&self) -> impl Iterator<Item = (DataChangeScope, &'a Arc<dyn DataChangeListener>)> + 'a {
        self.node()
            .registrations
            .iter()
            .map(|registration| (registration.scope, &registration.listener))
    }
}

impl fmt::Debug for ListenerNodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerNodeRef")
            .field("index", &self.index)
            .field("identifier", &self.identifier())
            .field("listeners", &self.node().registrations.len())
            .finish()
    }
}

/// Keeps a listener registered. Closing, explicitly or by dropping the
/// handle, removes the listener and prunes nodes that became empty.
#[must_use = "dropping the registration unregisters the listener"]
pub struct ListenerRegistration {
    tree: Weak<ListenerTree>,
    path: InstanceIdentifier,
    node: usize,
    id: u64,
    closed: bool,
}

impl ListenerRegistration {
    pub fn path(&self) -> &InstanceIdentifier {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Unregisters the listener. Closing twice is a no-op.
    pub fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        if let Some(tree) = self.tree.upgrade() {
            tree.unregister(self.node, self.id);
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("path", &self.path)
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}
