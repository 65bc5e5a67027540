//! The versioned data tree and its transaction lifecycle.
//!
//! A [`DataTree`] owns the current root [`TreeNode`] together with the
//! [`SchemaContext`] it conforms to. Readers take a [`DataTreeSnapshot`],
//! which is a single atomic load and stays unaffected by later commits.
//! Writers record changes in a [`DataTreeModification`] created from a
//! snapshot and push them through the tree in three steps:
//!
//! 1. [`DataTree::validate`] checks the sealed modification against the
//!    current tree: schema conformance, mandatory nodes and optimistic
//!    version checks on every written or deleted node.
//! 2. [`DataTree::prepare`] applies it to the current root and returns a
//!    [`DataTreeCandidate`] describing the resulting diff.
//! 3. [`DataTree::commit`] publishes the candidate's root, provided nothing
//!    was committed since it was prepared, and notifies listeners.
//!
//! ```
//! use datatree::data::{ContainerNode, LeafNode};
//! use datatree::path::InstanceIdentifier;
//! use datatree::schema::{LeafType, SchemaContext};
//! use datatree::tree::DataTree;
//!
//! let schema = SchemaContext::builder()
//!     .container("system", |system| system.leaf("hostname", LeafType::String))
//!     .build()
//!     .expect("schema");
//! let tree = DataTree::new(schema);
//! let hostname = InstanceIdentifier::root().node("system").node("hostname");
//!
//! let mut modification = tree.take_snapshot().new_modification();
//! modification
//!     .write(&hostname, LeafNode::new("hostname", "router-1").into())
//!     .expect("write");
//! modification.ready();
//! tree.validate(&modification).expect("valid");
//! let candidate = tree.prepare(&modification).expect("prepared");
//! tree.commit(candidate).expect("committed");
//!
//! assert!(tree.take_snapshot().read(&hostname).is_some());
//! ```
//!
//! Commits are serialized by a single writer lock; readers never block.
//! Conflicts are reported, never merged or retried: a caller whose
//! modification conflicts starts over from a fresh snapshot.

pub(crate) mod apply;
pub mod candidate;
pub mod modification;
pub mod node;
mod snapshot;

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use tracing::{debug, trace};

use crate::data::ContainerNode;
use crate::listener::dispatch::{DispatchMode, Dispatcher};
use crate::listener::{
    resolve_notifications, DataChangeListener, DataChangeScope, ListenerRegistration, ListenerTree,
};
use crate::path::InstanceIdentifier;
use crate::schema::{ApplyOperation, SchemaContext, SchemaViolation};

pub use candidate::{CandidateNode, DataTreeCandidate};
pub use modification::{ModificationType, NodeModification};
pub use node::{TreeNode, Version};
pub use snapshot::{DataTreeModification, DataTreeSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataTreeError {
    /// A precondition on the current data does not hold, such as removing a
    /// mandatory node or a list key.
    DataPreconditionFailed {
        path: InstanceIdentifier,
        message: String,
    },
    /// The data does not conform to the schema.
    DataValidationFailed {
        path: InstanceIdentifier,
        message: String,
    },
    /// Another transaction changed the node after this one observed it.
    ConflictingVersion {
        path: InstanceIdentifier,
        message: String,
        expected: Option<Version>,
        actual: Option<Version>,
    },
    /// The operation is not allowed in the current lifecycle state.
    IllegalState(String),
}

impl DataTreeError {
    pub fn path(&self) -> Option<&InstanceIdentifier> {
        match self {
            DataTreeError::DataPreconditionFailed { path, .. }
            | DataTreeError::DataValidationFailed { path, .. }
            | DataTreeError::ConflictingVersion { path, .. } => Some(path),
            DataTreeError::IllegalState(_) => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DataTreeError::ConflictingVersion { .. })
    }
}

impl fmt::Display for DataTreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataTreeError::DataPreconditionFailed { path, message } => {
                write!(f, "precondition failed at {path}: {message}")
            }
            DataTreeError::DataValidationFailed { path, message } => {
                write!(f, "validation failed at {path}: {message}")
            }
            DataTreeError::ConflictingVersion {
                path,
                message,
                expected,
                actual,
            } => {
                write!(f, "conflicting modification at {path}: {message}")?;
                match (expected, actual) {
                    (Some(expected), Some(actual)) => write!(f, " (expected {expected}, found {actual})"),
                    (Some(expected), None) => write!(f, " (expected {expected}, node is gone)"),
                    (None, Some(actual)) => write!(f, " (expected no node, found {actual})"),
                    (None, None) => Ok(()),
                }
            }
            DataTreeError::IllegalState(message) => write!(f, "illegal state: {message}"),
        }
    }
}

impl Error for DataTreeError {}

impl From<SchemaViolation> for DataTreeError {
    fn from(violation: SchemaViolation) -> Self {
        DataTreeError::DataValidationFailed {
            path: violation.path,
            message: violation.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTreeConfig {
    /// Name used in log events and for the notification thread.
    pub name: String,
    pub dispatch: DispatchMode,
}

impl DataTreeConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }
}

impl Default for DataTreeConfig {
    fn default() -> Self {
        DataTreeConfig {
            name: "datatree".to_owned(),
            dispatch: DispatchMode::Inline,
        }
    }
}

/// What a commit publishes atomically.
#[derive(Debug)]
pub(crate) struct TreeState {
    pub(crate) root: Arc<TreeNode>,
    pub(crate) schema: Arc<SchemaContext>,
}

pub struct DataTree {
    state: ArcSwap<TreeState>,
    commit_lock: Mutex<()>,
    listeners: Arc<ListenerTree>,
    dispatcher: Dispatcher,
    config: DataTreeConfig,
}

impl DataTree {
    pub fn new(schema: SchemaContext) -> Self {
        DataTree::with_config(schema, DataTreeConfig::default())
    }

    pub fn with_config(schema: SchemaContext, config: DataTreeConfig) -> Self {
        let root = TreeNode::from_data(ContainerNode::root().into(), Version::initial());
        let dispatcher = Dispatcher::new(config.dispatch, &config.name);
        DataTree {
            state: ArcSwap::from_pointee(TreeState {
                root,
                schema: Arc::new(schema),
            }),
            commit_lock: Mutex::new(()),
            listeners: Arc::new(ListenerTree::new()),
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &DataTreeConfig {
        &self.config
    }

    pub fn take_snapshot(&self) -> DataTreeSnapshot {
        DataTreeSnapshot::new(self.state.load_full())
    }

    pub fn new_modification(&self, snapshot: &DataTreeSnapshot) -> DataTreeModification {
        snapshot.new_modification()
    }

    pub fn schema_context(&self) -> Arc<SchemaContext> {
        self.state.load().schema.clone()
    }

    /// Replaces the schema. Fails without changing anything if the current
    /// data does not conform to `schema`.
    pub fn set_schema_context(&self, schema: SchemaContext) -> Result<(), DataTreeError> {
        let _guard = self.lock_commits()?;
        let current = self.state.load_full();
        ApplyOperation::root(&schema).verify(&InstanceIdentifier::root(), current.root.data())?;
        self.state.store(Arc::new(TreeState {
            root: current.root.clone(),
            schema: Arc::new(schema),
        }));
        debug!(tree = %self.config.name, "schema context updated");
        Ok(())
    }

    /// Checks a sealed modification against the current tree without
    /// changing anything.
    pub fn validate(&self, modification: &DataTreeModification) -> Result<(), DataTreeError> {
        ensure_sealed(modification)?;
        self.check(&self.state.load_full(), modification)
    }

    /// Applies a sealed modification to the current tree, producing a
    /// candidate for [`DataTree::commit`].
    pub fn prepare(&self, modification: &DataTreeModification) -> Result<DataTreeCandidate, DataTreeError> {
        ensure_sealed(modification)?;
        self.prepare_on(self.state.load_full(), modification)
    }

    /// Publishes `candidate` and notifies listeners.
    ///
    /// Fails with [`DataTreeError::ConflictingVersion`] if anything was
    /// committed, or the schema replaced, after the candidate was prepared.
    pub fn commit(&self, candidate: DataTreeCandidate) -> Result<(), DataTreeError> {
        let _guard = self.lock_commits()?;
        self.commit_locked(candidate)
    }

    /// Seals, validates, prepares and commits `modification` without letting
    /// another commit in between. Returns the committed version.
    pub fn submit(&self, mut modification: DataTreeModification) -> Result<Version, DataTreeError> {
        modification.ready();
        let _guard = self.lock_commits()?;
        let candidate = self.prepare_on(self.state.load_full(), &modification)?;
        let version = candidate.version();
        self.commit_locked(candidate)?;
        Ok(version)
    }

    pub fn register_data_change_listener(
        &self,
        path: &InstanceIdentifier,
        listener: impl DataChangeListener + 'static,
        scope: DataChangeScope,
    ) -> ListenerRegistration {
        self.listeners.register(path, Arc::new(listener), scope)
    }

    pub fn listener_tree(&self) -> &Arc<ListenerTree> {
        &self.listeners
    }

    /// Blocks until every notification of earlier commits was delivered.
    ///
    /// Must not be called from inside a listener.
    pub fn flush_notifications(&self) {
        self.dispatcher.flush();
    }

    /// Serializes commits. Inline listeners already run under this lock, so
    /// a commit from one of them is refused.
    fn lock_commits(&self) -> Result<MutexGuard<'_, ()>, DataTreeError> {
        if self.dispatcher.is_delivering_inline() {
            return Err(DataTreeError::IllegalState(format!(
                "tree {} cannot be changed from its own inline listener",
                self.config.name
            )));
        }
        Ok(self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn check(&self, state: &TreeState, modification: &DataTreeModification) -> Result<(), DataTreeError> {
        let operation = ApplyOperation::root(&state.schema);
        let result = apply::check_applicable(
            &operation,
            &InstanceIdentifier::root(),
            modification.root(),
            Some(&state.root),
        );
        match &result {
            Ok(()) => trace!(tree = %self.config.name, "modification validated"),
            Err(error) => debug!(tree = %self.config.name, %error, "modification rejected"),
        }
        result
    }

    fn prepare_on(
        &self,
        state: Arc<TreeState>,
        modification: &DataTreeModification,
    ) -> Result<DataTreeCandidate, DataTreeError> {
        self.check(&state, modification)?;
        let version = state.root.subtree_version().next();
        let root_path = InstanceIdentifier::root();
        let operation = ApplyOperation::root(&state.schema);
        let after = apply::apply(&operation, &root_path, modification.root(), Some(&state.root), version)?
            .ok_or_else(|| DataTreeError::IllegalState("modification removed the root node".to_owned()))?;
        let root = CandidateNode::build(modification.root(), Some(&state.root), Some(&after))
            .unwrap_or_else(|| CandidateNode::unmodified(state.root.clone(), after.clone()));
        trace!(tree = %self.config.name, version = version.get(), "candidate prepared");
        Ok(DataTreeCandidate::new(root_path, root, state, after, version))
    }

    fn commit_locked(&self, candidate: DataTreeCandidate) -> Result<(), DataTreeError> {
        let current = self.state.load_full();
        if !Arc::ptr_eq(&current, candidate.base()) {
            debug!(tree = %self.config.name, version = candidate.version().get(), "stale candidate rejected");
            return Err(DataTreeError::ConflictingVersion {
                path: candidate.root_path().clone(),
                message: "the tree changed after the candidate was prepared".to_owned(),
                expected: Some(candidate.before().subtree_version()),
                actual: Some(current.root.subtree_version()),
            });
        }
        self.state.store(Arc::new(TreeState {
            root: candidate.after().clone(),
            schema: current.schema.clone(),
        }));
        debug!(tree = %self.config.name, version = candidate.version().get(), "candidate committed");

        let notifications = resolve_notifications(&self.listeners, &candidate);
        self.dispatcher.dispatch(notifications);
        Ok(())
    }
}

impl fmt::Debug for DataTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTree")
            .field("name", &self.config.name)
            .field("version", &self.state.load().root.subtree_version())
            .finish_non_exhaustive()
    }
}

fn ensure_sealed(modification: &DataTreeModification) -> Result<(), DataTreeError> {
    if !modification.is_sealed() {
        return Err(DataTreeError::IllegalState(
            "modification must be sealed before it is validated or prepared".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LeafNode;
    use crate::schema::LeafType;

    fn tree() -> DataTree {
        DataTree::new(
            SchemaContext::builder()
                .container("a", |a| a.leaf("x", LeafType::Int))
                .build()
                .expect("schema"),
        )
    }

    fn x() -> InstanceIdentifier {
        InstanceIdentifier::root().node("a").node("x")
    }

    #[test]
    fn unsealed_modifications_are_refused() {
        let tree = tree();
        let mut modification = tree.take_snapshot().new_modification();
        modification
            .write(&x(), LeafNode::new("x", 1i64).into())
            .expect("write");
        assert!(matches!(tree.validate(&modification), Err(DataTreeError::IllegalState(_))));
        assert!(matches!(tree.prepare(&modification), Err(DataTreeError::IllegalState(_))));
    }

    #[test]
    fn stale_candidate_is_rejected() {
        let tree = tree();
        let mut first = tree.take_snapshot().new_modification();
        first.write(&x(), LeafNode::new("x", 1i64).into()).expect("write");
        first.ready();
        let stale = tree.prepare(&first).expect("prepare");

        let mut second = tree.take_snapshot().new_modification();
        second.write(&x(), LeafNode::new("x", 2i64).into()).expect("write");
        tree.submit(second).expect("submit");

        let error = tree.commit(stale).expect_err("stale");
        assert!(error.is_conflict());
        assert_eq!(error.path(), Some(&InstanceIdentifier::root()));
    }

    #[test]
    fn schema_change_invalidates_prepared_candidates() {
        let tree = tree();
        let mut modification = tree.take_snapshot().new_modification();
        modification.write(&x(), LeafNode::new("x", 1i64).into()).expect("write");
        modification.ready();
        let candidate = tree.prepare(&modification).expect("prepare");

        let wider = SchemaContext::builder()
            .container("a", |a| a.leaf("x", LeafType::Int).leaf("y", LeafType::Int))
            .build()
            .expect("schema");
        tree.set_schema_context(wider).expect("compatible");
        assert!(tree.commit(candidate).expect_err("stale").is_conflict());
    }

    #[test]
    fn incompatible_schema_is_refused() {
        let tree = tree();
        let mut modification = tree.take_snapshot().new_modification();
        modification.write(&x(), LeafNode::new("x", 1i64).into()).expect("write");
        tree.submit(modification).expect("submit");

        let narrower = SchemaContext::builder()
            .container("a", |a| a)
            .build()
            .expect("schema");
        let error = tree.set_schema_context(narrower).expect_err("x is not allowed");
        assert!(matches!(error, DataTreeError::DataValidationFailed { .. }));
        assert!(tree.schema_context().root().child(&"a".into()).is_some());
        assert!(tree.take_snapshot().exists(&x()));
    }

    #[test]
    fn error_messages_name_the_path() {
        let error = DataTreeError::ConflictingVersion {
            path: x(),
            message: "node was replaced by another transaction".to_owned(),
            expected: Some(Version::initial()),
            actual: Some(Version::initial().next()),
        };
        assert_eq!(
            error.to_string(),
            "conflicting modification at /a/x: node was replaced by another transaction (expected v0, found v1)"
        );
    }
}
