//! The schema a data tree is validated against.
//!
//! A [`SchemaContext`] describes which nodes may appear where, what kind of
//! data each of them holds and which of them are mandatory. It is built once
//! with [`SchemaContext::builder`] and shared immutably afterwards:
//!
//! ```
//! use datatree::schema::{LeafType, SchemaContext};
//!
//! let schema = SchemaContext::builder()
//!     .container("system", |system| {
//!         system
//!             .mandatory_leaf("hostname", LeafType::String)
//!             .leaf_list("dns", LeafType::String)
//!     })
//!     .list("users", ["name"], |user| {
//!         user.leaf("name", LeafType::String).leaf("uid", LeafType::Uint)
//!     })
//!     .build()
//!     .expect("well formed schema");
//! assert!(schema.root().child(&"system".into()).is_some());
//! ```
//!
//! The tree consults the schema through [`operation::ApplyOperation`], which
//! maps every path argument to the strategy used to validate and apply
//! modifications below it.

pub mod operation;

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::data::{root_identifier, NormalizedNode};
use crate::path::{InstanceIdentifier, QName};
use crate::value::Value;

pub use operation::ApplyOperation;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeafType {
    Any,
    Empty,
    Boolean,
    Int,
    Uint,
    String,
    Binary,
}

impl LeafType {
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (LeafType::Any, _)
                | (LeafType::Empty, Value::Empty)
                | (LeafType::Boolean, Value::Boolean(_))
                | (LeafType::Int, Value::Int(_))
                | (LeafType::Uint, Value::Uint(_))
                | (LeafType::String, Value::String(_))
                | (LeafType::Binary, Value::Binary(_))
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaKind {
    Container,
    /// A keyed list. Each entry is addressed by the values of `keys`.
    List { keys: Vec<QName> },
    LeafList { leaf_type: LeafType },
    Leaf { leaf_type: LeafType },
}

#[derive(Debug, PartialEq, Eq)]
pub struct SchemaNode {
    name: QName,
    kind: SchemaKind,
    mandatory: bool,
    children: IndexMap<QName, Arc<SchemaNode>>,
}

impl SchemaNode {
    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn kind(&self) -> &SchemaKind {
        &self.kind
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn child(&self, name: &QName) -> Option<&Arc<SchemaNode>> {
        self.children.get(name)
    }

    /// Children in declaration order.
    pub fn children(&self) -> impl Iterator<Item = &Arc<SchemaNode>> {
        self.children.values()
    }

    /// Key leaf names of a list, empty for every other kind.
    pub fn keys(&self) -> &[QName] {
        match &self.kind {
            SchemaKind::List { keys } => keys,
            _ => &[],
        }
    }
}

/// Immutable schema shared by a data tree and its snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaContext {
    root: Arc<SchemaNode>,
}

impl SchemaContext {
    pub fn builder() -> SchemaNodeBuilder {
        SchemaNodeBuilder::new(root_identifier().node_type().clone(), SchemaKind::Container)
    }

    /// A schema that only permits the empty root container.
    pub fn empty() -> Self {
        SchemaContext {
            root: Arc::new(SchemaNode {
                name: root_identifier().node_type().clone(),
                kind: SchemaKind::Container,
                mandatory: false,
                children: IndexMap::new(),
            }),
        }
    }

    pub fn root(&self) -> &Arc<SchemaNode> {
        &self.root
    }

    /// Checks that `data` may be stored at `path`.
    pub fn validate(&self, path: &InstanceIdentifier, data: &NormalizedNode) -> Result<(), SchemaViolation> {
        ApplyOperation::for_path(self, path)?.verify(path, data)
    }

    pub fn is_valid(&self, path: &InstanceIdentifier, data: &NormalizedNode) -> bool {
        self.validate(path, data).is_ok()
    }
}

impl Default for SchemaContext {
    fn default() -> Self {
        SchemaContext::empty()
    }
}

/// Fluent builder for schema nodes; [`SchemaContext::builder`] starts at the root.
#[derive(Debug)]
pub struct SchemaNodeBuilder {
    name: QName,
    kind: SchemaKind,
    mandatory: bool,
    children: Vec<SchemaNodeBuilder>,
}

impl SchemaNodeBuilder {
    fn new(name: QName, kind: SchemaKind) -> Self {
        SchemaNodeBuilder {
            name,
            kind,
            mandatory: false,
            children: Vec::new(),
        }
    }

    pub fn container(
        mut self,
        name: impl Into<QName>,
        build: impl FnOnce(SchemaNodeBuilder) -> SchemaNodeBuilder,
    ) -> Self {
        let child = build(SchemaNodeBuilder::new(name.into(), SchemaKind::Container));
        self.children.push(child);
        self
    }

    pub fn list<K: Into<QName>>(
        mut self,
        name: impl Into<QName>,
        keys: impl IntoIterator<Item = K>,
        build: impl FnOnce(SchemaNodeBuilder) -> SchemaNodeBuilder,
    ) -> Self {
        let keys = keys.into_iter().map(Into::into).collect();
        let child = build(SchemaNodeBuilder::new(name.into(), SchemaKind::List { keys }));
        self.children.push(child);
        self
    }

    pub fn leaf_list(mut self, name: impl Into<QName>, leaf_type: LeafType) -> Self {
        self.children
            .push(SchemaNodeBuilder::new(name.into(), SchemaKind::LeafList { leaf_type }));
        self
    }

    pub fn leaf(mut self, name: impl Into<QName>, leaf_type: LeafType) -> Self {
        self.children
            .push(SchemaNodeBuilder::new(name.into(), SchemaKind::Leaf { leaf_type }));
        self
    }

    pub fn mandatory_leaf(self, name: impl Into<QName>, leaf_type: LeafType) -> Self {
        self.leaf(name, leaf_type).mandatory()
    }

    /// Marks the most recently added child as mandatory.
    pub fn mandatory(mut self) -> Self {
        if let Some(last) = self.children.last_mut() {
            last.mandatory = true;
        }
        self
    }

    pub fn build(self) -> Result<SchemaContext, SchemaViolation> {
        let root = self.finish(&InstanceIdentifier::root())?;
        Ok(SchemaContext {
            root: Arc::new(root),
        })
    }

    fn finish(self, path: &InstanceIdentifier) -> Result<SchemaNode, SchemaViolation> {
        let mut children = IndexMap::with_capacity(self.children.len());
        for child in self.children {
            let child_path = path.node(child.name.clone());
            let name = child.name.clone();
            let node = child.finish(&child_path)?;
            if children.insert(name, Arc::new(node)).is_some() {
                return Err(SchemaViolation::new(child_path, "duplicate schema node"));
            }
        }

        if let SchemaKind::List { keys } = &self.kind {
            if keys.is_empty() {
                return Err(SchemaViolation::new(path.clone(), "lists must declare at least one key"));
            }
            for key in keys {
                let is_leaf = children
                    .get(key)
                    .is_some_and(|child| matches!(child.kind, SchemaKind::Leaf { .. }));
                if !is_leaf {
                    return Err(SchemaViolation::new(
                        path.clone(),
                        format!("key {key} is not a leaf of the list"),
                    ));
                }
            }
        }

        Ok(SchemaNode {
            name: self.name,
            kind: self.kind,
            mandatory: self.mandatory,
            children,
        })
    }
}

/// Data that does not conform to the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: InstanceIdentifier,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: InstanceIdentifier, message: impl Into<String>) -> Self {
        SchemaViolation {
            path,
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema violation at {}: {}", self.path, self.message)
    }
}

impl Error for SchemaViolation {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ContainerNode, LeafNode};

    #[test]
    fn list_keys_must_be_leaves() {
        let missing = SchemaContext::builder()
            .list("items", ["id"], |entry| entry.leaf("name", LeafType::String))
            .build();
        assert!(missing.is_err());

        let keyless = SchemaContext::builder()
            .list("items", Vec::<&str>::new(), |entry| entry.leaf("name", LeafType::String))
            .build();
        assert!(keyless.is_err());

        let nested = SchemaContext::builder()
            .list("items", ["id"], |entry| entry.container("id", |c| c))
            .build();
        assert!(nested.is_err());
    }

    #[test]
    fn duplicate_children_rejected() {
        let result = SchemaContext::builder()
            .leaf("a", LeafType::Int)
            .container("a", |c| c)
            .build();
        assert_eq!(
            result.map(|_| ()).map_err(|e| e.path.to_string()),
            Err("/a".to_owned())
        );
    }

    #[test]
    fn validates_leaf_types() {
        let schema = SchemaContext::builder()
            .leaf("count", LeafType::Uint)
            .build()
            .expect("schema");
        let path = InstanceIdentifier::root().node("count");
        assert!(schema.is_valid(&path, &LeafNode::new("count", 3u64).into()));
        assert!(!schema.is_valid(&path, &LeafNode::new("count", "three").into()));
        assert!(!schema.is_valid(&path, &ContainerNode::container("count").into()));
        assert!(!schema.is_valid(
            &InstanceIdentifier::root().node("other"),
            &LeafNode::new("other", 1u64).into()
        ));
    }

    #[test]
    fn mandatory_marks_last_child() {
        let schema = SchemaContext::builder()
            .container("a", |a| a.leaf("x", LeafType::Int).leaf("y", LeafType::Int).mandatory())
            .build()
            .expect("schema");
        let a = schema.root().child(&"a".into()).expect("a");
        assert!(!a.child(&"x".into()).expect("x").is_mandatory());
        assert!(a.child(&"y".into()).expect("y").is_mandatory());
    }
}
