//! The types most programs need, intended to be glob imported as
//! `use datatree::prelude::*;`.

pub use crate::data::{ContainerKind, ContainerNode, LeafNode, NormalizedNode};
pub use crate::listener::{
    DataChangeEvent, DataChangeListener, DataChangeScope, DispatchMode, ListenerRegistration,
};
pub use crate::path::{InstanceIdentifier, PathArgument, QName};
pub use crate::schema::{LeafType, SchemaContext};
pub use crate::tree::{
    DataTree, DataTreeCandidate, DataTreeConfig, DataTreeError, DataTreeModification,
    DataTreeSnapshot, ModificationType, Version,
};
pub use crate::value::Value;
