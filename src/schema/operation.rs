use std::sync::Arc;

use crate::data::{ContainerKind, ContainerNode, NormalizedNode};
use crate::path::{InstanceIdentifier, KeyValues, PathArgument, QName};

use super::{LeafType, SchemaContext, SchemaKind, SchemaNode, SchemaViolation};

/// How data at a schema position is shaped and addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    Container,
    Map,
    MapEntry,
    LeafSet,
    LeafSetEntry,
    Leaf,
}

impl Strategy {
    pub fn container_kind(&self) -> Option<ContainerKind> {
        match self {
            Strategy::Container => Some(ContainerKind::Container),
            Strategy::Map => Some(ContainerKind::Map),
            Strategy::MapEntry => Some(ContainerKind::MapEntry),
            Strategy::LeafSet => Some(ContainerKind::LeafSet),
            Strategy::LeafSetEntry | Strategy::Leaf => None,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Strategy::Container => "container",
            Strategy::Map => "list",
            Strategy::MapEntry => "list entry",
            Strategy::LeafSet => "leaf-list",
            Strategy::LeafSetEntry => "leaf-list entry",
            Strategy::Leaf => "leaf",
        }
    }
}

/// The schema node governing one position in the tree together with the
/// strategy used to validate and apply modifications there.
///
/// Lists and leaf-lists contribute two positions each: the list itself and
/// its entries. Both share the same [`SchemaNode`].
#[derive(Clone, Debug)]
pub struct ApplyOperation {
    schema: Arc<SchemaNode>,
    strategy: Strategy,
}

impl ApplyOperation {
    pub fn root(context: &SchemaContext) -> Self {
        ApplyOperation::for_node(context.root().clone())
    }

    /// Resolves the operation for `path`, failing on the first argument the
    /// schema does not permit.
    pub fn for_path(context: &SchemaContext, path: &InstanceIdentifier) -> Result<Self, SchemaViolation> {
        let mut operation = ApplyOperation::root(context);
        for (depth, argument) in path.iter().enumerate() {
            operation = operation
                .child(argument)
                .ok_or_else(|| not_allowed(path.prefix(depth + 1)))?;
        }
        Ok(operation)
    }

    fn for_node(schema: Arc<SchemaNode>) -> Self {
        let strategy = match schema.kind() {
            SchemaKind::Container => Strategy::Container,
            SchemaKind::List { .. } => Strategy::Map,
            SchemaKind::LeafList { .. } => Strategy::LeafSet,
            SchemaKind::Leaf { .. } => Strategy::Leaf,
        };
        ApplyOperation { schema, strategy }
    }

    pub fn schema(&self) -> &Arc<SchemaNode> {
        &self.schema
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn child(&self, argument: &PathArgument) -> Option<ApplyOperation> {
        match (self.strategy, argument) {
            (Strategy::Container | Strategy::MapEntry, PathArgument::NodeIdentifier(name)) => {
                self.schema.child(name).cloned().map(ApplyOperation::for_node)
            }
            (Strategy::Map, PathArgument::NodeIdentifierWithPredicates(name, keys))
                if name == self.schema.name() && self.accepts_keys(keys) =>
            {
                Some(ApplyOperation {
                    schema: self.schema.clone(),
                    strategy: Strategy::MapEntry,
                })
            }
            (Strategy::LeafSet, PathArgument::NodeWithValue(name, value))
                if name == self.schema.name()
                    && self.leaf_type().is_some_and(|t| t.accepts(value)) =>
            {
                Some(ApplyOperation {
                    schema: self.schema.clone(),
                    strategy: Strategy::LeafSetEntry,
                })
            }
            _ => None,
        }
    }

    fn accepts_keys(&self, keys: &KeyValues) -> bool {
        let declared = self.schema.keys();
        declared.len() == keys.len()
            && declared.iter().all(|key| {
                let leaf_type = self.schema.child(key).and_then(|leaf| match leaf.kind() {
                    SchemaKind::Leaf { leaf_type } => Some(*leaf_type),
                    _ => None,
                });
                match (keys.get(key), leaf_type) {
                    (Some(value), Some(leaf_type)) => leaf_type.accepts(value),
                    _ => false,
                }
            })
    }

    fn leaf_type(&self) -> Option<LeafType> {
        match self.schema.kind() {
            SchemaKind::Leaf { leaf_type } | SchemaKind::LeafList { leaf_type } => Some(*leaf_type),
            _ => None,
        }
    }

    /// Whether removing the node is forbidden. Entries are never mandatory.
    pub fn is_mandatory(&self) -> bool {
        self.schema.is_mandatory()
            && !matches!(self.strategy, Strategy::MapEntry | Strategy::LeafSetEntry)
    }

    /// Whether `argument` names one of the key leaves of this list entry.
    pub fn is_key_leaf(&self, argument: &PathArgument) -> bool {
        match (self.strategy, argument) {
            (Strategy::MapEntry, PathArgument::NodeIdentifier(name)) => {
                self.schema.keys().contains(name)
            }
            _ => false,
        }
    }

    /// The empty node created when a modification reaches below a missing
    /// node. Leaves have no empty form.
    pub fn empty_container(&self, identifier: &PathArgument) -> Option<NormalizedNode> {
        let container = match self.strategy {
            Strategy::MapEntry => ContainerNode::entry_for(identifier.clone()),
            strategy => ContainerNode::new(strategy.container_kind()?, identifier.clone()),
        };
        Some(container.into())
    }

    /// Full structural validation of `data` stored at `path`.
    pub fn verify(&self, path: &InstanceIdentifier, data: &NormalizedNode) -> Result<(), SchemaViolation> {
        self.check(path, data, true)
    }

    /// Structural validation that tolerates missing mandatory nodes, for data
    /// merged into existing content.
    pub fn verify_partial(&self, path: &InstanceIdentifier, data: &NormalizedNode) -> Result<(), SchemaViolation> {
        self.check(path, data, false)
    }

    fn check(&self, path: &InstanceIdentifier, data: &NormalizedNode, mandatory: bool) -> Result<(), SchemaViolation> {
        match (self.strategy, data) {
            (Strategy::Leaf, NormalizedNode::Leaf(leaf)) => {
                if !matches!(leaf.identifier(), PathArgument::NodeIdentifier(_)) {
                    return Err(SchemaViolation::new(path.clone(), "leaf identifier must be a plain node identifier"));
                }
                self.check_value(path, leaf.value())
            }
            (Strategy::LeafSetEntry, NormalizedNode::Leaf(leaf)) => {
                match leaf.identifier() {
                    PathArgument::NodeWithValue(_, value) if value == leaf.value() => {}
                    _ => {
                        return Err(SchemaViolation::new(
                            path.clone(),
                            "leaf-list entry value does not match its identifier",
                        ))
                    }
                }
                self.check_value(path, leaf.value())
            }
            (strategy, NormalizedNode::Container(container))
                if strategy.container_kind() == Some(container.kind()) =>
            {
                for (argument, child) in container.children() {
                    let child_path = path.child(argument.clone());
                    let operation = self
                        .child(argument)
                        .ok_or_else(|| not_allowed(child_path.clone()))?;
                    operation.check(&child_path, child, mandatory)?;
                }
                if strategy == Strategy::MapEntry {
                    self.check_entry_keys(path, container)?;
                }
                if mandatory {
                    self.check_mandatory(path, |argument| container.child(argument).is_some())?;
                }
                Ok(())
            }
            (strategy, _) => Err(SchemaViolation::new(
                path.clone(),
                format!("expected {} data", strategy.describe()),
            )),
        }
    }

    fn check_value(&self, path: &InstanceIdentifier, value: &crate::value::Value) -> Result<(), SchemaViolation> {
        match self.leaf_type() {
            Some(leaf_type) if leaf_type.accepts(value) => Ok(()),
            Some(leaf_type) => Err(SchemaViolation::new(
                path.clone(),
                format!("value {value:?} is not of type {leaf_type:?}"),
            )),
            None => Err(SchemaViolation::new(path.clone(), "node does not hold a value")),
        }
    }

    /// Key leaves present in an entry must agree with its identifier.
    fn check_entry_keys(&self, path: &InstanceIdentifier, entry: &ContainerNode) -> Result<(), SchemaViolation> {
        let Some(keys) = entry.identifier().keys() else {
            return Err(SchemaViolation::new(path.clone(), "list entry is missing its key predicates"));
        };
        for (key, expected) in keys.iter() {
            let argument = PathArgument::NodeIdentifier(key.clone());
            match entry.child(&argument).and_then(NormalizedNode::value) {
                Some(actual) if actual != expected => {
                    return Err(SchemaViolation::new(
                        path.child(argument),
                        format!("key leaf value {actual:?} differs from predicate {expected:?}"),
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Fails when a mandatory child (or list key) is not `present`.
    pub fn check_mandatory(
        &self,
        path: &InstanceIdentifier,
        present: impl Fn(&PathArgument) -> bool,
    ) -> Result<(), SchemaViolation> {
        if !matches!(self.strategy, Strategy::Container | Strategy::MapEntry) {
            return Ok(());
        }
        let required = self
            .schema
            .children()
            .filter(|child| child.is_mandatory())
            .map(|child| child.name())
            .chain(self.entry_keys());
        for name in required {
            let argument = PathArgument::NodeIdentifier(name.clone());
            if !present(&argument) {
                return Err(SchemaViolation::new(
                    path.child(argument),
                    "mandatory node is missing",
                ));
            }
        }
        Ok(())
    }

    fn entry_keys(&self) -> impl Iterator<Item = &QName> {
        let keys: &[QName] = match self.strategy {
            Strategy::MapEntry => self.schema.keys(),
            _ => &[],
        };
        keys.iter()
    }
}

fn not_allowed(path: InstanceIdentifier) -> SchemaViolation {
    SchemaViolation::new(path, "node is not allowed by the schema")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LeafNode;

    fn schema() -> SchemaContext {
        SchemaContext::builder()
            .container("a", |a| {
                a.mandatory_leaf("name", LeafType::String)
                    .leaf_list("tags", LeafType::String)
            })
            .list("items", ["id"], |entry| {
                entry.leaf("id", LeafType::Int).leaf("label", LeafType::String)
            })
            .build()
            .expect("schema")
    }

    fn entry_path(id: i64) -> InstanceIdentifier {
        InstanceIdentifier::root()
            .node("items")
            .child(PathArgument::entry("items", [("id", id)]))
    }

    #[test]
    fn resolves_strategies_along_paths() {
        let schema = schema();
        let entry = ApplyOperation::for_path(&schema, &entry_path(1)).expect("entry");
        assert_eq!(entry.strategy(), Strategy::MapEntry);
        assert!(entry.is_key_leaf(&PathArgument::node("id")));
        assert!(!entry.is_key_leaf(&PathArgument::node("label")));

        let tag = InstanceIdentifier::root()
            .node("a")
            .node("tags")
            .child(PathArgument::leaf_entry("tags", "x"));
        let tag = ApplyOperation::for_path(&schema, &tag).expect("tag");
        assert_eq!(tag.strategy(), Strategy::LeafSetEntry);
    }

    #[test]
    fn rejects_mismatched_predicates() {
        let schema = schema();
        let wrong_key = InstanceIdentifier::root()
            .node("items")
            .child(PathArgument::entry("items", [("label", "x")]));
        let wrong_type = InstanceIdentifier::root()
            .node("items")
            .child(PathArgument::entry("items", [("id", "one")]));
        let error = ApplyOperation::for_path(&schema, &wrong_key).expect_err("wrong key");
        assert_eq!(error.path, wrong_key);
        assert!(ApplyOperation::for_path(&schema, &wrong_type).is_err());
    }

    #[test]
    fn mandatory_children_checked_on_full_verify_only() {
        let schema = schema();
        let a = ApplyOperation::for_path(&schema, &InstanceIdentifier::root().node("a")).expect("a");
        let data: NormalizedNode = ContainerNode::container("a").into();
        let path = InstanceIdentifier::root().node("a");
        assert!(a.verify(&path, &data).is_err());
        assert!(a.verify_partial(&path, &data).is_ok());
    }

    #[test]
    fn entry_keys_must_match_identifier() {
        let schema = schema();
        let path = entry_path(1);
        let operation = ApplyOperation::for_path(&schema, &path).expect("entry");
        let good: NormalizedNode = ContainerNode::map_entry("items", [("id", 1i64)]).into();
        let bad: NormalizedNode = ContainerNode::map_entry("items", [("id", 1i64)])
            .with_child(LeafNode::new("id", 2i64))
            .into();
        let keyless: NormalizedNode =
            ContainerNode::new(ContainerKind::MapEntry, PathArgument::entry("items", [("id", 1i64)]))
                .into();
        assert!(operation.verify(&path, &good).is_ok());
        assert!(operation.verify(&path, &bad).is_err());
        assert!(operation.verify(&path, &keyless).is_err());
        assert!(operation.verify_partial(&path, &keyless).is_ok());
    }

    #[test]
    fn empty_containers_by_strategy() {
        let schema = schema();
        let entry = ApplyOperation::for_path(&schema, &entry_path(5)).expect("entry");
        let created = entry
            .empty_container(&PathArgument::entry("items", [("id", 5i64)]))
            .expect("entries have an empty form");
        assert_eq!(
            created.child(&PathArgument::node("id")).and_then(NormalizedNode::value),
            Some(&crate::value::Value::Int(5))
        );

        let leaf = ApplyOperation::for_path(&schema, &entry_path(5).node("label")).expect("leaf");
        assert!(leaf.empty_container(&PathArgument::node("label")).is_none());
    }
}
