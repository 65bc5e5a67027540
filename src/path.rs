//! Addressing nodes inside a data tree.
//!
//! An [`InstanceIdentifier`] is a sequence of [`PathArgument`]s walked from the
//! root of the tree. Each argument names one step:
//!
//! * [`PathArgument::NodeIdentifier`] selects a container, leaf, keyed list or
//!   leaf-list by name,
//! * [`PathArgument::NodeIdentifierWithPredicates`] selects one entry of a keyed
//!   list by its key values,
//! * [`PathArgument::NodeWithValue`] selects one entry of a leaf-list.
//!
//! Identifiers are immutable and cheap to clone. Their textual form is
//! `/container/list/list[key=value]/leaf`, with `[.=value]` used for leaf-list
//! entries; [`InstanceIdentifier`] implements both [`fmt::Display`] and
//! [`FromStr`] for it.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use itertools::Itertools;

use crate::value::Value;

/// The name of a schema node.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QName(Arc<str>);

impl QName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        QName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for QName {
    fn from(name: &str) -> Self {
        QName::new(name)
    }
}

impl From<String> for QName {
    fn from(name: String) -> Self {
        QName::new(name)
    }
}

/// Key leaf values of a list entry, sorted by key name.
pub type KeyValues = BTreeMap<QName, Value>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathArgument {
    NodeIdentifier(QName),
    NodeIdentifierWithPredicates(QName, Arc<KeyValues>),
    NodeWithValue(QName, Value),
}

impl PathArgument {
    pub fn node(name: impl Into<QName>) -> Self {
        PathArgument::NodeIdentifier(name.into())
    }

    pub fn entry<K, V>(name: impl Into<QName>, keys: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<QName>,
        V: Into<Value>,
    {
        let keys = keys
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        PathArgument::NodeIdentifierWithPredicates(name.into(), Arc::new(keys))
    }

    pub fn leaf_entry(name: impl Into<QName>, value: impl Into<Value>) -> Self {
        PathArgument::NodeWithValue(name.into(), value.into())
    }

    pub fn node_type(&self) -> &QName {
        match self {
            PathArgument::NodeIdentifier(name)
            | PathArgument::NodeIdentifierWithPredicates(name, _)
            | PathArgument::NodeWithValue(name, _) => name,
        }
    }

    /// The argument matching every entry of the same list or leaf-list.
    ///
    /// Returns `None` for plain node identifiers, which only ever match
    /// themselves.
    pub fn wildcard(&self) -> Option<PathArgument> {
        match self {
            PathArgument::NodeIdentifier(_) => None,
            PathArgument::NodeIdentifierWithPredicates(name, _)
            | PathArgument::NodeWithValue(name, _) => {
                Some(PathArgument::NodeIdentifier(name.clone()))
            }
        }
    }

    pub fn keys(&self) -> Option<&KeyValues> {
        match self {
            PathArgument::NodeIdentifierWithPredicates(_, keys) => Some(keys),
            _ => None,
        }
    }
}

impl fmt::Display for PathArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathArgument::NodeIdentifier(name) => write!(f, "{name}"),
            PathArgument::NodeIdentifierWithPredicates(name, keys) => {
                write!(f, "{name}")?;
                for (key, value) in keys.iter() {
                    write!(f, "[{key}={}]", PredicateValue(value))?;
                }
                Ok(())
            }
            PathArgument::NodeWithValue(name, value) => {
                write!(f, "{name}[.={}]", PredicateValue(value))
            }
        }
    }
}

struct PredicateValue<'a>(&'a Value);

impl fmt::Display for PredicateValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::String(s) => write!(f, "'{s}'"),
            other => write!(f, "{other}"),
        }
    }
}

/// An absolute path from the root of a data tree.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceIdentifier(Arc<[PathArgument]>);

impl InstanceIdentifier {
    /// The empty path, addressing the root node.
    pub fn root() -> Self {
        InstanceIdentifier(Arc::from(Vec::new()))
    }

    pub fn new(arguments: impl IntoIterator<Item = PathArgument>) -> Self {
        arguments.into_iter().collect()
    }

    pub fn child(&self, argument: PathArgument) -> Self {
        let mut arguments = Vec::with_capacity(self.0.len() + 1);
        arguments.extend_from_slice(&self.0);
        arguments.push(argument);
        InstanceIdentifier(arguments.into())
    }

    pub fn node(&self, name: impl Into<QName>) -> Self {
        self.child(PathArgument::node(name))
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(InstanceIdentifier(parent.into()))
    }

    /// The first `len` arguments of this path.
    pub fn prefix(&self, len: usize) -> Self {
        if len >= self.0.len() {
            return self.clone();
        }
        InstanceIdentifier(self.0[..len].into())
    }

    pub fn last(&self) -> Option<&PathArgument> {
        self.0.last()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[PathArgument] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathArgument> {
        self.0.iter()
    }

    /// Whether `self` is equal to `other` or one of its ancestors.
    pub fn contains(&self, other: &InstanceIdentifier) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl Default for InstanceIdentifier {
    fn default() -> Self {
        InstanceIdentifier::root()
    }
}

impl FromIterator<PathArgument> for InstanceIdentifier {
    fn from_iter<T: IntoIterator<Item = PathArgument>>(iter: T) -> Self {
        let arguments: Vec<PathArgument> = iter.into_iter().collect();
        InstanceIdentifier(arguments.into())
    }
}

impl<'a> IntoIterator for &'a InstanceIdentifier {
    type Item = &'a PathArgument;
    type IntoIter = std::slice::Iter<'a, PathArgument>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.iter().format("/"))
    }
}

impl fmt::Debug for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceIdentifier({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePathError {
    pub input: String,
    pub message: String,
}

impl fmt::Display for ParsePathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid path {:?}: {}", self.input, self.message)
    }
}

impl Error for ParsePathError {}

impl FromStr for InstanceIdentifier {
    type Err = ParsePathError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let error = |message: String| ParsePathError {
            input: input.to_owned(),
            message,
        };
        let rest = input
            .trim()
            .strip_prefix('/')
            .ok_or_else(|| error("paths must start with '/'".to_owned()))?;
        if rest.is_empty() {
            return Ok(InstanceIdentifier::root());
        }
        split_segments(rest)
            .map_err(error)?
            .into_iter()
            .map(parse_segment)
            .collect::<Result<InstanceIdentifier, String>>()
            .map_err(error)
    }
}

/// Splits on `/` outside of predicates and quoted values.
fn split_segments(input: &str) -> Result<Vec<&str>, String> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (at, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced ']' at offset {at}"))?;
            }
            (None, '/') if depth == 0 => {
                segments.push(&input[start..at]);
                start = at + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return Err("unterminated predicate".to_owned());
    }
    segments.push(&input[start..]);
    Ok(segments)
}

fn parse_segment(segment: &str) -> Result<PathArgument, String> {
    let (name, mut predicates) = match segment.find('[') {
        Some(at) => (&segment[..at], &segment[at..]),
        None => (segment, ""),
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty node name in segment {segment:?}"));
    }

    let mut keys = KeyValues::new();
    let mut entry_value = None;
    while !predicates.is_empty() {
        let end = closing_bracket(predicates)
            .ok_or_else(|| format!("malformed predicate in segment {segment:?}"))?;
        let body = &predicates[1..end];
        predicates = &predicates[end + 1..];

        let (key, value) = body
            .split_once('=')
            .ok_or_else(|| format!("predicate {body:?} is missing '='"))?;
        let value = parse_value(value.trim());
        match key.trim() {
            "." => entry_value = Some(value),
            "" => return Err(format!("empty key in predicate {body:?}")),
            key => {
                keys.insert(QName::new(key), value);
            }
        }
    }

    match (entry_value, keys.is_empty()) {
        (None, true) => Ok(PathArgument::node(name)),
        (None, false) => Ok(PathArgument::NodeIdentifierWithPredicates(
            QName::new(name),
            Arc::new(keys),
        )),
        (Some(value), true) => Ok(PathArgument::leaf_entry(name, value)),
        (Some(_), false) => Err(format!(
            "segment {segment:?} mixes key predicates with a value predicate"
        )),
    }
}

/// Offset of the `]` closing the predicate that `input` starts with.
fn closing_bracket(input: &str) -> Option<usize> {
    let rest = input.strip_prefix('[')?;
    let mut quote = None;
    for (at, c) in rest.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(at + 1),
            _ => {}
        }
    }
    None
}

fn parse_value(text: &str) -> Value {
    for quote in ['\'', '"'] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Value::from(inner);
        }
    }
    match text {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => text
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::from(text)),
    }
}

#[cfg(feature = "proptest")]
pub mod strategies {
    use super::{PathArgument, QName};
    use crate::value::strategies::any_value;
    use proptest::prelude::*;

    pub fn qname() -> impl Strategy<Value = QName> {
        "[a-z][a-z0-9-]{0,8}".prop_map(QName::from)
    }

    pub fn path_argument() -> impl Strategy<Value = PathArgument> {
        prop_oneof![
            qname().prop_map(PathArgument::NodeIdentifier),
            (qname(), proptest::collection::btree_map(qname(), any_value(), 1..3)).prop_map(
                |(name, keys)| PathArgument::NodeIdentifierWithPredicates(name, keys.into())
            ),
            (qname(), any_value()).prop_map(|(name, value)| PathArgument::NodeWithValue(name, value)),
        ]
    }
}
