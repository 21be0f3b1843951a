//! Property payloads carried by replicated objects.
//!
//! A property is a tagged union of scalar values, dictionaries, ordered lists and
//! references to other replicated objects. Nested properties are addressed with a
//! [`PropertyPath`] rooted at the owning object.

use crate::ObjectId;
use serde::{Deserialize, Serialize};

/// Scalar leaf value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes (binary records).
    Bytes(Vec<u8>),
    /// Three-component vector.
    Vec3([f32; 3]),
}

/// Replicated property tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Property {
    /// Scalar or byte payload.
    Value(Value),
    /// Named fields.
    Dict(Dictionary),
    /// Ordered sequence.
    List(Vec<Property>),
    /// Reference to another replicated object by id.
    Reference(ObjectId),
}

impl Property {
    /// Text property helper.
    pub fn text(value: impl Into<String>) -> Self {
        Property::Value(Value::Text(value.into()))
    }

    /// Byte payload helper.
    pub fn bytes(value: Vec<u8>) -> Self {
        Property::Value(Value::Bytes(value))
    }

    /// Empty dictionary.
    pub fn dict() -> Self {
        Property::Dict(Dictionary::default())
    }

    /// Borrow the text payload if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Property::Value(Value::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Borrow the byte payload if this is a bytes value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Property::Value(Value::Bytes(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Borrow as a dictionary.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Property::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    /// Mutably borrow as a dictionary.
    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Property::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    /// Borrow as a list.
    pub fn as_list(&self) -> Option<&[Property]> {
        match self {
            Property::List(items) => Some(items),
            _ => None,
        }
    }

    /// Mutably borrow as a list.
    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Property>> {
        match self {
            Property::List(items) => Some(items),
            _ => None,
        }
    }

    /// Referenced object id, if this is a reference.
    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            Property::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Walk `segments` below this property.
    pub fn at(&self, segments: &[PathSegment]) -> Option<&Property> {
        let mut current = self;
        for segment in segments {
            current = match (segment, current) {
                (PathSegment::Key(key), Property::Dict(dict)) => dict.get(key)?,
                (PathSegment::Index(index), Property::List(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Mutable variant of [`Property::at`].
    pub fn at_mut(&mut self, segments: &[PathSegment]) -> Option<&mut Property> {
        let mut current = self;
        for segment in segments {
            current = match (segment, current) {
                (PathSegment::Key(key), Property::Dict(dict)) => dict.get_mut(key)?,
                (PathSegment::Index(index), Property::List(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Collect the relative paths of every reference to `target` below this property.
    pub fn references_to(&self, target: ObjectId) -> Vec<Vec<PathSegment>> {
        let mut found = Vec::new();
        let mut prefix = Vec::new();
        collect_references(self, target, &mut prefix, &mut found);
        found
    }
}

fn collect_references(
    property: &Property,
    target: ObjectId,
    prefix: &mut Vec<PathSegment>,
    found: &mut Vec<Vec<PathSegment>>,
) {
    match property {
        Property::Reference(id) if *id == target => found.push(prefix.clone()),
        Property::Dict(dict) => {
            for (key, child) in dict.iter() {
                prefix.push(PathSegment::Key(key.to_string()));
                collect_references(child, target, prefix, found);
                prefix.pop();
            }
        }
        Property::List(items) => {
            for (index, child) in items.iter().enumerate() {
                prefix.push(PathSegment::Index(index));
                collect_references(child, target, prefix, found);
                prefix.pop();
            }
        }
        _ => {}
    }
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        Property::Value(value)
    }
}

impl From<Dictionary> for Property {
    fn from(dict: Dictionary) -> Self {
        Property::Dict(dict)
    }
}

/// Named properties. Lookup ignores order; iteration follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    entries: Vec<(String, Property)>,
}

impl Dictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Property>) -> Self {
        self.insert(key, value.into());
        self
    }

    /// Insert or overwrite `key`. Overwrites keep the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: Property) -> Option<Property> {
        let key = key.into();
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Property> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Property> {
        self.entries
            .iter_mut()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Text field shortcut.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Property::as_text)
    }

    /// Remove a field, returning its old value.
    pub fn remove(&mut self, key: &str) -> Option<Property> {
        let position = self.entries.iter().position(|(name, _)| name == key)?;
        Some(self.entries.remove(position).1)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no fields are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One step of a property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathSegment {
    /// Dictionary field.
    Key(String),
    /// List element.
    Index(usize),
}

/// Location of a nested property: the owning ("container") object plus the
/// segments from its root property.
///
/// `container` is `None` for properties that are not attached to any object; such
/// paths are a structural error when they show up in events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyPath {
    /// Owning replicated object.
    pub container: Option<ObjectId>,
    /// Segments from the container's root property.
    pub segments: Vec<PathSegment>,
}

impl PropertyPath {
    /// Path to the root property of `object`.
    pub fn root(object: ObjectId) -> Self {
        Self {
            container: Some(object),
            segments: Vec::new(),
        }
    }

    /// Append a dictionary key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    /// Append a list index.
    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(PathSegment::Index(index));
        self
    }

    /// Nesting depth below the root property (root is depth 0).
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// First dictionary key, used to route top-level field changes.
    pub fn first_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Index stored at `depth`, if that segment is a list index.
    pub fn index_at(&self, depth: usize) -> Option<usize> {
        match self.segments.get(depth) {
            Some(PathSegment::Index(index)) => Some(*index),
            _ => None,
        }
    }

    /// Key stored at `depth`, if that segment is a dictionary key.
    pub fn key_at(&self, depth: usize) -> Option<&str> {
        match self.segments.get(depth) {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_overwrite_keeps_position() {
        let mut dict = Dictionary::new()
            .with("a", Property::text("1"))
            .with("b", Property::text("2"));
        dict.insert("a", Property::text("3"));
        let keys: Vec<_> = dict.iter().map(|(key, _)| key.to_string()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(dict.text("a"), Some("3"));
    }

    #[test]
    fn nested_lookup_walks_dicts_and_lists() {
        let entry = Dictionary::new()
            .with("type", Property::text("grass"))
            .with(
                "instances",
                Property::List(vec![Property::bytes(vec![1]), Property::bytes(vec![2])]),
            );
        let root = Property::List(vec![Property::Dict(entry)]);
        let path = PropertyPath::root(ObjectId(1)).index(0).key("instances").index(1);
        assert_eq!(path.depth(), 3);
        assert_eq!(
            root.at(&path.segments).and_then(Property::as_bytes),
            Some(&[2u8][..])
        );
        assert!(root.at(&[PathSegment::Key("nope".into())]).is_none());
    }

    #[test]
    fn finds_references_below_property() {
        let fields = Dictionary::new()
            .with("target", Property::Reference(ObjectId(7)))
            .with("other", Property::Reference(ObjectId(8)));
        let root = Property::Dict(Dictionary::new().with("fields", Property::Dict(fields)));
        let found = root.references_to(ObjectId(7));
        assert_eq!(
            found,
            vec![vec![
                PathSegment::Key("fields".into()),
                PathSegment::Key("target".into())
            ]]
        );
    }
}
