//! Per-class field descriptor tables.
//!
//! Generic property sync reads and writes engine objects through an explicit table of
//! `(name, getter, setter, default)` descriptors built once per class at startup.

use crate::EngineHandle;
use glam::Vec3;
use std::collections::BTreeMap;

/// Engine-side field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Vector.
    Vec3(Vec3),
    /// Reference to another engine object.
    Object(Option<EngineHandle>),
}

/// Reads one field of `T`.
pub type FieldGetter<T> = fn(&T) -> FieldValue;
/// Writes one field of `T`; returns false when the value has the wrong shape.
pub type FieldSetter<T> = fn(&mut T, FieldValue) -> bool;

/// Describes one synced field of `T`.
pub struct FieldDescriptor<T> {
    /// Field name used as the dictionary key.
    pub name: &'static str,
    /// Getter.
    pub get: FieldGetter<T>,
    /// Setter.
    pub set: FieldSetter<T>,
    /// Value restored when the field is removed remotely.
    pub default: FieldValue,
}

/// Ordered descriptor list for one class.
pub struct FieldTable<T> {
    class: String,
    fields: Vec<FieldDescriptor<T>>,
}

impl<T> FieldTable<T> {
    /// Start a table for `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style descriptor registration.
    pub fn field(
        mut self,
        name: &'static str,
        get: FieldGetter<T>,
        set: FieldSetter<T>,
        default: FieldValue,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            get,
            set,
            default,
        });
        self
    }

    /// Class this table describes.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Descriptor by name.
    pub fn descriptor(&self, name: &str) -> Option<&FieldDescriptor<T>> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Field names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|field| field.name)
    }

    /// Read every field.
    pub fn read_all(&self, target: &T) -> Vec<(&'static str, FieldValue)> {
        self.fields
            .iter()
            .map(|field| (field.name, (field.get)(target)))
            .collect()
    }

    /// Read one field.
    pub fn read(&self, target: &T, name: &str) -> Option<FieldValue> {
        self.descriptor(name).map(|field| (field.get)(target))
    }

    /// Write one field. Unknown names and mismatched shapes return false.
    pub fn write(&self, target: &mut T, name: &str, value: FieldValue) -> bool {
        match self.descriptor(name) {
            Some(field) => (field.set)(target, value),
            None => false,
        }
    }

    /// Restore one field to its default.
    pub fn reset(&self, target: &mut T, name: &str) -> bool {
        match self.descriptor(name) {
            Some(field) => (field.set)(target, field.default.clone()),
            None => false,
        }
    }

    /// Apply a snapshot of `(name, value)` pairs; returns how many fields were written.
    pub fn apply<'a, I>(&self, target: &mut T, snapshot: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, FieldValue)>,
    {
        snapshot
            .into_iter()
            .filter(|(name, value)| self.write(target, name, value.clone()))
            .count()
    }
}

/// Field tables keyed by class name.
pub struct FieldTables<T> {
    tables: BTreeMap<String, FieldTable<T>>,
}

impl<T> Default for FieldTables<T> {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
        }
    }
}

impl<T> FieldTables<T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, replacing one with the same class.
    pub fn register(&mut self, table: FieldTable<T>) {
        self.tables.insert(table.class.clone(), table);
    }

    /// Table for `class`.
    pub fn get(&self, class: &str) -> Option<&FieldTable<T>> {
        self.tables.get(class)
    }

    /// Whether `class` has a table.
    pub fn contains(&self, class: &str) -> bool {
        self.tables.contains_key(class)
    }
}
