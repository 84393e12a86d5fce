//! Declarative description of a record type's indexable fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfDbError};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Per-field constraint flags.
///
/// `unique` implies `index`. `upper` and `lower` are mutually
/// exclusive and are the only flags that modify data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "is_false")]
    pub index: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub upper: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub lower: bool,
}

impl Constraints {
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.index = true;
        self.unique = true;
        self
    }

    pub fn upper(mut self) -> Self {
        assert!(!self.lower, "upper and lower are mutually exclusive");
        self.upper = true;
        self
    }

    pub fn lower(mut self) -> Self {
        assert!(!self.upper, "upper and lower are mutually exclusive");
        self.lower = true;
        self
    }

    /// True when this constraint set rewrites data before indexing.
    pub fn transformer(&self) -> bool {
        self.upper || self.lower
    }

    /// True when the field takes part in the object index.
    pub fn indexed(&self) -> bool {
        self.index || self.unique
    }
}

/// Description of one indexable field: dotted path, static type name
/// and constraint set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub path: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub constraints: Constraints,
}

impl FieldDescriptor {
    pub fn new(
        path: impl Into<String>,
        type_name: impl Into<String>,
        constraints: Constraints,
    ) -> Self {
        FieldDescriptor {
            path: path.into(),
            type_name: type_name.into(),
            constraints,
        }
    }

    /// Field equality: same path and static type.
    pub fn field_eq(&self, other: &FieldDescriptor) -> bool {
        self.path == other.path && self.type_name == other.type_name
    }

    /// Deep equality: field equality plus identical constraints.
    pub fn deep_eq(&self, other: &FieldDescriptor) -> bool {
        self.field_eq(other) && self.constraints == other.constraints
    }
}

/// Mapping from dotted path to descriptor for one record type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldDescMap(HashMap<String, FieldDescriptor>);

impl FieldDescMap {
    pub fn from_descriptors(descriptors: Vec<FieldDescriptor>) -> Self {
        FieldDescMap(
            descriptors
                .into_iter()
                .map(|fd| (fd.path.clone(), fd))
                .collect(),
        )
    }

    pub fn get(&self, path: &str) -> Option<&FieldDescriptor> {
        self.0.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldDescriptor)> {
        self.0.iter()
    }

    /// Descriptors whose constraints rewrite data before indexing.
    pub fn transformers(&self) -> Vec<FieldDescriptor> {
        self.0
            .values()
            .filter(|fd| fd.constraints.transformer())
            .cloned()
            .collect()
    }

    /// Replaces the constraint set of a known field.
    pub fn constraint(&mut self, path: &str, constraints: Constraints) -> Result<()> {
        match self.0.get_mut(path) {
            Some(fd) => {
                fd.constraints = constraints;
                Ok(())
            }
            None => Err(ShelfDbError::UnknownField(path.to_string())),
        }
    }

    /// Same set of paths and, for each path, identical `(path, type)`.
    /// Used to compare an on-disk schema against the live record
    /// shape.
    pub fn fields_compatible_with(&self, other: &FieldDescMap) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .all(|(path, fd)| other.0.get(path).map(|o| fd.field_eq(o)).unwrap_or(false))
    }

    /// Field compatibility plus identical constraints.
    pub fn compatible_with(&self, other: &FieldDescMap) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .all(|(path, fd)| other.0.get(path).map(|o| fd.deep_eq(o)).unwrap_or(false))
    }
}
