//! Per-type aggregate index.

pub mod field;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfDbError};
use crate::index::field::FieldIndex;
use crate::object::Object;
use crate::schema::descriptor::FieldDescMap;
use crate::search::Op;
use crate::value::{IndexedField, Value};

/// Per-type index: the UUID to object-id bimap plus one
/// [`FieldIndex`] per indexed field.
///
/// The id counter is strictly monotonic; ids are never reused within
/// the lifetime of a database file. On load the counter is recovered
/// as the largest persisted id plus one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ObjectIndexRepr", into = "ObjectIndexRepr")]
pub struct ObjectIndex {
    i: u64,
    uuids: HashMap<String, u64>,
    fields: HashMap<String, FieldIndex>,
    object_ids: HashMap<u64, String>,
}

#[derive(Serialize, Deserialize)]
struct ObjectIndexRepr {
    #[serde(default)]
    fields: HashMap<String, FieldIndex>,
    #[serde(rename = "object-ids", default)]
    object_ids: HashMap<u64, String>,
}

impl From<ObjectIndexRepr> for ObjectIndex {
    fn from(repr: ObjectIndexRepr) -> Self {
        let mut uuids = HashMap::with_capacity(repr.object_ids.len());
        let mut max_id = 0;
        for (id, uuid) in &repr.object_ids {
            uuids.insert(uuid.clone(), *id);
            max_id = max_id.max(*id);
        }
        let i = if repr.object_ids.is_empty() { 0 } else { max_id + 1 };
        ObjectIndex {
            i,
            uuids,
            fields: repr.fields,
            object_ids: repr.object_ids,
        }
    }
}

impl From<ObjectIndex> for ObjectIndexRepr {
    fn from(index: ObjectIndex) -> Self {
        ObjectIndexRepr {
            fields: index.fields,
            object_ids: index.object_ids,
        }
    }
}

impl ObjectIndex {
    pub fn new(fields: &FieldDescMap) -> Self {
        let field_indexes = fields
            .iter()
            .filter(|(_, fd)| fd.constraints.indexed())
            .map(|(path, fd)| (path.clone(), FieldIndex::new(fd)))
            .collect();
        ObjectIndex {
            i: 0,
            uuids: HashMap::new(),
            fields: field_indexes,
            object_ids: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.object_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_ids.is_empty()
    }

    pub fn uuid_of(&self, object_id: u64) -> Option<&str> {
        self.object_ids.get(&object_id).map(String::as_str)
    }

    pub fn id_of(&self, uuid: &str) -> Option<u64> {
        self.uuids.get(uuid).copied()
    }

    pub fn contains_uuid(&self, uuid: &str) -> bool {
        self.uuids.contains_key(uuid)
    }

    pub fn uuids(&self) -> impl Iterator<Item = &String> {
        self.uuids.keys()
    }

    pub fn field_index(&self, path: &str) -> Option<&FieldIndex> {
        self.fields.get(path)
    }

    /// Checks every field-level constraint against the current state
    /// without mutating anything.
    pub fn satisfy_all<T: Object>(&self, o: &T) -> Result<()> {
        for (path, fi) in &self.fields {
            let value = o
                .field_by_path(path)
                .ok_or_else(|| ShelfDbError::UnknownField(path.clone()))?;
            let (object_id, exists) = match self.uuids.get(o.uuid()) {
                Some(id) => (*id, true),
                None => (0, false),
            };
            fi.satisfy(object_id, exists, &value)?;
        }
        Ok(())
    }

    /// Atomic at the object level: constraints are checked across
    /// every field index first, so a failure leaves no state change.
    pub fn insert_or_update<T: Object>(&mut self, o: &T) -> Result<()> {
        self.satisfy_all(o)?;

        if let Some(id) = self.uuids.get(o.uuid()).copied() {
            for (path, fi) in self.fields.iter_mut() {
                let value = o
                    .field_by_path(path)
                    .ok_or_else(|| ShelfDbError::UnknownField(path.clone()))?;
                fi.update(value, id);
            }
        } else {
            for (path, fi) in self.fields.iter_mut() {
                let value = o
                    .field_by_path(path)
                    .ok_or_else(|| ShelfDbError::UnknownField(path.clone()))?;
                fi.insert(value, self.i);
            }
            self.object_ids.insert(self.i, o.uuid().to_string());
            self.uuids.insert(o.uuid().to_string(), self.i);
            self.i += 1;
        }
        Ok(())
    }

    pub fn delete_by_uuid(&mut self, uuid: &str) {
        if let Some(id) = self.uuids.remove(uuid) {
            for fi in self.fields.values_mut() {
                fi.delete(id);
            }
            self.object_ids.remove(&id);
        }
    }

    /// Probes the index of `path`. The path must exist on the record
    /// shape; a known but unindexed path reports `FieldNotIndexed` so
    /// the caller can fall through to a full scan.
    pub fn search(
        &self,
        shape: &FieldDescMap,
        path: &str,
        op: Op,
        value: &Value,
        constrain: Option<&[IndexedField]>,
    ) -> Result<Vec<IndexedField>> {
        if !shape.contains(path) {
            return Err(ShelfDbError::UnknownField(path.to_string()));
        }
        match self.fields.get(path) {
            Some(fi) => match constrain {
                Some(fields) => fi.constrain(fields).search_op(op, value),
                None => fi.search_op(op, value),
            },
            None => Err(ShelfDbError::FieldNotIndexed(path.to_string())),
        }
    }

    /// Order and size invariants of every field index.
    pub fn control(&self) -> Result<()> {
        for (path, fi) in &self.fields {
            if !fi.control() {
                return Err(ShelfDbError::IndexCorrupted(format!(
                    "field index {path} is not ordered"
                )));
            }
            if fi.len() != self.len() {
                return Err(ShelfDbError::IndexCorrupted(format!(
                    "field index {path} holds {} entries for {} objects",
                    fi.len(),
                    self.len()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectCore;

    crate::object! {
        #[derive(Debug)]
        struct Sample {
            name: String [index],
            serial: i64 [unique],
            comment: String,
        }
    }

    impl Object for Sample {}

    fn sample(uuid: &str, name: &str, serial: i64) -> Sample {
        let mut s = Sample {
            name: name.to_string(),
            serial,
            comment: String::new(),
            ..Default::default()
        };
        s.initialize(uuid);
        s
    }

    fn new_index() -> ObjectIndex {
        ObjectIndex::new(&Sample::descriptors())
    }

    #[test]
    fn test_insert_and_update() {
        let mut ix = new_index();
        ix.insert_or_update(&sample("u1", "a", 1)).unwrap();
        ix.insert_or_update(&sample("u2", "b", 2)).unwrap();
        assert_eq!(ix.len(), 2);
        assert_eq!(ix.id_of("u1"), Some(0));
        assert_eq!(ix.uuid_of(1), Some("u2"));

        // updating reuses the object id
        ix.insert_or_update(&sample("u1", "c", 1)).unwrap();
        assert_eq!(ix.len(), 2);
        assert_eq!(ix.id_of("u1"), Some(0));
        ix.control().unwrap();
    }

    #[test]
    fn test_unique_conflict_leaves_state_unchanged() {
        let mut ix = new_index();
        ix.insert_or_update(&sample("u1", "a", 1)).unwrap();
        let err = ix.insert_or_update(&sample("u2", "b", 1)).unwrap_err();
        assert!(err.is_unique());
        assert_eq!(ix.len(), 1);
        ix.control().unwrap();
        // the first object can re-assert its own serial
        ix.insert_or_update(&sample("u1", "a2", 1)).unwrap();
    }

    #[test]
    fn test_delete_by_uuid() {
        let mut ix = new_index();
        ix.insert_or_update(&sample("u1", "a", 1)).unwrap();
        ix.insert_or_update(&sample("u2", "b", 2)).unwrap();
        ix.delete_by_uuid("u1");
        assert_eq!(ix.len(), 1);
        assert!(!ix.contains_uuid("u1"));
        ix.control().unwrap();
        // deleting an unknown uuid is a no-op
        ix.delete_by_uuid("u1");
    }

    #[test]
    fn test_search_dispatch() {
        let mut ix = new_index();
        ix.insert_or_update(&sample("u1", "a", 1)).unwrap();
        let shape = Sample::descriptors();

        let hits = ix
            .search(&shape, "name", Op::Eq, &Value::Str("a".into()), None)
            .unwrap();
        assert_eq!(hits.len(), 1);

        assert!(matches!(
            ix.search(&shape, "nope", Op::Eq, &Value::Int(1), None)
                .unwrap_err(),
            ShelfDbError::UnknownField(_)
        ));
        assert!(matches!(
            ix.search(&shape, "comment", Op::Eq, &Value::Str("x".into()), None)
                .unwrap_err(),
            ShelfDbError::FieldNotIndexed(_)
        ));
        assert!(matches!(
            ix.search(&shape, "serial", Op::Eq, &Value::Str("1".into()), None)
                .unwrap_err(),
            ShelfDbError::Casting { .. }
        ));
    }

    #[test]
    fn test_search_with_constrain_is_monotone() {
        let mut ix = new_index();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            ix.insert_or_update(&sample(&format!("u{i}"), name, i as i64))
                .unwrap();
        }
        let shape = Sample::descriptors();
        let prior = ix
            .search(&shape, "serial", Op::Ge, &Value::Int(1), None)
            .unwrap();
        let narrowed = ix
            .search(
                &shape,
                "name",
                Op::Ne,
                &Value::Str("zzz".into()),
                Some(&prior),
            )
            .unwrap();
        assert_eq!(narrowed.len(), 2);
        for f in &narrowed {
            assert!(prior.iter().any(|p| p.object_id == f.object_id));
        }
    }

    #[test]
    fn test_serde_round_trip_recovers_counter() {
        let mut ix = new_index();
        for i in 0..3 {
            ix.insert_or_update(&sample(&format!("u{i}"), &format!("n{i}"), i))
                .unwrap();
        }
        ix.delete_by_uuid("u0");

        let json = serde_json::to_string(&ix).unwrap();
        let mut back: ObjectIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        back.control().unwrap();

        // the next id must not collide with a persisted one
        back.insert_or_update(&sample("u9", "n9", 9)).unwrap();
        assert_eq!(back.id_of("u9"), Some(3));

        let invariant_len = back.len();
        assert_eq!(back.uuids().count(), invariant_len);
    }

    #[test]
    fn test_control_detects_size_mismatch() {
        let mut ix = new_index();
        ix.insert_or_update(&sample("u1", "a", 1)).unwrap();
        // simulate a missing bimap entry
        ix.object_ids.insert(99, "ghost".into());
        ix.uuids.insert("ghost".into(), 99);
        assert!(ix.control().unwrap_err().is_index_corrupted());
    }
}
