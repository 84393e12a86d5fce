//! Sorted index over one field of one record type.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use regex::Regex;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, ShelfDbError};
use crate::schema::descriptor::{Constraints, FieldDescriptor};
use crate::search::Op;
use crate::value::{IndexedField, Value, ValueKind};

/// Ordered sequence of `(value, object_id)` entries for one field,
/// kept sorted by value with the largest first, plus a reverse map
/// from object id to indexed value. Duplicates are permitted unless
/// the field carries the `unique` constraint.
///
/// The `cast` tag pins the value case of every entry; it is set by
/// the first insertion and restored from disk on load.
#[derive(Debug, Clone, Default)]
pub struct FieldIndex {
    name: String,
    cast: Option<ValueKind>,
    constraints: Constraints,
    index: Vec<IndexedField>,
    object_ids: HashMap<u64, Value>,
}

#[derive(Serialize)]
struct FieldIndexRepr<'a> {
    name: &'a str,
    cast: &'a str,
    constraints: &'a Constraints,
    index: &'a [IndexedField],
}

#[derive(Deserialize)]
struct FieldIndexOwnedRepr {
    #[serde(default)]
    name: String,
    #[serde(default)]
    cast: String,
    #[serde(default)]
    constraints: Constraints,
    #[serde(default)]
    index: Vec<IndexedField>,
}

impl Serialize for FieldIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        FieldIndexRepr {
            name: &self.name,
            cast: self.cast.map(|k| k.as_str()).unwrap_or(""),
            constraints: &self.constraints,
            index: &self.index,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldIndex {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<FieldIndex, D::Error> {
        let repr = FieldIndexOwnedRepr::deserialize(deserializer)?;
        let cast = if repr.cast.is_empty() {
            None
        } else {
            Some(ValueKind::parse(&repr.cast).map_err(de::Error::custom)?)
        };

        let mut index = repr.index;
        if let Some(kind) = cast {
            for field in &mut index {
                field.value.retag(kind).map_err(de::Error::custom)?;
            }
        }

        let object_ids = index
            .iter()
            .map(|f| (f.object_id, f.value.clone()))
            .collect();

        Ok(FieldIndex {
            name: repr.name,
            cast,
            constraints: repr.constraints,
            index,
            object_ids,
        })
    }
}

impl FieldIndex {
    pub fn new(descriptor: &FieldDescriptor) -> Self {
        FieldIndex {
            name: descriptor.path.clone(),
            cast: None,
            constraints: descriptor.constraints,
            index: Vec::new(),
            object_ids: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cast(&self) -> Option<ValueKind> {
        self.cast
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The underlying sorted sequence, largest value first.
    pub fn slice(&self) -> &[IndexedField] {
        &self.index
    }

    fn initialize(&mut self, value: &Value) {
        if self.cast.is_none() {
            self.cast = Some(value.kind());
        }
    }

    /// End of the prefix strictly greater than `v`. Equal entries
    /// start here, so new duplicates land at the leftmost position
    /// of their run.
    fn gt_end(&self, v: &Value) -> usize {
        self.index
            .partition_point(|f| f.value.cmp_same_kind(v) == Ordering::Greater)
    }

    /// End of the prefix greater than or equal to `v`.
    fn ge_end(&self, v: &Value) -> usize {
        self.index
            .partition_point(|f| f.value.cmp_same_kind(v) != Ordering::Less)
    }

    /// Fails with `Casting` when the probe's tag differs from this
    /// index's cast. An index that never saw an insertion accepts
    /// any probe and yields empty results.
    fn check_cast(&self, probe: &Value) -> Result<()> {
        match self.cast {
            Some(kind) if probe.kind() != kind => Err(ShelfDbError::Casting {
                value: probe.to_string(),
                cast: kind.as_str().to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn search_equal(&self, probe: &Value) -> Vec<IndexedField> {
        if self.index.is_empty() {
            return Vec::new();
        }
        self.index[self.gt_end(probe)..self.ge_end(probe)].to_vec()
    }

    pub fn search_not_equal(&self, probe: &Value) -> Vec<IndexedField> {
        if self.index.is_empty() {
            return Vec::new();
        }
        let mut out = self.index[..self.gt_end(probe)].to_vec();
        out.extend_from_slice(&self.index[self.ge_end(probe)..]);
        out
    }

    pub fn search_greater(&self, probe: &Value) -> Vec<IndexedField> {
        self.index[..self.gt_end(probe)].to_vec()
    }

    pub fn search_greater_or_equal(&self, probe: &Value) -> Vec<IndexedField> {
        self.index[..self.ge_end(probe)].to_vec()
    }

    pub fn search_less(&self, probe: &Value) -> Vec<IndexedField> {
        self.index[self.ge_end(probe)..].to_vec()
    }

    pub fn search_less_or_equal(&self, probe: &Value) -> Vec<IndexedField> {
        self.index[self.gt_end(probe)..].to_vec()
    }

    /// Entries whose string value matches `pattern`. Linear scan;
    /// defined for string indexes only.
    pub fn search_regex(&self, pattern: &str) -> Result<Vec<IndexedField>> {
        match self.cast {
            Some(ValueKind::Str) | None => {}
            Some(kind) => {
                return Err(ShelfDbError::Casting {
                    value: pattern.to_string(),
                    cast: kind.as_str().to_string(),
                })
            }
        }
        let re = Regex::new(pattern)?;
        Ok(self
            .index
            .iter()
            .filter(|f| f.value.as_str().map(|s| re.is_match(s)).unwrap_or(false))
            .cloned()
            .collect())
    }

    pub fn search_op(&self, op: Op, probe: &Value) -> Result<Vec<IndexedField>> {
        if op == Op::Regex {
            let pattern = probe.as_str().ok_or_else(|| ShelfDbError::Casting {
                value: probe.to_string(),
                cast: ValueKind::Str.as_str().to_string(),
            })?;
            return self.search_regex(pattern);
        }

        self.check_cast(probe)?;
        Ok(match op {
            Op::Eq => self.search_equal(probe),
            Op::Ne => self.search_not_equal(probe),
            Op::Gt => self.search_greater(probe),
            Op::Ge => self.search_greater_or_equal(probe),
            Op::Lt => self.search_less(probe),
            Op::Le => self.search_less_or_equal(probe),
            Op::Regex => unreachable!(),
        })
    }

    pub fn has(&self, probe: &Value) -> bool {
        !self.search_equal(probe).is_empty()
    }

    /// Unique check for a candidate `(object_id, probe)` pair.
    /// `exists` tells whether the candidate object is already
    /// indexed, in which case re-inserting its own value is fine.
    pub fn satisfy(&self, object_id: u64, exists: bool, probe: &Value) -> Result<()> {
        if self.constraints.unique {
            for field in self.search_equal(probe) {
                if !exists || field.object_id != object_id {
                    return Err(ShelfDbError::FieldUnique(self.name.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, value: Value, object_id: u64) {
        self.initialize(&value);
        debug_assert_eq!(Some(value.kind()), self.cast);
        let at = self.gt_end(&value);
        self.object_ids.insert(object_id, value.clone());
        self.index.insert(at, IndexedField::new(value, object_id));
    }

    /// Removing an id that was never inserted indicates a bug in the
    /// owning object index, not a runtime condition.
    pub fn delete(&mut self, object_id: u64) {
        let value = match self.object_ids.remove(&object_id) {
            Some(value) => value,
            None => panic!("object id {object_id} not found in field index {}", self.name),
        };
        let lo = self.gt_end(&value);
        let hi = self.ge_end(&value);
        let at = self.index[lo..hi]
            .iter()
            .position(|f| f.object_id == object_id)
            .map(|p| lo + p)
            .unwrap_or_else(|| {
                panic!("entry for object id {object_id} not found in field index {}", self.name)
            });
        self.index.remove(at);
    }

    pub fn update(&mut self, value: Value, object_id: u64) {
        self.delete(object_id);
        self.insert(value, object_id);
    }

    /// Restricts this index to entries whose object id appears in a
    /// preceding search result, preserving this index's ordering.
    pub fn constrain(&self, fields: &[IndexedField]) -> FieldIndex {
        let wanted: HashSet<u64> = fields.iter().map(|f| f.object_id).collect();
        let mut out = FieldIndex {
            name: self.name.clone(),
            cast: self.cast,
            constraints: self.constraints,
            index: Vec::with_capacity(wanted.len()),
            object_ids: HashMap::with_capacity(wanted.len()),
        };
        for field in &self.index {
            if wanted.contains(&field.object_id) {
                out.object_ids.insert(field.object_id, field.value.clone());
                out.index.push(field.clone());
            }
        }
        out
    }

    /// True when walking the sequence visits values in non-increasing
    /// order.
    pub fn control(&self) -> bool {
        self.index
            .windows(2)
            .all(|w| w[0].value.cmp_same_kind(&w[1].value) != Ordering::Less)
    }
}

impl fmt::Display for FieldIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, field) in self.index.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(unique: bool) -> FieldDescriptor {
        let constraints = if unique {
            Constraints::default().unique()
        } else {
            Constraints::default().index()
        };
        FieldDescriptor::new("a", "i64", constraints)
    }

    fn index_of(values: &[i64]) -> FieldIndex {
        let mut fi = FieldIndex::new(&descriptor(false));
        for (id, v) in values.iter().enumerate() {
            fi.insert(Value::Int(*v), id as u64);
        }
        fi
    }

    fn values(fields: &[IndexedField]) -> Vec<i64> {
        fields
            .iter()
            .map(|f| match f.value {
                Value::Int(v) => v,
                _ => panic!("expected int"),
            })
            .collect()
    }

    #[test]
    fn test_insert_keeps_descending_order() {
        let fi = index_of(&[4, 2, 5, 1, 3, 3]);
        assert_eq!(values(fi.slice()), vec![5, 4, 3, 3, 2, 1]);
        assert!(fi.control());
        assert_eq!(fi.cast(), Some(ValueKind::Int));
    }

    #[test]
    fn test_range_queries() {
        let fi = index_of(&[1, 2, 2, 3, 4, 5]);
        assert_eq!(values(&fi.search_equal(&Value::Int(2))), vec![2, 2]);
        assert_eq!(values(&fi.search_equal(&Value::Int(9))), Vec::<i64>::new());
        assert_eq!(
            values(&fi.search_not_equal(&Value::Int(2))),
            vec![5, 4, 3, 1]
        );
        assert_eq!(values(&fi.search_greater(&Value::Int(3))), vec![5, 4]);
        assert_eq!(
            values(&fi.search_greater_or_equal(&Value::Int(3))),
            vec![5, 4, 3]
        );
        assert_eq!(values(&fi.search_less(&Value::Int(3))), vec![2, 2, 1]);
        assert_eq!(
            values(&fi.search_less_or_equal(&Value::Int(3))),
            vec![3, 2, 2, 1]
        );
    }

    #[test]
    fn test_range_queries_on_bounds() {
        let fi = index_of(&[1, 2, 3]);
        assert_eq!(values(&fi.search_greater(&Value::Int(3))), Vec::<i64>::new());
        assert_eq!(values(&fi.search_greater(&Value::Int(0))), vec![3, 2, 1]);
        assert_eq!(values(&fi.search_less(&Value::Int(1))), Vec::<i64>::new());
        assert_eq!(values(&fi.search_less(&Value::Int(9))), vec![3, 2, 1]);
    }

    #[test]
    fn test_delete_then_insert_is_identity() {
        let mut fi = index_of(&[4, 2, 5, 1, 3]);
        let before = values(fi.slice());
        fi.delete(2);
        assert_eq!(values(fi.slice()), vec![4, 3, 2, 1]);
        fi.insert(Value::Int(5), 2);
        assert_eq!(values(fi.slice()), before);
    }

    #[test]
    #[should_panic(expected = "not found")]
    fn test_delete_unknown_id_panics() {
        let mut fi = index_of(&[1]);
        fi.delete(42);
    }

    #[test]
    fn test_update_moves_entry() {
        let mut fi = index_of(&[1, 2, 3]);
        fi.update(Value::Int(10), 0);
        assert_eq!(values(fi.slice()), vec![10, 3, 2]);
        assert!(fi.control());
    }

    #[test]
    fn test_unique_satisfy() {
        let mut fi = FieldIndex::new(&descriptor(true));
        fi.insert(Value::Int(42), 0);
        // a new object with the same value violates the constraint
        let err = fi.satisfy(1, false, &Value::Int(42)).unwrap_err();
        assert!(err.is_unique());
        // the same object re-asserting its own value does not
        fi.satisfy(0, true, &Value::Int(42)).unwrap();
        fi.satisfy(1, false, &Value::Int(43)).unwrap();
    }

    #[test]
    fn test_casting_guard() {
        let fi = index_of(&[1]);
        let err = fi.search_op(Op::Eq, &Value::Str("1".into())).unwrap_err();
        assert!(matches!(err, ShelfDbError::Casting { .. }));
    }

    #[test]
    fn test_regex_search() {
        let mut fi = FieldIndex::new(&FieldDescriptor::new(
            "s",
            "String",
            Constraints::default().index(),
        ));
        for (id, s) in ["John", "Johnny", "Joe"].iter().enumerate() {
            fi.insert(Value::Str(s.to_string()), id as u64);
        }
        assert_eq!(fi.search_op(Op::Regex, &Value::Str("^J".into())).unwrap().len(), 3);
        assert_eq!(
            fi.search_op(Op::Regex, &Value::Str("^(?i:john.*)".into()))
                .unwrap()
                .len(),
            2
        );
        // a broken pattern is a query error, not a miss
        assert!(matches!(
            fi.search_op(Op::Regex, &Value::Str("(".into())).unwrap_err(),
            ShelfDbError::Regex(_)
        ));
        // regex against a numeric index is a cast failure
        let numeric = index_of(&[1]);
        assert!(matches!(
            numeric
                .search_op(Op::Regex, &Value::Str("^J".into()))
                .unwrap_err(),
            ShelfDbError::Casting { .. }
        ));
    }

    #[test]
    fn test_constrain_preserves_order_and_filters() {
        let fi = index_of(&[1, 2, 3, 4, 5]);
        let prior = vec![
            IndexedField::new(Value::Int(2), 1),
            IndexedField::new(Value::Int(4), 3),
        ];
        let constrained = fi.constrain(&prior);
        assert_eq!(values(constrained.slice()), vec![4, 2]);
        for field in constrained.slice() {
            assert!(prior.iter().any(|p| p.object_id == field.object_id));
        }
    }

    #[test]
    fn test_serde_round_trip_restores_cast_and_order() {
        let fi = index_of(&[4, 2, 5]);
        let json = serde_json::to_string(&fi).unwrap();
        let back: FieldIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cast(), Some(ValueKind::Int));
        assert_eq!(values(back.slice()), vec![5, 4, 2]);
        assert!(back.control());
        // typed comparisons still succeed after the round trip
        assert_eq!(values(&back.search_greater(&Value::Int(3))), vec![5, 4]);
    }

    #[test]
    fn test_empty_index_accepts_any_probe() {
        let fi = FieldIndex::new(&descriptor(false));
        assert!(fi.search_op(Op::Eq, &Value::Str("x".into())).unwrap().is_empty());
        assert!(fi.search_op(Op::Lt, &Value::Int(1)).unwrap().is_empty());
    }
}
