//! Query builder over index probes.

mod iter;

pub use iter::Iter;

use std::collections::HashSet;
use std::marker::PhantomData;

use regex::Regex;

use crate::db::Db;
use crate::error::{Result, ShelfDbError};
use crate::object::Object;
use crate::value::{Value, IndexedField};

/// Comparison operator vocabulary of the search surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Regex,
}

impl Op {
    pub fn parse(s: &str) -> Result<Op> {
        match s {
            "=" => Ok(Op::Eq),
            "!=" => Ok(Op::Ne),
            ">" => Ok(Op::Gt),
            ">=" => Ok(Op::Ge),
            "<" => Ok(Op::Lt),
            "<=" => Ok(Op::Le),
            "~=" => Ok(Op::Regex),
            other => Err(ShelfDbError::UnknownSearchOperator(other.to_string())),
        }
    }

    /// Evaluates one candidate against a probe of the same kind.
    /// Used by the full-scan fallback; indexed probes go through the
    /// field index instead.
    pub(crate) fn evaluate(&self, candidate: &Value, probe: &Value, re: Option<&Regex>) -> bool {
        use std::cmp::Ordering;
        if *self == Op::Regex {
            return match (candidate.as_str(), re) {
                (Some(s), Some(re)) => re.is_match(s),
                _ => false,
            };
        }
        let ord = candidate.cmp_same_kind(probe);
        match self {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Regex => unreachable!(),
        }
    }
}

/// Lazy, composable query over one record type.
///
/// A search is sticky-errored: the first error short-circuits every
/// further chain step and surfaces from every terminal method.
///
/// The ordering observed by [`collect`](Search::collect) is the
/// ordering of the last indexed probe (descending by that field's
/// value unless [`reverse`](Search::reverse)); after a full-scan
/// fallback the ordering is unspecified.
pub struct Search<'d, T: Object> {
    db: &'d Db,
    fields: Vec<IndexedField>,
    limit: usize,
    reversed: bool,
    err: Option<ShelfDbError>,
    _marker: PhantomData<fn() -> T>,
}

impl<'d, T: Object> Search<'d, T> {
    pub(crate) fn new(db: &'d Db, fields: Vec<IndexedField>) -> Self {
        Search {
            db,
            fields,
            limit: usize::MAX,
            reversed: false,
            err: None,
            _marker: PhantomData,
        }
    }

    pub(crate) fn errored(db: &'d Db, err: ShelfDbError) -> Self {
        let mut s = Search::new(db, Vec::new());
        s.err = Some(err);
        s
    }

    /// Number of entries in the current result.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The stored error, if any step failed so far.
    pub fn err(&self) -> Option<&ShelfDbError> {
        self.err.as_ref()
    }

    /// Narrows the result: re-probes the indexes constrained to the
    /// current result set.
    pub fn and(self, field: &str, operator: &str, value: impl Into<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.db
            .search_constrained::<T>(field, operator, value.into(), Some(self.fields))
    }

    /// Widens the result: probes the indexes fresh and merges the
    /// prior result in, deduplicating by object id. The new result's
    /// ordering comes first.
    pub fn or(mut self, field: &str, operator: &str, value: impl Into<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        let mut merged = self
            .db
            .search_constrained::<T>(field, operator, value.into(), None);
        if merged.err.is_some() {
            return merged;
        }
        let mut seen: HashSet<u64> = merged.fields.iter().map(|f| f.object_id).collect();
        for field in self.fields.drain(..) {
            if seen.insert(field.object_id) {
                merged.fields.push(field);
            }
        }
        merged
    }

    /// Boolean dispatch: `"and"`/`"&&"` and `"or"`/`"||"`, case
    /// insensitive. Anything else puts the search in error state.
    pub fn operation(
        self,
        boolean: &str,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Self {
        if self.err.is_some() {
            return self;
        }
        match boolean.to_lowercase().as_str() {
            "and" | "&&" => self.and(field, operator, value),
            "or" | "||" => self.or(field, operator, value),
            other => {
                let db = self.db;
                Search::errored(db, ShelfDbError::UnknownOperator(other.to_string()))
            }
        }
    }

    /// Asserts the result holds exactly `n` entries.
    pub fn expects(mut self, n: usize) -> Self {
        if self.err.is_some() {
            return self;
        }
        if self.fields.len() != n {
            self.err = Some(ShelfDbError::UnexpectedNumberOfResults {
                expected: n,
                got: self.fields.len(),
            });
        }
        self
    }

    /// Asserts the result holds zero or exactly `n` entries.
    pub fn expects_zero_or_n(mut self, n: usize) -> Self {
        if self.err.is_some() {
            return self;
        }
        if !self.fields.is_empty() && self.fields.len() != n {
            self.err = Some(ShelfDbError::UnexpectedNumberOfResults {
                expected: n,
                got: self.fields.len(),
            });
        }
        self
    }

    /// Reverses the materialization order.
    pub fn reverse(mut self) -> Self {
        self.reversed = !self.reversed;
        self
    }

    /// Caps the number of materialized results.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = n;
        self
    }

    /// Translates the current result into a UUID-driven iterator.
    pub fn iterator(self) -> Result<Iter<'d, T>> {
        if let Some(err) = self.err {
            return Err(err);
        }
        let mut uuids = self.db.uuids_for::<T>(&self.fields)?;
        if self.reversed {
            uuids.reverse();
        }
        if uuids.len() > self.limit {
            uuids.truncate(self.limit);
        }
        Ok(Iter::new(self.db, uuids))
    }

    /// Materializes every matching record through the cache-aware
    /// read path.
    pub fn collect(self) -> Result<Vec<T>> {
        let mut it = self.iterator()?;
        let mut out = Vec::with_capacity(it.len());
        loop {
            match it.next_object() {
                Ok(o) => out.push(o),
                Err(e) if e.is_end_of_iterator() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Materializes a single record; `NoObjectFound` when the result
    /// is empty.
    pub fn one(self) -> Result<T> {
        let mut objects = self.limit(1).collect()?;
        match objects.pop() {
            Some(o) => Ok(o),
            None => Err(ShelfDbError::NoObjectFound),
        }
    }

    /// Materializes at most one record, asserting the 0-or-1
    /// cardinality.
    pub fn first(self) -> Result<Option<T>> {
        let mut objects = self.expects_zero_or_n(1).collect()?;
        Ok(objects.pop())
    }

    /// Deletes every matching record through the bulk delete path.
    pub fn delete(self) -> Result<()> {
        let db = self.db;
        let it = self.iterator()?;
        db.delete_objects(it)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_parse() {
        assert_eq!(Op::parse("=").unwrap(), Op::Eq);
        assert_eq!(Op::parse("!=").unwrap(), Op::Ne);
        assert_eq!(Op::parse(">=").unwrap(), Op::Ge);
        assert_eq!(Op::parse("~=").unwrap(), Op::Regex);
        assert!(matches!(
            Op::parse("===").unwrap_err(),
            ShelfDbError::UnknownSearchOperator(_)
        ));
    }

    #[test]
    fn test_op_evaluate() {
        let c = Value::Int(2);
        assert!(Op::Eq.evaluate(&c, &Value::Int(2), None));
        assert!(Op::Ne.evaluate(&c, &Value::Int(3), None));
        assert!(Op::Gt.evaluate(&c, &Value::Int(1), None));
        assert!(Op::Ge.evaluate(&c, &Value::Int(2), None));
        assert!(Op::Lt.evaluate(&c, &Value::Int(3), None));
        assert!(!Op::Le.evaluate(&c, &Value::Int(1), None));

        let re = Regex::new("^Jo").unwrap();
        assert!(Op::Regex.evaluate(&Value::Str("John".into()), &Value::Str("^Jo".into()), Some(&re)));
        assert!(!Op::Regex.evaluate(&Value::Int(2), &Value::Str("^Jo".into()), Some(&re)));
    }
}
