//! Per-type schema: fields, serialization policy, cache policy and
//! index, persisted as `schema.json` next to the object files.

pub mod descriptor;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfDbError};
use crate::index::ObjectIndex;
use crate::object::Object;
use crate::schema::descriptor::{FieldDescMap, FieldDescriptor};
use crate::search::Op;
use crate::util;
use crate::value::{IndexedField, Value};

pub const SCHEMA_FILENAME: &str = "schema.json";
pub const COMPRESSED_EXTENSION: &str = ".gz";
pub const DEFAULT_EXTENSION: &str = ".json";

/// Asynchronous write policy: pending objects are flushed once the
/// queue reaches `threshold` or `timeout` elapses, whichever comes
/// first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncWrites {
    pub enable: bool,
    pub threshold: usize,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl AsyncWrites {
    pub fn new(threshold: usize, timeout: Duration) -> Self {
        AsyncWrites {
            enable: true,
            threshold,
            timeout,
        }
    }
}

/// Transient state bound at initialization, never persisted.
#[derive(Debug, Clone)]
pub(crate) struct SchemaRuntime {
    pub type_name: String,
    pub dir: PathBuf,
    /// Live record shape walked from the type, as opposed to the
    /// field map loaded from disk.
    pub shape: FieldDescMap,
    pub transformers: Vec<FieldDescriptor>,
    pub async_started: Arc<AtomicBool>,
}

impl Default for SchemaRuntime {
    fn default() -> Self {
        SchemaRuntime {
            type_name: String::new(),
            dir: PathBuf::new(),
            shape: FieldDescMap::default(),
            transformers: Vec::new(),
            async_started: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Persistent, per-type definition of fields, constraints,
/// serialization, caching policy and index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: FieldDescMap,
    pub extension: String,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub cache: bool,
    #[serde(rename = "async-writes", default, skip_serializing_if = "Option::is_none")]
    pub async_writes: Option<AsyncWrites>,
    #[serde(rename = "index", default, skip_serializing_if = "Option::is_none")]
    pub(crate) object_index: Option<ObjectIndex>,
    #[serde(skip)]
    pub(crate) runtime: SchemaRuntime,
}

impl Default for Schema {
    fn default() -> Self {
        Schema {
            fields: FieldDescMap::default(),
            extension: DEFAULT_EXTENSION.to_string(),
            compress: false,
            cache: false,
            async_writes: None,
            object_index: None,
            runtime: SchemaRuntime::default(),
        }
    }
}

impl Schema {
    /// Default policy: plain `.json` files, no cache, no async
    /// writes.
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    pub fn with_compression(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn with_cache(mut self) -> Self {
        self.cache = true;
        self
    }

    pub fn with_async_writes(mut self, threshold: usize, timeout: Duration) -> Self {
        self.async_writes = Some(AsyncWrites::new(threshold, timeout));
        self
    }

    /// Binds the schema to a record type and its on-disk directory,
    /// caching the walked shape and the transformer list. The field
    /// map and object index are built only when absent, so a schema
    /// loaded from disk keeps what it persisted.
    pub(crate) fn initialize<T: Object>(&mut self, dir: PathBuf) {
        self.runtime.type_name = T::TYPE_NAME.to_string();
        self.runtime.dir = dir;
        self.runtime.shape = T::descriptors();

        if self.fields.is_empty() {
            self.fields = self.runtime.shape.clone();
        }
        if self.object_index.is_none() {
            self.object_index = Some(ObjectIndex::new(&self.fields));
        }
        self.runtime.transformers = self.fields.transformers();
    }

    /// Read-through caching applies when caching is enabled or when
    /// writes are asynchronous, since a queued object only exists in
    /// memory until flushed.
    pub(crate) fn must_cache(&self) -> bool {
        self.cache || self.async_enabled()
    }

    pub(crate) fn async_enabled(&self) -> bool {
        self.async_writes.as_ref().map(|a| a.enable).unwrap_or(false)
    }

    /// Applies every transformer descriptor to the record in place.
    /// Each descriptor is idempotent, so the order is free.
    pub(crate) fn transform<T: Object>(&self, o: &mut T) {
        for fd in &self.runtime.transformers {
            let parts: Vec<&str> = fd.path.split('.').collect();
            o.apply_at(&parts, &fd.constraints);
        }
    }

    /// Applies the field's transform to a standalone search value, so
    /// queries against an `upper` field need not pre-uppercase their
    /// argument.
    pub(crate) fn prepare(&self, path: &str, value: &mut Value) {
        if let Some(fd) = self.fields.get(path) {
            if fd.constraints.transformer() {
                if let Value::Str(s) = value {
                    if fd.constraints.upper {
                        *s = s.to_uppercase();
                    }
                    if fd.constraints.lower {
                        *s = s.to_lowercase();
                    }
                }
            }
        }
    }

    /// Policy update from an incoming schema. Extensions and the
    /// full `(path, type, constraints)` map must match; only the
    /// runtime policy (`cache`, `async-writes`) is copied.
    pub(crate) fn update(&mut self, from: &Schema) -> Result<()> {
        if self.extension != from.extension {
            return Err(ShelfDbError::ExtensionMismatch {
                existing: self.extension.clone(),
                new: from.extension.clone(),
            });
        }
        if !self.fields.fields_compatible_with(&from.fields) {
            return Err(ShelfDbError::StructureChanged(
                self.runtime.type_name.clone(),
            ));
        }
        if !self.fields.compatible_with(&from.fields) {
            return Err(ShelfDbError::FieldDescModif(self.runtime.type_name.clone()));
        }
        self.cache = from.cache;
        self.async_writes = from.async_writes.clone();
        Ok(())
    }

    /// Structural control against the live record shape, index
    /// invariants, then an on-disk sweep verifying the directory and
    /// the index agree on the set of UUIDs.
    pub(crate) fn control(&self) -> Result<()> {
        if !self.fields.fields_compatible_with(&self.runtime.shape) {
            return Err(ShelfDbError::StructureChanged(
                self.runtime.type_name.clone(),
            ));
        }

        let index = self.object_index()?;
        index.control()?;

        if self.runtime.dir.as_os_str().is_empty() || !self.runtime.dir.is_dir() {
            return Ok(());
        }
        let on_disk = util::uuids_from_dir(&self.runtime.dir)?;
        for uuid in &on_disk {
            if !index.contains_uuid(uuid) {
                return Err(ShelfDbError::IndexCorrupted(format!(
                    "{uuid} is on disk but not indexed"
                )));
            }
        }
        for uuid in index.uuids() {
            if !on_disk.contains(uuid) {
                return Err(ShelfDbError::IndexCorrupted(format!(
                    "{uuid} is indexed but not on disk"
                )));
            }
        }
        Ok(())
    }

    /// Filename of an object under this schema.
    pub(crate) fn filename(&self, uuid: &str) -> String {
        let mut name = format!("{uuid}{}", self.extension);
        if self.compress {
            name.push_str(COMPRESSED_EXTENSION);
        }
        name
    }

    pub(crate) fn object_path(&self, uuid: &str) -> PathBuf {
        self.runtime.dir.join(self.filename(uuid))
    }

    /// Fresh, empty index over the same field set; used to check a
    /// batch against itself before touching real state.
    pub(crate) fn make_tmp_index(&self) -> ObjectIndex {
        ObjectIndex::new(&self.fields)
    }

    pub(crate) fn object_index(&self) -> Result<&ObjectIndex> {
        self.object_index
            .as_ref()
            .ok_or_else(|| ShelfDbError::MissingObjectIndex(self.runtime.type_name.clone()))
    }

    pub(crate) fn index<T: Object>(&mut self, o: &T) -> Result<()> {
        match self.object_index.as_mut() {
            Some(index) => index.insert_or_update(o),
            None => Err(ShelfDbError::MissingObjectIndex(
                self.runtime.type_name.clone(),
            )),
        }
    }

    pub(crate) fn unindex_by_uuid(&mut self, uuid: &str) {
        if let Some(index) = self.object_index.as_mut() {
            index.delete_by_uuid(uuid);
        }
    }

    pub(crate) fn is_uuid_indexed(&self, uuid: &str) -> bool {
        self.object_index
            .as_ref()
            .map(|ix| ix.contains_uuid(uuid))
            .unwrap_or(false)
    }

    pub(crate) fn satisfy_all<T: Object>(&self, o: &T) -> Result<()> {
        self.object_index()?.satisfy_all(o)
    }

    pub(crate) fn search(
        &self,
        path: &str,
        op: Op,
        value: &Value,
        constrain: Option<&[IndexedField]>,
    ) -> Result<Vec<IndexedField>> {
        self.object_index()?
            .search(&self.runtime.shape, path, op, value, constrain)
    }

    pub(crate) fn count(&self) -> usize {
        self.object_index.as_ref().map(|ix| ix.len()).unwrap_or(0)
    }
}
