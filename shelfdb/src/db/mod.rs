//! Database façade.
//!
//! Coordinates schemas, persistence, the read cache, the async-write
//! queue and repair under a single process-wide reader-writer lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use regex::Regex;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::config;
use crate::error::{Result, ShelfDbError};
use crate::object::Object;
use crate::schema::{AsyncWrites, Schema, SCHEMA_FILENAME};
use crate::search::{Iter, Op, Search};
use crate::store::ObjectStore;
use crate::util;
use crate::value::{IndexedField, Value, ValueKind};

#[derive(Default)]
struct Core {
    schemas: HashMap<String, Schema>,
}

struct DbInner {
    root: PathBuf,
    cancelled: AtomicBool,
    core: RwLock<Core>,
    cache: ObjectStore,
    asyncq: ObjectStore,
}

/// An embedded, file-per-object database.
///
/// Cloning is cheap and shares the underlying state; the clone given
/// to a background flush loop is the same database.
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

impl Db {
    /// Opens a database rooted at `root`. Idempotent and lazy: the
    /// disk is only touched once a type's schema is created or
    /// accessed.
    pub fn open(root: impl Into<PathBuf>) -> Db {
        Db {
            inner: Arc::new(DbInner {
                root: root.into(),
                cancelled: AtomicBool::new(false),
                core: RwLock::new(Core::default()),
                cache: ObjectStore::default(),
                asyncq: ObjectStore::default(),
            }),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.inner.root
    }

    fn type_dir_name(type_name: &str) -> String {
        if config::lowercase_names() {
            util::camel_to_snake(type_name)
        } else {
            type_name.to_string()
        }
    }

    fn type_dir(&self, type_name: &str) -> PathBuf {
        self.inner.root.join(Self::type_dir_name(type_name))
    }

    // ── Schema registry ─────────────────────────────────────────────

    /// Read access to the core, lazily loading the type's schema
    /// through a lock upgrade on first contact.
    fn read_core<T: Object>(&self) -> Result<RwLockReadGuard<'_, Core>> {
        let core = self.inner.core.upgradable_read();
        if core.schemas.contains_key(T::TYPE_NAME) {
            return Ok(RwLockUpgradableReadGuard::downgrade(core));
        }
        let mut core = RwLockUpgradableReadGuard::upgrade(core);
        self.load_schema::<T>(&mut core)?;
        Ok(RwLockWriteGuard::downgrade(core))
    }

    fn write_core<T: Object>(&self) -> Result<RwLockWriteGuard<'_, Core>> {
        let mut core = self.inner.core.write();
        if !core.schemas.contains_key(T::TYPE_NAME) {
            self.load_schema::<T>(&mut core)?;
        }
        Ok(core)
    }

    fn load_schema<T: Object>(&self, core: &mut Core) -> Result<()> {
        let dir = self.type_dir(T::TYPE_NAME);
        let path = dir.join(SCHEMA_FILENAME);

        let meta = std::fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(ShelfDbError::BadSchema(path.display().to_string()));
        }

        let mut schema: Schema = util::read_json_file(&path)?;
        schema.initialize::<T>(dir);

        match schema.control() {
            Ok(()) => {}
            Err(e) if e.is_index_corrupted() => {
                // keep the schema in memory so a follow-up repair can
                // reconcile it
                core.schemas.insert(T::TYPE_NAME.to_string(), schema);
                self.start_async_loop(core, T::TYPE_NAME);
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        core.schemas.insert(T::TYPE_NAME.to_string(), schema);
        self.start_async_loop(core, T::TYPE_NAME);
        Ok(())
    }

    /// Creates or updates the schema of a record type. When a schema
    /// already exists on disk, only the runtime policy of the
    /// provided one is taken over. An `IndexCorrupted` return is
    /// recoverable through [`repair`](Db::repair).
    pub fn create<T: Object>(&self, schema: Schema) -> Result<()> {
        let mut core = self.inner.core.write();

        let loaded = if core.schemas.contains_key(T::TYPE_NAME) {
            Ok(())
        } else {
            self.load_schema::<T>(&mut core)
        };

        match loaded {
            Ok(()) => {
                let mut incoming = schema;
                incoming.initialize::<T>(self.type_dir(T::TYPE_NAME));
                let existing = core.schemas.get_mut(T::TYPE_NAME).expect("schema loaded");
                existing.update(&incoming)?;
                let existing = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
                self.save_schema(existing, true)?;
                // the update may just have enabled async writes
                self.start_async_loop(&core, T::TYPE_NAME);
                Ok(())
            }
            Err(e) if e.is_not_exist() => {
                let mut fresh = schema;
                fresh.initialize::<T>(self.type_dir(T::TYPE_NAME));
                self.save_schema(&fresh, false)?;
                fresh.control()?;
                core.schemas.insert(T::TYPE_NAME.to_string(), fresh);
                self.start_async_loop(&core, T::TYPE_NAME);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Snapshot of a type's schema.
    pub fn schema<T: Object>(&self) -> Result<Schema> {
        let core = self.read_core::<T>()?;
        Ok(core.schemas.get(T::TYPE_NAME).expect("schema loaded").clone())
    }

    // ── Read path ───────────────────────────────────────────────────

    fn get_with<T: Object>(&self, core: &Core, uuid: &str) -> Result<T> {
        if uuid.is_empty() {
            return Err(ShelfDbError::NoObjectFound);
        }
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");

        if schema.must_cache() {
            if let Some(value) = self.inner.cache.get(T::TYPE_NAME, uuid) {
                let mut o: T = serde_json::from_value(value)?;
                o.initialize(uuid);
                return Ok(o);
            }
        }

        let mut o: T = match util::read_json_file(&schema.object_path(uuid)) {
            Ok(o) => o,
            Err(e) if e.is_not_exist() => return Err(ShelfDbError::NoObjectFound),
            Err(e) => return Err(e),
        };
        o.initialize(uuid);

        if schema.must_cache() {
            self.inner.cache.put(T::TYPE_NAME, uuid, serde_json::to_value(&o)?);
        }
        Ok(o)
    }

    /// Fetches a single object by its UUID.
    pub fn get_by_uuid<T: Object>(&self, uuid: &str) -> Result<T> {
        let core = self.read_core::<T>()?;
        self.get_with::<T>(&core, uuid)
    }

    /// Fetches the stored version of an object.
    pub fn get<T: Object>(&self, o: &T) -> Result<T> {
        self.get_by_uuid::<T>(o.uuid())
    }

    /// True when the object's file is on disk. Queued async writes
    /// are not yet visible here.
    pub fn exist<T: Object>(&self, o: &T) -> Result<bool> {
        let core = self.read_core::<T>()?;
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
        Ok(schema.object_path(o.uuid()).is_file())
    }

    /// Number of indexed objects of a type.
    pub fn count<T: Object>(&self) -> Result<usize> {
        let core = self.read_core::<T>()?;
        Ok(core.schemas.get(T::TYPE_NAME).expect("schema loaded").count())
    }

    /// Iterator over every object of a type.
    pub fn iterator<T: Object>(&self) -> Result<Iter<'_, T>> {
        let core = self.read_core::<T>()?;
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
        let uuids: Vec<String> = schema.object_index()?.uuids().cloned().collect();
        Ok(Iter::new(self, uuids))
    }

    /// Every object of a type.
    pub fn all<T: Object>(&self) -> Result<Vec<T>> {
        let mut it = self.iterator::<T>()?;
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

    // ── Search ──────────────────────────────────────────────────────

    /// Starts a search where `field` compares to `value` under
    /// `operator` (`=`, `!=`, `>`, `>=`, `<`, `<=`, `~=`). A field
    /// without an index falls through to a full scan.
    pub fn search<T: Object>(
        &self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Search<'_, T> {
        self.search_constrained::<T>(field, operator, value.into(), None)
    }

    pub(crate) fn search_constrained<T: Object>(
        &self,
        field: &str,
        operator: &str,
        mut value: Value,
        constrain: Option<Vec<IndexedField>>,
    ) -> Search<'_, T> {
        let core = match self.read_core::<T>() {
            Ok(core) => core,
            Err(e) => return Search::errored(self, e),
        };
        let op = match Op::parse(operator) {
            Ok(op) => op,
            Err(e) => return Search::errored(self, e),
        };
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
        schema.prepare(field, &mut value);

        match schema.search(field, op, &value, constrain.as_deref()) {
            Ok(fields) => Search::new(self, fields),
            Err(e) if matches!(e, ShelfDbError::FieldNotIndexed(_)) => {
                self.search_all::<T>(&core, field, op, &value, constrain)
            }
            Err(e) => Search::errored(self, e),
        }
    }

    /// Full-scan fallback for non-indexed fields: loads every
    /// candidate object and evaluates the predicate on its field
    /// value. Result ordering is unspecified.
    fn search_all<T: Object>(
        &self,
        core: &Core,
        field: &str,
        op: Op,
        probe: &Value,
        constrain: Option<Vec<IndexedField>>,
    ) -> Search<'_, T> {
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
        let index = match schema.object_index() {
            Ok(index) => index,
            Err(e) => return Search::errored(self, e),
        };

        let re = if op == Op::Regex {
            match probe.as_str() {
                Some(pattern) => match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(e) => return Search::errored(self, e.into()),
                },
                None => {
                    return Search::errored(
                        self,
                        ShelfDbError::Casting {
                            value: probe.to_string(),
                            cast: ValueKind::Str.as_str().to_string(),
                        },
                    )
                }
            }
        } else {
            None
        };

        let uuids: Vec<String> = match &constrain {
            Some(fields) => fields
                .iter()
                .filter_map(|f| index.uuid_of(f.object_id).map(str::to_string))
                .collect(),
            None => index.uuids().cloned().collect(),
        };

        let mut out = Vec::new();
        for uuid in &uuids {
            let object_id = match index.id_of(uuid) {
                Some(id) => id,
                None => {
                    return Search::errored(
                        self,
                        ShelfDbError::IndexCorrupted(format!("{uuid} has no object id")),
                    )
                }
            };
            let o: T = match self.get_with::<T>(core, uuid) {
                Ok(o) => o,
                Err(e) => return Search::errored(self, e),
            };
            let value = match o.field_by_path(field) {
                Some(value) => value,
                None => {
                    return Search::errored(self, ShelfDbError::UnknownField(field.to_string()))
                }
            };
            if value.kind() != probe.kind() {
                return Search::errored(
                    self,
                    ShelfDbError::Casting {
                        value: probe.to_string(),
                        cast: value.kind().as_str().to_string(),
                    },
                );
            }
            if op.evaluate(&value, probe, re.as_ref()) {
                out.push(IndexedField::new(value, object_id));
            }
        }

        Search::new(self, out)
    }

    /// Values of an indexed field in index order (descending),
    /// straight from memory. Useful when the indexed values are all
    /// that is wanted, since no object is fetched from disk.
    pub fn field_values<T: Object>(&self, path: &str) -> Result<Vec<Value>> {
        let core = self.read_core::<T>()?;
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
        if !T::descriptors().contains(path) {
            return Err(ShelfDbError::UnknownField(path.to_string()));
        }
        match schema.object_index()?.field_index(path) {
            Some(fi) => Ok(fi.slice().iter().map(|f| f.value.clone()).collect()),
            None => Err(ShelfDbError::FieldNotIndexed(path.to_string())),
        }
    }

    /// Translates index entries back into UUIDs through the type's
    /// bimap.
    pub(crate) fn uuids_for<T: Object>(&self, fields: &[IndexedField]) -> Result<Vec<String>> {
        let core = self.read_core::<T>()?;
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
        let index = schema.object_index()?;
        fields
            .iter()
            .map(|f| {
                index
                    .uuid_of(f.object_id)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ShelfDbError::IndexCorrupted(format!(
                            "object id {} has no uuid",
                            f.object_id
                        ))
                    })
            })
            .collect()
    }

    // ── Write path ──────────────────────────────────────────────────

    /// UUID assignment, transforms and validation, in that order.
    fn prepare_object<T: Object>(&self, core: &Core, o: &mut T) -> Result<()> {
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");

        // fresh objects draw a uuid, re-rolling on the rare
        // collision with an existing file
        if o.uuid().is_empty() {
            loop {
                o.initialize(&Uuid::new_v4().to_string());
                if !schema.object_path(o.uuid()).is_file() {
                    break;
                }
            }
        }

        o.transform();
        // schema transformations supersede the object's own
        schema.transform(o);

        if let Err(reason) = o.validate() {
            return Err(ShelfDbError::InvalidObject {
                type_name: T::TYPE_NAME.to_string(),
                reason,
            });
        }
        Ok(())
    }

    /// Index first; disk and cache stay untouched when a constraint
    /// fails.
    fn insert_with<T: Object>(&self, core: &mut Core, o: &T, commit: bool) -> Result<()> {
        let value = serde_json::to_value(o)?;

        {
            let schema = core.schemas.get_mut(T::TYPE_NAME).expect("schema loaded");
            schema.index(o)?;
        }

        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
        if schema.must_cache() {
            self.inner.cache.put(T::TYPE_NAME, o.uuid(), value.clone());
        }

        if schema.async_enabled() {
            // queued for the background flush instead of hitting disk
            self.inner.asyncq.put(T::TYPE_NAME, o.uuid(), value);
        } else {
            self.write_object(schema, o.uuid(), &value)?;
            if commit {
                self.save_schema(schema, true)?;
            }
        }
        Ok(())
    }

    /// Inserts or updates a single object and commits the schema.
    /// Assigns a fresh UUID to new objects.
    pub fn insert_or_update<T: Object>(&self, o: &mut T) -> Result<()> {
        let mut core = self.write_core::<T>()?;
        self.prepare_object(&core, o)?;
        self.insert_with(&mut core, o, true)
    }

    /// Atomic multi-object write: the whole batch is validated
    /// against a scratch index and the live constraints before any
    /// state changes, then written and committed once. Returns the
    /// number of objects written.
    pub fn insert_or_update_many<T: Object>(&self, objects: &mut [T]) -> Result<usize> {
        let mut core = self.write_core::<T>()?;
        if objects.is_empty() {
            return Ok(0);
        }

        {
            let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
            let mut tmp = schema.make_tmp_index();
            for o in objects.iter_mut() {
                self.prepare_object(&core, o)?;
                // conflicts within the batch
                tmp.insert_or_update(o)?;
                // conflicts with the current state
                schema.satisfy_all(o)?;
            }
        }

        let mut written = 0;
        let mut last_err = None;
        for o in objects.iter() {
            match self.insert_with(&mut core, o, false) {
                Ok(()) => written += 1,
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }

        if let Err(e) = self.commit_named(&core, T::TYPE_NAME) {
            last_err = Some(e);
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Consumes the channel in chunks, funneling each chunk through
    /// [`insert_or_update_many`](Db::insert_or_update_many). A chunk
    /// failure stops consumption.
    pub fn insert_or_update_bulk<T: Object>(
        &self,
        input: crossbeam::channel::Receiver<T>,
        chunk_size: usize,
    ) -> Result<usize> {
        let chunk_size = chunk_size.max(1);
        let mut written = 0;
        let mut chunk: Vec<T> = Vec::with_capacity(chunk_size);

        for o in input.iter() {
            chunk.push(o);
            if chunk.len() == chunk_size {
                written += self.insert_or_update_many(&mut chunk)?;
                chunk.clear();
            }
        }
        written += self.insert_or_update_many(&mut chunk)?;
        Ok(written)
    }

    fn write_object(&self, schema: &Schema, uuid: &str, value: &JsonValue) -> Result<()> {
        util::ensure_dir(&schema.runtime.dir)?;
        util::write_json_file(&schema.object_path(uuid), value, schema.compress)
    }

    fn save_schema(&self, schema: &Schema, override_existing: bool) -> Result<()> {
        util::ensure_dir(&schema.runtime.dir)?;
        let path = schema.runtime.dir.join(SCHEMA_FILENAME);
        if override_existing || !path.is_file() {
            util::write_json_file(&path, schema, false)?;
        }
        Ok(())
    }

    // ── Delete path ─────────────────────────────────────────────────

    fn delete_with<T: Object>(&self, core: &mut Core, uuid: &str) -> Result<()> {
        let schema = core.schemas.get_mut(T::TYPE_NAME).expect("schema loaded");

        if schema.must_cache() {
            self.inner.cache.delete(T::TYPE_NAME, uuid);
            self.inner.asyncq.delete(T::TYPE_NAME, uuid);
        }

        schema.unindex_by_uuid(uuid);

        let path = schema.object_path(uuid);
        if path.is_file() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Deletes a single object and commits the schema.
    pub fn delete<T: Object>(&self, o: &T) -> Result<()> {
        let mut core = self.write_core::<T>()?;
        let deleted = self.delete_with::<T>(&mut core, o.uuid());
        let committed = self.commit_named(&core, T::TYPE_NAME);
        deleted.and(committed)
    }

    /// Deletes every object the iterator yields, committing the
    /// schema once at the end of the group.
    pub fn delete_objects<T: Object>(&self, it: Iter<'_, T>) -> Result<()> {
        let mut core = self.write_core::<T>()?;
        let mut result = Ok(());
        for uuid in it.uuids() {
            if let Err(e) = self.delete_with::<T>(&mut core, uuid) {
                result = Err(e);
                break;
            }
        }
        let committed = self.commit_named(&core, T::TYPE_NAME);
        result.and(committed)
    }

    /// Deletes every object of a type.
    pub fn delete_all<T: Object>(&self) -> Result<()> {
        let it = self.iterator::<T>()?;
        self.delete_objects(it)
    }

    /// Removes a type wholesale: registry entry, caches, queue and
    /// the type directory.
    pub fn drop_type<T: Object>(&self) -> Result<()> {
        let mut core = self.inner.core.write();
        core.schemas.remove(T::TYPE_NAME);
        self.inner.cache.remove_type(T::TYPE_NAME);
        self.inner.asyncq.remove_type(T::TYPE_NAME);
        let dir = self.type_dir(T::TYPE_NAME);
        if dir.is_dir() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    // ── Flush & commit ──────────────────────────────────────────────

    fn commit_named(&self, core: &Core, type_name: &str) -> Result<()> {
        match core.schemas.get(type_name) {
            Some(schema) => self.save_schema(schema, true),
            None => Ok(()),
        }
    }

    fn flush_all_named(&self, core: &Core, type_name: &str) -> Result<()> {
        let schema = match core.schemas.get(type_name) {
            Some(schema) => schema,
            None => return Ok(()),
        };
        let mut last_err = None;
        for (uuid, value) in self.inner.asyncq.drain(type_name) {
            if let Err(e) = self.write_object(schema, &uuid, &value) {
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Persists one object now and removes it from the async queue.
    /// Does not commit the schema.
    pub fn flush<T: Object>(&self, o: &T) -> Result<()> {
        let core = self.write_core::<T>()?;
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
        let value = serde_json::to_value(o)?;
        let written = self.write_object(schema, o.uuid(), &value);
        self.inner.asyncq.delete(T::TYPE_NAME, o.uuid());
        written
    }

    /// Persists one object and commits the schema.
    pub fn flush_and_commit<T: Object>(&self, o: &T) -> Result<()> {
        let core = self.write_core::<T>()?;
        let committed = self.commit_named(&core, T::TYPE_NAME);
        let schema = core.schemas.get(T::TYPE_NAME).expect("schema loaded");
        let value = serde_json::to_value(o)?;
        let written = self.write_object(schema, o.uuid(), &value);
        self.inner.asyncq.delete(T::TYPE_NAME, o.uuid());
        committed.and(written)
    }

    /// Drains the async queue of a type to disk without committing
    /// the schema.
    pub fn flush_all<T: Object>(&self) -> Result<()> {
        let core = self.write_core::<T>()?;
        self.flush_all_named(&core, T::TYPE_NAME)
    }

    /// Drains the async queue of a type and commits the schema.
    pub fn flush_all_and_commit<T: Object>(&self) -> Result<()> {
        let core = self.write_core::<T>()?;
        let flushed = self.flush_all_named(&core, T::TYPE_NAME);
        let committed = self.commit_named(&core, T::TYPE_NAME);
        flushed.and(committed)
    }

    /// Persists a type's schema (including its index) to disk.
    pub fn commit<T: Object>(&self) -> Result<()> {
        let core = self.write_core::<T>()?;
        self.commit_named(&core, T::TYPE_NAME)
    }

    // ── Async flush loop ────────────────────────────────────────────

    fn start_async_loop(&self, core: &Core, type_name: &str) {
        let schema = match core.schemas.get(type_name) {
            Some(schema) => schema,
            None => return,
        };
        let policy = match &schema.async_writes {
            Some(policy) if policy.enable => policy.clone(),
            _ => return,
        };
        if schema.runtime.async_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let db = self.clone();
        let name = type_name.to_string();
        let spawned = thread::Builder::new()
            .name(format!("shelfdb-flush-{name}"))
            .spawn(move || db.flush_loop(name, policy));
        if let Err(e) = spawned {
            log::warn!("cannot start async flush loop for {type_name}: {e}");
        }
    }

    /// Wakes in 100 ms steps; flushes once the pending count reaches
    /// the threshold or the accumulated sleep reaches the timeout.
    /// Cancellation is cooperative and re-checked after the writer
    /// lock is acquired so `close` wins the race.
    fn flush_loop(&self, type_name: String, policy: AsyncWrites) {
        let step = Duration::from_millis(100);
        while !self.inner.cancelled.load(Ordering::SeqCst) {
            let mut slept = Duration::ZERO;
            loop {
                let pending = self.inner.asyncq.count(&type_name);
                if pending >= policy.threshold || slept >= policy.timeout {
                    if self.inner.cancelled.load(Ordering::SeqCst) {
                        return;
                    }
                    let core = self.inner.core.write();
                    if !self.inner.cancelled.load(Ordering::SeqCst) {
                        let flushed = self
                            .flush_all_named(&core, &type_name)
                            .and(self.commit_named(&core, &type_name));
                        if let Err(e) = flushed {
                            log::warn!("async flush for {type_name} failed: {e}");
                        }
                    }
                    break;
                }
                thread::sleep(step);
                slept += step;
            }
        }
    }

    // ── Maintenance ─────────────────────────────────────────────────

    /// Reconciles a type's index with its on-disk directory: files
    /// missing from the index are loaded and re-indexed, indexed
    /// UUIDs without a file are unindexed. An object file that fails
    /// to load aborts the sweep and surfaces its error; remove the
    /// file and repair again.
    pub fn repair<T: Object>(&self) -> Result<()> {
        let mut core = self.inner.core.write();

        if !core.schemas.contains_key(T::TYPE_NAME) {
            if let Err(e) = self.load_schema::<T>(&mut core) {
                // a corrupt index is exactly what repair fixes
                if !e.is_index_corrupted() {
                    return Err(e);
                }
            }
        }

        let dir = self.type_dir(T::TYPE_NAME);
        let on_disk = util::uuids_from_dir(&dir)?;

        for uuid in &on_disk {
            let indexed = core
                .schemas
                .get(T::TYPE_NAME)
                .expect("schema loaded")
                .is_uuid_indexed(uuid);
            if indexed {
                continue;
            }
            let o = self.get_with::<T>(&core, uuid)?;
            core.schemas
                .get_mut(T::TYPE_NAME)
                .expect("schema loaded")
                .index(&o)?;
        }

        let stale: Vec<String> = core
            .schemas
            .get(T::TYPE_NAME)
            .expect("schema loaded")
            .object_index()?
            .uuids()
            .filter(|uuid| !on_disk.contains(*uuid))
            .cloned()
            .collect();
        for uuid in stale {
            core.schemas
                .get_mut(T::TYPE_NAME)
                .expect("schema loaded")
                .unindex_by_uuid(&uuid);
        }

        Ok(())
    }

    /// Runs every known schema's control, surfacing the first error.
    pub fn control(&self) -> Result<()> {
        let core = self.inner.core.read();
        for schema in core.schemas.values() {
            schema.control()?;
        }
        Ok(())
    }

    /// Removes the database root and resets the in-memory state.
    pub fn destroy(&self) -> Result<()> {
        let mut core = self.inner.core.write();
        core.schemas.clear();
        self.inner.cache.clear();
        self.inner.asyncq.clear();
        match std::fs::remove_dir_all(&self.inner.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Cancels the background flush loops, drains every async queue
    /// to disk and persists every schema.
    pub fn close(&self) -> Result<()> {
        let core = self.inner.core.write();
        self.inner.cancelled.store(true, Ordering::SeqCst);

        let mut last_err = None;
        for (type_name, entries) in self.inner.asyncq.drain_all() {
            let schema = match core.schemas.get(&type_name) {
                Some(schema) => schema,
                None => continue,
            };
            for (uuid, value) in entries {
                if let Err(e) = self.write_object(schema, &uuid, &value) {
                    last_err = Some(e);
                }
            }
        }

        for schema in core.schemas.values() {
            if let Err(e) = self.save_schema(schema, true) {
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
