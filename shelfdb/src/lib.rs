//! Embedded, file-per-object object database.
//!
//! Every registered record type owns one directory under the database
//! root, holding one JSON document per record plus a `schema.json`
//! describing the type's fields, constraints, serialization policy
//! and index. On top of that store sits a typed, sorted, in-memory
//! secondary-index engine, a composable search builder (AND/OR/regex
//! over indexes, with fall-through to a full scan for non-indexed
//! fields), and the consistency machinery keeping the on-disk index,
//! the read cache and the async-write queue coherent under concurrent
//! access and across restarts.
//!
//! ```ignore
//! shelfdb::object! {
//!     #[derive(Debug)]
//!     pub struct Person {
//!         pub first_name: String,
//!         pub last_name: String [index],
//!         pub age: i64 [index],
//!     }
//! }
//! impl shelfdb::Object for Person {}
//!
//! let db = shelfdb::Db::open("data");
//! db.create::<Person>(shelfdb::Schema::new())?;
//!
//! let mut p = Person { first_name: "John".into(), last_name: "Connor".into(), age: 10, ..Default::default() };
//! db.insert_or_update(&mut p)?;
//!
//! let adults: Vec<Person> = db.search("age", ">=", 18).collect()?;
//! # Ok::<(), shelfdb::ShelfDbError>(())
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod object;
pub mod schema;
pub mod search;
pub mod value;

mod store;
mod util;

pub use db::Db;
pub use error::{Result, ShelfDbError};
pub use index::field::FieldIndex;
pub use index::ObjectIndex;
pub use object::{FieldValue, Fields, Item, Object, ObjectCore};
pub use schema::descriptor::{Constraints, FieldDescMap, FieldDescriptor};
pub use schema::{AsyncWrites, Schema, COMPRESSED_EXTENSION, DEFAULT_EXTENSION, SCHEMA_FILENAME};
pub use search::{Iter, Op, Search};
pub use value::{IndexedField, Value, ValueKind};
