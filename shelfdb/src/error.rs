use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShelfDbError {
    #[error("unknown object field: {0}")]
    UnknownField(String),

    #[error("field not indexed: {0}")]
    FieldNotIndexed(String),

    #[error("unique constraint on field: {0}")]
    FieldUnique(String),

    #[error("unknown search operator: {0}")]
    UnknownSearchOperator(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("unknown key type: {0}")]
    UnknownKeyType(String),

    #[error("casting error: cannot cast {value} to {cast}")]
    Casting { value: String, cast: String },

    #[error("no object found")]
    NoObjectFound,

    #[error("unexpected number of results: expected {expected}, got {got}")]
    UnexpectedNumberOfResults { expected: usize, got: usize },

    #[error("bad schema: {0}")]
    BadSchema(String),

    #[error("missing object index for type {0}")]
    MissingObjectIndex(String),

    #[error("object structure changed for type {0}")]
    StructureChanged(String),

    #[error("extension mismatch: schema has {existing:?}, update has {new:?}")]
    ExtensionMismatch { existing: String, new: String },

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("field descriptor modified for type {0}")]
    FieldDescModif(String),

    #[error("invalid object {type_name}: {reason}")]
    InvalidObject { type_name: String, reason: String },

    #[error("wrong object type: expecting {expected}, got {got}")]
    WrongObjectType { expected: String, got: String },

    #[error("end of iterator")]
    EndOfIterator,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, ShelfDbError>;

impl ShelfDbError {
    /// True for unique-constraint violations.
    pub fn is_unique(&self) -> bool {
        matches!(self, ShelfDbError::FieldUnique(_))
    }

    /// True when the index and the on-disk view disagree; recoverable
    /// through [`crate::Db::repair`].
    pub fn is_index_corrupted(&self) -> bool {
        matches!(self, ShelfDbError::IndexCorrupted(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ShelfDbError::NoObjectFound)
    }

    pub fn is_end_of_iterator(&self) -> bool {
        matches!(self, ShelfDbError::EndOfIterator)
    }

    pub fn is_structure_changed(&self) -> bool {
        matches!(self, ShelfDbError::StructureChanged(_))
    }

    /// True when the underlying cause is a missing file or directory.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, ShelfDbError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
