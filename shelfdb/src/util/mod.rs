//! Filesystem and naming helpers.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::OnceLock;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};

use crate::config;
use crate::error::{Result, ShelfDbError};
use crate::schema::COMPRESSED_EXTENSION;

/// Reads a JSON document, transparently decompressing files carrying
/// the compressed suffix.
pub(crate) fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    if is_compressed_path(path) {
        Ok(serde_json::from_reader(BufReader::new(GzDecoder::new(
            file,
        )))?)
    } else {
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Atomically writes a JSON document: temp file in the destination
/// directory, then rename. Compression streams through gzip at the
/// fastest level.
pub(crate) fn write_json_file<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    compress: bool,
) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(parent)?;

    if compress {
        let mut encoder = GzEncoder::new(tmp.as_file(), Compression::fast());
        serde_json::to_writer(&mut encoder, value)?;
        encoder.finish()?;
    } else {
        serde_json::to_writer(tmp.as_file(), value)?;
    }

    tmp.persist(path).map_err(|e| ShelfDbError::Io(e.error))?;
    set_default_permissions(path);
    Ok(())
}

pub(crate) fn is_compressed_path(path: &Path) -> bool {
    path.to_string_lossy().ends_with(COMPRESSED_EXTENSION)
}

/// Creates a directory chain, applying the configured permissions to
/// the leaf.
pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        std::fs::create_dir_all(dir)?;
        set_default_permissions(dir);
    }
    Ok(())
}

#[cfg(unix)]
fn set_default_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mode = config::default_permissions();
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_default_permissions(_path: &Path) {}

/// Canonical 8-4-4-4-12 hexadecimal form, case insensitive.
pub(crate) fn is_uuid(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[A-F0-9]{8}-[A-F0-9]{4}-[A-F0-9]{4}-[A-F0-9]{4}-[A-F0-9]{12}$")
            .expect("uuid pattern")
    })
    .is_match(s)
}

/// Splits an object filename into its UUID part and extension chain.
pub(crate) fn uuid_ext(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((uuid, _)) => (uuid, &name[uuid.len()..]),
        None => (name, ""),
    }
}

/// UUIDs of every object file found in a type directory. Non-object
/// entries (the schema document included) are skipped.
pub(crate) fn uuids_from_dir(dir: &Path) -> Result<HashSet<String>> {
    let mut uuids = HashSet::new();
    let pattern = format!("{}/*", dir.display());
    let entries = glob::glob(&pattern).map_err(|e| {
        ShelfDbError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;

    for entry in entries {
        let path = entry.map_err(|e| ShelfDbError::Io(e.into_error()))?;
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        let (uuid, _) = uuid_ext(name);
        if is_uuid(uuid) {
            uuids.insert(uuid.to_string());
        }
    }

    Ok(uuids)
}

/// Camel-case to snake-case conversion used for lowercased type
/// directories. Digits keep their position; acronym runs collapse.
pub(crate) fn camel_to_snake(camel: &str) -> String {
    let chars: Vec<char> = camel.chars().collect();
    let mut snake = String::with_capacity(camel.len() + 4);
    let mut prev_lower = false;

    for (i, &cur) in chars.iter().enumerate() {
        let is_digit = cur.is_ascii_digit();
        let next_lower = chars
            .get(i + 1)
            .map(|c| c.is_ascii_lowercase())
            .unwrap_or(false);

        if cur.is_ascii_uppercase() || is_digit {
            if !snake.is_empty() && (next_lower || prev_lower) {
                snake.push('_');
            }
            if is_digit {
                snake.push(cur);
            } else {
                snake.push(cur.to_ascii_lowercase());
            }
            prev_lower = false;
        } else {
            snake.push(cur);
            prev_lower = true;
        }
    }

    snake
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_camel_to_snake() {
        assert_eq!(camel_to_snake("TestTest"), "test_test");
        assert_eq!(camel_to_snake("TestTEST"), "test_test");
        assert_eq!(camel_to_snake("OneTWOThree"), "one_two_three");
        assert_eq!(camel_to_snake("One2Three"), "one_2_three");
        assert_eq!(camel_to_snake("One23"), "one_23");
        assert_eq!(camel_to_snake("1Step2Step"), "1_step_2_step");
        assert_eq!(camel_to_snake("123"), "123");
    }

    #[test]
    fn test_is_uuid() {
        assert!(is_uuid("01234567-89ab-cdef-0123-456789abcdef"));
        assert!(is_uuid("01234567-89AB-CDEF-0123-456789ABCDEF"));
        assert!(!is_uuid("schema"));
        assert!(!is_uuid("01234567-89ab-cdef-0123-456789abcde"));
    }

    #[test]
    fn test_uuid_ext() {
        assert_eq!(uuid_ext("abc.json"), ("abc", ".json"));
        assert_eq!(uuid_ext("abc.json.gz"), ("abc", ".json.gz"));
        assert_eq!(uuid_ext("abc"), ("abc", ""));
    }

    #[test]
    fn test_json_round_trip_plain_and_compressed() {
        let tmp = TempDir::new().unwrap();
        let doc = serde_json::json!({"a": 1, "b": "two"});

        let plain = tmp.path().join("doc.json");
        write_json_file(&plain, &doc, false).unwrap();
        let back: serde_json::Value = read_json_file(&plain).unwrap();
        assert_eq!(back, doc);

        let compressed = tmp.path().join("doc.json.gz");
        write_json_file(&compressed, &doc, true).unwrap();
        // the compressed stream must not be plain JSON on disk
        let raw = std::fs::read(&compressed).unwrap();
        assert_ne!(raw.first(), Some(&b'{'));
        let back: serde_json::Value = read_json_file(&compressed).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_uuids_from_dir_skips_non_objects() {
        let tmp = TempDir::new().unwrap();
        let uuid = "01234567-89ab-cdef-0123-456789abcdef";
        std::fs::write(tmp.path().join(format!("{uuid}.json")), "{}").unwrap();
        std::fs::write(tmp.path().join("schema.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "").unwrap();

        let uuids = uuids_from_dir(tmp.path()).unwrap();
        assert_eq!(uuids.len(), 1);
        assert!(uuids.contains(uuid));
    }
}
