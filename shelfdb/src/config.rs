//! Process-wide configuration knobs.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

static LOWERCASE_NAMES: AtomicBool = AtomicBool::new(false);
static DEFAULT_PERMISSIONS: AtomicU32 = AtomicU32::new(0o700);

/// When enabled, type directories are named after the snake_case form
/// of the record's type name instead of the type name verbatim.
/// Must be set before any database is opened.
pub fn set_lowercase_names(enable: bool) {
    LOWERCASE_NAMES.store(enable, Ordering::Relaxed);
}

pub fn lowercase_names() -> bool {
    LOWERCASE_NAMES.load(Ordering::Relaxed)
}

/// Unix mode bits applied to every file and directory the database
/// creates. Ignored on non-unix targets.
pub fn set_default_permissions(mode: u32) {
    DEFAULT_PERMISSIONS.store(mode, Ordering::Relaxed);
}

pub fn default_permissions() -> u32 {
    DEFAULT_PERMISSIONS.load(Ordering::Relaxed)
}
