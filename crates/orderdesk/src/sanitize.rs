//! Helpers for sanitizing filenames and the data that enters tracing span
//! attributes.
//!
//! Span fields only ever carry a file name, never the archive or workspace
//! directory it lives in.

use std::path::Path;

/// Characters that are replaced with `_` in client-supplied filenames.
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: keeps the file name, drops the directories.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Replaces path separators and characters that are invalid on common
/// filesystems with `_`. Non-ASCII characters are kept as-is.
///
/// Leading dots are stripped so a name can never resolve to `.` or `..`.
/// An input that sanitizes to nothing becomes `"file"`.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Returns true when `name` can be joined onto a directory without escaping
/// it: a single, non-empty, non-dot path component.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Splits a filename into `(stem, extension_with_dot)`.
pub fn split_extension(filename: &str) -> (&str, Option<&str>) {
    match filename.rfind('.') {
        Some(0) | None => (filename, None),
        Some(dot_pos) => (&filename[..dot_pos], Some(&filename[dot_pos..])),
    }
}
