//! Output file naming: sanitizing, length capping and collision handling.

use std::path::{Path, PathBuf};

/// Longest sanitized default name before an extension is appended.
const MAX_DEFAULT_NAME_LEN: usize = 200;

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_` and truncates to `max_len`.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    // "." and ".." would escape or alias the parent directory
    if sanitized.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        sanitized
    }
}

/// File name for an item: sanitized `name` plus `extension` (if any).
pub fn default_file_name(name: &str, extension: Option<&str>) -> String {
    let stem = sanitize_filename_part(name, MAX_DEFAULT_NAME_LEN);
    match extension {
        Some(ext) if !ext.is_empty() => format!("{stem}.{ext}"),
        _ => stem,
    }
}

/// Longest file name component most filesystems accept, in bytes.
pub const MAX_NAME_BYTES: usize = 255;

/// Cap the final component of `path` at `max_chars` characters and
/// [`MAX_NAME_BYTES`] bytes.
///
/// The stem is truncated on a character boundary and the extension kept.
/// Returns `None` when even a one-character stem plus the extension would
/// not fit.
pub fn fit_file_name(path: &Path, max_chars: usize) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy();
    if fits(&name, max_chars) {
        return Some(path.to_path_buf());
    }
    let (stem, ext) = split_name(&name);
    compose(stem, ext, max_chars).map(|fitted| path.with_file_name(fitted))
}

/// If `path` already exists, append a counter to make it unique.
///
/// The counter is placed before the extension and the stem shortened so the
/// new name still fits `max_chars`. Returns `None` when no stem fits next to
/// the counter.
pub fn unique_path(path: &Path, max_chars: usize) -> Option<PathBuf> {
    if !path.exists() {
        return Some(path.to_path_buf());
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let (stem, ext) = split_name(&name);
    let parent = path.parent().unwrap_or(Path::new("."));

    let candidate =
        |suffix: &str| compose(stem, &format!("_{suffix}{ext}"), max_chars).map(|n| parent.join(n));

    for i in 1..10_000 {
        let path = candidate(&i.to_string())?;
        if !path.exists() {
            return Some(path);
        }
    }

    // Fallback, very unlikely
    candidate("dup")
}

fn fits(name: &str, max_chars: usize) -> bool {
    name.len() <= MAX_NAME_BYTES && name.chars().count() <= max_chars
}

/// Split a file name into stem and extension, the dot kept on the extension.
/// A leading dot belongs to the stem.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

/// `stem` followed by `tail`, the stem truncated until the whole fits.
fn compose(stem: &str, tail: &str, max_chars: usize) -> Option<String> {
    let tail_chars = tail.chars().count();
    if tail_chars >= max_chars || tail.len() >= MAX_NAME_BYTES {
        return None;
    }
    let stem = truncate(stem, max_chars - tail_chars, MAX_NAME_BYTES - tail.len());
    if stem.is_empty() {
        return None;
    }
    Some(format!("{stem}{tail}"))
}

/// Longest prefix of `s` within both limits, cut on a character boundary.
fn truncate(s: &str, max_chars: usize, max_bytes: usize) -> &str {
    let end = s
        .char_indices()
        .take(max_chars)
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= max_bytes)
        .last()
        .unwrap_or(0);
    &s[..end]
}
