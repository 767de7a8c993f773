//! Scan directories and file names inside a session.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use tracing::debug;

use prearc_dicom::{parse_object, ObjectInfo};
use prearc_types::sanitize_label;

use crate::catalog::SessionCatalog;

const MAX_FILE_NAME: usize = 255;
/// Generated names get at most this many numbered variants before giving up
/// on uniqueness and overwriting.
const MAX_NAME_VARIANTS: u32 = 10_000;

/// Scan id (and subdirectory) for an object: the series number when present,
/// otherwise a short stable digest of the series UID.
pub fn scan_id_for(info: &ObjectInfo) -> String {
    if let Some(n) = info.series_number {
        return n.to_string();
    }
    match info.series_instance_uid.as_deref() {
        Some(uid) => {
            let digest = blake3::hash(uid.as_bytes());
            format!("s{}", &hex::encode(digest.as_bytes())[..8])
        }
        None => "0".to_string(),
    }
}

/// Whether `name` can be used verbatim as a file name on every platform we
/// store to.
pub fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FILE_NAME
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name
            .chars()
            .any(|c| c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
}

/// Base of a generated name: `<sop instance uid>.dcm`.
pub fn generated_name(info: &ObjectInfo) -> String {
    let base = sanitize_label(&info.sop_instance_uid.replace('.', "-"));
    let base = if base.is_empty() { "object".to_string() } else { base };
    format!("{base}.dcm")
}

/// Why a name was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameChoice {
    /// The sender's name, free or holding the same object.
    Original,
    /// A generated name.
    Generated,
}

/// Whether the file stored at `uri` (relative to `session_dir`) holds the
/// same logical object as `info`. The catalog is consulted first; files it
/// does not know are parsed.
pub fn holds_same_object(
    session_dir: &Path,
    catalog: &SessionCatalog,
    uri: &str,
    info: &ObjectInfo,
) -> bool {
    if let Some(entry) = catalog.entry(uri) {
        return info.same_object(&entry.sop_class_uid, &entry.sop_instance_uid);
    }
    let Ok(bytes) = fs::read(session_dir.join(uri)) else {
        return false;
    };
    match parse_object(&mut Cursor::new(bytes.as_slice())) {
        Ok(existing) => info.same_object(&existing.sop_class_uid, &existing.sop_instance_uid),
        Err(_) => false,
    }
}

/// Whether `<scan>/<name>` is unused in the session or already holds the
/// same object as `info`.
pub fn name_is_free_or_same(
    session_dir: &Path,
    catalog: &SessionCatalog,
    scan: &str,
    name: &str,
    info: &ObjectInfo,
) -> bool {
    let uri = format!("{scan}/{name}");
    let taken = catalog.entry(&uri).is_some() || session_dir.join(&uri).exists();
    !taken || holds_same_object(session_dir, catalog, &uri, info)
}

/// The `n`th numbered variant of a file name: `IM1` gives `IM1-1`,
/// `a.dcm` gives `a-1.dcm`.
pub fn variant_name(name: &str, n: u32) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{n}.{ext}"),
        _ => format!("{name}-{n}"),
    }
}

/// First numbered variant of `name` that `is_free` accepts.
pub fn first_free_variant(name: &str, is_free: impl Fn(&str) -> bool) -> Option<String> {
    (1..MAX_NAME_VARIANTS)
        .map(|n| variant_name(name, n))
        .find(|candidate| is_free(candidate))
}

/// Pick the file name for an object inside `<session_dir>/<scan>`.
///
/// With `force_rename` a generated name is always used. Otherwise the
/// original name is kept unless it is invalid or taken by a different
/// object. A generated name that is taken by a different object gets a
/// numeric suffix.
pub fn choose_file_name(
    session_dir: &Path,
    catalog: &SessionCatalog,
    scan: &str,
    original: Option<&str>,
    info: &ObjectInfo,
    force_rename: bool,
) -> (String, NameChoice) {
    let free_or_same = |name: &str| name_is_free_or_same(session_dir, catalog, scan, name, info);

    if !force_rename {
        if let Some(name) = original.filter(|n| is_valid_file_name(n)) {
            if free_or_same(name) {
                return (name.to_string(), NameChoice::Original);
            }
            debug!(name, scan, "original name taken by another object");
        }
    }

    let base = generated_name(info);
    if free_or_same(&base) {
        return (base, NameChoice::Generated);
    }
    let name = first_free_variant(&base, free_or_same).unwrap_or(base);
    (name, NameChoice::Generated)
}
