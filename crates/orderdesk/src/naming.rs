//! Stored file names and storage paths.
//!
//! Only names are computed here; no bytes are written. Client paths come from
//! browser directory uploads (`shoot-1/raw/IMG_001.jpg`) and are normalised
//! before use so they cannot escape the order's storage prefix.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A client-supplied file path split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPath {
    /// Relative directory, `None` for a bare file name.
    pub directory: Option<String>,
    /// Base name including extension.
    pub file_name: String,
    pub stem: String,
    pub extension: Option<String>,
}

/// Splits a client path into directory and base name.
///
/// Backslashes are treated as separators. Empty, `.` and `..` segments are
/// dropped, so the directory is always relative and inside the order.
pub fn split_client_path(raw: &str) -> ClientPath {
    let normalized = raw.replace('\\', "/");
    let mut segments: Vec<&str> = normalized
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();

    let file_name = segments.pop().unwrap_or("file").to_string();
    let directory = if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    };
    let (stem, extension) = split_extension(&file_name);

    ClientPath {
        directory,
        stem: stem.to_string(),
        extension: extension.map(str::to_string),
        file_name,
    }
}

fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        Some(0) | None => (file_name, None),
        Some(idx) if idx + 1 == file_name.len() => (&file_name[..idx], None),
        Some(idx) => (&file_name[..idx], Some(&file_name[idx + 1..])),
    }
}

/// Builds the stored name `[prefix_]<stem>_order<id>_<unix>_<token>.<ext>`.
///
/// The token is five random hex characters, so two uploads of the same file
/// within one second still get distinct names.
pub fn generate_filename(
    client: &ClientPath,
    order_id: i64,
    prefix: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format_filename(client, order_id, prefix, now.timestamp(), &token[..5])
}

fn format_filename(
    client: &ClientPath,
    order_id: i64,
    prefix: Option<&str>,
    unix: i64,
    token: &str,
) -> String {
    let prefix = match prefix {
        Some(p) if !p.is_empty() => format!("{}_", p),
        _ => String::new(),
    };
    let base = format!(
        "{}{}_order{}_{}_{}",
        prefix, client.stem, order_id, unix, token
    );
    match &client.extension {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    }
}

/// Storage path of a file: `orders/<order>/[<directory>/]<file_name>`.
pub fn storage_path(order_id: i64, directory: Option<&str>, file_name: &str) -> String {
    match directory {
        Some(dir) if !dir.is_empty() => format!("orders/{}/{}/{}", order_id, dir, file_name),
        _ => format!("orders/{}/{}", order_id, file_name),
    }
}

/// Path of the processed variant of a stored file: the same directory,
/// with `_<status>` appended to the stem. A path that already carries the
/// suffix is returned unchanged.
pub fn processed_file_path(path: &str, status: &str) -> String {
    let (directory, file_name) = match path.rfind('/') {
        Some(idx) => (Some(&path[..idx]), &path[idx + 1..]),
        None => (None, path),
    };
    let (stem, extension) = split_extension(file_name);
    if stem.ends_with(&format!("_{}", status)) {
        return path.to_string();
    }
    let processed = match extension {
        Some(ext) => format!("{}_{}.{}", stem, status, ext),
        None => format!("{}_{}", stem, status),
    };
    match directory {
        Some(dir) => format!("{}/{}", dir, processed),
        None => processed,
    }
}

/// Guesses a MIME type from the file name.
pub fn guess_mime(file_name: &str) -> Option<String> {
    mime_guess::from_path(file_name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}
