//! Helpers for sanitizing data before it enters log lines and span fields.
//!
//! Logs are shared when debugging customer issues; these functions keep
//! home-directory paths and e-mail addresses out of them.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks the local part of an e-mail address, keeping its first character.
///
/// - `jane.doe@example.com` → `j***@example.com`
/// - `not-an-email` → `***`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}
