//! Shared key generation for storage backends.
//!
//! Key format: `processes/{process_number}/documents/{document_id}/{filename}`.

/// Replace anything outside `[A-Za-z0-9._-]` with `_` so the filename is safe
/// as a key segment on every backend. Runs of dots collapse to a single dot,
/// so a generated key can never contain `..` and always passes the backends'
/// traversal guard. Empty or dot-only names fall back to `document`.
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for c in name.trim().chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
            c
        } else {
            '_'
        };
        if mapped == '.' && cleaned.ends_with('.') {
            continue;
        }
        cleaned.push(mapped);
    }

    if cleaned.is_empty() || cleaned == "." {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Generate the storage key for a document. All backends must use this format
/// for consistency.
pub fn document_storage_key(process_number: &str, document_id: &str, filename: &str) -> String {
    format!(
        "processes/{}/documents/{}/{}",
        sanitize_filename(process_number),
        sanitize_filename(document_id),
        sanitize_filename(filename)
    )
}
