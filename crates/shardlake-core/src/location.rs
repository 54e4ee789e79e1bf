//! Storage group resolution.
//!
//! A lake table keeps all of its tablet data and metadata under a single
//! storage group: the object storage URI handed out by the shard service,
//! scoped by the table id (`s3://bucket/service/<table_id>/`).

use url::Url;

use crate::error::StorageError;
use crate::types::TableId;

/// Derive the normalized storage group URI for `table_id` under `base_uri`.
///
/// The candidate path is `"{base_uri}/{table_id}/"`. It must parse as a
/// hierarchical URI with a scheme, written only with characters a URI
/// allows. Nothing is percent-encoded on the caller's behalf. The returned form has `.` and `..`
/// segments resolved and redundant slashes collapsed, and always ends with
/// a trailing slash.
pub fn derive_storage_group(base_uri: &str, table_id: TableId) -> Result<String, StorageError> {
    let path = format!("{base_uri}/{table_id}/");

    if let Some(c) = path.chars().find(|c| is_illegal_uri_char(*c)) {
        return Err(StorageError::InvalidStorageLocation {
            reason: format!("illegal character {c:?}"),
            path,
        });
    }

    let mut url = Url::parse(&path).map_err(|e| {
        let reason = match e {
            url::ParseError::RelativeUrlWithoutBase => "no scheme".to_string(),
            other => other.to_string(),
        };
        StorageError::InvalidStorageLocation {
            path: path.clone(),
            reason,
        }
    })?;

    if url.cannot_be_a_base() {
        return Err(StorageError::InvalidStorageLocation {
            path,
            reason: "opaque uri, expected scheme://authority/path".to_string(),
        });
    }

    let collapsed = collapse_slashes(url.path());
    if collapsed != url.path() {
        url.set_path(&collapsed);
    }

    Ok(url.to_string())
}

/// Characters that may not appear anywhere in a URI, escaped or not.
fn is_illegal_uri_char(c: char) -> bool {
    c.is_control()
        || c.is_whitespace()
        || matches!(c, '{' | '}' | '"' | '<' | '>' | '\\' | '^' | '`' | '|')
}

/// Drop empty path segments, keeping the leading and trailing slash.
fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    out.push('/');
    out
}
