//! Type-tagged table metadata encoding.
//!
//! ```text
//! [tag_len: u32 LE][tag: utf-8][json_len: u32 LE][json: serde encoding of Table]
//! ```
//! The tag names the table kind and is checked against the decoded table.
//! Deep copies go through the same encoding.

use tracing::warn;

use crate::catalog::table::{IndexExtState, Table, TableState};
use crate::error::CodecError;

/// Tags this codec understands.
const KNOWN_TAGS: [&str; 3] = ["OLAP", "LAKE", "MATERIALIZED_VIEW"];

/// Longest tag accepted when decoding.
const MAX_TAG_LEN: usize = 64;

/// Encode `table` as tagged bytes.
pub fn encode(table: &Table) -> Result<Vec<u8>, CodecError> {
    let tag = table.kind.tag().as_bytes();
    let json = serde_json::to_vec(table)
        .map_err(|e| CodecError::CorruptMetadata(format!("failed to serialize table: {e}")))?;

    let mut buf = Vec::with_capacity(8 + tag.len() + json.len());
    buf.extend_from_slice(&(tag.len() as u32).to_le_bytes());
    buf.extend_from_slice(tag);
    buf.extend_from_slice(&(json.len() as u32).to_le_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Decode tagged bytes produced by [`encode`].
pub fn decode(data: &[u8]) -> Result<Table, CodecError> {
    let (tag, rest) = read_chunk(data, "tag")?;
    if tag.len() > MAX_TAG_LEN {
        return Err(CodecError::CorruptMetadata(format!(
            "tag length {} exceeds {MAX_TAG_LEN}",
            tag.len()
        )));
    }
    let tag = std::str::from_utf8(tag)
        .map_err(|_| CodecError::CorruptMetadata("tag is not utf-8".to_string()))?;
    if !KNOWN_TAGS.contains(&tag) {
        return Err(CodecError::CorruptMetadata(format!("unknown table type '{tag}'")));
    }

    let (json, rest) = read_chunk(rest, "payload")?;
    if !rest.is_empty() {
        return Err(CodecError::CorruptMetadata(format!(
            "{} trailing bytes after payload",
            rest.len()
        )));
    }

    let table: Table = serde_json::from_slice(json)
        .map_err(|e| CodecError::CorruptMetadata(format!("invalid {tag} payload: {e}")))?;
    if table.kind.tag() != tag {
        return Err(CodecError::CorruptMetadata(format!(
            "tag {tag} does not match decoded {} table",
            table.kind.tag()
        )));
    }
    Ok(table)
}

/// Split a `[len: u32 LE][bytes]` chunk off the front of `data`.
fn read_chunk<'a>(data: &'a [u8], what: &str) -> Result<(&'a [u8], &'a [u8]), CodecError> {
    if data.len() < 4 {
        return Err(CodecError::CorruptMetadata(format!("truncated {what} length")));
    }
    let len = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let rest = &data[4..];
    if rest.len() < len {
        return Err(CodecError::CorruptMetadata(format!(
            "truncated {what}: need {len} bytes, have {}",
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}

/// Copy `table` through its encoded form.
pub fn deep_copy(table: &Table) -> Result<Table, CodecError> {
    encode(table).and_then(|bytes| decode(&bytes)).map_err(|e| {
        warn!(table = %table.name, error = %e, "failed to copy table");
        CodecError::CopyFailed {
            table: table.name.clone(),
            reason: e.to_string(),
        }
    })
}

/// Deep copy restricted to `reserved_partitions` (every partition when
/// `None`).
///
/// With `reset_state` the copy's table state goes back to `Normal`. With
/// `IndexExtState::Visible` shadow indices are left out of the copy.
/// Temporary partitions are never copied.
pub fn selective_copy(
    table: &Table,
    reserved_partitions: Option<&[&str]>,
    reset_state: bool,
    ext: IndexExtState,
) -> Result<Table, CodecError> {
    let mut copy = deep_copy(table)?;

    if let Some(names) = reserved_partitions {
        copy.partitions
            .retain(|_, p| names.iter().any(|name| *name == p.name));
    }
    copy.temp_partitions.clear();

    if reset_state {
        copy.state = TableState::Normal;
    }
    if ext == IndexExtState::Visible {
        for partition in copy.partitions.values_mut() {
            partition.drop_shadow_indices();
        }
    }
    Ok(copy)
}
