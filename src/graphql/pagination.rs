//! Cursor-based pagination helpers
//!
//! Cursors are opaque base64 strings carrying the partition's short type
//! key plus an offset. The key makes cursors from heterogeneous feeds
//! unambiguous: each per-type partition pages independently, and callers
//! can interleave partitions without losing any per-type cursor.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Encode an offset as a cursor string for one type partition
pub fn encode_cursor(type_key: &str, offset: i64) -> String {
    BASE64.encode(format!("cursor:{type_key}:{offset}"))
}

/// Decode a cursor string to its type key and offset
pub fn decode_cursor(cursor: &str) -> Result<(String, i64), &'static str> {
    let decoded = BASE64.decode(cursor).map_err(|_| "invalid cursor format")?;
    let s = String::from_utf8(decoded).map_err(|_| "invalid cursor encoding")?;

    let rest = s.strip_prefix("cursor:").ok_or("invalid cursor prefix")?;
    let (key, offset) = rest.rsplit_once(':').ok_or("invalid cursor shape")?;
    let offset = offset.parse().map_err(|_| "invalid cursor value")?;
    Ok((key.to_string(), offset))
}

/// Parse pagination arguments into offset and limit. The cursor must carry
/// the expected partition key; a cursor from another partition is invalid.
pub fn parse_pagination_args(
    first: Option<i64>,
    after: Option<&str>,
    type_key: &str,
) -> Result<(i64, i64), &'static str> {
    let limit = first.unwrap_or(25).clamp(1, 100);

    let offset = if let Some(cursor) = after {
        let (key, offset) = decode_cursor(cursor)?;
        if key != type_key {
            return Err("cursor belongs to a different partition");
        }
        offset + 1 // Start after the cursor
    } else {
        0
    };

    Ok((offset, limit))
}
