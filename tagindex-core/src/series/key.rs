//! Series key encoding
//!
//! A series key is the identity of a series: its metric name plus tag set.
//!
//! ```text
//! ┌──────────┬──────────┬──────┬───────────┬─────────────────────────────┐
//! │ total len│ name len │ name │ tag count │ (klen, key, vlen, value)... │
//! │ 4 bytes  │ 2 bytes  │  N   │  2 bytes  │                             │
//! └──────────┴──────────┴──────┴───────────┴─────────────────────────────┘
//! ```
//!
//! All integers are big-endian. The total length excludes its own 4 bytes.

use crate::{IndexError, Result, Tags};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encode a metric name and tag set into a series key.
///
/// Fails if the name, a tag key, a tag value or the tag count does not fit
/// its 2-byte length field.
pub fn encode_series_key(name: &[u8], tags: &Tags) -> Result<Bytes> {
    let name_len = field_len("metric name", name.len())?;
    let tag_count = field_len("tag count", tags.len())?;
    let body_len = 2 + name.len() + 2 + tags.iter().map(|t| 4 + t.size()).sum::<usize>();
    let total = u32::try_from(body_len).map_err(|_| {
        IndexError::SeriesKey(format!("series key of {} bytes is too long", body_len))
    })?;

    let mut buf = BytesMut::with_capacity(4 + body_len);
    buf.put_u32(total);
    buf.put_u16(name_len);
    buf.put_slice(name);
    buf.put_u16(tag_count);
    for tag in tags {
        buf.put_u16(field_len("tag key", tag.key.len())?);
        buf.put_slice(&tag.key);
        buf.put_u16(field_len("tag value", tag.value.len())?);
        buf.put_slice(&tag.value);
    }

    Ok(buf.freeze())
}

fn field_len(what: &str, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| {
        IndexError::SeriesKey(format!("{} of {} exceeds {}", what, len, u16::MAX))
    })
}

/// Decode a series key into its metric name and tags
pub fn parse_series_key(key: &[u8]) -> Result<(Bytes, Tags)> {
    let mut cursor = key;

    let body_len = read_u32(&mut cursor)? as usize;
    if cursor.remaining() != body_len {
        return Err(IndexError::SeriesKey(format!(
            "length mismatch: header says {}, found {}",
            body_len,
            cursor.remaining()
        )));
    }

    let name = read_field(&mut cursor)?;
    let count = read_u16(&mut cursor)?;
    let mut tags = Tags::new();
    for _ in 0..count {
        let k = read_field(&mut cursor)?;
        let v = read_field(&mut cursor)?;
        tags.set(k, v);
    }

    if cursor.has_remaining() {
        return Err(IndexError::SeriesKey(format!(
            "{} trailing bytes",
            cursor.remaining()
        )));
    }

    Ok((name, tags))
}

fn read_u32(cursor: &mut &[u8]) -> Result<u32> {
    if cursor.remaining() < 4 {
        return Err(IndexError::SeriesKey("truncated length".into()));
    }
    Ok(cursor.get_u32())
}

fn read_u16(cursor: &mut &[u8]) -> Result<u16> {
    if cursor.remaining() < 2 {
        return Err(IndexError::SeriesKey("truncated field length".into()));
    }
    Ok(cursor.get_u16())
}

fn read_field(cursor: &mut &[u8]) -> Result<Bytes> {
    let len = read_u16(cursor)? as usize;
    if cursor.remaining() < len {
        return Err(IndexError::SeriesKey(format!(
            "field of {} bytes exceeds remaining {}",
            len,
            cursor.remaining()
        )));
    }
    Ok(cursor.copy_to_bytes(len))
}
