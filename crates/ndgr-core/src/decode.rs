//! Schemaless decoders for the NDGR message types.
//!
//! The server ships the same logical field in several wire encodings: a
//! scalar may arrive raw, as fixed64, or boxed in a single-field wrapper
//! message (`Int64Value` / `StringValue`), and two of the entry fields are
//! sometimes bare URL strings instead of nested messages. Every scalar is
//! therefore routed through the flexible readers below, and the message
//! decoders are per-field-number handlers rather than generated structs.
//!
//! Tolerance policy: unknown fields are skipped by wire type; a known field
//! with an unusable shape is dropped, never a hard error; a truncated
//! sub-message loses only that sub-message. Only corruption at the frame's
//! own tag/length level fails the frame.

use thiserror::Error;

use crate::types::{ChatMessage, OpaqueCursor, SegmentMessage, Statistics, ViewEntry};
use crate::wire::{WireError, WireReader, wire_type};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A frame that could not be decoded. Callers drop the frame and keep
/// consuming the stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    Wire(#[from] WireError),
}

// ---------------------------------------------------------------------------
// Flexible field readers
// ---------------------------------------------------------------------------

/// Read an int64 field tolerating the three observed encodings: raw varint,
/// little-endian fixed64, and a length-delimited `Int64Value` wrapper.
#[allow(clippy::cast_possible_wrap)]
pub fn read_int64_flexible(
    r: &mut WireReader<'_>,
    wire: u32,
) -> Result<Option<i64>, WireError> {
    match wire {
        wire_type::VARINT => Ok(Some(r.read_var_u64()? as i64)),
        wire_type::FIXED64 => Ok(Some(r.read_fixed64()? as i64)),
        wire_type::LENGTH_DELIMITED => Ok(decode_int64_wrapper(r.read_length_delimited()?)),
        other => {
            r.skip(other)?;
            Ok(None)
        }
    }
}

/// Unwrap `Int64Value { 1: value }`; the inner field itself may be a varint
/// or fixed64. Anything malformed yields `None`.
#[allow(clippy::cast_possible_wrap)]
fn decode_int64_wrapper(bytes: &[u8]) -> Option<i64> {
    let mut r = WireReader::new(bytes);
    let mut value = None;
    loop {
        let (field, wire) = match r.read_tag() {
            Ok(Some(tag)) => tag,
            Ok(None) => return value,
            Err(_) => return value,
        };
        match (field, wire) {
            (1, wire_type::VARINT) => match r.read_var_u64() {
                Ok(v) => value = Some(v as i64),
                Err(_) => return value,
            },
            (1, wire_type::FIXED64) => match r.read_fixed64() {
                Ok(v) => value = Some(v as i64),
                Err(_) => return value,
            },
            (_, wire) => {
                if r.skip(wire).is_err() {
                    return value;
                }
            }
        }
    }
}

/// Read a string field that may arrive as plain length-delimited bytes or
/// boxed in a `StringValue { 1: string }` wrapper. Non-UTF-8 bytes that are
/// not a wrapper yield `None`.
pub fn read_string_flexible(
    r: &mut WireReader<'_>,
    wire: u32,
) -> Result<Option<String>, WireError> {
    if wire != wire_type::LENGTH_DELIMITED {
        r.skip(wire)?;
        return Ok(None);
    }
    Ok(decode_string_bytes(r.read_length_delimited()?))
}

fn decode_string_bytes(bytes: &[u8]) -> Option<String> {
    if let Some(inner) = try_string_value(bytes) {
        return Some(inner);
    }
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

/// Strict `StringValue` probe: a single field #1 length-delimited value that
/// consumes the whole buffer and holds valid UTF-8.
fn try_string_value(bytes: &[u8]) -> Option<String> {
    let mut r = WireReader::new(bytes);
    match r.read_tag() {
        Ok(Some((1, wire_type::LENGTH_DELIMITED))) => {}
        _ => return None,
    }
    let inner = r.read_length_delimited().ok()?;
    if r.has_remaining() {
        return None;
    }
    std::str::from_utf8(inner).ok().map(str::to_owned)
}

/// Read an opaque-cursor field: UTF-8 bytes stay text, anything else is
/// preserved base64-encoded alongside the raw bytes.
pub fn read_cursor_flexible(
    r: &mut WireReader<'_>,
    wire: u32,
) -> Result<Option<OpaqueCursor>, WireError> {
    if wire != wire_type::LENGTH_DELIMITED {
        r.skip(wire)?;
        return Ok(None);
    }
    Ok(Some(OpaqueCursor::from_bytes(r.read_length_delimited()?)))
}

/// The bare-URL fast path for entry fields #2/#3: valid UTF-8 starting with
/// an HTTP scheme.
fn as_bare_url(bytes: &[u8]) -> Option<String> {
    let s = std::str::from_utf8(bytes).ok()?;
    if s.starts_with("https://") || s.starts_with("http://") {
        Some(s.to_owned())
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// View payload
// ---------------------------------------------------------------------------

/// Decode one view-stream frame into its logical entries.
///
/// Heuristic: if the first tag is field #1 or #2 with wire type 2, the frame
/// is a `ChunkedEntry` envelope carrying repeated entries under both field
/// numbers; otherwise the frame is a single bare entry. An empty buffer is
/// an empty entry list.
pub fn decode_view_payload(buf: &[u8]) -> Result<Vec<ViewEntry>, DecodeError> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }

    let mut peek = WireReader::new(buf);
    let is_envelope = matches!(
        peek.read_tag(),
        Ok(Some((field, wire))) if (field == 1 || field == 2) && wire == wire_type::LENGTH_DELIMITED
    );

    let mut entries = Vec::new();
    if is_envelope {
        let mut r = WireReader::new(buf);
        while let Some((field, wire)) = r.read_tag()? {
            match (field, wire) {
                (1 | 2, wire_type::LENGTH_DELIMITED) => {
                    decode_entry(r.read_length_delimited()?, &mut entries);
                }
                (_, wire) => r.skip(wire)?,
            }
        }
    } else {
        decode_entry(buf, &mut entries);
    }
    Ok(entries)
}

/// Decode one entry message. A single entry may populate several of fields
/// #1..#6; one `ViewEntry` is emitted per populated field, in field order.
/// Truncation inside the entry drops only the remainder of the entry.
fn decode_entry(buf: &[u8], out: &mut Vec<ViewEntry>) {
    let mut r = WireReader::new(buf);
    loop {
        let (field, wire) = match r.read_tag() {
            Ok(Some(tag)) => tag,
            _ => return,
        };
        let step = match field {
            1 => decode_segment_field(&mut r, wire, out),
            2 => decode_walk_field(&mut r, wire, out, WalkKind::Next),
            3 => decode_walk_field(&mut r, wire, out, WalkKind::Previous),
            4 => decode_reconnect_field(&mut r, wire, out),
            5 => decode_unit_field(&mut r, wire, out, ViewEntry::Ping),
            6 => decode_unit_field(&mut r, wire, out, ViewEntry::History),
            _ => r.skip(wire),
        };
        if step.is_err() {
            return;
        }
    }
}

fn decode_segment_field(
    r: &mut WireReader<'_>,
    wire: u32,
    out: &mut Vec<ViewEntry>,
) -> Result<(), WireError> {
    if wire != wire_type::LENGTH_DELIMITED {
        return r.skip(wire);
    }
    let bytes = r.read_length_delimited()?;
    let mut inner = WireReader::new(bytes);
    let mut uri = None;
    let mut from = None;
    let mut until = None;
    while let Ok(Some((field, wire))) = inner.read_tag() {
        let step = match field {
            1 => read_string_flexible(&mut inner, wire).map(|v| uri = v.or(uri.take())),
            2 => read_int64_flexible(&mut inner, wire).map(|v| from = v.or(from.take())),
            3 => read_int64_flexible(&mut inner, wire).map(|v| until = v.or(until.take())),
            _ => inner.skip(wire),
        };
        if step.is_err() {
            break;
        }
    }
    // A segment without a URI is not actionable.
    if let Some(uri) = uri {
        out.push(ViewEntry::Segment { uri, from, until });
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum WalkKind {
    Next,
    Previous,
}

/// Fields #2 and #3 arrive either as a nested walk message or, at one
/// observed server revision, as a bare URL string. The string path is tried
/// first; bytes that do not look like a URL fall back to nested decoding.
fn decode_walk_field(
    r: &mut WireReader<'_>,
    wire: u32,
    out: &mut Vec<ViewEntry>,
    kind: WalkKind,
) -> Result<(), WireError> {
    if wire != wire_type::LENGTH_DELIMITED {
        return r.skip(wire);
    }
    let bytes = r.read_length_delimited()?;

    if let Some(uri) = as_bare_url(bytes) {
        out.push(make_walk_entry(kind, None, None, Some(uri)));
        return Ok(());
    }

    let mut inner = WireReader::new(bytes);
    let mut at = None;
    let mut cursor = None;
    let mut uri = None;
    while let Ok(Some((field, wire))) = inner.read_tag() {
        let step = match field {
            1 => read_int64_flexible(&mut inner, wire).map(|v| at = v.or(at.take())),
            2 => read_cursor_flexible(&mut inner, wire).map(|v| cursor = v.or(cursor.take())),
            3 => read_string_flexible(&mut inner, wire).map(|v| uri = v.or(uri.take())),
            _ => inner.skip(wire),
        };
        if step.is_err() {
            break;
        }
    }
    out.push(make_walk_entry(kind, at, cursor, uri));
    Ok(())
}

fn make_walk_entry(
    kind: WalkKind,
    at: Option<i64>,
    cursor: Option<OpaqueCursor>,
    uri: Option<String>,
) -> ViewEntry {
    match kind {
        WalkKind::Next => ViewEntry::Next { at, cursor, uri },
        WalkKind::Previous => ViewEntry::Previous { at, cursor, uri },
    }
}

fn decode_reconnect_field(
    r: &mut WireReader<'_>,
    wire: u32,
    out: &mut Vec<ViewEntry>,
) -> Result<(), WireError> {
    if wire != wire_type::LENGTH_DELIMITED {
        return r.skip(wire);
    }
    let bytes = r.read_length_delimited()?;
    let (at, stream_uri, cursor) = decode_reconnect_body(bytes);
    out.push(ViewEntry::Reconnect {
        at,
        stream_uri,
        cursor,
    });
    Ok(())
}

fn decode_reconnect_body(bytes: &[u8]) -> (Option<i64>, Option<String>, Option<OpaqueCursor>) {
    let mut inner = WireReader::new(bytes);
    let mut at = None;
    let mut stream_uri = None;
    let mut cursor = None;
    while let Ok(Some((field, wire))) = inner.read_tag() {
        let step = match field {
            1 => read_int64_flexible(&mut inner, wire).map(|v| at = v.or(at.take())),
            2 => read_string_flexible(&mut inner, wire).map(|v| stream_uri = v.or(stream_uri.take())),
            3 => read_cursor_flexible(&mut inner, wire).map(|v| cursor = v.or(cursor.take())),
            _ => inner.skip(wire),
        };
        if step.is_err() {
            break;
        }
    }
    (at, stream_uri, cursor)
}

fn decode_unit_field(
    r: &mut WireReader<'_>,
    wire: u32,
    out: &mut Vec<ViewEntry>,
    entry: ViewEntry,
) -> Result<(), WireError> {
    r.skip(wire)?;
    out.push(entry);
    Ok(())
}

// ---------------------------------------------------------------------------
// Segment payload
// ---------------------------------------------------------------------------

/// Decode one segment-stream frame: a `ChunkedMessage` envelope with
/// repeated messages under field #1.
pub fn decode_chunked_message(buf: &[u8]) -> Result<Vec<SegmentMessage>, DecodeError> {
    let mut out = Vec::new();
    let mut r = WireReader::new(buf);
    while let Some((field, wire)) = r.read_tag()? {
        match (field, wire) {
            (1, wire_type::LENGTH_DELIMITED) => {
                decode_segment_message(r.read_length_delimited()?, &mut out);
            }
            (_, wire) => r.skip(wire)?,
        }
    }
    Ok(out)
}

fn decode_segment_message(buf: &[u8], out: &mut Vec<SegmentMessage>) {
    let mut r = WireReader::new(buf);
    loop {
        let (field, wire) = match r.read_tag() {
            Ok(Some(tag)) => tag,
            _ => return,
        };
        let step = match (field, wire) {
            (1, wire_type::LENGTH_DELIMITED) => r.read_length_delimited().map(|bytes| {
                out.push(SegmentMessage::Chat(decode_chat(bytes)));
            }),
            (2, wire_type::LENGTH_DELIMITED) => r.read_length_delimited().map(|bytes| {
                let (at, stream_uri, cursor) = decode_reconnect_body(bytes);
                out.push(SegmentMessage::Reconnect {
                    at,
                    stream_uri,
                    cursor,
                });
            }),
            (3, wire_type::LENGTH_DELIMITED) => r.read_length_delimited().map(|bytes| {
                out.push(SegmentMessage::Statistics(decode_statistics(bytes)));
            }),
            (4, wire) => r.skip(wire).map(|()| out.push(SegmentMessage::Ping)),
            (5, wire) => r.skip(wire).map(|()| out.push(SegmentMessage::End)),
            (_, wire) => r.skip(wire),
        };
        if step.is_err() {
            return;
        }
    }
}

fn decode_chat(buf: &[u8]) -> ChatMessage {
    let mut r = WireReader::new(buf);
    let mut chat = ChatMessage::default();
    while let Ok(Some((field, wire))) = r.read_tag() {
        let step = match field {
            1 => read_string_flexible(&mut r, wire).map(|v| chat.room_name = v.or(chat.room_name.take())),
            2 => read_int64_flexible(&mut r, wire).map(|v| chat.thread_id = v.or(chat.thread_id.take())),
            3 => read_int64_flexible(&mut r, wire).map(|v| chat.no = v.or(chat.no.take())),
            4 => read_int64_flexible(&mut r, wire).map(|v| chat.vpos = v.or(chat.vpos.take())),
            5 => read_string_flexible(&mut r, wire).map(|v| chat.content = v.or(chat.content.take())),
            6 => read_string_flexible(&mut r, wire).map(|v| chat.user_id = v.or(chat.user_id.take())),
            7 => read_string_flexible(&mut r, wire).map(|v| chat.name = v.or(chat.name.take())),
            8 => read_string_flexible(&mut r, wire).map(|v| chat.mail = v.or(chat.mail.take())),
            9 => read_int64_flexible(&mut r, wire).map(|v| {
                if let Some(v) = v {
                    chat.anonymous = v != 0;
                }
            }),
            _ => r.skip(wire),
        };
        if step.is_err() {
            break;
        }
    }
    chat
}

fn decode_statistics(buf: &[u8]) -> Statistics {
    let mut r = WireReader::new(buf);
    let mut stats = Statistics::default();
    while let Ok(Some((field, wire))) = r.read_tag() {
        let step = match field {
            1 => read_int64_flexible(&mut r, wire).map(|v| stats.viewers = v.or(stats.viewers.take())),
            2 => read_int64_flexible(&mut r, wire).map(|v| stats.comments = v.or(stats.comments.take())),
            _ => r.skip(wire),
        };
        if step.is_err() {
            break;
        }
    }
    stats
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
