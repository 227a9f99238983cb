//! Protobuf wire writer for building NDGR test frames.
//!
//! Tests construct the exact byte shapes the live endpoints serve: entry
//! envelopes for the view stream and chunked-message envelopes for segment
//! streams, each prefixed with a varint length when fed through a body.

pub fn varint(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    while v > 0x7f {
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
    out
}

pub fn tag(field: u32, wire: u32) -> Vec<u8> {
    varint(u64::from((field << 3) | wire))
}

pub fn varint_field(field: u32, v: u64) -> Vec<u8> {
    let mut out = tag(field, 0);
    out.extend(varint(v));
    out
}

pub fn bytes_field(field: u32, bytes: &[u8]) -> Vec<u8> {
    let mut out = tag(field, 2);
    out.extend(varint(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out
}

pub fn string_field(field: u32, s: &str) -> Vec<u8> {
    bytes_field(field, s.as_bytes())
}

/// Prefix a payload with its varint length, as the HTTP bodies do.
pub fn length_prefixed(payload: &[u8]) -> Vec<u8> {
    let mut out = varint(payload.len() as u64);
    out.extend_from_slice(payload);
    out
}

// ---------------------------------------------------------------------------
// View-stream frames
// ---------------------------------------------------------------------------

/// A length-prefixed envelope carrying one segment entry.
pub fn view_segment_frame(uri: &str) -> Vec<u8> {
    let segment = string_field(1, uri);
    let entry = bytes_field(1, &segment);
    length_prefixed(&bytes_field(1, &entry))
}

/// A length-prefixed envelope carrying one next entry (`at` seconds,
/// optional new view URI).
pub fn view_next_frame(at: i64, uri: Option<&str>) -> Vec<u8> {
    #[allow(clippy::cast_sign_loss)]
    let mut next = varint_field(1, at as u64);
    if let Some(uri) = uri {
        next.extend(string_field(3, uri));
    }
    let entry = bytes_field(2, &next);
    length_prefixed(&bytes_field(1, &entry))
}

/// A length-prefixed envelope carrying one reconnect entry.
pub fn view_reconnect_frame(at: i64, stream_uri: Option<&str>) -> Vec<u8> {
    #[allow(clippy::cast_sign_loss)]
    let mut reconnect = varint_field(1, at as u64);
    if let Some(uri) = stream_uri {
        reconnect.extend(string_field(2, uri));
    }
    let entry = bytes_field(4, &reconnect);
    length_prefixed(&bytes_field(1, &entry))
}

// ---------------------------------------------------------------------------
// Segment-stream frames
// ---------------------------------------------------------------------------

/// A length-prefixed chunked-message envelope carrying one chat message.
pub fn chat_frame(name: Option<&str>, user_id: Option<&str>, content: &str) -> Vec<u8> {
    let mut chat = Vec::new();
    if let Some(user_id) = user_id {
        chat.extend(string_field(6, user_id));
    }
    if let Some(name) = name {
        chat.extend(string_field(7, name));
    }
    chat.extend(string_field(5, content));
    let message = bytes_field(1, &chat);
    length_prefixed(&bytes_field(1, &message))
}

/// A length-prefixed chunked-message envelope carrying one reconnect
/// directive.
pub fn segment_reconnect_frame(at: Option<i64>, stream_uri: Option<&str>) -> Vec<u8> {
    let mut reconnect = Vec::new();
    if let Some(at) = at {
        #[allow(clippy::cast_sign_loss)]
        let at = at as u64;
        reconnect.extend(varint_field(1, at));
    }
    if let Some(uri) = stream_uri {
        reconnect.extend(string_field(2, uri));
    }
    let message = bytes_field(2, &reconnect);
    length_prefixed(&bytes_field(1, &message))
}

/// A length-prefixed chunked-message envelope carrying a reconnect
/// directive with a text cursor.
pub fn segment_reconnect_frame_with_cursor(stream_uri: Option<&str>, cursor: &str) -> Vec<u8> {
    let mut reconnect = Vec::new();
    if let Some(uri) = stream_uri {
        reconnect.extend(string_field(2, uri));
    }
    reconnect.extend(string_field(3, cursor));
    let message = bytes_field(2, &reconnect);
    length_prefixed(&bytes_field(1, &message))
}

/// A length-prefixed chunked-message envelope carrying the end marker.
pub fn segment_end_frame() -> Vec<u8> {
    let message = bytes_field(5, b"");
    length_prefixed(&bytes_field(1, &message))
}
