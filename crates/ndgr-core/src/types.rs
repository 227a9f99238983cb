//! NDGR data model.
//!
//! These are the logical shapes the decoders in [`crate::decode`] produce.
//! They deliberately carry `Option`s for everything the server is known to
//! omit: the wire schema was reconstructed from observed traffic, not a
//! published `.proto`.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Milliseconds-vs-seconds pivot: epoch values at or above this are
/// millisecond timestamps.
const EPOCH_MILLIS_FLOOR: i64 = 1_000_000_000_000;

/// Normalize a server-supplied `at` value to epoch seconds.
///
/// Values >= 10^12 are milliseconds and get divided down; smaller values
/// are already seconds.
pub fn normalize_epoch_seconds(raw: i64) -> i64 {
    if raw >= EPOCH_MILLIS_FLOOR {
        raw / 1000
    } else {
        raw
    }
}

/// A walk position along a view or segment stream.
///
/// `Now` is a sentinel meaning "current server time" and is never compared
/// numerically with `At` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Now,
    /// Seconds since the Unix epoch.
    At(i64),
}

impl Cursor {
    /// Build a cursor from a raw wire `at` value, normalizing milliseconds.
    pub fn from_at(raw: i64) -> Self {
        Cursor::At(normalize_epoch_seconds(raw))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Now => write!(f, "now"),
            Cursor::At(secs) => write!(f, "{secs}"),
        }
    }
}

// ---------------------------------------------------------------------------
// OpaqueCursor
// ---------------------------------------------------------------------------

/// A server-issued opaque cursor.
///
/// Valid UTF-8 bytes are kept as text; anything else is carried base64
/// encoded with the raw bytes preserved alongside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpaqueCursor {
    Text(String),
    Binary { encoded: String, raw: Vec<u8> },
}

impl OpaqueCursor {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => OpaqueCursor::Text(text.to_owned()),
            Err(_) => OpaqueCursor::Binary {
                encoded: BASE64.encode(bytes),
                raw: bytes.to_vec(),
            },
        }
    }

    /// The form usable as a `cursor` query parameter.
    pub fn as_param(&self) -> &str {
        match self {
            OpaqueCursor::Text(s) => s,
            OpaqueCursor::Binary { encoded, .. } => encoded,
        }
    }
}

// ---------------------------------------------------------------------------
// View entries
// ---------------------------------------------------------------------------

/// One logical entry from the view stream.
///
/// A single encoded entry message may populate more than one of its fields;
/// the decoder emits one `ViewEntry` per populated field, in field order,
/// so nothing the server said is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEntry {
    /// A chat segment stream to open.
    Segment {
        uri: String,
        from: Option<i64>,
        until: Option<i64>,
    },
    /// Continue the walk at `at` (optionally on a new view endpoint).
    Next {
        at: Option<i64>,
        cursor: Option<OpaqueCursor>,
        uri: Option<String>,
    },
    /// Historical backfill position. Decoded but never acted on by the
    /// forward-only walker.
    Previous {
        at: Option<i64>,
        cursor: Option<OpaqueCursor>,
        uri: Option<String>,
    },
    /// Server-directed migration: rebuild the cursor, optionally move to a
    /// new segment stream.
    Reconnect {
        at: Option<i64>,
        stream_uri: Option<String>,
        cursor: Option<OpaqueCursor>,
    },
    Ping,
    History,
}

// ---------------------------------------------------------------------------
// Segment messages
// ---------------------------------------------------------------------------

/// A single chat payload. Only `content` matters downstream; the rest is
/// surfaced for attribution and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatMessage {
    pub room_name: Option<String>,
    pub thread_id: Option<i64>,
    pub no: Option<i64>,
    pub vpos: Option<i64>,
    pub content: Option<String>,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub mail: Option<String>,
    pub anonymous: bool,
}

/// Broadcast-level counters pushed alongside chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub viewers: Option<i64>,
    pub comments: Option<i64>,
}

/// One logical message from a segment stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentMessage {
    Chat(ChatMessage),
    Reconnect {
        at: Option<i64>,
        stream_uri: Option<String>,
        cursor: Option<OpaqueCursor>,
    },
    Statistics(Statistics),
    Ping,
    End,
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_pass_through() {
        assert_eq!(normalize_epoch_seconds(1_700_000_000), 1_700_000_000);
        assert_eq!(normalize_epoch_seconds(0), 0);
    }

    #[test]
    fn milliseconds_are_divided_down() {
        assert_eq!(normalize_epoch_seconds(1_700_000_000_000), 1_700_000_000);
        assert_eq!(normalize_epoch_seconds(1_700_000_000_999), 1_700_000_000);
    }

    #[test]
    fn cursor_renders_as_query_value() {
        assert_eq!(Cursor::Now.to_string(), "now");
        assert_eq!(Cursor::At(1_700_000_000).to_string(), "1700000000");
        assert_eq!(Cursor::from_at(1_700_000_000_500).to_string(), "1700000000");
    }

    #[test]
    fn utf8_cursor_stays_text() {
        let c = OpaqueCursor::from_bytes(b"abc-123");
        assert_eq!(c, OpaqueCursor::Text("abc-123".to_owned()));
        assert_eq!(c.as_param(), "abc-123");
    }

    #[test]
    fn binary_cursor_keeps_raw_bytes() {
        let raw = [0xff, 0x00, 0xfe];
        let c = OpaqueCursor::from_bytes(&raw);
        match &c {
            OpaqueCursor::Binary { encoded, raw: kept } => {
                assert_eq!(encoded, "/wD+");
                assert_eq!(kept, &raw);
            }
            OpaqueCursor::Text(_) => panic!("expected binary cursor"),
        }
        assert_eq!(c.as_param(), "/wD+");
    }
}
