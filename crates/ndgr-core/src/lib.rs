//! NDGR wire parsing.
//!
//! This crate contains everything needed to turn the byte streams served by
//! the NDGR view and segment endpoints into logical chat data: a protobuf
//! wire-format cursor, a length-prefixed frame assembler, and schemaless
//! decoders for the message shapes observed in live traffic.
//!
//! The crate is pure: no I/O, no async, no logging. Stream consumers feed
//! it body chunks and decide what to do with the results.

pub mod chunk;
pub mod decode;
pub mod types;
pub mod wire;

pub use chunk::{DEFAULT_MAX_FRAME_LEN, FrameAssembler, FrameError};
pub use decode::{DecodeError, decode_chunked_message, decode_view_payload};
pub use types::{
    ChatMessage, Cursor, OpaqueCursor, SegmentMessage, Statistics, ViewEntry,
    normalize_epoch_seconds,
};
pub use wire::{WireError, WireReader};
