//! Length-prefixed frame assembly.
//!
//! The view and segment endpoints deliver their bodies as a sequence of
//! `(varint length, payload)` frames, but HTTP hands the body over in
//! arbitrary chunks. [`FrameAssembler`] buffers partial input across reads
//! and emits only complete frames, in order.

use thiserror::Error;

/// Upper bound on a single frame before the stream is considered corrupt.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from frame assembly. Both variants discard the internal buffer;
/// the caller logs and keeps feeding subsequent chunks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {len} exceeds cap {cap}")]
    Oversized { len: u64, cap: usize },
    #[error("malformed length prefix")]
    BadLengthPrefix,
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

/// Stateful reducer from byte chunks to complete frames.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameAssembler {
    pub fn new(max_frame_len: usize) -> Self {
        FrameAssembler {
            buf: Vec::new(),
            max_frame_len,
        }
    }

    /// Bytes currently buffered (a partial length prefix or frame tail).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append `chunk` and drain every complete frame.
    ///
    /// Frames are returned in stream order; a partial trailing frame stays
    /// buffered until a later call completes it. An oversized or malformed
    /// length prefix discards the whole buffer and returns an error.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut offset = 0usize;
        loop {
            match decode_length_prefix(&self.buf[offset..]) {
                LengthPrefix::Incomplete => break,
                LengthPrefix::Malformed => {
                    self.buf.clear();
                    return Err(FrameError::BadLengthPrefix);
                }
                LengthPrefix::Complete { len, prefix_bytes } => {
                    if len > self.max_frame_len as u64 {
                        let cap = self.max_frame_len;
                        self.buf.clear();
                        return Err(FrameError::Oversized { len, cap });
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let len = len as usize;
                    let start = offset + prefix_bytes;
                    if self.buf.len() - start < len {
                        break;
                    }
                    frames.push(self.buf[start..start + len].to_vec());
                    offset = start + len;
                }
            }
        }
        self.buf.drain(..offset);
        Ok(frames)
    }
}

enum LengthPrefix {
    /// Not enough bytes yet to finish the varint.
    Incomplete,
    /// Varint runs past 10 bytes; the stream is corrupt.
    Malformed,
    Complete { len: u64, prefix_bytes: usize },
}

fn decode_length_prefix(buf: &[u8]) -> LengthPrefix {
    let mut out: u64 = 0;
    for (i, &b) in buf.iter().take(10).enumerate() {
        out |= u64::from(b & 0x7f) << (7 * i as u32);
        if b & 0x80 == 0 {
            return LengthPrefix::Complete {
                len: out,
                prefix_bytes: i + 1,
            };
        }
    }
    if buf.len() >= 10 {
        LengthPrefix::Malformed
    } else {
        LengthPrefix::Incomplete
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut len = payload.len() as u64;
        loop {
            let b = (len & 0x7f) as u8;
            len >>= 7;
            if len == 0 {
                out.push(b);
                break;
            }
            out.push(b | 0x80);
        }
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn whole_frame_in_one_chunk() {
        let mut asm = FrameAssembler::default();
        let frames = asm.feed(&frame(b"hello")).unwrap();
        assert_eq!(frames, vec![b"hello".to_vec()]);
        assert_eq!(asm.buffered(), 0);
    }

    #[test]
    fn two_frames_in_one_chunk() {
        let mut asm = FrameAssembler::default();
        let mut chunk = frame(b"one");
        chunk.extend_from_slice(&frame(b"two"));
        let frames = asm.feed(&chunk).unwrap();
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut asm = FrameAssembler::default();
        let whole = frame(b"split-me");
        let (a, b) = whole.split_at(3);
        assert!(asm.feed(a).unwrap().is_empty());
        assert_eq!(asm.feed(b).unwrap(), vec![b"split-me".to_vec()]);
        assert_eq!(asm.buffered(), 0);
    }

    #[test]
    fn split_inside_length_prefix() {
        // 200-byte payload: two-byte length prefix, split between the bytes.
        let payload = vec![0x42u8; 200];
        let whole = frame(&payload);
        let mut asm = FrameAssembler::default();
        assert!(asm.feed(&whole[..1]).unwrap().is_empty());
        assert_eq!(asm.feed(&whole[1..]).unwrap(), vec![payload]);
    }

    #[test]
    fn byte_at_a_time() {
        let whole = frame(b"drip");
        let mut asm = FrameAssembler::default();
        let mut got = Vec::new();
        for b in &whole {
            got.extend(asm.feed(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(got, vec![b"drip".to_vec()]);
    }

    #[test]
    fn partial_tail_retained_after_complete_frames() {
        let mut chunk = frame(b"done");
        let tail = frame(b"pending");
        chunk.extend_from_slice(&tail[..3]);
        let mut asm = FrameAssembler::default();
        let frames = asm.feed(&chunk).unwrap();
        assert_eq!(frames, vec![b"done".to_vec()]);
        assert_eq!(asm.buffered(), 3);
        assert_eq!(asm.feed(&tail[3..]).unwrap(), vec![b"pending".to_vec()]);
    }

    #[test]
    fn empty_frame_is_emitted() {
        let mut asm = FrameAssembler::default();
        assert_eq!(asm.feed(&[0x00]).unwrap(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn oversized_length_discards_buffer() {
        let mut asm = FrameAssembler::new(1024);
        // length 2048 -> 0x80 0x10
        let err = asm.feed(&[0x80, 0x10, 0xaa]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Oversized {
                len: 2048,
                cap: 1024
            }
        );
        assert_eq!(asm.buffered(), 0);
        // The assembler keeps working on fresh input afterwards.
        assert_eq!(asm.feed(&frame(b"ok")).unwrap(), vec![b"ok".to_vec()]);
    }

    #[test]
    fn runaway_length_prefix_is_malformed() {
        let mut asm = FrameAssembler::default();
        let err = asm.feed(&[0xff; 12]).unwrap_err();
        assert_eq!(err, FrameError::BadLengthPrefix);
        assert_eq!(asm.buffered(), 0);
    }
}
