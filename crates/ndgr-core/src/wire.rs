//! Protobuf wire-format primitives.
//!
//! A byte cursor that decodes the four wire shapes the NDGR endpoints use:
//! varints, length-delimited segments, and fixed 32/64-bit fields. There is
//! no generated schema; the message decoders in [`crate::decode`] drive
//! this reader with hand-written per-field dispatch.
//!
//! All failures here are recoverable at the enclosing decoder boundary:
//! a stream consumer drops the offending frame and keeps reading.

use thiserror::Error;

/// Wire types as they appear in the low three bits of a field key.
pub mod wire_type {
    pub const VARINT: u32 = 0;
    pub const FIXED64: u32 = 1;
    pub const LENGTH_DELIMITED: u32 = 2;
    /// Deprecated group markers; START is never valid here, END is a no-op.
    pub const END_GROUP: u32 = 4;
    pub const FIXED32: u32 = 5;
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the wire reader.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    #[error("length-delimited segment of {want} bytes exceeds remaining {have}")]
    LengthOverrun { want: u64, have: usize },
    #[error("unsupported wire type {0}")]
    UnsupportedWireType(u32),
    #[error("varint exceeds 10 bytes")]
    VarintOverflow,
}

// ---------------------------------------------------------------------------
// WireReader
// ---------------------------------------------------------------------------

/// A non-owning cursor over a single wire-format buffer.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        WireReader { data, pos: 0 }
    }

    /// True while at least one byte remains.
    pub fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn next_byte(&mut self) -> Result<u8, WireError> {
        let b = *self.data.get(self.pos).ok_or(WireError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    /// Decode an unsigned varint: little-endian 7-bit groups, continuation
    /// bit `0x80`, at most 10 bytes. Bits beyond 64 are discarded.
    pub fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut out: u64 = 0;
        for i in 0..10u32 {
            let b = self.next_byte()?;
            if i == 9 {
                if b & 0x80 != 0 {
                    return Err(WireError::VarintOverflow);
                }
                out |= u64::from(b & 0x01) << 63;
            } else {
                out |= u64::from(b & 0x7f) << (7 * i);
            }
            if b & 0x80 == 0 {
                return Ok(out);
            }
        }
        Err(WireError::VarintOverflow)
    }

    /// Decode a varint and truncate to 32 bits (high bits discarded, as the
    /// reference wire format does for int32 fields).
    pub fn read_var_u32(&mut self) -> Result<u32, WireError> {
        let wide = self.read_var_u64()?;
        #[allow(clippy::cast_possible_truncation)]
        let narrow = wide as u32;
        Ok(narrow)
    }

    /// Read the next field key, or `None` at the end of the buffer.
    /// Returns `(field_number, wire_type)`.
    pub fn read_tag(&mut self) -> Result<Option<(u32, u32)>, WireError> {
        if !self.has_remaining() {
            return Ok(None);
        }
        let key = self.read_var_u32()?;
        Ok(Some((key >> 3, key & 0x7)))
    }

    /// Read a varint length `L` followed by `L` bytes.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_var_u64()?;
        let have = self.remaining();
        if len > have as u64 {
            return Err(WireError::LengthOverrun { want: len, have });
        }
        #[allow(clippy::cast_possible_truncation)]
        let len = len as usize;
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_fixed32(&mut self) -> Result<u32, WireError> {
        if self.remaining() < 4 {
            return Err(WireError::UnexpectedEof);
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_fixed64(&mut self) -> Result<u64, WireError> {
        if self.remaining() < 8 {
            return Err(WireError::UnexpectedEof);
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Skip one field value of the given wire type.
    pub fn skip(&mut self, wire_type: u32) -> Result<(), WireError> {
        match wire_type {
            wire_type::VARINT => {
                let _ = self.read_var_u64()?;
            }
            wire_type::FIXED64 => {
                let _ = self.read_fixed64()?;
            }
            wire_type::LENGTH_DELIMITED => {
                let _ = self.read_length_delimited()?;
            }
            // Deprecated end-group marker carries no payload.
            wire_type::END_GROUP => {}
            wire_type::FIXED32 => {
                let _ = self.read_fixed32()?;
            }
            other => return Err(WireError::UnsupportedWireType(other)),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
