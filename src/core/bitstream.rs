//! Bit-packed streams shared by every packet schema.
//!
//! A packet describes its fields exactly once, as a `serialize` method
//! generic over [`BitStream`]. Running that method against a [`BitWriter`]
//! encodes, running it against a [`BitReader`] decodes, so the two
//! directions cannot drift apart.
//!
//! Bits are packed little-endian: the first field occupies the lowest bits
//! of the first byte. Byte arrays are preceded by zero padding up to the next
//! byte boundary.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::WireContext;
use crate::error::{constants, ProtocolError, Result};

/// Number of bits needed to encode any value in `[min, max]`
pub fn bits_required(min: i32, max: i32) -> u32 {
    debug_assert!(min <= max);
    let range = (i64::from(max) - i64::from(min)) as u64;
    if range == 0 {
        0
    } else {
        64 - range.leading_zeros()
    }
}

#[inline]
fn mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

/// A stream that can either read or write, selected at compile time.
pub trait BitStream {
    /// `true` for writers, `false` for readers
    const IS_WRITING: bool;

    fn context(&self) -> &WireContext;

    /// Transfer the low `bits` bits of `value` (at most 32)
    fn serialize_bits(&mut self, value: &mut u32, bits: u32) -> Result<()>;

    /// Pad with zero bits to the next byte boundary
    fn serialize_align(&mut self) -> Result<()>;

    /// Transfer a fixed-length byte array, byte aligned
    fn serialize_bytes(&mut self, data: &mut [u8]) -> Result<()>;

    /// Transfer an integer bounded to `[min, max]` using the minimum bit count.
    ///
    /// Values outside the range fail in both directions: a writer refuses to
    /// emit them and a reader refuses to accept them.
    fn serialize_int(&mut self, field: &str, value: &mut i32, min: i32, max: i32) -> Result<()> {
        if Self::IS_WRITING && !(min..=max).contains(value) {
            return Err(ProtocolError::out_of_range(
                field,
                i64::from(*value),
                i64::from(min),
                i64::from(max),
            ));
        }

        let mut encoded = (i64::from(*value) - i64::from(min)) as u32;
        self.serialize_bits(&mut encoded, bits_required(min, max))?;

        let decoded = i64::from(min) + i64::from(encoded);
        if decoded > i64::from(max) {
            return Err(ProtocolError::out_of_range(
                field,
                decoded,
                i64::from(min),
                i64::from(max),
            ));
        }
        *value = decoded as i32;
        Ok(())
    }

    /// Transfer a full 64-bit value as two 32-bit halves, low half first
    fn serialize_u64(&mut self, value: &mut u64) -> Result<()> {
        let mut low = *value as u32;
        let mut high = (*value >> 32) as u32;
        self.serialize_bits(&mut low, 32)?;
        self.serialize_bits(&mut high, 32)?;
        *value = (u64::from(high) << 32) | u64::from(low);
        Ok(())
    }
}

/// Write side of a [`BitStream`]
#[derive(Debug)]
pub struct BitWriter {
    context: WireContext,
    buffer: BytesMut,
    scratch: u64,
    scratch_bits: u32,
}

impl BitWriter {
    pub fn new(context: WireContext) -> Self {
        Self::with_capacity(context, 64)
    }

    pub fn with_capacity(context: WireContext, capacity: usize) -> Self {
        Self {
            context,
            buffer: BytesMut::with_capacity(capacity),
            scratch: 0,
            scratch_bits: 0,
        }
    }

    pub fn write_bits(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return;
        }

        self.scratch |= (u64::from(value) & mask(bits)) << self.scratch_bits;
        self.scratch_bits += bits;

        while self.scratch_bits >= 8 {
            self.buffer.put_u8(self.scratch as u8);
            self.scratch >>= 8;
            self.scratch_bits -= 8;
        }
    }

    pub fn write_align(&mut self) {
        let padding = (8 - self.scratch_bits % 8) % 8;
        self.write_bits(0, padding);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.write_align();
        self.buffer.put_slice(data);
    }

    pub fn bits_written(&self) -> usize {
        self.buffer.len() * 8 + self.scratch_bits as usize
    }

    /// Flush any partial byte and hand back the encoded buffer
    pub fn finish(mut self) -> Bytes {
        self.write_align();
        self.buffer.freeze()
    }
}

impl BitStream for BitWriter {
    const IS_WRITING: bool = true;

    fn context(&self) -> &WireContext {
        &self.context
    }

    fn serialize_bits(&mut self, value: &mut u32, bits: u32) -> Result<()> {
        self.write_bits(*value, bits);
        Ok(())
    }

    fn serialize_align(&mut self) -> Result<()> {
        self.write_align();
        Ok(())
    }

    fn serialize_bytes(&mut self, data: &mut [u8]) -> Result<()> {
        self.write_bytes(data);
        Ok(())
    }
}

/// Read side of a [`BitStream`]
#[derive(Debug)]
pub struct BitReader<'a> {
    context: WireContext,
    data: &'a [u8],
    position: usize,
    scratch: u64,
    scratch_bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(context: WireContext, data: &'a [u8]) -> Self {
        Self {
            context,
            data,
            position: 0,
            scratch: 0,
            scratch_bits: 0,
        }
    }

    pub fn read_bits(&mut self, bits: u32) -> Result<u32> {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return Ok(0);
        }

        while self.scratch_bits < bits {
            let byte = *self
                .data
                .get(self.position)
                .ok_or_else(|| ProtocolError::Truncated(constants::ERR_STREAM_TRUNCATED.into()))?;
            self.scratch |= u64::from(byte) << self.scratch_bits;
            self.scratch_bits += 8;
            self.position += 1;
        }

        let value = (self.scratch & mask(bits)) as u32;
        self.scratch >>= bits;
        self.scratch_bits -= bits;
        Ok(value)
    }

    pub fn read_align(&mut self) -> Result<()> {
        let padding = self.scratch_bits % 8;
        if self.read_bits(padding)? != 0 {
            return Err(ProtocolError::InvalidPadding(
                constants::ERR_NON_ZERO_PADDING.into(),
            ));
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        self.read_align()?;

        // whole bytes already pulled into scratch come first
        let mut filled = 0;
        while self.scratch_bits >= 8 && filled < out.len() {
            out[filled] = self.scratch as u8;
            self.scratch >>= 8;
            self.scratch_bits -= 8;
            filled += 1;
        }

        let remaining = out.len() - filled;
        let end = self.position + remaining;
        let source = self
            .data
            .get(self.position..end)
            .ok_or_else(|| ProtocolError::Truncated(constants::ERR_STREAM_TRUNCATED.into()))?;
        out[filled..].copy_from_slice(source);
        self.position = end;
        Ok(())
    }

    /// Bytes not yet consumed, counting whole bytes still held in scratch
    pub fn remaining_bytes(&self) -> usize {
        (self.data.len() - self.position) + (self.scratch_bits / 8) as usize
    }

    /// Consume final padding and reject anything left over
    pub fn finish(&mut self) -> Result<()> {
        self.read_align()?;
        match self.remaining_bytes() {
            0 => Ok(()),
            left => Err(ProtocolError::TrailingBytes(left)),
        }
    }
}

impl BitStream for BitReader<'_> {
    const IS_WRITING: bool = false;

    fn context(&self) -> &WireContext {
        &self.context
    }

    fn serialize_bits(&mut self, value: &mut u32, bits: u32) -> Result<()> {
        *value = self.read_bits(bits)?;
        Ok(())
    }

    fn serialize_align(&mut self) -> Result<()> {
        self.read_align()
    }

    fn serialize_bytes(&mut self, data: &mut [u8]) -> Result<()> {
        self.read_bytes(data)
    }
}
