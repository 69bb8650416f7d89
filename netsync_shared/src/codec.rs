//! Packet codec.
//!
//! Fixed-width typed reads and writes over a cursor-tracked byte buffer.
//! All multi-byte values are big-endian (network order).
//!
//! Reads never go past the end of the input: every read checks the remaining
//! length first and fails with [`CodecError::BufferUnderrun`], leaving the
//! cursor where it was.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::math::Vec2;

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer underrun: needed {needed} bytes, {remaining} remaining")]
    BufferUnderrun { needed: usize, remaining: usize },
    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error("length {len} does not fit a {max}-byte prefix limit")]
    LengthOverflow { len: usize, max: usize },
}

/// Growable output buffer.
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finishes writing and hands out the bytes.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn write_vec2(&mut self, v: Vec2) {
        self.buf.put_f32(v.x);
        self.buf.put_f32(v.y);
    }

    /// Raw byte run, no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// UTF-8 string with a `u8` length prefix.
    pub fn write_str8(&mut self, s: &str) -> Result<(), CodecError> {
        let len = u8::try_from(s.len()).map_err(|_| CodecError::LengthOverflow {
            len: s.len(),
            max: usize::from(u8::MAX),
        })?;
        self.buf.put_u8(len);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// Byte run with a `u16` length prefix.
    pub fn write_bytes16(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = u16::try_from(bytes.len()).map_err(|_| CodecError::LengthOverflow {
            len: bytes.len(),
            max: usize::from(u16::MAX),
        })?;
        self.buf.put_u16(len);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

/// Cursor over an inbound message.
#[derive(Debug, Clone)]
pub struct PacketReader {
    buf: Bytes,
    total: usize,
}

impl PacketReader {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        let buf = buf.into();
        let total = buf.len();
        Self { buf, total }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.total - self.buf.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Whether another read can succeed. Bounds every decode loop.
    pub fn has_more_data(&self) -> bool {
        self.buf.has_remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(CodecError::BufferUnderrun { needed, remaining });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        self.ensure(1)?;
        match self.buf[0] {
            0 => {
                self.buf.advance(1);
                Ok(false)
            }
            1 => {
                self.buf.advance(1);
                Ok(true)
            }
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    pub fn read_vec2(&mut self) -> Result<Vec2, CodecError> {
        self.ensure(8)?;
        let x = self.buf.get_f32();
        let y = self.buf.get_f32();
        Ok(Vec2::new(x, y))
    }

    /// Raw byte run of known length. Shares the underlying allocation.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, CodecError> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn read_str8(&mut self) -> Result<String, CodecError> {
        self.ensure(1)?;
        let len = usize::from(self.buf[0]);
        self.ensure(1 + len)?;
        self.buf.advance(1);
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_bytes16(&mut self) -> Result<Bytes, CodecError> {
        self.ensure(2)?;
        let len = usize::from(u16::from_be_bytes([self.buf[0], self.buf[1]]));
        self.ensure(2 + len)?;
        self.buf.advance(2);
        Ok(self.buf.split_to(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_values_roundtrip() {
        let mut w = PacketWriter::new();
        w.write_u8(0xab);
        w.write_u16(0xbeef);
        w.write_u32(0xdead_beef);
        w.write_u64(u64::MAX - 1);
        w.write_i8(-5);
        w.write_i16(-300);
        w.write_i32(-70_000);
        w.write_i64(i64::MIN + 3);
        w.write_f32(1.5);
        w.write_f64(-2.25e10);
        w.write_bool(true);
        w.write_vec2(Vec2::new(3.0, -4.5));
        assert_eq!(w.len(), 1 + 2 + 4 + 8 + 1 + 2 + 4 + 8 + 4 + 8 + 1 + 8);

        let mut r = PacketReader::new(w.freeze());
        assert_eq!(r.read_u8().unwrap(), 0xab);
        assert_eq!(r.read_u16().unwrap(), 0xbeef);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.read_i8().unwrap(), -5);
        assert_eq!(r.read_i16().unwrap(), -300);
        assert_eq!(r.read_i32().unwrap(), -70_000);
        assert_eq!(r.read_i64().unwrap(), i64::MIN + 3);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_f64().unwrap(), -2.25e10);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_vec2().unwrap(), Vec2::new(3.0, -4.5));
        assert!(!r.has_more_data());
    }

    #[test]
    fn big_endian_layout() {
        let mut w = PacketWriter::new();
        w.write_u16(0x0102);
        w.write_i32(-2);
        assert_eq!(w.as_slice(), &[0x01, 0x02, 0xff, 0xff, 0xff, 0xfe]);
    }

    #[test]
    fn underrun_is_typed_and_keeps_cursor() {
        let mut r = PacketReader::new(vec![0u8, 1, 2]);
        assert_eq!(
            r.read_u32(),
            Err(CodecError::BufferUnderrun {
                needed: 4,
                remaining: 3
            })
        );
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_u16().unwrap(), 1);
        assert_eq!(r.position(), 2);
        assert!(r.read_u16().is_err());
        assert_eq!(r.read_u8().unwrap(), 2);
        assert!(matches!(
            r.read_u8(),
            Err(CodecError::BufferUnderrun { needed: 1, remaining: 0 })
        ));
    }

    #[test]
    fn invalid_bool_rejected() {
        let mut r = PacketReader::new(vec![2u8]);
        assert_eq!(r.read_bool(), Err(CodecError::InvalidBool(2)));
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn prefixed_strings_and_runs() {
        let mut w = PacketWriter::new();
        w.write_str8("spawn_crate").unwrap();
        w.write_bytes16(&[9, 8, 7]).unwrap();
        w.write_bytes(&[1, 2]);

        let mut r = PacketReader::new(w.freeze());
        assert_eq!(r.read_str8().unwrap(), "spawn_crate");
        assert_eq!(&r.read_bytes16().unwrap()[..], &[9, 8, 7]);
        assert_eq!(&r.read_bytes(2).unwrap()[..], &[1, 2]);
        assert!(!r.has_more_data());
    }

    #[test]
    fn truncated_string_does_not_consume_prefix() {
        let mut r = PacketReader::new(vec![5u8, b'a', b'b']);
        assert!(matches!(
            r.read_str8(),
            Err(CodecError::BufferUnderrun { needed: 6, remaining: 3 })
        ));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn oversized_string_rejected() {
        let mut w = PacketWriter::new();
        let long = "x".repeat(300);
        assert_eq!(
            w.write_str8(&long),
            Err(CodecError::LengthOverflow { len: 300, max: 255 })
        );
        assert!(w.is_empty());
    }
}
