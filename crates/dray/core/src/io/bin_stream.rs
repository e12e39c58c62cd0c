// Dray
// Copyright (C) 2026 Dray Team

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Binary stream module
// An append-only byte buffer with a read cursor, used to spill collections to
// pages and reload them. The wire format is process-private: streams written
// by one run of one binary are only ever read back by the same run.

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::{CoreError, CoreResult};

/// Opaque append-only byte buffer with typed serialisation
///
/// Writes append at the end; reads consume from a cursor at the front.
/// `len()` always reports the bytes that have not been consumed yet.
#[derive(Debug, Clone, Default)]
pub struct BinStream {
    buf: Vec<u8>,
    read_pos: usize,
}

impl BinStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing byte vector, cursor at the start
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self { buf, read_pos: 0 }
    }

    /// Number of unconsumed bytes
    pub fn len(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The unconsumed bytes as a slice
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.read_pos..]
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        if self.read_pos > 0 {
            self.buf.drain(..self.read_pos);
        }
        self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.read_pos = 0;
    }

    /// Appends the unconsumed bytes of another stream
    pub fn append(&mut self, other: &BinStream) {
        self.buf.extend_from_slice(other.as_slice());
    }

    /// Copies up to `max_len` unconsumed bytes beginning at offset `start`
    /// into a fresh stream; the source is not advanced
    pub fn sub_stream(&self, start: usize, max_len: usize) -> BinStream {
        let remaining = self.as_slice();
        if start >= remaining.len() {
            return BinStream::new();
        }
        let end = remaining.len().min(start + max_len);
        BinStream::from_vec(remaining[start..end].to_vec())
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Consumes exactly `len` bytes from the cursor
    pub fn read_raw(&mut self, len: usize) -> CoreResult<&[u8]> {
        if self.len() < len {
            return Err(short_read(len, self.len()));
        }
        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.buf[start..start + len])
    }

    pub fn push<T: BinSerialize>(&mut self, value: &T) {
        value.write_to(self);
    }

    pub fn pop<T: BinSerialize>(&mut self) -> CoreResult<T> {
        T::read_from(self)
    }
}

fn short_read(wanted: usize, available: usize) -> CoreError {
    CoreError::Serialization(format!("stream underflow: needed {wanted} bytes, {available} available"))
}

/// Symmetric pair of byte-stream serialisers every stored type supplies
///
/// Primitives are written by little-endian byte copy; strings and vectors are
/// prefixed by their length. Composite user types delegate field by field.
pub trait BinSerialize: Sized {
    fn write_to(&self, bs: &mut BinStream);
    fn read_from(bs: &mut BinStream) -> CoreResult<Self>;
}

macro_rules! impl_bin_serialize_int {
    ($($t:ty => $write:ident / $read:ident / $width:expr),* $(,)?) => {
        $(
            impl BinSerialize for $t {
                fn write_to(&self, bs: &mut BinStream) {
                    let mut raw = [0u8; $width];
                    LittleEndian::$write(&mut raw, *self);
                    bs.write_raw(&raw);
                }

                fn read_from(bs: &mut BinStream) -> CoreResult<Self> {
                    Ok(LittleEndian::$read(bs.read_raw($width)?))
                }
            }
        )*
    };
}

impl_bin_serialize_int! {
    u16 => write_u16 / read_u16 / 2,
    u32 => write_u32 / read_u32 / 4,
    u64 => write_u64 / read_u64 / 8,
    i16 => write_i16 / read_i16 / 2,
    i32 => write_i32 / read_i32 / 4,
    i64 => write_i64 / read_i64 / 8,
    f32 => write_f32 / read_f32 / 4,
    f64 => write_f64 / read_f64 / 8,
}

impl BinSerialize for u8 {
    fn write_to(&self, bs: &mut BinStream) {
        bs.write_raw(&[*self]);
    }

    fn read_from(bs: &mut BinStream) -> CoreResult<Self> {
        Ok(bs.read_raw(1)?[0])
    }
}

impl BinSerialize for i8 {
    fn write_to(&self, bs: &mut BinStream) {
        bs.write_raw(&[*self as u8]);
    }

    fn read_from(bs: &mut BinStream) -> CoreResult<Self> {
        Ok(bs.read_raw(1)?[0] as i8)
    }
}

impl BinSerialize for bool {
    fn write_to(&self, bs: &mut BinStream) {
        bs.push(&(*self as u8));
    }

    fn read_from(bs: &mut BinStream) -> CoreResult<Self> {
        Ok(bs.pop::<u8>()? != 0)
    }
}

// usize travels as u64 so 32-bit and 64-bit builds agree within a run of a
// mixed toolchain; identity is still only promised within a single process.
impl BinSerialize for usize {
    fn write_to(&self, bs: &mut BinStream) {
        bs.push(&(*self as u64));
    }

    fn read_from(bs: &mut BinStream) -> CoreResult<Self> {
        Ok(bs.pop::<u64>()? as usize)
    }
}

impl BinSerialize for isize {
    fn write_to(&self, bs: &mut BinStream) {
        bs.push(&(*self as i64));
    }

    fn read_from(bs: &mut BinStream) -> CoreResult<Self> {
        Ok(bs.pop::<i64>()? as isize)
    }
}

impl BinSerialize for String {
    fn write_to(&self, bs: &mut BinStream) {
        bs.push(&self.len());
        bs.write_raw(self.as_bytes());
    }

    fn read_from(bs: &mut BinStream) -> CoreResult<Self> {
        let len = bs.pop::<usize>()?;
        let raw = bs.read_raw(len)?.to_vec();
        String::from_utf8(raw).map_err(|e| CoreError::Serialization(format!("invalid utf-8 string: {e}")))
    }
}

impl<T: BinSerialize> BinSerialize for Vec<T> {
    fn write_to(&self, bs: &mut BinStream) {
        bs.push(&self.len());
        for item in self {
            bs.push(item);
        }
    }

    fn read_from(bs: &mut BinStream) -> CoreResult<Self> {
        let len = bs.pop::<usize>()?;
        let mut out = Vec::with_capacity(len.min(bs.len()));
        for _ in 0..len {
            out.push(bs.pop::<T>()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trip() {
        let mut bs = BinStream::new();
        bs.push(&42u8);
        bs.push(&1234u32);
        bs.push(&-5i64);
        bs.push(&true);
        bs.push(&3.5f64);
        bs.push(&usize::MAX);

        assert_eq!(bs.pop::<u8>().unwrap(), 42);
        assert_eq!(bs.pop::<u32>().unwrap(), 1234);
        assert_eq!(bs.pop::<i64>().unwrap(), -5);
        assert!(bs.pop::<bool>().unwrap());
        assert_eq!(bs.pop::<f64>().unwrap(), 3.5);
        assert_eq!(bs.pop::<usize>().unwrap(), usize::MAX);
        assert!(bs.is_empty());
    }

    #[test]
    fn test_string_and_vec_round_trip() {
        let mut bs = BinStream::new();
        bs.push(&"hello worker".to_string());
        bs.push(&vec![1i32, 2, 3]);

        assert_eq!(bs.pop::<String>().unwrap(), "hello worker");
        assert_eq!(bs.pop::<Vec<i32>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_underflow_is_an_error() {
        let mut bs = BinStream::new();
        bs.push(&7u8);
        assert!(bs.pop::<u64>().is_err());
    }

    #[test]
    fn test_len_tracks_cursor() {
        let mut bs = BinStream::new();
        bs.push(&1u64);
        bs.push(&2u64);
        assert_eq!(bs.len(), 16);
        bs.pop::<u64>().unwrap();
        assert_eq!(bs.len(), 8);
    }

    #[test]
    fn test_append_copies_unconsumed_bytes() {
        let mut a = BinStream::new();
        a.push(&1u64);
        a.push(&2u64);
        a.pop::<u64>().unwrap();

        let mut b = BinStream::new();
        b.append(&a);
        assert_eq!(b.pop::<u64>().unwrap(), 2);
    }

    #[test]
    fn test_sub_stream_slices_by_offset() {
        let mut bs = BinStream::new();
        bs.write_raw(&[1, 2, 3, 4, 5, 6]);

        let head = bs.sub_stream(0, 4);
        assert_eq!(head.as_slice(), &[1, 2, 3, 4]);

        let tail = bs.sub_stream(4, 4);
        assert_eq!(tail.as_slice(), &[5, 6]);

        let past = bs.sub_stream(6, 4);
        assert!(past.is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut bs = BinStream::new();
        bs.push(&9u32);
        bs.pop::<u32>().unwrap();
        bs.clear();
        assert!(bs.is_empty());
        bs.push(&5u32);
        assert_eq!(bs.pop::<u32>().unwrap(), 5);
    }
}
