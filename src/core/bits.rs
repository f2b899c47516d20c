// Bit-addressable buffers: MSB-first bit copy/compare and the element-tagged data buffer.
use crate::core::error::{Error, ErrorKind};
use bytes::Bytes;

#[inline]
fn get_bit(buf: &[u8], index: u64) -> bool {
    (buf[(index / 8) as usize] >> (7 - (index % 8))) & 1 == 1
}

#[inline]
fn set_bit(buf: &mut [u8], index: u64, value: bool) {
    let mask = 1u8 << (7 - (index % 8));
    let byte = &mut buf[(index / 8) as usize];
    if value {
        *byte |= mask;
    } else {
        *byte &= !mask;
    }
}

/// Copy `bits` bits from `src` at bit offset `src_off` into `dst` at `dst_off`.
pub fn bit_copy(dst: &mut [u8], dst_off: u64, src: &[u8], src_off: u64, bits: u64) {
    if bits == 0 {
        return;
    }
    let (mut dst_off, mut src_off, mut bits) = (dst_off, src_off, bits);
    if dst_off % 8 == 0 && src_off % 8 == 0 {
        let whole = (bits / 8) as usize;
        let d = (dst_off / 8) as usize;
        let s = (src_off / 8) as usize;
        dst[d..d + whole].copy_from_slice(&src[s..s + whole]);
        let done = whole as u64 * 8;
        dst_off += done;
        src_off += done;
        bits -= done;
    }
    for i in 0..bits {
        set_bit(dst, dst_off + i, get_bit(src, src_off + i));
    }
}

/// Compare two bit ranges of equal length.
pub fn bit_eq(a: &[u8], a_off: u64, b: &[u8], b_off: u64, bits: u64) -> bool {
    if bits == 0 {
        return true;
    }
    let (mut a_off, mut b_off, mut bits) = (a_off, b_off, bits);
    if a_off % 8 == 0 && b_off % 8 == 0 {
        let whole = (bits / 8) as usize;
        let x = (a_off / 8) as usize;
        let y = (b_off / 8) as usize;
        if a[x..x + whole] != b[y..y + whole] {
            return false;
        }
        let done = whole as u64 * 8;
        a_off += done;
        b_off += done;
        bits -= done;
    }
    (0..bits).all(|i| get_bit(a, a_off + i) == get_bit(b, b_off + i))
}

pub(crate) fn bytes_for_bits(bits: u64) -> usize {
    bits.div_ceil(8) as usize
}

/// Immutable, cheaply cloneable buffer of `elem_count` elements of `elem_bits` bits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataBuffer {
    bytes: Bytes,
    elem_bits: u32,
    elem_count: u64,
}

impl DataBuffer {
    pub fn new(bytes: impl Into<Bytes>, elem_bits: u32, elem_count: u64) -> Result<Self, Error> {
        let bytes = bytes.into();
        if elem_bits == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("element width is zero"));
        }
        let needed = elem_bits as u64 * elem_count;
        if (bytes.len() as u64) * 8 < needed {
            return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
                "buffer holds {} bits, {elem_count} x {elem_bits}-bit elements need {needed}",
                bytes.len() as u64 * 8
            )));
        }
        Ok(Self {
            bytes,
            elem_bits,
            elem_count,
        })
    }

    /// Interpret every whole element in `bytes`.
    pub fn from_bytes(bytes: impl Into<Bytes>, elem_bits: u32) -> Result<Self, Error> {
        let bytes = bytes.into();
        if elem_bits == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("element width is zero"));
        }
        let count = bytes.len() as u64 * 8 / elem_bits as u64;
        Self::new(bytes, elem_bits, count)
    }

    pub fn empty(elem_bits: u32) -> Self {
        Self {
            bytes: Bytes::new(),
            elem_bits: elem_bits.max(1),
            elem_count: 0,
        }
    }

    pub fn elem_bits(&self) -> u32 {
        self.elem_bits
    }

    pub fn elem_count(&self) -> u64 {
        self.elem_count
    }

    pub fn bit_len(&self) -> u64 {
        self.elem_bits as u64 * self.elem_count
    }

    pub fn byte_len(&self) -> usize {
        bytes_for_bits(self.bit_len())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.byte_len()]
    }

    pub fn shared(&self) -> Bytes {
        self.bytes.slice(..self.byte_len())
    }

    /// Reinterpret the same bits with a different element width; shares storage.
    pub fn cast(&self, elem_bits: u32) -> Result<Self, Error> {
        if elem_bits == self.elem_bits {
            return Ok(self.clone());
        }
        if elem_bits == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("element width is zero"));
        }
        let bits = self.bit_len();
        if bits % elem_bits as u64 != 0 {
            return Err(Error::new(ErrorKind::TypeMismatch).with_message(format!(
                "{bits} bits cannot be cast to {elem_bits}-bit elements"
            )));
        }
        Ok(Self {
            bytes: self.bytes.clone(),
            elem_bits,
            elem_count: bits / elem_bits as u64,
        })
    }

    /// Byte view of `count` elements starting at `first`, if they are byte aligned.
    pub fn element_bytes(&self, first: u64, count: u64) -> Option<&[u8]> {
        let start = first * self.elem_bits as u64;
        let bits = count * self.elem_bits as u64;
        if start % 8 != 0 || bits % 8 != 0 || first + count > self.elem_count {
            return None;
        }
        let start = (start / 8) as usize;
        Some(&self.bytes[start..start + (bits / 8) as usize])
    }
}

/// Growable private buffer used while a blob is being materialized.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    bits: u64,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> u64 {
        self.bits
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn append(&mut self, src: &[u8], src_off: u64, bits: u64) {
        let needed = bytes_for_bits(self.bits + bits);
        if needed > self.buf.len() {
            self.buf.resize(needed, 0);
        }
        bit_copy(&mut self.buf, self.bits, src, src_off, bits);
        self.bits += bits;
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }
}
