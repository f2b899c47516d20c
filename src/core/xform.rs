//! Purpose: Invocation shapes for externally supplied transform functions.
//! Exports: `Xform`, `XformInfo`, `RowArg`, `RowOutput`, `PageOutput`, `BlobOutput`, and the
//! callable aliases `RowFn`, `ArrayFn`, `PageFn`, `BlobFn`, `LegacyBlobFn`, `BlobNFn`, `CompareFn`.
//! Role: The seam between function productions and the transform registry.
//! Invariants: Callables never see a mutable published blob; outputs are private buffers.

use crate::core::bits::{bit_copy, bytes_for_bits, DataBuffer};
use crate::core::blob::{Blob, BlobHeader};
use crate::core::error::{Error, ErrorKind};
use crate::core::types::{ByteOrder, Chain, TypeDesc};
use std::fmt;
use std::sync::Arc;

/// Context handed to every transform call.
#[derive(Clone, Copy, Debug)]
pub struct XformInfo<'a> {
    pub name: &'a str,
    pub desc: TypeDesc,
    pub chain: Chain,
}

/// One input row: `elem_count` elements starting at element `first_elem` of `buffer`.
#[derive(Clone, Copy, Debug)]
pub struct RowArg<'a> {
    buffer: &'a [u8],
    elem_bits: u32,
    first_elem: u64,
    elem_count: u64,
}

impl<'a> RowArg<'a> {
    pub fn new(buffer: &'a [u8], elem_bits: u32, first_elem: u64, elem_count: u64) -> Self {
        Self {
            buffer,
            elem_bits,
            first_elem,
            elem_count,
        }
    }

    pub fn elem_bits(&self) -> u32 {
        self.elem_bits
    }

    pub fn elem_count(&self) -> u64 {
        self.elem_count
    }

    pub fn first_elem(&self) -> u64 {
        self.first_elem
    }

    pub fn bit_offset(&self) -> u64 {
        self.first_elem * self.elem_bits as u64
    }

    pub fn bit_len(&self) -> u64 {
        self.elem_count * self.elem_bits as u64
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Row bytes when the row starts and ends on byte boundaries.
    pub fn bytes(&self) -> Option<&'a [u8]> {
        let (off, len) = (self.bit_offset(), self.bit_len());
        if off % 8 != 0 || len % 8 != 0 {
            return None;
        }
        let start = (off / 8) as usize;
        self.buffer.get(start..start + (len / 8) as usize)
    }

    /// Row content copied into a fresh byte-aligned buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        if let Some(bytes) = self.bytes() {
            return bytes.to_vec();
        }
        let mut out = vec![0u8; bytes_for_bits(self.bit_len())];
        bit_copy(&mut out, 0, self.buffer, self.bit_offset(), self.bit_len());
        out
    }

    /// Element `index` of a row of unsigned integers up to 64 bits, in native order.
    pub fn uint(&self, index: u64) -> Option<u64> {
        if index >= self.elem_count {
            return None;
        }
        let width = (self.elem_bits / 8) as usize;
        let bytes = self.bytes()?;
        let chunk = bytes.get(index as usize * width..(index as usize + 1) * width)?;
        let mut raw = [0u8; 8];
        match width {
            1 => Some(chunk[0] as u64),
            2 | 4 | 8 => {
                if cfg!(target_endian = "little") {
                    raw[..width].copy_from_slice(chunk);
                    Some(u64::from_le_bytes(raw))
                } else {
                    raw[8 - width..].copy_from_slice(chunk);
                    Some(u64::from_be_bytes(raw))
                }
            }
            _ => None,
        }
    }
}

/// Output of one row-function call.
#[derive(Debug)]
pub struct RowOutput {
    data: Vec<u8>,
    elem_bits: u32,
    elem_count: u64,
    no_cache: bool,
}

impl RowOutput {
    pub(crate) fn new(elem_bits: u32) -> Self {
        Self {
            data: Vec::new(),
            elem_bits,
            elem_count: 0,
            no_cache: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.data.clear();
        self.elem_count = 0;
    }

    pub fn elem_bits(&self) -> u32 {
        self.elem_bits
    }

    pub fn elem_count(&self) -> u64 {
        self.elem_count
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the row with `elem_count` elements packed in `bytes`.
    pub fn set(&mut self, bytes: &[u8], elem_count: u64) -> Result<(), Error> {
        let needed = bytes_for_bits(elem_count * self.elem_bits as u64);
        if bytes.len() < needed {
            return Err(Error::new(ErrorKind::BufferTooSmall)
                .with_message("row output shorter than its element count")
                .with_required_len(needed as u64));
        }
        self.data.clear();
        self.data.extend_from_slice(&bytes[..needed]);
        self.elem_count = elem_count;
        Ok(())
    }

    /// Replace the row with whole elements read from `bytes`.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let count = bytes.len() as u64 * 8 / self.elem_bits as u64;
        self.set(bytes, count)
    }

    pub fn set_no_cache(&mut self) {
        self.no_cache = true;
    }

    pub(crate) fn no_cache(&self) -> bool {
        self.no_cache
    }
}

/// Slice of the page output buffer a fixed-row function fills for one row.
#[derive(Debug)]
pub struct PageOutput<'a> {
    pub buffer: &'a mut [u8],
    pub elem_bits: u32,
    pub first_elem: u64,
    pub elem_count: u64,
}

impl PageOutput<'_> {
    /// Write the row from a byte-aligned source.
    pub fn write(&mut self, src: &[u8]) -> Result<(), Error> {
        let bits = self.elem_count * self.elem_bits as u64;
        if (src.len() as u64) * 8 < bits {
            return Err(Error::new(ErrorKind::BufferTooSmall)
                .with_message("page row source too short")
                .with_required_len(bytes_for_bits(bits) as u64));
        }
        bit_copy(
            self.buffer,
            self.first_elem * self.elem_bits as u64,
            src,
            0,
            bits,
        );
        Ok(())
    }
}

/// Output of a whole-blob codec call.
#[derive(Debug)]
pub struct BlobOutput {
    pub data: Vec<u8>,
    pub elem_bits: u32,
    pub elem_count: u64,
    pub byte_order: ByteOrder,
}

impl BlobOutput {
    pub(crate) fn with_capacity(elem_bits: u32, elem_count: u64) -> Self {
        Self {
            data: vec![0u8; bytes_for_bits(elem_bits as u64 * elem_count)],
            elem_bits,
            elem_count,
            byte_order: ByteOrder::Native,
        }
    }

    pub(crate) fn into_buffer(self) -> Result<DataBuffer, Error> {
        DataBuffer::new(self.data, self.elem_bits, self.elem_count)
    }
}

pub type RowFn =
    Arc<dyn Fn(&XformInfo<'_>, i64, &mut RowOutput, &[RowArg<'_>]) -> Result<(), Error> + Send + Sync>;
/// `(info, dst, src, elem_count)`: element-wise transform over a whole buffer.
pub type ArrayFn =
    Arc<dyn Fn(&XformInfo<'_>, &mut [u8], &[u8], u64) -> Result<(), Error> + Send + Sync>;
pub type PageFn = Arc<
    dyn Fn(&XformInfo<'_>, i64, &mut PageOutput<'_>, &[RowArg<'_>]) -> Result<(), Error> + Send + Sync,
>;
pub type BlobFn = Arc<
    dyn Fn(&XformInfo<'_>, &mut BlobOutput, &DataBuffer, &mut BlobHeader) -> Result<(), Error>
        + Send
        + Sync,
>;
pub type LegacyBlobFn =
    Arc<dyn Fn(&XformInfo<'_>, &mut BlobOutput, &DataBuffer) -> Result<(), Error> + Send + Sync>;
pub type BlobNFn = Arc<dyn Fn(&XformInfo<'_>, i64, &[Blob]) -> Result<Blob, Error> + Send + Sync>;
/// Returns `Ok(true)` when the two rows are equivalent.
pub type CompareFn = Arc<dyn Fn(&RowArg<'_>, &RowArg<'_>) -> Result<bool, Error> + Send + Sync>;

/// Function production sub-variant: the transform and the shape it is invoked with.
#[derive(Clone)]
pub enum Xform {
    Row(RowFn),
    IdDepRow(RowFn),
    NonDetRow(RowFn),
    Array(ArrayFn),
    Page(PageFn),
    Blob(BlobFn),
    LegacyBlob(LegacyBlobFn),
    BlobN(BlobNFn),
    Byteswap,
    Compare(Option<CompareFn>),
    Select,
}

impl Xform {
    pub fn row(
        func: impl Fn(&XformInfo<'_>, i64, &mut RowOutput, &[RowArg<'_>]) -> Result<(), Error>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Xform::Row(Arc::new(func))
    }

    pub fn page(
        func: impl Fn(&XformInfo<'_>, i64, &mut PageOutput<'_>, &[RowArg<'_>]) -> Result<(), Error>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Xform::Page(Arc::new(func))
    }

    pub fn array(
        func: impl Fn(&XformInfo<'_>, &mut [u8], &[u8], u64) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        Xform::Array(Arc::new(func))
    }

    pub fn blob(
        func: impl Fn(&XformInfo<'_>, &mut BlobOutput, &DataBuffer, &mut BlobHeader) -> Result<(), Error>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Xform::Blob(Arc::new(func))
    }

    /// Per-row shapes report a variable fixed-row length.
    pub fn is_row_shaped(&self) -> bool {
        matches!(self, Xform::Row(_) | Xform::IdDepRow(_) | Xform::NonDetRow(_))
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            Xform::Row(_) => "row",
            Xform::IdDepRow(_) => "id-dependent row",
            Xform::NonDetRow(_) => "non-deterministic row",
            Xform::Array(_) => "array",
            Xform::Page(_) => "fixed-row",
            Xform::Blob(_) => "blob",
            Xform::LegacyBlob(_) => "legacy blob",
            Xform::BlobN(_) => "n-ary blob",
            Xform::Byteswap => "byteswap",
            Xform::Compare(_) => "compare",
            Xform::Select => "select",
        }
    }
}

impl fmt::Debug for Xform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xform({})", self.shape_name())
    }
}

#[cfg(test)]
mod tests {
    use super::{PageOutput, RowArg, RowOutput};
    use crate::core::error::ErrorKind;

    #[test]
    fn row_arg_reads_native_integers() {
        let mut buf = Vec::new();
        for value in [7u32, 9, 11] {
            buf.extend_from_slice(&value.to_ne_bytes());
        }
        let arg = RowArg::new(&buf, 32, 1, 2);
        assert_eq!(arg.uint(0), Some(9));
        assert_eq!(arg.uint(1), Some(11));
        assert_eq!(arg.uint(2), None);
        assert_eq!(arg.bytes().map(<[u8]>::len), Some(8));
    }

    #[test]
    fn unaligned_row_is_copied_out() {
        let buf = [0b1111_0000u8, 0b1010_0000];
        let arg = RowArg::new(&buf, 4, 1, 2);
        assert_eq!(arg.bytes(), None);
        assert_eq!(arg.to_vec(), vec![0b0000_1010]);
    }

    #[test]
    fn row_output_checks_length() {
        let mut out = RowOutput::new(16);
        let err = out.set(&[1, 2, 3], 2).expect_err("short");
        assert_eq!(err.kind(), ErrorKind::BufferTooSmall);
        out.set_bytes(&[1, 2, 3, 4]).expect("set");
        assert_eq!(out.elem_count(), 2);
    }

    #[test]
    fn page_output_writes_at_row_offset() {
        let mut buffer = vec![0u8; 6];
        let mut out = PageOutput {
            buffer: &mut buffer,
            elem_bits: 8,
            first_elem: 2,
            elem_count: 3,
        };
        out.write(b"xyz").expect("write");
        assert_eq!(&buffer, b"\0\0xyz\0");
    }
}
