// Cursor column slots and the per-cell view handed to readers.
use crate::core::bits::{bit_copy, bytes_for_bits};
use crate::core::blob::Blob;
use crate::core::error::{Error, ErrorKind};
use crate::core::production::ProdId;
use crate::core::schema::ColumnDecl;
use crate::core::types::ColumnSpec;

#[derive(Clone, Debug)]
pub struct Column {
    spec: ColumnSpec,
    decl: ColumnDecl,
    root: Option<ProdId>,
}

impl Column {
    pub(crate) fn new(spec: ColumnSpec, decl: ColumnDecl) -> Self {
        Self {
            spec,
            decl,
            root: None,
        }
    }

    pub fn spec(&self) -> &ColumnSpec {
        &self.spec
    }

    pub fn decl(&self) -> &ColumnDecl {
        &self.decl
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    /// Root production, once the column has been resolved.
    pub fn root(&self) -> Option<ProdId> {
        self.root
    }

    pub fn elem_bits(&self) -> u32 {
        self.decl.desc.size_bits()
    }

    pub(crate) fn set_root(&mut self, root: ProdId) {
        self.root = Some(root);
    }

    /// Whether values can be read as `elem_bits`-wide elements.
    pub(crate) fn check_elem_bits(&self, elem_bits: u32) -> Result<(), Error> {
        let own = self.elem_bits();
        if elem_bits == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("element width is zero")
                .with_column(self.name()));
        }
        if own != 0 && own % elem_bits != 0 && elem_bits % own != 0 {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!("cannot read {own}-bit elements as {elem_bits}-bit"))
                .with_column(self.name()));
        }
        Ok(())
    }
}

/// One cell of a blob viewed as `elem_bits`-wide elements.
#[derive(Clone, Debug)]
pub struct CellData {
    blob: Blob,
    elem_bits: u32,
    first_elem: u64,
    elem_count: u64,
}

impl CellData {
    pub(crate) fn new(blob: Blob, row_id: i64, elem_bits: u32) -> Result<Self, Error> {
        let span = blob.row(row_id)?;
        let width = blob.elem_bits() as u64;
        let (offset, len) = (span.first_elem * width, span.elem_count as u64 * width);
        if offset % elem_bits as u64 != 0 || len % elem_bits as u64 != 0 {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!("cell of {len} bits does not hold {elem_bits}-bit elements"))
                .with_row_id(row_id));
        }
        Ok(Self {
            blob,
            elem_bits,
            first_elem: offset / elem_bits as u64,
            elem_count: len / elem_bits as u64,
        })
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }

    pub fn elem_bits(&self) -> u32 {
        self.elem_bits
    }

    pub fn first_elem(&self) -> u64 {
        self.first_elem
    }

    pub fn elem_count(&self) -> u64 {
        self.elem_count
    }

    pub fn bit_offset(&self) -> u64 {
        self.first_elem * self.elem_bits as u64
    }

    pub fn bit_len(&self) -> u64 {
        self.elem_count * self.elem_bits as u64
    }

    /// Cell bytes, borrowed when the cell is byte aligned.
    pub fn bytes(&self) -> Option<&[u8]> {
        let width = self.blob.elem_bits() as u64;
        self.blob
            .data()
            .element_bytes(self.bit_offset() / width, self.bit_len() / width)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; bytes_for_bits(self.bit_len())];
        self.copy_bits(&mut out, 0, 0, self.elem_count);
        out
    }

    /// Copy `count` elements starting at cell element `start` to bit `dst_bit` of `dst`.
    pub fn copy_bits(&self, dst: &mut [u8], dst_bit: u64, start: u64, count: u64) {
        let width = self.elem_bits as u64;
        bit_copy(
            dst,
            dst_bit,
            self.blob.data().as_bytes(),
            self.bit_offset() + start * width,
            count * width,
        );
    }

    /// Copy the whole cell into `dst`. A short buffer receives the elements that fit and the
    /// call fails with `BufferTooSmall` carrying the element count.
    pub fn copy_to(&self, dst: &mut [u8]) -> Result<u64, Error> {
        let width = self.elem_bits as u64;
        let fits = (dst.len() as u64 * 8 / width).min(self.elem_count);
        self.copy_bits(dst, 0, 0, fits);
        if fits < self.elem_count {
            return Err(Error::new(ErrorKind::BufferTooSmall)
                .with_message(format!(
                    "cell needs {} bytes, buffer holds {}",
                    bytes_for_bits(self.bit_len()),
                    dst.len()
                ))
                .with_required_len(self.elem_count));
        }
        Ok(self.elem_count)
    }
}

#[cfg(test)]
mod tests {
    use super::CellData;
    use crate::core::error::ErrorKind;
    use crate::core::physical::page_from_rows;

    #[test]
    fn cell_views_rescale_elements() {
        let blob = page_from_rows(1, 8, &[b"abcd".to_vec(), b"ef".to_vec()]).expect("page");
        let cell = CellData::new(blob.clone(), 1, 16).expect("16-bit view");
        assert_eq!((cell.first_elem(), cell.elem_count()), (0, 2));
        assert_eq!(cell.bytes(), Some(&b"abcd"[..]));
        let second = CellData::new(blob, 2, 8).expect("row 2");
        assert_eq!(second.to_vec(), b"ef");
    }

    #[test]
    fn short_buffer_gets_prefix_and_required_length() {
        let blob = page_from_rows(1, 8, &[b"abcdef".to_vec()]).expect("page");
        let cell = CellData::new(blob, 1, 8).expect("cell");
        let mut small = [0u8; 4];
        let err = cell.copy_to(&mut small).expect_err("too small");
        assert_eq!(err.kind(), ErrorKind::BufferTooSmall);
        assert_eq!(err.required_len(), Some(6));
        assert_eq!(&small, b"abcd");
        let mut exact = [0u8; 6];
        assert_eq!(cell.copy_to(&mut exact).expect("fits"), 6);
    }

    #[test]
    fn misaligned_width_is_a_type_mismatch() {
        let blob = page_from_rows(1, 8, &[b"abc".to_vec()]).expect("page");
        let err = CellData::new(blob, 1, 16).expect_err("odd bytes");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }
}
