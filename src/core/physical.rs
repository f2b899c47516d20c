// Physical column seam: storage-backed leaves of the production graph.
use crate::core::bits::{BitWriter, DataBuffer};
use crate::core::blob::Blob;
use crate::core::error::{Error, ErrorKind};
use crate::core::pagemap::PageMapBuilder;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Storage that can hand out blobs for its rows.
pub trait PhysicalColumn: fmt::Debug + Send + Sync {
    fn read_blob(&self, row_id: i64) -> Result<Blob, Error>;

    /// Inclusive id range of stored rows, `None` when the column is empty.
    fn id_range(&self) -> Result<Option<(i64, i64)>, Error>;

    /// Common row length, or 0 when rows vary.
    fn fixed_row_len(&self, row_id: i64) -> u32;
}

/// In-memory physical column made of pre-built pages.
#[derive(Debug)]
pub struct MemoryColumn {
    pages: Vec<Blob>,
    reads: AtomicUsize,
}

impl MemoryColumn {
    pub fn from_pages(pages: Vec<Blob>) -> Self {
        Self {
            pages,
            reads: AtomicUsize::new(0),
        }
    }

    /// Store `rows` starting at `start_id`, cut into pages of `page_rows` rows.
    pub fn from_rows(
        start_id: i64,
        elem_bits: u32,
        rows: &[Vec<u8>],
        page_rows: usize,
    ) -> Result<Self, Error> {
        if page_rows == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("page_rows is zero"));
        }
        let mut pages = Vec::new();
        for (chunk_idx, chunk) in rows.chunks(page_rows).enumerate() {
            let first = start_id + (chunk_idx * page_rows) as i64;
            pages.push(page_from_rows(first, elem_bits, chunk)?);
        }
        Ok(Self::from_pages(pages))
    }

    /// One `u32` value per row.
    pub fn from_u32s(start_id: i64, values: &[u32], page_rows: usize) -> Result<Self, Error> {
        let rows: Vec<Vec<u8>> = values.iter().map(|v| v.to_ne_bytes().to_vec()).collect();
        Self::from_rows(start_id, 32, &rows, page_rows)
    }

    /// Number of `read_blob` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }
}

pub(crate) fn page_from_rows(first: i64, elem_bits: u32, rows: &[Vec<u8>]) -> Result<Blob, Error> {
    let mut writer = BitWriter::new();
    let mut builder = PageMapBuilder::new();
    for row in rows {
        let bits = row.len() as u64 * 8;
        if bits % elem_bits as u64 != 0 {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!("row of {bits} bits is not a multiple of {elem_bits}")));
        }
        writer.append(row, 0, bits);
        builder.append_rows((bits / elem_bits as u64) as u32, 1, false)?;
    }
    let elem_count = writer.bit_len() / elem_bits as u64;
    let data = DataBuffer::new(writer.into_bytes(), elem_bits, elem_count)?;
    Blob::builder(first, first + rows.len() as i64 - 1, data)
        .page_map(Arc::new(builder.finish()?))
        .build()?
        .optimize_page_map()
}

impl PhysicalColumn for MemoryColumn {
    fn read_blob(&self, row_id: i64) -> Result<Blob, Error> {
        self.reads.fetch_add(1, Ordering::AcqRel);
        self.pages
            .iter()
            .find(|page| page.covers(row_id))
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message("row not stored")
                    .with_row_id(row_id)
            })
    }

    fn id_range(&self) -> Result<Option<(i64, i64)>, Error> {
        let first = self.pages.iter().map(Blob::start_id).min();
        let last = self.pages.iter().map(Blob::stop_id).max();
        Ok(first.zip(last))
    }

    fn fixed_row_len(&self, row_id: i64) -> u32 {
        self.pages
            .iter()
            .find(|page| page.covers(row_id))
            .and_then(|page| page.page_map())
            .and_then(|map| map.fixed_row_len())
            .unwrap_or(0)
    }
}
