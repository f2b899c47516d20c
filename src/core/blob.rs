//! Purpose: Materialized column data over an inclusive row-id range.
//! Exports: `Blob`, `BlobBuilder`, `BlobHeader`, `HeaderChain`, `HEADER_FLAG_PASSTHROUGH`.
//! Role: The unit every production returns and every cache stores.
//! Invariants: A published blob is immutable; transforms build a new blob instead.
//! Invariants: When present, the page map covers every row, and every stored element unless
//! codec headers are attached.

use crate::core::bits::{bit_eq, BitWriter, DataBuffer};
use crate::core::error::{corrupt, Error, ErrorKind};
use crate::core::pagemap::{PageMap, PageMapBuilder, RowSpan};
use crate::core::types::ByteOrder;
use std::sync::Arc;

/// Set on a codec stage whose input was stored as-is.
pub const HEADER_FLAG_PASSTHROUGH: u8 = 1;

/// Per-stage codec header written by encoders and consumed by decoders.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlobHeader {
    pub flags: u8,
    pub version: u8,
    pub fmt: u32,
    /// Size in bytes of the stage input.
    pub source_size: u64,
    pub args: Vec<i64>,
}

impl BlobHeader {
    pub fn is_passthrough(&self) -> bool {
        self.flags & HEADER_FLAG_PASSTHROUGH != 0
    }
}

/// Linked header frames; the head is the outermost (last applied) encoding stage.
#[derive(Debug, Eq, PartialEq)]
pub struct HeaderChain {
    header: BlobHeader,
    next: Option<Arc<HeaderChain>>,
}

impl HeaderChain {
    /// Push a frame for a new encoding stage on top of `parent`.
    pub fn child(parent: Option<&Arc<HeaderChain>>, header: BlobHeader) -> Arc<HeaderChain> {
        Arc::new(HeaderChain {
            header,
            next: parent.cloned(),
        })
    }

    pub fn header(&self) -> &BlobHeader {
        &self.header
    }

    /// Frame of the stage applied before this one.
    pub fn next(&self) -> Option<&Arc<HeaderChain>> {
        self.next.as_ref()
    }

    pub fn frames(&self) -> Vec<&BlobHeader> {
        let mut out = vec![&self.header];
        let mut cursor = self.next.as_deref();
        while let Some(frame) = cursor {
            out.push(&frame.header);
            cursor = frame.next.as_deref();
        }
        out
    }

    /// Rebuild a chain from frames listed head first.
    pub fn from_frames(frames: Vec<BlobHeader>) -> Option<Arc<HeaderChain>> {
        frames
            .into_iter()
            .rev()
            .fold(None, |next, header| Some(Arc::new(HeaderChain { header, next })))
    }
}

#[derive(Debug)]
struct BlobInner {
    start_id: i64,
    stop_id: i64,
    data: DataBuffer,
    page_map: Option<Arc<PageMap>>,
    byte_order: ByteOrder,
    no_cache: bool,
    headers: Option<Arc<HeaderChain>>,
}

/// Shared handle to an immutable blob; cloning adds a reference.
#[derive(Clone, Debug)]
pub struct Blob {
    inner: Arc<BlobInner>,
}

pub struct BlobBuilder {
    inner: BlobInner,
}

impl BlobBuilder {
    pub fn page_map(mut self, page_map: Arc<PageMap>) -> Self {
        self.inner.page_map = Some(page_map);
        self
    }

    pub fn maybe_page_map(mut self, page_map: Option<Arc<PageMap>>) -> Self {
        self.inner.page_map = page_map;
        self
    }

    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.inner.byte_order = byte_order;
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.inner.no_cache = no_cache;
        self
    }

    pub fn headers(mut self, headers: Option<Arc<HeaderChain>>) -> Self {
        self.inner.headers = headers;
        self
    }

    pub fn build(self) -> Result<Blob, Error> {
        let blob = Blob {
            inner: Arc::new(self.inner),
        };
        blob.check_integrity()?;
        Ok(blob)
    }
}

pub(crate) fn span_rows(start_id: i64, stop_id: i64) -> u64 {
    let rows = stop_id as i128 - start_id as i128 + 1;
    rows.clamp(0, u64::MAX as i128) as u64
}

impl Blob {
    pub fn builder(start_id: i64, stop_id: i64, data: DataBuffer) -> BlobBuilder {
        BlobBuilder {
            inner: BlobInner {
                start_id,
                stop_id,
                data,
                page_map: None,
                byte_order: ByteOrder::Native,
                no_cache: false,
                headers: None,
            },
        }
    }

    pub fn start_id(&self) -> i64 {
        self.inner.start_id
    }

    pub fn stop_id(&self) -> i64 {
        self.inner.stop_id
    }

    pub fn row_count(&self) -> u64 {
        span_rows(self.inner.start_id, self.inner.stop_id)
    }

    pub fn covers(&self, row_id: i64) -> bool {
        self.inner.start_id <= row_id && row_id <= self.inner.stop_id
    }

    pub fn data(&self) -> &DataBuffer {
        &self.inner.data
    }

    pub fn elem_bits(&self) -> u32 {
        self.inner.data.elem_bits()
    }

    pub fn elem_count(&self) -> u64 {
        self.inner.data.elem_count()
    }

    pub fn page_map(&self) -> Option<&Arc<PageMap>> {
        self.inner.page_map.as_ref()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.inner.byte_order
    }

    pub fn no_cache(&self) -> bool {
        self.inner.no_cache
    }

    pub fn headers(&self) -> Option<&Arc<HeaderChain>> {
        self.inner.headers.as_ref()
    }

    /// Approximate memory charged against byte-capacity caches.
    pub fn size_bytes(&self) -> usize {
        self.inner.data.byte_len() + std::mem::size_of::<BlobInner>()
    }

    pub fn ptr_eq(a: &Blob, b: &Blob) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn is_single_row(&self) -> bool {
        self.page_map().is_some_and(|map| map.is_single_row())
    }

    pub(crate) fn page_map_or_corrupt(&self) -> Result<&Arc<PageMap>, Error> {
        self.page_map()
            .ok_or_else(|| corrupt("blob has no page map").with_row_id(self.start_id()))
    }

    /// Offset of `row_id` from the first row, for page-map lookups.
    pub fn row_offset(&self, row_id: i64) -> u64 {
        (row_id as i128 - self.inner.start_id as i128).max(0) as u64
    }

    pub fn row(&self, row_id: i64) -> Result<RowSpan, Error> {
        if !self.covers(row_id) {
            return Err(corrupt(format!(
                "blob [{}, {}] does not cover row",
                self.start_id(),
                self.stop_id()
            ))
            .with_row_id(row_id));
        }
        self.page_map_or_corrupt()?
            .locate(self.row_offset(row_id))
            .ok_or_else(|| corrupt("page map shorter than blob").with_row_id(row_id))
    }

    fn rebuild(&self) -> BlobInner {
        BlobInner {
            start_id: self.inner.start_id,
            stop_id: self.inner.stop_id,
            data: self.inner.data.clone(),
            page_map: self.inner.page_map.clone(),
            byte_order: self.inner.byte_order,
            no_cache: self.inner.no_cache,
            headers: self.inner.headers.clone(),
        }
    }

    fn with_inner(inner: BlobInner) -> Result<Blob, Error> {
        BlobBuilder { inner }.build()
    }

    /// Same bits reinterpreted as `elem_bits`-wide elements; the page map is rescaled.
    pub fn cast(&self, elem_bits: u32) -> Result<Blob, Error> {
        if elem_bits == self.elem_bits() {
            return Ok(self.clone());
        }
        let mut inner = self.rebuild();
        inner.data = self.inner.data.cast(elem_bits)?;
        inner.page_map = match &self.inner.page_map {
            Some(map) => Some(Arc::new(rescale_page_map(
                map,
                self.elem_bits(),
                elem_bits,
            )?)),
            None => None,
        };
        Self::with_inner(inner)
    }

    /// Same payload with a different element buffer (used by byte order repair).
    pub(crate) fn with_data(&self, data: DataBuffer, byte_order: ByteOrder) -> Result<Blob, Error> {
        let mut inner = self.rebuild();
        inner.data = data;
        inner.byte_order = byte_order;
        Self::with_inner(inner)
    }

    pub fn with_page_map(&self, page_map: Arc<PageMap>) -> Result<Blob, Error> {
        let mut inner = self.rebuild();
        inner.page_map = Some(page_map);
        Self::with_inner(inner)
    }

    pub fn with_no_cache(&self, no_cache: bool) -> Blob {
        if no_cache == self.no_cache() {
            return self.clone();
        }
        let mut inner = self.rebuild();
        inner.no_cache = no_cache;
        Blob {
            inner: Arc::new(inner),
        }
    }

    pub fn with_headers(&self, headers: Option<Arc<HeaderChain>>) -> Blob {
        let mut inner = self.rebuild();
        inner.headers = headers;
        Blob {
            inner: Arc::new(inner),
        }
    }

    /// Concatenate the blob covering the rows directly after this one.
    pub fn append(&self, next: &Blob) -> Result<Blob, Error> {
        if next.start_id() != self.stop_id().wrapping_add(1) {
            return Err(corrupt(format!(
                "cannot append blob starting at {} after blob ending at {}",
                next.start_id(),
                self.stop_id()
            )));
        }
        if next.elem_bits() != self.elem_bits() || next.byte_order() != self.byte_order() {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message("appended blob has a different element layout")
                .with_row_id(next.start_id()));
        }
        let map = self.page_map_or_corrupt()?.append(next.page_map_or_corrupt()?)?;
        let mut writer = BitWriter::new();
        writer.append(self.data().as_bytes(), 0, self.data().bit_len());
        writer.append(next.data().as_bytes(), 0, next.data().bit_len());
        let data = DataBuffer::new(
            writer.into_bytes(),
            self.elem_bits(),
            self.elem_count() + next.elem_count(),
        )?;
        Blob::builder(self.start_id(), next.stop_id(), data)
            .page_map(Arc::new(map))
            .byte_order(self.byte_order())
            .no_cache(self.no_cache() || next.no_cache())
            .build()
    }

    /// Fold consecutive byte-identical rows into shared runs and collapse uniform shapes.
    pub fn optimize_page_map(&self) -> Result<Blob, Error> {
        let map = self.page_map_or_corrupt()?;
        let bits = self.elem_bits() as u64;
        let buf = self.data().as_bytes();
        let mut builder = PageMapBuilder::new();
        let mut writer = BitWriter::new();
        let mut last: Option<(u64, u32)> = None;
        let mut iter = map.iter();
        while let Some(span) = iter.span() {
            let same = last.is_some_and(|(first, len)| {
                len == span.elem_count
                    && bit_eq(
                        buf,
                        first * bits,
                        buf,
                        span.first_elem * bits,
                        span.elem_count as u64 * bits,
                    )
            });
            if !same {
                writer.append(buf, span.first_elem * bits, span.elem_count as u64 * bits);
                last = Some((span.first_elem, span.elem_count));
            }
            builder.append_rows(span.elem_count, span.repeat, same)?;
            iter.advance(span.repeat);
        }
        let optimized = builder.finish()?;
        if optimized == **map {
            return Ok(self.clone());
        }
        let elem_count = writer.bit_len() / bits;
        let mut inner = self.rebuild();
        inner.data = DataBuffer::new(writer.into_bytes(), self.elem_bits(), elem_count)?;
        inner.page_map = Some(Arc::new(optimized));
        Self::with_inner(inner)
    }

    pub fn check_integrity(&self) -> Result<(), Error> {
        if self.inner.start_id > self.inner.stop_id {
            return Err(corrupt(format!(
                "blob range [{}, {}] is inverted",
                self.inner.start_id, self.inner.stop_id
            )));
        }
        if let Some(map) = &self.inner.page_map {
            // Encoded blobs keep the row layout of their decoded form.
            if self.inner.headers.is_none() && map.elem_count() != self.elem_count() {
                return Err(corrupt(format!(
                    "page map describes {} elements, buffer holds {}",
                    map.elem_count(),
                    self.elem_count()
                ))
                .with_row_id(self.start_id()));
            }
            if map.row_count() != self.row_count() {
                return Err(corrupt(format!(
                    "page map describes {} rows, blob spans {}",
                    map.row_count(),
                    self.row_count()
                ))
                .with_row_id(self.start_id()));
            }
        }
        Ok(())
    }
}

/// Row lengths re-expressed in a new element width; every row must divide evenly.
fn rescale_page_map(map: &PageMap, from_bits: u32, to_bits: u32) -> Result<PageMap, Error> {
    let scale = |row_len: u32| -> Result<u32, Error> {
        let bits = row_len as u64 * from_bits as u64;
        if bits % to_bits as u64 != 0 {
            return Err(Error::new(ErrorKind::TypeMismatch).with_message(format!(
                "row of {bits} bits cannot hold {to_bits}-bit elements"
            )));
        }
        Ok((bits / to_bits as u64) as u32)
    };
    if let Some(row_len) = map.fixed_row_len() {
        let scaled = scale(row_len)?;
        return Ok(if map.is_single_row() {
            PageMap::new_single(map.row_count(), scaled)
        } else if map.data_records() == map.row_count() {
            PageMap::new_fixed(map.row_count(), scaled)
        } else {
            rescale_runs(map, &scale)?
        });
    }
    rescale_runs(map, &scale)
}

fn rescale_runs(
    map: &PageMap,
    scale: &dyn Fn(u32) -> Result<u32, Error>,
) -> Result<PageMap, Error> {
    let mut runs = map.runs();
    for run in &mut runs {
        run.row_len = scale(run.row_len)?;
    }
    PageMap::from_runs(runs)
}
