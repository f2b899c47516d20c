// Binary layouts for serialized page maps and the blob envelope used by serial productions.
use crate::core::bits::DataBuffer;
use crate::core::blob::{Blob, BlobHeader, HeaderChain};
use crate::core::error::{corrupt, Error};
use crate::core::pagemap::{Layout, PageMap, Run};
use crate::core::types::ByteOrder;
use bytes::Bytes;
use std::sync::Arc;

pub const PAGE_MAP_MAGIC: [u8; 4] = *b"PMP1";
pub const PAGE_MAP_HEADER_LEN: usize = 16;
pub const BLOB_MAGIC: [u8; 4] = *b"BLB1";
pub const BLOB_HEADER_LEN: usize = 32;

const LAYOUT_FIXED: u8 = 0;
const LAYOUT_SINGLE: u8 = 1;
const LAYOUT_RUNS: u8 = 2;
const RUN_GROUP_LEN: usize = 16;
const FRAME_FIXED_LEN: usize = 24;

pub fn encode_page_map(map: &PageMap) -> Vec<u8> {
    let mut buf = vec![0u8; PAGE_MAP_HEADER_LEN];
    buf[0..4].copy_from_slice(&PAGE_MAP_MAGIC);
    write_u64(&mut buf, 8, map.row_count());
    match map.layout() {
        Layout::Fixed { row_len } => {
            buf[4] = LAYOUT_FIXED;
            push_u32(&mut buf, *row_len);
        }
        Layout::Single { row_len } => {
            buf[4] = LAYOUT_SINGLE;
            push_u32(&mut buf, *row_len);
        }
        Layout::Runs(index) => {
            buf[4] = LAYOUT_RUNS;
            let groups = group_runs(index.runs());
            push_u32(&mut buf, groups.len() as u32);
            for (run, times) in groups {
                push_u32(&mut buf, run.row_len);
                push_u32(&mut buf, times);
                push_u64(&mut buf, run.repeat);
            }
        }
    }
    buf
}

// Identical consecutive runs are stored once with a count.
fn group_runs(runs: &[Run]) -> Vec<(Run, u32)> {
    let mut groups: Vec<(Run, u32)> = Vec::new();
    for run in runs {
        match groups.last_mut() {
            Some((last, times)) if last == run && *times < u32::MAX => *times += 1,
            _ => groups.push((*run, 1)),
        }
    }
    groups
}

pub fn decode_page_map(buf: &[u8]) -> Result<PageMap, Error> {
    decode_page_map_in(buf, None)
}

/// Decode a page map that must describe exactly `row_count` rows; checked before any run
/// table is expanded.
pub(crate) fn decode_page_map_for(buf: &[u8], row_count: u64) -> Result<PageMap, Error> {
    decode_page_map_in(buf, Some(row_count))
}

fn decode_page_map_in(buf: &[u8], expected_rows: Option<u64>) -> Result<PageMap, Error> {
    let mut reader = Reader::new(buf);
    if reader.take(4)? != PAGE_MAP_MAGIC {
        return Err(corrupt("bad page map magic"));
    }
    let layout = reader.take(4)?[0];
    let row_count = reader.u64()?;
    if let Some(expected) = expected_rows {
        if row_count != expected {
            return Err(corrupt(format!(
                "page map describes {row_count} rows, blob spans {expected}"
            )));
        }
    }
    let map = match layout {
        LAYOUT_FIXED => PageMap::new_fixed(row_count, reader.u32()?),
        LAYOUT_SINGLE => PageMap::new_single(row_count, reader.u32()?),
        LAYOUT_RUNS => {
            let groups = reader.u32()? as usize;
            if reader.remaining() < groups * RUN_GROUP_LEN {
                return Err(corrupt("page map run table truncated"));
            }
            let mut table = Vec::with_capacity(groups);
            let (mut runs_total, mut rows_total) = (0u64, 0u64);
            for _ in 0..groups {
                let row_len = reader.u32()?;
                let times = reader.u32()?;
                let repeat = reader.u64()?;
                if repeat == 0 {
                    return Err(corrupt("page map run repeats zero rows"));
                }
                runs_total += times as u64;
                rows_total = (times as u64)
                    .checked_mul(repeat)
                    .and_then(|rows| rows.checked_add(rows_total))
                    .ok_or_else(|| corrupt("page map run table overflows"))?;
                table.push((Run::new(row_len, repeat), times));
            }
            // Every run covers at least one row, so a consistent table expands to at most
            // `row_count` runs.
            if rows_total != row_count {
                return Err(corrupt(format!(
                    "page map runs cover {rows_total} rows, header says {row_count}"
                )));
            }
            let runs_len = usize::try_from(runs_total)
                .map_err(|_| corrupt("page map run table overflows"))?;
            let mut runs = Vec::with_capacity(runs_len);
            for (run, times) in table {
                runs.extend(std::iter::repeat_n(run, times as usize));
            }
            PageMap::from_runs(runs)?
        }
        other => return Err(corrupt(format!("unknown page map layout {other}"))),
    };
    if reader.remaining() != 0 {
        return Err(corrupt("trailing bytes after page map"));
    }
    Ok(map)
}

/// Serialize a blob's element width, byte order, page map, codec headers, and data.
pub fn encode_blob(blob: &Blob, page_map: Option<&[u8]>) -> Vec<u8> {
    let frames: Vec<&BlobHeader> = blob.headers().map(|chain| chain.frames()).unwrap_or_default();
    let page_map = page_map.unwrap_or_default();
    let mut buf = vec![0u8; BLOB_HEADER_LEN];
    buf[0..4].copy_from_slice(&BLOB_MAGIC);
    buf[4] = blob.byte_order().to_u8();
    write_u32(&mut buf, 8, blob.elem_bits());
    write_u32(&mut buf, 12, frames.len() as u32);
    write_u32(&mut buf, 16, page_map.len() as u32);
    write_u64(&mut buf, 24, blob.elem_count());
    buf.extend_from_slice(page_map);
    for frame in frames {
        buf.push(frame.flags);
        buf.push(frame.version);
        buf.extend_from_slice(&[0, 0]);
        push_u32(&mut buf, frame.fmt);
        push_u64(&mut buf, frame.source_size);
        push_u32(&mut buf, frame.args.len() as u32);
        push_u32(&mut buf, 0);
        for arg in &frame.args {
            buf.extend_from_slice(&arg.to_le_bytes());
        }
    }
    buf.extend_from_slice(blob.data().as_bytes());
    buf
}

/// Parsed envelope; the page map stays serialized so the caller can decide where to decode it.
#[derive(Debug)]
pub struct BlobEnvelope {
    pub byte_order: ByteOrder,
    pub data: DataBuffer,
    pub page_map: Option<Bytes>,
    pub headers: Option<Arc<HeaderChain>>,
}

pub fn decode_blob(bytes: &Bytes) -> Result<BlobEnvelope, Error> {
    let mut reader = Reader::new(bytes);
    if reader.take(4)? != BLOB_MAGIC {
        return Err(corrupt("bad blob magic"));
    }
    let byte_order = ByteOrder::from_u8(reader.take(4)?[0])
        .ok_or_else(|| corrupt("unknown byte order tag"))?;
    let elem_bits = reader.u32()?;
    let frame_count = reader.u32()? as usize;
    let page_map_len = reader.u32()? as usize;
    reader.take(4)?;
    let elem_count = reader.u64()?;

    let page_map = if page_map_len == 0 {
        None
    } else {
        let start = reader.pos;
        reader.take(page_map_len)?;
        Some(bytes.slice(start..start + page_map_len))
    };

    if reader.remaining() < frame_count * FRAME_FIXED_LEN {
        return Err(corrupt("blob header frames truncated"));
    }
    let mut frames = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        let head = reader.take(4)?;
        let (flags, version) = (head[0], head[1]);
        let fmt = reader.u32()?;
        let source_size = reader.u64()?;
        let nargs = reader.u32()? as usize;
        reader.u32()?;
        let mut args = Vec::with_capacity(nargs.min(reader.remaining() / 8));
        for _ in 0..nargs {
            args.push(reader.u64()? as i64);
        }
        frames.push(BlobHeader {
            flags,
            version,
            fmt,
            source_size,
            args,
        });
    }

    let data_len = (elem_bits as u64)
        .checked_mul(elem_count)
        .and_then(|bits| usize::try_from(bits.div_ceil(8)).ok())
        .ok_or_else(|| corrupt("blob element count overflows"))?;
    if reader.remaining() != data_len {
        return Err(corrupt(format!(
            "blob data holds {} bytes, expected {data_len}",
            reader.remaining()
        )));
    }
    let data = DataBuffer::new(bytes.slice(reader.pos..), elem_bits, elem_count)?;
    Ok(BlobEnvelope {
        byte_order,
        data,
        page_map,
        headers: HeaderChain::from_frames(frames),
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < len {
            return Err(corrupt("serialized data truncated"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let bytes = self.take(4)?;
        Ok(read_u32(bytes, 0))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let bytes = self.take(8)?;
        Ok(read_u64(bytes, 0))
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(out)
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::{
        decode_blob, decode_page_map, decode_page_map_for, encode_blob, encode_page_map,
        BLOB_HEADER_LEN, PAGE_MAP_HEADER_LEN, PAGE_MAP_MAGIC,
    };
    use crate::core::bits::DataBuffer;
    use crate::core::blob::{Blob, BlobHeader, HeaderChain, HEADER_FLAG_PASSTHROUGH};
    use crate::core::error::ErrorKind;
    use crate::core::pagemap::{PageMap, Run};
    use crate::core::types::ByteOrder;
    use bytes::Bytes;
    use std::sync::Arc;

    #[test]
    fn page_map_round_trip_preserves_rows() {
        let map = PageMap::from_runs(vec![
            Run::new(3, 1),
            Run::new(3, 1),
            Run::new(3, 1),
            Run::new(0, 7),
            Run::new(5, 2),
        ])
        .expect("runs");
        let encoded = encode_page_map(&map);
        // Three identical runs collapse into one group.
        assert_eq!(encoded.len(), PAGE_MAP_HEADER_LEN + 4 + 3 * 16);
        let decoded = decode_page_map(&encoded).expect("decode");
        assert_eq!(decoded, map);
        for row in 0..map.row_count() {
            assert_eq!(decoded.locate(row), map.locate(row), "row {row}");
        }
    }

    #[test]
    fn fixed_and_single_layouts_round_trip() {
        for map in [PageMap::new_fixed(1000, 4), PageMap::new_single(12, 9)] {
            let decoded = decode_page_map(&encode_page_map(&map)).expect("decode");
            assert_eq!(decoded, map);
        }
    }

    #[test]
    fn truncated_page_map_is_corrupt() {
        let encoded = encode_page_map(&PageMap::new_fixed(3, 2));
        let err = decode_page_map(&encoded[..encoded.len() - 1]).expect_err("short");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        let mut bad = encoded.clone();
        bad[4] = 9;
        assert_eq!(decode_page_map(&bad).expect_err("layout").kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn blob_envelope_carries_headers_and_data() {
        let chain = HeaderChain::child(
            None,
            BlobHeader {
                flags: HEADER_FLAG_PASSTHROUGH,
                version: 1,
                fmt: 7,
                source_size: 6,
                args: vec![-1, 42],
            },
        );
        let map = PageMap::new_fixed(3, 2);
        let blob = Blob::builder(1, 3, DataBuffer::from_bytes(b"aabbcc".to_vec(), 8).expect("data"))
            .page_map(Arc::new(map.clone()))
            .byte_order(ByteOrder::Big)
            .headers(Some(chain.clone()))
            .build()
            .expect("blob");
        let encoded = Bytes::from(encode_blob(&blob, Some(&encode_page_map(&map))));
        let envelope = decode_blob(&encoded).expect("decode");
        assert_eq!(envelope.byte_order, ByteOrder::Big);
        assert_eq!(envelope.data.as_bytes(), b"aabbcc");
        let page_map = envelope.page_map.expect("page map");
        assert_eq!(decode_page_map(&page_map).expect("map"), map);
        assert_eq!(envelope.headers.as_deref(), Some(&*chain));
    }

    #[test]
    fn oversized_run_table_is_rejected_before_expansion() {
        let mut buf = vec![0u8; PAGE_MAP_HEADER_LEN];
        buf[0..4].copy_from_slice(&PAGE_MAP_MAGIC);
        buf[4] = 2;
        buf[8..16].copy_from_slice(&5u64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        let err = decode_page_map(&buf).expect_err("runs exceed rows");
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let fixed = encode_page_map(&PageMap::new_fixed(3, 2));
        let err = decode_page_map_for(&fixed, 4).expect_err("row count");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert_eq!(decode_page_map_for(&fixed, 3).expect("rows agree"), PageMap::new_fixed(3, 2));
    }

    #[test]
    fn overflowing_element_count_is_corrupt() {
        let blob = Blob::builder(1, 1, DataBuffer::from_bytes(b"a".to_vec(), 8).expect("data"))
            .build()
            .expect("blob");
        let mut buf = encode_blob(&blob, None);
        buf.truncate(BLOB_HEADER_LEN);
        buf[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        buf[24..32].copy_from_slice(&u64::MAX.to_le_bytes());
        let err = decode_blob(&Bytes::from(buf)).expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }
}
