// Whole-blob codec stages: encode/decode with header frames, legacy, n-ary, and byteswap.
use super::FnCall;
use crate::core::bits::{bytes_for_bits, DataBuffer};
use crate::core::blob::{Blob, BlobHeader, HeaderChain, HEADER_FLAG_PASSTHROUGH};
use crate::core::error::{corrupt, Error, ErrorKind};
use crate::core::pagemap::PageMap;
use crate::core::types::ByteOrder;
use crate::core::xform::{BlobFn, BlobNFn, BlobOutput, LegacyBlobFn};
use std::sync::Arc;

// Stored data reinterpreted at the stage width; byte streams keep their exact length.
fn pass_through(data: &DataBuffer, elem_bits: u32) -> Result<DataBuffer, Error> {
    if elem_bits == 8 {
        return DataBuffer::new(data.shared(), 8, data.byte_len() as u64);
    }
    data.cast(elem_bits)
}

/// Compress one stage, pushing its header frame; incompressible input is stored as-is.
pub(super) fn encode(call: &FnCall, func: &BlobFn, inputs: &[Blob]) -> Result<Blob, Error> {
    let input = &inputs[0];
    let source = if input.headers().is_none() && input.page_map().is_some() {
        input.optimize_page_map()?
    } else {
        input.clone()
    };
    let bits = call.elem_bits()?;
    let mut header = BlobHeader {
        source_size: source.data().byte_len() as u64,
        ..BlobHeader::default()
    };
    let capacity = source.data().bit_len().div_ceil(bits as u64);
    let mut out = BlobOutput::with_capacity(bits, capacity);
    let stored = if source.elem_count() == 0 {
        false
    } else {
        match func(&call.info(), &mut out, source.data(), &mut header) {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::BufferTooSmall => false,
            Err(err) => return Err(err),
        }
    };
    let data = if stored {
        out.into_buffer()?
    } else {
        header.flags |= HEADER_FLAG_PASSTHROUGH;
        pass_through(source.data(), bits)?
    };
    Blob::builder(source.start_id(), source.stop_id(), data)
        .maybe_page_map(source.page_map().cloned())
        .byte_order(source.byte_order())
        .headers(Some(HeaderChain::child(source.headers(), header)))
        .no_cache(source.no_cache())
        .build()
}

/// Undo one stage, consuming the outermost header frame.
pub(super) fn decode(call: &FnCall, func: &BlobFn, inputs: &[Blob]) -> Result<Blob, Error> {
    let input = &inputs[0];
    let bits = call.elem_bits()?;
    let page_map = input.page_map_or_corrupt()?;
    let (mut header, next) = match input.headers() {
        Some(chain) => (chain.header().clone(), chain.next().cloned()),
        None => (
            BlobHeader {
                source_size: bytes_for_bits(page_map.elem_count() * bits as u64) as u64,
                ..BlobHeader::default()
            },
            None,
        ),
    };
    let (data, byte_order) = if header.is_passthrough() {
        (pass_through(input.data(), bits)?, input.byte_order())
    } else {
        let mut out = BlobOutput::with_capacity(bits, header.source_size * 8 / bits as u64);
        out.byte_order = input.byte_order();
        func(&call.info(), &mut out, input.data(), &mut header)?;
        let byte_order = out.byte_order;
        (out.into_buffer()?.cast(bits)?, byte_order)
    };
    Blob::builder(input.start_id(), input.stop_id(), data)
        .page_map(Arc::clone(page_map))
        .byte_order(byte_order)
        .headers(next)
        .no_cache(input.no_cache())
        .build()
}

/// Older codec shape without header frames; output defaults to little endian.
pub(super) fn legacy(call: &FnCall, func: &LegacyBlobFn, inputs: &[Blob]) -> Result<Blob, Error> {
    let input = &inputs[0];
    let bits = call.elem_bits()?;
    let mut out = BlobOutput::with_capacity(bits, 0);
    out.byte_order = ByteOrder::Little;
    func(&call.info(), &mut out, input.data())?;
    let byte_order = out.byte_order;
    let data = out.into_buffer()?.cast(bits)?;
    Blob::builder(input.start_id(), input.stop_id(), data)
        .maybe_page_map(input.page_map().cloned())
        .byte_order(byte_order)
        .no_cache(input.no_cache())
        .build()
}

pub(super) fn blob_n(
    call: &FnCall,
    func: &BlobNFn,
    row_id: i64,
    inputs: &[Blob],
) -> Result<Blob, Error> {
    if let Some(missing) = inputs.iter().find(|blob| blob.page_map().is_none()) {
        return Err(corrupt(format!("n-ary blob function `{}` input has no page map", call.name))
            .with_row_id(missing.start_id()));
    }
    func(&call.info(), row_id, inputs)
}

/// Bring foreign-endian data to native order, repairing a missing page map on the way.
pub(super) fn byteswap(call: &FnCall, inputs: &[Blob]) -> Result<Blob, Error> {
    let bits = call.elem_bits()?;
    let mut blob = inputs[0].cast(bits)?;
    if blob.page_map().is_none() {
        let (rows, elems) = (blob.row_count(), blob.elem_count());
        if rows == 0 || elems % rows != 0 {
            return Err(corrupt(format!(
                "{elems} elements cannot be laid out over {rows} rows"
            ))
            .with_row_id(blob.start_id()));
        }
        let row_len = u32::try_from(elems / rows).map_err(|_| corrupt("row exceeds u32 elements"))?;
        blob = blob.with_page_map(Arc::new(PageMap::new_fixed(rows, row_len)))?;
    }
    let width = (call.desc.intrinsic_bits / 8) as usize;
    if !blob.byte_order().is_foreign() || width < 2 || call.desc.intrinsic_bits % 8 != 0 {
        return blob.with_data(blob.data().clone(), ByteOrder::Native);
    }
    let mut bytes = blob.data().as_bytes().to_vec();
    for chunk in bytes.chunks_exact_mut(width) {
        chunk.reverse();
    }
    let data = DataBuffer::new(bytes, bits, blob.elem_count())?;
    blob.with_data(data, ByteOrder::Native)
}
