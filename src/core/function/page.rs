// Fixed-row and array shapes: the output row layout follows the inputs.
use super::{advance, intersect, row_args, FnCall};
use crate::core::bits::{bit_eq, bytes_for_bits, DataBuffer};
use crate::core::blob::{span_rows, Blob, BlobHeader, HeaderChain};
use crate::core::error::{corrupt, Error, ErrorKind};
use crate::core::pagemap::{PageMap, PageMapBuilder};
use crate::core::stop;
use crate::core::types::Chain;
use crate::core::xform::{ArrayFn, PageFn, PageOutput};
use std::sync::Arc;

/// Each output row has the length of the corresponding first-input row.
pub(super) fn fixed_rows(
    call: &FnCall,
    func: &PageFn,
    min_start: i64,
    inputs: &[Blob],
) -> Result<Blob, Error> {
    if call.params.iter().any(|param| param.control) {
        return Err(Error::new(ErrorKind::InvalidArgument)
            .with_message(format!("fixed-row function `{}` takes no control inputs", call.name)));
    }
    let bits = call.elem_bits()?;
    let inputs: Vec<&Blob> = inputs.iter().collect();
    let (start, stop) = intersect(&inputs).ok_or_else(|| corrupt("fixed-row function has no inputs"))?;
    let start = start.max(min_start);
    let total = inputs[0].elem_count();
    if total == 0 || inputs.iter().any(|blob| blob.elem_count() != total) {
        return Err(corrupt(format!(
            "fixed-row function `{}` inputs disagree on element count",
            call.name
        ))
        .with_row_id(start));
    }
    let info = call.info();

    if inputs.iter().all(|blob| blob.is_single_row()) {
        let (args, _) = row_args(&inputs, start)?;
        let len = args[0].elem_count();
        let row_len = u32::try_from(len).map_err(|_| corrupt("row exceeds u32 elements"))?;
        let mut buffer = vec![0u8; bytes_for_bits(len * bits as u64)];
        let mut out = PageOutput {
            buffer: &mut buffer,
            elem_bits: bits,
            first_elem: 0,
            elem_count: len,
        };
        func(&info, start, &mut out, &args)?;
        return Blob::builder(start, stop, DataBuffer::new(buffer, bits, len)?)
            .page_map(Arc::new(PageMap::new_single(span_rows(start, stop), row_len)))
            .build();
    }

    let mut buffer = Vec::new();
    let mut builder = PageMapBuilder::new();
    let mut first_write = 0u64;
    let mut prev: Option<(u64, u64)> = None;
    let mut row = start;
    loop {
        stop::check(row)?;
        let (args, repeat) = row_args(&inputs, row)?;
        let rows = repeat.min(span_rows(row, stop)).max(1);
        let len = args[0].elem_count();
        let row_len = u32::try_from(len).map_err(|_| corrupt("row exceeds u32 elements"))?;
        let needed = bytes_for_bits((first_write + len) * bits as u64);
        if buffer.len() < needed {
            buffer.resize(needed, 0);
        }
        let mut out = PageOutput {
            buffer: &mut buffer,
            elem_bits: bits,
            first_elem: first_write,
            elem_count: len,
        };
        func(&info, row, &mut out, &args).map_err(|err| super::with_row(err, row))?;
        let width = bits as u64;
        let same = prev.is_some_and(|(first, prev_len)| {
            prev_len == len
                && bit_eq(&buffer, first * width, &buffer, first_write * width, len * width)
        });
        if !same {
            prev = Some((first_write, len));
            first_write += len;
        }
        builder.append_rows(row_len, rows, same)?;
        match advance(row, rows) {
            Some(next) if next <= stop => row = next,
            _ => break,
        }
    }
    buffer.truncate(bytes_for_bits(first_write * bits as u64));
    Blob::builder(start, stop, DataBuffer::new(buffer, bits, first_write)?)
        .page_map(Arc::new(builder.finish()?))
        .build()
}

/// Element-wise transform over the whole input buffer; the input page map is reused as-is.
pub(super) fn array(call: &FnCall, func: &ArrayFn, inputs: &[Blob]) -> Result<Blob, Error> {
    let input = &inputs[0];
    let bits = call.elem_bits()?;
    let count = input.elem_count();
    let mut out = vec![0u8; bytes_for_bits(count * bits as u64)];
    func(&call.info(), &mut out, input.data().as_bytes(), count)?;
    let headers = match (input.headers(), call.chain) {
        (Some(chain), Chain::Encoding) => Some(HeaderChain::child(Some(chain), BlobHeader::default())),
        (Some(chain), _) => chain.next().cloned(),
        (None, _) => None,
    };
    Blob::builder(input.start_id(), input.stop_id(), DataBuffer::new(out, bits, count)?)
        .maybe_page_map(input.page_map().cloned())
        .byte_order(input.byte_order())
        .headers(headers)
        .build()
}

#[cfg(test)]
mod tests {
    use crate::core::blob::Blob;
    use crate::core::error::ErrorKind;
    use crate::core::physical::MemoryColumn;
    use crate::core::production::{Param, ProdMeta, ProductionGraph};
    use crate::core::types::{CtxId, TypeDesc};
    use crate::core::xform::Xform;
    use std::sync::Arc;

    fn graph_with(rows: &[&[u8]]) -> (ProductionGraph, crate::core::production::ProdId) {
        let rows: Vec<Vec<u8>> = rows.iter().map(|row| row.to_vec()).collect();
        let column = Arc::new(MemoryColumn::from_rows(1, 8, &rows, 16).expect("column"));
        let mut graph = ProductionGraph::default();
        let a = graph.add_physical(ProdMeta::new("A", TypeDesc::ascii(), CtxId::new(0, 1)), column);
        (graph, a)
    }

    fn upper() -> Xform {
        Xform::page(|_, _, out, args| out.write(&args[0].to_vec().to_ascii_uppercase()))
    }

    #[test]
    fn fixed_row_output_keeps_input_shape() {
        let (mut graph, a) = graph_with(&[b"ac", b"gtt", b"gtt", b"a"]);
        let f = graph
            .add_function(
                ProdMeta::new("U", TypeDesc::ascii(), CtxId::new(0, 2)),
                upper(),
                vec![Param::input(a)],
            )
            .expect("function");
        let blob = graph.read_blob(f, 1, 4).expect("read");
        assert_eq!(blob.data().as_bytes(), b"ACGTTA");
        let span = blob.row(3).expect("row 3");
        assert_eq!((span.first_elem, span.elem_count), (2, 3));
    }

    #[test]
    fn single_row_inputs_take_one_call() {
        let (mut graph, a) = graph_with(&[b"xy", b"xy", b"xy"]);
        let f = graph
            .add_function(
                ProdMeta::new("U", TypeDesc::ascii(), CtxId::new(0, 2)),
                upper(),
                vec![Param::input(a)],
            )
            .expect("function");
        let blob = graph.read_blob(f, 2, 1).expect("read");
        assert!(blob.is_single_row());
        assert_eq!(blob.data().as_bytes(), b"XY");
        assert_eq!(blob.row_count(), 3);
    }

    #[test]
    fn control_inputs_are_rejected() {
        let (mut graph, a) = graph_with(&[b"x"]);
        let f = graph
            .add_function(
                ProdMeta::new("U", TypeDesc::ascii(), CtxId::new(0, 2)),
                upper(),
                vec![Param::control(a)],
            )
            .expect("function");
        let err = graph.read_blob(f, 1, 1).expect_err("control");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn array_shares_the_input_page_map() {
        let (mut graph, a) = graph_with(&[b"ab", b"c"]);
        let f = graph
            .add_function(
                ProdMeta::new("N", TypeDesc::u8(), CtxId::new(0, 2)),
                Xform::array(|_, dst, src, count| {
                    for i in 0..count as usize {
                        dst[i] = src[i] - b'a';
                    }
                    Ok(())
                }),
                vec![Param::input(a)],
            )
            .expect("function");
        let blob = graph.read_blob(f, 1, 1).expect("read");
        let input = graph.read_blob(a, 1, 1).expect("input");
        assert_eq!(blob.data().as_bytes(), &[0, 1, 2]);
        assert!(Arc::ptr_eq(
            blob.page_map().expect("map"),
            input.page_map().expect("input map")
        ));
        assert!(!Blob::ptr_eq(&blob, &input));
    }
}
