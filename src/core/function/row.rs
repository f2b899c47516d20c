// Row-shaped functions: one call per row (or per run of identical input rows), outputs folded.
use super::{advance, intersect, last_row, row_args, FnCall};
use crate::core::bits::{bit_eq, BitWriter, DataBuffer};
use crate::core::blob::{span_rows, Blob};
use crate::core::error::{corrupt, Error};
use crate::core::pagemap::{PageMap, PageMapBuilder};
use crate::core::production::{ProductionGraph, ProductionKind};
use crate::core::stop;
use crate::core::xform::{RowFn, RowOutput};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum RowMode {
    /// One call covers every row whose inputs share stored data.
    Batched,
    /// One call per row id.
    PerRow,
    /// One call per fetch, always a single row.
    Single,
}

/// Next regroup window after a fetch at `row_id` that followed a fetch over `prev`.
pub(super) fn next_window(prev: (i64, i64), row_id: i64, max: u64) -> u64 {
    let window = span_rows(prev.0, prev.1).max(1);
    if row_id as i128 != prev.1 as i128 + 1 {
        return 1;
    }
    if window < max && (row_id as i128).rem_euclid(4 * window as i128) == 1 {
        return (window * 4).min(max);
    }
    window
}

/// Rows one call computes: the requested rows when access is random, else a window-aligned
/// block (or every row the inputs hold), always clipped to the inputs.
pub(super) fn row_range(
    row_id: i64,
    count: u64,
    window: u64,
    bounds: Option<(i64, i64)>,
) -> (i64, i64) {
    let (start, stop) = if window == 1 {
        (row_id, last_row(row_id, count))
    } else {
        match bounds {
            None => (row_id, last_row(row_id, count.max(window))),
            Some((start, stop)) if count == 1 && span_rows(start, stop) > 2 * window => {
                let width = window as i128;
                let block = (row_id as i128 - 1).div_euclid(width);
                let first = block * width + 1;
                let clamp = |v: i128| v.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
                (clamp(first), clamp(first + width - 1))
            }
            Some(range) => range,
        }
    };
    match bounds {
        Some((lo, hi)) => (start.max(lo), stop.min(hi)),
        None => (start, stop),
    }
}

impl ProductionGraph {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn read_rows(
        &mut self,
        call: &FnCall,
        func: &RowFn,
        mode: RowMode,
        row_id: i64,
        count: u64,
        min_start: i64,
        inputs: &[Blob],
    ) -> Result<Blob, Error> {
        let bits = call.elem_bits()?;
        let args_from: Vec<&Blob> = inputs
            .iter()
            .zip(&call.params)
            .filter(|(_, param)| !param.control)
            .map(|(blob, _)| blob)
            .collect();
        if args_from.is_empty() && mode == RowMode::Batched {
            return whole_id_space(call, func, bits, row_id);
        }

        let (start, stop) = match mode {
            RowMode::Single => (row_id, row_id),
            RowMode::Batched | RowMode::PerRow => {
                let prev = self.window_of(call)?;
                let window = next_window(prev, row_id, self.regroup_window_max);
                let all: Vec<&Blob> = inputs.iter().collect();
                let (start, stop) = row_range(row_id, count, window, intersect(&all));
                (start.max(min_start), stop)
            }
        };
        if start > row_id || stop < row_id {
            return Err(corrupt(format!("row range [{start}, {stop}] misses the requested row"))
                .with_row_id(row_id));
        }
        self.set_window(call, (start, stop))?;

        let info = call.info();
        let mut out = RowOutput::new(bits);
        let mut writer = BitWriter::new();
        let mut builder = PageMapBuilder::new();
        let mut prev: Option<(u64, Vec<u8>)> = None;
        let mut row = start;
        loop {
            stop::check(row)?;
            let (args, repeat) = row_args(&args_from, row)?;
            let rows = match mode {
                RowMode::Batched => repeat.min(span_rows(row, stop)).max(1),
                RowMode::PerRow | RowMode::Single => 1,
            };
            out.reset();
            func(&info, row, &mut out, &args).map_err(|err| super::with_row(err, row))?;
            let len = u32::try_from(out.elem_count())
                .map_err(|_| corrupt("row output exceeds u32 elements").with_row_id(row))?;
            let bit_len = out.elem_count() * bits as u64;
            let same = row != start
                && prev.as_ref().is_some_and(|(count, data)| {
                    *count == out.elem_count() && bit_eq(data, 0, out.data(), 0, bit_len)
                });
            if !same {
                writer.append(out.data(), 0, bit_len);
                prev = Some((out.elem_count(), out.data().to_vec()));
            }
            builder.append_rows(len, rows, same)?;
            match advance(row, rows) {
                Some(next) if next <= stop => row = next,
                _ => break,
            }
        }

        let elem_count = writer.bit_len() / bits as u64;
        let data = DataBuffer::new(writer.into_bytes(), bits, elem_count)?;
        Blob::builder(start, stop, data)
            .page_map(Arc::new(builder.finish()?))
            .no_cache(out.no_cache() || mode == RowMode::Single)
            .build()
    }

    fn window_of(&self, call: &FnCall) -> Result<(i64, i64), Error> {
        match &self.get(call.id)?.kind {
            ProductionKind::Function(function) => Ok(function.window),
            _ => Err(corrupt(format!("production {} is not a function", call.id))),
        }
    }

    fn set_window(&mut self, call: &FnCall, window: (i64, i64)) -> Result<(), Error> {
        if let ProductionKind::Function(function) = &mut self.get_mut(call.id)?.kind {
            function.window = window;
        }
        Ok(())
    }
}

// Without inputs the output cannot vary by row: one call answers every id.
fn whole_id_space(call: &FnCall, func: &RowFn, bits: u32, row_id: i64) -> Result<Blob, Error> {
    let mut out = RowOutput::new(bits);
    func(&call.info(), row_id, &mut out, &[]).map_err(|err| super::with_row(err, row_id))?;
    let len = u32::try_from(out.elem_count())
        .map_err(|_| corrupt("row output exceeds u32 elements").with_row_id(row_id))?;
    let data = DataBuffer::new(out.data().to_vec(), bits, out.elem_count())?;
    // Row counts are u64, so the span leaves out one end of the id space, never `row_id`.
    let (start, stop) = if row_id == i64::MIN {
        (i64::MIN, i64::MAX - 1)
    } else {
        (i64::MIN + 1, i64::MAX)
    };
    Blob::builder(start, stop, data)
        .page_map(Arc::new(PageMap::new_single(span_rows(start, stop), len)))
        .no_cache(out.no_cache())
        .build()
}

#[cfg(test)]
mod tests {
    use super::{next_window, row_range};
    use crate::core::error::Error;
    use crate::core::physical::MemoryColumn;
    use crate::core::production::{Param, ProdMeta, ProductionGraph};
    use crate::core::types::{CtxId, TypeDesc};
    use crate::core::xform::{RowArg, RowOutput, Xform, XformInfo};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn window_grows_on_sequential_access_and_resets_on_jumps() {
        assert_eq!(next_window((0, 0), 1, 256), 4);
        assert_eq!(next_window((1, 4), 5, 256), 4);
        assert_eq!(next_window((13, 16), 17, 256), 16);
        assert_eq!(next_window((1, 256), 257, 256), 256);
        assert_eq!(next_window((1, 4), 9, 256), 1);
        assert_eq!(next_window((1, 64), 65, 100), 64);
        assert_eq!(next_window((1, 4), 17, 8), 1);
    }

    #[test]
    fn ranges_align_to_window_blocks() {
        assert_eq!(row_range(7, 1, 1, Some((1, 100))), (7, 7));
        assert_eq!(row_range(7, 1, 4, Some((1, 100))), (5, 8));
        assert_eq!(row_range(7, 1, 4, Some((1, 6))), (1, 6));
        assert_eq!(row_range(7, 3, 1, Some((1, 8))), (7, 8));
        assert_eq!(row_range(7, 2, 16, None), (7, 22));
    }

    fn plus_one(
        _info: &XformInfo<'_>,
        _row: i64,
        out: &mut RowOutput,
        args: &[RowArg<'_>],
    ) -> Result<(), Error> {
        let value = args[0].uint(0).unwrap_or_default() as u32 + 1;
        out.set(&value.to_ne_bytes(), 1)
    }

    #[test]
    fn identical_input_rows_are_computed_once() {
        let values = [3u32, 3, 3, 3, 9, 9];
        let column = Arc::new(MemoryColumn::from_u32s(1, &values, 6).expect("column"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut graph = ProductionGraph::default();
        let a = graph.add_physical(ProdMeta::new("A", TypeDesc::u32(), CtxId::new(0, 1)), column);
        let f = graph
            .add_function(
                ProdMeta::new("F", TypeDesc::u32(), CtxId::new(0, 2)),
                Xform::row(move |info, row, out, args| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    plus_one(info, row, out, args)
                }),
                vec![Param::input(a)],
            )
            .expect("function");
        let blob = graph.read_blob(f, 1, 6).expect("read");
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(blob.elem_count(), 2);
        let span = blob.row(6).expect("row 6");
        assert_eq!(
            blob.data().element_bytes(span.first_elem, 1).expect("elem"),
            10u32.to_ne_bytes()
        );
    }

    #[test]
    fn non_deterministic_rows_are_single_and_uncached() {
        let column = Arc::new(MemoryColumn::from_u32s(1, &[1, 1, 1], 3).expect("column"));
        let mut graph = ProductionGraph::default();
        let a = graph.add_physical(ProdMeta::new("A", TypeDesc::u32(), CtxId::new(0, 1)), column);
        let f = graph
            .add_function(
                ProdMeta::new("F", TypeDesc::u32(), CtxId::new(0, 2)),
                Xform::NonDetRow(Arc::new(plus_one)),
                vec![Param::input(a)],
            )
            .expect("function");
        let blob = graph.read_blob(f, 2, 1).expect("read");
        assert_eq!((blob.start_id(), blob.stop_id()), (2, 2));
        assert!(blob.no_cache());
    }

    #[test]
    fn zero_input_row_function_covers_every_id() {
        let mut graph = ProductionGraph::default();
        let f = graph
            .add_function(
                ProdMeta::new("K", TypeDesc::u8(), CtxId::new(0, 1)),
                Xform::row(|_, _, out, _| out.set_bytes(b"const")),
                Vec::new(),
            )
            .expect("function");
        let blob = graph.read_blob(f, 42, 1).expect("read");
        assert_eq!((blob.start_id(), blob.stop_id()), (i64::MIN + 1, i64::MAX));
        assert_eq!(blob.row(-7).expect("any row").elem_count, 5);
        assert_eq!(blob.row(i64::MAX).expect("last id").elem_count, 5);
        assert!(blob.is_single_row());
        let low = graph.read_blob(f, i64::MIN, 1).expect("first id");
        assert_eq!(low.row(i64::MIN).expect("first id").elem_count, 5);
    }
}
