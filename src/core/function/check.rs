// Validators and fallbacks: Compare walks two streams row by row, Select takes the first hit.
use super::{advance, FnCall};
use crate::core::bits::bit_eq;
use crate::core::blob::{span_rows, Blob};
use crate::core::error::{corrupt, Error, ErrorKind};
use crate::core::production::{ProductionGraph, ReadEnv};
use crate::core::stop;
use crate::core::xform::{CompareFn, RowArg};
use bstr::ByteSlice;
use tracing::debug;

fn mismatch(call: &FnCall, what: &str, row_id: i64) -> Error {
    corrupt(format!("compare `{}`: {what}", call.name)).with_row_id(row_id)
}

impl ProductionGraph {
    /// Returns the original blob when the test input matches it row for row.
    pub(super) fn read_compare(
        &mut self,
        call: &FnCall,
        cmp: Option<CompareFn>,
        row_id: i64,
        count: u64,
        env: &mut ReadEnv<'_>,
    ) -> Result<Blob, Error> {
        let (orig_id, test_id) = (call.params[0].prod, call.params[1].prod);
        let orig = self.read_blob_in(orig_id, row_id, count, None, env)?;
        let mut test = self.read_blob_in(test_id, row_id, count, None, env)?;
        if orig.elem_bits() != test.elem_bits() {
            return Err(mismatch(call, "element widths differ", row_id));
        }
        if orig.byte_order().concrete() != test.byte_order().concrete() {
            return Err(mismatch(call, "byte orders differ", row_id));
        }
        let single = |blob: &Blob| blob.page_map().is_some_and(|map| map.data_records() == 1);
        if single(&orig)
            && single(&test)
            && orig.elem_count() == test.elem_count()
            && orig.data().as_bytes() == test.data().as_bytes()
        {
            return Ok(orig);
        }

        let bits = orig.elem_bits() as u64;
        let mut row = orig.start_id();
        loop {
            stop::check(row)?;
            if !test.covers(row) {
                test = self.read_blob_in(test_id, row, span_rows(row, orig.stop_id()), None, env)?;
                if test.elem_bits() != orig.elem_bits() {
                    return Err(mismatch(call, "element widths differ", row));
                }
                if test.byte_order().concrete() != orig.byte_order().concrete() {
                    return Err(mismatch(call, "byte orders differ", row));
                }
            }
            let a = orig.row(row)?;
            let b = test.row(row)?;
            if a.elem_count != b.elem_count {
                return Err(mismatch(
                    call,
                    &format!("row lengths differ ({} vs {})", a.elem_count, b.elem_count),
                    row,
                ));
            }
            let left = RowArg::new(orig.data().as_bytes(), orig.elem_bits(), a.first_elem, a.elem_count as u64);
            let right = RowArg::new(test.data().as_bytes(), test.elem_bits(), b.first_elem, b.elem_count as u64);
            let equal = match &cmp {
                Some(func) => func(&left, &right)?,
                None => bit_eq(
                    left.buffer(),
                    left.bit_offset(),
                    right.buffer(),
                    right.bit_offset(),
                    a.elem_count as u64 * bits,
                ),
            };
            if !equal {
                debug!(
                    row,
                    orig = %left.to_vec().as_bstr(),
                    test = %right.to_vec().as_bstr(),
                    "compare mismatch"
                );
                return Err(mismatch(call, "row contents differ", row));
            }
            let rows = a.repeat.min(b.repeat).min(span_rows(row, orig.stop_id())).max(1);
            match advance(row, rows) {
                Some(next) if next <= orig.stop_id() => row = next,
                _ => break,
            }
        }
        Ok(orig)
    }

    /// First input with a non-empty blob; `NotFound` inputs are skipped.
    pub(super) fn read_select(
        &mut self,
        call: &FnCall,
        row_id: i64,
        count: u64,
        env: &mut ReadEnv<'_>,
    ) -> Result<Blob, Error> {
        let mut last = Err(Error::new(ErrorKind::NotFound)
            .with_message(format!("select `{}` has no inputs", call.name))
            .with_row_id(row_id));
        for param in &call.params {
            match self.read_blob_in(param.prod, row_id, count, None, env) {
                Ok(blob) if blob.elem_count() > 0 => return Ok(blob),
                Ok(blob) => last = Ok(blob),
                Err(err) if err.kind() == ErrorKind::NotFound => last = Err(err),
                Err(err) => return Err(err),
            }
        }
        last
    }
}
