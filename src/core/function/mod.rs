//! Purpose: Materialize function productions by calling their transform in its invocation shape.
//! Exports: `ProductionGraph::read_function` (crate-internal).
//! Role: Fetches every input once, then loops shape calls until the requested rows are covered.
//! Invariants: Consecutive shape results are contiguous; a result that does not cover the row
//! being fetched is `Corrupt`.
//! Invariants: `no_cache` from any input or any call taints the whole result.

mod check;
mod page;
mod row;
mod stage;

use crate::core::blob::{span_rows, Blob};
use crate::core::error::{corrupt, Error, ErrorKind};
use crate::core::production::{Param, ProdId, ProductionGraph, ProductionKind, ReadEnv};
use crate::core::stop;
use crate::core::types::{Chain, TypeDesc};
use crate::core::xform::{RowArg, Xform, XformInfo};

/// Snapshot of a function production taken before recursing into its inputs.
pub(crate) struct FnCall {
    id: ProdId,
    name: String,
    desc: TypeDesc,
    chain: Chain,
    xform: Xform,
    params: Vec<Param>,
}

impl FnCall {
    fn load(graph: &ProductionGraph, id: ProdId) -> Result<Self, Error> {
        let prod = graph.get(id)?;
        let ProductionKind::Function(function) = &prod.kind else {
            return Err(corrupt(format!("production {id} is not a function")));
        };
        Ok(Self {
            id,
            name: prod.meta.name.clone(),
            desc: prod.meta.desc,
            chain: prod.meta.chain,
            xform: function.xform.clone(),
            params: function.params.clone(),
        })
    }

    fn info(&self) -> XformInfo<'_> {
        XformInfo {
            name: &self.name,
            desc: self.desc,
            chain: self.chain,
        }
    }

    fn elem_bits(&self) -> Result<u32, Error> {
        match self.desc.size_bits() {
            0 => Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("function `{}` has a zero-width output type", self.name))),
            bits => Ok(bits),
        }
    }
}

/// Last row of a `count`-row request starting at `row_id`.
pub(crate) fn last_row(row_id: i64, count: u64) -> i64 {
    row_id.saturating_add(i64::try_from(count.max(1) - 1).unwrap_or(i64::MAX))
}

/// `row + rows`, or `None` past the end of the id space.
pub(crate) fn advance(row: i64, rows: u64) -> Option<i64> {
    row.checked_add(i64::try_from(rows).ok()?)
}

/// Row range every input covers, `None` when there are no inputs.
fn intersect(inputs: &[&Blob]) -> Option<(i64, i64)> {
    inputs.iter().fold(None, |acc, blob| {
        Some(match acc {
            Some((start, stop)) => (blob.start_id().max(start), blob.stop_id().min(stop)),
            None => (blob.start_id(), blob.stop_id()),
        })
    })
}

/// Per-input views of row `row_id`, plus how many following rows share all of them.
fn row_args<'a>(inputs: &[&'a Blob], row_id: i64) -> Result<(Vec<RowArg<'a>>, u64), Error> {
    let mut args = Vec::with_capacity(inputs.len());
    let mut repeat = u64::MAX;
    for blob in inputs {
        let span = blob.row(row_id)?;
        repeat = repeat.min(span.repeat);
        args.push(RowArg::new(
            blob.data().as_bytes(),
            blob.elem_bits(),
            span.first_elem,
            span.elem_count as u64,
        ));
    }
    Ok((args, repeat))
}

fn with_row(err: Error, row_id: i64) -> Error {
    if err.row_id().is_some() {
        err
    } else {
        err.with_row_id(row_id)
    }
}

impl ProductionGraph {
    pub(crate) fn read_function(
        &mut self,
        id: ProdId,
        row_id: i64,
        count: u64,
        env: &mut ReadEnv<'_>,
    ) -> Result<Blob, Error> {
        let call = FnCall::load(self, id)?;
        match &call.xform {
            Xform::Compare(cmp) => return self.read_compare(&call, cmp.clone(), row_id, count, env),
            Xform::Select => return self.read_select(&call, row_id, count, env),
            _ => {}
        }

        let last = last_row(row_id, count);
        let mut no_cache = false;
        let mut inputs = Vec::with_capacity(call.params.len());
        for param in &call.params {
            let blob = self.read_blob_in(param.prod, row_id, count, None, env)?;
            no_cache |= blob.no_cache();
            inputs.push(blob);
        }

        let mut result: Option<Blob> = None;
        let mut id_run = row_id;
        loop {
            stop::check(id_run)?;
            let remaining = span_rows(id_run, last);
            for (input, param) in inputs.iter_mut().zip(&call.params) {
                if !input.covers(id_run) {
                    *input = self.read_blob_in(param.prod, id_run, remaining, None, env)?;
                    no_cache |= input.no_cache();
                }
            }
            let min_start = if id_run == row_id { i64::MIN } else { id_run };
            let piece = self
                .call_shape(&call, id_run, remaining, min_start, &inputs)
                .map_err(|err| with_row(err, id_run))?;
            if !piece.covers(id_run) {
                return Err(corrupt(format!(
                    "{} function `{}` returned rows [{}, {}]",
                    call.xform.shape_name(),
                    call.name,
                    piece.start_id(),
                    piece.stop_id()
                ))
                .with_row_id(id_run));
            }
            no_cache |= piece.no_cache();
            let stop = piece.stop_id();
            result = Some(match result {
                Some(prev) if piece.start_id() > row_id => prev.append(&piece)?,
                _ => piece,
            });
            if stop >= last {
                break;
            }
            id_run = stop + 1;
        }
        let blob = result.ok_or_else(|| corrupt("function produced no blob").with_row_id(row_id))?;
        Ok(blob.with_no_cache(no_cache))
    }

    fn call_shape(
        &mut self,
        call: &FnCall,
        id_run: i64,
        count: u64,
        min_start: i64,
        inputs: &[Blob],
    ) -> Result<Blob, Error> {
        match &call.xform {
            Xform::Row(func) => {
                self.read_rows(call, func, row::RowMode::Batched, id_run, count, min_start, inputs)
            }
            Xform::IdDepRow(func) => {
                self.read_rows(call, func, row::RowMode::PerRow, id_run, count, min_start, inputs)
            }
            Xform::NonDetRow(func) => {
                self.read_rows(call, func, row::RowMode::Single, id_run, count, min_start, inputs)
            }
            Xform::Page(func) => page::fixed_rows(call, func, min_start, inputs),
            Xform::Array(func) => page::array(call, func, inputs),
            Xform::Blob(func) => match call.chain {
                Chain::Encoding => stage::encode(call, func, inputs),
                Chain::Decoding | Chain::Uncommitted => stage::decode(call, func, inputs),
            },
            Xform::LegacyBlob(func) => stage::legacy(call, func, inputs),
            Xform::BlobN(func) => stage::blob_n(call, func, id_run, inputs),
            Xform::Byteswap => stage::byteswap(call, inputs),
            Xform::Compare(_) | Xform::Select => Err(corrupt(format!(
                "{} function `{}` cannot run as a shape",
                call.xform.shape_name(),
                call.name
            ))),
        }
    }
}
