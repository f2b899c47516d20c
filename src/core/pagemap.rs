//! Purpose: Run-length row layout of a blob buffer: row offset -> (first element, length).
//! Exports: `PageMap`, `PageMapBuilder`, `PageMapIter`, `Run`, `RowSpan`.
//! Role: Shared (via `Arc`) by every blob whose rows have the same shape.
//! Invariants: Immutable once built; `elem_count` equals the owning blob's element count.
//! Invariants: A run stores one copy of `row_len` elements shared by `repeat` rows.
//! Invariants: Iteration is amortized O(1) per step and never expands rows.

use crate::core::error::{corrupt, Error};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Run {
    pub row_len: u32,
    pub repeat: u64,
}

impl Run {
    pub fn new(row_len: u32, repeat: u64) -> Self {
        Self { row_len, repeat }
    }
}

/// Location of one row inside a blob buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RowSpan {
    pub first_elem: u64,
    pub elem_count: u32,
    /// Rows from this one onward (inclusive) that share the same stored data.
    pub repeat: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Layout {
    /// Every row stores its own `row_len` elements.
    Fixed { row_len: u32 },
    /// All rows share one stored row.
    Single { row_len: u32 },
    Runs(RunIndex),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct RunIndex {
    runs: Vec<Run>,
    // Exclusive cumulative row end of each run.
    row_ends: Vec<u64>,
    elem_starts: Vec<u64>,
}

impl RunIndex {
    fn new(runs: Vec<Run>) -> Self {
        let mut row_ends = Vec::with_capacity(runs.len());
        let mut elem_starts = Vec::with_capacity(runs.len());
        let (mut rows, mut elems) = (0u64, 0u64);
        for run in &runs {
            elem_starts.push(elems);
            rows = rows.saturating_add(run.repeat);
            elems += run.row_len as u64;
            row_ends.push(rows);
        }
        Self {
            runs,
            row_ends,
            elem_starts,
        }
    }

    pub(crate) fn runs(&self) -> &[Run] {
        &self.runs
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageMap {
    layout: Layout,
    row_count: u64,
}

impl PageMap {
    /// One stored row repeated `row_count` times.
    pub fn new_single(row_count: u64, row_len: u32) -> Self {
        Self {
            layout: Layout::Single { row_len },
            row_count,
        }
    }

    /// `row_count` distinct rows of `row_len` elements each.
    pub fn new_fixed(row_count: u64, row_len: u32) -> Self {
        Self {
            layout: Layout::Fixed { row_len },
            row_count,
        }
    }

    pub fn from_runs(runs: Vec<Run>) -> Result<Self, Error> {
        if runs.iter().any(|run| run.repeat == 0) {
            return Err(corrupt("page map run with zero rows"));
        }
        let index = RunIndex::new(runs);
        let row_count = index.row_ends.last().copied().unwrap_or(0);
        Ok(Self {
            layout: Layout::Runs(index),
            row_count,
        })
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn elem_count(&self) -> u64 {
        match &self.layout {
            Layout::Fixed { row_len } => *row_len as u64 * self.row_count,
            Layout::Single { row_len } => {
                if self.row_count == 0 {
                    0
                } else {
                    *row_len as u64
                }
            }
            Layout::Runs(index) => index.runs.iter().map(|run| run.row_len as u64).sum(),
        }
    }

    /// Number of distinct stored rows.
    pub fn data_records(&self) -> u64 {
        match &self.layout {
            Layout::Fixed { .. } => self.row_count,
            Layout::Single { .. } => self.row_count.min(1),
            Layout::Runs(index) => index.runs.len() as u64,
        }
    }

    pub fn is_single_row(&self) -> bool {
        self.data_records() == 1
    }

    /// Row length when every row has the same length.
    pub fn fixed_row_len(&self) -> Option<u32> {
        match &self.layout {
            Layout::Fixed { row_len } | Layout::Single { row_len } => Some(*row_len),
            Layout::Runs(index) => {
                let first = index.runs.first()?.row_len;
                index
                    .runs
                    .iter()
                    .all(|run| run.row_len == first)
                    .then_some(first)
            }
        }
    }

    pub fn row_len(&self, row: u64) -> Option<u32> {
        self.locate(row).map(|span| span.elem_count)
    }

    pub fn locate(&self, row: u64) -> Option<RowSpan> {
        self.iter_from(row).span()
    }

    pub fn iter(&self) -> PageMapIter<'_> {
        self.iter_from(0)
    }

    pub fn iter_from(&self, row: u64) -> PageMapIter<'_> {
        let (run, in_run) = match &self.layout {
            Layout::Runs(index) => {
                let run = index.row_ends.partition_point(|end| *end <= row);
                let base = if run == 0 { 0 } else { index.row_ends[run - 1] };
                (run, row.saturating_sub(base))
            }
            _ => (0, 0),
        };
        PageMapIter {
            map: self,
            row,
            run,
            in_run,
        }
    }

    /// Run view of the layout; expands the fixed layout to one run per row.
    pub fn runs(&self) -> Vec<Run> {
        match &self.layout {
            Layout::Fixed { row_len } => (0..self.row_count).map(|_| Run::new(*row_len, 1)).collect(),
            Layout::Single { row_len } => {
                if self.row_count == 0 {
                    Vec::new()
                } else {
                    vec![Run::new(*row_len, self.row_count)]
                }
            }
            Layout::Runs(index) => index.runs.clone(),
        }
    }

    /// Layout of `self` followed by `other`, as for blobs over adjacent row ranges.
    pub fn append(&self, other: &PageMap) -> Result<PageMap, Error> {
        if let (Layout::Fixed { row_len: a }, Layout::Fixed { row_len: b }) =
            (&self.layout, &other.layout)
        {
            if a == b {
                return Ok(PageMap::new_fixed(self.row_count + other.row_count, *a));
            }
        }
        let mut runs = self.runs();
        runs.extend(other.runs());
        PageMap::from_runs(runs).map(|map| map.normalized())
    }

    /// Collapse run lists to the fixed or single layouts when the shape allows it.
    pub fn normalized(self) -> PageMap {
        let collapsed = match &self.layout {
            Layout::Runs(index) => match index.runs.as_slice() {
                [only] => Some(PageMap::new_single(only.repeat, only.row_len)),
                [first, ..]
                    if index
                        .runs
                        .iter()
                        .all(|run| run.repeat == 1 && run.row_len == first.row_len) =>
                {
                    Some(PageMap::new_fixed(self.row_count, first.row_len))
                }
                _ => None,
            },
            _ => None,
        };
        collapsed.unwrap_or(self)
    }
}

/// Cursor over a page map; `advance` moves by whole rows.
#[derive(Clone, Debug)]
pub struct PageMapIter<'a> {
    map: &'a PageMap,
    row: u64,
    run: usize,
    in_run: u64,
}

impl PageMapIter<'_> {
    pub fn row(&self) -> u64 {
        self.row
    }

    pub fn span(&self) -> Option<RowSpan> {
        if self.row >= self.map.row_count {
            return None;
        }
        match &self.map.layout {
            Layout::Fixed { row_len } => Some(RowSpan {
                first_elem: self.row * *row_len as u64,
                elem_count: *row_len,
                repeat: 1,
            }),
            Layout::Single { row_len } => Some(RowSpan {
                first_elem: 0,
                elem_count: *row_len,
                repeat: self.map.row_count - self.row,
            }),
            Layout::Runs(index) => {
                let run = index.runs.get(self.run)?;
                Some(RowSpan {
                    first_elem: index.elem_starts[self.run],
                    elem_count: run.row_len,
                    repeat: run.repeat - self.in_run,
                })
            }
        }
    }

    pub fn advance(&mut self, rows: u64) {
        self.row = self.row.saturating_add(rows);
        if let Layout::Runs(index) = &self.map.layout {
            self.in_run += rows;
            while let Some(run) = index.runs.get(self.run) {
                if self.in_run < run.repeat {
                    break;
                }
                self.in_run -= run.repeat;
                self.run += 1;
            }
        }
    }
}

/// Accumulates rows while a blob is materialized.
#[derive(Debug, Default)]
pub struct PageMapBuilder {
    runs: Vec<Run>,
}

impl PageMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> u64 {
        self.runs.iter().map(|run| run.repeat).sum()
    }

    /// Append `rows` rows of `row_len` elements. With `same_data` the rows reuse the
    /// previous run's stored data instead of adding new elements.
    pub fn append_rows(&mut self, row_len: u32, rows: u64, same_data: bool) -> Result<(), Error> {
        if rows == 0 {
            return Ok(());
        }
        if same_data {
            match self.runs.last_mut() {
                Some(last) if last.row_len == row_len => {
                    last.repeat += rows;
                    return Ok(());
                }
                _ => return Err(corrupt("repeated row has no matching predecessor")),
            }
        }
        self.runs.push(Run::new(row_len, rows));
        Ok(())
    }

    pub fn finish(self) -> Result<PageMap, Error> {
        PageMap::from_runs(self.runs).map(PageMap::normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::{PageMap, PageMapBuilder, Run, RowSpan};
    use crate::core::error::ErrorKind;

    fn sample() -> PageMap {
        PageMap::from_runs(vec![Run::new(3, 2), Run::new(1, 1), Run::new(4, 3)]).expect("runs")
    }

    #[test]
    fn locate_walks_runs() {
        let map = sample();
        assert_eq!(map.row_count(), 6);
        assert_eq!(map.elem_count(), 8);
        assert_eq!(
            map.locate(1),
            Some(RowSpan {
                first_elem: 0,
                elem_count: 3,
                repeat: 1
            })
        );
        assert_eq!(map.locate(2).map(|s| (s.first_elem, s.elem_count)), Some((3, 1)));
        assert_eq!(
            map.locate(3),
            Some(RowSpan {
                first_elem: 4,
                elem_count: 4,
                repeat: 3
            })
        );
        assert_eq!(map.locate(6), None);
    }

    #[test]
    fn iterator_agrees_with_locate() {
        let map = sample();
        let mut iter = map.iter();
        for row in 0..map.row_count() {
            assert_eq!(iter.span(), map.locate(row), "row {row}");
            iter.advance(1);
        }
        assert!(iter.span().is_none());

        let mut iter = map.iter_from(1);
        iter.advance(3);
        assert_eq!(iter.span().map(|s| s.repeat), Some(2));
    }

    #[test]
    fn builder_folds_repeated_rows() {
        let mut builder = PageMapBuilder::new();
        builder.append_rows(2, 1, false).expect("first");
        builder.append_rows(2, 4, true).expect("repeat");
        builder.append_rows(5, 1, false).expect("third");
        assert_eq!(builder.row_count(), 6);
        let map = builder.finish().expect("finish");
        assert_eq!(map.runs(), vec![Run::new(2, 5), Run::new(5, 1)]);
        assert_eq!(map.elem_count(), 7);
    }

    #[test]
    fn builder_rejects_orphan_repeat() {
        let mut builder = PageMapBuilder::new();
        let err = builder.append_rows(2, 1, true).expect_err("orphan");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn uniform_runs_collapse_to_fixed() {
        let mut builder = PageMapBuilder::new();
        for _ in 0..4 {
            builder.append_rows(3, 1, false).expect("row");
        }
        let map = builder.finish().expect("finish");
        assert_eq!(map, PageMap::new_fixed(4, 3));
        assert_eq!(map.fixed_row_len(), Some(3));
        assert_eq!(map.locate(3).map(|s| s.first_elem), Some(9));
    }

    #[test]
    fn append_keeps_fixed_layout() {
        let joined = PageMap::new_fixed(2, 4)
            .append(&PageMap::new_fixed(3, 4))
            .expect("append");
        assert_eq!(joined, PageMap::new_fixed(5, 4));

        let mixed = PageMap::new_single(3, 2)
            .append(&PageMap::new_fixed(1, 5))
            .expect("append");
        assert_eq!(mixed.runs(), vec![Run::new(2, 3), Run::new(5, 1)]);
        assert_eq!(mixed.locate(3).map(|s| s.first_elem), Some(2));
    }

    #[test]
    fn single_layout_reports_remaining_repeat() {
        let map = PageMap::new_single(10, 7);
        assert!(map.is_single_row());
        assert_eq!(map.elem_count(), 7);
        let span = map.locate(4).expect("row");
        assert_eq!((span.first_elem, span.repeat), (0, 6));
    }
}
