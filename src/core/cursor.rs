//! Purpose: Row-oriented read session over a set of resolved columns.
//! Exports: `Cursor`, `CursorState`, `ColumnAdded`, `BitsRead`.
//! Role: Owns the production graph, the cursor-level blob cache and the page-map worker; every
//! read runs synchronously on the caller's thread.
//! Invariants: `close_row` advances `row_id` by exactly one whatever the reads inside returned.
//! Invariants: Column indices are stable; excised columns leave an empty slot behind.
//! Invariants: Only resolution failures move the cursor to `Failed`; read errors go back to the
//! caller untouched.

use crate::core::blob::Blob;
use crate::core::cache::CursorCache;
use crate::core::column::{CellData, Column};
use crate::core::error::{Error, ErrorKind};
use crate::core::options::CursorOptions;
use crate::core::production::{ProdId, ProductionGraph, ReadEnv};
use crate::core::schema::SchemaResolver;
use crate::core::types::{ColumnSpec, CtxId};
use crate::core::worker::{WorkerSlot, WorkerState};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CursorState {
    Construct,
    Ready,
    RowOpen,
    Failed,
}

/// Outcome of `add_column`: a new slot, or the slot the same resolved column already holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnAdded {
    New(u32),
    Existing(u32),
}

impl ColumnAdded {
    pub fn index(self) -> u32 {
        match self {
            ColumnAdded::New(idx) | ColumnAdded::Existing(idx) => idx,
        }
    }

    pub fn already_exists(self) -> bool {
        matches!(self, ColumnAdded::Existing(_))
    }

    /// Strict form: a repeated column becomes an `AlreadyExists` error.
    pub fn into_result(self) -> Result<u32, Error> {
        match self {
            ColumnAdded::New(idx) => Ok(idx),
            ColumnAdded::Existing(idx) => Err(Error::new(ErrorKind::AlreadyExists)
                .with_message(format!("column already added at index {idx}"))),
        }
    }
}

/// Result of a bit-level read: elements copied and elements left in the cell.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BitsRead {
    pub num_read: u64,
    pub remaining: u64,
}

pub struct Cursor {
    schema: Arc<dyn SchemaResolver>,
    state: CursorState,
    row_id: i64,
    graph: ProductionGraph,
    columns: Vec<Option<Column>>,
    by_cid: HashMap<CtxId, u32>,
    params: HashMap<String, Vec<u8>>,
    linked: HashMap<String, Arc<Mutex<Cursor>>>,
    permit_post_open_add: bool,
    suspend_triggers: bool,
    cache: Option<CursorCache>,
    workers: WorkerSlot,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state)
            .field("row_id", &self.row_id)
            .field("columns", &self.columns.len())
            .field("productions", &self.graph.len())
            .field("worker", &self.workers.state())
            .finish()
    }
}

impl Cursor {
    pub fn new(schema: Arc<dyn SchemaResolver>) -> Self {
        Self::with_options(schema, CursorOptions::default())
    }

    pub fn with_options(schema: Arc<dyn SchemaResolver>, options: CursorOptions) -> Self {
        let cache = (options.cursor_cache_bytes > 0)
            .then(|| CursorCache::new(options.cursor_cache_bytes));
        let workers = WorkerSlot::new(cache.is_some(), options.worker_launch_after);
        Self {
            schema,
            state: CursorState::Construct,
            row_id: 0,
            graph: ProductionGraph::new(&options),
            columns: Vec::new(),
            by_cid: HashMap::new(),
            params: HashMap::new(),
            linked: HashMap::new(),
            permit_post_open_add: false,
            suspend_triggers: false,
            cache,
            workers,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn row_id(&self) -> i64 {
        self.row_id
    }

    /// Production graph built while resolving columns.
    pub fn graph(&self) -> &ProductionGraph {
        &self.graph
    }

    pub fn column(&self, idx: u32) -> Result<&Column, Error> {
        self.columns
            .get(idx as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound).with_message(format!("no column at index {idx}"))
            })
    }

    /// Allow `add_column` after `open`; failing columns are then excised instead of fatal.
    pub fn permit_post_open_add(&mut self) -> Result<(), Error> {
        if self.state != CursorState::Construct {
            return Err(invalid_state("post-open add must be permitted before open"));
        }
        self.permit_post_open_add = true;
        Ok(())
    }

    pub fn suspend_triggers(&mut self) {
        self.suspend_triggers = true;
    }

    pub fn triggers_suspended(&self) -> bool {
        self.suspend_triggers
    }

    pub fn add_column(&mut self, spec: &ColumnSpec) -> Result<ColumnAdded, Error> {
        check_name(spec.column_name())?;
        match self.state {
            CursorState::Failed => return Err(invalid_state("cursor failed")),
            CursorState::Construct => {}
            _ if self.permit_post_open_add => {}
            _ => return Err(invalid_state("cursor is open")),
        }
        let decl = self.schema.find_column(spec)?;
        if let Some(&idx) = self.by_cid.get(&decl.cid) {
            return Ok(ColumnAdded::Existing(idx));
        }
        let idx = u32::try_from(self.columns.len()).map_err(|_| {
            Error::new(ErrorKind::MemoryExhausted).with_message("too many columns")
        })?;
        self.by_cid.insert(decl.cid, idx);
        self.columns.push(Some(Column::new(spec.clone(), decl)));
        if self.state != CursorState::Construct {
            if let Err(err) = self.resolve_column(idx) {
                self.excise(idx, &err);
                return Err(err);
            }
        }
        Ok(ColumnAdded::New(idx))
    }

    /// Index of an added column: an exact resolved match, else the single added overload.
    pub fn get_column_idx(&self, spec: &ColumnSpec) -> Result<u32, Error> {
        check_name(spec.column_name())?;
        if self.state == CursorState::Failed {
            return Err(invalid_state("cursor failed"));
        }
        let decl = self.schema.find_column(spec)?;
        if let Some(&idx) = self.by_cid.get(&decl.cid) {
            return Ok(idx);
        }
        let mut found = self
            .schema
            .overloads(spec.column_name())
            .into_iter()
            .filter_map(|cid| self.by_cid.get(&cid).copied());
        match (found.next(), found.next()) {
            (Some(idx), None) => Ok(idx),
            (Some(_), Some(_)) => Err(Error::new(ErrorKind::Ambiguous)
                .with_message("name matches several added columns")
                .with_column(spec.column_name())),
            (None, _) => Err(Error::new(ErrorKind::NotFound)
                .with_message("column was not added")
                .with_column(spec.column_name())),
        }
    }

    /// Resolve every column; the first row becomes 1.
    pub fn open(&mut self) -> Result<(), Error> {
        match self.state {
            CursorState::Ready | CursorState::RowOpen => return Ok(()),
            CursorState::Failed => return Err(invalid_state("cursor failed")),
            CursorState::Construct => {}
        }
        for idx in 0..self.columns.len() as u32 {
            if self.columns[idx as usize].is_none() {
                continue;
            }
            if let Err(err) = self.resolve_column(idx) {
                if !self.permit_post_open_add {
                    warn!(column = idx, error = %err, "column failed to resolve, cursor failed");
                    self.state = CursorState::Failed;
                    return Err(err);
                }
                self.excise(idx, &err);
            }
        }
        self.row_id = 1;
        self.state = CursorState::Ready;
        debug!(columns = self.columns.len(), productions = self.graph.len(), "cursor open");
        Ok(())
    }

    pub fn set_row_id(&mut self, row_id: i64) -> Result<(), Error> {
        match self.state {
            CursorState::Construct | CursorState::Ready => {
                self.row_id = row_id;
                Ok(())
            }
            CursorState::RowOpen => Err(invalid_state("row is open")),
            CursorState::Failed => Err(invalid_state("cursor failed")),
        }
    }

    pub fn open_row(&mut self) -> Result<(), Error> {
        match self.state {
            CursorState::Ready => {
                self.state = CursorState::RowOpen;
                Ok(())
            }
            CursorState::RowOpen => Err(invalid_state("row already open")),
            CursorState::Construct => Err(invalid_state("cursor not open")),
            CursorState::Failed => Err(invalid_state("cursor failed")),
        }
    }

    /// Leave the open row and step to the next one; a no-op when no row is open.
    pub fn close_row(&mut self) -> Result<(), Error> {
        match self.state {
            CursorState::RowOpen => {
                self.row_id += 1;
                self.state = CursorState::Ready;
                Ok(())
            }
            CursorState::Ready => Ok(()),
            CursorState::Construct => Err(invalid_state("cursor not open")),
            CursorState::Failed => Err(invalid_state("cursor failed")),
        }
    }

    /// Copy the current row of column `idx` into `dst`; returns the element count.
    pub fn read(&mut self, idx: u32, elem_bits: u32, dst: &mut [u8]) -> Result<u64, Error> {
        let row_id = self.current_row()?;
        self.copy_cell(row_id, idx, elem_bits, dst)
    }

    pub fn read_direct(
        &mut self,
        row_id: i64,
        idx: u32,
        elem_bits: u32,
        dst: &mut [u8],
    ) -> Result<u64, Error> {
        self.check_open()?;
        self.copy_cell(row_id, idx, elem_bits, dst)
    }

    /// Copy elements `start..` of the current row to bit `dst_bit` of `dst`, as many as fit.
    pub fn read_bits(
        &mut self,
        idx: u32,
        elem_bits: u32,
        start: u64,
        dst: &mut [u8],
        dst_bit: u64,
    ) -> Result<BitsRead, Error> {
        let row_id = self.current_row()?;
        self.read_bits_at(row_id, idx, elem_bits, start, dst, dst_bit)
    }

    pub fn read_bits_direct(
        &mut self,
        row_id: i64,
        idx: u32,
        elem_bits: u32,
        start: u64,
        dst: &mut [u8],
        dst_bit: u64,
    ) -> Result<BitsRead, Error> {
        self.check_open()?;
        self.read_bits_at(row_id, idx, elem_bits, start, dst, dst_bit)
    }

    /// View of the current cell at the column's own element width.
    pub fn cell_data(&mut self, idx: u32) -> Result<CellData, Error> {
        let row_id = self.current_row()?;
        let bits = self.column(idx)?.elem_bits();
        self.cell_at(row_id, idx, bits)
    }

    pub fn cell_data_direct(&mut self, row_id: i64, idx: u32) -> Result<CellData, Error> {
        self.check_open()?;
        let bits = self.column(idx)?.elem_bits();
        self.cell_at(row_id, idx, bits)
    }

    /// Blob holding the current row of column `idx`.
    pub fn get_blob(&mut self, idx: u32) -> Result<Blob, Error> {
        let row_id = self.current_row()?;
        self.fetch(row_id, idx)
    }

    pub fn get_blob_direct(&mut self, row_id: i64, idx: u32) -> Result<Blob, Error> {
        self.check_open()?;
        self.fetch(row_id, idx)
    }

    /// Rows every resolved column can answer, as an inclusive `(first, last)` pair.
    pub fn id_range(&self) -> Result<(i64, i64), Error> {
        self.check_open()?;
        let mut range: Option<(i64, i64)> = None;
        let mut seen = false;
        for column in self.columns.iter().flatten() {
            let Some(root) = column.root() else { continue };
            let Some((first, last)) = self.graph.column_id_range(root)? else {
                continue;
            };
            range = match (seen, range) {
                (false, _) => Some((first, last)),
                (true, Some((a, b))) => Some((a.max(first), b.min(last))).filter(|(a, b)| a <= b),
                (true, None) => None,
            };
            seen = true;
        }
        range.ok_or_else(|| Error::new(ErrorKind::NotFound).with_message("id range is empty"))
    }

    pub fn column_id_range(&self, idx: u32) -> Result<(i64, i64), Error> {
        self.check_open()?;
        let column = self.column(idx)?;
        let root = resolved_root(column)?;
        self.graph.column_id_range(root)?.ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("id range is empty")
                .with_column(column.name())
        })
    }

    /// Names of columns whose productions resolved.
    pub fn list_readable_columns(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .columns
            .iter()
            .flatten()
            .filter(|column| column.root().is_some())
            .map(|column| column.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn set_param(&mut self, name: &str, value: impl Into<Vec<u8>>) -> Result<(), Error> {
        check_name(name)?;
        self.params.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn param(&self, name: &str) -> Result<&[u8], Error> {
        check_name(name)?;
        self.params.get(name).map(Vec::as_slice).ok_or_else(|| {
            Error::new(ErrorKind::NotFound).with_message(format!("no parameter `{name}`"))
        })
    }

    pub fn set_linked_cursor(&mut self, table: &str, cursor: Arc<Mutex<Cursor>>) -> Result<(), Error> {
        check_name(table)?;
        if self.linked.contains_key(table) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message(format!("cursor for table `{table}` already linked")));
        }
        self.linked.insert(table.to_string(), cursor);
        Ok(())
    }

    pub fn linked_cursor(&self, table: &str) -> Result<Arc<Mutex<Cursor>>, Error> {
        check_name(table)?;
        self.linked.get(table).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound).with_message(format!("no cursor linked for `{table}`"))
        })
    }

    /// State of the page-map worker, `None` until it has been launched.
    pub fn worker_state(&self) -> Option<WorkerState> {
        self.workers.state()
    }

    /// `(used, capacity)` bytes of the cursor-level cache, when configured.
    pub fn cursor_cache_usage(&self) -> Option<(usize, usize)> {
        self.cache
            .as_ref()
            .map(|cache| (cache.used_bytes(), cache.capacity_bytes()))
    }

    fn check_open(&self) -> Result<(), Error> {
        match self.state {
            CursorState::Ready | CursorState::RowOpen => Ok(()),
            CursorState::Construct => Err(invalid_state("cursor not open")),
            CursorState::Failed => Err(invalid_state("cursor failed")),
        }
    }

    fn current_row(&self) -> Result<i64, Error> {
        match self.state {
            CursorState::RowOpen => Ok(self.row_id),
            CursorState::Ready => Err(invalid_state("row not open")),
            CursorState::Construct => Err(invalid_state("cursor not open")),
            CursorState::Failed => Err(invalid_state("cursor failed")),
        }
    }

    fn resolve_column(&mut self, idx: u32) -> Result<(), Error> {
        let schema = Arc::clone(&self.schema);
        let decl = self.column(idx)?.decl().clone();
        let root = schema
            .resolve_production(&decl, &mut self.graph)
            .map_err(|err| attach_column(err, &decl.name))?;
        self.graph.bind_column_root(idx, root);
        if let Some(column) = self.columns[idx as usize].as_mut() {
            column.set_root(root);
        }
        Ok(())
    }

    fn excise(&mut self, idx: u32, err: &Error) {
        if let Some(column) = self.columns[idx as usize].take() {
            warn!(column = column.name(), error = %err, "column failed to resolve, removed");
            self.by_cid.remove(&column.decl().cid);
        }
        self.graph.unbind_column_root(idx);
    }

    fn fetch(&mut self, row_id: i64, idx: u32) -> Result<Blob, Error> {
        let column = self.column(idx)?;
        let root = resolved_root(column)?;
        let name = column.name().to_string();
        let mut env = ReadEnv::new(self.cache.as_mut(), Some(&mut self.workers));
        self.graph
            .read_column(root, row_id, idx, &mut env)
            .map_err(|err| attach_column(err, &name))
    }

    fn cell_at(&mut self, row_id: i64, idx: u32, elem_bits: u32) -> Result<CellData, Error> {
        let column = self.column(idx)?;
        column.check_elem_bits(elem_bits)?;
        let name = column.name().to_string();
        let blob = self.fetch(row_id, idx)?;
        CellData::new(blob, row_id, elem_bits).map_err(|err| attach_column(err, &name))
    }

    fn copy_cell(
        &mut self,
        row_id: i64,
        idx: u32,
        elem_bits: u32,
        dst: &mut [u8],
    ) -> Result<u64, Error> {
        check_byte_bits(elem_bits)?;
        let cell = self.cell_at(row_id, idx, elem_bits)?;
        cell.copy_to(dst)
            .map_err(|err| attach_column(err, self.column(idx).map_or("", Column::name)))
    }

    fn read_bits_at(
        &mut self,
        row_id: i64,
        idx: u32,
        elem_bits: u32,
        start: u64,
        dst: &mut [u8],
        dst_bit: u64,
    ) -> Result<BitsRead, Error> {
        let cell = self.cell_at(row_id, idx, elem_bits)?;
        let available = cell.elem_count().saturating_sub(start);
        let room = (dst.len() as u64 * 8).saturating_sub(dst_bit) / elem_bits as u64;
        let num_read = available.min(room);
        if num_read > 0 {
            cell.copy_bits(dst, dst_bit, start, num_read);
        }
        Ok(BitsRead {
            num_read,
            remaining: available - num_read,
        })
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.workers.shutdown();
    }
}

fn invalid_state(message: &str) -> Error {
    Error::new(ErrorKind::InvalidState).with_message(message)
}

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::NullArgument).with_message("name is empty"));
    }
    Ok(())
}

fn check_byte_bits(elem_bits: u32) -> Result<(), Error> {
    if elem_bits == 0 || elem_bits % 8 != 0 {
        return Err(Error::new(ErrorKind::InvalidArgument)
            .with_message(format!("byte reads need a multiple of 8 bits, got {elem_bits}")));
    }
    Ok(())
}

fn resolved_root(column: &Column) -> Result<ProdId, Error> {
    column.root().ok_or_else(|| {
        Error::new(ErrorKind::InvalidState)
            .with_message("column is not resolved")
            .with_column(column.name())
    })
}

fn attach_column(err: Error, name: &str) -> Error {
    if err.column().is_some() || name.is_empty() {
        err
    } else {
        err.with_column(name)
    }
}
