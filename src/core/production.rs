//! Purpose: Production graph arena and the unified blob read path.
//! Exports: `ProductionGraph`, `Production`, `ProductionKind`, `FunctionProd`, `SimpleKind`,
//! `ProdId`, `ProdMeta`, `Param`.
//! Role: Every column read ends up in `ProductionGraph::read_blob_in`, which probes caches,
//! dispatches on the production kind, and publishes the result.
//! Invariants: Inputs always have smaller ids than the productions that consume them.
//! Invariants: A returned blob covers the requested row; anything else is `Corrupt`.
//! Invariants: `no_cache` blobs may enter the MRU list but never satisfy a lookup.

use crate::core::bits::DataBuffer;
use crate::core::blob::Blob;
use crate::core::cache::{CursorCache, ProductionCache};
use crate::core::codec;
use crate::core::error::{corrupt, Error, ErrorKind};
use crate::core::options::CursorOptions;
use crate::core::pagemap::PageMap;
use crate::core::physical::PhysicalColumn;
use crate::core::types::{Chain, CtxId, TypeDesc};
use crate::core::worker::{decode_for_rows, WorkerSlot};
use crate::core::xform::Xform;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

const MAX_READ_DEPTH: u32 = 128;

/// Index of a production inside its graph.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProdId(u32);

impl ProdId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimpleKind {
    Cast,
    Page2Blob,
    Serial2Blob,
    Blob2Serial,
}

/// One function input; control inputs are fetched but not handed to per-row callables.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Param {
    pub prod: ProdId,
    pub control: bool,
}

impl Param {
    pub fn input(prod: ProdId) -> Self {
        Self {
            prod,
            control: false,
        }
    }

    pub fn control(prod: ProdId) -> Self {
        Self {
            prod,
            control: true,
        }
    }
}

#[derive(Debug)]
pub struct FunctionProd {
    pub xform: Xform,
    pub params: Vec<Param>,
    // Range of the previous row-function fetch, drives the regroup window.
    pub(crate) window: (i64, i64),
}

#[derive(Debug)]
pub enum ProductionKind {
    Simple { kind: SimpleKind, input: ProdId },
    Function(FunctionProd),
    /// Forwards to `root`; `members` are the sub-expression productions it owns.
    Script { root: ProdId, members: Vec<ProdId> },
    Physical(Arc<dyn PhysicalColumn>),
    /// Reads whatever production is bound to cursor column `column`.
    Column { column: u32 },
}

impl ProductionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProductionKind::Simple { .. } => "simple",
            ProductionKind::Function(_) => "function",
            ProductionKind::Script { .. } => "script",
            ProductionKind::Physical(_) => "physical",
            ProductionKind::Column { .. } => "column",
        }
    }
}

/// Identity shared by every production kind.
#[derive(Clone, Debug)]
pub struct ProdMeta {
    pub name: String,
    pub desc: TypeDesc,
    pub cid: CtxId,
    pub chain: Chain,
}

impl ProdMeta {
    pub fn new(name: impl Into<String>, desc: TypeDesc, cid: CtxId) -> Self {
        Self {
            name: name.into(),
            desc,
            cid,
            chain: Chain::default(),
        }
    }

    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }
}

#[derive(Debug)]
pub struct Production {
    pub(crate) meta: ProdMeta,
    pub(crate) kind: ProductionKind,
    cache: ProductionCache,
    // Cursor column this production feeds directly, set by the first column read.
    bound_column: Option<u32>,
}

impl Production {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn desc(&self) -> TypeDesc {
        self.meta.desc
    }

    pub fn cid(&self) -> CtxId {
        self.meta.cid
    }

    pub fn chain(&self) -> Chain {
        self.meta.chain
    }

    pub fn kind(&self) -> &ProductionKind {
        &self.kind
    }

    pub fn cached_blobs(&self) -> usize {
        self.cache.len()
    }
}

/// Cursor-owned state a read may consult: the column-level cache and the page-map worker.
#[derive(Debug, Default)]
pub(crate) struct ReadEnv<'a> {
    pub(crate) cursor_cache: Option<&'a mut CursorCache>,
    pub(crate) workers: Option<&'a mut WorkerSlot>,
    depth: u32,
}

impl<'a> ReadEnv<'a> {
    pub(crate) fn new(
        cursor_cache: Option<&'a mut CursorCache>,
        workers: Option<&'a mut WorkerSlot>,
    ) -> Self {
        Self {
            cursor_cache,
            workers,
            depth: 0,
        }
    }
}

enum Route {
    Simple(SimpleKind, ProdId),
    Function,
    Forward(ProdId),
    Physical(Arc<dyn PhysicalColumn>),
    Column(u32),
}

/// Arena of productions for one cursor.
#[derive(Debug)]
pub struct ProductionGraph {
    prods: Vec<Production>,
    by_cid: HashMap<CtxId, ProdId>,
    column_roots: HashMap<u32, ProdId>,
    cache_slots: usize,
    pub(crate) regroup_window_max: u64,
    cursor_cache_min_rows: u64,
}

impl Default for ProductionGraph {
    fn default() -> Self {
        Self::new(&CursorOptions::default())
    }
}

impl ProductionGraph {
    pub fn new(options: &CursorOptions) -> Self {
        Self {
            prods: Vec::new(),
            by_cid: HashMap::new(),
            column_roots: HashMap::new(),
            cache_slots: options.production_cache_slots,
            regroup_window_max: options.regroup_window_max.max(1),
            cursor_cache_min_rows: options.cursor_cache_min_rows,
        }
    }

    pub fn len(&self) -> usize {
        self.prods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prods.is_empty()
    }

    /// Production registered under `cid`, if any; resolvers use this to share sub-graphs.
    pub fn find(&self, cid: CtxId) -> Option<ProdId> {
        self.by_cid.get(&cid).copied()
    }

    pub fn production(&self, id: ProdId) -> Option<&Production> {
        self.prods.get(id.index())
    }

    pub(crate) fn get(&self, id: ProdId) -> Result<&Production, Error> {
        self.prods
            .get(id.index())
            .ok_or_else(|| corrupt(format!("unknown production {id}")))
    }

    pub(crate) fn get_mut(&mut self, id: ProdId) -> Result<&mut Production, Error> {
        self.prods
            .get_mut(id.index())
            .ok_or_else(|| corrupt(format!("unknown production {id}")))
    }

    fn check_input(&self, input: ProdId) -> Result<(), Error> {
        if input.index() >= self.prods.len() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("input production {input} does not exist")));
        }
        Ok(())
    }

    fn push(&mut self, meta: ProdMeta, kind: ProductionKind) -> ProdId {
        let id = ProdId(self.prods.len() as u32);
        self.by_cid.entry(meta.cid).or_insert(id);
        self.prods.push(Production {
            meta,
            kind,
            cache: ProductionCache::new(self.cache_slots),
            bound_column: None,
        });
        id
    }

    pub fn add_physical(&mut self, meta: ProdMeta, column: Arc<dyn PhysicalColumn>) -> ProdId {
        self.push(meta, ProductionKind::Physical(column))
    }

    pub fn add_simple(
        &mut self,
        meta: ProdMeta,
        kind: SimpleKind,
        input: ProdId,
    ) -> Result<ProdId, Error> {
        self.check_input(input)?;
        Ok(self.push(meta, ProductionKind::Simple { kind, input }))
    }

    pub fn add_function(
        &mut self,
        meta: ProdMeta,
        xform: Xform,
        params: Vec<Param>,
    ) -> Result<ProdId, Error> {
        for param in &params {
            self.check_input(param.prod)?;
        }
        let arity_ok = match &xform {
            Xform::Compare(_) => params.len() == 2,
            Xform::Array(_)
            | Xform::Blob(_)
            | Xform::LegacyBlob(_)
            | Xform::Byteswap => params.len() == 1,
            Xform::Select | Xform::Page(_) | Xform::BlobN(_) => !params.is_empty(),
            Xform::Row(_) | Xform::IdDepRow(_) | Xform::NonDetRow(_) => true,
        };
        if !arity_ok {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message(format!(
                "{} function `{}` cannot take {} inputs",
                xform.shape_name(),
                meta.name,
                params.len()
            )));
        }
        let function = FunctionProd {
            xform,
            params,
            window: (0, 0),
        };
        Ok(self.push(meta, ProductionKind::Function(function)))
    }

    pub fn add_script(
        &mut self,
        meta: ProdMeta,
        root: ProdId,
        members: Vec<ProdId>,
    ) -> Result<ProdId, Error> {
        self.check_input(root)?;
        for member in &members {
            self.check_input(*member)?;
        }
        Ok(self.push(meta, ProductionKind::Script { root, members }))
    }

    pub fn add_column_ref(&mut self, meta: ProdMeta, column: u32) -> ProdId {
        self.push(meta, ProductionKind::Column { column })
    }

    pub(crate) fn bind_column_root(&mut self, column: u32, root: ProdId) {
        self.column_roots.insert(column, root);
    }

    pub(crate) fn unbind_column_root(&mut self, column: u32) {
        self.column_roots.remove(&column);
        for prod in &mut self.prods {
            if prod.bound_column == Some(column) {
                prod.bound_column = None;
            }
        }
    }

    /// Column that reads `id` directly, once a cursor read has bound it.
    pub fn bound_column(&self, id: ProdId) -> Option<u32> {
        self.production(id).and_then(|prod| prod.bound_column)
    }

    /// Cursor-level read of `column` through its root: probe the cursor cache, read with the
    /// column bound, and keep blobs spanning enough rows in the cursor cache.
    pub(crate) fn read_column(
        &mut self,
        root: ProdId,
        row_id: i64,
        column: u32,
        env: &mut ReadEnv<'_>,
    ) -> Result<Blob, Error> {
        if let Some(cache) = env.cursor_cache.as_deref_mut() {
            if let Some(blob) = cache.find(column, row_id) {
                return Ok(blob);
            }
        }
        let blob = self.read_blob_in(root, row_id, 1, Some(column), env)?;
        if let Some(cache) = env.cursor_cache.as_deref_mut() {
            if blob.row_count() >= self.cursor_cache_min_rows {
                cache.save(column, blob.clone());
            }
        }
        Ok(blob)
    }

    /// Materialize a blob covering at least `row_id` from production `id`.
    pub fn read_blob(&mut self, id: ProdId, row_id: i64, count: u64) -> Result<Blob, Error> {
        self.read_blob_in(id, row_id, count, None, &mut ReadEnv::default())
    }

    pub(crate) fn read_blob_in(
        &mut self,
        id: ProdId,
        row_id: i64,
        count: u64,
        cctx: Option<u32>,
        env: &mut ReadEnv<'_>,
    ) -> Result<Blob, Error> {
        let bound = self.get(id)?.bound_column;
        match (cctx, bound) {
            (Some(column), None) if env.cursor_cache.is_some() => {
                self.get_mut(id)?.bound_column = Some(column);
            }
            (_, Some(column)) => {
                if let Some(cache) = env.cursor_cache.as_deref_mut() {
                    if let Some(blob) = cache.find(column, row_id) {
                        return Ok(blob);
                    }
                }
            }
            _ => {}
        }
        if let Some(blob) = self.get_mut(id)?.cache.find(row_id) {
            trace!(production = %id, row_id, "production cache hit");
            return Ok(blob);
        }
        if env.depth >= MAX_READ_DEPTH {
            return Err(corrupt("production graph nests too deeply").with_row_id(row_id));
        }
        env.depth += 1;
        let result = self.dispatch(id, row_id, count.max(1), env);
        env.depth -= 1;
        let blob = result?;
        if !blob.covers(row_id) {
            return Err(corrupt(format!(
                "production {id} returned rows [{}, {}]",
                blob.start_id(),
                blob.stop_id()
            ))
            .with_row_id(row_id));
        }
        // Indirect reads of a bound production feed the cursor cache instead of the MRU list.
        if let (None, Some(column), Some(cache)) = (cctx, bound, env.cursor_cache.as_deref_mut()) {
            let fits = !blob.no_cache() && blob.size_bytes() <= cache.capacity_bytes();
            if fits && blob.row_count() >= self.cursor_cache_min_rows {
                cache.save(column, blob.clone());
                return Ok(blob);
            }
        }
        if blob.page_map().is_none() {
            return Ok(blob);
        }
        trace!(production = %id, start = blob.start_id(), stop = blob.stop_id(), "production cache insert");
        self.get_mut(id)?.cache.insert(blob.clone());
        Ok(blob)
    }

    fn dispatch(
        &mut self,
        id: ProdId,
        row_id: i64,
        count: u64,
        env: &mut ReadEnv<'_>,
    ) -> Result<Blob, Error> {
        let route = match &self.get(id)?.kind {
            ProductionKind::Simple { kind, input } => Route::Simple(*kind, *input),
            ProductionKind::Function(_) => Route::Function,
            ProductionKind::Script { root, .. } => Route::Forward(*root),
            ProductionKind::Physical(column) => Route::Physical(Arc::clone(column)),
            ProductionKind::Column { column } => Route::Column(*column),
        };
        match route {
            Route::Simple(kind, input) => self.read_simple(id, kind, input, row_id, count, env),
            Route::Function => self.read_function(id, row_id, count, env),
            Route::Forward(root) => self.read_blob_in(root, row_id, count, None, env),
            Route::Physical(column) => column.read_blob(row_id),
            Route::Column(column) => {
                if let Some(cache) = env.cursor_cache.as_deref_mut() {
                    if let Some(blob) = cache.find(column, row_id) {
                        return Ok(blob);
                    }
                }
                let root = self.column_roots.get(&column).copied().ok_or_else(|| {
                    Error::new(ErrorKind::NotFound)
                        .with_message(format!("column {column} has no resolved production"))
                        .with_row_id(row_id)
                })?;
                if root == id {
                    return Err(corrupt(format!("column {column} reads itself")));
                }
                self.read_blob_in(root, row_id, count, None, env)
            }
        }
    }

    fn read_simple(
        &mut self,
        id: ProdId,
        kind: SimpleKind,
        input: ProdId,
        row_id: i64,
        count: u64,
        env: &mut ReadEnv<'_>,
    ) -> Result<Blob, Error> {
        let source = self.read_blob_in(input, row_id, count, None, env)?;
        match kind {
            SimpleKind::Page2Blob => Ok(source),
            SimpleKind::Cast => {
                let bits = self.get(id)?.desc().size_bits();
                if bits == 0 || bits == source.elem_bits() {
                    Ok(source)
                } else {
                    source.cast(bits)
                }
            }
            SimpleKind::Serial2Blob => deserialize_blob(&source, env),
            SimpleKind::Blob2Serial => serialize_blob(&source, env),
        }
    }

    /// Inclusive row range the production can answer, `None` when unknown or empty.
    pub fn column_id_range(&self, id: ProdId) -> Result<Option<(i64, i64)>, Error> {
        match &self.get(id)?.kind {
            ProductionKind::Simple { input, .. } => self.column_id_range(*input),
            ProductionKind::Script { root, .. } => self.column_id_range(*root),
            ProductionKind::Physical(column) => column.id_range(),
            ProductionKind::Column { .. } => Ok(None),
            ProductionKind::Function(function) => {
                let mut union: Option<(i64, i64)> = None;
                for param in &function.params {
                    if let Some((start, stop)) = self.column_id_range(param.prod)? {
                        union = Some(match union {
                            Some((lo, hi)) => (lo.min(start), hi.max(stop)),
                            None => (start, stop),
                        });
                    }
                }
                Ok(union)
            }
        }
    }

    /// Common row length at `row_id`, or 0 when rows vary.
    pub fn fixed_row_len(&self, id: ProdId, row_id: i64) -> Result<u32, Error> {
        match &self.get(id)?.kind {
            ProductionKind::Simple { input, .. } => self.fixed_row_len(*input, row_id),
            ProductionKind::Script { root, .. } => self.fixed_row_len(*root, row_id),
            ProductionKind::Physical(column) => Ok(column.fixed_row_len(row_id)),
            ProductionKind::Column { .. } => Ok(0),
            ProductionKind::Function(function) => {
                if function.xform.is_row_shaped() {
                    return Ok(0);
                }
                let mut common = None;
                for param in &function.params {
                    let len = self.fixed_row_len(param.prod, row_id)?;
                    if len == 0 || common.is_some_and(|c| c != len) {
                        return Ok(0);
                    }
                    common = Some(len);
                }
                Ok(common.unwrap_or(0))
            }
        }
    }
}

/// Rebuild a blob from its serialized envelope (one byte per element in `source`).
fn deserialize_blob(source: &Blob, env: &mut ReadEnv<'_>) -> Result<Blob, Error> {
    let bytes = source.data().cast(8)?.shared();
    let envelope = codec::decode_blob(&bytes)?;
    let rows = source.row_count();
    let page_map = match envelope.page_map {
        Some(serialized) => match env.workers.as_deref_mut() {
            Some(workers) => {
                workers.note_materialization();
                workers.decode(serialized, rows)?
            }
            None => decode_for_rows(&serialized, rows)?,
        },
        None => {
            let elems = envelope.data.elem_count();
            if rows == 0 || elems % rows != 0 {
                return Err(corrupt(format!(
                    "{elems} elements cannot be laid out over {rows} rows"
                ))
                .with_row_id(source.start_id()));
            }
            PageMap::new_fixed(rows, (elems / rows) as u32)
        }
    };
    Blob::builder(source.start_id(), source.stop_id(), envelope.data)
        .page_map(Arc::new(page_map))
        .byte_order(envelope.byte_order)
        .headers(envelope.headers)
        .no_cache(source.no_cache())
        .build()
}

/// Serialized envelope of `source`; carries no page map so it is never cached.
fn serialize_blob(source: &Blob, env: &mut ReadEnv<'_>) -> Result<Blob, Error> {
    let page_map = match (source.page_map(), env.workers.as_deref_mut()) {
        (Some(map), Some(workers)) => Some(workers.encode(map)?),
        (Some(map), None) => Some(codec::encode_page_map(map)),
        (None, _) => None,
    };
    let bytes = codec::encode_blob(source, page_map.as_deref());
    let data = DataBuffer::from_bytes(bytes, 8)?;
    Blob::builder(source.start_id(), source.stop_id(), data).build()
}
