//! Purpose: Stable public Rust API of the cursor engine.
//! Exports: Cursor surface, production graph builders, blob and page-map types, errors, options.
//! Role: Additive-only surface; internal helpers stay behind `core`.
//! Invariants: Everything a schema resolver or transform registry needs is reachable from here.

pub use crate::core::bits::{bit_copy, bit_eq, DataBuffer};
pub use crate::core::blob::{Blob, BlobBuilder, BlobHeader, HeaderChain, HEADER_FLAG_PASSTHROUGH};
pub use crate::core::codec::{decode_blob, decode_page_map, encode_blob, encode_page_map, BlobEnvelope};
pub use crate::core::column::{CellData, Column};
pub use crate::core::cursor::{BitsRead, ColumnAdded, Cursor, CursorState};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::options::CursorOptions;
pub use crate::core::pagemap::{PageMap, PageMapBuilder, RowSpan, Run};
pub use crate::core::physical::{MemoryColumn, PhysicalColumn};
pub use crate::core::production::{
    Param, ProdId, ProdMeta, Production, ProductionGraph, ProductionKind, SimpleKind,
};
pub use crate::core::schema::{ColumnBuilder, ColumnDecl, MapSchema, SchemaResolver};
pub use crate::core::stop::{install_signal_handlers, request_stop, reset as reset_stop, should_stop};
pub use crate::core::types::{ByteOrder, Chain, ColumnSpec, CtxId, Domain, TypeDesc, Typedecl};
pub use crate::core::worker::{PageMapWorker, WorkerState};
pub use crate::core::xform::{
    ArrayFn, BlobFn, BlobNFn, BlobOutput, CompareFn, LegacyBlobFn, PageFn, PageOutput, RowArg,
    RowFn, RowOutput, Xform, XformInfo,
};
