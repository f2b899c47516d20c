// Shared fixtures for integration tests: logging setup and small in-memory schemas.
#![allow(dead_code)]

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vcursor::api::{
    ColumnDecl, ColumnSpec, CtxId, Error, MapSchema, MemoryColumn, Param, RowArg, RowOutput,
    SchemaResolver, TypeDesc, Typedecl, Xform, XformInfo,
};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn u32_decl(name: &str, id: u32) -> ColumnDecl {
    ColumnDecl::new(name, CtxId::new(0, id), Typedecl::new("U32", 1), TypeDesc::u32())
}

pub fn plus_one(
    _info: &XformInfo<'_>,
    _row_id: i64,
    out: &mut RowOutput,
    args: &[RowArg<'_>],
) -> Result<(), Error> {
    let value = args[0].uint(0).unwrap_or_default() as u32 + 1;
    out.set(&value.to_ne_bytes(), 1)
}

/// Physical `A` holding `values` from row 1, and `B` computing `A + 1` per row.
pub fn a_plus_one_schema(values: &[u32], page_rows: usize) -> MapSchema {
    let storage = Arc::new(MemoryColumn::from_u32s(1, values, page_rows).expect("storage"));
    MapSchema::new()
        .with_physical(u32_decl("A", 1), storage)
        .with_column(u32_decl("B", 2), |graph, decl, schema: &dyn SchemaResolver| {
            let (_, a) = schema.resolve(&ColumnSpec::name("A"), graph)?;
            graph.add_function(decl.meta(), Xform::row(plus_one), vec![Param::input(a)])
        })
}

pub fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_ne_bytes(raw)
}
