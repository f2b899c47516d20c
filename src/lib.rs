//! Purpose: Columnar read engine: a row cursor over lazily materialized column productions.
//! Exports: `core` (blobs, page maps, productions, cursor, errors) and `api` (stable surface).
//! Role: Library crate; schema text, on-disk storage and transform registries live elsewhere.
//! Invariants: All reads run on the caller's thread; only page-map coding may use a worker.
//! Invariants: Published blobs and page maps are never mutated in place.
pub mod api;
pub mod core;
