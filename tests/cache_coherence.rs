// Cursor-level cache hits must agree with a full dispatch for the same (column, row).
mod common;

use common::{init_tracing, plus_one, read_u32, u32_decl};
use std::sync::Arc;
use vcursor::api::{
    ColumnSpec, Cursor, CursorOptions, MapSchema, MemoryColumn, Param, SchemaResolver, Xform,
};

const ROWS: u32 = 40;

fn schema(storage: Arc<MemoryColumn>) -> Arc<MapSchema> {
    Arc::new(
        MapSchema::new()
            .with_physical(u32_decl("A", 1), storage)
            .with_column(u32_decl("B", 2), |graph, decl, schema: &dyn SchemaResolver| {
                let (_, a) = schema.resolve(&ColumnSpec::name("A"), graph)?;
                graph.add_function(decl.meta(), Xform::row(plus_one), vec![Param::input(a)])
            }),
    )
}

fn storage() -> Arc<MemoryColumn> {
    let values: Vec<u32> = (1..=ROWS).map(|v| v * 3).collect();
    Arc::new(MemoryColumn::from_u32s(1, &values, 10).expect("storage"))
}

fn open(storage: Arc<MemoryColumn>, options: CursorOptions) -> (Cursor, u32, u32) {
    let mut cursor = Cursor::with_options(schema(storage), options);
    let a = cursor.add_column(&ColumnSpec::name("A")).expect("A").index();
    let b = cursor.add_column(&ColumnSpec::name("B")).expect("B").index();
    cursor.open().expect("open");
    (cursor, a, b)
}

fn read_all(cursor: &mut Cursor, idx: u32) -> Vec<u32> {
    (1..=ROWS as i64)
        .map(|row_id| {
            let mut out = [0u8; 4];
            cursor.read_direct(row_id, idx, 32, &mut out).expect("read");
            read_u32(&out)
        })
        .collect()
}

#[test]
fn cached_reads_match_uncached_reads() {
    init_tracing();
    let options = CursorOptions::new().with_production_cache_slots(1);
    let (mut plain, plain_a, plain_b) = open(storage(), options.clone());
    let (mut cached, cached_a, cached_b) =
        open(storage(), options.with_cursor_cache_bytes(1 << 20));

    assert_eq!(read_all(&mut plain, plain_a), read_all(&mut cached, cached_a));
    assert_eq!(read_all(&mut plain, plain_b), read_all(&mut cached, cached_b));
    // Second pass hits cached blobs.
    assert_eq!(read_all(&mut plain, plain_b), read_all(&mut cached, cached_b));

    let (used, capacity) = cached.cursor_cache_usage().expect("cache configured");
    assert!(used > 0 && used <= capacity);
    assert!(plain.cursor_cache_usage().is_none());
}

#[test]
fn cursor_cache_spares_storage_reads() {
    init_tracing();
    let options = CursorOptions::new().with_production_cache_slots(1);
    let plain_storage = storage();
    let cached_storage = storage();
    let (mut plain, plain_a, _) = open(Arc::clone(&plain_storage), options.clone());
    let (mut cached, cached_a, _) =
        open(Arc::clone(&cached_storage), options.with_cursor_cache_bytes(1 << 20));

    read_all(&mut plain, plain_a);
    read_all(&mut cached, cached_a);
    assert_eq!(plain_storage.read_count(), 4);
    assert_eq!(cached_storage.read_count(), 4);

    read_all(&mut plain, plain_a);
    read_all(&mut cached, cached_a);
    assert_eq!(plain_storage.read_count(), 8);
    assert_eq!(cached_storage.read_count(), 4);
}

#[test]
fn cached_blob_is_the_dispatched_blob() {
    init_tracing();
    let options = CursorOptions::new().with_cursor_cache_bytes(1 << 20);
    let (mut cursor, a, _) = open(storage(), options);
    let first = cursor.get_blob_direct(12, a).expect("dispatch");
    let hit = cursor.get_blob_direct(17, a).expect("cache hit");
    assert_eq!((first.start_id(), first.stop_id()), (11, 20));
    assert_eq!(first.data().as_bytes(), hit.data().as_bytes());
    assert_eq!(first.page_map(), hit.page_map());
}

#[test]
fn blobs_too_large_for_the_cursor_cache_stay_in_the_production_cache() {
    init_tracing();
    let source = storage();
    let options = CursorOptions::new().with_cursor_cache_bytes(16);
    let (mut cursor, a, _) = open(Arc::clone(&source), options);
    for row_id in 1..=10 {
        let mut out = [0u8; 4];
        cursor.read_direct(row_id, a, 32, &mut out).expect("read");
        assert_eq!(read_u32(&out), row_id as u32 * 3);
    }
    assert_eq!(source.read_count(), 1);
    assert_eq!(cursor.cursor_cache_usage(), Some((0, 16)));
}

#[test]
fn indirect_reads_are_answered_from_the_bound_column() {
    init_tracing();
    let options = CursorOptions::new().with_production_cache_slots(0);
    let plain_storage = storage();
    let cached_storage = storage();
    let (mut plain, plain_a, plain_b) = open(Arc::clone(&plain_storage), options.clone());
    let (mut cached, cached_a, cached_b) =
        open(Arc::clone(&cached_storage), options.with_cursor_cache_bytes(1 << 20));

    let mut out = [0u8; 4];
    for (cursor, a, b) in [(&mut plain, plain_a, plain_b), (&mut cached, cached_a, cached_b)] {
        cursor.read_direct(3, a, 32, &mut out).expect("A");
        assert_eq!(read_u32(&out), 9);
        cursor.read_direct(3, b, 32, &mut out).expect("B");
        assert_eq!(read_u32(&out), 10);
    }
    assert_eq!(plain_storage.read_count(), 2);
    assert_eq!(cached_storage.read_count(), 1);

    let root = cached.column(cached_a).expect("A").root().expect("resolved");
    assert_eq!(cached.graph().bound_column(root), Some(cached_a));
    let plain_root = plain.column(plain_a).expect("A").root().expect("resolved");
    assert_eq!(plain.graph().bound_column(plain_root), None);
}
