// The process-wide stop flag aborts multi-row fetches; kept in its own binary.
mod common;

use common::init_tracing;
use std::sync::Arc;
use vcursor::api::{
    request_stop, reset_stop, should_stop, CtxId, ErrorKind, MemoryColumn, Param, ProdMeta,
    ProductionGraph, TypeDesc, Xform,
};

#[test]
fn stop_flag_interrupts_and_reset_recovers() {
    init_tracing();
    let values: Vec<u32> = (1..=100).collect();
    let column = Arc::new(MemoryColumn::from_u32s(1, &values, 100).expect("column"));
    let mut graph = ProductionGraph::default();
    let a = graph.add_physical(ProdMeta::new("A", TypeDesc::u32(), CtxId::new(0, 1)), column);
    let f = graph
        .add_function(
            ProdMeta::new("F", TypeDesc::u32(), CtxId::new(0, 2)),
            Xform::row(common::plus_one),
            vec![Param::input(a)],
        )
        .expect("function");

    request_stop();
    assert!(should_stop());
    let err = graph.read_blob(f, 1, 100).expect_err("stopped");
    assert_eq!(err.kind(), ErrorKind::Interrupted);
    assert_eq!(err.row_id(), Some(1));

    // Leaf reads are single pages and are not interrupted.
    graph.read_blob(a, 50, 1).expect("leaf read");

    reset_stop();
    let blob = graph.read_blob(f, 1, 100).expect("after reset");
    assert_eq!((blob.start_id(), blob.stop_id()), (1, 100));
}
