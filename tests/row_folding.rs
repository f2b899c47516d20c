// Row functions fold byte-identical consecutive outputs into shared page-map runs.
mod common;

use common::{init_tracing, read_u32};
use std::sync::Arc;
use vcursor::api::{CtxId, MemoryColumn, Param, ProdMeta, ProductionGraph, TypeDesc, Xform};

const ROWS: u32 = 1000;

fn clamp_middle() -> Xform {
    Xform::row(|_, _, out, args| {
        let value = args[0].uint(0).unwrap_or_default() as u32;
        let folded = if (100..=200).contains(&value) { 7 } else { value + 1000 };
        out.set(&folded.to_ne_bytes(), 1)
    })
}

fn graph() -> (ProductionGraph, vcursor::api::ProdId) {
    let values: Vec<u32> = (1..=ROWS).collect();
    let column = Arc::new(MemoryColumn::from_u32s(1, &values, ROWS as usize).expect("column"));
    let mut graph = ProductionGraph::default();
    let a = graph.add_physical(ProdMeta::new("A", TypeDesc::u32(), CtxId::new(0, 1)), column);
    let f = graph
        .add_function(
            ProdMeta::new("F", TypeDesc::u32(), CtxId::new(0, 2)),
            clamp_middle(),
            vec![Param::input(a)],
        )
        .expect("function");
    (graph, f)
}

#[test]
fn identical_outputs_collapse_into_one_run() {
    init_tracing();
    let (mut graph, f) = graph();
    let blob = graph.read_blob(f, 1, ROWS as u64).expect("read");
    assert_eq!((blob.start_id(), blob.stop_id()), (1, ROWS as i64));

    let runs = blob.page_map().expect("page map").runs();
    let folded: Vec<(u64, u64)> = runs
        .iter()
        .scan(1u64, |row, run| {
            let first = *row;
            *row += run.repeat;
            Some((first, run.repeat))
        })
        .filter(|(_, repeat)| *repeat > 1)
        .collect();
    assert_eq!(folded, vec![(100, 101)]);
    assert_eq!(blob.elem_count(), (ROWS - 100) as u64);
}

#[test]
fn folded_rows_match_their_own_computation() {
    init_tracing();
    let (mut graph, f) = graph();
    let blob = graph.read_blob(f, 1, ROWS as u64).expect("read");
    for row_id in [99i64, 100, 150, 200, 201] {
        let span = blob.row(row_id).expect("span");
        let bytes = blob
            .data()
            .element_bytes(span.first_elem, span.elem_count as u64)
            .expect("aligned");
        let (mut alone, _) = self::graph();
        let single = alone.read_blob(f, row_id, 1).expect("single row");
        let own = single.row(row_id).expect("own span");
        let expected = single
            .data()
            .element_bytes(own.first_elem, own.elem_count as u64)
            .expect("aligned");
        assert_eq!(bytes, expected, "row {row_id}");
    }
    let middle = blob.row(150).expect("middle");
    let value = blob.data().element_bytes(middle.first_elem, 1).expect("value");
    assert_eq!(read_u32(value), 7);
}

#[test]
fn repeated_reads_are_identical() {
    init_tracing();
    let (mut graph, f) = graph();
    let first = graph.read_blob(f, 40, 100).expect("first");
    let again = graph.read_blob(f, 40, 100).expect("again");
    assert_eq!(first.data().as_bytes(), again.data().as_bytes());
    assert_eq!(first.page_map(), again.page_map());
    assert!(first.covers(40) && again.covers(40));
}
