//! Pushdown against the delimited-file backend must not change query
//! results: rows surviving the pushed filter, re-checked by the host, equal
//! the rows a host-only scan keeps.

use std::sync::Arc;

use extab_connectors::predicate::CompareOp;
use extab_connectors::{
    translate, AccessMode, Backend, BackendKind, ColumnUsage, CsvBackend, EngineConfig,
    ExternalTable, PredicateNode, Session, SqlCommand, Translation,
};
use extab_core::{ColumnDef, ColumnType, TableSchema, Value};
use tempfile::TempDir;

const DATA: &str = "\
id;name;city;score;joined
1;ann;paris;3.5;2021-04-01
2;bob;rome;;2022-01-15
3;cid;paris;7.25;2020-12-31
4;dan;;1.0;2023-06-30
5;eve;oslo;9.0;
6;fay;rome;4.5;2021-04-01
";

fn setup() -> (TempDir, ExternalTable) {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("people.txt"), DATA).unwrap();
    let schema = TableSchema::new(
        "people",
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("name", ColumnType::String),
            ColumnDef::new("city", ColumnType::String),
            ColumnDef::new("score", ColumnType::Double),
            ColumnDef::new("joined", ColumnType::Date),
            ColumnDef::new("tag", ColumnType::String).virtual_column(),
        ],
    )
    .with_option("type", "CSV")
    .with_option("filename", "people.txt")
    .with_option("separator", ";")
    .with_option("header", 1i64);
    let backend = CsvBackend::new(EngineConfig::default().with_data_dir(dir.path()));
    (dir, ExternalTable::new(schema, Arc::new(backend)))
}

fn all_rows(session: &mut Session, table: &ExternalTable) -> Vec<Vec<Value>> {
    let usage = ColumnUsage::all(&table.schema);
    session.release(table.name()).unwrap();
    let h = session.acquire(table, AccessMode::Read, &usage).unwrap();
    let mut rows = Vec::new();
    while let Some(row) = h.next_row().unwrap() {
        rows.push(row);
    }
    rows
}

fn host_only(session: &mut Session, table: &ExternalTable, pred: &PredicateNode) -> Vec<i64> {
    all_rows(session, table)
        .into_iter()
        .filter(|r| pred.matches(&table.schema, r))
        .map(|r| match r[0] {
            Value::Integer(i) => i,
            _ => panic!("id not read"),
        })
        .collect()
}

fn pushed(session: &mut Session, table: &ExternalTable, pred: &PredicateNode) -> Vec<i64> {
    let usage = ColumnUsage::all(&table.schema);
    session.release(table.name()).unwrap();
    let h = session.acquire(table, AccessMode::Read, &usage).unwrap();
    h.push_condition(pred);
    let mut ids = Vec::new();
    while let Some(row) = h.next_row().unwrap() {
        if pred.matches(&table.schema, &row) {
            if let Value::Integer(i) = row[0] {
                ids.push(i);
            }
        }
    }
    ids
}

fn predicates() -> Vec<PredicateNode> {
    vec![
        PredicateNode::eq("city", "paris"),
        PredicateNode::compare(CompareOp::Ge, "score", 4.5),
        PredicateNode::in_list("city", vec![Value::from("rome"), Value::from("oslo")]),
        PredicateNode::in_list("city", vec![Value::from("rome")]).negate(),
        PredicateNode::between("id", 2i64, 4i64),
        PredicateNode::is_null("score"),
        PredicateNode::is_null("city").negate(),
        PredicateNode::compare(CompareOp::Like, "name", "%a%"),
        PredicateNode::and(vec![
            PredicateNode::eq("city", "paris"),
            PredicateNode::compare(CompareOp::Gt, "score", 5i64),
        ]),
        PredicateNode::or(vec![
            PredicateNode::eq("city", "oslo"),
            PredicateNode::compare(CompareOp::Lt, "joined", "2021-01-01"),
        ]),
        // The virtual column cannot be pushed; the AND keeps the rest.
        PredicateNode::and(vec![
            PredicateNode::eq("tag", "x").negate(),
            PredicateNode::eq("city", "rome"),
        ]),
        // Unpushable OR: the host filters everything.
        PredicateNode::or(vec![
            PredicateNode::eq("tag", "x"),
            PredicateNode::eq("city", "rome"),
        ]),
    ]
}

#[test]
fn test_pushdown_preserves_results() {
    let (_dir, table) = setup();
    let mut session = Session::new(1, EngineConfig::default());
    session.begin_statement(1, SqlCommand::Select);
    for pred in predicates() {
        let expected = host_only(&mut session, &table, &pred);
        let actual = pushed(&mut session, &table, &pred);
        assert_eq!(actual, expected, "{:?}", pred);
    }
}

#[test]
fn test_expected_rows_for_simple_filters() {
    let (_dir, table) = setup();
    let mut session = Session::new(1, EngineConfig::default());
    session.begin_statement(1, SqlCommand::Select);
    assert_eq!(
        pushed(&mut session, &table, &PredicateNode::eq("city", "paris")),
        vec![1, 3]
    );
    assert_eq!(
        pushed(&mut session, &table, &PredicateNode::is_null("joined")),
        vec![5]
    );
}

#[test]
fn test_virtual_column_is_dropped_from_native_and() {
    let (_dir, table) = setup();
    let pred = PredicateNode::and(vec![
        PredicateNode::eq("tag", "x"),
        PredicateNode::eq("city", "rome"),
    ]);
    let translation = translate(&pred, &table.schema, &table.backend.capability());
    let filter = translation.native().expect("native filter");
    assert_eq!(filter.columns().into_iter().collect::<Vec<_>>(), vec![2]);

    let or = PredicateNode::or(vec![
        PredicateNode::eq("tag", "x"),
        PredicateNode::eq("city", "rome"),
    ]);
    assert_eq!(
        translate(&or, &table.schema, &table.backend.capability()),
        Translation::NotPushable
    );
}

#[test]
fn test_command_backend_never_gets_partial_filter() {
    let (_dir, table) = setup();
    let capability = BackendKind::Myx.capability();
    let pred = PredicateNode::and(vec![
        PredicateNode::eq("name", "dir"),
        PredicateNode::eq("city", "x"),
    ]);
    assert_eq!(
        translate(&pred, &table.schema, &capability),
        Translation::NotPushable
    );
}
