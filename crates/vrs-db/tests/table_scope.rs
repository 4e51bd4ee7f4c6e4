use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::Connection;
use tempfile::tempdir;
use vrs_core::{ExperimentScope, Metadata, VrsError};
use vrs_db::{
    Binding, CellValue, Column, ConnectionRegistry, Database, Mode, Table, TableDict,
    METADATA_TABLE,
};

struct Fixture {
    registry: ConnectionRegistry,
    scope: ExperimentScope,
    metadata: Metadata,
}

impl Fixture {
    fn new(directory: &Path, instance_id: &str) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            scope: ExperimentScope::new("Sweep", instance_id, directory),
            metadata: [("alpha", "0.5")].into_iter().collect(),
        }
    }

    fn binding<'a>(&'a self, name: &'a str) -> Binding<'a> {
        Binding {
            registry: &self.registry,
            name,
            directory: self.scope.directory(),
            owner: &self.scope,
            current: &self.scope,
            metadata: &self.metadata,
        }
    }
}

#[test]
fn insert_requires_exact_column_set() {
    let dir = tempdir().expect("dir");
    let fixture = Fixture::new(dir.path(), "Sweep-1");
    let mut table = Table::new(["key", "value"]);
    table
        .open(&fixture.binding("results"), Mode::Output)
        .expect("open");

    let err = table.insert([("key", "only")]).expect_err("missing column");
    assert!(matches!(err, VrsError::Integrity(_)));
    assert_eq!(err.code(), "vrs_db.column_mismatch");

    let err = table
        .insert([("key", "k"), ("value", "v"), ("extra", "e")])
        .expect_err("extra column");
    assert!(matches!(err, VrsError::Integrity(_)));

    table.insert([("key", "k"), ("value", "v")]).expect("insert");
    table.close().expect("close");
}

#[test]
fn insert_on_input_table_is_rejected() {
    let dir = tempdir().expect("dir");
    let fixture = Fixture::new(dir.path(), "Sweep-1");
    let mut writer = Table::new(["key"]);
    writer
        .open(&fixture.binding("results"), Mode::Output)
        .expect("open output");
    writer.insert([("key", "k")]).expect("insert");
    writer.close().expect("close");

    let mut reader = Table::new(["key"]);
    reader
        .open(&fixture.binding("results"), Mode::Input)
        .expect("open input");
    let err = reader.insert([("key", "k2")]).expect_err("read only");
    assert!(matches!(err, VrsError::Integrity(_)));
    assert_eq!(err.code(), "vrs_db.table_read_only");
    reader.close().expect("close");

    let detached = Table::new(["key"]);
    assert!(matches!(
        detached.insert([("key", "k")]),
        Err(VrsError::Integrity(_))
    ));
}

#[test]
fn select_is_scoped_and_hides_experiment_column() {
    let dir = tempdir().expect("dir");
    for instance in ["Sweep-a", "Sweep-b"] {
        let fixture = Fixture::new(dir.path(), instance);
        let mut table = Table::new([Column::text("key"), Column::new("count", "integer")]);
        table
            .open(&fixture.binding("phase-results"), Mode::Output)
            .expect("open");
        table
            .insert([("key", CellValue::from(instance)), ("count", CellValue::from(1))])
            .expect("insert");
        table.close().expect("close");
    }

    let fixture = Fixture::new(dir.path(), "Sweep-b");
    let mut table = Table::new([Column::text("key"), Column::new("count", "integer")]);
    table
        .open(&fixture.binding("phase-results"), Mode::Input)
        .expect("open");
    assert_eq!(table.name().expect("name"), "Sweep__results");
    let (columns, rows) = table.value().expect("value");
    assert_eq!(columns, ["key", "count"]);
    assert_eq!(
        rows,
        vec![vec![CellValue::from("Sweep-b"), CellValue::Integer(1)]]
    );

    let seen = table
        .select(|_, rows| {
            let first = rows.next().transpose()?;
            assert!(rows.next().is_none());
            assert!(rows.next().is_none());
            Ok(first)
        })
        .expect("select");
    assert!(seen.is_some());
    table.close().expect("close");
}

#[test]
fn clear_removes_only_the_current_instance() {
    let dir = tempdir().expect("dir");
    let other = Fixture::new(dir.path(), "Sweep-other");
    let mut table = Table::new(["key"]);
    table.open(&other.binding("rows"), Mode::Output).expect("open");
    table.insert([("key", "kept")]).expect("insert");
    table.close().expect("close");

    let fixture = Fixture::new(dir.path(), "Sweep-mine");
    let mut table = Table::new(["key"]);
    table.open(&fixture.binding("rows"), Mode::Output).expect("open");
    table.insert([("key", "a")]).expect("insert");
    table.insert([("key", "b")]).expect("insert");
    assert_eq!(table.clear().expect("clear"), 2);
    assert!(table.value().expect("value").1.is_empty());
    table.close().expect("close");

    let conn = Connection::open(dir.path().join("sqlite3.db")).expect("open");
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM \"Sweep__rows\"", [], |row| row.get(0))
        .expect("count");
    assert_eq!(remaining, 1);
}

#[test]
fn differing_existing_table_is_a_schema_conflict() {
    let dir = tempdir().expect("dir");
    let fixture = Fixture::new(dir.path(), "Sweep-1");
    let mut table = Table::new(["key"]);
    table.open(&fixture.binding("rows"), Mode::Output).expect("open");
    table.close().expect("close");

    let mut changed = Table::new(["key", "value"]);
    let err = changed
        .open(&fixture.binding("rows"), Mode::Output)
        .expect_err("conflict");
    assert!(matches!(err, VrsError::SchemaConflict(_)));
    changed.close().expect("release store");
}

#[test]
fn output_store_records_instance_metadata() {
    let dir = tempdir().expect("dir");
    let fixture = Fixture::new(dir.path(), "Sweep-1");
    let mut database = Database::new("records.db");
    database
        .open(&fixture.binding("db"), Mode::Output)
        .expect("open output");
    database
        .open(&fixture.binding("db"), Mode::Output)
        .expect_err("double open");
    database.close().expect("close");

    let conn = Connection::open(dir.path().join("records.db")).expect("open");
    let (experiment, snapshot): (String, String) = conn
        .query_row(
            &format!("SELECT experiment, metadata FROM {METADATA_TABLE}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("row");
    assert_eq!(experiment, "Sweep-1");
    assert_eq!(snapshot, r#"{"alpha":"0.5"}"#);

    let mut missing = Database::new("absent.db");
    let err = missing
        .open(&fixture.binding("db"), Mode::Input)
        .expect_err("missing input");
    assert!(matches!(err, VrsError::NotFound(_)));
}

#[test]
fn table_dict_round_trip() {
    let dir = tempdir().expect("dir");
    let fixture = Fixture::new(dir.path(), "Sweep-x");
    let mut dict = TableDict::new();
    dict.open(&fixture.binding("settings"), Mode::Output)
        .expect("open output");
    dict.insert("a".into(), "0".into());
    dict.insert("a".into(), "1".into());
    dict.insert("b".into(), "2".into());
    dict.close().expect("close");

    let mut reread = TableDict::new();
    reread
        .open(&fixture.binding("settings"), Mode::Input)
        .expect("open input");
    let expected: BTreeMap<String, String> =
        [("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
            .into_iter()
            .collect();
    assert_eq!(*reread, expected);
    reread.close().expect("close");
}
