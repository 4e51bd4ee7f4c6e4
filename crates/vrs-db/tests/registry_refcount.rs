use std::path::{Path, PathBuf};

use proptest::prelude::*;
use rusqlite::Connection;
use tempfile::tempdir;
use vrs_core::{ExperimentScope, Metadata, VrsError};
use vrs_db::CellValue;
use vrs_db::{Binding, ConnectionRegistry, Database, Mode, Release, Table};

/// Steps over two store paths: `(path, connect)`. A disconnect on a path
/// with no reference is turned into a connect, so every schedule is balanced
/// at every prefix.
fn schedules() -> impl Strategy<Value = Vec<(usize, bool)>> {
    prop::collection::vec((0usize..2, any::<bool>()), 0..40)
}

fn check_counts(
    registry: &ConnectionRegistry,
    paths: &[PathBuf; 2],
    expected: &[usize; 2],
) -> Result<(), TestCaseError> {
    for (path, count) in paths.iter().zip(expected) {
        prop_assert_eq!(registry.refcount(path).unwrap_or(0), *count);
    }
    let stats = registry.stats();
    let live = expected.iter().filter(|count| **count > 0).count();
    prop_assert_eq!(stats.live, live);
    prop_assert_eq!(stats.opened - stats.closed, live as u64);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn balanced_schedules_close_every_store(schedule in schedules()) {
        let dir = tempdir().expect("dir");
        let paths = [dir.path().join("a.db"), dir.path().join("b.db")];
        let registry = ConnectionRegistry::new();
        let mut expected = [0usize; 2];
        for (idx, connect) in schedule {
            if connect || expected[idx] == 0 {
                registry.connect(&paths[idx]).expect("connect");
                expected[idx] += 1;
            } else {
                let release = registry.disconnect(&paths[idx]).expect("disconnect");
                expected[idx] -= 1;
                if expected[idx] == 0 {
                    prop_assert_eq!(release, Release::Closed);
                } else {
                    prop_assert_eq!(release, Release::Shared { remaining: expected[idx] });
                }
            }
            check_counts(&registry, &paths, &expected)?;
        }
        for idx in 0..2 {
            while expected[idx] > 0 {
                registry.disconnect(&paths[idx]).expect("drain");
                expected[idx] -= 1;
                check_counts(&registry, &paths, &expected)?;
            }
        }
        let stats = registry.stats();
        prop_assert_eq!(stats.opened, stats.closed);
        prop_assert_eq!(stats.live, 0);
    }
}

#[test]
fn unbalanced_disconnect_is_an_integrity_error() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("never.db");
    let registry = ConnectionRegistry::new();
    let err = registry.disconnect(&path).expect_err("unbalanced");
    assert!(matches!(err, VrsError::Integrity(_)));
    assert_eq!(err.code(), "vrs_db.registry_unbalanced");

    registry.connect(&path).expect("connect");
    registry.disconnect(&path).expect("disconnect");
    let err = registry.disconnect(&path).expect_err("second disconnect");
    assert!(matches!(err, VrsError::Integrity(_)));
}

fn binding<'a>(
    registry: &'a ConnectionRegistry,
    name: &'a str,
    directory: &'a Path,
    scope: &'a ExperimentScope,
    metadata: &'a Metadata,
) -> Binding<'a> {
    Binding {
        registry,
        name,
        directory,
        owner: scope,
        current: scope,
        metadata,
    }
}

#[test]
fn two_outputs_on_one_store_share_a_connection() {
    let dir = tempdir().expect("dir");
    let registry = ConnectionRegistry::new();
    let scope = ExperimentScope::new("Shared", "Shared-abc", dir.path());
    let metadata: Metadata = [("n", "1")].into_iter().collect();

    let mut first = Table::new(["x"]).with_database(Database::new("x.db"));
    let mut second = Table::new(["y"]).with_database(Database::new("x.db"));
    first
        .open(&binding(&registry, "first", dir.path(), &scope, &metadata), Mode::Output)
        .expect("open first");
    second
        .open(&binding(&registry, "second", dir.path(), &scope, &metadata), Mode::Output)
        .expect("open second");

    let store = dir.path().join("x.db");
    assert_eq!(registry.refcount(&store), Some(2));
    first.insert([("x", "1")]).expect("insert x");
    second.insert([("y", "2")]).expect("insert y");

    assert_eq!(first.close().expect("close"), Release::Shared { remaining: 1 });
    assert_eq!(second.close().expect("close"), Release::Closed);
    assert_eq!(registry.refcount(&store), None);
    let stats = registry.stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.closed, 1);
}

#[test]
fn failed_table_open_releases_the_store() {
    let dir = tempdir().expect("dir");
    Connection::open(dir.path().join("sqlite3.db"))
        .and_then(|conn| conn.execute_batch("CREATE TABLE \"Exp__rows\" (experiment text, key text)"))
        .expect("seed");
    let registry = ConnectionRegistry::new();
    let scope = ExperimentScope::new("Exp", "Exp-1", dir.path());
    let metadata = Metadata::new();

    let mut table = Table::new(["key", "value"]);
    let err = table
        .open(&binding(&registry, "rows", dir.path(), &scope, &metadata), Mode::Output)
        .expect_err("conflicting columns");
    assert!(matches!(err, VrsError::SchemaConflict(_)));
    assert!(!table.database().is_open());
    let stats = registry.stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.opened, stats.closed);

    let mut matching = Table::new(["key"]);
    matching
        .open(&binding(&registry, "rows", dir.path(), &scope, &metadata), Mode::Output)
        .expect("open after a failed open");
    matching.close().expect("close");
}

#[test]
fn rows_can_be_copied_between_tables_of_one_store() {
    let dir = tempdir().expect("dir");
    let registry = ConnectionRegistry::new();
    let scope = ExperimentScope::new("Copy", "Copy-1", dir.path());
    let metadata = Metadata::new();

    let mut src = Table::new(["v"]);
    let mut dst = Table::new(["v"]);
    src.open(&binding(&registry, "src", dir.path(), &scope, &metadata), Mode::Output)
        .expect("open src");
    dst.open(&binding(&registry, "dst", dir.path(), &scope, &metadata), Mode::Output)
        .expect("open dst");
    for value in ["a", "b", "c"] {
        src.insert([("v", value)]).expect("insert");
    }

    let copied = src
        .select(|_, rows| {
            let mut copied = 0;
            for row in rows {
                dst.insert([("v", row?[0].clone())])?;
                copied += 1;
            }
            Ok(copied)
        })
        .expect("copy");
    assert_eq!(copied, 3);
    let (_, rows) = dst.value().expect("dst rows");
    assert_eq!(
        rows,
        vec![
            vec![CellValue::from("a")],
            vec![CellValue::from("b")],
            vec![CellValue::from("c")],
        ]
    );
    src.close().expect("close src");
    dst.close().expect("close dst");
    assert_eq!(registry.stats().live, 0);
}
