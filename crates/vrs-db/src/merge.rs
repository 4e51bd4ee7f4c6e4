//! Offline reconciliation of independently produced stores.
//!
//! Sources are attached to the target connection under `db_<n>` aliases.
//! Table definitions are unioned by name; the same name with a different
//! `CREATE` statement aborts the merge before anything is written. Rows are
//! deduplicated on every column, and key/value tables are additionally
//! consolidated into one [`KEY_VALUE_TABLE`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use tracing::info;
use vrs_core::{ErrorInfo, VrsError};

use crate::sql::{column_list, path_error, placeholders, quote_ident, read_row, storage_error};
use crate::value::Row;

/// Unified table collecting the rows of every key/value table.
pub const KEY_VALUE_TABLE: &str = "TableDict";
const KEY_VALUE_COLUMNS: [&str; 3] = ["experiment", "key", "value"];

/// A table as declared by one or more attached sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Table name.
    pub name: String,
    /// Creation statement, identical in every source.
    pub sql: String,
    /// Aliases of the sources declaring the table.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMergeReport {
    /// Merged table.
    pub table: String,
    /// Distinct rows inserted into the target.
    pub rows: usize,
}

/// Rows written per table by a completed merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// One entry per merged table, in catalog order.
    pub tables: Vec<TableMergeReport>,
    /// Rows written to the consolidated key/value table.
    pub key_value_rows: usize,
}

impl MergeReport {
    /// Rows inserted into `table`, if it was merged.
    pub fn rows_for(&self, table: &str) -> Option<usize> {
        self.tables
            .iter()
            .find(|report| report.table == table)
            .map(|report| report.rows)
    }
}

#[derive(Debug, Clone)]
struct Source {
    alias: String,
    path: PathBuf,
}

/// A merge session over one target and its attached sources.
#[derive(Debug)]
pub struct Merger {
    target: PathBuf,
    conn: Connection,
    sources: Vec<Source>,
}

impl Merger {
    /// Opens the target and attaches every source.
    ///
    /// All source paths are checked before the first attach.
    pub fn open(target: &Path, sources: &[PathBuf]) -> Result<Self, VrsError> {
        if let Some(missing) = sources.iter().find(|path| !path.exists()) {
            return Err(VrsError::NotFound(
                ErrorInfo::new("vrs_db.merge_source", "source database does not exist")
                    .with_context("path", missing.display().to_string()),
            ));
        }
        let conn =
            Connection::open(target).map_err(|err| path_error("vrs_db.merge_open", target, err))?;
        let mut attached = Vec::with_capacity(sources.len());
        for (idx, path) in sources.iter().enumerate() {
            let alias = format!("db_{idx}");
            conn.execute(
                &format!("ATTACH DATABASE ?1 AS {alias}"),
                [path.to_string_lossy().into_owned()],
            )
            .map_err(|err| path_error("vrs_db.merge_attach", path, err))?;
            info!("merger: attached {} as {alias}", path.display());
            attached.push(Source {
                alias,
                path: path.clone(),
            });
        }
        Ok(Self {
            target: target.to_path_buf(),
            conn,
            sources: attached,
        })
    }

    /// Store receiving the merge.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Attached source paths in alias order.
    pub fn source_paths(&self) -> Vec<&Path> {
        self.sources.iter().map(|source| source.path.as_path()).collect()
    }

    /// Unions the table catalogs of all sources.
    ///
    /// Fails with a schema conflict naming the first table whose `CREATE`
    /// statement differs between two sources.
    pub fn collect_catalog(&self) -> Result<Vec<CatalogEntry>, VrsError> {
        let mut catalog: BTreeMap<String, CatalogEntry> = BTreeMap::new();
        for source in &self.sources {
            for (name, sql) in self.source_tables(&source.alias)? {
                match catalog.get_mut(&name) {
                    Some(entry) if entry.sql != sql => {
                        let first = self
                            .sources
                            .iter()
                            .find(|candidate| Some(&candidate.alias) == entry.sources.first())
                            .map(|candidate| candidate.path.display().to_string())
                            .unwrap_or_default();
                        return Err(VrsError::SchemaConflict(
                            ErrorInfo::new(
                                "vrs_db.merge_conflict",
                                format!("two tables with different definitions found: {name}"),
                            )
                            .with_context("table", name)
                            .with_context("first", first)
                            .with_context("second", source.path.display().to_string()),
                        ));
                    }
                    Some(entry) => entry.sources.push(source.alias.clone()),
                    None => {
                        catalog.insert(
                            name.clone(),
                            CatalogEntry {
                                name,
                                sql,
                                sources: vec![source.alias.clone()],
                            },
                        );
                    }
                }
            }
        }
        Ok(catalog.into_values().collect())
    }

    fn source_tables(&self, alias: &str) -> Result<Vec<(String, String)>, VrsError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT name, sql FROM {alias}.sqlite_master \
                 WHERE type = 'table' AND substr(name, 1, 7) <> 'sqlite_' ORDER BY name"
            ))
            .map_err(|err| storage_error("vrs_db.merge_catalog", err))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|err| storage_error("vrs_db.merge_catalog", err))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|err| storage_error("vrs_db.merge_catalog", err))
    }

    /// Runs the merge as one transaction: either every table lands in the
    /// target or the target is left untouched.
    pub fn merge(mut self) -> Result<MergeReport, VrsError> {
        let catalog = self.collect_catalog()?;
        let tx = self
            .conn
            .transaction()
            .map_err(|err| storage_error("vrs_db.merge_transaction", err))?;
        let mut report = MergeReport::default();
        let mut key_values: IndexSet<Row> = IndexSet::new();
        for entry in &catalog {
            let (headers, rows) = collect_rows(&tx, entry)?;
            let is_key_value = headers.iter().map(String::as_str).eq(KEY_VALUE_COLUMNS);
            if entry.name == KEY_VALUE_TABLE {
                if is_key_value {
                    key_values.extend(rows);
                }
                continue;
            }
            recreate_table(&tx, &entry.name, &entry.sql)?;
            insert_rows(&tx, &entry.name, &headers, &rows)?;
            info!("merger: inserted {} rows into {}", rows.len(), entry.name);
            report.tables.push(TableMergeReport {
                table: entry.name.clone(),
                rows: rows.len(),
            });
            if is_key_value {
                key_values.extend(rows);
            }
        }
        let kv_headers: Vec<String> = KEY_VALUE_COLUMNS.iter().map(|c| c.to_string()).collect();
        let kv_sql = format!(
            "CREATE TABLE {} (experiment text, key text, value text)",
            quote_ident(KEY_VALUE_TABLE)
        );
        recreate_table(&tx, KEY_VALUE_TABLE, &kv_sql)?;
        insert_rows(&tx, KEY_VALUE_TABLE, &kv_headers, &key_values)?;
        info!(
            "merger: inserted {} key-value pairs into {KEY_VALUE_TABLE}",
            key_values.len()
        );
        report.key_value_rows = key_values.len();
        tx.commit()
            .map_err(|err| storage_error("vrs_db.merge_commit", err))?;
        Ok(report)
    }
}

fn collect_rows(
    conn: &Connection,
    entry: &CatalogEntry,
) -> Result<(Vec<String>, IndexSet<Row>), VrsError> {
    let mut headers = Vec::new();
    let mut rows = IndexSet::new();
    for alias in &entry.sources {
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {alias}.{}", quote_ident(&entry.name)))
            .map_err(|err| table_error("vrs_db.merge_scan", &entry.name, err))?;
        headers = stmt.column_names().into_iter().map(String::from).collect();
        let width = headers.len();
        let mut cursor = stmt
            .query([])
            .map_err(|err| table_error("vrs_db.merge_scan", &entry.name, err))?;
        while let Some(row) = cursor
            .next()
            .map_err(|err| table_error("vrs_db.merge_scan", &entry.name, err))?
        {
            let values =
                read_row(row, width).map_err(|err| table_error("vrs_db.merge_scan", &entry.name, err))?;
            rows.insert(values);
        }
    }
    Ok((headers, rows))
}

fn recreate_table(conn: &Connection, name: &str, sql: &str) -> Result<(), VrsError> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS main.{}", quote_ident(name)))
        .map_err(|err| table_error("vrs_db.merge_drop", name, err))?;
    conn.execute_batch(sql)
        .map_err(|err| table_error("vrs_db.merge_create", name, err))?;
    info!("merger: created table {name}");
    Ok(())
}

fn insert_rows(
    conn: &Connection,
    name: &str,
    headers: &[String],
    rows: &IndexSet<Row>,
) -> Result<(), VrsError> {
    if rows.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "INSERT INTO main.{} ({}) VALUES ({})",
        quote_ident(name),
        column_list(headers),
        placeholders(headers.len())
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|err| table_error("vrs_db.merge_insert", name, err))?;
    for row in rows {
        stmt.execute(params_from_iter(row.iter()))
            .map_err(|err| table_error("vrs_db.merge_insert", name, err))?;
    }
    Ok(())
}

fn table_error(code: &str, table: &str, err: impl ToString) -> VrsError {
    VrsError::Storage(ErrorInfo::new(code, err.to_string()).with_context("table", table))
}

/// Merges `sources` into `target`.
pub fn merge_stores(target: &Path, sources: &[PathBuf]) -> Result<MergeReport, VrsError> {
    Merger::open(target, sources)?.merge()
}
