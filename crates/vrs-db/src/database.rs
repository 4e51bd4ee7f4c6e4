use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, Rows, ToSql};
use tracing::{debug, warn};
use vrs_core::serde::to_canonical_json_string;
use vrs_core::{ErrorInfo, ExperimentScope, Metadata, VrsError};

use crate::registry::{ConnectionLease, ConnectionRegistry, Release};
use crate::sql::{path_error, quote_ident, storage_error};
use crate::value::{CellValue, Row};

/// File name used when a table is not given an explicit database.
pub const DEFAULT_DATABASE: &str = "sqlite3.db";
/// Bookkeeping table recording every instance that wrote to a store.
pub const METADATA_TABLE: &str = "metadata";
/// Column carrying the experiment instance identifier in every table.
pub const EXPERIMENT_COLUMN: &str = "experiment";

/// Whether a store is read for a previous result or written by this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read-only access to an existing store.
    Input,
    /// Writable access; the store is created when missing.
    Output,
}

/// Outcome of [`Database::ensure_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    /// The table was created by this call.
    Created,
    /// A table of that name was already present.
    Exists,
}

/// Column name and declared SQL type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared SQL type, e.g. `text` or `integer`.
    pub ty: String,
}

impl Column {
    /// Column `name` of type `ty`.
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }

    /// Column with the default `text` type.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, "text")
    }
}

impl From<&str> for Column {
    fn from(name: &str) -> Self {
        Column::text(name)
    }
}

impl From<(&str, &str)> for Column {
    fn from((name, ty): (&str, &str)) -> Self {
        Column::new(name, ty)
    }
}

/// Everything a store-backed parameter needs to attach to a run.
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    /// Registry the store connection is leased from.
    pub registry: &'a ConnectionRegistry,
    /// Configured parameter name.
    pub name: &'a str,
    /// Directory relative database paths resolve against.
    pub directory: &'a Path,
    /// Experiment declaring the parameter; its identifier scopes reads.
    pub owner: &'a ExperimentScope,
    /// Executing experiment; its identifier stamps written rows.
    pub current: &'a ExperimentScope,
    /// Hashed input snapshot of the executing experiment.
    pub metadata: &'a Metadata,
}

/// One-pass iterator over the rows of a query.
///
/// Rows are fetched lazily from the engine; the sequence cannot be restarted.
pub struct RowIter<'stmt> {
    rows: Rows<'stmt>,
    width: usize,
    skip: Option<usize>,
    done: bool,
}

impl<'stmt> RowIter<'stmt> {
    pub(crate) fn new(rows: Rows<'stmt>, width: usize, skip: Option<usize>) -> Self {
        Self {
            rows,
            width,
            skip,
            done: false,
        }
    }
}

impl Iterator for RowIter<'_> {
    type Item = Result<Row, VrsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rows.next() {
            Ok(Some(row)) => {
                let mut values = Vec::with_capacity(self.width);
                for idx in 0..self.width {
                    if Some(idx) == self.skip {
                        continue;
                    }
                    match row.get::<_, CellValue>(idx) {
                        Ok(value) => values.push(value),
                        Err(err) => {
                            self.done = true;
                            return Some(Err(storage_error("vrs_db.row_read", err)));
                        }
                    }
                }
                Some(Ok(values))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(storage_error("vrs_db.row_fetch", err)))
            }
        }
    }
}

pub(crate) fn create_table_sql(name: &str, fields: &[Column], primary: Option<&str>) -> String {
    let columns = fields
        .iter()
        .map(|field| {
            let mut column = format!("{} {}", quote_ident(&field.name), field.ty);
            if Some(field.name.as_str()) == primary {
                column.push_str(" PRIMARY KEY");
            }
            column
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({columns})", quote_ident(name))
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool, VrsError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .map_err(|err| storage_error("vrs_db.catalog", err))?;
    Ok(count > 0)
}

pub(crate) fn table_columns(conn: &Connection, name: &str) -> Result<Vec<Column>, VrsError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_ident(name)))
        .map_err(|err| storage_error("vrs_db.catalog", err))?;
    let rows = stmt
        .query_map([], |row| Ok(Column::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
        .map_err(|err| storage_error("vrs_db.catalog", err))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|err| storage_error("vrs_db.catalog", err))
}

fn make_read_only(path: &Path) -> Result<(), VrsError> {
    let mut permissions = fs::metadata(path)
        .map_err(|err| path_error("vrs_db.permissions", path, err))?
        .permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions).map_err(|err| path_error("vrs_db.permissions", path, err))
}

/// Restores owner write access on a store closed by an earlier output.
fn make_writable(path: &Path) -> Result<(), VrsError> {
    let Ok(metadata) = fs::metadata(path) else {
        return Ok(());
    };
    let mut permissions = metadata.permissions();
    if !permissions.readonly() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o200);
    }
    #[cfg(not(unix))]
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions).map_err(|err| path_error("vrs_db.permissions", path, err))
}

/// Handle to one SQLite store file, shared through a [`ConnectionRegistry`].
#[derive(Debug)]
pub struct Database {
    relative: PathBuf,
    resolved: Option<PathBuf>,
    lease: Option<ConnectionLease>,
    mode: Option<Mode>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE)
    }
}

impl Database {
    /// Database stored at `path`, resolved against the binding directory on open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            relative: path.into(),
            resolved: None,
            lease: None,
            mode: None,
        }
    }

    /// Configured path, relative to the directory it is bound in.
    pub fn relative_path(&self) -> &Path {
        &self.relative
    }

    /// Replaces the configured path; takes effect on the next open.
    pub fn set_relative_path(&mut self, path: impl Into<PathBuf>) {
        self.relative = path.into();
    }

    /// Resolved path of the store once the database has been opened.
    pub fn path(&self) -> Result<&Path, VrsError> {
        self.resolved.as_deref().ok_or_else(|| {
            VrsError::Integrity(
                ErrorInfo::new("vrs_db.unbound", "database has not been opened")
                    .with_context("path", self.relative.display().to_string()),
            )
        })
    }

    /// Mode the database was opened in, `None` while closed.
    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    /// Whether this handle holds a store reference.
    pub fn is_open(&self) -> bool {
        self.lease.is_some()
    }

    /// Connects to the store in `binding.directory`.
    ///
    /// Input stores must already exist. Output stores get the bookkeeping
    /// table and a row recording the executing instance and its snapshot.
    pub fn open(&mut self, binding: &Binding<'_>, mode: Mode) -> Result<(), VrsError> {
        if self.lease.is_some() {
            return Err(VrsError::Integrity(
                ErrorInfo::new("vrs_db.already_open", "database is already open")
                    .with_context("parameter", binding.name),
            ));
        }
        let path = binding.directory.join(&self.relative);
        if mode == Mode::Input && !path.exists() {
            return Err(VrsError::NotFound(
                ErrorInfo::new("vrs_db.missing", "database not found")
                    .with_context("path", path.display().to_string())
                    .with_context("parameter", binding.name),
            ));
        }
        if mode == Mode::Output && !binding.registry.is_open(&path) {
            make_writable(&path)?;
        }
        let lease = binding.registry.lease(&path)?;
        self.resolved = Some(path);
        self.lease = Some(lease);
        self.mode = Some(mode);
        if mode == Mode::Output {
            if let Err(err) = self.record_instance(binding) {
                self.abandon();
                return Err(err);
            }
        }
        Ok(())
    }

    fn record_instance(&self, binding: &Binding<'_>) -> Result<(), VrsError> {
        let fields = [Column::text(EXPERIMENT_COLUMN), Column::text(METADATA_TABLE)];
        self.ensure_table(METADATA_TABLE, &fields, Some(EXPERIMENT_COLUMN))?;
        let snapshot = to_canonical_json_string(binding.metadata)?;
        self.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({}, {}) VALUES (?1, ?2)",
                quote_ident(METADATA_TABLE),
                quote_ident(EXPERIMENT_COLUMN),
                quote_ident(METADATA_TABLE)
            ),
            &[&binding.current.instance_id, &snapshot],
        )?;
        Ok(())
    }

    /// Releases the store reference after a failed open.
    ///
    /// The error that made the open fail is the one reported; a failing
    /// release is only logged.
    pub(crate) fn abandon(&mut self) {
        self.mode = None;
        if let Some(lease) = self.lease.take() {
            if let Err(err) = lease.release() {
                warn!(
                    "sqlite: releasing {} after a failed open failed: {err}",
                    self.relative.display()
                );
            }
        }
    }

    /// Commits and releases this handle's reference to the store.
    ///
    /// An output store is made read-only once its last reference is gone.
    pub fn close(&mut self) -> Result<Release, VrsError> {
        let Some(lease) = self.lease.take() else {
            return Err(VrsError::Integrity(
                ErrorInfo::new("vrs_db.not_open", "database is not open")
                    .with_context("path", self.relative.display().to_string()),
            ));
        };
        let mode = self.mode.take();
        let released = lease.release()?;
        if mode == Some(Mode::Output) && released == Release::Closed {
            if let Some(path) = &self.resolved {
                make_read_only(path)?;
            }
        }
        Ok(released)
    }

    /// Runs `f` with the locked connection.
    ///
    /// Other threads wait until `f` returns. The current thread may call
    /// back into any database sharing the same store from inside `f`.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, VrsError>,
    ) -> Result<T, VrsError> {
        let Some(lease) = self.lease.as_ref() else {
            return Err(VrsError::Integrity(
                ErrorInfo::new("vrs_db.not_open", "database is not open")
                    .with_context("path", self.relative.display().to_string()),
            ));
        };
        let conn = lease.lock()?;
        f(&conn)
    }

    /// Executes one statement, binding `params` to its placeholders.
    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize, VrsError> {
        debug!("sqlite: {sql} ({} params)", params.len());
        self.with_connection(|conn| {
            conn.execute(sql, params).map_err(|err| {
                VrsError::Storage(
                    ErrorInfo::new("vrs_db.execute", err.to_string()).with_context("sql", sql),
                )
            })
        })
    }

    /// Issues `CREATE TABLE`; an existing table is reported as a storage error.
    pub fn create_table(
        &self,
        name: &str,
        fields: &[Column],
        primary: Option<&str>,
    ) -> Result<(), VrsError> {
        let sql = create_table_sql(name, fields, primary);
        self.execute(&sql, &[]).map(|_| ())
    }

    /// Creates the table unless a table of that name already exists.
    pub fn ensure_table(
        &self,
        name: &str,
        fields: &[Column],
        primary: Option<&str>,
    ) -> Result<TableStatus, VrsError> {
        if self.table_exists(name)? {
            return Ok(TableStatus::Exists);
        }
        self.create_table(name, fields, primary)?;
        Ok(TableStatus::Created)
    }

    /// Whether the store has a table called `name`.
    pub fn table_exists(&self, name: &str) -> Result<bool, VrsError> {
        self.with_connection(|conn| table_exists(conn, name))
    }

    /// Declared columns of an existing table, in order.
    pub fn table_columns(&self, name: &str) -> Result<Vec<Column>, VrsError> {
        self.with_connection(|conn| table_columns(conn, name))
    }

    /// Scans `table` with an optional `filter` clause (e.g. `WHERE experiment = ?1`).
    ///
    /// `f` receives the column names and a lazy row sequence.
    pub fn values<T>(
        &self,
        table: &str,
        filter: &str,
        params: &[&dyn ToSql],
        f: impl FnOnce(&[String], &mut RowIter<'_>) -> Result<T, VrsError>,
    ) -> Result<T, VrsError> {
        self.scan(table, filter, params, None, f)
    }

    pub(crate) fn scan<T>(
        &self,
        table: &str,
        filter: &str,
        params: &[&dyn ToSql],
        hidden: Option<&str>,
        f: impl FnOnce(&[String], &mut RowIter<'_>) -> Result<T, VrsError>,
    ) -> Result<T, VrsError> {
        let sql = format!("SELECT * FROM {} {filter}", quote_ident(table));
        debug!("sqlite: {sql} ({} params)", params.len());
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| storage_error("vrs_db.prepare", err))?;
            let mut columns: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();
            let skip = match hidden {
                Some(name) => {
                    let Some(idx) = columns.iter().position(|column| column == name) else {
                        return Err(VrsError::Integrity(
                            ErrorInfo::new("vrs_db.missing_column", "scoping column not found")
                                .with_context("table", table)
                                .with_context("column", name),
                        ));
                    };
                    Some(idx)
                }
                None => None,
            };
            let width = columns.len();
            if let Some(idx) = skip {
                columns.remove(idx);
            }
            let rows = stmt
                .query(params)
                .map_err(|err| storage_error("vrs_db.query", err))?;
            let mut iter = RowIter::new(rows, width, skip);
            f(&columns, &mut iter)
        })
    }
}
