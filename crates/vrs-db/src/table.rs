use std::collections::{BTreeMap, BTreeSet};

use vrs_core::{ErrorInfo, VrsError};

use crate::database::{
    Binding, Column, Database, Mode, RowIter, TableStatus, EXPERIMENT_COLUMN,
};
use crate::registry::Release;
use crate::sql::{column_list, placeholders, quote_ident};
use crate::value::{CellValue, Row};

/// Table name for a parameter: `<title>__<suffix>`, where the suffix is the
/// part of the parameter name after its last hyphen.
pub fn table_name(title: &str, parameter: &str) -> String {
    let suffix = parameter
        .rfind('-')
        .map(|idx| &parameter[idx + 1..])
        .unwrap_or(parameter);
    format!("{title}__{suffix}")
}

#[derive(Debug, Clone)]
struct Bound {
    name: String,
    owner_id: String,
    writer_id: String,
    mode: Mode,
}

/// Relation whose rows are tagged with the experiment instance that wrote them.
///
/// The `experiment` column is prepended to the declared fields. Reads are
/// restricted to the owning instance and never show that column.
#[derive(Debug)]
pub struct Table {
    columns: Vec<Column>,
    index: Option<String>,
    database: Database,
    bound: Option<Bound>,
}

impl Table {
    /// Table with the given fields, stored in the default store file.
    pub fn new<I, C>(fields: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Column>,
    {
        let mut columns = vec![Column::text(EXPERIMENT_COLUMN)];
        columns.extend(fields.into_iter().map(Into::into));
        Self {
            columns,
            index: None,
            database: Database::default(),
            bound: None,
        }
    }

    /// Marks a declared field as the primary key.
    pub fn with_index(mut self, column: impl Into<String>) -> Self {
        self.index = Some(column.into());
        self
    }

    /// Stores the table in `database` instead of the default store file.
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = database;
        self
    }

    /// Declared columns including the experiment column.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Store the table lives in.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Mutable access to the store, e.g. to change its path before opening.
    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    /// Table name inside the store; only known once opened.
    pub fn name(&self) -> Result<&str, VrsError> {
        self.bound
            .as_ref()
            .map(|bound| bound.name.as_str())
            .ok_or_else(unbound)
    }

    /// Whether the table is open for output.
    pub fn is_writable(&self) -> bool {
        matches!(&self.bound, Some(bound) if bound.mode == Mode::Output)
    }

    /// Attaches the table to its store.
    ///
    /// In output mode the table is created if absent; an existing table must
    /// declare exactly the same columns.
    pub fn open(&mut self, binding: &Binding<'_>, mode: Mode) -> Result<(), VrsError> {
        self.database.open(binding, mode)?;
        let name = table_name(&binding.owner.title, binding.name);
        if mode == Mode::Output {
            if let Err(err) = self.prepare_output(&name) {
                self.database.abandon();
                return Err(err);
            }
        }
        self.bound = Some(Bound {
            name,
            owner_id: binding.owner.instance_id.clone(),
            writer_id: binding.current.instance_id.clone(),
            mode,
        });
        Ok(())
    }

    fn prepare_output(&self, name: &str) -> Result<(), VrsError> {
        let status = self
            .database
            .ensure_table(name, &self.columns, self.index.as_deref())?;
        if status == TableStatus::Exists {
            self.check_columns(name)?;
        }
        Ok(())
    }

    fn check_columns(&self, name: &str) -> Result<(), VrsError> {
        let existing = self.database.table_columns(name)?;
        let same = existing.len() == self.columns.len()
            && existing.iter().zip(&self.columns).all(|(found, declared)| {
                found.name == declared.name && found.ty.eq_ignore_ascii_case(&declared.ty)
            });
        if same {
            return Ok(());
        }
        let render = |columns: &[Column]| {
            columns
                .iter()
                .map(|column| format!("{} {}", column.name, column.ty))
                .collect::<Vec<_>>()
                .join(", ")
        };
        Err(VrsError::SchemaConflict(
            ErrorInfo::new("vrs_db.table_schema", "table exists with different columns")
                .with_context("table", name)
                .with_context("declared", render(&self.columns))
                .with_context("existing", render(&existing)),
        ))
    }

    /// Detaches the table and releases its store reference.
    pub fn close(&mut self) -> Result<Release, VrsError> {
        self.bound = None;
        self.database.close()
    }

    fn writable(&self) -> Result<&Bound, VrsError> {
        match &self.bound {
            Some(bound) if bound.mode == Mode::Output => Ok(bound),
            Some(bound) => Err(VrsError::Integrity(
                ErrorInfo::new("vrs_db.table_read_only", "table is not in output mode")
                    .with_context("table", bound.name.clone()),
            )),
            None => Err(VrsError::Integrity(ErrorInfo::new(
                "vrs_db.table_read_only",
                "table is not open for output",
            ))),
        }
    }

    /// Inserts one row stamped with the executing instance identifier.
    ///
    /// The row must name exactly the declared fields.
    pub fn insert<I, K, V>(&self, row: I) -> Result<(), VrsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<CellValue>,
    {
        let bound = self.writable()?;
        let mut data: BTreeMap<String, CellValue> = row
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        data.insert(
            EXPERIMENT_COLUMN.to_string(),
            CellValue::Text(bound.writer_id.clone()),
        );
        let declared: BTreeSet<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let given: BTreeSet<&str> = data.keys().map(String::as_str).collect();
        if declared != given {
            return Err(VrsError::Integrity(
                ErrorInfo::new("vrs_db.column_mismatch", "row does not match declared columns")
                    .with_context("table", bound.name.clone())
                    .with_context("declared", join(&declared))
                    .with_context("given", join(&given)),
            ));
        }
        let names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&bound.name),
            column_list(&names),
            placeholders(names.len())
        );
        let values: Vec<&CellValue> = names.iter().filter_map(|name| data.get(name)).collect();
        let params: Vec<&dyn rusqlite::ToSql> =
            values.iter().map(|value| *value as &dyn rusqlite::ToSql).collect();
        self.database.execute(&sql, &params).map(|_| ())
    }

    /// Removes every row written by the executing instance.
    pub fn clear(&self) -> Result<usize, VrsError> {
        let bound = self.writable()?;
        self.database.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                quote_ident(&bound.name),
                quote_ident(EXPERIMENT_COLUMN)
            ),
            &[&bound.writer_id],
        )
    }

    /// Streams the owning instance's rows without the experiment column.
    pub fn select<T>(
        &self,
        f: impl FnOnce(&[String], &mut RowIter<'_>) -> Result<T, VrsError>,
    ) -> Result<T, VrsError> {
        let bound = self.bound.as_ref().ok_or_else(unbound)?;
        self.database.scan(
            &bound.name,
            &format!("WHERE {} = ?1", quote_ident(EXPERIMENT_COLUMN)),
            &[&bound.owner_id],
            Some(EXPERIMENT_COLUMN),
            f,
        )
    }

    /// Materializes the owning instance's rows.
    pub fn value(&self) -> Result<(Vec<String>, Vec<Row>), VrsError> {
        self.select(|columns, rows| {
            let rows = rows.collect::<Result<Vec<_>, _>>()?;
            Ok((columns.to_vec(), rows))
        })
    }
}

fn unbound() -> VrsError {
    VrsError::Integrity(ErrorInfo::new("vrs_db.unbound", "table has not been opened"))
}

fn join(names: &BTreeSet<&str>) -> String {
    names.iter().copied().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_keeps_segment_after_last_hyphen() {
        assert_eq!(table_name("Sweep", "results"), "Sweep__results");
        assert_eq!(table_name("Sweep", "phase-2-results"), "Sweep__results");
        assert_eq!(table_name("Sweep", "trailing-"), "Sweep__");
    }

    #[test]
    fn experiment_column_is_prepended() {
        let table = Table::new(["key", "value"]);
        let names: Vec<_> = table.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["experiment", "key", "value"]);
        assert!(!table.is_writable());
    }
}
