use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use tracing::warn;
use vrs_core::{ErrorInfo, VrsError};

use crate::database::{Binding, Column, Database, Mode};
use crate::registry::Release;
use crate::table::Table;
use crate::value::CellValue;

const KEY_COLUMN: &str = "key";
const VALUE_COLUMN: &str = "value";

/// String map persisted in a `(experiment, key, value)` table.
///
/// Input mode loads the owning instance's entries when opened. Output mode
/// keeps mutations in memory and rewrites the instance's rows on close, so
/// readers never observe intermediate states.
#[derive(Debug)]
pub struct TableDict {
    table: Table,
    entries: BTreeMap<String, String>,
}

impl Default for TableDict {
    fn default() -> Self {
        Self::new()
    }
}

impl TableDict {
    /// Empty dict stored in the default store file.
    pub fn new() -> Self {
        Self {
            table: Table::new([Column::text(KEY_COLUMN), Column::text(VALUE_COLUMN)]),
            entries: BTreeMap::new(),
        }
    }

    /// Stores the dict in `database` instead of the default store file.
    pub fn with_database(mut self, database: Database) -> Self {
        self.table = self.table.with_database(database);
        self
    }

    /// Backing table.
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Attaches to the store; input mode loads the owning instance's entries.
    pub fn open(&mut self, binding: &Binding<'_>, mode: Mode) -> Result<(), VrsError> {
        self.table.open(binding, mode)?;
        if mode == Mode::Input {
            match self.load() {
                Ok(entries) => self.entries = entries,
                Err(err) => {
                    if let Err(release) = self.table.close() {
                        warn!("dict: releasing store after a failed load failed: {release}");
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn load(&self) -> Result<BTreeMap<String, String>, VrsError> {
        self.table.select(|columns, rows| {
            let key_idx = columns.iter().position(|c| c == KEY_COLUMN);
            let value_idx = columns.iter().position(|c| c == VALUE_COLUMN);
            let (Some(key_idx), Some(value_idx)) = (key_idx, value_idx) else {
                return Err(VrsError::Integrity(ErrorInfo::new(
                    "vrs_db.dict_columns",
                    "key/value columns missing",
                )));
            };
            let mut entries = BTreeMap::new();
            for row in rows {
                let row = row?;
                entries.insert(text(&row[key_idx]), text(&row[value_idx]));
            }
            Ok(entries)
        })
    }

    /// Replaces the executing instance's rows with the in-memory entries.
    pub fn flush(&self) -> Result<(), VrsError> {
        self.table.clear()?;
        for (key, value) in &self.entries {
            self.table.insert([(KEY_COLUMN, key), (VALUE_COLUMN, value)])?;
        }
        Ok(())
    }

    /// Flushes (in output mode) and releases the store reference.
    pub fn close(&mut self) -> Result<Release, VrsError> {
        let flushed = if self.table.is_writable() {
            self.flush()
        } else {
            Ok(())
        };
        let released = self.table.close();
        flushed?;
        released
    }
}

fn text(value: &CellValue) -> String {
    match value {
        CellValue::Text(text) => text.clone(),
        other => other.to_string(),
    }
}

impl Deref for TableDict {
    type Target = BTreeMap<String, String>;

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl DerefMut for TableDict {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entries
    }
}
