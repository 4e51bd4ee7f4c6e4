//! Experiment-scoped SQLite storage: shared connections, tables and store merging.

pub mod database;
pub mod dict;
pub mod merge;
pub mod registry;
mod sql;
pub mod table;
pub mod value;

pub use database::{
    Binding, Column, Database, Mode, RowIter, TableStatus, DEFAULT_DATABASE, EXPERIMENT_COLUMN,
    METADATA_TABLE,
};
pub use dict::TableDict;
pub use merge::{merge_stores, CatalogEntry, MergeReport, Merger, TableMergeReport, KEY_VALUE_TABLE};
pub use registry::{ConnectionLease, ConnectionRegistry, RegistryStats, Release, SharedConnection};
pub use sql::quote_ident;
pub use table::{table_name, Table};
pub use value::{CellValue, Row};
