//! Reproducible experiment runs: typed parameters, content-addressed result
//! directories and the lifecycle that ties them to the SQLite backend.

pub mod experiment;
pub mod listing;
pub mod logging;
pub mod options;
pub mod params;
pub mod runner;
pub mod store;

pub use experiment::Experiment;
pub use listing::{list_results, render as render_listing, ListingEntry};
pub use logging::init_logging;
pub use options::RunOptions;
pub use params::{
    ExperimentInput, Input, InputSet, Integer, Output, OutputSet, RunContext, Text,
};
pub use runner::{run_main, RunOutcome, Runner};
pub use store::{read_metadata, ResultStore, METADATA_FILE};

pub use vrs_core::{ExperimentScope, Metadata, VrsError};
pub use vrs_db::{Column, Database, Table, TableDict};
