use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use tracing::info;
use vrs_core::serde::to_canonical_json_string;
use vrs_core::VrsError;
use vrs_db::{merge_stores, MergeReport, KEY_VALUE_TABLE};

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Store receiving the merged tables; created when missing.
    pub target: PathBuf,
    /// Stores to merge.
    pub sources: Vec<PathBuf>,
    /// Print the merge report as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn summary(report: &MergeReport) -> String {
    let mut lines: Vec<String> = report
        .tables
        .iter()
        .map(|table| format!("inserted {} rows into {}", table.rows, table.table))
        .collect();
    lines.push(format!(
        "inserted {} key-value pairs into {KEY_VALUE_TABLE}",
        report.key_value_rows
    ));
    lines.join("\n")
}

pub fn execute(args: &MergeArgs) -> Result<String, VrsError> {
    info!(
        "merging {} store(s) into {}",
        args.sources.len(),
        args.target.display()
    );
    let report = merge_stores(&args.target, &args.sources)?;
    if args.json {
        to_canonical_json_string(&report)
    } else {
        Ok(summary(&report))
    }
}

pub fn run(args: &MergeArgs) -> Result<(), Box<dyn Error>> {
    println!("{}", execute(args)?);
    Ok(())
}
