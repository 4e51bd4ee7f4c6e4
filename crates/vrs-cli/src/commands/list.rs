use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use vrs_core::serde::to_canonical_json_string;
use vrs_core::VrsError;
use vrs_exp::{list_results, render_listing, ResultStore};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Directory holding the result directories.
    #[arg(short = 'd', long, default_value = ".")]
    pub base_dir: PathBuf,
    /// Experiment title.
    #[arg(long)]
    pub title: String,
    /// Print the listing as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &ListArgs) -> Result<String, VrsError> {
    let entries = list_results(&ResultStore::new(&args.base_dir), &args.title)?;
    if args.json {
        to_canonical_json_string(&entries)
    } else {
        Ok(render_listing(&entries))
    }
}

pub fn run(args: &ListArgs) -> Result<(), Box<dyn Error>> {
    print!("{}", execute(args)?);
    Ok(())
}
