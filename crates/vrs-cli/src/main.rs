use std::error::Error;

use clap::{ArgAction, Parser, Subcommand};
use commands::{
    id::{self, IdArgs},
    list::{self, ListArgs},
    merge::{self, MergeArgs},
};
use vrs_exp::init_logging;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "vrs", about = "Reproducible experiment result tools")]
struct Cli {
    /// Increase verbosity (specify multiple times for more).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge experiment stores into a single target store.
    Merge(MergeArgs),
    /// List the stored results of an experiment.
    List(ListArgs),
    /// Print the instance identifier for a metadata snapshot.
    Id(IdArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Command::Merge(args) => merge::run(&args),
        Command::List(args) => list::run(&args),
        Command::Id(args) => id::run(&args),
    }
}
