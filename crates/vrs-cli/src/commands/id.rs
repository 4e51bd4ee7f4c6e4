use std::error::Error;

use clap::Args;
use vrs_core::{compute_identifier, Metadata};

#[derive(Args, Debug)]
pub struct IdArgs {
    /// Experiment title.
    #[arg(long)]
    pub title: String,
    /// Experiment version.
    #[arg(long, default_value_t = 1)]
    pub version: u32,
    /// Metadata entries as `key=value`.
    #[arg(value_name = "KEY=VALUE", value_parser = parse_entry)]
    pub entries: Vec<(String, String)>,
}

fn parse_entry(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

pub fn identifier(args: &IdArgs) -> String {
    let metadata: Metadata = args.entries.iter().cloned().collect();
    compute_identifier(&args.title, &metadata, args.version)
}

pub fn run(args: &IdArgs) -> Result<(), Box<dyn Error>> {
    println!("{}", identifier(args));
    Ok(())
}
