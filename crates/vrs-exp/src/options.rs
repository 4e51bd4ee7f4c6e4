//! Command line, configuration file and programmatic values for a run.
//!
//! A value for an input is taken from the first source that has one:
//! programmatic override, command line, YAML configuration, parameter default.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_yaml::Value;
use vrs_core::{ErrorInfo, VrsError};

use crate::params::InputSet;

const BASE_DIR: &str = "base-dir";
const LIST: &str = "list";
const VERBOSE: &str = "verbose";
const CONFIG: &str = "config";

/// Options of one experiment invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Directory holding the result directories.
    pub base_dir: PathBuf,
    /// List stored results instead of running.
    pub list: bool,
    /// Number of `-v` flags.
    pub verbose: u8,
    /// YAML file given with `--config`.
    pub config: Option<PathBuf>,
    /// Resolved value per input name; `None` when no source provides one.
    pub values: BTreeMap<String, Option<String>>,
}

impl RunOptions {
    /// Resolved value of input `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|value| value.as_deref())
    }
}

fn unknown_argument(name: &str) -> VrsError {
    VrsError::Configuration(
        ErrorInfo::new("vrs_exp.unknown_argument", format!("No argument called {name}"))
            .with_context("argument", name),
    )
}

/// Builds the command line interface of an experiment from its inputs.
pub fn command(title: &'static str, inputs: &dyn InputSet) -> Command {
    let mut cmd = Command::new(title)
        .about(format!("Run the {title} experiment"))
        .arg(
            Arg::new(BASE_DIR)
                .short('d')
                .long(BASE_DIR)
                .value_name("DIR")
                .default_value(".")
                .value_parser(value_parser!(PathBuf))
                .help("Directory which is used for storing the experiment data"),
        )
        .arg(
            Arg::new(LIST)
                .short('l')
                .long(LIST)
                .action(ArgAction::SetTrue)
                .help("List all experiment results"),
        )
        .arg(
            Arg::new(VERBOSE)
                .short('v')
                .long(VERBOSE)
                .action(ArgAction::Count)
                .help("Increase verbosity (specify multiple times for more)"),
        )
        .arg(
            Arg::new(CONFIG)
                .long(CONFIG)
                .value_name("YAML")
                .value_parser(value_parser!(PathBuf))
                .help("YAML file mapping input names to values"),
        );
    for name in inputs.input_names() {
        let Some(input) = inputs.input(name) else {
            continue;
        };
        if !input.takes_value() {
            continue;
        }
        let help = match input.default_value() {
            Some(default) => format!("Value of input {name} (default: {default})"),
            None => format!("Value of input {name}"),
        };
        cmd = cmd.arg(
            Arg::new(name)
                .long(name)
                .value_name("VALUE")
                .action(ArgAction::Set)
                .help(help),
        );
    }
    cmd
}

/// Reads a flat YAML mapping of input names to scalar values.
pub fn load_config(path: &Path) -> Result<BTreeMap<String, String>, VrsError> {
    let contents = fs::read_to_string(path).map_err(|err| {
        VrsError::Configuration(
            ErrorInfo::new("vrs_exp.config_read", err.to_string())
                .with_context("path", path.display().to_string()),
        )
    })?;
    let raw: BTreeMap<String, Value> = serde_yaml::from_str(&contents).map_err(|err| {
        VrsError::Configuration(
            ErrorInfo::new("vrs_exp.config_parse", err.to_string())
                .with_context("path", path.display().to_string()),
        )
    })?;
    let mut values = BTreeMap::new();
    for (name, value) in raw {
        let text = match value {
            Value::Null => continue,
            Value::String(text) => text,
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            _ => {
                return Err(VrsError::Configuration(
                    ErrorInfo::new("vrs_exp.config_value", "configuration values must be scalars")
                        .with_context("path", path.display().to_string())
                        .with_context("argument", name),
                ))
            }
        };
        values.insert(name, text);
    }
    Ok(values)
}

/// Parses `args` (including the program name) and resolves every input value.
pub fn parse<I, T>(
    title: &'static str,
    inputs: &dyn InputSet,
    args: I,
    overrides: &BTreeMap<String, String>,
) -> Result<RunOptions, VrsError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command(title, inputs)
        .try_get_matches_from(args)
        .map_err(|err| {
            VrsError::Configuration(
                ErrorInfo::new("vrs_exp.command_line", err.render().to_string())
                    .with_context("experiment", title),
            )
        })?;
    resolve(inputs, &matches, overrides)
}

fn resolve(
    inputs: &dyn InputSet,
    matches: &ArgMatches,
    overrides: &BTreeMap<String, String>,
) -> Result<RunOptions, VrsError> {
    let configurable: Vec<&'static str> = inputs
        .input_names()
        .into_iter()
        .filter(|name| inputs.input(name).is_some_and(|input| input.takes_value()))
        .collect();
    if let Some(name) = overrides
        .keys()
        .find(|name| !configurable.iter().any(|known| *known == name.as_str()))
    {
        return Err(unknown_argument(name));
    }
    let config = matches.get_one::<PathBuf>(CONFIG).cloned();
    let from_file = match &config {
        Some(path) => load_config(path)?,
        None => BTreeMap::new(),
    };
    if let Some(name) = from_file
        .keys()
        .find(|name| !configurable.iter().any(|known| *known == name.as_str()))
    {
        return Err(unknown_argument(name));
    }

    let mut values = BTreeMap::new();
    for name in configurable {
        let value = overrides
            .get(name)
            .cloned()
            .or_else(|| matches.get_one::<String>(name).cloned())
            .or_else(|| from_file.get(name).cloned())
            .or_else(|| inputs.input(name).and_then(|input| input.default_value()));
        values.insert(name.to_string(), value);
    }
    Ok(RunOptions {
        base_dir: matches
            .get_one::<PathBuf>(BASE_DIR)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(".")),
        list: matches.get_flag(LIST),
        verbose: matches.get_count(VERBOSE),
        config,
        values,
    })
}
