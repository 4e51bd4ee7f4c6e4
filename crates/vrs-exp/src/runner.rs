//! Drives one experiment invocation.
//!
//! Order of a run:
//! 1. parse options (`--list` stops after listing),
//! 2. extract every input value and collect the metadata snapshot,
//! 3. compute the instance identifier,
//! 4. set up inputs (reopened stores, referenced results),
//! 5. allocate the result directory and persist the metadata,
//! 6. set up outputs in declared order,
//! 7. run the body,
//! 8. tear down outputs, then inputs.
//!
//! Teardown covers exactly the parameters that were set up and happens even
//! when a later step fails; the first error is reported.

use std::collections::BTreeMap;
use std::error::Error;
use std::ffi::OsString;
use std::path::PathBuf;

use tracing::{info, warn};
use vrs_core::{compute_identifier, ErrorInfo, ExperimentScope, Metadata, VrsError};
use vrs_db::ConnectionRegistry;

use crate::experiment::Experiment;
use crate::listing::{list_results, render};
use crate::logging::init_logging;
use crate::options::{self, RunOptions};
use crate::params::{InputSet, OutputSet, RunContext};
use crate::store::ResultStore;

/// What an invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The experiment ran; its results are in `directory`.
    Completed {
        instance_id: String,
        directory: PathBuf,
    },
    /// `--list` was given; holds the rendered listing.
    Listed(String),
}

impl RunOutcome {
    /// Identifier of the completed instance.
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            RunOutcome::Completed { instance_id, .. } => Some(instance_id),
            RunOutcome::Listed(_) => None,
        }
    }
}

/// Owns an experiment together with its parameter records.
pub struct Runner<E: Experiment> {
    experiment: E,
    inputs: E::Inputs,
    outputs: E::Outputs,
    registry: ConnectionRegistry,
}

impl<E: Experiment> Runner<E> {
    /// Runner with default parameter records.
    pub fn new(experiment: E) -> Self {
        Self::with_parameters(experiment, E::Inputs::default(), E::Outputs::default())
    }

    /// Runner with explicitly constructed parameter records.
    pub fn with_parameters(experiment: E, inputs: E::Inputs, outputs: E::Outputs) -> Self {
        Self {
            experiment,
            inputs,
            outputs,
            registry: ConnectionRegistry::new(),
        }
    }

    /// Shares `registry` with other runners in this process.
    pub fn with_registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The experiment, including state its body recorded.
    pub fn experiment(&self) -> &E {
        &self.experiment
    }

    /// Input record as of the last run.
    pub fn inputs(&self) -> &E::Inputs {
        &self.inputs
    }

    /// Output record as of the last run.
    pub fn outputs(&self) -> &E::Outputs {
        &self.outputs
    }

    /// Connection registry used by this runner.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Runs with command-line arguments (the first one is the program name).
    pub fn execute<I, T>(&mut self, args: I) -> Result<RunOutcome, VrsError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        self.execute_with(args, &BTreeMap::new())
    }

    /// Runs with command-line arguments and programmatic input values, which
    /// take precedence over every other source.
    pub fn execute_with<I, T>(
        &mut self,
        args: I,
        overrides: &BTreeMap<String, String>,
    ) -> Result<RunOutcome, VrsError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let opts = options::parse(E::TITLE, &self.inputs, args, overrides)?;
        init_logging(opts.verbose);
        let base = opts.base_dir.canonicalize().map_err(|err| {
            VrsError::NotFound(
                ErrorInfo::new("vrs_exp.base_dir", err.to_string())
                    .with_context("path", opts.base_dir.display().to_string()),
            )
        })?;
        let store = ResultStore::new(&base);
        if opts.list {
            let listing = render(&list_results(&store, E::TITLE)?);
            return Ok(RunOutcome::Listed(listing));
        }
        self.run_instance(&opts, &store)
    }

    fn run_instance(
        &mut self,
        opts: &RunOptions,
        store: &ResultStore,
    ) -> Result<RunOutcome, VrsError> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", E::TITLE))
            .tempdir()
            .map_err(|err| VrsError::Storage(ErrorInfo::new("vrs_exp.scratch", err.to_string())))?;

        let metadata = self.extract_inputs(opts)?;
        let instance_id = compute_identifier(E::TITLE, &metadata, E::VERSION);
        let directory = store.path(&instance_id);
        let scope = ExperimentScope::new(E::TITLE, instance_id.clone(), directory.clone());
        info!("{}: running instance {instance_id}", E::TITLE);

        let input_ctx = RunContext {
            registry: &self.registry,
            base_directory: store.base(),
            directory: store.base(),
            owner: &scope,
            current: &scope,
            metadata: &metadata,
            scratch: scratch.path(),
        };
        let output_ctx = RunContext {
            directory: &directory,
            ..input_ctx
        };

        let mut ready_inputs = Vec::new();
        let mut ready_outputs = Vec::new();
        let mut result = setup_inputs(&mut self.inputs, &input_ctx, &mut ready_inputs);
        if result.is_ok() {
            result = store.allocate(&instance_id).and_then(|allocated| {
                store
                    .persist_metadata(&allocated, &metadata, E::TITLE, E::VERSION)
                    .map(|_| ())
            });
        }
        if result.is_ok() {
            result = setup_outputs(&mut self.outputs, &output_ctx, &mut ready_outputs);
        }
        if result.is_ok() {
            result = self
                .experiment
                .run(&output_ctx, &self.inputs, &mut self.outputs);
        }

        let outputs_down = teardown_outputs(&mut self.outputs, &output_ctx, &ready_outputs);
        let inputs_down = teardown_inputs(&mut self.inputs, &input_ctx, &ready_inputs);
        let scratch_path = scratch.path().to_path_buf();
        let scratch_down = scratch.close().map_err(|err| {
            VrsError::Storage(
                ErrorInfo::new("vrs_exp.scratch", err.to_string())
                    .with_context("path", scratch_path.display().to_string()),
            )
        });

        result.and(outputs_down).and(inputs_down).and(scratch_down)?;
        Ok(RunOutcome::Completed {
            instance_id,
            directory,
        })
    }

    fn extract_inputs(&mut self, opts: &RunOptions) -> Result<Metadata, VrsError> {
        let mut metadata = Metadata::new();
        for name in self.inputs.input_names() {
            let Some(input) = self.inputs.input_mut(name) else {
                continue;
            };
            input.extract(name, opts.value(name))?;
            metadata.extend(input.metadata(name));
        }
        Ok(metadata)
    }
}

fn setup_inputs<S: InputSet>(
    inputs: &mut S,
    ctx: &RunContext<'_>,
    ready: &mut Vec<&'static str>,
) -> Result<(), VrsError> {
    for name in inputs.input_names() {
        if let Some(input) = inputs.input_mut(name) {
            input.setup_input(name, ctx)?;
            ready.push(name);
        }
    }
    Ok(())
}

fn setup_outputs<S: OutputSet>(
    outputs: &mut S,
    ctx: &RunContext<'_>,
    ready: &mut Vec<&'static str>,
) -> Result<(), VrsError> {
    for name in outputs.output_names() {
        if let Some(output) = outputs.output_mut(name) {
            output.setup_output(name, ctx)?;
            ready.push(name);
        }
    }
    Ok(())
}

fn teardown_outputs<S: OutputSet>(
    outputs: &mut S,
    ctx: &RunContext<'_>,
    ready: &[&'static str],
) -> Result<(), VrsError> {
    let mut first_error = None;
    for name in ready {
        let Some(output) = outputs.output_mut(name) else {
            continue;
        };
        if let Err(err) = output.teardown_output(name, ctx) {
            warn!("tearing down output {name} failed: {err}");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn teardown_inputs<S: InputSet>(
    inputs: &mut S,
    ctx: &RunContext<'_>,
    ready: &[&'static str],
) -> Result<(), VrsError> {
    let mut first_error = None;
    for name in ready {
        let Some(input) = inputs.input_mut(name) else {
            continue;
        };
        if let Err(err) = input.teardown_input(name, ctx) {
            warn!("tearing down input {name} failed: {err}");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Runs `experiment` with the process arguments and prints the instance
/// identifier or the listing.
pub fn run_main<E: Experiment>(experiment: E) -> Result<(), Box<dyn Error>> {
    let mut runner = Runner::new(experiment);
    match runner.execute(std::env::args_os())? {
        RunOutcome::Completed { instance_id, .. } => println!("{instance_id}"),
        RunOutcome::Listed(listing) => print!("{listing}"),
    }
    Ok(())
}
