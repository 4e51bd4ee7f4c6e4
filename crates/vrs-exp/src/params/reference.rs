use std::fmt;
use std::path::Path;

use tracing::{info, warn};
use vrs_core::{ErrorInfo, ExperimentScope, Metadata, VrsError};

use super::{Input, OutputSet, RunContext};
use crate::experiment::Experiment;
use crate::store::read_metadata;

/// A previous instance of experiment `E` used as an input.
///
/// The configured value is the instance identifier. The input contributes
/// `{E::TITLE: <instance id>}` to the snapshot and, during the run, exposes
/// the previous instance's outputs opened read-only from
/// `<base-dir>/<instance id>`.
pub struct ExperimentInput<E: Experiment> {
    default: Option<String>,
    instance: Option<String>,
    scope: Option<ExperimentScope>,
    outputs: E::Outputs,
    opened: Vec<&'static str>,
}

impl<E: Experiment> Default for ExperimentInput<E> {
    fn default() -> Self {
        Self {
            default: None,
            instance: None,
            scope: None,
            outputs: E::Outputs::default(),
            opened: Vec::new(),
        }
    }
}

impl<E: Experiment> fmt::Debug for ExperimentInput<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentInput")
            .field("title", &E::TITLE)
            .field("instance", &self.instance)
            .field("opened", &self.opened)
            .finish()
    }
}

impl<E: Experiment> ExperimentInput<E> {
    /// Reference that must be given on the command line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `instance_id` unless another one is configured.
    pub fn with_default(instance_id: impl Into<String>) -> Self {
        Self {
            default: Some(instance_id.into()),
            ..Self::default()
        }
    }

    /// Identifier of the referenced instance once extracted.
    pub fn instance_id(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Scope of the referenced instance while the run is set up.
    pub fn scope(&self) -> Option<&ExperimentScope> {
        self.scope.as_ref()
    }

    /// Result directory of the referenced instance once set up.
    pub fn result_directory(&self) -> Option<&Path> {
        self.scope.as_ref().map(ExperimentScope::directory)
    }

    /// Outputs of the referenced instance, opened read-only.
    pub fn outputs(&self) -> &E::Outputs {
        &self.outputs
    }

    /// Mutable access to the reopened outputs.
    pub fn outputs_mut(&mut self) -> &mut E::Outputs {
        &mut self.outputs
    }

    /// Metadata persisted by the referenced instance, including the
    /// fields that did not take part in hashing.
    pub fn stored_metadata(&self) -> Result<Metadata, VrsError> {
        let directory = self.result_directory().ok_or_else(|| {
            VrsError::Integrity(ErrorInfo::new(
                "vrs_exp.reference_unbound",
                format!("{} input has not been set up", E::TITLE),
            ))
        })?;
        read_metadata(directory)
    }

    fn close_opened(&mut self, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        let Self {
            scope,
            outputs,
            opened,
            ..
        } = self;
        let Some(owner) = scope.as_ref() else {
            opened.clear();
            return Ok(());
        };
        let nested = ctx.for_owner(owner);
        let mut first_error = None;
        while let Some(name) = opened.pop() {
            let Some(output) = outputs.output_mut(name) else {
                continue;
            };
            if let Err(err) = output.close_result(name, &nested) {
                warn!("{}: closing {name} failed: {err}", E::TITLE);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<E: Experiment> Input for ExperimentInput<E> {
    fn default_value(&self) -> Option<String> {
        self.default.clone()
    }

    fn extract(&mut self, name: &str, value: Option<&str>) -> Result<(), VrsError> {
        let instance = value
            .map(str::to_string)
            .or_else(|| self.default.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                VrsError::Configuration(
                    ErrorInfo::new(
                        "vrs_exp.missing_value",
                        format!("Missing argument for {}", E::TITLE),
                    )
                    .with_context("parameter", name)
                    .with_hint(format!("pass --{name} <{}-instance>", E::TITLE)),
                )
            })?;
        self.instance = Some(instance);
        Ok(())
    }

    fn metadata(&self, _name: &str) -> Metadata {
        self.instance
            .iter()
            .map(|id| (E::TITLE, id.as_str()))
            .collect()
    }

    fn setup_input(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        let Some(instance) = self.instance.clone() else {
            return Err(VrsError::Integrity(
                ErrorInfo::new("vrs_exp.reference_unset", "input was not extracted")
                    .with_context("parameter", name),
            ));
        };
        let directory = ctx.base_directory.join(&instance);
        if !directory.is_dir() {
            return Err(VrsError::NotFound(
                ErrorInfo::new("vrs_exp.missing_result", "referenced result does not exist")
                    .with_context("parameter", name)
                    .with_context("path", directory.display().to_string()),
            ));
        }
        info!("{name}: reading results of {instance}");
        self.scope = Some(ExperimentScope::new(E::TITLE, instance, directory));

        let mut opened_all = Ok(());
        {
            let Self {
                scope,
                outputs,
                opened,
                ..
            } = &mut *self;
            if let Some(owner) = scope.as_ref() {
                let nested = ctx.for_owner(owner);
                for output_name in outputs.output_names() {
                    let Some(output) = outputs.output_mut(output_name) else {
                        continue;
                    };
                    if let Err(err) = output.open_result(output_name, &nested) {
                        opened_all = Err(err);
                        break;
                    }
                    opened.push(output_name);
                }
            }
        }
        if let Err(err) = opened_all {
            if let Err(close_err) = self.close_opened(ctx) {
                warn!("{name}: cleanup after failed setup: {close_err}");
            }
            return Err(err);
        }
        Ok(())
    }

    fn teardown_input(&mut self, _name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.close_opened(ctx)
    }
}
