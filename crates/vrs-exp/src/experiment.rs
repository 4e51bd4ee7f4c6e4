use vrs_core::VrsError;

use crate::params::{InputSet, OutputSet, RunContext};

/// A reproducible experiment definition.
///
/// The instance identifier is derived from the title, the version and the
/// metadata every input contributes; see [`crate::Runner`] for the order in
/// which parameters are handled around [`Experiment::run`].
pub trait Experiment {
    /// Names result directories and tables.
    const TITLE: &'static str;
    /// Participates in the identifier; bump it when `run` changes meaning.
    const VERSION: u32 = 1;

    type Inputs: InputSet + Default;
    type Outputs: OutputSet + Default;

    /// Experiment body. Inputs are resolved and outputs set up before it is
    /// called; outputs are torn down afterwards whether it succeeds or not.
    fn run(
        &mut self,
        ctx: &RunContext<'_>,
        inputs: &Self::Inputs,
        outputs: &mut Self::Outputs,
    ) -> Result<(), VrsError>;
}
