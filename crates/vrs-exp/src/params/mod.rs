//! Parameter capabilities and the typed parameter records experiments declare.
//!
//! A parameter is usable as an input when it implements [`Input`] and as an
//! output when it implements [`Output`]. Experiments group their parameters
//! in plain structs generated by [`parameters!`](crate::parameters), which
//! expose named fields and keyed lookup in declared order.

mod reference;
mod storage;
mod value;

use std::path::Path;

use vrs_core::{ExperimentScope, Metadata, VrsError};
use vrs_db::{Binding, ConnectionRegistry};

pub use reference::ExperimentInput;
pub use value::{Integer, Text};

/// Run state handed to parameters and to the experiment body.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// Registry shared by every store-backed parameter of the run.
    pub registry: &'a ConnectionRegistry,
    /// Directory passed as `--base-dir`.
    pub base_directory: &'a Path,
    /// Directory relative parameter paths resolve against: the base
    /// directory for inputs, the result directory for outputs.
    pub directory: &'a Path,
    /// Experiment that declares the parameters being handled.
    pub owner: &'a ExperimentScope,
    /// Experiment that is executing.
    pub current: &'a ExperimentScope,
    /// Hashed input snapshot of the executing experiment.
    pub metadata: &'a Metadata,
    /// Scratch directory removed after the run.
    pub scratch: &'a Path,
}

impl<'a> RunContext<'a> {
    /// Store binding for the parameter called `name`.
    pub fn binding<'b>(&'b self, name: &'b str) -> Binding<'b> {
        Binding {
            registry: self.registry,
            name,
            directory: self.directory,
            owner: self.owner,
            current: self.current,
            metadata: self.metadata,
        }
    }

    /// Same run, handling the parameters of another experiment rooted at
    /// that experiment's result directory.
    pub fn for_owner(&self, owner: &'a ExperimentScope) -> RunContext<'a> {
        RunContext {
            directory: owner.directory(),
            owner,
            ..*self
        }
    }

    /// Output directory of the executing experiment.
    pub fn output_directory(&self) -> &'a Path {
        self.current.directory()
    }
}

/// Input capability: configured from the command line, contributes to the
/// metadata snapshot and may acquire resources before the run.
pub trait Input {
    /// Whether the parameter is configured through a command-line value.
    fn takes_value(&self) -> bool {
        true
    }

    /// Value used when neither the command line nor the configuration sets one.
    fn default_value(&self) -> Option<String> {
        None
    }

    /// Applies the configured value. Called once, before the identifier
    /// is computed.
    fn extract(&mut self, _name: &str, _value: Option<&str>) -> Result<(), VrsError> {
        Ok(())
    }

    /// Contribution to the metadata snapshot.
    fn metadata(&self, _name: &str) -> Metadata {
        Metadata::new()
    }

    fn setup_input(&mut self, _name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        Ok(())
    }

    fn teardown_input(&mut self, _name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        Ok(())
    }
}

/// Output capability: set up in the result directory before the run body,
/// torn down after it.
pub trait Output {
    fn setup_output(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError>;

    fn teardown_output(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError>;

    /// Reopens the value a previous instance wrote, read-only.
    fn open_result(&mut self, _name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        Ok(())
    }

    fn close_result(&mut self, _name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        Ok(())
    }
}

/// Keyed access to an experiment's inputs.
pub trait InputSet {
    /// Parameter names in declared order.
    fn input_names(&self) -> Vec<&'static str>;
    fn input(&self, name: &str) -> Option<&dyn Input>;
    fn input_mut(&mut self, name: &str) -> Option<&mut dyn Input>;
}

/// Keyed access to an experiment's outputs.
pub trait OutputSet {
    /// Parameter names in declared order.
    fn output_names(&self) -> Vec<&'static str>;
    fn output(&self, name: &str) -> Option<&dyn Output>;
    fn output_mut(&mut self, name: &str) -> Option<&mut dyn Output>;
}

impl InputSet for () {
    fn input_names(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn input(&self, _name: &str) -> Option<&dyn Input> {
        None
    }

    fn input_mut(&mut self, _name: &str) -> Option<&mut dyn Input> {
        None
    }
}

impl OutputSet for () {
    fn output_names(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn output(&self, _name: &str) -> Option<&dyn Output> {
        None
    }

    fn output_mut(&mut self, _name: &str) -> Option<&mut dyn Output> {
        None
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __parameter_key {
    ($field:ident) => {
        stringify!($field)
    };
    ($field:ident, $key:literal) => {
        $key
    };
}

/// Declares a parameter record.
///
/// Each field is a parameter; its configured name is the field name unless
/// given with `as "name"`. The record implements `Default` from the
/// initializers, plus [`InputSet`] (`inputs`) or [`OutputSet`] (`outputs`).
///
/// ```
/// use vrs_exp::{parameters, Integer, Text};
///
/// parameters! {
///     inputs struct SweepInputs {
///         seed: Integer = Integer::new(7),
///         label as "run-label": Text = Text::new("baseline"),
///     }
/// }
///
/// let inputs = SweepInputs::default();
/// assert_eq!(vrs_exp::InputSet::input_names(&inputs), ["seed", "run-label"]);
/// ```
#[macro_export]
macro_rules! parameters {
    (
        $(#[$meta:meta])*
        inputs struct $name:ident {
            $($field:ident $(as $key:literal)? : $ty:ty = $init:expr),* $(,)?
        }
    ) => {
        $crate::parameters!(@record $(#[$meta])* $name { $($field: $ty = $init),* });

        impl $crate::InputSet for $name {
            fn input_names(&self) -> ::std::vec::Vec<&'static str> {
                vec![$($crate::__parameter_key!($field $(, $key)?)),*]
            }

            fn input(&self, name: &str) -> ::std::option::Option<&dyn $crate::Input> {
                $(if name == $crate::__parameter_key!($field $(, $key)?) {
                    return Some(&self.$field);
                })*
                let _ = name;
                None
            }

            fn input_mut(&mut self, name: &str) -> ::std::option::Option<&mut dyn $crate::Input> {
                $(if name == $crate::__parameter_key!($field $(, $key)?) {
                    return Some(&mut self.$field);
                })*
                let _ = name;
                None
            }
        }
    };
    (
        $(#[$meta:meta])*
        outputs struct $name:ident {
            $($field:ident $(as $key:literal)? : $ty:ty = $init:expr),* $(,)?
        }
    ) => {
        $crate::parameters!(@record $(#[$meta])* $name { $($field: $ty = $init),* });

        impl $crate::OutputSet for $name {
            fn output_names(&self) -> ::std::vec::Vec<&'static str> {
                vec![$($crate::__parameter_key!($field $(, $key)?)),*]
            }

            fn output(&self, name: &str) -> ::std::option::Option<&dyn $crate::Output> {
                $(if name == $crate::__parameter_key!($field $(, $key)?) {
                    return Some(&self.$field);
                })*
                let _ = name;
                None
            }

            fn output_mut(&mut self, name: &str) -> ::std::option::Option<&mut dyn $crate::Output> {
                $(if name == $crate::__parameter_key!($field $(, $key)?) {
                    return Some(&mut self.$field);
                })*
                let _ = name;
                None
            }
        }
    };
    (@record $(#[$meta:meta])* $name:ident { $($field:ident : $ty:ty = $init:expr),* }) => {
        $(#[$meta])*
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                Self {
                    $($field: $init,)*
                }
            }
        }
    };
}
