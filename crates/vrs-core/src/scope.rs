use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifies one experiment instance and where its results live.
///
/// A parameter sees two scopes: the experiment that declares it (whose
/// results it reads and whose title names its tables) and the experiment
/// that is currently executing (whose identifier stamps written rows).
/// Both are the same instance unless a previous result is reopened as input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentScope {
    /// Experiment title; prefixes the instance identifier and table names.
    pub title: String,
    /// `<title>-<digest>` identifier of the instance.
    pub instance_id: String,
    /// Result directory of the instance.
    pub directory: PathBuf,
}

impl ExperimentScope {
    /// Describes instance `instance_id` of `title` stored in `directory`.
    pub fn new(
        title: impl Into<String>,
        instance_id: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            title: title.into(),
            instance_id: instance_id.into(),
            directory: directory.into(),
        }
    }

    /// Result directory of the instance.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
