//! Result directories keyed by experiment instance identifier.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;
use vrs_core::serde::from_json_slice;
use vrs_core::{ErrorInfo, Metadata, VrsError, DATE_KEY, NAME_KEY, VERSION_KEY};

/// File inside every result directory holding the persisted snapshot.
pub const METADATA_FILE: &str = "metadata";

fn io_error(code: &str, path: &Path, err: impl ToString) -> VrsError {
    VrsError::Storage(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Reads `<directory>/metadata`.
pub fn read_metadata(directory: &Path) -> Result<Metadata, VrsError> {
    let path = directory.join(METADATA_FILE);
    if !path.is_file() {
        return Err(VrsError::NotFound(
            ErrorInfo::new("vrs_exp.metadata_missing", "result has no metadata file")
                .with_context("path", path.display().to_string()),
        ));
    }
    let bytes = fs::read(&path).map_err(|err| io_error("vrs_exp.metadata_read", &path, err))?;
    from_json_slice(&bytes).map_err(|err| {
        VrsError::Serde(
            ErrorInfo::new("vrs_exp.metadata_parse", err.info().message.clone())
                .with_context("path", path.display().to_string()),
        )
    })
}

/// Base directory holding one directory per experiment instance.
#[derive(Debug, Clone)]
pub struct ResultStore {
    base: PathBuf,
}

impl ResultStore {
    /// Store rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory of `instance_id`, whether or not it exists.
    pub fn path(&self, instance_id: &str) -> PathBuf {
        self.base.join(instance_id)
    }

    /// Creates an empty directory for `instance_id`.
    ///
    /// A directory left by an earlier run of the same instance is removed
    /// first; its contents are discarded, not resumed.
    pub fn allocate(&self, instance_id: &str) -> Result<PathBuf, VrsError> {
        let path = self.path(instance_id);
        if path.exists() {
            info!("output directory {} existed already, purging it", path.display());
            fs::remove_dir_all(&path).map_err(|err| io_error("vrs_exp.purge", &path, err))?;
        }
        fs::create_dir_all(&path).map_err(|err| io_error("vrs_exp.allocate", &path, err))?;
        Ok(path)
    }

    /// Writes `<directory>/metadata` and returns what was written.
    ///
    /// The identifier has already been computed from `metadata` at this
    /// point. The persisted copy additionally carries the date, title and
    /// version, which therefore never influence the identifier.
    pub fn persist_metadata(
        &self,
        directory: &Path,
        metadata: &Metadata,
        title: &str,
        version: u32,
    ) -> Result<Metadata, VrsError> {
        let mut persisted = metadata.clone();
        persisted.insert(
            DATE_KEY,
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        );
        persisted.insert(NAME_KEY, title);
        persisted.insert(VERSION_KEY, version.to_string());
        let path = directory.join(METADATA_FILE);
        let mut bytes = serde_json::to_vec_pretty(&persisted).map_err(|err| {
            VrsError::Serde(
                ErrorInfo::new("vrs_exp.metadata_serialize", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        bytes.push(b'\n');
        fs::write(&path, bytes).map_err(|err| io_error("vrs_exp.metadata_write", &path, err))?;
        Ok(persisted)
    }

    /// Reads the persisted metadata of `instance_id`.
    pub fn load_metadata(&self, instance_id: &str) -> Result<Metadata, VrsError> {
        read_metadata(&self.path(instance_id))
    }

    /// Instance directories of experiment `title`, sorted by name.
    pub fn instances(&self, title: &str) -> Result<Vec<String>, VrsError> {
        let prefix = format!("{title}-");
        let mut found: Vec<String> = self
            .entries()?
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect();
        found.sort();
        Ok(found)
    }

    /// Names of every directory in the base directory.
    pub fn entries(&self) -> Result<Vec<String>, VrsError> {
        let reader =
            fs::read_dir(&self.base).map_err(|err| io_error("vrs_exp.list", &self.base, err))?;
        let mut names = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|err| io_error("vrs_exp.list", &self.base, err))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
