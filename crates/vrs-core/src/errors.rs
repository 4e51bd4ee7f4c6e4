//! Structured error types shared across the workspace.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`VrsError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (paths, table names, identifiers).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for experiment runs, result stores and merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum VrsError {
    /// A required input value is missing or cannot be parsed.
    #[error("configuration error: {0}")]
    Configuration(ErrorInfo),
    /// An input store or result directory does not exist.
    #[error("not found: {0}")]
    NotFound(ErrorInfo),
    /// Two stores declare the same table with different definitions.
    #[error("schema conflict: {0}")]
    SchemaConflict(ErrorInfo),
    /// A row or lifecycle operation violates the declared contract.
    #[error("integrity error: {0}")]
    Integrity(ErrorInfo),
    /// Filesystem or database engine failure.
    #[error("storage error: {0}")]
    Storage(ErrorInfo),
    /// Serialization and parsing errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl VrsError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            VrsError::Configuration(info)
            | VrsError::NotFound(info)
            | VrsError::SchemaConflict(info)
            | VrsError::Integrity(info)
            | VrsError::Storage(info)
            | VrsError::Serde(info) => info,
        }
    }

    /// Returns the stable code of the payload.
    pub fn code(&self) -> &str {
        &self.info().code
    }
}
