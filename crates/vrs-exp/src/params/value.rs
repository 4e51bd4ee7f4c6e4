use vrs_core::{ErrorInfo, Metadata, VrsError};

use super::Input;

fn missing(name: &str) -> VrsError {
    VrsError::Configuration(
        ErrorInfo::new("vrs_exp.missing_value", format!("Missing argument for {name}"))
            .with_context("parameter", name)
            .with_hint(format!("pass --{name} <value>")),
    )
}

/// Free-form string input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Text {
    default: Option<String>,
    value: Option<String>,
}

impl Text {
    /// Text input defaulting to `default`.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: Some(default.into()),
            value: None,
        }
    }

    /// Text input that must be configured.
    pub fn required() -> Self {
        Self::default()
    }

    /// Configured value, or the default before extraction.
    pub fn value(&self) -> &str {
        self.value
            .as_deref()
            .or(self.default.as_deref())
            .unwrap_or_default()
    }
}

impl Input for Text {
    fn default_value(&self) -> Option<String> {
        self.default.clone()
    }

    fn extract(&mut self, name: &str, value: Option<&str>) -> Result<(), VrsError> {
        let value = value
            .map(str::to_string)
            .or_else(|| self.default.clone())
            .ok_or_else(|| missing(name))?;
        self.value = Some(value);
        Ok(())
    }

    fn metadata(&self, name: &str) -> Metadata {
        [(name, self.value())].into_iter().collect()
    }
}

/// Signed integer input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Integer {
    default: Option<i64>,
    value: Option<i64>,
}

impl Integer {
    /// Integer input defaulting to `default`.
    pub fn new(default: i64) -> Self {
        Self {
            default: Some(default),
            value: None,
        }
    }

    /// Integer input that must be configured.
    pub fn required() -> Self {
        Self::default()
    }

    /// Extracted value; the default before extraction.
    pub fn value(&self) -> i64 {
        self.value.or(self.default).unwrap_or_default()
    }
}

impl Input for Integer {
    fn default_value(&self) -> Option<String> {
        self.default.map(|value| value.to_string())
    }

    fn extract(&mut self, name: &str, value: Option<&str>) -> Result<(), VrsError> {
        let parsed = match value {
            Some(raw) => raw.trim().parse::<i64>().map_err(|err| {
                VrsError::Configuration(
                    ErrorInfo::new("vrs_exp.invalid_integer", err.to_string())
                        .with_context("parameter", name)
                        .with_context("value", raw),
                )
            })?,
            None => self.default.ok_or_else(|| missing(name))?,
        };
        self.value = Some(parsed);
        Ok(())
    }

    fn metadata(&self, name: &str) -> Metadata {
        [(name.to_string(), self.value().to_string())]
            .into_iter()
            .collect()
    }
}
