use std::path::Path;

use vrs_core::{ErrorInfo, VrsError};

use crate::value::{CellValue, Row};

pub(crate) fn storage_error(code: &str, err: impl ToString) -> VrsError {
    VrsError::Storage(ErrorInfo::new(code, err.to_string()))
}

pub(crate) fn path_error(code: &str, path: &Path, err: impl ToString) -> VrsError {
    VrsError::Storage(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn column_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn read_row(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Row> {
    let mut values = Vec::with_capacity(width);
    for idx in 0..width {
        values.push(row.get::<_, CellValue>(idx)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_escape_embedded_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn placeholders_are_numbered() {
        assert_eq!(placeholders(3), "?1, ?2, ?3");
        assert_eq!(column_list(&["a".into(), "b".into()]), "\"a\", \"b\"");
    }
}
