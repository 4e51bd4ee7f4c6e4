use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// One column value of a stored row.
///
/// Equality and hashing are total over every storage class so rows can be
/// deduplicated in hash sets: reals compare by bit pattern after folding
/// `-0.0` onto `0.0` and every NaN onto a single NaN.
#[derive(Debug, Clone)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// A row as a list of cell values in column order.
pub type Row = Vec<CellValue>;

fn real_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0
    } else {
        value.to_bits()
    }
}

impl CellValue {
    /// Text content, if the cell holds text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Whether the cell is SQL `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    fn tag(&self) -> u8 {
        match self {
            CellValue::Null => 0,
            CellValue::Integer(_) => 1,
            CellValue::Real(_) => 2,
            CellValue::Text(_) => 3,
            CellValue::Blob(_) => 4,
        }
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CellValue::Null, CellValue::Null) => true,
            (CellValue::Integer(a), CellValue::Integer(b)) => a == b,
            (CellValue::Real(a), CellValue::Real(b)) => real_bits(*a) == real_bits(*b),
            (CellValue::Text(a), CellValue::Text(b)) => a == b,
            (CellValue::Blob(a), CellValue::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for CellValue {}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        match self {
            CellValue::Null => {}
            CellValue::Integer(value) => value.hash(state),
            CellValue::Real(value) => real_bits(*value).hash(state),
            CellValue::Text(value) => value.hash(state),
            CellValue::Blob(value) => value.hash(state),
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Integer(value) => write!(f, "{value}"),
            CellValue::Real(value) => write!(f, "{value}"),
            CellValue::Text(value) => write!(f, "{value}"),
            CellValue::Blob(value) => write!(f, "x'{}'", hex::encode(value)),
        }
    }
}

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            CellValue::Null => ValueRef::Null,
            CellValue::Integer(value) => ValueRef::Integer(*value),
            CellValue::Real(value) => ValueRef::Real(*value),
            CellValue::Text(value) => ValueRef::Text(value.as_bytes()),
            CellValue::Blob(value) => ValueRef::Blob(value),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

impl FromSql for CellValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(value) => CellValue::Integer(value),
            ValueRef::Real(value) => CellValue::Real(value),
            ValueRef::Text(bytes) => CellValue::Text(
                String::from_utf8(bytes.to_vec()).map_err(|err| FromSqlError::Other(Box::new(err)))?,
            ),
            ValueRef::Blob(bytes) => CellValue::Blob(bytes.to_vec()),
        })
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<&String> for CellValue {
    fn from(value: &String) -> Self {
        CellValue::Text(value.clone())
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        CellValue::Integer(i64::from(value))
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Real(value)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(value: Vec<u8>) -> Self {
        CellValue::Blob(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn reals_fold_signed_zero_and_nan() {
        assert_eq!(CellValue::Real(0.0), CellValue::Real(-0.0));
        assert_eq!(CellValue::Real(f64::NAN), CellValue::Real(-f64::NAN));
        let mut set = HashSet::new();
        set.insert(CellValue::Real(0.0));
        set.insert(CellValue::Real(-0.0));
        set.insert(CellValue::Real(f64::NAN));
        set.insert(CellValue::Real(f64::NAN));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn storage_classes_never_compare_equal() {
        assert_ne!(CellValue::Integer(1), CellValue::Real(1.0));
        assert_ne!(CellValue::Text("1".into()), CellValue::Integer(1));
        assert_ne!(CellValue::Null, CellValue::Text(String::new()));
    }

    #[test]
    fn display_renders_blobs_as_hex_literals() {
        assert_eq!(CellValue::Blob(vec![0xde, 0xad]).to_string(), "x'dead'");
        assert_eq!(CellValue::from(None::<i64>).to_string(), "NULL");
    }
}
