//! In-memory tables produced by the workbook decoder and consumed by the transforms.

use std::fmt::Display;

/// A scalar cell value.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// Absent or empty cell
    #[default]
    Null,
    /// Boolean cell
    Bool(bool),
    /// Numeric cell
    Number(f64),
    /// Text cell, including date/time cells rendered in ISO form
    Text(String),
}

impl Value {
    /// Returns true for the null marker.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// String form of the value used for grouping keys and output names.
    ///
    /// Integral numbers drop their fraction (`3`, not `3.0`), booleans are
    /// `True`/`False` and null is `None`, so every key maps to exactly one
    /// deterministic label.
    pub fn label(&self) -> String {
        match self {
            Value::Null => "None".to_owned(),
            Value::Bool(true) => "True".to_owned(),
            Value::Bool(false) => "False".to_owned(),
            Value::Number(number) => format_number(*number),
            Value::Text(text) => text.to_owned(),
        }
    }

    /// Key used to compare values for grouping.
    ///
    /// Numbers compare by bit pattern after normalizing `-0.0`, which keeps
    /// grouping total even for NaN.
    pub(crate) fn group_key(&self) -> GroupKey {
        match self {
            Value::Null => GroupKey::Null,
            Value::Bool(value) => GroupKey::Bool(*value),
            Value::Number(number) => {
                let number = if *number == 0.0 { 0.0 } else { *number };
                GroupKey::Number(number.to_bits())
            }
            Value::Text(text) => GroupKey::Text(text.to_owned()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            _ => write!(f, "{}", self.label()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Hashable identity of a value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum GroupKey {
    Null,
    Bool(bool),
    Number(u64),
    Text(String),
}

/// Formats a number the way a spreadsheet user expects to read it back.
pub(crate) fn format_number(number: f64) -> String {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

/// One sheet of data: ordered column names and rows aligned with them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TabularDataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TabularDataset {
    /// Creates a dataset, padding short rows with nulls and truncating long ones
    /// so that every row has exactly one value per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in order; each row is aligned with [`TabularDataset::columns`].
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    /// New dataset with the same header and the rows at the given indexes.
    pub(crate) fn select(&self, indexes: &[usize]) -> Self {
        let rows = indexes
            .iter()
            .filter_map(|index| self.rows.get(*index).cloned())
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }
}

/// A dataset together with the sheet name or file stem it is written under.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedDataset {
    pub name: String,
    pub dataset: TabularDataset,
}

impl NamedDataset {
    pub fn new(name: impl Into<String>, dataset: TabularDataset) -> Self {
        Self {
            name: name.into(),
            dataset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pads_short_rows() {
        let dataset = TabularDataset::new(
            vec!["a".to_owned(), "b".to_owned()],
            vec![vec![Value::from(1i64)], vec![Value::from("x"), Value::from("y"), Value::from("z")]],
        );
        assert_eq!(dataset.rows()[0], vec![Value::Number(1.0), Value::Null]);
        assert_eq!(dataset.rows()[1].len(), 2);
        assert_eq!(dataset.rows()[1][dataset.column_index("b").unwrap()], Value::from("y"));
        assert_eq!(dataset.column_index("c"), None);
    }

    #[test]
    fn labels_are_deterministic() {
        assert_eq!(Value::Null.label(), "None");
        assert_eq!(Value::from(3.0).label(), "3");
        assert_eq!(Value::from(2.5).label(), "2.5");
        assert_eq!(Value::from(true).label(), "True");
        assert_eq!(Value::from("A").label(), "A");
    }

    #[test]
    fn group_keys_normalize_zero() {
        assert_eq!(Value::from(0.0).group_key(), Value::from(-0.0).group_key());
        assert_ne!(Value::from(1.0).group_key(), Value::from("1").group_key());
    }

    #[test]
    fn null_displays_empty() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(4.0).to_string(), "4");
    }
}
