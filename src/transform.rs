//! # Transforms
//!
//! Pure operations over decoded datasets. Nothing here touches storage; every
//! function takes datasets by reference and returns new ones.
use crate::dataset::GroupKey;
use crate::dataset::NamedDataset;
use crate::dataset::TabularDataset;
use crate::dataset::Value;
use crate::error::SheetError;
use crate::naming::sanitize_sheet_name;
use crate::workbook::EncodeError;
use std::collections::HashMap;
use std::collections::HashSet;
use thiserror::Error;

/// Column whose values drive the partition actions.
pub const KEY_COLUMN: &str = "type";

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Missing column '{column}'")]
    MissingColumn { column: String },
}

/// One output per input sheet, data unchanged.
pub fn explode_by_sheet(sheets: &[NamedDataset]) -> Vec<NamedDataset> {
    sheets.to_vec()
}

/// Splits the rows of `dataset` into one dataset per distinct value of `key`.
///
/// Groups appear in order of first appearance of their key, rows keep their
/// relative order, and every group carries the full header. Each group is
/// named after [`Value::label`] of its key, so the null group is `None`.
pub fn partition_by_key(dataset: &TabularDataset, key: &str) -> Result<Vec<NamedDataset>, SheetError> {
    let column = dataset.column_index(key).ok_or_else(|| TransformError::MissingColumn {
        column: key.to_owned(),
    })?;

    let mut buckets: Vec<(&Value, Vec<usize>)> = Vec::new();
    let mut positions: HashMap<GroupKey, usize> = HashMap::new();
    for (index, row) in dataset.rows().iter().enumerate() {
        let value = &row[column];
        let position = *positions.entry(value.group_key()).or_insert_with(|| {
            buckets.push((value, Vec::new()));
            buckets.len() - 1
        });
        buckets[position].1.push(index);
    }

    Ok(buckets
        .into_iter()
        .map(|(value, indexes)| NamedDataset::new(value.label(), dataset.select(&indexes)))
        .collect())
}

/// Same grouping as [`partition_by_key`], named for use as sheets of one workbook.
pub fn partition_by_key_to_sheets(dataset: &TabularDataset, key: &str) -> Result<Vec<NamedDataset>, SheetError> {
    let groups = partition_by_key(dataset, key)?;
    Ok(groups
        .into_iter()
        .enumerate()
        .map(|(index, group)| NamedDataset::new(sanitize_sheet_name(&group.name, index + 1), group.dataset))
        .collect())
}

/// One sheet per labelled input, in input order.
///
/// Labels must be unique, compared case-insensitively as sheet names are.
pub fn merge_to_sheets(labelled: &[NamedDataset]) -> Result<Vec<NamedDataset>, SheetError> {
    let mut seen = HashSet::<String>::with_capacity(labelled.len());
    for input in labelled {
        if !seen.insert(input.name.to_lowercase()) {
            Err(EncodeError::DuplicateSheetName {
                name: input.name.to_owned(),
            })?
        }
    }
    Ok(labelled.to_vec())
}

/// Concatenates the rows of every dataset into one.
///
/// Columns are the union of all input columns in order of first appearance;
/// a row gets `Null` for columns its own dataset lacks. Duplicate rows are kept.
pub fn merge_to_rows(datasets: &[TabularDataset]) -> TabularDataset {
    let mut columns: Vec<String> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for dataset in datasets {
        for column in dataset.columns() {
            if !positions.contains_key(column.as_str()) {
                positions.insert(column, columns.len());
                columns.push(column.to_owned());
            }
        }
    }

    let mut rows = Vec::with_capacity(datasets.iter().map(TabularDataset::row_count).sum());
    for dataset in datasets {
        let targets: Vec<usize> = dataset.columns().iter().map(|column| positions[column.as_str()]).collect();
        for record in dataset.rows() {
            let mut row = vec![Value::Null; columns.len()];
            for (value, target) in record.iter().zip(&targets) {
                row[*target] = value.clone();
            }
            rows.push(row);
        }
    }
    TabularDataset::new(columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn orders() -> TabularDataset {
        TabularDataset::new(
            columns(&["type", "qty"]),
            vec![
                vec![Value::from("apple"), Value::from(1.0)],
                vec![Value::from(3.0), Value::from(2.0)],
                vec![Value::from("apple"), Value::from(3.0)],
                vec![Value::Null, Value::from(4.0)],
                vec![Value::from("pear"), Value::from(5.0)],
                vec![Value::from(3.0), Value::from(6.0)],
                vec![Value::Null, Value::from(7.0)],
            ],
        )
    }

    #[test]
    fn explode_keeps_sheets() {
        let sheets = vec![
            NamedDataset::new("b", orders()),
            NamedDataset::new("a", TabularDataset::default()),
        ];
        assert_eq!(explode_by_sheet(&sheets), sheets);
    }

    #[test]
    fn partition_groups_in_first_seen_order() {
        let groups = partition_by_key(&orders(), KEY_COLUMN).unwrap();
        let names: Vec<&str> = groups.iter().map(|group| group.name.as_str()).collect();
        assert_eq!(names, ["apple", "3", "None", "pear"]);

        let quantities: Vec<Vec<Value>> = groups
            .iter()
            .map(|group| group.dataset.rows().iter().map(|row| row[1].clone()).collect())
            .collect();
        assert_eq!(
            quantities,
            vec![
                vec![Value::from(1.0), Value::from(3.0)],
                vec![Value::from(2.0), Value::from(6.0)],
                vec![Value::from(4.0), Value::from(7.0)],
                vec![Value::from(5.0)],
            ]
        );
        assert!(groups.iter().all(|group| group.dataset.columns() == orders().columns()));
        let total: usize = groups.iter().map(|group| group.dataset.row_count()).sum();
        assert_eq!(total, orders().row_count());
    }

    #[test]
    fn partition_distinguishes_text_from_number() {
        let dataset = TabularDataset::new(
            columns(&["type"]),
            vec![vec![Value::from("1")], vec![Value::from(1.0)], vec![Value::from(true)], vec![Value::from(-0.0)], vec![Value::from(0.0)]],
        );
        let groups = partition_by_key(&dataset, "type").unwrap();
        let names: Vec<&str> = groups.iter().map(|group| group.name.as_str()).collect();
        assert_eq!(names, ["1", "1", "True", "0"]);
        assert_eq!(groups[3].dataset.row_count(), 2);
    }

    #[test]
    fn partition_requires_key_column() {
        let dataset = TabularDataset::new(columns(&["kind"]), vec![vec![Value::from("x")]]);
        let error = partition_by_key(&dataset, KEY_COLUMN).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MissingColumn);
        assert_eq!(error.to_string(), "Missing column 'type'");
    }

    #[test]
    fn partition_of_header_only_sheet_is_empty() {
        let dataset = TabularDataset::new(columns(&["type"]), Vec::new());
        assert!(partition_by_key(&dataset, KEY_COLUMN).unwrap().is_empty());
    }

    #[test]
    fn partition_to_sheets_sanitizes_names() {
        let dataset = TabularDataset::new(
            columns(&["type"]),
            vec![vec![Value::from("a/b")], vec![Value::from("")], vec![Value::from("c")]],
        );
        let sheets = partition_by_key_to_sheets(&dataset, KEY_COLUMN).unwrap();
        let names: Vec<&str> = sheets.iter().map(|sheet| sheet.name.as_str()).collect();
        assert_eq!(names, ["a_b", "Sheet2", "c"]);
    }

    #[test]
    fn merge_to_sheets_keeps_order() {
        let inputs = vec![NamedDataset::new("jan", orders()), NamedDataset::new("feb", TabularDataset::default())];
        assert_eq!(merge_to_sheets(&inputs).unwrap(), inputs);
    }

    #[test]
    fn merge_to_sheets_rejects_duplicate_labels() {
        let inputs = vec![NamedDataset::new("report", orders()), NamedDataset::new("Report", orders())];
        let error = merge_to_sheets(&inputs).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Encode);
    }

    #[test]
    fn merge_to_rows_unions_columns() {
        let first = TabularDataset::new(columns(&["a", "b"]), vec![vec![Value::from(1.0), Value::from(2.0)]]);
        let second = TabularDataset::new(
            columns(&["b", "c"]),
            vec![vec![Value::from(3.0), Value::from("x")], vec![Value::from(3.0), Value::from("x")]],
        );
        let merged = merge_to_rows(&[first, second]);
        assert_eq!(merged.columns(), ["a", "b", "c"]);
        assert_eq!(
            merged.rows(),
            [
                vec![Value::from(1.0), Value::from(2.0), Value::Null],
                vec![Value::Null, Value::from(3.0), Value::from("x")],
                vec![Value::Null, Value::from(3.0), Value::from("x")],
            ]
        );
    }

    #[test]
    fn merge_to_rows_of_nothing_is_empty() {
        assert!(merge_to_rows(&[]).is_empty());
    }
}
