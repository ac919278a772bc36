use crate::dataset::TabularDataset;
use crate::dataset::Value;
use std::collections::BTreeMap;
use std::collections::HashSet;

/// Cells of one worksheet collected while streaming its part, keyed by position.
pub(crate) struct Sheet {
    /// Sheet name
    pub(crate) name: String,
    /// Non-null cell values by row, then column
    rows: BTreeMap<usize, BTreeMap<usize, Value>>,
    /// Actual data range (determined from cell data)
    pub(crate) col_lower_bound: Option<usize>,
    pub(crate) col_upper_bound: Option<usize>,
}

impl Sheet {
    /// Creates an empty sheet.
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            rows: BTreeMap::new(),
            col_lower_bound: None,
            col_upper_bound: None,
        }
    }

    /// Returns true if the sheet contains no cells.
    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Adds a value at (row, col); null values are ignored.
    pub(crate) fn push(&mut self, row: usize, col: usize, value: Value) {
        if value.is_null() {
            return;
        }
        self.update_bound(col);
        self.rows.entry(row).or_default().insert(col, value);
    }

    /// Updates the column range based on cell positions.
    fn update_bound(&mut self, col: usize) {
        if self.col_lower_bound.map(|col_lower_bound| col < col_lower_bound).unwrap_or(true) {
            self.col_lower_bound = Some(col);
        }
        if self.col_upper_bound.map(|col_upper_bound| col_upper_bound < col).unwrap_or(true) {
            self.col_upper_bound = Some(col);
        }
    }

    /// Converts the collected cells into a dataset.
    ///
    /// The first non-empty row is the header. Columns span the used column
    /// range; blank header cells are named `Unnamed: {index}` and repeated
    /// names get `.1`, `.2`, ... suffixes. Blank rows below the header are
    /// skipped.
    pub(crate) fn into_dataset(self) -> TabularDataset {
        if self.is_empty() {
            return TabularDataset::default();
        }
        let (col_lower, col_upper) = match self.col_lower_bound.zip(self.col_upper_bound) {
            Some(bounds) => bounds,
            None => return TabularDataset::default(),
        };

        let mut rows = self.rows.into_values();
        let header = rows.next().unwrap_or_default();
        let names = (col_lower..=col_upper)
            .map(|col| match header.get(&col) {
                Some(value) => value.label(),
                None => format!("Unnamed: {}", col - col_lower),
            })
            .collect();
        let columns = deduplicate_columns(names);

        let records = rows
            .map(|mut cells| {
                (col_lower..=col_upper)
                    .map(|col| cells.remove(&col).unwrap_or_default())
                    .collect()
            })
            .collect();
        TabularDataset::new(columns, records)
    }
}

/// Renames repeated column names by appending `.1`, `.2`, ... in order of appearance.
fn deduplicate_columns(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::<String>::new();
    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut suffix = 0usize;
        while seen.contains(&candidate) {
            suffix += 1;
            candidate = format!("{name}.{suffix}");
        }
        seen.insert(candidate.clone());
        columns.push(candidate);
    }
    columns
}
