use crate::dataset::Value;
use crate::workbook::reference::index_to_reference;
use chrono::Duration;
use chrono::NaiveDate;

/// Types of cell data in workbook files.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum CellType {
    #[default]
    Empty,
    /// Boolean values (true/false)
    Boolean,
    /// Numeric values
    Number,
    /// Date/time values stored as numbers from 1900 epoch
    NumberDateTime1900,
    /// Date values stored as numbers from 1900 epoch
    NumberDate1900,
    /// Time values stored as numbers from 1900 epoch
    NumberTime1900,
    /// Date/time values stored as numbers from 1904 epoch
    NumberDateTime1904,
    /// Date values stored as numbers from 1904 epoch
    NumberDate1904,
    /// Time values stored as numbers from 1904 epoch
    NumberTime1904,
    /// ISO 8601 date/time strings
    IsoDateTime,
    /// Inline string values
    InlineString,
    /// Shared string table references
    SharedString,
}

impl CellType {
    /// Parses built-in Excel number format IDs to determine cell type.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "22" => Some(if is_1904 { Self::NumberDateTime1904 } else { Self::NumberDateTime1900 }),
            "14" | "15" | "16" | "17" => Some(if is_1904 { Self::NumberDate1904 } else { Self::NumberDate1900 }),
            "18" | "19" | "20" | "21" | "45" | "46" | "47" => Some(if is_1904 { Self::NumberTime1904 } else { Self::NumberTime1900 }),
            _ => None,
        }
    }

    /// Parses custom number format strings to determine cell type.
    /// Analyzes format codes for date/time patterns.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_date = false;
        let mut is_time = false;
        let mut is_color = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' if !is_escaped => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_literal && !is_color => is_literal = true,

                ']' if is_color => is_color = false,
                '[' if !is_color && !is_literal => is_color = true,
                _ if is_literal || is_color => (),

                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                _ => (),
            }
        }

        match (is_date, is_time, is_1904) {
            (true, true, true) => Self::NumberDateTime1904,
            (true, true, false) => Self::NumberDateTime1900,
            (true, false, true) => Self::NumberDate1904,
            (true, false, false) => Self::NumberDate1900,
            (false, true, true) => Self::NumberTime1904,
            (false, true, false) => Self::NumberTime1900,
            (false, false, _) => Self::Number,
        }
    }
}

/// A single non-empty cell with position, type and raw value as stored in the part.
#[derive(Clone, Debug)]
pub(crate) struct Cell {
    /// Row index (0-based)
    pub(crate) row: usize,
    /// Column index (0-based)
    pub(crate) col: usize,
    /// Cell data type
    pub(crate) kind: CellType,
    /// Cell value as string
    pub(crate) value: String,
}

impl Cell {
    /// Returns the Excel-style cell reference (e.g., "A1", "B2").
    pub(crate) fn reference(&self) -> String {
        index_to_reference(self.row, self.col)
    }

    /// Resolves the raw value into a dataset value.
    ///
    /// Date and time cells become ISO strings, shared strings are looked up in
    /// the table loaded from the workbook.
    pub(crate) fn to_value(&self, shared_strings: &[String]) -> Result<Value, String> {
        let value = match self.kind {
            CellType::Empty => Value::Null,
            CellType::Boolean => Value::Bool(self.value == "1" || self.value.eq_ignore_ascii_case("true")),
            CellType::Number => Value::Number(self.to_double()?),
            CellType::NumberDateTime1900 => Value::Text(to_datetime_string(self.to_double()?, false)?),
            CellType::NumberDateTime1904 => Value::Text(to_datetime_string(self.to_double()?, true)?),
            CellType::NumberDate1900 => Value::Text(to_date_string(self.to_double()?, false)?),
            CellType::NumberDate1904 => Value::Text(to_date_string(self.to_double()?, true)?),
            CellType::NumberTime1900 | CellType::NumberTime1904 => Value::Text(to_time_string(self.to_double()?)),
            CellType::IsoDateTime => Value::Text(self.value.replace('T', " ")),
            CellType::InlineString => Value::Text(self.value.to_owned()),
            CellType::SharedString => {
                let index = self.value
                    .parse::<usize>()
                    .map_err(|_| format!("invalid shared string index '{}'", self.value))?;
                let text = shared_strings
                    .get(index)
                    .ok_or_else(|| format!("shared string {} out of range", index))?;
                Value::Text(text.to_owned())
            }
        };
        Ok(value)
    }

    /// Converts cell value to double-precision floating point.
    fn to_double(&self) -> Result<f64, String> {
        self.value.trim().parse::<f64>().map_err(|_| format!("parse '{}' to double failed", self.value))
    }
}

/// Converts Excel numeric date to ISO date string.
/// Handles Lotus 1-2-3 leap year bug for 1900 epoch.
fn to_date_string(value: f64, is_1904: bool) -> Result<String, String> {
    if !value.is_finite() {
        return Err(format!("parse '{}' to date failed", value));
    }
    let days = value.trunc() as i64;
    let duration = Duration::try_days(
        days + if is_1904 {
            1462
        } else if days < 60 {
            1
        } else {
            0
        },
    ).ok_or_else(|| format!("date serial {} out of range", value))?;
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30).ok_or("invalid epoch")?;
    let date = epoch
        .checked_add_signed(duration)
        .ok_or_else(|| format!("date serial {} out of range", value))?;
    Ok(date.format("%Y-%m-%d").to_string())
}

/// Converts the fractional part of an Excel serial to an ISO time string.
fn to_time_string(value: f64) -> String {
    let mut rest = (value.fract().abs() * 86_400_000f64).round() as i64;
    let milliseconds = rest % 1_000; rest /= 1_000;
    let seconds = rest % 60; rest /= 60;
    let minutes = rest % 60; rest /= 60;
    let hours = rest;
    if milliseconds > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{milliseconds:03}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Converts Excel numeric datetime to ISO datetime string.
fn to_datetime_string(value: f64, is_1904: bool) -> Result<String, String> {
    let date = to_date_string(value, is_1904)?;
    let time = to_time_string(value);
    Ok(format!("{date} {time}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(kind: CellType, value: &str) -> Cell {
        Cell {
            row: 0,
            col: 0,
            kind,
            value: value.to_owned(),
        }
    }

    #[test]
    fn custom_formats_detect_dates() {
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd", false), CellType::NumberDate1900);
        assert_eq!(CellType::parse_custom_number_format("hh:mm:ss", true), CellType::NumberTime1904);
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd hh:mm", false), CellType::NumberDateTime1900);
        assert_eq!(CellType::parse_custom_number_format("\"days\" 0.00", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("[Red]0.00", false), CellType::Number);
    }

    #[test]
    fn dates_convert_to_iso() {
        assert_eq!(cell(CellType::NumberDate1900, "45000").to_value(&[]).unwrap(), Value::from("2023-03-15"));
        assert_eq!(cell(CellType::NumberDate1904, "0").to_value(&[]).unwrap(), Value::from("1904-01-01"));
        assert_eq!(cell(CellType::NumberTime1900, "0.5").to_value(&[]).unwrap(), Value::from("12:00:00"));
        assert_eq!(
            cell(CellType::NumberDateTime1900, "45000.25").to_value(&[]).unwrap(),
            Value::from("2023-03-15 06:00:00")
        );
        assert_eq!(cell(CellType::IsoDateTime, "2024-01-02T03:04:05").to_value(&[]).unwrap(), Value::from("2024-01-02 03:04:05"));
    }

    #[test]
    fn scalar_values() {
        assert_eq!(cell(CellType::Number, "1.5").to_value(&[]).unwrap(), Value::Number(1.5));
        assert_eq!(cell(CellType::Boolean, "1").to_value(&[]).unwrap(), Value::Bool(true));
        assert_eq!(cell(CellType::Boolean, "0").to_value(&[]).unwrap(), Value::Bool(false));
        let shared = vec!["apple".to_owned(), "pear".to_owned()];
        assert_eq!(cell(CellType::SharedString, "1").to_value(&shared).unwrap(), Value::from("pear"));
        assert!(cell(CellType::SharedString, "5").to_value(&shared).is_err());
        assert!(cell(CellType::Number, "abc").to_value(&[]).is_err());
    }

    #[test]
    fn reference_of_cell() {
        let mut value = cell(CellType::Number, "1");
        value.row = 9;
        value.col = 27;
        assert_eq!(value.reference(), "AB10");
    }
}
