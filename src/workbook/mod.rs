//! # Workbook Codec
//!
//! Converts between workbook bytes and [`TabularDataset`]s.
//!
//! The container is sniffed from the leading bytes. A ZIP package is read as
//! Office Open XML: quick-xml streams the workbook part (sheet list), the
//! styles part (which numeric cells are dates) and every worksheet part. A
//! compound file is read as an Excel 97-2003 BIFF8 workbook. Both readers fold
//! cells into a [`sheet::Sheet`] before it becomes a dataset.
//!
//! Encoding always writes a minimal `.xlsx` package with inline strings.
//! Encrypted workbooks and pre-BIFF8 streams are rejected with
//! [`DecodeError::UnsupportedFormat`].
mod cell;
mod excel;
mod reference;
mod sheet;
mod writer;
mod xls;
mod xlsx;

use crate::dataset::NamedDataset;
use crate::dataset::TabularDataset;
use crate::error::SheetError;
use crate::helpers::reader::Container;
use crate::helpers::reader::UnifiedReader;
use crate::naming::sanitize_sheet_name;
use crate::workbook::sheet::Sheet;
use crate::workbook::xls::XlsWorkbook;
use crate::workbook::xlsx::XlsxWorkbook;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Sheet name used by [`WorkbookCodec::encode_single`].
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// Errors raised while reading workbook bytes.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Encrypted workbook, or a binary workbook older than Excel 97
    #[error("Unsupported workbook format for '{name}': encrypted or pre-Excel 97 workbooks cannot be read")]
    UnsupportedFormat { name: String },

    /// Neither a ZIP package nor a compound file
    #[error("'{name}' is not a workbook")]
    NotAWorkbook { name: String },

    /// A required package part is absent
    #[error("Missing part '{part}' in workbook '{name}'")]
    MissingPart { name: String, part: String },

    /// The workbook part lists no sheets
    #[error("Workbook '{name}' contains no sheets")]
    NoSheets { name: String },

    /// A cell value cannot be converted to its declared type
    #[error("Invalid cell value '{value}' at '{sheet}'!{reference} in workbook '{name}'")]
    CellValueError {
        name: String,
        sheet: String,
        reference: String,
        value: String,
    },

    /// Corrupted package or XML
    #[error("Malformed workbook '{name}': {message}")]
    Malformed { name: String, message: String },
}

/// Errors raised while producing workbook bytes.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Duplicate sheet name '{name}'")]
    DuplicateSheetName { name: String },

    #[error("Cannot write workbook '{name}': {message}")]
    WriteError { name: String, message: String },
}

/// Reads and writes workbooks.
///
/// Implementations hold no per-call state and may be shared between threads.
pub trait WorkbookCodec: Send + Sync {
    /// Decodes workbook bytes into one dataset per sheet, in workbook order.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<NamedDataset>, SheetError>;

    /// Decodes the workbook stored at `path`.
    fn decode_file(&self, path: &Path) -> Result<Vec<NamedDataset>, SheetError>;

    /// Encodes one dataset as a workbook with a single sheet named `Sheet1`.
    fn encode_single(&self, dataset: &TabularDataset) -> Result<Vec<u8>, SheetError>;

    /// Encodes datasets as a workbook with one sheet per dataset, in order.
    /// Sheet names are sanitized; two names colliding afterwards is an error.
    fn encode_multi(&self, sheets: &[NamedDataset]) -> Result<Vec<u8>, SheetError>;
}

/// Excel codec: reads `.xlsx`/`.xlsm` packages and `.xls` workbooks, writes `.xlsx`.
#[derive(Copy, Clone, Debug, Default)]
pub struct XlsxCodec;

impl XlsxCodec {
    fn read_sheets(name: &str, mut reader: UnifiedReader) -> Result<Vec<Sheet>, SheetError> {
        match reader.container()? {
            Container::Zip => XlsxWorkbook::open(name, reader)?.read_sheets(),
            Container::CompoundFile => XlsWorkbook::open(name, reader)?.read_sheets(),
            Container::Unknown => Err(DecodeError::NotAWorkbook { name: name.to_owned() })?,
        }
    }

    fn decode_reader(&self, name: &str, reader: UnifiedReader) -> Result<Vec<NamedDataset>, SheetError> {
        match Self::read_sheets(name, reader) {
            Ok(sheets) => Ok(sheets
                .into_iter()
                .map(|sheet| {
                    let name = sheet.name.clone();
                    NamedDataset::new(name, sheet.into_dataset())
                })
                .collect()),
            Err(error @ SheetError::DecodeError(_)) => Err(error),
            Err(error) => Err(DecodeError::Malformed {
                name: name.to_owned(),
                message: error.to_string(),
            })?,
        }
    }
}

impl WorkbookCodec for XlsxCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<NamedDataset>, SheetError> {
        self.decode_reader("workbook", UnifiedReader::from_bytes(bytes.to_vec()))
    }

    fn decode_file(&self, path: &Path) -> Result<Vec<NamedDataset>, SheetError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.decode_reader(&name, UnifiedReader::open(path)?)
    }

    fn encode_single(&self, dataset: &TabularDataset) -> Result<Vec<u8>, SheetError> {
        write(DEFAULT_SHEET_NAME, &[(DEFAULT_SHEET_NAME.to_owned(), dataset)])
    }

    fn encode_multi(&self, sheets: &[NamedDataset]) -> Result<Vec<u8>, SheetError> {
        let mut seen = HashSet::<String>::with_capacity(sheets.len());
        let mut named = Vec::with_capacity(sheets.len());
        for (index, sheet) in sheets.iter().enumerate() {
            let name = sanitize_sheet_name(&sheet.name, index + 1);
            if !seen.insert(name.to_lowercase()) {
                Err(EncodeError::DuplicateSheetName { name: name.clone() })?
            }
            named.push((name, &sheet.dataset));
        }
        let label = named.first().map(|(name, _)| name.clone()).unwrap_or_default();
        write(&label, &named)
    }
}

/// Writes the package, reporting any failure as an [`EncodeError::WriteError`].
fn write(label: &str, sheets: &[(String, &TabularDataset)]) -> Result<Vec<u8>, SheetError> {
    writer::write_workbook(sheets).map_err(|error| {
        EncodeError::WriteError {
            name: label.to_owned(),
            message: error.to_string(),
        }
        .into()
    })
}
