use crate::error::SheetError;
use crate::helpers::biff8::RecordReader;
use crate::helpers::cfb::CompoundFile;
use crate::helpers::reader::UnifiedReader;
use crate::match_records;
use crate::workbook::cell::Cell;
use crate::workbook::cell::CellType;
use crate::workbook::excel::load_number_formats;
use crate::workbook::reference::index_to_reference;
use crate::workbook::reference::is_within_grid;
use crate::workbook::sheet::Sheet;
use crate::workbook::DecodeError;
use std::collections::HashMap;

// BIFF8 record types
const FORMULA: u16 = 0x0006;        // Formula with its cached result
const EOF: u16 = 0x000A;            // End of a substream
const DATE1904: u16 = 0x0022;       // Date system flag
const FILE_PASS: u16 = 0x002F;      // Workbook is encrypted
const CODE_PAGE: u16 = 0x0042;      // Encoding of 8-bit strings
const BOUND_SHEET8: u16 = 0x0085;   // Sheet name, type and substream position
const MUL_RK: u16 = 0x00BD;         // Run of RK numbers in one row
const XF: u16 = 0x00E0;             // Cell format, referencing a number format
const SST: u16 = 0x00FC;            // Shared string table
const LABEL_SST: u16 = 0x00FD;      // Cell referencing the shared string table
const NUMBER: u16 = 0x0203;         // Double cell
const LABEL: u16 = 0x0204;          // Inline string cell
const BOOL_ERR: u16 = 0x0205;       // Boolean or error cell
const STRING: u16 = 0x0207;         // String result of the preceding formula
const ARRAY: u16 = 0x0221;          // Array formula
const TABLE: u16 = 0x0236;          // Data table formula
const RK: u16 = 0x027E;             // Compressed number cell
const FORMAT: u16 = 0x041E;         // Custom number format
const SHARED_FORMULA: u16 = 0x04BC; // Shared formula
const BOF: u16 = 0x0809;            // Start of a substream

const BIFF8_VERSION: u16 = 0x0600;
const WORKSHEET: u8 = 0x00;

/// An opened Excel 97-2003 workbook
pub(crate) struct XlsWorkbook {
    /// Name of the workbook, used in error messages
    pub(crate) name: String,
    /// Records of the `Workbook` stream
    reader: RecordReader,
    shared_strings: Vec<String>,
    /// Cell types indexed by XF record
    number_formats: Vec<CellType>,
    /// Worksheets as (name, stream offset of their BOF record) in workbook order
    sheets: Vec<(String, usize)>,
}

impl XlsWorkbook {
    /// Opens the compound file and reads the workbook globals substream.
    ///
    /// Encrypted workbooks (an encrypted OOXML package, or a FILEPASS record)
    /// and streams older than BIFF8 are reported as unsupported formats.
    pub(crate) fn open(name: &str, mut reader: UnifiedReader) -> Result<XlsWorkbook, SheetError> {
        let unsupported = || DecodeError::UnsupportedFormat { name: name.to_owned() };
        let file = CompoundFile::open(&mut reader)?;
        if file.contains("EncryptionInfo") || file.contains("EncryptedPackage") {
            Err(unsupported())?
        }
        let stream = match file.read("Workbook")? {
            Some(stream) => stream,
            None => file.read("Book")?.ok_or_else(|| DecodeError::NotAWorkbook { name: name.to_owned() })?,
        };

        let mut reader = RecordReader::new(stream);
        match reader.next()? {
            Some(BOF) if reader.read_u16()? == BIFF8_VERSION => (),
            _ => Err(unsupported())?,
        }

        let mut is_1904 = false;
        let mut shared_strings = Vec::new();
        let mut custom_formats = HashMap::<String, String>::new();
        let mut format_indexes = Vec::<String>::new();
        let mut sheets = Vec::<(String, usize)>::new();
        match_records!(reader => {
            EOF => break,
            FILE_PASS => Err(unsupported())?,
            DATE1904 => is_1904 = reader.read_u16()? == 1,
            CODE_PAGE => {
                if let Some(encoding) = codepage::to_encoding(reader.read_u16()?) {
                    reader.set_encoding(encoding);
                }
            }
            FORMAT => {
                let id = reader.read_u16()?;
                custom_formats.insert(id.to_string(), reader.read_string16()?);
            }
            XF => {
                reader.skip(2)?;
                format_indexes.push(reader.read_u16()?.to_string());
            }
            SST => shared_strings = read_shared_strings(&mut reader)?,
            BOUND_SHEET8 => {
                let pointer = reader.read_u32()? as usize;
                reader.skip(1)?;
                let kind = reader.read_u8()?;
                let sheet_name = reader.read_short_string()?;
                if kind == WORKSHEET {
                    sheets.push((sheet_name, pointer));
                }
            }
        });
        if sheets.is_empty() {
            Err(DecodeError::NoSheets { name: name.to_owned() })?
        }

        let custom_formats = custom_formats
            .into_iter()
            .map(|(id, format)| (id, CellType::parse_custom_number_format(&format, is_1904)))
            .collect();
        Ok(XlsWorkbook {
            name: name.to_owned(),
            reader,
            shared_strings,
            number_formats: load_number_formats(format_indexes, custom_formats, is_1904),
            sheets,
        })
    }

    /// Reads the cell records of every worksheet substream.
    pub(crate) fn read_sheets(&mut self) -> Result<Vec<Sheet>, SheetError> {
        let mut sheets = Vec::<Sheet>::with_capacity(self.sheets.len());
        for (sheet_name, pointer) in &self.sheets {
            let mut sheet = Sheet::new(sheet_name);
            self.reader.seek(*pointer);
            if self.reader.next()? != Some(BOF) {
                Err(DecodeError::Malformed {
                    name: self.name.to_owned(),
                    message: format!("sheet '{sheet_name}' does not start at offset {pointer}"),
                })?
            }
            while let Some(tag) = self.reader.next()? {
                match tag {
                    BOF | EOF => break,
                    MUL_RK => {
                        let row = self.reader.read_u16()? as usize;
                        let first = self.reader.read_u16()? as usize;
                        let count = self.reader.len().saturating_sub(6) / 6;
                        for col in first..first + count {
                            let format = self.reader.read_u16()?;
                            let value = self.reader.read_rk()?;
                            let kind = self.style(format);
                            self.push_cell(&mut sheet, Cell { row, col, kind, value: value.to_string() })?;
                        }
                    }
                    NUMBER | RK | LABEL_SST | LABEL | BOOL_ERR | FORMULA => {
                        let row = self.reader.read_u16()? as usize;
                        let col = self.reader.read_u16()? as usize;
                        let format = self.reader.read_u16()?;
                        let style = self.style(format);
                        let (kind, value) = match tag {
                            NUMBER => (style, self.reader.read_f64()?.to_string()),
                            RK => (style, self.reader.read_rk()?.to_string()),
                            LABEL_SST => (CellType::SharedString, self.reader.read_u32()?.to_string()),
                            LABEL => (CellType::InlineString, self.reader.read_string16()?),
                            BOOL_ERR => read_bool_or_error(&mut self.reader)?,
                            _ => read_formula_result(&mut self.reader, style)?.ok_or_else(|| DecodeError::Malformed {
                                name: self.name.to_owned(),
                                message: format!(
                                    "unreadable formula result at '{}'!{}",
                                    sheet_name,
                                    index_to_reference(row, col)
                                ),
                            })?,
                        };
                        self.push_cell(&mut sheet, Cell { row, col, kind, value })?;
                    }
                    _ => (),
                }
            }
            sheets.push(sheet);
        }

        Ok(sheets)
    }

    /// Cell type of an XF index; unknown indexes read as plain numbers.
    fn style(&self, index: u16) -> CellType {
        self.number_formats.get(index as usize).copied().unwrap_or(CellType::Number)
    }

    fn push_cell(&self, sheet: &mut Sheet, cell: Cell) -> Result<(), SheetError> {
        if !is_within_grid(cell.row, cell.col) {
            Err(DecodeError::Malformed {
                name: self.name.to_owned(),
                message: format!("cell '{}' in sheet '{}' lies outside the worksheet grid", cell.reference(), sheet.name),
            })?
        }
        if cell.kind == CellType::Empty || cell.value.is_empty() {
            return Ok(());
        }
        let value = cell.to_value(&self.shared_strings).map_err(|_| DecodeError::CellValueError {
            name: self.name.to_owned(),
            sheet: sheet.name.to_owned(),
            reference: cell.reference(),
            value: cell.value.to_owned(),
        })?;
        sheet.push(cell.row, cell.col, value);
        Ok(())
    }
}

/// Reads the SST record: total count, unique count, then the strings.
fn read_shared_strings(reader: &mut RecordReader) -> Result<Vec<String>, SheetError> {
    reader.skip(4)?;
    let count = reader.read_u32()? as usize;
    let mut shared_strings = Vec::with_capacity(count.min(reader.len()));
    for _ in 0..count {
        shared_strings.push(reader.read_rich_string()?);
    }
    Ok(shared_strings)
}

/// Booleans keep their value; error cells (`#DIV/0!`, ...) read as empty.
fn read_bool_or_error(reader: &mut RecordReader) -> Result<(CellType, String), SheetError> {
    let value = reader.read_u8()?;
    let is_error = reader.read_u8()? != 0;
    Ok(if is_error {
        (CellType::Empty, String::new())
    } else {
        (CellType::Boolean, value.to_string())
    })
}

/// Decodes the cached result of a FORMULA record.
///
/// A result whose top two bytes are `0xFFFF` is not a double: its first byte
/// tells string (text in the following STRING record), boolean, error or
/// empty string. Returns `None` when the result cannot be read.
fn read_formula_result(reader: &mut RecordReader, style: CellType) -> Result<Option<(CellType, String)>, SheetError> {
    let result = reader.read_u64()?;
    if result >> 48 != 0xFFFF {
        return Ok(Some((style, f64::from_bits(result).to_string())));
    }
    let value = match result & 0xFF {
        0 => loop {
            match reader.next()? {
                Some(STRING) => break Some((CellType::InlineString, reader.read_string16()?)),
                Some(SHARED_FORMULA | ARRAY | TABLE) => continue,
                _ => break None,
            }
        },
        1 => Some((CellType::Boolean, ((result >> 16) & 0xFF).to_string())),
        2 | 3 => Some((CellType::Empty, String::new())),
        _ => None,
    };
    Ok(value)
}
