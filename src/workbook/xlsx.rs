use crate::error::SheetError;
use crate::helpers::package::PackageParts;
use crate::helpers::package::PartReader;
use crate::helpers::reader::UnifiedReader;
use crate::helpers::xml::append_reference;
use crate::helpers::xml::append_text;
use crate::helpers::xml::ElementAttributes;
use crate::match_xml_events;
use crate::workbook::cell::Cell;
use crate::workbook::cell::CellType;
use crate::workbook::excel;
use crate::workbook::excel::load_relationships;
use crate::workbook::reference::is_within_grid;
use crate::workbook::reference::reference_to_index;
use crate::workbook::sheet::Sheet;
use crate::workbook::DecodeError;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::collections::HashMap;
use zip::ZipArchive;

// XML tag names for parsing Excel XLSX format
const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts"); // Custom number formats container
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");   // Individual custom number format
const TAG_FORMAT_INDEXES: QName = QName(b"cellXfs");  // Cell format indexes container
const TAG_FORMAT_INDEX: QName = QName(b"xf");         // Individual cell format index
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");   // Shared string table item
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");       // Phonetic text for Asian languages
const TAG_TEXT: QName = QName(b"t");                  // Text content within strings
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr"); // Workbook properties
const TAG_SHEET: QName = QName(b"sheet");             // Worksheet definition
const TAG_ROW: QName = QName(b"row");                 // Row in worksheet
const TAG_CELL: QName = QName(b"c");                  // Cell in worksheet
const TAG_INLINE_STRING: QName = QName(b"is");        // Inline string value
const TAG_VALUE: QName = QName(b"v");                 // Cell value content

/// An opened Excel XLSX workbook
pub(crate) struct XlsxWorkbook {
    /// Name of the workbook, used in error messages
    pub(crate) name: String,
    /// ZIP archive containing the XLSX package
    zip: ZipArchive<UnifiedReader>,
    /// Parsed number formats for cell type detection
    number_formats: Vec<CellType>,
    /// List of worksheets with (name, zip_path) pairs in workbook order
    sheets: Vec<(String, String)>,
}

impl XlsxWorkbook {
    /// Opens an XLSX package and parses its structure
    ///
    /// # Arguments
    /// * `name` - Workbook name used in error messages
    /// * `reader` - Reader over the package bytes
    ///
    /// # Returns
    /// Result containing the initialized XlsxWorkbook or an error
    pub(crate) fn open(name: &str, reader: UnifiedReader) -> Result<XlsxWorkbook, SheetError> {
        let mut zip = ZipArchive::new(reader)?;
        let (sheets, is_1904) = load_workbook(&mut zip, name)?;
        if sheets.is_empty() {
            Err(DecodeError::NoSheets { name: name.to_owned() })?
        }

        let number_formats = load_number_formats(&mut zip, is_1904)?;
        Ok(XlsxWorkbook {
            name: name.to_owned(),
            zip,
            number_formats,
            sheets,
        })
    }

    /// Loads the shared string table
    ///
    /// Shared strings are stored in a separate XML part and referenced by index
    /// to reduce file size when the same string appears multiple times.
    pub(crate) fn load_shared_strings(&mut self) -> Result<Vec<String>, SheetError> {
        let mut shared_strings = Vec::<String>::new();
        let mut reader = match self.zip.open_xml_part("xl/sharedStrings.xml")? {
            Some(reader) => reader,
            None => return Ok(shared_strings),
        };

        match_xml_events!(reader => {
            Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
                let string = read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false)?;
                shared_strings.push(string);
            }
        });
        Ok(shared_strings)
    }

    /// Reads every worksheet of the workbook
    ///
    /// Parses worksheet XML parts and collects the non-empty cells of each
    /// sheet, resolving shared strings and date formats along the way.
    ///
    /// # Returns
    /// Vector of Sheet objects in workbook order
    pub(crate) fn read_sheets(&mut self) -> Result<Vec<Sheet>, SheetError> {
        let shared_strings = self.load_shared_strings()?;
        let mut sheets = Vec::<Sheet>::with_capacity(self.sheets.len());
        for (sheet_name, zip_path) in &self.sheets {
            let mut sheet = Sheet::new(sheet_name);
            let mut row_count = 0usize;
            let mut col_count = 0usize;
            let mut row = 0usize;
            let mut col = 0usize;
            let mut kind = CellType::default();
            let mut value = String::new();
            let mut reader = self.zip.open_xml_part(zip_path)?
                .ok_or_else(|| DecodeError::MissingPart {
                    name: self.name.to_owned(),
                    part: zip_path.to_owned(),
                })?;
            match_xml_events!(reader => {
                Event::Start(event) if event.name() == TAG_ROW => {
                    if let Some(number) = event.attr_as::<usize>("r")? {
                        row_count = number.saturating_sub(1);
                    }
                    col_count = 0;
                }
                Event::End(event) if event.name() == TAG_ROW => {
                    row_count += 1;
                }
                Event::Start(event) if event.name() == TAG_CELL => {
                    let reference = event.attr("r")?;
                    (row, col) = reference.as_deref()
                        .and_then(reference_to_index)
                        .unwrap_or((row_count, col_count));
                    if !is_within_grid(row, col) {
                        Err(DecodeError::Malformed {
                            name: self.name.to_owned(),
                            message: format!(
                                "cell '{}' in sheet '{}' lies outside the worksheet grid",
                                reference.as_deref().unwrap_or("?"),
                                sheet_name,
                            ),
                        })?
                    }
                    col_count = col + 1;
                    value.clear();
                    kind = event.attr("t")?.map(|t| {
                        match t.as_ref() {
                            "inlineStr" | "str" => CellType::InlineString,
                            "s" => CellType::SharedString,
                            "d" => CellType::IsoDateTime,
                            "b" => CellType::Boolean,
                            "e" => CellType::Empty,
                            _ => CellType::Number,
                        }
                    }).unwrap_or(CellType::Number);
                    if let Some(format_id) = event.attr("s")? {
                        if kind == CellType::Number && !format_id.is_empty() {
                            let index = format_id.parse::<usize>()?;
                            kind = self.number_formats.get(index).copied().unwrap_or(CellType::Number);
                        }
                    }
                }
                Event::Start(event) if kind != CellType::Empty && event.name() == TAG_INLINE_STRING => {
                    value = read_string_value(&mut reader, TAG_INLINE_STRING, false)?;
                }
                Event::Start(event) if kind != CellType::Empty && event.name() == TAG_VALUE => {
                    value = read_string_value(&mut reader, TAG_VALUE, true)?;
                }
                Event::End(event) if event.name() == TAG_CELL => {
                    if kind != CellType::Empty && !value.is_empty() {
                        let cell = Cell {
                            row,
                            col,
                            kind,
                            value: std::mem::take(&mut value),
                        };
                        let resolved = cell.to_value(&shared_strings).map_err(|_| DecodeError::CellValueError {
                            name: self.name.to_owned(),
                            sheet: sheet_name.to_owned(),
                            reference: cell.reference(),
                            value: cell.value.to_owned(),
                        })?;
                        sheet.push(row, col, resolved);
                    }
                    kind = CellType::default();
                },
            });
            sheets.push(sheet);
        }

        Ok(sheets)
    }
}

/// Loads workbook structure and worksheet information from an XLSX package
///
/// Parses the workbook.xml part to extract worksheet names and their corresponding
/// XML part paths, and determines the date system (1900 vs 1904) used in the file.
///
/// # Returns
/// Tuple of (worksheets, is_1904_date_system) where worksheets are (name, zip_path) pairs
fn load_workbook(zip: &mut ZipArchive<UnifiedReader>, name: &str) -> Result<(Vec<(String, String)>, bool), SheetError> {
    let relationships = load_relationships(zip, name, "xl/_rels/workbook.xml.rels")?;
    let mut reader = zip.open_xml_part("xl/workbook.xml")?
        .ok_or_else(|| DecodeError::MissingPart {
            name: name.to_owned(),
            part: "xl/workbook.xml".to_owned(),
        })?;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            let sheet_name = event.local_attr("name")?;
            let id = event.local_attr("id")?;
            if let Some((sheet_name, id)) = sheet_name.zip(id) {
                if let Some(path) = relationships.get(id.as_ref()) {
                    sheets.push((sheet_name.to_string(), path.to_owned()));
                }
            }
        }
        Event::Start(event) if event.name() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = event.attr("date1904")?
                .map(|value| value.eq("1") || value.eq("true"))
                .unwrap_or(false);
        }
    });
    Ok((sheets, is_1904))
}

/// Loads number formats and cell styles from the XLSX styles.xml part
///
/// Parses custom number formats and cell style indexes to determine
/// how numeric values should be interpreted (dates, times or plain numbers)
///
/// # Returns
/// Vector of CellType values indexed by style ID
fn load_number_formats(zip: &mut ZipArchive<UnifiedReader>, is_1904: bool) -> Result<Vec<CellType>, SheetError> {
    let mut reader = match zip.open_xml_part("xl/styles.xml")? {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut has_custom_formats = false;
    let mut custom_formats_context = false;
    let mut custom_formats = HashMap::<String, CellType>::new();

    let mut has_format_indexes = false;
    let mut format_indexes_context = false;
    let mut format_indexes = Vec::<String>::new();

    match_xml_events!(reader => {
        Event::Start(event) if !custom_formats_context && event.name() == TAG_CUSTOM_FORMATS => {
            has_custom_formats = true;
            custom_formats_context = true;
        }
        Event::End(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMATS => {
            custom_formats_context = false;
            if has_custom_formats && has_format_indexes {
                break;
            }
        }
        Event::Start(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.attr("numFmtId")?;
            let format = event.attr("formatCode")?;
            if let Some((id, format)) = id.zip(format) {
                let style = CellType::parse_custom_number_format(&format, is_1904);
                custom_formats.insert(id.to_string(), style);
            }
        }

        Event::Start(event) if !format_indexes_context && event.name() == TAG_FORMAT_INDEXES => {
            has_format_indexes = true;
            format_indexes_context = true;
        }
        Event::End(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEXES => {
            format_indexes_context = false;
            if has_custom_formats && has_format_indexes {
                break;
            }
        }
        Event::Start(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEX => {
            if let Some(id) = event.attr("numFmtId")? {
                format_indexes.push(id.to_string());
            }
        }
    });

    Ok(excel::load_number_formats(format_indexes, custom_formats, is_1904))
}

/// Reads string value from XML content, handling text and CDATA sections
///
/// Extracts string content from XML elements, skipping phonetic text annotations
/// and properly handling both text nodes and CDATA sections.
///
/// # Arguments
/// * `reader` - XML reader positioned at the start of the string content
/// * `end_tag` - XML tag that marks the end of the string content
/// * `is_text_content` - Whether to treat the content as text by default
///
/// # Returns
/// Extracted string value
fn read_string_value(
    reader: &mut PartReader<'_, UnifiedReader>,
    end_tag: QName,
    is_text_content: bool,
) -> Result<String, SheetError> {
    let mut is_phonetic_text = false;
    let mut is_text = is_text_content;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.name() == end_tag => break,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.name() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && event.name() == TAG_TEXT => is_text = false,
        Event::Text(event) if is_text => append_text(&mut text, &event)?,
        Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
        Event::GeneralRef(event) if is_text => append_reference(&mut text, &event)?,
    });
    Ok(text)
}
