//! Generates XLSX packages from datasets.
//!
//! Strings are written inline (`t="inlineStr"`) so no shared string table has
//! to be built. The header row uses a bold cell style; everything else uses
//! the default style.

use crate::dataset::TabularDataset;
use crate::dataset::Value;
use crate::error::SheetError;
use crate::helpers::xml::XmlWriter;
use crate::workbook::reference::col_to_letters;
use crate::workbook::reference::index_to_reference;
use std::io::Cursor;
use std::io::Write;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipWriter;

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PACKAGE_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

const REL_OFFICE_DOCUMENT: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_WORKSHEET: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const REL_STYLES: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";

const CT_RELATIONSHIPS: &str = "application/vnd.openxmlformats-package.relationships+xml";
const CT_WORKBOOK: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
const CT_WORKSHEET: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";

/// Style index of the bold header cells in the generated styles part
const HEADER_STYLE: &str = "1";

/// Writes an XLSX package containing one worksheet per `(name, dataset)` pair,
/// in order. Names must already be valid, unique sheet names.
pub(crate) fn write_workbook(sheets: &[(String, &TabularDataset)]) -> Result<Vec<u8>, SheetError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(&content_types_xml(sheets.len()))?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(&package_relationships_xml())?;

    zip.start_file("xl/workbook.xml", options)?;
    zip.write_all(&workbook_xml(sheets))?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(&workbook_relationships_xml(sheets.len()))?;

    zip.start_file("xl/styles.xml", options)?;
    zip.write_all(&styles_xml())?;

    for (index, (_, dataset)) in sheets.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", index + 1), options)?;
        zip.write_all(&worksheet_xml(dataset))?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

fn content_types_xml(sheet_count: usize) -> Vec<u8> {
    let mut xml = XmlWriter::new();
    xml.open("Types", &[("xmlns", NS_CONTENT_TYPES)]);
    xml.empty("Default", &[("Extension", "rels"), ("ContentType", CT_RELATIONSHIPS)]);
    xml.empty("Default", &[("Extension", "xml"), ("ContentType", "application/xml")]);
    xml.empty("Override", &[("PartName", "/xl/workbook.xml"), ("ContentType", CT_WORKBOOK)]);
    xml.empty("Override", &[("PartName", "/xl/styles.xml"), ("ContentType", CT_STYLES)]);
    for index in 1..=sheet_count {
        let part = format!("/xl/worksheets/sheet{index}.xml");
        xml.empty("Override", &[("PartName", part.as_str()), ("ContentType", CT_WORKSHEET)]);
    }
    xml.close("Types");
    xml.finish()
}

fn package_relationships_xml() -> Vec<u8> {
    let mut xml = XmlWriter::new();
    xml.open("Relationships", &[("xmlns", NS_PACKAGE_RELATIONSHIPS)]);
    xml.empty("Relationship", &[("Id", "rId1"), ("Type", REL_OFFICE_DOCUMENT), ("Target", "xl/workbook.xml")]);
    xml.close("Relationships");
    xml.finish()
}

fn workbook_xml(sheets: &[(String, &TabularDataset)]) -> Vec<u8> {
    let mut xml = XmlWriter::new();
    xml.open("workbook", &[("xmlns", NS_MAIN), ("xmlns:r", NS_RELATIONSHIPS)]);
    xml.open("sheets", &[]);
    for (index, (name, _)) in sheets.iter().enumerate() {
        let sheet_id = (index + 1).to_string();
        let relationship_id = format!("rId{}", index + 1);
        xml.empty("sheet", &[("name", name.as_str()), ("sheetId", sheet_id.as_str()), ("r:id", relationship_id.as_str())]);
    }
    xml.close("sheets");
    xml.close("workbook");
    xml.finish()
}

fn workbook_relationships_xml(sheet_count: usize) -> Vec<u8> {
    let mut xml = XmlWriter::new();
    xml.open("Relationships", &[("xmlns", NS_PACKAGE_RELATIONSHIPS)]);
    for index in 1..=sheet_count {
        let id = format!("rId{index}");
        let target = format!("worksheets/sheet{index}.xml");
        xml.empty("Relationship", &[("Id", id.as_str()), ("Type", REL_WORKSHEET), ("Target", target.as_str())]);
    }
    let styles_id = format!("rId{}", sheet_count + 1);
    xml.empty("Relationship", &[("Id", styles_id.as_str()), ("Type", REL_STYLES), ("Target", "styles.xml")]);
    xml.close("Relationships");
    xml.finish()
}

fn styles_xml() -> Vec<u8> {
    let mut xml = XmlWriter::new();
    xml.open("styleSheet", &[("xmlns", NS_MAIN)]);

    xml.open("fonts", &[("count", "2")]);
    for bold in [false, true] {
        xml.open("font", &[]);
        if bold {
            xml.empty("b", &[]);
        }
        xml.empty("sz", &[("val", "11")]);
        xml.empty("name", &[("val", "Calibri")]);
        xml.close("font");
    }
    xml.close("fonts");

    xml.open("fills", &[("count", "2")]);
    for pattern in ["none", "gray125"] {
        xml.open("fill", &[]);
        xml.empty("patternFill", &[("patternType", pattern)]);
        xml.close("fill");
    }
    xml.close("fills");

    xml.open("borders", &[("count", "1")]);
    xml.open("border", &[]);
    for side in ["left", "right", "top", "bottom", "diagonal"] {
        xml.empty(side, &[]);
    }
    xml.close("border");
    xml.close("borders");

    xml.open("cellStyleXfs", &[("count", "1")]);
    xml.empty("xf", &[("numFmtId", "0"), ("fontId", "0"), ("fillId", "0"), ("borderId", "0")]);
    xml.close("cellStyleXfs");

    xml.open("cellXfs", &[("count", "2")]);
    xml.empty("xf", &[("numFmtId", "0"), ("fontId", "0"), ("fillId", "0"), ("borderId", "0"), ("xfId", "0")]);
    xml.empty("xf", &[("numFmtId", "0"), ("fontId", "1"), ("fillId", "0"), ("borderId", "0"), ("xfId", "0"), ("applyFont", "1")]);
    xml.close("cellXfs");

    xml.open("cellStyles", &[("count", "1")]);
    xml.empty("cellStyle", &[("name", "Normal"), ("xfId", "0"), ("builtinId", "0")]);
    xml.close("cellStyles");

    xml.close("styleSheet");
    xml.finish()
}

/// Writes a worksheet part: the header row, then one row per record.
fn worksheet_xml(dataset: &TabularDataset) -> Vec<u8> {
    let mut xml = XmlWriter::new();
    xml.open("worksheet", &[("xmlns", NS_MAIN), ("xmlns:r", NS_RELATIONSHIPS)]);

    let columns = dataset.columns();
    let dimension = if columns.is_empty() {
        "A1".to_owned()
    } else {
        format!("A1:{}{}", col_to_letters(columns.len() - 1), dataset.row_count() + 1)
    };
    xml.empty("dimension", &[("ref", dimension.as_str())]);

    xml.open("sheetData", &[]);
    if !columns.is_empty() {
        xml.open("row", &[("r", "1")]);
        for (col, name) in columns.iter().enumerate() {
            write_text_cell(&mut xml, &index_to_reference(0, col), name, Some(HEADER_STYLE));
        }
        xml.close("row");
    }
    for (index, record) in dataset.rows().iter().enumerate() {
        let row = index + 1;
        let number = (row + 1).to_string();
        xml.open("row", &[("r", number.as_str())]);
        for (col, value) in record.iter().enumerate() {
            write_cell(&mut xml, &index_to_reference(row, col), value);
        }
        xml.close("row");
    }
    xml.close("sheetData");

    xml.close("worksheet");
    xml.finish()
}

/// Writes a single `<c>` element; nulls and non-finite numbers are omitted.
fn write_cell(xml: &mut XmlWriter, reference: &str, value: &Value) {
    match value {
        Value::Null => (),
        Value::Number(number) if !number.is_finite() => (),
        Value::Number(number) => {
            xml.open("c", &[("r", reference)]);
            xml.open("v", &[]);
            xml.text(&number.to_string());
            xml.close("v");
            xml.close("c");
        }
        Value::Bool(flag) => {
            xml.open("c", &[("r", reference), ("t", "b")]);
            xml.open("v", &[]);
            xml.text(if *flag { "1" } else { "0" });
            xml.close("v");
            xml.close("c");
        }
        Value::Text(text) => write_text_cell(xml, reference, text, None),
    }
}

fn write_text_cell(xml: &mut XmlWriter, reference: &str, text: &str, style: Option<&str>) {
    match style {
        Some(style) => xml.open("c", &[("r", reference), ("s", style), ("t", "inlineStr")]),
        None => xml.open("c", &[("r", reference), ("t", "inlineStr")]),
    }
    xml.open("is", &[]);
    if text.trim() != text {
        xml.open("t", &[("xml:space", "preserve")]);
    } else {
        xml.open("t", &[]);
    }
    xml.text(text);
    xml.close("t");
    xml.close("is");
    xml.close("c");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worksheet_contains_header_and_values() {
        let dataset = TabularDataset::new(
            vec!["type".to_owned(), "qty".to_owned(), "ok".to_owned()],
            vec![vec![Value::from("a & b"), Value::from(2.5), Value::from(true)], vec![Value::Null, Value::from(3.0)]],
        );
        let xml = String::from_utf8(worksheet_xml(&dataset)).unwrap();
        assert!(xml.contains(r#"<dimension ref="A1:C3"/>"#));
        assert!(xml.contains(r#"<c r="A1" s="1" t="inlineStr"><is><t>type</t></is></c>"#));
        assert!(xml.contains(r#"<c r="A2" t="inlineStr"><is><t>a &amp; b</t></is></c>"#));
        assert!(xml.contains(r#"<c r="B2"><v>2.5</v></c>"#));
        assert!(xml.contains(r#"<c r="C2" t="b"><v>1</v></c>"#));
        assert!(!xml.contains(r#"r="A3""#));
        assert!(xml.contains(r#"<c r="B3"><v>3</v></c>"#));
    }

    #[test]
    fn workbook_lists_sheets_in_order() {
        let first = TabularDataset::default();
        let second = TabularDataset::default();
        let xml = String::from_utf8(workbook_xml(&[("b".to_owned(), &first), ("a".to_owned(), &second)])).unwrap();
        let b = xml.find(r#"name="b""#).unwrap();
        let a = xml.find(r#"name="a""#).unwrap();
        assert!(b < a);
        assert!(xml.contains(r#"sheetId="2" r:id="rId2""#));
    }

    #[test]
    fn leading_spaces_are_preserved() {
        let mut xml = XmlWriter::new();
        write_text_cell(&mut xml, "A1", " x", None);
        let xml = String::from_utf8(xml.finish()).unwrap();
        assert!(xml.contains(r#"<t xml:space="preserve"> x</t>"#));
    }
}
