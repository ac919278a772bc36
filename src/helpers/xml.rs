//! Streaming access to SpreadsheetML parts and a small writer for generated ones.
//!
//! The reader expands `<x/>` into a start and an end event and keeps
//! whitespace, since `<t xml:space="preserve">` text is significant.

use crate::error::SheetError;
use quick_xml::escape::escape;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Unknown entity '&{0};'")]
    UnknownEntity(String),

    #[error("Attribute {name}=\"{value}\" has an unexpected value")]
    InvalidAttribute { name: String, value: String },
}

/// Pull reader over one package part, reusing a single event buffer.
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    pub(crate) fn new(source: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(source);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = false;
        config.check_comments = false;
        config.trim_text(false);
        XmlReader {
            reader,
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Next event, or `None` once the document is exhausted.
    pub(crate) fn next(&mut self) -> Result<Option<Event<'_>>, SheetError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer)? {
            Event::Eof => Ok(None),
            event => Ok(Some(event)),
        }
    }
}

/// Attribute lookup on start tags.
pub(crate) trait ElementAttributes<'a> {
    /// Unescaped value of the attribute with this qualified name.
    fn attr(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetError>;

    /// Unescaped value of the first attribute whose local name matches,
    /// whatever its prefix (`r:id` and `id` both match `id`).
    fn local_attr(&'a self, local_name: &str) -> Result<Option<Cow<'a, str>>, SheetError>;

    /// Attribute value parsed with [`FromStr`].
    fn attr_as<T: FromStr>(&'a self, name: &str) -> Result<Option<T>, SheetError>;
}

impl<'a> ElementAttributes<'a> for BytesStart<'a> {
    fn attr(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetError> {
        match self.try_get_attribute(name)? {
            Some(attribute) => Ok(Some(unescaped(attribute)?)),
            None => Ok(None),
        }
    }

    fn local_attr(&'a self, local_name: &str) -> Result<Option<Cow<'a, str>>, SheetError> {
        for attribute in self.attributes() {
            let attribute = attribute?;
            if attribute.key.local_name().as_ref() == local_name.as_bytes() {
                return Ok(Some(unescaped(attribute)?));
            }
        }
        Ok(None)
    }

    fn attr_as<T: FromStr>(&'a self, name: &str) -> Result<Option<T>, SheetError> {
        let Some(value) = self.attr(name)? else {
            return Ok(None);
        };
        match value.parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(XmlError::InvalidAttribute {
                name: name.to_owned(),
                value: value.into_owned(),
            })?,
        }
    }
}

fn unescaped(attribute: Attribute<'_>) -> Result<Cow<'_, str>, SheetError> {
    Ok(attribute.unescape_value()?)
}

/// Appends the content of a text event.
pub(crate) fn append_text(target: &mut String, text: &BytesText) -> Result<(), SheetError> {
    target.push_str(&text.xml_content()?);
    Ok(())
}

/// Appends the character behind `&name;`, `&#n;` or `&#xh;`.
/// Numeric references to invalid code points are dropped.
pub(crate) fn append_reference(target: &mut String, reference: &BytesRef) -> Result<(), SheetError> {
    let raw = reference.xml_content()?;
    let code = match raw.strip_prefix("#x").or_else(|| raw.strip_prefix("#X")) {
        Some(hex) => Some(u32::from_str_radix(hex, 16)?),
        None => match raw.strip_prefix('#') {
            Some(decimal) => Some(decimal.parse::<u32>()?),
            None => None,
        },
    };
    match code {
        Some(code) => target.extend(char::from_u32(code)),
        None => target.push_str(resolve_xml_entity(&raw).ok_or_else(|| XmlError::UnknownEntity(raw.to_string()))?),
    }
    Ok(())
}

/// Declaration written at the top of every generated part
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Minimal XML writer over a string buffer, escaping text and attribute values
pub(crate) struct XmlWriter {
    buffer: String,
}

impl XmlWriter {
    /// Creates a writer with the XML declaration already written
    pub(crate) fn new() -> XmlWriter {
        let mut buffer = String::with_capacity(4096);
        buffer.push_str(XML_DECLARATION);
        buffer.push('\n');
        XmlWriter { buffer }
    }

    /// Writes a start tag with the given attributes
    pub(crate) fn open(&mut self, tag: &str, attributes: &[(&str, &str)]) {
        self.push_tag(tag, attributes);
        self.buffer.push('>');
    }

    /// Writes a self-closing tag with the given attributes
    pub(crate) fn empty(&mut self, tag: &str, attributes: &[(&str, &str)]) {
        self.push_tag(tag, attributes);
        self.buffer.push_str("/>");
    }

    /// Writes an end tag
    pub(crate) fn close(&mut self, tag: &str) {
        self.buffer.push_str("</");
        self.buffer.push_str(tag);
        self.buffer.push('>');
    }

    /// Writes escaped text content, dropping control characters XML 1.0 cannot carry
    pub(crate) fn text(&mut self, text: &str) {
        if text.chars().any(is_forbidden_char) {
            let cleaned: String = text.chars().filter(|c| !is_forbidden_char(*c)).collect();
            self.buffer.push_str(&escape(cleaned.as_str()));
        } else {
            self.buffer.push_str(&escape(text));
        }
    }

    /// Consumes the writer and returns the document bytes
    pub(crate) fn finish(self) -> Vec<u8> {
        self.buffer.into_bytes()
    }

    fn push_tag(&mut self, tag: &str, attributes: &[(&str, &str)]) {
        self.buffer.push('<');
        self.buffer.push_str(tag);
        for (key, value) in attributes {
            self.buffer.push(' ');
            self.buffer.push_str(key);
            self.buffer.push_str("=\"");
            self.buffer.push_str(&escape(*value));
            self.buffer.push('"');
        }
    }
}

fn is_forbidden_char(c: char) -> bool {
    c < '\u{20}' && c != '\t' && c != '\n' && c != '\r'
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn writer_escapes_text_and_attributes() {
        let mut writer = XmlWriter::new();
        writer.open("sheet", &[("name", "a<b>\"c\"")]);
        writer.text("x & y");
        writer.close("sheet");
        let xml = String::from_utf8(writer.finish()).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.ends_with(r#"<sheet name="a&lt;b&gt;&quot;c&quot;">x &amp; y</sheet>"#));
    }

    #[test]
    fn writer_drops_control_characters() {
        let mut writer = XmlWriter::new();
        writer.empty("br", &[]);
        writer.text("a\u{1}b\tc");
        let xml = String::from_utf8(writer.finish()).unwrap();
        assert!(xml.ends_with("<br/>ab\tc"));
    }

    #[test]
    fn reader_round_trips_writer_output() -> Result<(), SheetError> {
        let mut writer = XmlWriter::new();
        writer.open("t", &[("id", "7")]);
        writer.text("caf\u{e9} & co");
        writer.close("t");
        let bytes = writer.finish();

        let mut reader = XmlReader::new(Cursor::new(bytes));
        let mut id = None::<usize>;
        let mut text = String::new();
        match_xml_events!(reader => {
            Event::Start(event) => id = event.attr_as("id")?,
            Event::Text(event) => append_text(&mut text, &event)?,
            Event::GeneralRef(event) => append_reference(&mut text, &event)?,
        });
        assert_eq!(id, Some(7));
        assert_eq!(text, "caf\u{e9} & co");
        Ok(())
    }

    #[test]
    fn attributes_by_local_name_and_type() -> Result<(), SheetError> {
        let xml = r#"<sheet name="A&amp;B" r:id="rId3" sheetId="x"/><t>&#x41;&#66;&lt;</t>"#;
        let mut reader = XmlReader::new(Cursor::new(xml.as_bytes()));
        let mut text = String::new();
        match_xml_events!(reader => {
            Event::Start(event) if event.name().as_ref() == b"sheet" => {
                assert_eq!(event.attr("name")?.as_deref(), Some("A&B"));
                assert_eq!(event.local_attr("id")?.as_deref(), Some("rId3"));
                assert_eq!(event.attr("id")?, None);
                assert!(matches!(
                    event.attr_as::<usize>("sheetId"),
                    Err(SheetError::XmlHelperError(XmlError::InvalidAttribute { .. }))
                ));
            }
            Event::Text(event) => append_text(&mut text, &event)?,
            Event::GeneralRef(event) => append_reference(&mut text, &event)?,
        });
        assert_eq!(text, "AB<");
        Ok(())
    }
}
