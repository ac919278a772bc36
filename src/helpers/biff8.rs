//! BIFF8 record stream reader (Excel 97-2003 `Workbook` stream)
//!
//! A record is a 2-byte type, a 2-byte length and its payload. Payloads longer
//! than 8224 bytes spill into following CONTINUE records; the reader joins
//! them into one logical record and tracks the chunk boundaries, because a
//! string crossing a boundary restarts with a fresh option byte.

use crate::error::SheetError;
use encoding_rs::Encoding;
use encoding_rs::UTF_16LE;
use thiserror::Error;

const CONTINUE: u16 = 0x003C;

#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Record 0x{kind:04X} needs {wanted} more bytes")]
    ShortRecord { kind: u16, wanted: usize },

    #[error("Record at offset {0} runs past the end of the stream")]
    TruncatedStream(usize),
}

/// Sequential reader over the records of a BIFF8 stream.
pub(crate) struct RecordReader {
    /// Encoding of 8-bit strings, from the CODEPAGE record; `None` means Latin-1
    encoding: Option<&'static Encoding>,
    buffer: Vec<u8>,
    /// Start of the next record header
    pointer: usize,
    kind: u16,
    /// Payload ranges of the current record and its CONTINUE records
    chunks: Vec<(usize, usize)>,
    chunk: usize,
    offset: usize,
}

impl RecordReader {
    pub(crate) fn new(buffer: Vec<u8>) -> RecordReader {
        RecordReader {
            encoding: None,
            buffer,
            pointer: 0,
            kind: 0,
            chunks: Vec::new(),
            chunk: 0,
            offset: 0,
        }
    }

    /// Sets the code page used by 8-bit strings.
    /// Code page 1200 (UTF-16) keeps the Latin-1 reading of compressed strings.
    pub(crate) fn set_encoding(&mut self, encoding: &'static Encoding) {
        self.encoding = (encoding != UTF_16LE).then_some(encoding);
    }

    /// Moves to the record header at `pointer`.
    pub(crate) fn seek(&mut self, pointer: usize) {
        self.pointer = pointer;
        self.chunks.clear();
    }

    /// Advances to the next record and returns its type, or `None` at the end of the stream.
    pub(crate) fn next(&mut self) -> Result<Option<u16>, SheetError> {
        let Some((kind, lower, upper)) = self.header_at(self.pointer)? else {
            return Ok(None);
        };
        self.kind = kind;
        self.chunk = 0;
        self.offset = 0;
        self.chunks.clear();
        self.chunks.push((lower, upper));
        self.pointer = upper;
        while let Some((CONTINUE, lower, upper)) = self.header_at(self.pointer)? {
            self.chunks.push((lower, upper));
            self.pointer = upper;
        }
        Ok(Some(kind))
    }

    /// Reads the record header at `pointer` as (type, payload start, payload end).
    fn header_at(&self, pointer: usize) -> Result<Option<(u16, usize, usize)>, Biff8Error> {
        if pointer + 4 > self.buffer.len() {
            return Ok(None);
        }
        let kind = u16::from_le_bytes([self.buffer[pointer], self.buffer[pointer + 1]]);
        let size = u16::from_le_bytes([self.buffer[pointer + 2], self.buffer[pointer + 3]]) as usize;
        let lower = pointer + 4;
        let upper = lower + size;
        if upper > self.buffer.len() {
            return Err(Biff8Error::TruncatedStream(pointer));
        }
        Ok(Some((kind, lower, upper)))
    }

    /// Total payload length of the current record, CONTINUE records included.
    pub(crate) fn len(&self) -> usize {
        self.chunks.iter().map(|(lower, upper)| upper - lower).sum()
    }

    /// Reads up to `length` bytes without crossing into the next chunk.
    fn take(&mut self, length: usize) -> &[u8] {
        let Some(&(lower, upper)) = self.chunks.get(self.chunk) else {
            return &[];
        };
        let source = lower + self.offset;
        let target = upper.min(source + length);
        if target == upper {
            self.chunk += 1;
            self.offset = 0;
        } else {
            self.offset += target - source;
        }
        &self.buffer[source..target]
    }

    /// Reads exactly `N` bytes, joining chunks when a value straddles a boundary.
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SheetError> {
        let mut array = [0u8; N];
        let mut filled = 0usize;
        while filled < N {
            let kind = self.kind;
            let bytes = self.take(N - filled);
            if bytes.is_empty() {
                Err(Biff8Error::ShortRecord { kind, wanted: N - filled })?
            }
            array[filled..filled + bytes.len()].copy_from_slice(bytes);
            filled += bytes.len();
        }
        Ok(array)
    }

    /// Skips `length` bytes of the current record.
    pub(crate) fn skip(&mut self, length: usize) -> Result<(), SheetError> {
        let mut rest = length;
        while rest > 0 {
            let kind = self.kind;
            let size = self.take(rest).len();
            if size == 0 {
                Err(Biff8Error::ShortRecord { kind, wanted: rest })?
            }
            rest -= size;
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, SheetError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, SheetError> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, SheetError> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, SheetError> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, SheetError> {
        self.read_array().map(f64::from_le_bytes)
    }

    /// Reads an RK value: a 30-bit integer or the high bits of a double,
    /// optionally scaled by 1/100.
    pub(crate) fn read_rk(&mut self) -> Result<f64, SheetError> {
        let raw = self.read_u32()?;
        let mut value = if raw & 0x02 != 0 {
            ((raw as i32) >> 2) as f64
        } else {
            f64::from_bits(((raw & 0xFFFF_FFFC) as u64) << 32)
        };
        if raw & 0x01 != 0 {
            value /= 100.0;
        }
        Ok(value)
    }

    /// Reads a ShortXLUnicodeString (8-bit character count).
    pub(crate) fn read_short_string(&mut self) -> Result<String, SheetError> {
        let chars = self.read_u8()? as usize;
        self.read_string(chars, false)
    }

    /// Reads an XLUnicodeString (16-bit character count).
    pub(crate) fn read_string16(&mut self) -> Result<String, SheetError> {
        let chars = self.read_u16()? as usize;
        self.read_string(chars, false)
    }

    /// Reads an XLUnicodeRichExtendedString as stored in the shared string table.
    pub(crate) fn read_rich_string(&mut self) -> Result<String, SheetError> {
        let chars = self.read_u16()? as usize;
        self.read_string(chars, true)
    }

    /// Reads `chars` characters after the option byte, skipping formatting
    /// runs and phonetic data of rich strings.
    fn read_string(&mut self, chars: usize, is_rich: bool) -> Result<String, SheetError> {
        let flags = self.read_u8()?;
        let runs = if is_rich && flags & 0x08 != 0 { self.read_u16()? as usize } else { 0 };
        let phonetic = if is_rich && flags & 0x04 != 0 { self.read_u32()? as usize } else { 0 };

        let encoding = self.encoding;
        let mut text = String::new();
        let mut is_wide = flags & 0x01 != 0;
        let mut rest = chars;
        loop {
            let width = if is_wide { 2 } else { 1 };
            let bytes = self.take(rest * width);
            let taken = bytes.len() / width;
            if is_wide {
                text.push_str(&UTF_16LE.decode_without_bom_handling(bytes).0);
            } else {
                match encoding {
                    Some(encoding) => text.push_str(&encoding.decode_without_bom_handling(bytes).0),
                    None => text.extend(bytes.iter().map(|byte| *byte as char)),
                }
            }
            rest -= taken;
            if rest == 0 {
                break;
            }
            if self.chunks.get(self.chunk).is_none() {
                let kind = self.kind;
                Err(Biff8Error::ShortRecord { kind, wanted: rest * width })?
            }
            // The remainder continues in the next chunk behind a new option byte.
            is_wide = self.read_u8()? & 0x01 != 0;
        }

        self.skip(runs * 4 + phonetic)?;
        Ok(text)
    }
}

/// Loops over the remaining records, dispatching on the record type.
#[macro_export]
macro_rules! match_records {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn reads_records_in_order() {
        let mut stream = Vec::new();
        record(&mut stream, 0x0203, &[1, 0, 2, 0]);
        record(&mut stream, 0x000A, &[]);
        let mut reader = RecordReader::new(stream);

        assert_eq!(reader.next().unwrap(), Some(0x0203));
        assert_eq!(reader.len(), 4);
        assert_eq!(reader.read_u16().unwrap(), 1);
        assert_eq!(reader.read_u16().unwrap(), 2);
        assert!(reader.read_u8().is_err());
        assert_eq!(reader.next().unwrap(), Some(0x000A));
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut stream = Vec::new();
        record(&mut stream, 0x0203, &[1, 0, 2, 0]);
        stream.truncate(6);
        let mut reader = RecordReader::new(stream);
        assert!(matches!(reader.next(), Err(SheetError::Biff8Error(Biff8Error::TruncatedStream(0)))));
    }

    #[test]
    fn rk_values() {
        let mut stream = Vec::new();
        let integer = (123u32 << 2) | 0x02;
        let scaled = (150u32 << 2) | 0x03;
        let double = ((1.5f64.to_bits() >> 32) as u32) & 0xFFFF_FFFC;
        let payload: Vec<u8> = [integer, scaled, double].iter().flat_map(|value| value.to_le_bytes()).collect();
        record(&mut stream, 0x027E, &payload);
        let mut reader = RecordReader::new(stream);
        reader.next().unwrap();
        assert_eq!(reader.read_rk().unwrap(), 123.0);
        assert_eq!(reader.read_rk().unwrap(), 1.5);
        assert_eq!(reader.read_rk().unwrap(), 1.5);
    }

    #[test]
    fn strings_cross_continue_records() {
        // "héllo wörld" split after 4 characters: compressed first, UTF-16 after.
        let mut first = vec![11, 0, 0];
        first.extend_from_slice(&[b'h', 0xE9, b'l', b'l']);
        let mut second = vec![1];
        second.extend("o wörld".encode_utf16().flat_map(|unit| unit.to_le_bytes()));
        let mut stream = Vec::new();
        record(&mut stream, 0x00FC, &first);
        record(&mut stream, CONTINUE, &second);
        let mut reader = RecordReader::new(stream);

        assert_eq!(reader.next().unwrap(), Some(0x00FC));
        assert_eq!(reader.read_rich_string().unwrap(), "héllo wörld");
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn compressed_strings_follow_the_code_page() {
        let mut stream = Vec::new();
        record(&mut stream, 0x0204, &[2, 0, 0, 0xC4, 0xE3]);
        let mut reader = RecordReader::new(stream.clone());
        reader.set_encoding(encoding_rs::GBK);
        reader.next().unwrap();
        assert_eq!(reader.read_string16().unwrap(), "你");

        let mut reader = RecordReader::new(stream);
        reader.set_encoding(UTF_16LE);
        reader.next().unwrap();
        assert_eq!(reader.read_string16().unwrap(), "Äã");
    }

    #[test]
    fn wide_strings() {
        let mut stream = Vec::new();
        record(&mut stream, 0x0204, &wide_string16("日本"));
        let mut reader = RecordReader::new(stream);
        reader.next().unwrap();
        assert_eq!(reader.read_string16().unwrap(), "日本");
        assert_eq!(string16("ab"), vec![2, 0, 0, b'a', b'b']);
    }
}
