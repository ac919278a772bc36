use crate::error::SheetError;
use std::fs::File;
use std::io::BufReader;
use std::io::Cursor;
use std::io::Read;
use std::io::Seek;
use std::path::Path;

/// Magic bytes of an OLE compound file (legacy .xls, or an encrypted OOXML package)
const CFB_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Magic bytes of a ZIP local file header
const ZIP_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Container format detected from the leading bytes of a workbook
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Container {
    Zip,
    CompoundFile,
    Unknown,
}

/// A unified reader over either a workspace file or an in-memory upload
pub(crate) enum UnifiedReader {
    /// Local file reader
    Local(BufReader<File>),
    /// In-memory buffer
    Memory(Cursor<Vec<u8>>),
}

impl UnifiedReader {
    /// Opens a file stored on the local file system
    pub(crate) fn open(path: &Path) -> Result<UnifiedReader, SheetError> {
        let file = File::open(path)?;
        Ok(UnifiedReader::Local(BufReader::new(file)))
    }

    /// Wraps bytes that are already in memory
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> UnifiedReader {
        UnifiedReader::Memory(Cursor::new(bytes))
    }

    /// Sniffs the container format and rewinds the reader to the start
    pub(crate) fn container(&mut self) -> Result<Container, SheetError> {
        let mut head = [0u8; 8];
        let mut filled = 0usize;
        while filled < head.len() {
            let count = self.read(&mut head[filled..])?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        self.rewind()?;

        let container = if filled >= CFB_SIGNATURE.len() && head == CFB_SIGNATURE {
            Container::CompoundFile
        } else if filled >= ZIP_SIGNATURE.len() && head[..4] == ZIP_SIGNATURE {
            Container::Zip
        } else {
            Container::Unknown
        };
        Ok(container)
    }
}

impl Read for UnifiedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            UnifiedReader::Local(reader) => reader.read(buf),
            UnifiedReader::Memory(reader) => reader.read(buf),
        }
    }
}

impl Seek for UnifiedReader {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        match self {
            UnifiedReader::Local(reader) => reader.seek(pos),
            UnifiedReader::Memory(reader) => reader.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_container() {
        let mut reader = UnifiedReader::from_bytes(vec![0x50, 0x4B, 0x03, 0x04, 0, 0]);
        assert_eq!(reader.container().unwrap(), Container::Zip);

        let mut reader = UnifiedReader::from_bytes(CFB_SIGNATURE.to_vec());
        assert_eq!(reader.container().unwrap(), Container::CompoundFile);

        let mut reader = UnifiedReader::from_bytes(b"a,b,c\n".to_vec());
        assert_eq!(reader.container().unwrap(), Container::Unknown);

        let mut reader = UnifiedReader::from_bytes(Vec::new());
        assert_eq!(reader.container().unwrap(), Container::Unknown);
    }

    #[test]
    fn test_container_rewinds() {
        let mut reader = UnifiedReader::from_bytes(b"PK\x03\x04rest".to_vec());
        reader.container().unwrap();
        let mut content = Vec::new();
        reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"PK\x03\x04rest");
    }

    #[test]
    fn test_open_local_file() {
        // Test opening a local file (Cargo.toml should exist)
        let result = UnifiedReader::open(Path::new("Cargo.toml"));
        assert!(result.is_ok(), "Failed to open local file: {:?}", result.err());

        // Test opening a non-existent local file
        let result = UnifiedReader::open(Path::new("non_existent_file.xlsx"));
        assert!(result.is_err(), "Should fail to open non-existent file");
    }
}
