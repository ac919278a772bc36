//! Packaging of request outputs into a single ZIP archive.
use crate::error::SheetError;
use crate::naming::is_safe_component;
use std::collections::HashSet;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Duplicate archive entry '{0}'")]
    DuplicateEntry(String),

    #[error("Invalid archive entry name '{0}'")]
    InvalidEntryName(String),

    #[error("Cannot write archive: {0}")]
    WriteError(String),
}

/// Builds Deflate-compressed ZIP archives from named blobs.
pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// Packages `entries` in order.
    ///
    /// Entry names are relative paths made of safe components; a name that
    /// repeats, is absolute or walks up with `..` is rejected before anything
    /// is written.
    pub fn build(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, SheetError> {
        let mut names = HashSet::<&str>::with_capacity(entries.len());
        for (name, _) in entries {
            if !name.split('/').all(is_safe_component) {
                Err(ArchiveError::InvalidEntryName(name.to_owned()))?
            }
            if !names.insert(name) {
                Err(ArchiveError::DuplicateEntry(name.to_owned()))?
            }
        }

        Self::write(entries).map_err(|error| ArchiveError::WriteError(error.to_string()).into())
    }

    fn write(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, SheetError> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}

/// Reads archives produced by [`ArchiveBuilder`].
pub struct ArchiveReader;

impl ArchiveReader {
    /// Returns every file entry as `(name, bytes)`, in archive order.
    pub fn entries(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, SheetError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let mut file = zip.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let mut content = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut content)?;
            entries.push((file.name().to_owned(), content));
        }
        Ok(entries)
    }
}
