//! Part lookup inside an OOXML package.
//!
//! Part names are matched ignoring ASCII case, a leading `/` and the
//! direction of path separators, since producers disagree on all three.

use crate::error::SheetError;
use crate::helpers::xml::XmlReader;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use zip::read::ZipFile;
use zip::ZipArchive;

/// Streaming XML reader over one part of the package
pub(crate) type PartReader<'a, RS> = XmlReader<BufReader<ZipFile<'a, RS>>>;

pub(crate) trait PackageParts<RS: Read + Seek> {
    /// Opens a part, or returns `None` when the package has no such part.
    fn open_part(&mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, SheetError>;

    fn open_xml_part(&mut self, name: &str) -> Result<Option<PartReader<'_, RS>>, SheetError>;
}

impl<RS: Read + Seek> PackageParts<RS> for ZipArchive<RS> {
    fn open_part(&mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, SheetError> {
        let wanted = normalize_part_name(name);
        let index = (0..self.len()).find(|index| {
            self.name_for_index(*index)
                .map(|entry| normalize_part_name(entry) == wanted)
                .unwrap_or(false)
        });
        match index {
            Some(index) => Ok(Some(self.by_index(index)?)),
            None => Ok(None),
        }
    }

    fn open_xml_part(&mut self, name: &str) -> Result<Option<PartReader<'_, RS>>, SheetError> {
        Ok(self.open_part(name)?.map(|part| XmlReader::new(BufReader::new(part))))
    }
}

fn normalize_part_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_ascii_lowercase()
}
