//! OLE compound file reader.
//!
//! Legacy `.xls` workbooks keep their record stream inside a compound file:
//! a small FAT file system made of fixed-size sectors. Streams shorter than
//! the mini stream cutoff live in 64-byte mini sectors carved out of the root
//! entry's own stream. Sector indexes and chains come from the upload: every
//! index is bounds-checked and no walk takes more steps than the file has
//! sectors.

use crate::error::SheetError;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use thiserror::Error;

const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const HEADER_SIZE: usize = 512;
const MAX_REGULAR_SECTOR: u32 = 0xFFFF_FFFA;
const MINI_SECTOR_SIZE: usize = 64;
const MINI_STREAM_CUTOFF: u64 = 4096;
const DIRECTORY_ENTRY_SIZE: usize = 128;

const ENTRY_STREAM: u8 = 2;
const ENTRY_ROOT: u8 = 5;

/// Errors raised while reading the compound file structure
#[derive(Error, Debug)]
pub enum CfbError {
    #[error("Compound file is shorter than its header")]
    Truncated,

    #[error("Invalid compound file signature")]
    Signature,

    #[error("Invalid sector size 2^{shift} for major version {version}")]
    SectorSize { version: u16, shift: u16 },

    #[error("Sector {0} lies outside the compound file")]
    SectorOutOfRange(u32),

    #[error("Sector chain starting at {0} never ends")]
    EndlessChain(u32),

    #[error("Compound file has no root entry")]
    MissingRoot,
}

/// Sector storage: either the whole file or the mini stream
struct Sectors {
    data: Vec<u8>,
    size: usize,
    /// Offset of sector 0 (the header occupies one regular sector)
    base: usize,
}

impl Sectors {
    /// Number of sectors stored, counting a trailing partial one.
    fn capacity(&self) -> usize {
        self.data.len().saturating_sub(self.base).div_ceil(self.size)
    }

    fn sector(&self, index: u32) -> Result<&[u8], CfbError> {
        let start = (index as usize)
            .checked_mul(self.size)
            .and_then(|offset| offset.checked_add(self.base))
            .filter(|start| *start < self.data.len())
            .ok_or(CfbError::SectorOutOfRange(index))?;
        let end = self.data.len().min(start + self.size);
        Ok(&self.data[start..end])
    }

    /// Concatenates the sectors of the chain starting at `start`, up to `limit` bytes.
    fn chain(&self, table: &[u32], start: u32, limit: usize) -> Result<Vec<u8>, CfbError> {
        let capacity = self.capacity();
        let mut content = Vec::new();
        let mut index = start;
        let mut steps = 0usize;
        while index <= MAX_REGULAR_SECTOR && content.len() < limit {
            steps += 1;
            if steps > capacity {
                return Err(CfbError::EndlessChain(start));
            }
            content.extend_from_slice(self.sector(index)?);
            index = *table.get(index as usize).ok_or(CfbError::SectorOutOfRange(index))?;
        }
        content.truncate(limit);
        Ok(content)
    }
}

/// A stream entry of the directory
#[derive(Copy, Clone, Debug)]
struct Entry {
    start: u32,
    size: u64,
}

/// An opened compound file with its streams indexed by name.
pub(crate) struct CompoundFile {
    entries: HashMap<String, Entry>,
    fat: Vec<u32>,
    sectors: Sectors,
    mini_fat: Vec<u32>,
    mini_stream: Sectors,
}

impl CompoundFile {
    /// Reads the whole container and its directory.
    pub(crate) fn open<RS: Read + Seek>(reader: &mut RS) -> Result<CompoundFile, SheetError> {
        let mut data = Vec::new();
        reader.seek(SeekFrom::Start(0))?;
        reader.read_to_end(&mut data)?;
        if data.len() < HEADER_SIZE {
            Err(CfbError::Truncated)?
        }
        if data[..8] != SIGNATURE {
            Err(CfbError::Signature)?
        }

        let version = le_u16(&data, 26);
        let shift = le_u16(&data, 30);
        let size = match (version, shift) {
            (3, 9) => 512,
            (4, 12) => 4096,
            _ => Err(CfbError::SectorSize { version, shift })?,
        };
        let header = Header {
            fat_sectors: le_u32(&data, 44) as usize,
            directory_start: le_u32(&data, 48),
            mini_fat_start: le_u32(&data, 60),
            mini_fat_sectors: le_u32(&data, 64) as usize,
            difat_start: le_u32(&data, 68),
            difat_sectors: le_u32(&data, 72) as usize,
        };
        let head_difat: Vec<u32> = data[76..HEADER_SIZE].chunks_exact(4).map(|chunk| le_u32(chunk, 0)).collect();
        let sectors = Sectors { data, size, base: size };

        let fat = load_fat(&sectors, &header, head_difat)?;
        let directory = sectors.chain(&fat, header.directory_start, usize::MAX)?;
        let (root, entries) = load_entries(&directory, version)?;
        let mini_fat = if header.mini_fat_sectors > 0 {
            let bytes = sectors.chain(&fat, header.mini_fat_start, header.mini_fat_sectors.saturating_mul(size))?;
            to_u32_vec(&bytes)
        } else {
            Vec::new()
        };
        let mini_stream = Sectors {
            data: sectors.chain(&fat, root.start, clamp_size(root.size))?,
            size: MINI_SECTOR_SIZE,
            base: 0,
        };

        Ok(CompoundFile {
            entries,
            fat,
            sectors,
            mini_fat,
            mini_stream,
        })
    }

    /// Returns true if a stream with this name exists (names compare case-insensitively).
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    /// Reads a stream by name.
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, SheetError> {
        let entry = match self.entries.get(&name.to_lowercase()) {
            Some(entry) => *entry,
            None => return Ok(None),
        };
        let limit = clamp_size(entry.size);
        let bytes = if entry.size < MINI_STREAM_CUTOFF {
            self.mini_stream.chain(&self.mini_fat, entry.start, limit)?
        } else {
            self.sectors.chain(&self.fat, entry.start, limit)?
        };
        Ok(Some(bytes))
    }
}

struct Header {
    fat_sectors: usize,
    directory_start: u32,
    mini_fat_start: u32,
    mini_fat_sectors: usize,
    difat_start: u32,
    difat_sectors: usize,
}

/// Collects the FAT from the sectors listed in the header and the DIFAT chain.
fn load_fat(sectors: &Sectors, header: &Header, mut difat: Vec<u32>) -> Result<Vec<u32>, CfbError> {
    let mut index = header.difat_start;
    let mut visited = 0usize;
    while index <= MAX_REGULAR_SECTOR {
        visited += 1;
        if visited > header.difat_sectors.min(sectors.capacity()) {
            break;
        }
        let mut entries = to_u32_vec(sectors.sector(index)?);
        index = entries.pop().unwrap_or(u32::MAX);
        difat.extend(entries);
    }

    let mut fat = Vec::new();
    for index in difat
        .into_iter()
        .take(header.fat_sectors.min(sectors.capacity()))
        .filter(|index| *index <= MAX_REGULAR_SECTOR)
    {
        fat.extend(to_u32_vec(sectors.sector(index)?));
    }
    Ok(fat)
}

/// Parses directory entries, returning the root entry and the streams by lowercase name.
fn load_entries(directory: &[u8], version: u16) -> Result<(Entry, HashMap<String, Entry>), CfbError> {
    let mut root = None;
    let mut entries = HashMap::new();
    for bytes in directory.chunks_exact(DIRECTORY_ENTRY_SIZE) {
        let kind = bytes[66];
        if kind != ENTRY_STREAM && kind != ENTRY_ROOT {
            continue;
        }
        let length = (le_u16(bytes, 64) as usize).min(64);
        let (name, _) = UTF_16LE.decode_without_bom_handling(&bytes[..length]);
        let name = name.trim_end_matches('\0').to_lowercase();
        let size = if version == 3 { le_u32(bytes, 120) as u64 } else { le_u64(bytes, 120) };
        let entry = Entry { start: le_u32(bytes, 116), size };
        if kind == ENTRY_ROOT {
            if root.is_none() {
                root = Some(entry);
            }
        } else {
            entries.entry(name).or_insert(entry);
        }
    }
    Ok((root.ok_or(CfbError::MissingRoot)?, entries))
}

fn clamp_size(size: u64) -> usize {
    usize::try_from(size).unwrap_or(usize::MAX)
}

fn to_u32_vec(bytes: &[u8]) -> Vec<u32> {
    bytes.chunks_exact(4).map(|chunk| le_u32(chunk, 0)).collect()
}

// Callers check lengths before reading fixed header and entry offsets.
fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    (le_u32(bytes, offset) as u64) | ((le_u32(bytes, offset + 4) as u64) << 32)
}

/// Builds version 3 compound files for tests.
#[cfg(test)]
pub(crate) mod testing {
    const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
    const FREE: u32 = 0xFFFF_FFFF;
    const FAT_SECTOR: u32 = 0xFFFF_FFFD;
    const NO_STREAM: u32 = 0xFFFF_FFFF;

    fn entry(name: &str, kind: u8, right: u32, child: u32, start: u32, size: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; 128];
        let units: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
        for (index, unit) in units.iter().enumerate() {
            bytes[index * 2..index * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        bytes[64..66].copy_from_slice(&((units.len() * 2) as u16).to_le_bytes());
        bytes[66] = kind;
        bytes[67] = 1;
        bytes[68..72].copy_from_slice(&NO_STREAM.to_le_bytes());
        bytes[72..76].copy_from_slice(&right.to_le_bytes());
        bytes[76..80].copy_from_slice(&child.to_le_bytes());
        bytes[116..120].copy_from_slice(&start.to_le_bytes());
        bytes[120..124].copy_from_slice(&(size as u32).to_le_bytes());
        bytes
    }

    fn chain(table: &mut Vec<u32>, first: usize, count: usize) {
        for index in first..first + count {
            table[index] = if index + 1 == first + count { END_OF_CHAIN } else { index as u32 + 1 };
        }
    }

    /// Lays out streams with 512-byte sectors: FAT, directory, mini FAT,
    /// mini stream, then the regular streams. At most three streams.
    pub(crate) fn compound_file(streams: &[(&str, &[u8])]) -> Vec<u8> {
        assert!(streams.len() <= 3);
        let mut mini_stream = Vec::new();
        let mut mini_fat = Vec::new();
        let mut regular = Vec::new();
        let mut placements = Vec::new();
        for (_, bytes) in streams {
            if bytes.len() < 4096 {
                let first = mini_stream.len() / 64;
                let count = bytes.len().div_ceil(64).max(1);
                mini_fat.resize(first + count, FREE);
                chain(&mut mini_fat, first, count);
                mini_stream.extend_from_slice(bytes);
                mini_stream.resize((first + count) * 64, 0);
                placements.push((true, first));
            } else {
                placements.push((false, regular.len()));
                regular.push(*bytes);
            }
        }

        let mini_fat_sectors = if mini_fat.is_empty() { 0 } else { 1 };
        let mini_stream_sectors = mini_stream.len().div_ceil(512);
        let mut next = 2 + mini_fat_sectors + mini_stream_sectors;
        let mut regular_starts = Vec::new();
        for bytes in &regular {
            regular_starts.push(next);
            next += bytes.len().div_ceil(512);
        }
        assert!(next <= 128);

        let mut fat = vec![FREE; 128];
        fat[0] = FAT_SECTOR;
        fat[1] = END_OF_CHAIN;
        if mini_fat_sectors == 1 {
            fat[2] = END_OF_CHAIN;
        }
        if mini_stream_sectors > 0 {
            chain(&mut fat, 2 + mini_fat_sectors, mini_stream_sectors);
        }
        for (start, bytes) in regular_starts.iter().zip(&regular) {
            chain(&mut fat, *start, bytes.len().div_ceil(512));
        }

        let mut header = vec![0u8; 512];
        header[..8].copy_from_slice(&super::SIGNATURE);
        header[24..26].copy_from_slice(&0x003Eu16.to_le_bytes());
        header[26..28].copy_from_slice(&3u16.to_le_bytes());
        header[28..30].copy_from_slice(&0xFFFEu16.to_le_bytes());
        header[30..32].copy_from_slice(&9u16.to_le_bytes());
        header[32..34].copy_from_slice(&6u16.to_le_bytes());
        header[44..48].copy_from_slice(&1u32.to_le_bytes());
        header[48..52].copy_from_slice(&1u32.to_le_bytes());
        header[56..60].copy_from_slice(&4096u32.to_le_bytes());
        let mini_fat_start = if mini_fat_sectors == 1 { 2 } else { END_OF_CHAIN };
        header[60..64].copy_from_slice(&mini_fat_start.to_le_bytes());
        header[64..68].copy_from_slice(&(mini_fat_sectors as u32).to_le_bytes());
        header[68..72].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
        for index in 0..109 {
            let value = if index == 0 { 0 } else { FREE };
            header[76 + index * 4..80 + index * 4].copy_from_slice(&value.to_le_bytes());
        }

        let mut directory = Vec::new();
        let root_start = if mini_stream_sectors > 0 { (2 + mini_fat_sectors) as u32 } else { END_OF_CHAIN };
        let child = if streams.is_empty() { NO_STREAM } else { 1 };
        directory.extend(entry("Root Entry", 5, NO_STREAM, child, root_start, mini_stream.len()));
        let mut regular_index = 0;
        for (index, ((name, bytes), (is_mini, first))) in streams.iter().zip(&placements).enumerate() {
            let right = if index + 1 < streams.len() { index as u32 + 2 } else { NO_STREAM };
            let start = if *is_mini {
                *first as u32
            } else {
                regular_index += 1;
                regular_starts[regular_index - 1] as u32
            };
            directory.extend(entry(name, 2, right, NO_STREAM, start, bytes.len()));
        }
        directory.resize(512, 0);

        let mut file = header;
        file.extend(fat.iter().flat_map(|value| value.to_le_bytes()));
        file.extend(directory);
        if mini_fat_sectors == 1 {
            let mut sector: Vec<u8> = mini_fat.iter().flat_map(|value| value.to_le_bytes()).collect();
            sector.resize(512, 0xFF);
            file.extend(sector);
        }
        let mut stream = mini_stream;
        stream.resize(mini_stream_sectors * 512, 0);
        file.extend(stream);
        for bytes in regular {
            let mut sector = bytes.to_vec();
            sector.resize(bytes.len().div_ceil(512) * 512, 0);
            file.extend(sector);
        }
        file
    }
}
