//! ZIP reader for inspecting finished archives
//!
//! Reads the central directory (including ZIP64 end records) and extracts
//! entries with CRC-32 verification. Works over any `Read + Seek`, so an
//! archive collected from the generator can be checked straight from memory.

use crate::error::{ArchiveError, Result};
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;
const ZIP64_LOCATOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];

/// End record (22 bytes) plus the largest possible comment
const MAX_EOCD_SEARCH: u64 = 22 + u16::MAX as u64;

/// Entry in the ZIP central directory
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub offset: u64,
}

/// ZIP archive reader
pub struct StreamingZipReader<R: Read + Seek> {
    input: R,
    entries: Vec<ZipEntry>,
}

impl StreamingZipReader<BufReader<File>> {
    /// Open a ZIP file and read its central directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

impl StreamingZipReader<Cursor<Vec<u8>>> {
    /// Read an archive held in memory
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes.into()))
    }
}

impl<R: Read + Seek> StreamingZipReader<R> {
    /// Read the central directory from any seekable source
    pub fn from_reader(mut input: R) -> Result<Self> {
        let entries = read_central_directory(&mut input)?;
        Ok(Self { input, entries })
    }

    /// All entries, in central directory order
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read an entry by name
    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| ArchiveError::EntryNotFound(name.to_string()))?
            .clone();

        self.read_entry(&entry)
    }

    /// Read and decompress an entry, verifying its CRC-32
    pub fn read_entry(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(entry.uncompressed_size.min(1 << 24) as usize);
        self.read_entry_streaming(entry)?.read_to_end(&mut data)?;

        let actual = crc32fast::hash(&data);
        if actual != entry.crc32 {
            return Err(ArchiveError::ChecksumMismatch {
                name: entry.name.clone(),
                expected: entry.crc32,
                actual,
            });
        }
        Ok(data)
    }

    /// Decompressing reader over an entry's data, without CRC verification
    pub fn read_entry_streaming(&mut self, entry: &ZipEntry) -> Result<Box<dyn Read + '_>> {
        self.input.seek(SeekFrom::Start(entry.offset))?;

        let signature = read_u32(&mut self.input)?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ArchiveError::InvalidFormat(format!(
                "invalid local file header signature for `{}`: 0x{:08x}",
                entry.name, signature
            )));
        }

        // version, flags, method, time, date, crc, sizes
        self.input.seek(SeekFrom::Current(22))?;
        let name_len = read_u16(&mut self.input)? as i64;
        let extra_len = read_u16(&mut self.input)? as i64;
        self.input.seek(SeekFrom::Current(name_len + extra_len))?;

        let limited = (&mut self.input).take(entry.compressed_size);
        match entry.compression_method {
            0 => Ok(Box::new(limited)),
            8 => Ok(Box::new(DeflateDecoder::new(limited))),
            #[cfg(feature = "zstd-support")]
            93 => Ok(Box::new(zstd::Decoder::new(limited)?)),
            other => Err(ArchiveError::UnsupportedCompression(other)),
        }
    }

    /// Extract every entry in archive order as `(name, content)` pairs
    pub fn extract_all(&mut self) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.entries.clone();
        entries
            .iter()
            .map(|entry| Ok((entry.name.clone(), self.read_entry(entry)?)))
            .collect()
    }
}

fn read_central_directory<R: Read + Seek>(input: &mut R) -> Result<Vec<ZipEntry>> {
    let eocd_offset = find_eocd(input)?;
    input.seek(SeekFrom::Start(eocd_offset + 4))?;

    let mut eocd = [0u8; 18];
    input.read_exact(&mut eocd)?;
    let total_entries_16 = le_u16(&eocd[6..]);
    let cd_size_32 = le_u32(&eocd[8..]);
    let cd_offset_32 = le_u32(&eocd[12..]);

    let (total_entries, cd_offset) =
        if total_entries_16 == u16::MAX || cd_size_32 == u32::MAX || cd_offset_32 == u32::MAX {
            read_zip64_eocd(input, eocd_offset)?
        } else {
            (total_entries_16 as u64, cd_offset_32 as u64)
        };

    input.seek(SeekFrom::Start(cd_offset))?;
    let mut entries = Vec::with_capacity(total_entries.min(1 << 16) as usize);
    for _ in 0..total_entries {
        let mut fixed = [0u8; 46];
        input.read_exact(&mut fixed)?;
        if le_u32(&fixed) != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(ArchiveError::InvalidFormat(
                "truncated central directory".to_string(),
            ));
        }

        let compression_method = le_u16(&fixed[10..]);
        let crc32 = le_u32(&fixed[16..]);
        let compressed_32 = le_u32(&fixed[20..]);
        let uncompressed_32 = le_u32(&fixed[24..]);
        let name_len = le_u16(&fixed[28..]) as usize;
        let extra_len = le_u16(&fixed[30..]) as usize;
        let comment_len = le_u16(&fixed[32..]) as i64;
        let offset_32 = le_u32(&fixed[42..]);

        let mut name = vec![0u8; name_len];
        input.read_exact(&mut name)?;
        let mut extra = vec![0u8; extra_len];
        input.read_exact(&mut extra)?;
        input.seek(SeekFrom::Current(comment_len))?;

        // ZIP64 extra holds only the fields whose 32-bit value is saturated, in this order
        let mut zip64 = zip64_extra(&extra).chunks_exact(8).map(le_u64);
        let mut widen = |value: u32| {
            if value == u32::MAX {
                zip64.next().unwrap_or(value as u64)
            } else {
                value as u64
            }
        };
        let uncompressed_size = widen(uncompressed_32);
        let compressed_size = widen(compressed_32);
        let offset = widen(offset_32);

        entries.push(ZipEntry {
            name: String::from_utf8_lossy(&name).into_owned(),
            crc32,
            compressed_size,
            uncompressed_size,
            compression_method,
            offset,
        });
    }

    Ok(entries)
}

/// Data of the ZIP64 (0x0001) extra block, or an empty slice
fn zip64_extra(extra: &[u8]) -> &[u8] {
    let mut rest = extra;
    while rest.len() >= 4 {
        let id = le_u16(rest);
        let len = le_u16(&rest[2..]) as usize;
        let Some(data) = rest.get(4..4 + len) else {
            break;
        };
        if id == 0x0001 {
            return data;
        }
        rest = &rest[4 + len..];
    }
    &[]
}

/// Returns (total entries, central directory offset) from the ZIP64 end record
fn read_zip64_eocd<R: Read + Seek>(input: &mut R, eocd_offset: u64) -> Result<(u64, u64)> {
    // The locator sits immediately before the classic end record
    let locator_offset = eocd_offset
        .checked_sub(20)
        .ok_or_else(|| ArchiveError::InvalidFormat("ZIP64 EOCD locator not found".to_string()))?;
    input.seek(SeekFrom::Start(locator_offset))?;
    let mut locator = [0u8; 20];
    input.read_exact(&mut locator)?;
    if locator[..4] != ZIP64_LOCATOR_SIGNATURE {
        return Err(ArchiveError::InvalidFormat(
            "ZIP64 EOCD locator not found".to_string(),
        ));
    }

    input.seek(SeekFrom::Start(le_u64(&locator[8..])))?;
    let mut record = [0u8; 56];
    input.read_exact(&mut record)?;
    let signature = le_u32(&record);
    if signature != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(ArchiveError::InvalidFormat(format!(
            "invalid ZIP64 EOCD signature: 0x{:08x}",
            signature
        )));
    }

    Ok((le_u64(&record[32..]), le_u64(&record[48..])))
}

/// Find the end of central directory record by scanning back from the end
fn find_eocd<R: Read + Seek>(input: &mut R) -> Result<u64> {
    let size = input.seek(SeekFrom::End(0))?;
    let search_start = size.saturating_sub(MAX_EOCD_SEARCH);
    input.seek(SeekFrom::Start(search_start))?;

    let mut tail = Vec::with_capacity((size - search_start) as usize);
    input.read_to_end(&mut tail)?;

    let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
    tail.windows(4)
        .rposition(|window| window == signature)
        .map(|pos| search_start + pos as u64)
        .ok_or_else(|| {
            ArchiveError::InvalidFormat("end of central directory not found".to_string())
        })
}

fn read_u16<R: Read>(input: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(input: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{CompressionMethod, StreamingZipWriter};

    fn archive(method: CompressionMethod, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = StreamingZipWriter::with_method(Vec::new(), method, 6);
        for (name, content) in files {
            writer.start_entry(name).unwrap();
            writer.write_data(content).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_reads_entries_in_order() {
        let bytes = archive(
            CompressionMethod::Deflate,
            &[("a.txt", b"hello"), ("dir/b.txt", b"world")],
        );
        let mut reader = StreamingZipReader::from_bytes(bytes).unwrap();
        let names: Vec<_> = reader.entries().iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, ["a.txt", "dir/b.txt"]);
        assert_eq!(reader.read_entry_by_name("dir/b.txt").unwrap(), b"world");
    }

    #[test]
    fn test_stored_entries() {
        let bytes = archive(CompressionMethod::Stored, &[("raw.bin", &[1, 2, 3, 4])]);
        let mut reader = StreamingZipReader::from_bytes(bytes).unwrap();
        let entry = reader.entries()[0].clone();
        assert_eq!(entry.compression_method, 0);
        assert_eq!(entry.compressed_size, 4);
        assert_eq!(reader.read_entry(&entry).unwrap(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_archive() {
        let bytes = archive(CompressionMethod::Deflate, &[]);
        let reader = StreamingZipReader::from_bytes(bytes).unwrap();
        assert!(reader.entries().is_empty());
    }

    #[test]
    fn test_missing_entry() {
        let bytes = archive(CompressionMethod::Deflate, &[("a.txt", b"x")]);
        let mut reader = StreamingZipReader::from_bytes(bytes).unwrap();
        assert!(matches!(
            reader.read_entry_by_name("nope"),
            Err(ArchiveError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_corrupted_data_fails_crc() {
        let mut bytes = archive(CompressionMethod::Stored, &[("a.txt", b"hello")]);
        // stored payload starts right after the 35-byte local header
        bytes[35] = b'j';
        let mut reader = StreamingZipReader::from_bytes(bytes).unwrap();
        assert!(matches!(
            reader.read_entry_by_name("a.txt"),
            Err(ArchiveError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_not_a_zip() {
        assert!(matches!(
            StreamingZipReader::from_bytes(b"definitely not a zip".to_vec()),
            Err(ArchiveError::InvalidFormat(_))
        ));
    }
}
