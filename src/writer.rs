//! Streaming ZIP writer that compresses entries on-the-fly into any `Write`
//!
//! The output never needs to seek: every local header carries the
//! data-descriptor flag, and CRC/sizes follow the entry data. Offsets for the
//! central directory are tracked by counting written bytes, so the writer can
//! feed a pipe, a socket or the generator's transfer buffer directly.
//!
//! All methods block on the underlying writer. Inside the generator they only
//! ever run on worker threads.

use crate::error::{ArchiveError, Result};
use chrono::{Datelike, NaiveDateTime, Timelike};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;
const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: u32 = 0x07064b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// Sizes and CRC follow the data in a data descriptor
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// Entry name is UTF-8
const FLAG_UTF8: u16 = 1 << 11;

/// Unix host, ZIP format version 2.0
const VERSION_MADE_BY: u16 = (3 << 8) | 20;
const VERSION_ZIP64: u16 = 45;
/// Regular file, rw-r--r--
const EXTERNAL_ATTRIBUTES: u32 = 0o100644 << 16;

/// Default threshold before compressed bytes are pushed to the output
pub const DEFAULT_FLUSH_THRESHOLD: usize = 8192;

/// Compression method to use for ZIP entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// No compression (stored)
    Stored,
    /// DEFLATE compression (most common)
    #[default]
    Deflate,
    /// Zstd compression (requires zstd-support feature)
    #[cfg(feature = "zstd-support")]
    Zstd,
}

impl CompressionMethod {
    pub(crate) fn to_zip_method(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => 93,
        }
    }

    fn version_needed(self) -> u16 {
        match self {
            CompressionMethod::Stored => 10,
            CompressionMethod::Deflate => 20,
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => 63,
        }
    }
}

/// MS-DOS packed date and time as stored in ZIP headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    /// Packed date: year-1980 (7 bits), month (4 bits), day (5 bits)
    pub date: u16,
    /// Packed time: hour (5 bits), minute (6 bits), second/2 (5 bits)
    pub time: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant
    pub const EPOCH: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// 2107-12-31 23:59:58, the latest representable instant
    pub const MAX: DosDateTime = DosDateTime {
        date: (127 << 9) | (12 << 5) | 31,
        time: (23 << 11) | (59 << 5) | 29,
    };

    /// Pack a calendar timestamp, clamping to the DOS range
    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        let year = datetime.year();
        if year < 1980 {
            return Self::EPOCH;
        }
        if year > 2107 {
            return Self::MAX;
        }

        let date = (((year - 1980) as u16) << 9)
            | ((datetime.month() as u16) << 5)
            | datetime.day() as u16;
        let time = ((datetime.hour() as u16) << 11)
            | ((datetime.minute() as u16) << 5)
            | (datetime.second() as u16 / 2);

        Self { date, time }
    }
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl From<NaiveDateTime> for DosDateTime {
    fn from(datetime: NaiveDateTime) -> Self {
        Self::from_datetime(datetime)
    }
}

/// Entry already written, kept for the central directory
struct ZipEntry {
    name: String,
    flags: u16,
    modified: DosDateTime,
    local_header_offset: u64,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    compression_method: CompressionMethod,
}

struct CurrentEntry {
    name: String,
    flags: u16,
    modified: DosDateTime,
    local_header_offset: u64,
    encoder: Box<dyn CompressorWrite>,
    counter: CrcCounter,
    compression_method: CompressionMethod,
    zip64: bool,
}

trait CompressorWrite: Write + Send {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer>;
    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer;
}

struct StoredCompressor {
    buffer: CompressedBuffer,
}

impl Write for StoredCompressor {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CompressorWrite for StoredCompressor {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer> {
        Ok(self.buffer)
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        &mut self.buffer
    }
}

struct DeflateCompressor {
    encoder: DeflateEncoder<CompressedBuffer>,
}

impl Write for DeflateCompressor {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.encoder.flush()
    }
}

impl CompressorWrite for DeflateCompressor {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer> {
        Ok(self.encoder.finish()?)
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        self.encoder.get_mut()
    }
}

#[cfg(feature = "zstd-support")]
struct ZstdCompressor {
    encoder: zstd::Encoder<'static, CompressedBuffer>,
}

#[cfg(feature = "zstd-support")]
impl Write for ZstdCompressor {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.encoder.flush()
    }
}

#[cfg(feature = "zstd-support")]
impl CompressorWrite for ZstdCompressor {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer> {
        Ok(self.encoder.finish()?)
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        self.encoder.get_mut()
    }
}

/// Metadata tracker for CRC and byte counts
struct CrcCounter {
    crc: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
}

impl CrcCounter {
    fn new() -> Self {
        Self {
            crc: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        }
    }

    fn update_uncompressed(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.uncompressed_count += data.len() as u64;
    }

    fn add_compressed(&mut self, count: u64) {
        self.compressed_count += count;
    }

    fn finalize(&self) -> u32 {
        self.crc.clone().finalize()
    }
}

/// Compressed bytes of the current entry not yet pushed to the output
struct CompressedBuffer {
    buffer: Vec<u8>,
    flush_threshold: usize,
}

impl CompressedBuffer {
    fn new(flush_threshold: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(flush_threshold.min(64 * 1024)),
            flush_threshold,
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn should_flush(&self) -> bool {
        self.buffer.len() >= self.flush_threshold
    }
}

impl Write for CompressedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Tracks the archive offset without requiring `Seek`
struct CountingWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// 32-bit field value, or the ZIP64 marker when it does not fit
fn clamp_u32(value: u64) -> u32 {
    if value >= u32::MAX as u64 {
        u32::MAX
    } else {
        value as u32
    }
}

/// Streaming ZIP writer that compresses data on-the-fly
pub struct StreamingZipWriter<W: Write> {
    output: CountingWriter<W>,
    entries: Vec<ZipEntry>,
    names: HashSet<String>,
    current_entry: Option<CurrentEntry>,
    compression_level: u32,
    compression_method: CompressionMethod,
    flush_threshold: usize,
    zip64_entries: bool,
}

impl<W: Write> StreamingZipWriter<W> {
    /// Create a writer using DEFLATE at the default level (6)
    pub fn new(writer: W) -> Self {
        Self::with_method(writer, CompressionMethod::Deflate, 6)
    }

    /// Create a writer with the given compression method and level
    ///
    /// # Arguments
    /// * `writer` - Destination of the archive bytes
    /// * `method` - Compression method for every entry
    /// * `compression_level` - 0-9 for DEFLATE, 1-21 for Zstd, ignored for Stored
    pub fn with_method(writer: W, method: CompressionMethod, compression_level: u32) -> Self {
        Self {
            output: CountingWriter::new(writer),
            entries: Vec::new(),
            names: HashSet::new(),
            current_entry: None,
            compression_level,
            compression_method: method,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            zip64_entries: false,
        }
    }

    /// Push compressed bytes to the output whenever this many are pending
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    /// Mark every entry as ZIP64 in its local header
    ///
    /// Entry sizes are unknown when the local header is written. Without this
    /// flag an entry over 4 GiB is still listed correctly in the central
    /// directory, but readers that only walk local headers cannot parse it.
    /// With it, each local header carries a ZIP64 extra field and every data
    /// descriptor holds 64-bit sizes.
    pub fn with_zip64_entries(mut self, enabled: bool) -> Self {
        self.zip64_entries = enabled;
        self
    }

    /// Archive bytes written to the output so far
    pub fn bytes_written(&self) -> u64 {
        self.output.position
    }

    /// Number of entries completed or in progress
    pub fn entry_count(&self) -> usize {
        self.entries.len() + usize::from(self.current_entry.is_some())
    }

    /// Start a new entry stamped with the DOS epoch
    pub fn start_entry(&mut self, name: &str) -> Result<()> {
        self.start_entry_at(name, DosDateTime::EPOCH)
    }

    /// Start a new entry (file) with an explicit modification time
    ///
    /// Finishes the previous entry first. Names must be non-empty, fit in 16
    /// bits, and be unique within the archive.
    pub fn start_entry_at(&mut self, name: &str, modified: DosDateTime) -> Result<()> {
        self.finish_current_entry()?;

        if name.is_empty() {
            return Err(ArchiveError::InvalidEntryName {
                name: name.to_string(),
                reason: "name is empty",
            });
        }
        if name.len() > u16::MAX as usize {
            return Err(ArchiveError::InvalidEntryName {
                name: name.to_string(),
                reason: "name longer than 65535 bytes",
            });
        }
        if !self.names.insert(name.to_string()) {
            return Err(ArchiveError::DuplicateEntry(name.to_string()));
        }

        let flags = if name.is_ascii() {
            FLAG_DATA_DESCRIPTOR
        } else {
            FLAG_DATA_DESCRIPTOR | FLAG_UTF8
        };
        let local_header_offset = self.output.position;
        let zip64 = self.zip64_entries;
        let version_needed = if zip64 {
            VERSION_ZIP64.max(self.compression_method.version_needed())
        } else {
            self.compression_method.version_needed()
        };

        let mut header = Vec::with_capacity(30 + name.len() + 20);
        put_u32(&mut header, LOCAL_FILE_HEADER_SIGNATURE);
        put_u16(&mut header, version_needed);
        put_u16(&mut header, flags);
        put_u16(&mut header, self.compression_method.to_zip_method());
        put_u16(&mut header, modified.time);
        put_u16(&mut header, modified.date);
        put_u32(&mut header, 0); // crc32, in data descriptor
        put_u32(&mut header, 0); // compressed size, in data descriptor
        put_u32(&mut header, 0); // uncompressed size, in data descriptor
        put_u16(&mut header, name.len() as u16);
        put_u16(&mut header, if zip64 { 20 } else { 0 }); // extra len
        header.extend_from_slice(name.as_bytes());
        if zip64 {
            // sizes are deferred to the data descriptor
            put_u16(&mut header, 0x0001);
            put_u16(&mut header, 16);
            put_u64(&mut header, 0);
            put_u64(&mut header, 0);
        }
        self.output.write_all(&header)?;

        let buffer = CompressedBuffer::new(self.flush_threshold);
        let encoder: Box<dyn CompressorWrite> = match self.compression_method {
            CompressionMethod::Stored => Box::new(StoredCompressor { buffer }),
            CompressionMethod::Deflate => Box::new(DeflateCompressor {
                encoder: DeflateEncoder::new(buffer, Compression::new(self.compression_level)),
            }),
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => {
                let mut encoder = zstd::Encoder::new(buffer, self.compression_level as i32)?;
                encoder.include_checksum(false)?; // ZIP uses CRC32, not zstd checksum
                Box::new(ZstdCompressor { encoder })
            }
        };

        self.current_entry = Some(CurrentEntry {
            name: name.to_string(),
            flags,
            modified,
            local_header_offset,
            encoder,
            counter: CrcCounter::new(),
            compression_method: self.compression_method,
            zip64,
        });

        Ok(())
    }

    /// Write uncompressed data to the current entry
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let entry = self
            .current_entry
            .as_mut()
            .ok_or_else(|| ArchiveError::InvalidFormat("No entry started".to_string()))?;

        if data.is_empty() {
            return Ok(());
        }

        entry.counter.update_uncompressed(data);
        entry.encoder.write_all(data)?;

        let buffer = entry.encoder.get_buffer_mut();
        if buffer.should_flush() {
            let compressed_data = buffer.take();
            self.output.write_all(&compressed_data)?;
            entry.counter.add_compressed(compressed_data.len() as u64);
        }

        Ok(())
    }

    /// Finish current entry and write its data descriptor
    fn finish_current_entry(&mut self) -> Result<()> {
        let Some(mut entry) = self.current_entry.take() else {
            return Ok(());
        };

        let mut buffer = entry.encoder.finish_compression()?;
        let remaining_data = buffer.take();
        if !remaining_data.is_empty() {
            self.output.write_all(&remaining_data)?;
            entry.counter.add_compressed(remaining_data.len() as u64);
        }

        let crc = entry.counter.finalize();
        let compressed_size = entry.counter.compressed_count;
        let uncompressed_size = entry.counter.uncompressed_count;

        let mut descriptor = Vec::with_capacity(24);
        put_u32(&mut descriptor, DATA_DESCRIPTOR_SIGNATURE);
        put_u32(&mut descriptor, crc);
        let oversized = compressed_size >= u32::MAX as u64 || uncompressed_size >= u32::MAX as u64;
        if oversized && !entry.zip64 {
            tracing::warn!(
                entry = %entry.name,
                uncompressed_size,
                "entry exceeds 4 GiB without a ZIP64 local header; only central directory readers will parse it"
            );
        }
        // ZIP64 data descriptor carries 64-bit sizes
        if entry.zip64 || oversized {
            put_u64(&mut descriptor, compressed_size);
            put_u64(&mut descriptor, uncompressed_size);
        } else {
            put_u32(&mut descriptor, compressed_size as u32);
            put_u32(&mut descriptor, uncompressed_size as u32);
        }
        self.output.write_all(&descriptor)?;

        self.entries.push(ZipEntry {
            name: entry.name,
            flags: entry.flags,
            modified: entry.modified,
            local_header_offset: entry.local_header_offset,
            crc32: crc,
            compressed_size,
            uncompressed_size,
            compression_method: entry.compression_method,
        });

        Ok(())
    }

    /// Finish the archive (central directory and end records) and return the writer
    pub fn finish(mut self) -> Result<W> {
        self.finish_current_entry()?;

        let central_dir_offset = self.output.position;
        for entry in &self.entries {
            let record = Self::central_directory_record(entry);
            self.output.write_all(&record)?;
        }
        let central_dir_size = self.output.position - central_dir_offset;
        let entry_count = self.entries.len() as u64;

        let mut trailer = Vec::with_capacity(98);
        let need_zip64 = entry_count >= u16::MAX as u64
            || central_dir_size >= u32::MAX as u64
            || central_dir_offset >= u32::MAX as u64;

        if need_zip64 {
            let zip64_eocd_offset = central_dir_offset + central_dir_size;

            put_u32(&mut trailer, ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE);
            put_u64(&mut trailer, 44); // size of the remaining record
            put_u16(&mut trailer, VERSION_MADE_BY);
            put_u16(&mut trailer, VERSION_ZIP64);
            put_u32(&mut trailer, 0); // this disk
            put_u32(&mut trailer, 0); // disk with central directory
            put_u64(&mut trailer, entry_count);
            put_u64(&mut trailer, entry_count);
            put_u64(&mut trailer, central_dir_size);
            put_u64(&mut trailer, central_dir_offset);

            put_u32(&mut trailer, ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE);
            put_u32(&mut trailer, 0); // disk with zip64 eocd
            put_u64(&mut trailer, zip64_eocd_offset);
            put_u32(&mut trailer, 1); // total disks
        }

        let count16 = if entry_count >= u16::MAX as u64 {
            u16::MAX
        } else {
            entry_count as u16
        };
        put_u32(&mut trailer, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        put_u16(&mut trailer, 0); // disk number
        put_u16(&mut trailer, 0); // disk with central dir
        put_u16(&mut trailer, count16);
        put_u16(&mut trailer, count16);
        put_u32(&mut trailer, clamp_u32(central_dir_size));
        put_u32(&mut trailer, clamp_u32(central_dir_offset));
        put_u16(&mut trailer, 0); // comment len
        self.output.write_all(&trailer)?;

        self.output.flush()?;
        Ok(self.output.inner)
    }

    fn central_directory_record(entry: &ZipEntry) -> Vec<u8> {
        let mut zip64_extra = Vec::new();
        if entry.uncompressed_size >= u32::MAX as u64 {
            put_u64(&mut zip64_extra, entry.uncompressed_size);
        }
        if entry.compressed_size >= u32::MAX as u64 {
            put_u64(&mut zip64_extra, entry.compressed_size);
        }
        if entry.local_header_offset >= u32::MAX as u64 {
            put_u64(&mut zip64_extra, entry.local_header_offset);
        }

        let mut extra = Vec::new();
        if !zip64_extra.is_empty() {
            put_u16(&mut extra, 0x0001);
            put_u16(&mut extra, zip64_extra.len() as u16);
            extra.extend_from_slice(&zip64_extra);
        }

        let version_needed = if extra.is_empty() {
            entry.compression_method.version_needed()
        } else {
            VERSION_ZIP64.max(entry.compression_method.version_needed())
        };

        let mut record = Vec::with_capacity(46 + entry.name.len() + extra.len());
        put_u32(&mut record, CENTRAL_DIRECTORY_SIGNATURE);
        put_u16(&mut record, VERSION_MADE_BY);
        put_u16(&mut record, version_needed);
        put_u16(&mut record, entry.flags);
        put_u16(&mut record, entry.compression_method.to_zip_method());
        put_u16(&mut record, entry.modified.time);
        put_u16(&mut record, entry.modified.date);
        put_u32(&mut record, entry.crc32);
        put_u32(&mut record, clamp_u32(entry.compressed_size));
        put_u32(&mut record, clamp_u32(entry.uncompressed_size));
        put_u16(&mut record, entry.name.len() as u16);
        put_u16(&mut record, extra.len() as u16);
        put_u16(&mut record, 0); // comment len
        put_u16(&mut record, 0); // disk number start
        put_u16(&mut record, 0); // internal attrs
        put_u32(&mut record, EXTERNAL_ATTRIBUTES);
        put_u32(&mut record, clamp_u32(entry.local_header_offset));
        record.extend_from_slice(entry.name.as_bytes());
        record.extend_from_slice(&extra);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_empty_archive_is_bare_end_record() {
        let out = StreamingZipWriter::new(Vec::new()).finish().unwrap();
        assert_eq!(out.len(), 22);
        assert_eq!(&out[..4], &[0x50, 0x4b, 0x05, 0x06]);
        assert!(out[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_local_header_layout() {
        let mut writer = StreamingZipWriter::with_method(Vec::new(), CompressionMethod::Stored, 0);
        writer.start_entry("a.txt").unwrap();
        writer.write_data(b"hello").unwrap();
        let out = writer.finish().unwrap();

        assert_eq!(&out[..4], &[0x50, 0x4b, 0x03, 0x04]);
        assert_eq!(u16::from_le_bytes([out[6], out[7]]), FLAG_DATA_DESCRIPTOR);
        assert_eq!(u16::from_le_bytes([out[8], out[9]]), 0); // stored
        assert_eq!(&out[30..35], b"a.txt");
        // stored data follows the header verbatim
        assert_eq!(&out[35..40], b"hello");
        // then the data descriptor
        assert_eq!(&out[40..44], &DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        assert_eq!(&out[44..48], &crc32fast::hash(b"hello").to_le_bytes());
    }

    #[test]
    fn test_utf8_flag_for_non_ascii_names() {
        let mut writer = StreamingZipWriter::new(Vec::new());
        writer.start_entry("données.txt").unwrap();
        let out = writer.finish().unwrap();
        let flags = u16::from_le_bytes([out[6], out[7]]);
        assert_eq!(flags, FLAG_DATA_DESCRIPTOR | FLAG_UTF8);
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let mut writer = StreamingZipWriter::new(Vec::new());
        writer.start_entry("pom.xml").unwrap();
        let err = writer.start_entry("pom.xml").unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateEntry(name) if name == "pom.xml"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut writer = StreamingZipWriter::new(Vec::new());
        assert!(matches!(
            writer.start_entry(""),
            Err(ArchiveError::InvalidEntryName { .. })
        ));
    }

    #[test]
    fn test_write_without_entry_fails() {
        let mut writer = StreamingZipWriter::new(Vec::new());
        assert!(writer.write_data(b"orphan").is_err());
    }

    #[test]
    fn test_zip64_local_header_and_descriptor() {
        let mut writer = StreamingZipWriter::with_method(Vec::new(), CompressionMethod::Stored, 0)
            .with_zip64_entries(true);
        writer.start_entry("a.txt").unwrap();
        writer.write_data(b"hello").unwrap();
        let out = writer.finish().unwrap();

        assert_eq!(u16::from_le_bytes([out[4], out[5]]), VERSION_ZIP64);
        assert_eq!(u16::from_le_bytes([out[28], out[29]]), 20); // extra len
        assert_eq!(&out[30..35], b"a.txt");
        assert_eq!(u16::from_le_bytes([out[35], out[36]]), 0x0001);
        assert_eq!(u16::from_le_bytes([out[37], out[38]]), 16);
        assert!(out[39..55].iter().all(|&b| b == 0));
        assert_eq!(&out[55..60], b"hello");

        // signature, crc, then 64-bit compressed and uncompressed sizes
        assert_eq!(&out[60..64], &DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        assert_eq!(&out[68..76], &5u64.to_le_bytes());
        assert_eq!(&out[76..84], &5u64.to_le_bytes());
        assert_eq!(&out[84..88], &CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
    }

    #[test]
    fn test_saturated_values_use_zip64_marker() {
        assert_eq!(clamp_u32(u32::MAX as u64 - 1), u32::MAX - 1);
        assert_eq!(clamp_u32(u32::MAX as u64), u32::MAX);
        assert_eq!(clamp_u32(u64::MAX), u32::MAX);

        let entry = ZipEntry {
            name: "edge.bin".to_string(),
            flags: FLAG_DATA_DESCRIPTOR,
            modified: DosDateTime::EPOCH,
            local_header_offset: 0,
            crc32: 0,
            compressed_size: u32::MAX as u64,
            uncompressed_size: u32::MAX as u64,
            compression_method: CompressionMethod::Stored,
        };
        let record = StreamingZipWriter::<Vec<u8>>::central_directory_record(&entry);
        // both sizes saturated, so both move to the ZIP64 extra field
        assert_eq!(u16::from_le_bytes([record[30], record[31]]), 20);
        assert_eq!(u16::from_le_bytes([record[6], record[7]]), VERSION_ZIP64);
    }

    #[test]
    fn test_flush_threshold_pushes_bytes_early() {
        let mut writer =
            StreamingZipWriter::with_method(Vec::new(), CompressionMethod::Stored, 0)
                .with_flush_threshold(16);
        writer.start_entry("big.bin").unwrap();
        let header_len = writer.bytes_written();
        writer.write_data(&[7u8; 64]).unwrap();
        assert_eq!(writer.bytes_written(), header_len + 64);
        assert_eq!(writer.entry_count(), 1);
    }

    #[test]
    fn test_dos_datetime_packing() {
        let dt = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(13, 45, 31)
            .unwrap();
        let packed = DosDateTime::from_datetime(dt);
        assert_eq!(packed.date, (44 << 9) | (5 << 5) | 17);
        assert_eq!(packed.time, (13 << 11) | (45 << 5) | 15);
    }

    #[test]
    fn test_dos_datetime_clamps() {
        let early = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(DosDateTime::from(early), DosDateTime::EPOCH);

        let late = NaiveDate::from_ymd_opt(2200, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(DosDateTime::from(late), DosDateTime::MAX);
    }

    #[test]
    fn test_compression_method_serde_names() {
        let method: CompressionMethod = serde_json::from_str("\"stored\"").unwrap();
        assert_eq!(method, CompressionMethod::Stored);
        assert_eq!(
            serde_json::to_string(&CompressionMethod::Deflate).unwrap(),
            "\"deflate\""
        );
    }
}
