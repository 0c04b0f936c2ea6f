//! Streaming ZIP reader for EPUB files
//!
//! Reads the central directory once into a fixed-size cache and then seeks
//! to individual entries on demand. Supports stored and DEFLATE entries,
//! using miniz_oxide for decompression and crc32fast for integrity checks.
//! The reader sits behind the small [`Archive`] trait the rest of the crate
//! is written against.

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use heapless::Vec as HeaplessVec;
use log;
use miniz_oxide::{DataFormat, MZFlush, MZStatus};
use std::io::{Read, Seek, SeekFrom};

/// Maximum number of central directory entries to cache
const MAX_CD_ENTRIES: usize = 512;

/// Maximum filename length in ZIP entries
const MAX_FILENAME_LEN: usize = 256;

/// Compressed input chunk size used while inflating
const INPUT_CHUNK: usize = 8 * 1024;

/// Archive access used by the package, content and TOC layers.
pub trait Archive {
    /// Whether `path` names an entry.
    fn exists(&self, path: &str) -> bool;
    /// Uncompressed size of `path`.
    fn size(&self, path: &str) -> Option<usize>;
    /// Read and decompress `path`.
    fn read(&mut self, path: &str) -> Result<Vec<u8>, ZipError>;
    /// Release the underlying handle's resources. Calling twice is harmless.
    fn close(&mut self) {}
    /// Counters since the archive was opened.
    fn stats(&self) -> ArchiveStats;
}

/// Archive read counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Entries read to completion.
    pub entries_read: usize,
    /// Uncompressed bytes returned.
    pub bytes_read: usize,
}

/// Runtime-configurable ZIP safety limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZipLimits {
    /// Maximum compressed or uncompressed file size allowed for reads.
    pub max_file_read_size: usize,
    /// Maximum allowed size for the required `mimetype` entry.
    pub max_mimetype_size: usize,
    /// Whether ZIP parsing should fail on strict structural issues.
    pub strict: bool,
    /// Maximum bytes scanned from file tail while searching for EOCD.
    pub max_eocd_scan: usize,
}

impl ZipLimits {
    /// Create explicit ZIP limits.
    pub fn new(max_file_read_size: usize, max_mimetype_size: usize) -> Self {
        Self {
            max_file_read_size,
            max_mimetype_size,
            strict: false,
            max_eocd_scan: MAX_EOCD_SCAN,
        }
    }

    /// Enable or disable strict ZIP parsing behavior.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set a cap for EOCD tail scan bytes.
    pub fn with_max_eocd_scan(mut self, max_eocd_scan: usize) -> Self {
        self.max_eocd_scan = max_eocd_scan.max(EOCD_MIN_SIZE);
        self
    }
}

/// Local file header signature (little-endian)
const SIG_LOCAL_FILE_HEADER: u32 = 0x04034b50;

/// Central directory entry signature (little-endian)
const SIG_CD_ENTRY: u32 = 0x02014b50;

/// End of central directory signature (little-endian)
const SIG_EOCD: u32 = 0x06054b50;
/// ZIP64 end of central directory locator signature (little-endian)
const SIG_ZIP64_EOCD_LOCATOR: u32 = 0x07064b50;
/// Minimum EOCD record size in bytes
const EOCD_MIN_SIZE: usize = 22;
/// Maximum EOCD search window (EOCD + max comment length)
const MAX_EOCD_SCAN: usize = EOCD_MIN_SIZE + u16::MAX as usize;

/// Compression methods
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// Required prefix of the `mimetype` entry.
const EPUB_MIMETYPE: &str = "application/epub+zip";

pub use crate::error::ZipError;

#[derive(Clone, Copy, Debug)]
struct EocdInfo {
    cd_offset: u64,
    cd_size: u32,
    num_entries: u16,
    uses_zip64: bool,
}

/// Central directory entry metadata
#[derive(Debug, Clone, Default)]
pub struct CdEntry {
    /// Compression method (0=stored, 8=deflated)
    pub method: u16,
    /// Compressed size in bytes
    pub compressed_size: u32,
    /// Uncompressed size in bytes
    pub uncompressed_size: u32,
    /// Offset to local file header
    pub local_header_offset: u32,
    /// CRC32 checksum
    pub crc32: u32,
    /// Filename (max 255 chars)
    pub filename: String,
}

/// Streaming ZIP file reader
pub struct StreamingZip<F: Read + Seek> {
    /// File handle, `None` once closed
    file: Option<F>,
    /// Central directory entries (fixed size)
    entries: HeaplessVec<CdEntry, MAX_CD_ENTRIES>,
    /// Optional configurable resource/safety limits.
    limits: Option<ZipLimits>,
    stats: ArchiveStats,
}

impl<F: Read + Seek> StreamingZip<F> {
    /// Open a ZIP file and parse the central directory
    pub fn new(file: F) -> Result<Self, ZipError> {
        Self::new_with_limits(file, None)
    }

    /// Open a ZIP file with explicit runtime limits.
    pub fn new_with_limits(mut file: F, limits: Option<ZipLimits>) -> Result<Self, ZipError> {
        let max_eocd_scan = limits
            .map(|l| l.max_eocd_scan.min(MAX_EOCD_SCAN))
            .unwrap_or(MAX_EOCD_SCAN);
        let eocd = Self::find_eocd(&mut file, max_eocd_scan)?;
        if eocd.uses_zip64 {
            return Err(ZipError::UnsupportedZip64);
        }
        let strict = limits.is_some_and(|l| l.strict);
        if strict && eocd.num_entries as usize > MAX_CD_ENTRIES {
            return Err(ZipError::CentralDirFull);
        }

        let mut entries: HeaplessVec<CdEntry, MAX_CD_ENTRIES> = HeaplessVec::new();

        file.seek(SeekFrom::Start(eocd.cd_offset))
            .map_err(|_| ZipError::IoError)?;
        let cd_end = eocd.cd_offset + eocd.cd_size as u64;

        for _ in 0..(eocd.num_entries as usize).min(MAX_CD_ENTRIES) {
            let pos = file.stream_position().map_err(|_| ZipError::IoError)?;
            if pos >= cd_end {
                if strict {
                    return Err(ZipError::InvalidFormat);
                }
                break;
            }
            match Self::read_cd_entry(&mut file)? {
                Some(entry) => entries.push(entry).map_err(|_| ZipError::CentralDirFull)?,
                None if strict => return Err(ZipError::InvalidFormat),
                None => break,
            }
        }

        if eocd.num_entries as usize > MAX_CD_ENTRIES {
            log::warn!(
                "[ZIP] Archive has {} entries but only {} were loaded (max: {})",
                eocd.num_entries,
                entries.len(),
                MAX_CD_ENTRIES
            );
        }

        log::debug!(
            "[ZIP] Parsed {} central directory entries (offset {})",
            entries.len(),
            eocd.cd_offset
        );

        Ok(Self {
            file: Some(file),
            entries,
            limits,
            stats: ArchiveStats::default(),
        })
    }

    /// Find EOCD and extract central directory info
    fn find_eocd(file: &mut F, max_eocd_scan: usize) -> Result<EocdInfo, ZipError> {
        let file_size = file.seek(SeekFrom::End(0)).map_err(|_| ZipError::IoError)?;

        if file_size < EOCD_MIN_SIZE as u64 {
            return Err(ZipError::InvalidFormat);
        }

        let scan_range = file_size.min(max_eocd_scan as u64) as usize;
        let mut buffer = alloc::vec![0u8; scan_range];

        file.seek(SeekFrom::Start(file_size - scan_range as u64))
            .map_err(|_| ZipError::IoError)?;
        file.read_exact(&mut buffer).map_err(|_| ZipError::IoError)?;
        let scan_base = file_size - scan_range as u64;

        // Scan backwards so a signature inside the comment is not mistaken for the record.
        for i in (0..=scan_range.saturating_sub(EOCD_MIN_SIZE)).rev() {
            if read_u32_le(&buffer, i) != SIG_EOCD {
                continue;
            }
            let num_entries = read_u16_le(&buffer, i + 10);
            let cd_size = read_u32_le(&buffer, i + 12);
            let cd_offset = read_u32_le(&buffer, i + 16) as u64;
            let comment_len = read_u16_le(&buffer, i + 20) as u64;
            let eocd_pos = scan_base + i as u64;
            if eocd_pos + EOCD_MIN_SIZE as u64 + comment_len != file_size {
                continue;
            }

            let cd_end = cd_offset
                .checked_add(cd_size as u64)
                .ok_or(ZipError::InvalidFormat)?;
            if cd_end > eocd_pos {
                return Err(ZipError::InvalidFormat);
            }

            let uses_zip64_sentinel =
                num_entries == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX as u64;
            let uses_zip64_locator = if eocd_pos >= 20 {
                file.seek(SeekFrom::Start(eocd_pos - 20))
                    .map_err(|_| ZipError::IoError)?;
                let mut locator_sig = [0u8; 4];
                file.read_exact(&mut locator_sig)
                    .map_err(|_| ZipError::IoError)?;
                u32::from_le_bytes(locator_sig) == SIG_ZIP64_EOCD_LOCATOR
            } else {
                false
            };

            return Ok(EocdInfo {
                cd_offset,
                cd_size,
                num_entries,
                uses_zip64: uses_zip64_sentinel || uses_zip64_locator,
            });
        }

        Err(ZipError::InvalidFormat)
    }

    /// Read a central directory entry from file
    fn read_cd_entry(file: &mut F) -> Result<Option<CdEntry>, ZipError> {
        let mut sig_buf = [0u8; 4];
        if file.read_exact(&mut sig_buf).is_err() {
            return Ok(None);
        }
        if u32::from_le_bytes(sig_buf) != SIG_CD_ENTRY {
            return Ok(None);
        }

        // Fixed part after the signature; buf[N] is CD offset N + 4.
        let mut buf = [0u8; 42];
        file.read_exact(&mut buf).map_err(|_| ZipError::IoError)?;

        let mut entry = CdEntry {
            method: read_u16_le(&buf, 6),
            crc32: read_u32_le(&buf, 12),
            compressed_size: read_u32_le(&buf, 16),
            uncompressed_size: read_u32_le(&buf, 20),
            local_header_offset: read_u32_le(&buf, 38),
            ..CdEntry::default()
        };
        let name_len = read_u16_le(&buf, 24) as usize;
        let extra_len = read_u16_le(&buf, 26) as usize;
        let comment_len = read_u16_le(&buf, 28) as usize;

        if name_len > 0 && name_len <= MAX_FILENAME_LEN {
            let mut name_buf = alloc::vec![0u8; name_len];
            file.read_exact(&mut name_buf)
                .map_err(|_| ZipError::IoError)?;
            entry.filename = String::from_utf8_lossy(&name_buf).to_string();
        } else if name_len > MAX_FILENAME_LEN {
            file.seek(SeekFrom::Current(name_len as i64))
                .map_err(|_| ZipError::IoError)?;
        }

        let skip_bytes = extra_len + comment_len;
        if skip_bytes > 0 {
            file.seek(SeekFrom::Current(skip_bytes as i64))
                .map_err(|_| ZipError::IoError)?;
        }

        Ok(Some(entry))
    }

    /// Get entry by filename (case-insensitive)
    pub fn get_entry(&self, name: &str) -> Option<&CdEntry> {
        let name = name.strip_prefix('/').unwrap_or(name);
        self.entries
            .iter()
            .find(|e| e.filename == name)
            .or_else(|| {
                self.entries.iter().find(|e| {
                    let stored = e.filename.strip_prefix('/').unwrap_or(&e.filename);
                    stored.eq_ignore_ascii_case(name)
                })
            })
    }

    /// Read and decompress one entry into a new buffer.
    pub fn read_entry(&mut self, entry: &CdEntry) -> Result<Vec<u8>, ZipError> {
        if let Some(limits) = self.limits {
            if entry.uncompressed_size as usize > limits.max_file_read_size
                || entry.compressed_size as usize > limits.max_file_read_size
            {
                return Err(ZipError::FileTooLarge);
            }
        }

        let data_offset = self.calc_data_offset(entry)?;
        let file = self.file.as_mut().ok_or(ZipError::IoError)?;
        file.seek(SeekFrom::Start(data_offset))
            .map_err(|_| ZipError::IoError)?;

        let data = match entry.method {
            METHOD_STORED => {
                let mut data = alloc::vec![0u8; entry.compressed_size as usize];
                file.read_exact(&mut data).map_err(|_| ZipError::IoError)?;
                data
            }
            METHOD_DEFLATED => inflate_entry(file, entry)?,
            _ => return Err(ZipError::UnsupportedCompression),
        };

        if entry.crc32 != 0 && crc32fast::hash(&data) != entry.crc32 {
            return Err(ZipError::CrcMismatch);
        }

        self.stats.entries_read += 1;
        self.stats.bytes_read += data.len();
        Ok(data)
    }

    /// Calculate the offset to the actual file data (past local header)
    fn calc_data_offset(&mut self, entry: &CdEntry) -> Result<u64, ZipError> {
        let file = self.file.as_mut().ok_or(ZipError::IoError)?;
        let offset = entry.local_header_offset as u64;
        file.seek(SeekFrom::Start(offset))
            .map_err(|_| ZipError::IoError)?;

        let mut header = [0u8; 30];
        file.read_exact(&mut header)
            .map_err(|_| ZipError::IoError)?;

        if read_u32_le(&header, 0) != SIG_LOCAL_FILE_HEADER {
            return Err(ZipError::InvalidFormat);
        }

        let name_len = read_u16_le(&header, 26) as u64;
        let extra_len = read_u16_le(&header, 28) as u64;
        Ok(offset + 30 + name_len + extra_len)
    }

    /// Check that the `mimetype` entry starts with `application/epub+zip`.
    pub fn validate_mimetype(&mut self) -> Result<(), ZipError> {
        let entry = self
            .get_entry("mimetype")
            .ok_or_else(|| {
                ZipError::InvalidMimetype("mimetype file not found in archive".to_string())
            })?
            .clone();

        if let Some(limits) = self.limits {
            if entry.uncompressed_size as usize > limits.max_mimetype_size {
                return Err(ZipError::InvalidMimetype(
                    "mimetype file too large".to_string(),
                ));
            }
        }

        let data = self.read_entry(&entry)?;
        if !data.starts_with(EPUB_MIMETYPE.as_bytes()) {
            return Err(ZipError::InvalidMimetype(format!(
                "expected '{}', got '{}'",
                EPUB_MIMETYPE,
                String::from_utf8_lossy(&data)
            )));
        }
        Ok(())
    }

    /// Number of cached central directory entries
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over all entries
    pub fn entries(&self) -> impl Iterator<Item = &CdEntry> {
        self.entries.iter()
    }

    /// Get the active limits used by this ZIP reader.
    pub fn limits(&self) -> Option<ZipLimits> {
        self.limits
    }
}

impl<F: Read + Seek> Archive for StreamingZip<F> {
    fn exists(&self, path: &str) -> bool {
        self.get_entry(path).is_some()
    }

    fn size(&self, path: &str) -> Option<usize> {
        self.get_entry(path).map(|e| e.uncompressed_size as usize)
    }

    fn read(&mut self, path: &str) -> Result<Vec<u8>, ZipError> {
        let entry = self.get_entry(path).ok_or(ZipError::FileNotFound)?.clone();
        self.read_entry(&entry)
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            log::debug!("[ZIP] Archive closed");
        }
        self.entries.clear();
    }

    fn stats(&self) -> ArchiveStats {
        self.stats
    }
}

fn inflate_entry<F: Read>(file: &mut F, entry: &CdEntry) -> Result<Vec<u8>, ZipError> {
    let mut state =
        alloc::boxed::Box::new(miniz_oxide::inflate::stream::InflateState::new(DataFormat::Raw));
    let mut input_buf = alloc::vec![0u8; INPUT_CHUNK];
    let mut out = alloc::vec![0u8; entry.uncompressed_size as usize];
    let mut compressed_remaining = entry.compressed_size as usize;
    let mut pending: &[u8] = &[];
    let mut written = 0usize;

    loop {
        if pending.is_empty() && compressed_remaining > 0 {
            let take = core::cmp::min(compressed_remaining, input_buf.len());
            file.read_exact(&mut input_buf[..take])
                .map_err(|_| ZipError::IoError)?;
            pending = &input_buf[..take];
            compressed_remaining -= take;
        }

        let flush = if compressed_remaining == 0 {
            MZFlush::Finish
        } else {
            MZFlush::None
        };
        let result =
            miniz_oxide::inflate::stream::inflate(&mut state, pending, &mut out[written..], flush);
        let consumed = result.bytes_consumed;
        let produced = result.bytes_written;
        pending = &pending[consumed..];
        written += produced;

        match result.status {
            Ok(MZStatus::StreamEnd) => {
                if compressed_remaining != 0 || !pending.is_empty() {
                    return Err(ZipError::DecompressError);
                }
                break;
            }
            Ok(MZStatus::Ok) => {
                if consumed == 0 && produced == 0 {
                    // Declared size too small or a truncated stream.
                    return Err(ZipError::DecompressError);
                }
            }
            Ok(MZStatus::NeedDict) | Err(_) => return Err(ZipError::DecompressError),
        }
    }

    out.truncate(written);
    Ok(out)
}

fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// In-memory archive builder shared by unit tests.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a ZIP with the given entries; entries over 64 bytes are deflated.
    pub(crate) fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = Vec::new();
        let mut central = Vec::new();

        for (name, content) in files {
            let name_bytes = name.as_bytes();
            let crc = crc32fast::hash(content);
            let (method, data) = if content.len() > 64 {
                (
                    METHOD_DEFLATED,
                    miniz_oxide::deflate::compress_to_vec(content, 6),
                )
            } else {
                (METHOD_STORED, content.to_vec())
            };
            let local_offset = zip.len() as u32;

            zip.extend_from_slice(&SIG_LOCAL_FILE_HEADER.to_le_bytes());
            zip.extend_from_slice(&20u16.to_le_bytes()); // version needed
            zip.extend_from_slice(&0u16.to_le_bytes()); // flags
            zip.extend_from_slice(&method.to_le_bytes());
            zip.extend_from_slice(&0u32.to_le_bytes()); // mod time + date
            zip.extend_from_slice(&crc.to_le_bytes());
            zip.extend_from_slice(&(data.len() as u32).to_le_bytes());
            zip.extend_from_slice(&(content.len() as u32).to_le_bytes());
            zip.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            zip.extend_from_slice(&0u16.to_le_bytes()); // extra length
            zip.extend_from_slice(name_bytes);
            zip.extend_from_slice(&data);

            central.extend_from_slice(&SIG_CD_ENTRY.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes()); // version made by
            central.extend_from_slice(&20u16.to_le_bytes()); // version needed
            central.extend_from_slice(&0u16.to_le_bytes()); // flags
            central.extend_from_slice(&method.to_le_bytes());
            central.extend_from_slice(&0u32.to_le_bytes()); // mod time + date
            central.extend_from_slice(&crc.to_le_bytes());
            central.extend_from_slice(&(data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(content.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // extra length
            central.extend_from_slice(&0u16.to_le_bytes()); // comment length
            central.extend_from_slice(&0u16.to_le_bytes()); // disk number start
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            central.extend_from_slice(&local_offset.to_le_bytes());
            central.extend_from_slice(name_bytes);
        }

        let cd_offset = zip.len() as u32;
        let cd_size = central.len() as u32;
        zip.extend_from_slice(&central);

        let count = files.len() as u16;
        zip.extend_from_slice(&SIG_EOCD.to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes()); // disk number
        zip.extend_from_slice(&0u16.to_le_bytes()); // disk with CD
        zip.extend_from_slice(&count.to_le_bytes());
        zip.extend_from_slice(&count.to_le_bytes());
        zip.extend_from_slice(&cd_size.to_le_bytes());
        zip.extend_from_slice(&cd_offset.to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes()); // comment length
        zip
    }
}
