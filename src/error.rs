//! Unified error types for ink-epub
//!
//! `EpubError` follows the reader's degrade-or-abort taxonomy: only the
//! fatal-format class stops the operation in progress, everything else is
//! reported so the caller can continue with reduced functionality.

extern crate alloc;

use alloc::string::{String, ToString};
use core::fmt;

/// Top-level error type for ink-epub operations
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EpubError {
    /// ZIP archive error
    Zip(ZipError),
    /// XML document could not be parsed
    Parse(String),
    /// CSS parsing error
    Css(String),
    /// I/O error (description only, since `std::io::Error` is not `Clone`)
    Io(String),
    /// Container, package or navigation document lacks required structure
    FatalFormat(String),
    /// A referenced resource is absent from the archive
    ResourceMissing {
        /// Archive path that was looked up.
        path: String,
    },
    /// Cumulative font size would exceed the configured budget
    BudgetExceeded {
        /// Bytes already registered.
        used: usize,
        /// Size of the rejected resource.
        requested: usize,
        /// Configured budget.
        budget: usize,
    },
    /// Resource is obfuscated with a scheme this crate cannot undo
    UnsupportedAlgorithm {
        /// Archive path of the resource.
        path: String,
    },
    /// Persisted TOC failed its identity or size checks
    StaleOrCorruptStore(String),
    /// Persisted TOC held fewer entry records than declared
    PartialRead {
        /// Entry records expected from the header.
        expected: usize,
        /// Entry records actually read.
        read: usize,
    },
    /// Content item media type is not one the reader can display
    UnsupportedMediaType(String),
    /// Spine index requested is out of bounds
    SpineOutOfBounds {
        /// Requested spine index.
        index: usize,
        /// Number of spine entries.
        spine_length: usize,
    },
    /// Operation requires an open book
    NotOpen,
}

impl EpubError {
    /// Whether this error aborts the operation instead of degrading it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EpubError::Zip(_)
                | EpubError::Parse(_)
                | EpubError::FatalFormat(_)
                | EpubError::UnsupportedMediaType(_)
                | EpubError::SpineOutOfBounds { .. }
                | EpubError::NotOpen
        )
    }
}

impl fmt::Display for EpubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpubError::Zip(kind) => write!(f, "ZIP error: {}", kind),
            EpubError::Parse(msg) => write!(f, "Parse error: {}", msg),
            EpubError::Css(msg) => write!(f, "CSS error: {}", msg),
            EpubError::Io(msg) => write!(f, "I/O error: {}", msg),
            EpubError::FatalFormat(msg) => write!(f, "Incompatible book: {}", msg),
            EpubError::ResourceMissing { path } => {
                write!(f, "Resource missing from archive: {}", path)
            }
            EpubError::BudgetExceeded {
                used,
                requested,
                budget,
            } => write!(
                f,
                "Font budget exceeded: {} + {} bytes over {} byte budget",
                used, requested, budget
            ),
            EpubError::UnsupportedAlgorithm { path } => {
                write!(f, "Unsupported obfuscation algorithm for {}", path)
            }
            EpubError::StaleOrCorruptStore(msg) => write!(f, "TOC store rejected: {}", msg),
            EpubError::PartialRead { expected, read } => write!(
                f,
                "TOC store partially read: {} of {} entries",
                read, expected
            ),
            EpubError::UnsupportedMediaType(media_type) => {
                write!(f, "Unsupported media type: {}", media_type)
            }
            EpubError::SpineOutOfBounds {
                index,
                spine_length,
            } => write!(
                f,
                "Spine index {} out of bounds (spine length: {})",
                index, spine_length
            ),
            EpubError::NotOpen => write!(f, "No book is open"),
        }
    }
}

impl From<ZipError> for EpubError {
    fn from(err: ZipError) -> Self {
        EpubError::Zip(err)
    }
}

/// ZIP-specific error variants
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ZipErrorKind {
    /// File not found in archive
    FileNotFound,
    /// Invalid ZIP format
    InvalidFormat,
    /// Unsupported compression method
    UnsupportedCompression,
    /// Decompression failed
    DecompressError,
    /// CRC32 mismatch
    CrcMismatch,
    /// I/O error during ZIP operations
    IoError,
    /// Central directory full (exceeded max entries)
    CentralDirFull,
    /// File exceeds maximum allowed size
    FileTooLarge,
    /// Invalid or missing mimetype file
    InvalidMimetype(String),
    /// ZIP64 structures are present but unsupported
    UnsupportedZip64,
}

/// Public ZIP error type alias used across the crate API.
pub type ZipError = ZipErrorKind;

impl fmt::Display for ZipErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZipErrorKind::FileNotFound => write!(f, "file not found in archive"),
            ZipErrorKind::InvalidFormat => write!(f, "invalid ZIP format"),
            ZipErrorKind::UnsupportedCompression => write!(f, "unsupported compression method"),
            ZipErrorKind::DecompressError => write!(f, "decompression failed"),
            ZipErrorKind::CrcMismatch => write!(f, "CRC32 checksum mismatch"),
            ZipErrorKind::IoError => write!(f, "I/O error"),
            ZipErrorKind::CentralDirFull => write!(f, "central directory full"),
            ZipErrorKind::FileTooLarge => write!(f, "file too large"),
            ZipErrorKind::InvalidMimetype(msg) => write!(f, "invalid mimetype: {}", msg),
            ZipErrorKind::UnsupportedZip64 => write!(f, "ZIP64 is not supported"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EpubError {}

#[cfg(feature = "std")]
impl std::error::Error for ZipErrorKind {}

impl From<quick_xml::Error> for EpubError {
    fn from(err: quick_xml::Error) -> Self {
        EpubError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epub_error_display() {
        let err = EpubError::Parse("bad xml".into());
        assert_eq!(format!("{}", err), "Parse error: bad xml");
    }

    #[test]
    fn test_budget_error_display_mentions_sizes() {
        let err = EpubError::BudgetExceeded {
            used: 700_000,
            requested: 200_000,
            budget: 800_000,
        };
        let display = format!("{}", err);
        assert!(display.contains("700000"));
        assert!(display.contains("800000"));
    }

    #[test]
    fn test_only_format_class_is_fatal() {
        assert!(EpubError::FatalFormat("no container".into()).is_fatal());
        assert!(EpubError::NotOpen.is_fatal());
        assert!(!EpubError::ResourceMissing {
            path: "OEBPS/font.ttf".into()
        }
        .is_fatal());
        assert!(!EpubError::StaleOrCorruptStore("tag".into()).is_fatal());
        assert!(!EpubError::PartialRead {
            expected: 3,
            read: 1
        }
        .is_fatal());
    }

    #[test]
    fn test_zip_error_converts() {
        let err: EpubError = ZipErrorKind::CrcMismatch.into();
        assert!(format!("{}", err).contains("ZIP error"));
    }
}
