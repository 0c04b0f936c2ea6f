//! ink-epub -- EPUB ingestion core for e-paper readers
//!
//! Opens an EPUB archive, validates its container and package document,
//! loads spine items one at a time together with their stylesheets and
//! embedded fonts (undoing font obfuscation), and builds a table of contents
//! that can be persisted next to the book.
//!
//! # Features
//!
//! - `std` (default) -- archive reader, reading session, content loading and TOC store
//! - `async` -- `tokio`-based helper for opening books
//! - `cli` -- the `ink-epub` inspection binary
//!
//! Without `std` the string arena, path resolution, obfuscation, XML, CSS,
//! encryption descriptor, font registry and package model remain available
//! on `alloc`.
//!
//! # Example
//!
//! ```no_run
//! use ink_epub::{Epub, EpubOptions, Toc, toc_store_path};
//!
//! let mut epub: Epub = Epub::new(EpubOptions::default());
//! epub.open("book.epub")?;
//! let item = epub.load(0)?;
//! println!("{}", item.path());
//!
//! let mut toc = Toc::default();
//! if toc.load(toc_store_path("book.epub")).is_err() {
//!     toc.build_from_navigation(&epub)?;
//!     toc.save(toc_store_path("book.epub"))?;
//! }
//! # Ok::<(), ink_epub::EpubError>(())
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![deny(clippy::large_enum_variant, clippy::large_stack_arrays, clippy::redundant_clone)]
#![warn(
    clippy::box_collection,
    clippy::needless_collect,
    clippy::map_clone,
    clippy::implicit_clone,
    clippy::inefficient_to_string
)]

extern crate alloc;

pub mod arena;
pub mod css;
pub mod encryption;
pub mod error;
pub mod fonts;
pub mod obfuscation;
pub mod package;
pub mod path;
pub mod xml;

#[cfg(feature = "std")]
pub mod book;

#[cfg(feature = "std")]
pub mod content;

#[cfg(feature = "std")]
pub mod toc;

#[cfg(feature = "async")]
pub mod async_api;

#[cfg(feature = "std")]
pub mod zip;

// Re-export key types for convenience
pub use arena::{ArenaStr, CompactedStrings, StringArena};
#[cfg(feature = "async")]
pub use async_api::{open_epub_async, open_epub_async_with_options};
#[cfg(feature = "std")]
pub use book::{Epub, EpubOptions, SideLoader};
#[cfg(feature = "std")]
pub use content::{Bitmap, ContentItem, ImageDecoder, ItemBody, MediaType, StyleCache, TargetBox};
pub use css::{CssStyle, FontFaceRule, Stylesheet};
pub use encryption::EncryptionManifest;
pub use error::{EpubError, ZipError, ZipErrorKind};
pub use fonts::{FaceStyle, FontRegistry, LoadedFont};
pub use obfuscation::{ObfuscationKeys, ObfuscationKind};
pub use package::{ManifestEntry, NavigationKind, PackageDocument, PackageVersion};
#[cfg(feature = "std")]
pub use toc::{toc_store_path, Toc, TocEntry, TocStoreConfig};
pub use xml::{Node, XmlDocument};
#[cfg(feature = "std")]
pub use zip::{Archive, ArchiveStats, StreamingZip, ZipLimits};
