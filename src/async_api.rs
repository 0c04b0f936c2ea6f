//! Optional async helpers for opening books.
//!
//! This module is available with the `async` feature.

extern crate alloc;

use alloc::string::ToString;
use alloc::vec::Vec;
use core::result::Result;
use std::io::Cursor;
use std::path::Path;

use crate::book::{Epub, EpubOptions};
use crate::error::EpubError;
use crate::zip::StreamingZip;

/// Session type returned by the async helpers, backed by the file's bytes.
pub type MemoryEpub = Epub<StreamingZip<Cursor<Vec<u8>>>>;

/// Read an EPUB file asynchronously and open it with default options.
pub async fn open_epub_async<P: AsRef<Path>>(path: P) -> Result<MemoryEpub, EpubError> {
    open_epub_async_with_options(path, EpubOptions::default()).await
}

/// Read an EPUB file asynchronously and open it with `options`.
///
/// The whole file is read into memory first; the session is then opened
/// from that buffer.
pub async fn open_epub_async_with_options<P: AsRef<Path>>(
    path: P,
    options: EpubOptions,
) -> Result<MemoryEpub, EpubError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| EpubError::Io(e.to_string()))?;
    let mut epub = Epub::new(options);
    epub.open_reader(Cursor::new(bytes))?;
    Ok(epub)
}
