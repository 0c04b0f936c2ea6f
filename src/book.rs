//! Open-book session
//!
//! [`Epub`] owns everything tied to one open file: the archive, the parsed
//! package and encryption descriptor, the obfuscation keys, and the style and
//! font caches. All of it is built on open and dropped in bulk on close.
//!
//! Two load paths share the archive. The foreground path
//! ([`Epub::load`]) keeps the most recent item resident and needs `&mut self`,
//! so it can only be driven from one task. The side path
//! ([`SideLoader::load_into`], [`Epub::resolve_image`]) fills caller-owned
//! items and may run on another thread. Both serialize archive access and
//! parsing on a single lock held for one retrieval at a time.

extern crate alloc;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::content::{
    Bitmap, BookContext, ContentItem, ImageDecoder, LoaderState, MediaType, TargetBox,
};
use crate::encryption::{EncryptionManifest, ENCRYPTION_PATH};
use crate::error::{EpubError, ZipError};
use crate::fonts::{FontRegistry, DEFAULT_FONT_BUDGET};
use crate::obfuscation::ObfuscationKeys;
use crate::package::{parse_container, PackageDocument, CONTAINER_PATH};
use crate::path;
use crate::zip::{Archive, ArchiveStats, StreamingZip, ZipLimits};

/// Configuration for opening books.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpubOptions {
    /// Optional ZIP safety limits used while reading archive entries.
    ///
    /// When `None`, no explicit file-size caps are enforced by this crate.
    pub zip_limits: Option<ZipLimits>,
    /// Cumulative byte budget for embedded fonts.
    pub font_budget: usize,
    /// Fetch fonts named by `@font-face` rules.
    pub use_book_fonts: bool,
    /// Refuse archives whose `mimetype` entry is missing or wrong.
    pub require_mimetype: bool,
}

impl Default for EpubOptions {
    fn default() -> Self {
        Self {
            zip_limits: None,
            font_budget: DEFAULT_FONT_BUDGET,
            use_book_fonts: true,
            require_mimetype: false,
        }
    }
}

impl EpubOptions {
    /// Defaults: 800 000 byte font budget, book fonts on, lenient mimetype.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set explicit ZIP limits.
    pub fn with_zip_limits(mut self, limits: ZipLimits) -> Self {
        self.zip_limits = Some(limits);
        self
    }

    /// Set the font budget in bytes.
    pub fn with_font_budget(mut self, budget: usize) -> Self {
        self.font_budget = budget;
        self
    }

    /// Enable or disable embedded fonts.
    pub fn with_book_fonts(mut self, enabled: bool) -> Self {
        self.use_book_fonts = enabled;
        self
    }

    /// Make a bad `mimetype` entry fatal.
    pub fn with_required_mimetype(mut self, required: bool) -> Self {
        self.require_mimetype = required;
        self
    }
}

/// State shared by the session and its side loaders.
pub(crate) struct BookShared<A: Archive> {
    pub(crate) ctx: BookContext,
    state: Mutex<LoaderState<A>>,
    decoder: Option<Arc<dyn ImageDecoder>>,
}

impl<A: Archive> BookShared<A> {
    fn lock(&self) -> MutexGuard<'_, LoaderState<A>> {
        // A panic mid-load leaves at worst a half-filled cache entry.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_into(&self, index: usize, item: &mut ContentItem) -> Result<(), EpubError> {
        self.lock().load(&self.ctx, index, item)
    }

    /// Read a resource by archive path, deobfuscating as needed.
    pub(crate) fn read_resource(&self, path: &str) -> Result<Vec<u8>, EpubError> {
        self.lock().read_resource(&self.ctx, path)
    }

    fn resolve_image(&self, path: &str, target: TargetBox) -> Option<Bitmap> {
        let Some(decoder) = self.decoder.as_ref() else {
            log::debug!("[EPUB] No image decoder installed, skipping {}", path);
            return None;
        };
        let media_type = self.image_type(path)?;

        let mut state = self.lock();
        let data = match state.read_resource(&self.ctx, path) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("[EPUB] Image {} unavailable: {}", path, e);
                return None;
            }
        };
        match decoder.decode(&data, media_type, target) {
            Ok(bitmap) => Some(bitmap),
            Err(e) => {
                log::warn!("[EPUB] Image {} failed to decode: {}", path, e);
                None
            }
        }
    }

    fn image_type(&self, path: &str) -> Option<MediaType> {
        let package = &self.ctx.package;
        let declared = path
            .strip_prefix(package.base_path())
            .and_then(|href| package.manifest_by_href(href))
            .and_then(|item| MediaType::from_mime(item.media_type));
        declared
            .or_else(|| MediaType::from_extension(path))
            .filter(MediaType::is_image)
    }

    fn spine_length(&self) -> usize {
        self.ctx.package.spine_length()
    }
}

/// Handle for loading items off the foreground task.
///
/// Keeps the book's shared state alive even after the session closes.
pub struct SideLoader<A: Archive> {
    shared: Arc<BookShared<A>>,
}

impl<A: Archive> Clone for SideLoader<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: Archive> SideLoader<A> {
    /// Load spine entry `index` into a caller-owned item.
    pub fn load_into(&self, index: usize, item: &mut ContentItem) -> Result<(), EpubError> {
        self.shared.load_into(index, item)
    }

    /// Decode the image at archive path `path`, scaled to fit `target`.
    pub fn resolve_image(&self, path: &str, target: TargetBox) -> Option<Bitmap> {
        self.shared.resolve_image(path, target)
    }

    /// Number of spine entries.
    pub fn spine_length(&self) -> usize {
        self.shared.spine_length()
    }
}

impl<A: Archive> fmt::Debug for SideLoader<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideLoader")
            .field("spine_length", &self.spine_length())
            .finish()
    }
}

/// A reading session holding at most one open book.
pub struct Epub<A: Archive = StreamingZip<File>> {
    options: EpubOptions,
    decoder: Option<Arc<dyn ImageDecoder>>,
    source: Option<PathBuf>,
    book: Option<Arc<BookShared<A>>>,
    current: Option<ContentItem>,
}

impl<A: Archive> Default for Epub<A> {
    fn default() -> Self {
        Self::new(EpubOptions::default())
    }
}

impl<A: Archive> fmt::Debug for Epub<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Epub")
            .field("options", &self.options)
            .field("source", &self.source)
            .field("open", &self.is_open())
            .field("spine_length", &self.spine_length())
            .finish()
    }
}

impl Epub<StreamingZip<File>> {
    /// Open the book at `path`, closing any book already open.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<(), EpubError> {
        self.close();
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| EpubError::Io(e.to_string()))?;
        self.open_reader(file)?;
        self.source = Some(path.to_path_buf());
        Ok(())
    }
}

impl<R: Read + Seek> Epub<StreamingZip<R>> {
    /// Open a book from any seekable reader.
    pub fn open_reader(&mut self, reader: R) -> Result<(), EpubError> {
        self.close();
        let mut zip = StreamingZip::new_with_limits(reader, self.options.zip_limits)?;
        if let Err(e) = zip.validate_mimetype() {
            if self.options.require_mimetype {
                zip.close();
                return Err(EpubError::FatalFormat(e.to_string()));
            }
            log::warn!("[EPUB] Ignoring bad mimetype entry: {}", e);
        }
        self.open_archive(zip)
    }
}

impl<A: Archive> Epub<A> {
    /// Closed session with the given options.
    pub fn new(options: EpubOptions) -> Self {
        Self {
            options,
            decoder: None,
            source: None,
            book: None,
            current: None,
        }
    }

    /// Install the decoder used by [`Epub::resolve_image`] for books opened
    /// from now on.
    pub fn with_image_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Options this session opens books with.
    pub fn options(&self) -> &EpubOptions {
        &self.options
    }

    /// Open a book from an already opened archive.
    ///
    /// On failure the archive is closed and the session stays closed.
    pub fn open_archive(&mut self, mut archive: A) -> Result<(), EpubError> {
        self.close();
        match load_book(&mut archive) {
            Ok((package, encryption)) => {
                let keys = ObfuscationKeys::derive(package.unique_identifier());
                log::info!(
                    "[EPUB] Opened {} ({} spine items)",
                    package.opf_path(),
                    package.spine_length()
                );
                let ctx = BookContext {
                    package,
                    encryption,
                    keys,
                    options: self.options,
                };
                self.book = Some(Arc::new(BookShared {
                    ctx,
                    state: Mutex::new(LoaderState::new(archive, self.options.font_budget)),
                    decoder: self.decoder.clone(),
                }));
                Ok(())
            }
            Err(e) => {
                log::warn!("[EPUB] Open failed: {}", e);
                archive.close();
                Err(e)
            }
        }
    }

    /// Close the open book. Returns whether one was open.
    ///
    /// Side loaders keep their own handle on the book; the archive is
    /// released when the last of them is dropped.
    pub fn close(&mut self) -> bool {
        self.current = None;
        self.source = None;
        let Some(shared) = self.book.take() else {
            return false;
        };
        if let Ok(shared) = Arc::try_unwrap(shared) {
            let mut state = shared
                .state
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner);
            state.archive.close();
        }
        log::debug!("[EPUB] Closed");
        true
    }

    /// Whether a book is open.
    pub fn is_open(&self) -> bool {
        self.book.is_some()
    }

    /// Path the open book was read from, if opened from a file.
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Parsed package document of the open book.
    pub fn package(&self) -> Option<&PackageDocument> {
        self.book.as_ref().map(|b| &b.ctx.package)
    }

    pub(crate) fn shared(&self) -> Result<&BookShared<A>, EpubError> {
        self.book.as_deref().ok_or(EpubError::NotOpen)
    }

    /// Number of spine entries, zero when closed.
    pub fn spine_length(&self) -> usize {
        self.book.as_ref().map_or(0, |b| b.spine_length())
    }

    /// Load spine entry `index` on the foreground path.
    ///
    /// Asking for the resident index again returns it without touching the
    /// archive; any other index replaces it.
    pub fn load(&mut self, index: usize) -> Result<&ContentItem, EpubError> {
        let shared = self.book.as_ref().ok_or(EpubError::NotOpen)?;
        let resident = self
            .current
            .as_ref()
            .is_some_and(|item| item.spine_index() == index);
        if !resident {
            let mut item = self.current.take().unwrap_or_default();
            shared.load_into(index, &mut item)?;
            self.current = Some(item);
        }
        self.current.as_ref().ok_or(EpubError::NotOpen)
    }

    /// The resident foreground item.
    pub fn current(&self) -> Option<&ContentItem> {
        self.current.as_ref()
    }

    /// Load spine entry `index` into a caller-owned item without touching
    /// the foreground item.
    pub fn load_into(&self, index: usize, item: &mut ContentItem) -> Result<(), EpubError> {
        self.shared()?.load_into(index, item)
    }

    /// Handle for loading from another task.
    pub fn side_loader(&self) -> Option<SideLoader<A>> {
        self.book.as_ref().map(|shared| SideLoader {
            shared: Arc::clone(shared),
        })
    }

    /// Decode the image at archive path `path` (see [`ContentItem::resolve`]).
    ///
    /// `None` when no book is open, no decoder is installed, the resource is
    /// missing, or decoding fails.
    pub fn resolve_image(&self, path: &str, target: TargetBox) -> Option<Bitmap> {
        self.book.as_ref()?.resolve_image(path, target)
    }

    /// Archive path of the cover image, or empty when there is none.
    pub fn cover_filename(&self) -> String {
        self.package()
            .and_then(|p| p.cover_href().map(|href| path::locate(p.base_path(), href)))
            .unwrap_or_default()
    }

    /// Text of metadata element `name`, e.g. `dc:title`.
    pub fn metadata(&self, name: &str) -> Option<&str> {
        self.package()?.metadata(name)
    }

    /// Read counters of the open archive.
    pub fn archive_stats(&self) -> ArchiveStats {
        self.book
            .as_ref()
            .map(|b| b.lock().archive.stats())
            .unwrap_or_default()
    }

    /// Run `f` against the book's font registry.
    pub fn with_fonts<T>(&self, f: impl FnOnce(&FontRegistry) -> T) -> Option<T> {
        self.book.as_ref().map(|b| f(&b.lock().fonts))
    }

    /// Whether the font budget was exceeded since the book was opened.
    pub fn fonts_too_large(&self) -> bool {
        self.with_fonts(FontRegistry::too_large).unwrap_or(false)
    }

    /// Number of obfuscated resources listed by the encryption descriptor.
    pub fn obfuscated_resources(&self) -> usize {
        self.book
            .as_ref()
            .and_then(|b| b.ctx.encryption.as_ref())
            .map_or(0, EncryptionManifest::len)
    }
}

fn load_book<A: Archive>(
    archive: &mut A,
) -> Result<(PackageDocument, Option<EncryptionManifest>), EpubError> {
    let container = archive.read(CONTAINER_PATH).map_err(|e| match e {
        ZipError::FileNotFound => EpubError::FatalFormat(format!("{} is missing", CONTAINER_PATH)),
        other => EpubError::Zip(other),
    })?;
    let opf_path = parse_container(&container)?;
    let opf = archive.read(&opf_path).map_err(|e| match e {
        ZipError::FileNotFound => {
            EpubError::FatalFormat(format!("package document {} is missing", opf_path))
        }
        other => EpubError::Zip(other),
    })?;
    let package = PackageDocument::parse(&opf_path, opf)?;
    Ok((package, load_encryption(archive)))
}

fn load_encryption<A: Archive>(archive: &mut A) -> Option<EncryptionManifest> {
    if !archive.exists(ENCRYPTION_PATH) {
        return None;
    }
    let parsed = archive
        .read(ENCRYPTION_PATH)
        .map_err(EpubError::from)
        .and_then(EncryptionManifest::parse);
    match parsed {
        Ok(Some(manifest)) => {
            log::debug!("[EPUB] {} obfuscated resources", manifest.len());
            Some(manifest)
        }
        Ok(None) => {
            log::warn!("[EPUB] Unsupported encryption descriptor, ignoring it");
            None
        }
        Err(e) => {
            log::warn!("[EPUB] Unreadable encryption descriptor, ignoring it: {}", e);
            None
        }
    }
}
