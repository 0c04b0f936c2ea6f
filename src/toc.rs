//! Table of contents
//!
//! Built once from the book's navigation document (NCX `navMap` or EPUB 3
//! `nav`), enriched with exact offsets as pagination discovers them, and
//! persisted to a small binary store next to the book so later opens can
//! skip the build.
//!
//! While building, labels live in a [`StringArena`]. Compaction copies them
//! into one [`CompactedStrings`] block and rewrites every entry to a byte
//! offset; the arena is then dropped. Saving always compacts first.
//!
//! # Store layout
//!
//! All integers little-endian:
//!
//! ```text
//! u32 record_count
//! repeat record_count: u32 len, [u8; len]
//!   record 0: [u8; 16] app tag, u32 version
//!   record 1: compacted label block
//!   record n: u32 label offset, u16 spine index, u8 level, u8 reserved, i32 offset
//! ```

extern crate alloc;

use alloc::borrow::Cow;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::arena::{ArenaStr, CompactedStrings, StringArena};
use crate::book::Epub;
use crate::error::EpubError;
use crate::package::{NavigationKind, PackageDocument};
use crate::path;
use crate::xml::{Node, XmlDocument};
use crate::zip::Archive;

/// Default store tag, NUL padded.
pub const DEFAULT_APP_TAG: [u8; 16] = *b"INKEPUB-TOC\0\0\0\0\0";

/// Default store format version.
pub const DEFAULT_STORE_VERSION: u32 = 1;

const VERSION_RECORD_LEN: usize = 20;
const ENTRY_RECORD_LEN: usize = 12;

/// Identity checked when reading a store back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TocStoreConfig {
    /// Application tag written into the version record
    pub app_tag: [u8; 16],
    /// Store format version
    pub version: u32,
}

impl Default for TocStoreConfig {
    fn default() -> Self {
        Self {
            app_tag: DEFAULT_APP_TAG,
            version: DEFAULT_STORE_VERSION,
        }
    }
}

impl TocStoreConfig {
    fn version_record(&self) -> [u8; VERSION_RECORD_LEN] {
        let mut record = [0u8; VERSION_RECORD_LEN];
        record[..16].copy_from_slice(&self.app_tag);
        record[16..].copy_from_slice(&self.version.to_le_bytes());
        record
    }
}

/// Store path for a book: the book path with its extension replaced by `.toc`.
pub fn toc_store_path<P: AsRef<Path>>(epub_path: P) -> PathBuf {
    epub_path.as_ref().with_extension("toc")
}

/// One table of contents entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TocEntry<'t> {
    /// Visible label
    pub label: &'t str,
    /// Spine position of the target document
    pub spine_index: usize,
    /// Nesting depth, 0 for top level
    pub level: u8,
    /// Offset in the target document, `-1` until pagination resolves it
    pub offset: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LabelRef {
    Live(ArenaStr),
    Offset(u32),
}

#[derive(Clone, Copy, Debug)]
struct StoredEntry {
    label: LabelRef,
    spine_index: u16,
    level: u8,
    offset: i32,
}

#[derive(Debug)]
enum Labels {
    Building(StringArena),
    Compacted(CompactedStrings),
}

/// Ordered table of contents for the open book.
#[derive(Debug)]
pub struct Toc {
    config: TocStoreConfig,
    labels: Labels,
    entries: Vec<StoredEntry>,
    fragments: HashMap<(u16, String), usize>,
    ready: bool,
    saved_to: Option<PathBuf>,
}

impl Default for Toc {
    fn default() -> Self {
        Self::new(TocStoreConfig::default())
    }
}

impl Toc {
    /// Empty table using `config` for the store identity.
    pub fn new(config: TocStoreConfig) -> Self {
        Self {
            config,
            labels: Labels::Building(StringArena::new()),
            entries: Vec::new(),
            fragments: HashMap::new(),
            ready: false,
            saved_to: None,
        }
    }

    /// Drop all entries and labels.
    pub fn clear(&mut self) {
        self.labels = Labels::Building(StringArena::new());
        self.entries.clear();
        self.fragments.clear();
        self.ready = false;
        self.saved_to = None;
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the table was fully built or fully loaded.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether the store on disk matches the entries.
    pub fn is_saved(&self) -> bool {
        self.saved_to.is_some()
    }

    /// Whether labels have been moved into the compacted block.
    pub fn is_compacted(&self) -> bool {
        matches!(self.labels, Labels::Compacted(_))
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<TocEntry<'_>> {
        self.entries.get(index).map(|e| self.view(e))
    }

    /// Entries in navigation order.
    pub fn entries(&self) -> impl Iterator<Item = TocEntry<'_>> + '_ {
        self.entries.iter().map(|e| self.view(e))
    }

    fn view(&self, entry: &StoredEntry) -> TocEntry<'_> {
        let label = match (&self.labels, entry.label) {
            (Labels::Building(arena), LabelRef::Live(handle)) => arena.get(handle),
            (Labels::Compacted(block), LabelRef::Offset(offset)) => {
                block.get(offset).unwrap_or_default()
            }
            _ => "",
        };
        TocEntry {
            label,
            spine_index: entry.spine_index as usize,
            level: entry.level,
            offset: entry.offset,
        }
    }

    /// Rebuild the table from the open book's navigation document.
    ///
    /// A navigation point without a target, or whose target is not in the
    /// spine, fails the whole build and leaves the table empty.
    pub fn build_from_navigation<A: Archive>(&mut self, epub: &Epub<A>) -> Result<(), EpubError> {
        self.clear();
        let shared = epub.shared()?;
        let package = &shared.ctx.package;
        let (nav_item, kind) = package
            .navigation_item()
            .ok_or_else(|| EpubError::FatalFormat("book has no navigation document".into()))?;
        let nav_path = path::locate(package.base_path(), nav_item.href);
        let data = shared.read_resource(&nav_path)?;
        let doc = XmlDocument::parse(data)?;

        let points = match kind {
            NavigationKind::Ncx => ncx_points(&doc),
            NavigationKind::Xhtml => nav_points(&doc),
        };
        let nav_folder = path::folder_of(nav_item.href);

        let result = points
            .iter()
            .try_for_each(|point| self.push_point(package, nav_folder, point));
        if let Err(e) = result {
            log::warn!("[TOC] Navigation in {} rejected: {}", nav_path, e);
            self.clear();
            return Err(e);
        }

        self.ready = true;
        log::info!("[TOC] Built {} entries from {}", self.entries.len(), nav_path);
        Ok(())
    }

    fn push_point(
        &mut self,
        package: &PackageDocument,
        nav_folder: &str,
        point: &NavPoint<'_>,
    ) -> Result<(), EpubError> {
        let target = point.target.ok_or_else(|| {
            EpubError::FatalFormat(format!("navigation entry {:?} has no target", point.label))
        })?;
        let (doc_path, fragment) = match target.split_once('#') {
            Some((doc_path, fragment)) => (doc_path, Some(fragment)),
            None => (target, None),
        };

        let item = package.manifest_by_href(doc_path).or_else(|| {
            let mut joined = String::with_capacity(nav_folder.len() + doc_path.len());
            joined.push_str(nav_folder);
            joined.push_str(doc_path);
            package.manifest_by_href(&path::normalize(&joined))
        });
        let item = item.ok_or_else(|| {
            EpubError::FatalFormat(format!("navigation target {} is not in the manifest", target))
        })?;
        let spine_index = package
            .spine_index_of(item.id)
            .and_then(|i| u16::try_from(i).ok())
            .ok_or_else(|| {
                EpubError::FatalFormat(format!("navigation target {} is not in the spine", target))
            })?;

        let Labels::Building(arena) = &mut self.labels else {
            return Err(EpubError::FatalFormat("table is already compacted".into()));
        };
        let label = arena.alloc(point.label.trim());
        let index = self.entries.len();
        self.entries.push(StoredEntry {
            label: LabelRef::Live(label),
            spine_index,
            level: point.level,
            offset: if fragment.is_some() { -1 } else { 0 },
        });
        if let Some(fragment) = fragment {
            self.fragments
                .entry((spine_index, fragment.to_string()))
                .or_insert(index);
        }
        Ok(())
    }

    /// Move labels into the compacted block and drop the fragment index.
    /// Calling it again does nothing.
    pub fn compact(&mut self) {
        self.fragments.clear();
        let Labels::Building(arena) = &self.labels else {
            return;
        };
        let (block, offsets) = CompactedStrings::build(self.entries.iter().map(|e| match e.label {
            LabelRef::Live(handle) => arena.get(handle),
            LabelRef::Offset(_) => "",
        }));
        for (entry, offset) in self.entries.iter_mut().zip(offsets) {
            entry.label = LabelRef::Offset(offset);
        }
        log::debug!(
            "[TOC] Compacted {} labels into {} bytes",
            self.entries.len(),
            block.len()
        );
        self.labels = Labels::Compacted(block);
    }

    /// Record the resolved offset of `fragment_id` in spine item `spine_index`.
    ///
    /// Returns whether an entry was updated.
    pub fn bind_fragment(&mut self, spine_index: usize, fragment_id: &str, offset: i32) -> bool {
        let Ok(spine) = u16::try_from(spine_index) else {
            return false;
        };
        let Some(&index) = self.fragments.get(&(spine, fragment_id.to_string())) else {
            return false;
        };
        self.set_offset(index, offset)
    }

    /// Record the offset of the first entry pointing at spine item
    /// `spine_index`. Returns whether an entry was updated.
    pub fn bind_document(&mut self, spine_index: usize, offset: i32) -> bool {
        match self
            .entries
            .iter()
            .position(|e| e.spine_index as usize == spine_index)
        {
            Some(index) => self.set_offset(index, offset),
            None => false,
        }
    }

    fn set_offset(&mut self, index: usize, offset: i32) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if entry.offset != offset {
            entry.offset = offset;
            self.saved_to = None;
        }
        true
    }

    /// Write the table to `path`, compacting first.
    ///
    /// Does nothing when `path` already holds the current table. Fragment
    /// bindings must happen before the first save, since compaction drops
    /// the fragment index.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<(), EpubError> {
        let path = path.as_ref();
        if self.saved_to.as_deref() == Some(path) {
            return Ok(());
        }
        self.compact();
        let Labels::Compacted(block) = &self.labels else {
            return Err(EpubError::Io("labels were not compacted".into()));
        };

        let file = File::create(path).map_err(|e| EpubError::Io(e.to_string()))?;
        let mut out = BufWriter::new(file);
        let record_count = u32::try_from(self.entries.len() + 2)
            .map_err(|_| EpubError::Io("too many entries".into()))?;

        let mut write = || -> std::io::Result<()> {
            out.write_all(&record_count.to_le_bytes())?;
            write_record(&mut out, &self.config.version_record())?;
            write_record(&mut out, block.as_bytes())?;
            for entry in &self.entries {
                let label = match entry.label {
                    LabelRef::Offset(offset) => offset,
                    LabelRef::Live(_) => 0,
                };
                let mut record = [0u8; ENTRY_RECORD_LEN];
                record[0..4].copy_from_slice(&label.to_le_bytes());
                record[4..6].copy_from_slice(&entry.spine_index.to_le_bytes());
                record[6] = entry.level;
                record[8..12].copy_from_slice(&entry.offset.to_le_bytes());
                write_record(&mut out, &record)?;
            }
            out.flush()
        };
        write().map_err(|e| EpubError::Io(e.to_string()))?;

        self.saved_to = Some(path.to_path_buf());
        log::info!("[TOC] Saved {} entries to {}", self.entries.len(), path.display());
        Ok(())
    }

    /// Replace the table with the store at `path`.
    ///
    /// A store with a foreign tag, another version or a damaged header is
    /// rejected with [`EpubError::StaleOrCorruptStore`] and the table is left
    /// empty; the caller should rebuild from navigation. A store that ends
    /// early keeps the entries read so far, reports
    /// [`EpubError::PartialRead`] and leaves the table not ready.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), EpubError> {
        self.clear();
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| EpubError::Io(e.to_string()))?;

        match self.read_store(&data) {
            Ok(()) => {
                self.ready = true;
                self.saved_to = Some(path.to_path_buf());
                log::info!("[TOC] Loaded {} entries from {}", self.entries.len(), path.display());
                Ok(())
            }
            Err(e @ EpubError::PartialRead { .. }) => {
                log::warn!("[TOC] {} in {}", e, path.display());
                Err(e)
            }
            Err(e) => {
                log::warn!("[TOC] Ignoring {}: {}", path.display(), e);
                self.clear();
                Err(e)
            }
        }
    }

    fn read_store(&mut self, data: &[u8]) -> Result<(), EpubError> {
        let corrupt = |msg: &str| EpubError::StaleOrCorruptStore(msg.to_string());
        let mut reader = RecordReader { data, pos: 0 };

        let record_count = reader.u32().ok_or_else(|| corrupt("empty store"))? as usize;
        if record_count == 0 {
            return Err(corrupt("empty store"));
        }
        let version = reader
            .record()
            .ok_or_else(|| corrupt("missing version record"))?;
        if version.len() != VERSION_RECORD_LEN {
            return Err(corrupt("version record has the wrong size"));
        }
        if version != self.config.version_record() {
            return Err(corrupt("tag or version mismatch"));
        }
        if record_count < 2 {
            return Err(corrupt("missing label block"));
        }
        let block = reader
            .record()
            .ok_or_else(|| corrupt("truncated label block"))?;
        let block = CompactedStrings::from_bytes(block.to_vec());

        let expected = record_count - 2;
        for read in 0..expected {
            let Some(record) = reader.record() else {
                self.labels = Labels::Compacted(block);
                return Err(EpubError::PartialRead { expected, read });
            };
            if record.len() != ENTRY_RECORD_LEN {
                return Err(corrupt("entry record has the wrong size"));
            }
            let label = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            if block.get(label).is_none() {
                return Err(corrupt("label offset outside the label block"));
            }
            self.entries.push(StoredEntry {
                label: LabelRef::Offset(label),
                spine_index: u16::from_le_bytes([record[4], record[5]]),
                level: record[6],
                offset: i32::from_le_bytes([record[8], record[9], record[10], record[11]]),
            });
        }
        self.labels = Labels::Compacted(block);
        Ok(())
    }
}

fn write_record<W: Write>(out: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "record too large"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(bytes)
}

struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn u32(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn record(&mut self) -> Option<&'a [u8]> {
        let start = self.pos;
        let len = self.u32()? as usize;
        let Some(bytes) = self.data.get(self.pos..self.pos.saturating_add(len)) else {
            self.pos = start;
            return None;
        };
        self.pos += len;
        Some(bytes)
    }
}

#[derive(Debug)]
struct NavPoint<'d> {
    label: Cow<'d, str>,
    target: Option<&'d str>,
    level: u8,
}

/// Pre-order walk over a navigation tree without recursion.
///
/// `first_child` maps a point to the first point nested under it; siblings
/// share the element name of the first point.
fn walk<'d>(
    first: Option<Node<'d>>,
    first_child: impl Fn(Node<'d>) -> Option<Node<'d>>,
    mut visit: impl FnMut(Node<'d>, u8),
) {
    let mut work: Vec<(Node<'d>, u8)> = first.map(|n| (n, 0)).into_iter().collect();
    while let Some((node, level)) = work.pop() {
        visit(node, level);
        if let Some(next) = node.next_sibling_same_name() {
            work.push((next, level));
        }
        if let Some(child) = first_child(node) {
            work.push((child, level.saturating_add(1)));
        }
    }
}

fn ncx_points(doc: &XmlDocument) -> Vec<NavPoint<'_>> {
    let first = doc
        .root()
        .and_then(|ncx| ncx.child("navMap"))
        .and_then(|map| map.child("navPoint"));
    let mut points = Vec::new();
    walk(
        first,
        |point| point.child("navPoint"),
        |point, level| {
            let label = point
                .child("navLabel")
                .and_then(|l| l.child("text"))
                .map(|t| t.text_content())
                .unwrap_or_default();
            let target = point.child("content").and_then(|c| c.attr("src"));
            points.push(NavPoint {
                label,
                target,
                level,
            });
        },
    );
    points
}

fn nav_points(doc: &XmlDocument) -> Vec<NavPoint<'_>> {
    let navs = || {
        doc.document()
            .descendants()
            .filter(|n| n.local_name() == "nav")
    };
    let nav = navs()
        .find(|n| {
            n.attr("epub:type")
                .is_some_and(|t| t.split_ascii_whitespace().any(|v| v == "toc"))
        })
        .or_else(|| navs().next());
    let first = nav
        .and_then(|n| n.child("ol"))
        .and_then(|ol| ol.child("li"));

    let mut points = Vec::new();
    walk(
        first,
        |li| li.child("ol").and_then(|ol| ol.child("li")),
        |li, level| {
            let anchor = li.child("a");
            let label = anchor
                .or_else(|| li.child("span"))
                .map(|n| n.text_content())
                .unwrap_or_default();
            points.push(NavPoint {
                label,
                target: anchor.and_then(|a| a.attr("href")),
                level,
            });
        },
    );
    points
}
