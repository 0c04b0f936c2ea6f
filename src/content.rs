//! Spine item loading
//!
//! Turns a spine index into a [`ContentItem`]: the raw bytes read from the
//! archive, a parsed XML view for documents, and the stylesheets the document
//! pulls in. External stylesheets are parsed once per book and shared through
//! the [`StyleCache`]; every freshly parsed sheet is scanned for `@font-face`
//! rules whose fonts go into the book's [`FontRegistry`].

extern crate alloc;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::book::EpubOptions;
use crate::css::{parse_stylesheet, Stylesheet};
use crate::encryption::EncryptionManifest;
use crate::error::{EpubError, ZipError};
use crate::fonts::{FaceStyle, FontRegistry, LoadedFont};
use crate::obfuscation::{DeobfuscateError, ObfuscationKeys, ObfuscationKind};
use crate::package::PackageDocument;
use crate::path;
use crate::xml::XmlDocument;
use crate::zip::Archive;

/// Media types a content item can have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// `application/xhtml+xml`
    Xhtml,
    /// `image/jpeg`
    Jpeg,
    /// `image/png`
    Png,
    /// `image/bmp`
    Bmp,
    /// `image/gif`
    Gif,
}

impl MediaType {
    /// Classify a manifest `media-type` value.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim() {
            "application/xhtml+xml" => Some(MediaType::Xhtml),
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "image/png" => Some(MediaType::Png),
            "image/bmp" => Some(MediaType::Bmp),
            "image/gif" => Some(MediaType::Gif),
            _ => None,
        }
    }

    /// Guess an image type from a file extension.
    pub fn from_extension(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.').map(|(_, e)| e)?;
        if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") {
            Some(MediaType::Jpeg)
        } else if ext.eq_ignore_ascii_case("png") {
            Some(MediaType::Png)
        } else if ext.eq_ignore_ascii_case("bmp") {
            Some(MediaType::Bmp)
        } else if ext.eq_ignore_ascii_case("gif") {
            Some(MediaType::Gif)
        } else {
            None
        }
    }

    /// Whether this is a raster image type.
    pub fn is_image(&self) -> bool {
        !matches!(self, MediaType::Xhtml)
    }
}

/// Parsed body of a content item.
#[derive(Debug, Default)]
pub enum ItemBody {
    /// Nothing loaded yet
    #[default]
    Empty,
    /// XHTML document tree over the item's bytes
    Document(XmlDocument),
    /// Undecoded image bytes
    Image(Vec<u8>),
}

/// One loaded spine item.
#[derive(Debug, Default)]
pub struct ContentItem {
    spine_index: usize,
    href: String,
    path: String,
    folder: String,
    base: String,
    media_type: Option<MediaType>,
    body: ItemBody,
    linked: Vec<Arc<Stylesheet>>,
    local: Vec<Stylesheet>,
    style: Stylesheet,
}

impl ContentItem {
    /// Empty item, suitable as a reusable target for background loads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spine position this item was loaded from.
    pub fn spine_index(&self) -> usize {
        self.spine_index
    }

    /// Manifest href, relative to the package document.
    pub fn href(&self) -> &str {
        &self.href
    }

    /// Full archive path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Folder of the item relative to the package document, with trailing `/`.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Media type, `None` for an empty item.
    pub fn media_type(&self) -> Option<MediaType> {
        self.media_type
    }

    /// Parsed body.
    pub fn body(&self) -> &ItemBody {
        &self.body
    }

    /// Document tree, when this item is XHTML.
    pub fn document(&self) -> Option<&XmlDocument> {
        match &self.body {
            ItemBody::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Raw image bytes, when this item is an image.
    pub fn image_data(&self) -> Option<&[u8]> {
        match &self.body {
            ItemBody::Image(data) => Some(data),
            _ => None,
        }
    }

    /// Shared external stylesheets in document order.
    pub fn linked_styles(&self) -> &[Arc<Stylesheet>] {
        &self.linked
    }

    /// Stylesheets from `<style>` blocks in document order.
    pub fn local_styles(&self) -> &[Stylesheet] {
        &self.local
    }

    /// Effective stylesheet: external sheets followed by local ones.
    pub fn style(&self) -> &Stylesheet {
        &self.style
    }

    /// Full archive path of `relative`, as written inside this item.
    pub fn resolve(&self, relative: &str) -> String {
        let mut joined = String::with_capacity(self.folder.len() + relative.len());
        joined.push_str(&self.folder);
        joined.push_str(relative);
        path::locate(&self.base, &joined)
    }

    /// Drop all loaded data.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// External stylesheets parsed for the open book, keyed by archive path.
#[derive(Debug, Default)]
pub struct StyleCache {
    sheets: Vec<(String, Arc<Stylesheet>)>,
}

impl StyleCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached sheet for `path`.
    pub fn get(&self, path: &str) -> Option<Arc<Stylesheet>> {
        self.sheets
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, sheet)| Arc::clone(sheet))
    }

    /// Cache `sheet` under `path` and hand back a shared reference.
    pub fn insert(&mut self, path: String, sheet: Stylesheet) -> Arc<Stylesheet> {
        let sheet = Arc::new(sheet);
        self.sheets.push((path, Arc::clone(&sheet)));
        sheet
    }

    /// Number of cached sheets.
    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}

/// Read-only data about the open book that loading needs.
#[derive(Debug)]
pub(crate) struct BookContext {
    pub(crate) package: PackageDocument,
    pub(crate) encryption: Option<EncryptionManifest>,
    pub(crate) keys: ObfuscationKeys,
    pub(crate) options: EpubOptions,
}

impl BookContext {
    fn obfuscation_of(&self, path: &str) -> ObfuscationKind {
        self.encryption
            .as_ref()
            .map(|e| e.kind_of(path))
            .unwrap_or_default()
    }
}

/// Mutable per-book state. Only one task touches it at a time.
#[derive(Debug)]
pub(crate) struct LoaderState<A: Archive> {
    pub(crate) archive: A,
    pub(crate) styles: StyleCache,
    pub(crate) fonts: FontRegistry,
}

impl<A: Archive> LoaderState<A> {
    pub(crate) fn new(archive: A, font_budget: usize) -> Self {
        Self {
            archive,
            styles: StyleCache::new(),
            fonts: FontRegistry::new(font_budget),
        }
    }

    /// Read `path` from the archive and undo any obfuscation.
    pub(crate) fn read_resource(
        &mut self,
        ctx: &BookContext,
        path: &str,
    ) -> Result<Vec<u8>, EpubError> {
        let kind = ctx.obfuscation_of(path);
        if kind == ObfuscationKind::Unknown {
            return Err(EpubError::UnsupportedAlgorithm {
                path: path.to_string(),
            });
        }
        let mut data = self.archive.read(path).map_err(|e| match e {
            ZipError::FileNotFound => EpubError::ResourceMissing {
                path: path.to_string(),
            },
            other => EpubError::Zip(other),
        })?;
        ctx.keys
            .deobfuscate(&mut data, kind)
            .map_err(|e| match e {
                DeobfuscateError::UnknownAlgorithm | DeobfuscateError::MissingAdobeKey => {
                    EpubError::UnsupportedAlgorithm {
                        path: path.to_string(),
                    }
                }
            })?;
        Ok(data)
    }

    /// Load spine entry `index` into `item`, replacing what it held.
    ///
    /// On failure `item` is left empty.
    pub(crate) fn load(
        &mut self,
        ctx: &BookContext,
        index: usize,
        item: &mut ContentItem,
    ) -> Result<(), EpubError> {
        item.clear();
        let package = &ctx.package;
        let spine_length = package.spine_length();
        if index >= spine_length {
            return Err(EpubError::SpineOutOfBounds {
                index,
                spine_length,
            });
        }
        let entry = package.spine_item(index).ok_or_else(|| {
            EpubError::FatalFormat(format!("spine entry {} has no manifest item", index))
        })?;
        let media_type = MediaType::from_mime(entry.media_type)
            .ok_or_else(|| EpubError::UnsupportedMediaType(entry.media_type.to_string()))?;

        let base = package.base_path();
        let full_path = path::locate(base, entry.href);
        let data = self.read_resource(ctx, &full_path)?;

        let mut loaded = ContentItem {
            spine_index: index,
            href: entry.href.to_string(),
            folder: path::folder_of(entry.href).to_string(),
            base: base.to_string(),
            path: full_path,
            media_type: Some(media_type),
            ..ContentItem::default()
        };

        if media_type.is_image() {
            loaded.body = ItemBody::Image(data);
        } else {
            let mut data = data;
            blank_script_markers(&mut data);
            let doc = XmlDocument::parse(data).map_err(|e| {
                log::warn!("[CONTENT] {} is not well-formed: {}", loaded.path, e);
                e
            })?;
            self.attach_styles(ctx, &doc, &mut loaded);
            loaded.body = ItemBody::Document(doc);
        }

        log::debug!(
            "[CONTENT] Loaded spine item {} ({}, {} sheets)",
            index,
            loaded.path,
            loaded.linked.len() + loaded.local.len()
        );
        *item = loaded;
        Ok(())
    }

    fn attach_styles(&mut self, ctx: &BookContext, doc: &XmlDocument, item: &mut ContentItem) {
        let Some(head) = doc.root().and_then(|html| html.child("head")) else {
            return;
        };
        for node in head.children() {
            match node.local_name() {
                "link" if is_stylesheet_link(node.attr("type"), node.attr("rel")) => {
                    if let Some(href) = node.attr("href") {
                        if let Some(sheet) = self.linked_sheet(ctx, &item.folder, href) {
                            item.linked.push(sheet);
                        }
                    }
                }
                "style" => match parse_stylesheet(&node.text_content()) {
                    Ok(sheet) => {
                        self.load_fonts(ctx, &sheet, &item.folder);
                        item.local.push(sheet);
                    }
                    Err(e) => log::warn!("[CSS] Skipping <style> in {}: {}", item.path, e),
                },
                _ => {}
            }
        }

        for sheet in &item.linked {
            item.style.extend_from(sheet);
        }
        for sheet in &item.local {
            item.style.extend_from(sheet);
        }
    }

    fn linked_sheet(
        &mut self,
        ctx: &BookContext,
        folder: &str,
        href: &str,
    ) -> Option<Arc<Stylesheet>> {
        let mut relative = String::with_capacity(folder.len() + href.len());
        relative.push_str(folder);
        relative.push_str(href);
        let relative = path::normalize(&relative);
        let full_path = format!("{}{}", ctx.package.base_path(), relative);

        if let Some(sheet) = self.styles.get(&full_path) {
            return Some(sheet);
        }

        let data = match self.read_resource(ctx, &full_path) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("[CSS] Skipping stylesheet {}: {}", full_path, e);
                return None;
            }
        };
        let sheet = match parse_stylesheet(&String::from_utf8_lossy(&data)) {
            Ok(sheet) => sheet,
            Err(e) => {
                log::warn!("[CSS] Skipping stylesheet {}: {}", full_path, e);
                return None;
            }
        };
        self.load_fonts(ctx, &sheet, path::folder_of(&relative));
        Some(self.styles.insert(full_path, sheet))
    }

    /// Register the fonts a freshly parsed sheet declares.
    ///
    /// `folder` is the sheet's folder relative to the package document.
    fn load_fonts(&mut self, ctx: &BookContext, sheet: &Stylesheet, folder: &str) {
        if !ctx.options.use_book_fonts {
            return;
        }
        for face in &sheet.font_faces {
            if self.fonts.too_large() {
                return;
            }
            let style = FaceStyle::from_css(face.weight, face.style);
            if self.fonts.contains(&face.family, style) {
                continue;
            }

            let mut relative = String::with_capacity(folder.len() + face.src.len());
            relative.push_str(folder);
            relative.push_str(&face.src);
            let font_path = path::locate(ctx.package.base_path(), &relative);

            let Some(size) = self.archive.size(&font_path) else {
                log::warn!("[FONT] Missing font resource {}", font_path);
                continue;
            };
            if let Err(e) = self.fonts.admit(size) {
                log::warn!("[FONT] {}; book fonts disabled", e);
                return;
            }
            match self.read_resource(ctx, &font_path) {
                Ok(data) => {
                    log::debug!(
                        "[FONT] Registered {} {:?} ({} bytes)",
                        face.family,
                        style,
                        data.len()
                    );
                    self.fonts.insert(LoadedFont {
                        family: face.family.clone(),
                        style,
                        path: font_path,
                        data,
                    });
                }
                Err(e) => log::warn!("[FONT] Skipping {}: {}", font_path, e),
            }
        }
    }
}

fn is_stylesheet_link(link_type: Option<&str>, rel: Option<&str>) -> bool {
    link_type.is_some_and(|t| t.trim().eq_ignore_ascii_case("text/css"))
        || rel.is_some_and(|r| {
            r.split_ascii_whitespace()
                .any(|v| v.eq_ignore_ascii_case("stylesheet"))
        })
}

const MARKERS: [(&[u8], &[u8]); 2] = [
    (b"/*<![CDATA[*/", b"  <![CDATA[  "),
    (b"/*]]>*/", b"  ]]>  "),
];

/// Blank the comment delimiters around CDATA markers in script and style
/// blocks so the XML parser sees bare CDATA sections. Lengths are unchanged.
pub fn blank_script_markers(buf: &mut [u8]) {
    for (marker, replacement) in MARKERS {
        let mut i = 0;
        while i + marker.len() <= buf.len() {
            if &buf[i..i + marker.len()] == marker {
                buf[i..i + marker.len()].copy_from_slice(replacement);
                i += marker.len();
            } else {
                i += 1;
            }
        }
    }
}

/// Box an image is scaled to fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetBox {
    /// Maximum width in pixels
    pub width: u32,
    /// Maximum height in pixels
    pub height: u32,
}

/// A decoded image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel data in the decoder's output format
    pub pixels: Vec<u8>,
}

/// Image decoding supplied by the embedding application.
pub trait ImageDecoder: Send + Sync {
    /// Decode `data` of `media_type`, scaled to fit `target`.
    fn decode(
        &self,
        data: &[u8],
        media_type: MediaType,
        target: TargetBox,
    ) -> Result<Bitmap, String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{parse_container, CONTAINER_PATH};
    use crate::zip::test_support::build_zip;
    use crate::zip::StreamingZip;
    use std::io::Cursor;

    const OPF: &str = r#"<?xml version="1.0"?>
<package version="2.0" xmlns="http://www.idpf.org/2007/opf" unique-identifier="id">
  <metadata><dc:identifier id="id">urn:uuid:00112233-4455-6677-8899-aabbccddeeff</dc:identifier></metadata>
  <manifest>
    <item id="c1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="img" href="images/pic.png" media-type="image/png"/>
    <item id="svg" href="images/pic.svg" media-type="image/svg+xml"/>
    <item id="css" href="styles/main.css" media-type="text/css"/>
  </manifest>
  <spine><itemref idref="c1"/><itemref idref="c2"/><itemref idref="img"/><itemref idref="svg"/><itemref idref="ghost"/></spine>
</package>"#;

    const CH1: &str = r#"<html><head>
<link rel="stylesheet" type="text/css" href="../styles/main.css"/>
<style>p { text-align: center; }</style>
</head><body><p>One</p><script>/*<![CDATA[*/ var a = 1 < 2; /*]]>*/</script></body></html>"#;

    const CH2: &str = r#"<html><head>
<link type="text/css" href="../styles/main.css"/>
</head><body><p>Two</p></body></html>"#;

    const CSS: &str = r#"@font-face { font-family: "Book"; src: url(../fonts/book.ttf); }
h1 { font-weight: bold; }"#;

    fn state(font_budget: usize) -> (BookContext, LoaderState<StreamingZip<Cursor<Vec<u8>>>>) {
        let font = vec![7u8; 64];
        let bytes = build_zip(&[
            ("mimetype", b"application/epub+zip".as_slice()),
            (
                CONTAINER_PATH,
                br#"<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#.as_slice(),
            ),
            ("OEBPS/content.opf", OPF.as_bytes()),
            ("OEBPS/text/ch1.xhtml", CH1.as_bytes()),
            ("OEBPS/text/ch2.xhtml", CH2.as_bytes()),
            ("OEBPS/images/pic.png", b"\x89PNG....".as_slice()),
            ("OEBPS/styles/main.css", CSS.as_bytes()),
            ("OEBPS/fonts/book.ttf", font.as_slice()),
        ]);
        let mut zip = StreamingZip::new(Cursor::new(bytes)).unwrap();
        let container = zip.read(CONTAINER_PATH).unwrap();
        let opf_path = parse_container(&container).unwrap();
        let opf = zip.read(&opf_path).unwrap();
        let package = PackageDocument::parse(&opf_path, opf).unwrap();
        let keys = ObfuscationKeys::derive(package.unique_identifier());
        let ctx = BookContext {
            package,
            encryption: None,
            keys,
            options: EpubOptions::default(),
        };
        (ctx, LoaderState::new(zip, font_budget))
    }

    #[test]
    fn test_blank_script_markers_keeps_length() {
        let mut buf = b"a/*<![CDATA[*/b/*]]>*/c".to_vec();
        let before = buf.len();
        blank_script_markers(&mut buf);
        assert_eq!(buf.len(), before);
        assert_eq!(&buf, b"a  <![CDATA[  b  ]]>  c");
    }

    #[test]
    fn test_media_type_classification() {
        assert_eq!(
            MediaType::from_mime("application/xhtml+xml"),
            Some(MediaType::Xhtml)
        );
        assert_eq!(MediaType::from_mime("image/svg+xml"), None);
        assert_eq!(MediaType::from_extension("a/B.JPG"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_extension("noext"), None);
    }

    #[test]
    fn test_load_document_with_styles_and_fonts() {
        let (ctx, mut state) = state(1000);
        let mut item = ContentItem::new();
        state.load(&ctx, 0, &mut item).unwrap();

        assert_eq!(item.path(), "OEBPS/text/ch1.xhtml");
        assert_eq!(item.folder(), "text/");
        assert_eq!(item.media_type(), Some(MediaType::Xhtml));
        assert!(item.document().is_some());
        assert_eq!(item.linked_styles().len(), 1);
        assert_eq!(item.local_styles().len(), 1);
        assert_eq!(item.style().len(), 2);
        assert_eq!(state.fonts.fonts().len(), 1);
        assert_eq!(state.fonts.fonts()[0].path, "OEBPS/fonts/book.ttf");
        assert_eq!(item.resolve("../images/pic.png"), "OEBPS/images/pic.png");
    }

    #[test]
    fn test_linked_sheet_is_parsed_once() {
        let (ctx, mut state) = state(1000);
        let mut first = ContentItem::new();
        let mut second = ContentItem::new();
        state.load(&ctx, 0, &mut first).unwrap();
        state.load(&ctx, 1, &mut second).unwrap();
        assert_eq!(state.styles.len(), 1);
        assert!(Arc::ptr_eq(
            &first.linked_styles()[0],
            &second.linked_styles()[0]
        ));
    }

    #[test]
    fn test_font_over_budget_is_skipped() {
        let (ctx, mut state) = state(10);
        let mut item = ContentItem::new();
        state.load(&ctx, 0, &mut item).unwrap();
        assert!(state.fonts.fonts().is_empty());
        assert!(state.fonts.too_large());
    }

    #[test]
    fn test_image_item() {
        let (ctx, mut state) = state(1000);
        let mut item = ContentItem::new();
        state.load(&ctx, 2, &mut item).unwrap();
        assert_eq!(item.media_type(), Some(MediaType::Png));
        assert_eq!(item.image_data(), Some(b"\x89PNG....".as_slice()));
    }

    #[test]
    fn test_load_failures() {
        let (ctx, mut state) = state(1000);
        let mut item = ContentItem::new();
        assert!(matches!(
            state.load(&ctx, 3, &mut item),
            Err(EpubError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            state.load(&ctx, 4, &mut item),
            Err(EpubError::FatalFormat(_))
        ));
        assert!(matches!(
            state.load(&ctx, 5, &mut item),
            Err(EpubError::SpineOutOfBounds {
                index: 5,
                spine_length: 5
            })
        ));
        assert!(item.media_type().is_none());
    }
}
