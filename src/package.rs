//! Container and package document model
//!
//! `META-INF/container.xml` points at the package (OPF) document, which is
//! kept as a parsed tree for the life of the open book. Manifest and spine
//! lookups walk that tree on demand; no second index is built next to it.
//! Every package element is looked up under its bare name first and then
//! under the `opf:` prefixed form.

extern crate alloc;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::EpubError;
use crate::path;
use crate::xml::{Node, XmlDocument};

/// Archive path of the container pointer file.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

const OPF_NAMESPACE: &str = "http://www.idpf.org/2007/opf";
const OPF_MEDIA_TYPE: &str = "application/oebps-package+xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";
const PREFIX: &str = "opf:";

/// Parse container.xml and return the package document path.
///
/// The `container` root must declare `version="1.0"` and a `rootfile` with
/// the OPF media type must be present.
pub fn parse_container(content: &[u8]) -> Result<String, EpubError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut version_ok = false;
    let mut opf_path: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = reader
                    .decoder()
                    .decode(e.name().as_ref())
                    .map_err(|e| EpubError::Parse(format!("Decode error: {:?}", e)))?
                    .to_string();

                let mut version = None;
                let mut full_path = None;
                let mut media_type = None;
                for attr in e.attributes() {
                    let attr =
                        attr.map_err(|e| EpubError::Parse(format!("Attr error: {:?}", e)))?;
                    let key = reader
                        .decoder()
                        .decode(attr.key.as_ref())
                        .map_err(|e| EpubError::Parse(format!("Decode error: {:?}", e)))?
                        .to_string();
                    let value = reader
                        .decoder()
                        .decode(&attr.value)
                        .map_err(|e| EpubError::Parse(format!("Decode error: {:?}", e)))?
                        .to_string();
                    match key.as_str() {
                        "version" => version = Some(value),
                        "full-path" => full_path = Some(value),
                        "media-type" => media_type = Some(value),
                        _ => {}
                    }
                }

                match name.as_str() {
                    "container" => version_ok = version.as_deref() == Some("1.0"),
                    "rootfile" if opf_path.is_none() => {
                        if media_type.as_deref() == Some(OPF_MEDIA_TYPE) {
                            opf_path = full_path;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EpubError::Parse(format!("XML parse error: {:?}", e))),
            _ => {}
        }
        buf.clear();
    }

    if !version_ok {
        return Err(EpubError::FatalFormat(
            "container.xml lacks a version 1.0 container".into(),
        ));
    }
    opf_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| EpubError::FatalFormat("No package rootfile in container.xml".into()))
}

/// Package format versions accepted by the reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageVersion {
    /// OEBPS 1.0
    V1,
    /// OPF 2.0
    V2,
    /// EPUB 3.0
    V3,
}

/// One manifest item, borrowed from the package tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManifestEntry<'d> {
    /// Resource identifier
    pub id: &'d str,
    /// Path relative to the package document
    pub href: &'d str,
    /// MIME type
    pub media_type: &'d str,
    /// Space-separated properties, if any
    pub properties: Option<&'d str>,
}

impl<'d> ManifestEntry<'d> {
    fn from_node(node: Node<'d>) -> Self {
        Self {
            id: node.attr("id").unwrap_or_default(),
            href: node.attr("href").unwrap_or_default(),
            media_type: node.attr("media-type").unwrap_or_default(),
            properties: node.attr("properties"),
        }
    }

    /// Whether `properties` lists `property`.
    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .is_some_and(|p| p.split_ascii_whitespace().any(|x| x == property))
    }
}

/// Form of the navigation document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationKind {
    /// NCX `navMap`
    Ncx,
    /// EPUB 3 XHTML `nav`
    Xhtml,
}

/// Parsed and validated OPF package document.
#[derive(Debug)]
pub struct PackageDocument {
    doc: XmlDocument,
    opf_path: String,
    version: PackageVersion,
}

impl PackageDocument {
    /// Parse and validate the package document stored at `opf_path`.
    pub fn parse(opf_path: &str, data: Vec<u8>) -> Result<Self, EpubError> {
        let doc = XmlDocument::parse(data)?;
        let version = {
            let package = doc
                .root()
                .filter(|n| n.name() == "package" || n.name() == "opf:package")
                .ok_or_else(|| EpubError::FatalFormat("No package element".into()))?;

            let namespace = package.attr("xmlns").or_else(|| package.attr("xmlns:opf"));
            if namespace != Some(OPF_NAMESPACE) {
                return Err(EpubError::FatalFormat(format!(
                    "Unexpected package namespace {:?}",
                    namespace
                )));
            }

            let version = match package.attr("version").map(str::trim) {
                Some("1.0") => PackageVersion::V1,
                Some("2.0") => PackageVersion::V2,
                Some("3.0") => PackageVersion::V3,
                other => {
                    return Err(EpubError::FatalFormat(format!(
                        "Unsupported package version {:?}",
                        other
                    )))
                }
            };

            for section in ["metadata", "manifest", "spine"] {
                if child_or_prefixed(package, section).is_none() {
                    return Err(EpubError::FatalFormat(format!(
                        "Package has no {} element",
                        section
                    )));
                }
            }
            version
        };

        Ok(Self {
            doc,
            opf_path: opf_path.to_string(),
            version,
        })
    }

    fn package(&self) -> Option<Node<'_>> {
        self.doc.root()
    }

    fn section(&self, name: &str) -> Option<Node<'_>> {
        self.package().and_then(|p| child_or_prefixed(p, name))
    }

    /// Archive path of the package document.
    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// Folder holding the package document, with trailing `/`, or empty.
    pub fn base_path(&self) -> &str {
        path::folder_of(&self.opf_path)
    }

    /// Declared package format version.
    pub fn version(&self) -> PackageVersion {
        self.version
    }

    /// First manifest item matching `pred`, bare `item` elements first.
    fn find_item<F>(&self, pred: F) -> Option<ManifestEntry<'_>>
    where
        F: Fn(&ManifestEntry<'_>) -> bool,
    {
        let manifest = self.section("manifest")?;
        ["item", "opf:item"].into_iter().find_map(|name| {
            manifest
                .children_named(name)
                .map(ManifestEntry::from_node)
                .find(|entry| pred(entry))
        })
    }

    /// Every manifest item in document order.
    pub fn manifest(&self) -> impl Iterator<Item = ManifestEntry<'_>> + '_ {
        self.section("manifest")
            .into_iter()
            .flat_map(|m| m.children())
            .filter(|n| n.name() == "item" || n.name() == "opf:item")
            .map(ManifestEntry::from_node)
    }

    /// Manifest item by id.
    pub fn manifest_by_id(&self, id: &str) -> Option<ManifestEntry<'_>> {
        self.find_item(|e| e.id == id)
    }

    /// Manifest item by exact href.
    pub fn manifest_by_href(&self, href: &str) -> Option<ManifestEntry<'_>> {
        self.find_item(|e| e.href == href)
    }

    fn itemrefs(&self) -> impl Iterator<Item = Node<'_>> + '_ {
        let spine = self.section("spine");
        let name = match spine {
            Some(s) if s.child("itemref").is_none() => "opf:itemref",
            _ => "itemref",
        };
        spine.into_iter().flat_map(move |s| s.children_named(name))
    }

    /// Number of spine entries, 0 without a spine.
    pub fn spine_length(&self) -> usize {
        self.itemrefs().count()
    }

    /// Manifest id referenced by spine entry `index`.
    pub fn spine_idref(&self, index: usize) -> Option<&str> {
        self.itemrefs().nth(index).and_then(|n| n.attr("idref"))
    }

    /// Spine position of manifest id `id`.
    pub fn spine_index_of(&self, id: &str) -> Option<usize> {
        self.itemrefs().position(|n| n.attr("idref") == Some(id))
    }

    /// Manifest item for spine entry `index`.
    pub fn spine_item(&self, index: usize) -> Option<ManifestEntry<'_>> {
        self.spine_idref(index)
            .and_then(|idref| self.manifest_by_id(idref))
    }

    /// Metadata children, descending into an OEBPS 1.0 `dc-metadata` block.
    fn metadata_nodes(&self) -> impl Iterator<Item = Node<'_>> + '_ {
        let metadata = self.section("metadata");
        let legacy = metadata.and_then(|m| m.child("dc-metadata"));
        metadata
            .into_iter()
            .chain(legacy)
            .flat_map(|m| m.children())
    }

    /// Text of the first metadata element named `name`, e.g. `dc:title`.
    pub fn metadata(&self, name: &str) -> Option<&str> {
        self.metadata_nodes()
            .filter(|n| n.name() == name)
            .find_map(|n| n.text().map(str::trim).filter(|t| !t.is_empty()))
    }

    /// Book identifier named by `package@unique-identifier`, or empty.
    pub fn unique_identifier(&self) -> &str {
        let Some(id) = self.package().and_then(|p| p.attr("unique-identifier")) else {
            return "";
        };
        self.metadata_nodes()
            .filter(|n| n.local_name().eq_ignore_ascii_case("identifier"))
            .find(|n| n.attr("id") == Some(id))
            .and_then(|n| n.text())
            .map(str::trim)
            .unwrap_or_default()
    }

    /// Cover resource href relative to the package document.
    pub fn cover_href(&self) -> Option<&str> {
        let pointer = self
            .metadata_nodes()
            .filter(|n| n.name() == "meta" || n.name() == "opf:meta")
            .find(|n| n.attr("name") == Some("cover"))
            .and_then(|n| n.attr("content"));
        if let Some(content) = pointer {
            if let Some(item) = self.find_item(|e| e.id == content || e.has_property(content)) {
                return Some(item.href);
            }
        }
        if let Some(item) = self.find_item(|e| e.has_property("cover-image")) {
            return Some(item.href);
        }
        ["cover-image", "cover"]
            .into_iter()
            .find_map(|id| self.manifest_by_id(id))
            .map(|item| item.href)
    }

    /// Manifest item holding the navigation document.
    ///
    /// Tries the conventional `ncx` id, then the spine's `toc` attribute,
    /// then any NCX media type, then an EPUB 3 `nav` document.
    pub fn navigation_item(&self) -> Option<(ManifestEntry<'_>, NavigationKind)> {
        if let Some(item) = self.manifest_by_id("ncx") {
            return Some((item, NavigationKind::Ncx));
        }
        let spine_toc = self.section("spine").and_then(|s| s.attr("toc"));
        if let Some(item) = spine_toc.and_then(|id| self.manifest_by_id(id)) {
            return Some((item, NavigationKind::Ncx));
        }
        if let Some(item) = self.find_item(|e| e.media_type == NCX_MEDIA_TYPE) {
            return Some((item, NavigationKind::Ncx));
        }
        self.find_item(|e| e.media_type == XHTML_MEDIA_TYPE && e.has_property("nav"))
            .map(|item| (item, NavigationKind::Xhtml))
    }
}

fn child_or_prefixed<'d>(node: Node<'d>, name: &str) -> Option<Node<'d>> {
    let mut prefixed = String::with_capacity(PREFIX.len() + name.len());
    prefixed.push_str(PREFIX);
    prefixed.push_str(name);
    node.child_either(name, &prefixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER: &[u8] = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    fn opf(body: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="bookid">{}</package>"#,
            body
        )
        .into_bytes()
    }

    const BODY: &str = r#"
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Test Book</dc:title>
    <dc:creator>Ann Author</dc:creator>
    <dc:identifier id="isbn">9780000000000</dc:identifier>
    <dc:identifier id="bookid">urn:uuid:12345678-9abc-def0-1234-56789abcdef0</dc:identifier>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover-img" href="images/cover.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>"#;

    #[test]
    fn test_parse_container() {
        assert_eq!(parse_container(CONTAINER).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn test_container_requires_version() {
        let xml = br#"<container version="2.0"><rootfiles><rootfile full-path="a.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#;
        assert!(matches!(
            parse_container(xml),
            Err(EpubError::FatalFormat(_))
        ));
    }

    #[test]
    fn test_container_requires_opf_media_type() {
        let xml = br#"<container version="1.0"><rootfiles><rootfile full-path="a.pdf" media-type="application/pdf"/></rootfiles></container>"#;
        assert!(matches!(
            parse_container(xml),
            Err(EpubError::FatalFormat(_))
        ));
    }

    #[test]
    fn test_package_lookups() {
        let pkg = PackageDocument::parse("OEBPS/content.opf", opf(BODY)).unwrap();
        assert_eq!(pkg.base_path(), "OEBPS/");
        assert_eq!(pkg.version(), PackageVersion::V2);
        assert_eq!(pkg.spine_length(), 2);
        assert_eq!(pkg.spine_idref(1), Some("ch2"));
        assert_eq!(pkg.spine_index_of("ch2"), Some(1));
        assert_eq!(pkg.spine_index_of("ncx"), None);
        assert_eq!(pkg.spine_item(0).unwrap().href, "text/ch1.xhtml");
        assert_eq!(pkg.manifest_by_href("toc.ncx").unwrap().id, "ncx");
        assert_eq!(pkg.manifest().count(), 4);
        assert_eq!(pkg.metadata("dc:title"), Some("Test Book"));
        assert_eq!(pkg.metadata("dc:publisher"), None);
        assert_eq!(
            pkg.unique_identifier(),
            "urn:uuid:12345678-9abc-def0-1234-56789abcdef0"
        );
        assert_eq!(pkg.cover_href(), Some("images/cover.jpg"));
        let (nav, kind) = pkg.navigation_item().unwrap();
        assert_eq!(nav.href, "toc.ncx");
        assert_eq!(kind, NavigationKind::Ncx);
    }

    #[test]
    fn test_prefixed_package_elements() {
        let xml = br#"<opf:package xmlns:opf="http://www.idpf.org/2007/opf" version="3.0">
  <opf:metadata/>
  <opf:manifest><opf:item id="c" href="c.xhtml" media-type="application/xhtml+xml"/></opf:manifest>
  <opf:spine><opf:itemref idref="c"/></opf:spine>
</opf:package>"#;
        let pkg = PackageDocument::parse("content.opf", xml.to_vec()).unwrap();
        assert_eq!(pkg.version(), PackageVersion::V3);
        assert_eq!(pkg.base_path(), "");
        assert_eq!(pkg.spine_length(), 1);
        assert_eq!(pkg.spine_item(0).unwrap().href, "c.xhtml");
        assert_eq!(pkg.unique_identifier(), "");
        assert_eq!(pkg.cover_href(), None);
    }

    #[test]
    fn test_rejects_bad_namespace_and_version() {
        let xml = br#"<package xmlns="urn:wrong" version="2.0"><metadata/><manifest/><spine/></package>"#;
        assert!(matches!(
            PackageDocument::parse("a.opf", xml.to_vec()),
            Err(EpubError::FatalFormat(_))
        ));
        let xml = br#"<package xmlns="http://www.idpf.org/2007/opf" version="4.0"><metadata/><manifest/><spine/></package>"#;
        assert!(matches!(
            PackageDocument::parse("a.opf", xml.to_vec()),
            Err(EpubError::FatalFormat(_))
        ));
    }

    #[test]
    fn test_accepts_only_known_versions() {
        for version in ["1.0", "2.0", "3.0"] {
            let xml = format!(
                r#"<package xmlns="http://www.idpf.org/2007/opf" version="{}"><metadata/><manifest/><spine/></package>"#,
                version
            );
            assert!(PackageDocument::parse("a.opf", xml.into_bytes()).is_ok(), "{}", version);
        }
        for version in ["3.9", "3.1", "3", "2.01"] {
            let xml = format!(
                r#"<package xmlns="http://www.idpf.org/2007/opf" version="{}"><metadata/><manifest/><spine/></package>"#,
                version
            );
            assert!(
                matches!(
                    PackageDocument::parse("a.opf", xml.into_bytes()),
                    Err(EpubError::FatalFormat(_))
                ),
                "{}",
                version
            );
        }
    }

    #[test]
    fn test_rejects_missing_manifest() {
        let xml = br#"<package xmlns="http://www.idpf.org/2007/opf" version="2.0"><metadata/><spine/></package>"#;
        assert!(matches!(
            PackageDocument::parse("a.opf", xml.to_vec()),
            Err(EpubError::FatalFormat(_))
        ));
    }

    #[test]
    fn test_cover_fallback_by_id() {
        let body = r#"<metadata/><manifest><item id="cover" href="c.png" media-type="image/png"/></manifest><spine/>"#;
        let pkg = PackageDocument::parse("a.opf", opf(body)).unwrap();
        assert_eq!(pkg.cover_href(), Some("c.png"));
        assert_eq!(pkg.spine_length(), 0);
    }

    #[test]
    fn test_cover_via_properties() {
        let body = r#"<metadata><meta name="cover" content="cover-image"/></metadata><manifest><item id="img1" properties="cover-image" href="i.jpg" media-type="image/jpeg"/></manifest><spine/>"#;
        let pkg = PackageDocument::parse("a.opf", opf(body)).unwrap();
        assert_eq!(pkg.cover_href(), Some("i.jpg"));
    }

    #[test]
    fn test_nav_document_fallback() {
        let body = r#"<metadata/><manifest><item id="nav" properties="nav" href="nav.xhtml" media-type="application/xhtml+xml"/></manifest><spine/>"#;
        let pkg = PackageDocument::parse("a.opf", opf(body)).unwrap();
        let (item, kind) = pkg.navigation_item().unwrap();
        assert_eq!(item.href, "nav.xhtml");
        assert_eq!(kind, NavigationKind::Xhtml);
    }
}
