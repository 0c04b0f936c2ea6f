//! In-memory EPUB fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ink_epub::{ObfuscationKeys, ObfuscationKind};

pub const BOOK_ID: &str = "urn:uuid:0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0";
pub const IDPF_ALGORITHM: &str = "http://www.idpf.org/2008/embedding";
pub const ADOBE_ALGORITHM: &str = "http://ns.adobe.com/pdf/enc#RC";

pub const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

pub const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>The Sample Book</dc:title>
    <dc:creator>A. Writer</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="bookid">urn:uuid:0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0</dc:identifier>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="styles/book.css" media-type="text/css"/>
    <item id="extra" href="styles/extra.css" media-type="text/css"/>
    <item id="font" href="fonts/serif.ttf" media-type="application/x-font-ttf"/>
    <item id="font-b" href="fonts/serif-bold.ttf" media-type="application/x-font-ttf"/>
    <item id="font-i" href="fonts/serif-italic.ttf" media-type="application/x-font-ttf"/>
    <item id="cover-img" href="images/cover.png" media-type="image/png"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>
</package>"#;

pub const NCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>Chapter 1</text></navLabel>
      <content src="text/ch1.xhtml"/>
      <navPoint id="n2" playOrder="2">
        <navLabel><text>Section 1.1</text></navLabel>
        <content src="text/ch1.xhtml#s11"/>
      </navPoint>
    </navPoint>
    <navPoint id="n3" playOrder="3">
      <navLabel><text>Chapter 2</text></navLabel>
      <content src="text/ch2.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#;

pub const CH1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <title>Chapter 1</title>
  <link rel="stylesheet" type="text/css" href="../styles/book.css"/>
  <style type="text/css">p.note { font-style: italic; }</style>
  <script type="text/javascript">/*<![CDATA[*/ if (a < b && b > c) { go(); } /*]]>*/</script>
</head>
<body>
  <h1>Chapter 1</h1>
  <p id="s11" class="note">Section 1.1</p>
  <img src="../images/cover.png" alt=""/>
</body>
</html>"#;

pub const CH2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <title>Chapter 2</title>
  <link rel="stylesheet" type="text/css" href="../styles/book.css"/>
  <link rel="stylesheet" type="text/css" href="../styles/extra.css"/>
</head>
<body><h1>Chapter 2</h1><p class="small">The end.</p></body>
</html>"#;

pub const BOOK_CSS: &str = r#"@font-face {
  font-family: "Book Serif";
  src: url(../fonts/serif.ttf);
}
body { font-family: "Book Serif"; }
h1 { font-weight: bold; text-align: center; }
"#;

pub const EXTRA_CSS: &str = r#"@font-face {
  font-family: "Book Serif";
  font-weight: bold;
  src: url(../fonts/serif-bold.ttf);
}
@font-face {
  font-family: "Book Serif";
  font-style: italic;
  src: url(../fonts/serif-italic.ttf);
}
.small { font-size: 0.8em; }
"#;

pub const FONT_PATHS: [&str; 3] = [
    "OEBPS/fonts/serif.ttf",
    "OEBPS/fonts/serif-bold.ttf",
    "OEBPS/fonts/serif-italic.ttf",
];

/// Deterministic stand-in for a font program.
pub fn font_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Plain bytes of the three sample fonts, in `FONT_PATHS` order.
pub fn plain_fonts() -> [Vec<u8>; 3] {
    [font_bytes(2000, 1), font_bytes(2000, 2), font_bytes(100, 3)]
}

pub fn encryption_xml(algorithm: &str) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container" xmlns:enc="http://www.w3.org/2001/04/xmlenc#">"#,
    );
    for path in FONT_PATHS {
        xml.push_str(&format!(
            r#"
  <enc:EncryptedData>
    <enc:EncryptionMethod Algorithm="{}"/>
    <enc:CipherData><enc:CipherReference URI="{}"/></enc:CipherData>
  </enc:EncryptedData>"#,
            algorithm, path
        ));
    }
    xml.push_str("\n</encryption>");
    xml
}

pub struct EpubBuilder {
    files: Vec<(String, Vec<u8>)>,
}

impl EpubBuilder {
    /// Archive with only the `mimetype` entry.
    pub fn empty() -> Self {
        Self {
            files: vec![("mimetype".to_string(), b"application/epub+zip".to_vec())],
        }
    }

    /// Full sample book with IDPF-obfuscated fonts.
    pub fn sample() -> Self {
        Self::sample_with_algorithm(IDPF_ALGORITHM)
    }

    /// Full sample book whose fonts are scrambled with `algorithm`.
    ///
    /// Unknown algorithms leave the stored bytes unscrambled.
    pub fn sample_with_algorithm(algorithm: &str) -> Self {
        let kind = ObfuscationKind::from_algorithm(algorithm);
        let keys = ObfuscationKeys::derive(BOOK_ID);
        let mut builder = Self::empty()
            .file("META-INF/container.xml", CONTAINER)
            .file("META-INF/encryption.xml", encryption_xml(algorithm))
            .file("OEBPS/content.opf", OPF)
            .file("OEBPS/toc.ncx", NCX)
            .file("OEBPS/text/ch1.xhtml", CH1)
            .file("OEBPS/text/ch2.xhtml", CH2)
            .file("OEBPS/styles/book.css", BOOK_CSS)
            .file("OEBPS/styles/extra.css", EXTRA_CSS)
            .file("OEBPS/images/cover.png", b"\x89PNG\r\n\x1a\nfake".to_vec());
        for (path, mut data) in FONT_PATHS.into_iter().zip(plain_fonts()) {
            if kind != ObfuscationKind::Unknown {
                keys.deobfuscate(&mut data, kind).unwrap();
            }
            builder = builder.file(path, data);
        }
        builder
    }

    /// Add or replace an entry.
    pub fn file(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        match self.files.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = data,
            None => self.files.push((name.to_string(), data)),
        }
        self
    }

    /// Drop an entry.
    pub fn without(mut self, name: &str) -> Self {
        self.files.retain(|(n, _)| n != name);
        self
    }

    /// Stored (uncompressed) ZIP bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut zip = Vec::new();
        let mut central = Vec::new();

        for (name, data) in &self.files {
            let offset = zip.len() as u32;
            let crc = crc32fast::hash(data);

            zip.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            zip.extend_from_slice(&20u16.to_le_bytes());
            zip.extend_from_slice(&0u16.to_le_bytes()); // flags
            zip.extend_from_slice(&0u16.to_le_bytes()); // stored
            zip.extend_from_slice(&0u16.to_le_bytes()); // time
            zip.extend_from_slice(&0u16.to_le_bytes()); // date
            zip.extend_from_slice(&crc.to_le_bytes());
            zip.extend_from_slice(&(data.len() as u32).to_le_bytes());
            zip.extend_from_slice(&(data.len() as u32).to_le_bytes());
            zip.extend_from_slice(&(name.len() as u16).to_le_bytes());
            zip.extend_from_slice(&0u16.to_le_bytes());
            zip.extend_from_slice(name.as_bytes());
            zip.extend_from_slice(data);

            central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&crc.to_le_bytes());
            central.extend_from_slice(&(data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // extra
            central.extend_from_slice(&0u16.to_le_bytes()); // comment
            central.extend_from_slice(&0u16.to_le_bytes()); // disk
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(name.as_bytes());
        }

        let cd_offset = zip.len() as u32;
        let count = self.files.len() as u16;
        zip.extend_from_slice(&central);
        zip.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes());
        zip.extend_from_slice(&count.to_le_bytes());
        zip.extend_from_slice(&count.to_le_bytes());
        zip.extend_from_slice(&(central.len() as u32).to_le_bytes());
        zip.extend_from_slice(&cd_offset.to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes());
        zip
    }

    /// Write the archive as `book.epub` under `dir`.
    pub fn write_to(&self, dir: &Path) -> PathBuf {
        let path = dir.join("book.epub");
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}
