//! `META-INF/encryption.xml` parsing
//!
//! Maps obfuscated resource paths to the scheme used to scramble them. A
//! descriptor without the expected namespace declarations is treated as
//! unsupported and yields no entries.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::EpubError;
use crate::obfuscation::ObfuscationKind;
use crate::xml::XmlDocument;

/// Archive path of the encryption descriptor.
pub const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";

const CONTAINER_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:container";
const XMLENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";

/// Resource path to obfuscation scheme mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncryptionManifest {
    entries: Vec<(String, ObfuscationKind)>,
}

impl EncryptionManifest {
    /// Parse the descriptor.
    ///
    /// Returns `Ok(None)` when the namespace declarations do not match, so the
    /// caller can log and carry on as if no resource were obfuscated.
    pub fn parse(data: Vec<u8>) -> Result<Option<Self>, EpubError> {
        let doc = XmlDocument::parse(data)?;
        let root = doc
            .root()
            .ok_or_else(|| EpubError::Parse(String::from("empty encryption descriptor")))?;

        if root.attr("xmlns") != Some(CONTAINER_NS) || root.attr("xmlns:enc") != Some(XMLENC_NS)
        {
            return Ok(None);
        }

        let mut entries = Vec::new();
        for data in root.children_named("enc:EncryptedData") {
            let uri = data
                .child("enc:CipherData")
                .and_then(|c| c.child("enc:CipherReference"))
                .and_then(|r| r.attr("URI"));
            let algorithm = data
                .child("enc:EncryptionMethod")
                .and_then(|m| m.attr("Algorithm"));
            if let (Some(uri), Some(algorithm)) = (uri, algorithm) {
                entries.push((
                    String::from(uri.trim()),
                    ObfuscationKind::from_algorithm(algorithm),
                ));
            }
        }
        Ok(Some(Self { entries }))
    }

    /// Scheme applied to `path`, `None` kind when unlisted.
    pub fn kind_of(&self, path: &str) -> ObfuscationKind {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, kind)| *kind)
            .unwrap_or(ObfuscationKind::None)
    }

    /// Number of listed resources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no resource is listed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
