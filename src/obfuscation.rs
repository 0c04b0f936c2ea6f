//! Font obfuscation keys and XOR descrambling
//!
//! Two schemes are in circulation. The Adobe scheme XORs the first 1024 bytes
//! of a resource with a 16-byte key parsed from a UUID-shaped book
//! identifier. The IDPF scheme XORs the first 1040 bytes with the SHA-1 digest
//! of the identifier with all whitespace removed. Both constants and the
//! key-cycling rule must stay bit-exact for interoperability.

extern crate alloc;

use alloc::vec::Vec;
use sha1::{Digest, Sha1};

use crate::path::hex_value;

/// Bytes descrambled by the Adobe scheme.
pub const ADOBE_OBFUSCATED_LEN: usize = 1024;
/// Bytes descrambled by the IDPF scheme.
pub const IDPF_OBFUSCATED_LEN: usize = 1040;

const UUID_LEN: usize = 36;
const URN_UUID_PREFIX: &str = "urn:uuid:";
const UUID_DASHES: [usize; 4] = [8, 13, 18, 23];
const UUID_HEX_PAIRS: [usize; 16] = [0, 2, 4, 6, 9, 11, 14, 16, 19, 21, 24, 26, 28, 30, 32, 34];

/// Obfuscation applied to one archive resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ObfuscationKind {
    /// Stored as-is.
    #[default]
    None,
    /// Adobe font mangling (`http://ns.adobe.com/pdf/enc#RC`).
    Adobe,
    /// IDPF font obfuscation (`http://www.idpf.org/2008/embedding`).
    Idpf,
    /// Any other algorithm; the resource is unusable.
    Unknown,
}

impl ObfuscationKind {
    /// Classify an `EncryptionMethod@Algorithm` URI.
    pub fn from_algorithm(uri: &str) -> Self {
        match uri.trim() {
            "http://ns.adobe.com/pdf/enc#RC" => ObfuscationKind::Adobe,
            "http://www.idpf.org/2008/embedding" => ObfuscationKind::Idpf,
            _ => ObfuscationKind::Unknown,
        }
    }
}

/// Returned when a resource cannot be descrambled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeobfuscateError {
    /// The algorithm is not one of the two supported schemes.
    UnknownAlgorithm,
    /// Adobe obfuscation was requested but the identifier is not a UUID.
    MissingAdobeKey,
}

/// Keys derived once per open book from its unique identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObfuscationKeys {
    adobe: Option<[u8; 16]>,
    idpf: [u8; 20],
}

impl ObfuscationKeys {
    /// Derive both keys from the package's unique identifier.
    pub fn derive(identifier: &str) -> Self {
        Self {
            adobe: adobe_key(identifier),
            idpf: idpf_key(identifier),
        }
    }

    /// 16-byte key, present only for UUID-shaped identifiers.
    pub fn adobe(&self) -> Option<&[u8; 16]> {
        self.adobe.as_ref()
    }

    /// 20-byte SHA-1 key.
    pub fn idpf(&self) -> &[u8; 20] {
        &self.idpf
    }

    /// Descramble the leading bytes of `buffer` in place.
    ///
    /// Buffers shorter than the scheme's length are transformed as far as
    /// they go. Applying the same kind twice restores the input.
    pub fn deobfuscate(
        &self,
        buffer: &mut [u8],
        kind: ObfuscationKind,
    ) -> Result<(), DeobfuscateError> {
        match kind {
            ObfuscationKind::None => Ok(()),
            ObfuscationKind::Adobe => {
                let key = self.adobe.ok_or(DeobfuscateError::MissingAdobeKey)?;
                xor_prefix(buffer, &key, ADOBE_OBFUSCATED_LEN);
                Ok(())
            }
            ObfuscationKind::Idpf => {
                xor_prefix(buffer, &self.idpf, IDPF_OBFUSCATED_LEN);
                Ok(())
            }
            ObfuscationKind::Unknown => Err(DeobfuscateError::UnknownAlgorithm),
        }
    }
}

fn xor_prefix(buffer: &mut [u8], key: &[u8], limit: usize) {
    let len = buffer.len().min(limit);
    for (i, byte) in buffer[..len].iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
}

fn adobe_key(identifier: &str) -> Option<[u8; 16]> {
    let bytes = identifier.as_bytes();
    let start = if identifier.starts_with(URN_UUID_PREFIX) {
        URN_UUID_PREFIX.len()
    } else {
        0
    };
    if bytes.len() != start + UUID_LEN {
        return None;
    }
    let uuid = &bytes[start..];
    if UUID_DASHES.iter().any(|&pos| uuid[pos] != b'-') {
        return None;
    }

    let mut key = [0u8; 16];
    for (slot, &pos) in key.iter_mut().zip(UUID_HEX_PAIRS.iter()) {
        let hi = hex_value(uuid[pos])?;
        let lo = hex_value(uuid[pos + 1])?;
        *slot = (hi << 4) | lo;
    }
    Some(key)
}

fn idpf_key(identifier: &str) -> [u8; 20] {
    let stripped: Vec<u8> = identifier
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let mut hasher = Sha1::new();
    hasher.update(&stripped);
    hasher.finalize().into()
}
