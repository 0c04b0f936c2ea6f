//! Archive path resolution
//!
//! Resource references inside a book are relative to the package document's
//! folder. Resolution percent-decodes `%XX` escapes and collapses `/../`
//! segments in a single left-to-right pass by backing up to the previous `/`
//! already written. A `../` at the very start of the reference has no `/`
//! before it and is kept as a literal segment.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

/// Resolve `relative` (relative to the package folder) to a full archive path.
///
/// `base` is the package folder including its trailing `/`, or empty when the
/// package document sits at the archive root.
pub fn locate(base: &str, relative: &str) -> String {
    let normalized = normalize(relative);
    let mut out = String::with_capacity(base.len() + normalized.len());
    out.push_str(base);
    out.push_str(&normalized);
    out
}

/// Decode `%XX` escapes and collapse `/../` segments.
pub fn normalize(path: &str) -> String {
    let src = path.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(src.len());
    let mut i = 0usize;

    while i < src.len() {
        if src[i] == b'%' {
            if let Some(byte) = decode_escape(&src[i + 1..]) {
                out.push(byte);
                i += 3;
                continue;
            }
        } else if src[i..].starts_with(b"/../") {
            let mut idx = out.len();
            while idx > 0 {
                idx -= 1;
                if out[idx] == b'/' {
                    break;
                }
            }
            out.truncate(idx);
            // Keep the separator when a parent folder survived.
            i += if idx > 0 { 3 } else { 4 };
            continue;
        }
        out.push(src[i]);
        i += 1;
    }

    match String::from_utf8(out) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Folder part of `path` including the trailing `/`, or empty.
pub fn folder_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) if idx > 0 => &path[..=idx],
        _ => "",
    }
}

fn decode_escape(bytes: &[u8]) -> Option<u8> {
    if bytes.len() < 2 {
        return None;
    }
    let hi = hex_value(bytes[0])?;
    let lo = hex_value(bytes[1])?;
    Some((hi << 4) | lo)
}

pub(crate) fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_is_prefixed() {
        assert_eq!(locate("OEBPS/", "chapter1.xhtml"), "OEBPS/chapter1.xhtml");
        assert_eq!(locate("", "chapter1.xhtml"), "chapter1.xhtml");
    }

    #[test]
    fn test_percent_escape_decodes_to_space() {
        let path = locate("OEBPS/", "%20img.png");
        assert_eq!(path, "OEBPS/ img.png");
        assert!(path.contains(' '));
    }

    #[test]
    fn test_percent_escape_multibyte() {
        assert_eq!(normalize("caf%C3%A9.xhtml"), "café.xhtml");
    }

    #[test]
    fn test_invalid_escape_kept_literally() {
        assert_eq!(normalize("100%.png"), "100%.png");
        assert_eq!(normalize("a%zzb"), "a%zzb");
    }

    #[test]
    fn test_parent_segment_backs_up_one_folder() {
        assert_eq!(
            locate("OEBPS/", "text/../images/a.png"),
            "OEBPS/images/a.png"
        );
        assert_eq!(normalize("a/b/../c.css"), "a/c.css");
    }

    #[test]
    fn test_repeated_parent_segments() {
        assert_eq!(normalize("a/b/c/../../d.png"), "a/d.png");
    }

    #[test]
    fn test_leading_parent_segment_stays_literal() {
        assert_eq!(normalize("../images/a.png"), "../images/a.png");
        assert_eq!(locate("OEBPS/", "../a.png"), "OEBPS/../a.png");
    }

    #[test]
    fn test_parent_past_root_does_not_underflow() {
        assert_eq!(normalize("/../a.png"), "a.png");
        assert_eq!(normalize("x/../../a.png"), "../a.png");
    }

    #[test]
    fn test_folder_of() {
        assert_eq!(folder_of("OEBPS/content.opf"), "OEBPS/");
        assert_eq!(folder_of("text/ch1.xhtml"), "text/");
        assert_eq!(folder_of("content.opf"), "");
        assert_eq!(folder_of("/content.opf"), "");
    }
}
