//! Owned XML document with an in-place node view
//!
//! `XmlDocument` takes ownership of the raw bytes of a resource, indexes
//! elements and text by byte span into that buffer, and unescapes text and
//! attribute values in place. Nodes are only reachable through a borrow of
//! the document, so the buffer always outlives every view of it.

extern crate alloc;

use alloc::borrow::Cow;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::EpubError;

const NONE: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Span {
    start: u32,
    len: u32,
}

impl Span {
    fn range(self) -> core::ops::Range<usize> {
        self.start as usize..(self.start + self.len) as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Document,
    Element,
    Text,
}

#[derive(Clone, Debug)]
struct NodeData {
    kind: NodeKind,
    /// Element name, or text content for text nodes.
    span: Span,
    attr_start: u32,
    attr_count: u32,
    parent: u32,
    first_child: u32,
    last_child: u32,
    next_sibling: u32,
}

#[derive(Clone, Copy, Debug)]
struct AttrData {
    name: Span,
    value: Span,
}

/// Parsed XML document owning its source buffer.
#[derive(Debug)]
pub struct XmlDocument {
    buf: Vec<u8>,
    nodes: Vec<NodeData>,
    attrs: Vec<AttrData>,
}

impl XmlDocument {
    /// Parse `buf`, taking ownership of it.
    ///
    /// Whitespace-only text between elements is not kept. On failure the
    /// buffer is dropped with the error.
    pub fn parse(buf: Vec<u8>) -> Result<Self, EpubError> {
        let mut doc = XmlDocument {
            buf,
            nodes: Vec::new(),
            attrs: Vec::new(),
        };
        doc.nodes.push(NodeData::new(NodeKind::Document, Span::default(), 0));
        let escaped = doc.index()?;
        doc.unescape_spans(&escaped);
        Ok(doc)
    }

    /// Parse a UTF-8 string.
    pub fn parse_str(s: &str) -> Result<Self, EpubError> {
        Self::parse(s.as_bytes().to_vec())
    }

    /// Document node; its element children are the top-level elements.
    pub fn document(&self) -> Node<'_> {
        Node { doc: self, idx: 0 }
    }

    /// First top-level element.
    pub fn root(&self) -> Option<Node<'_>> {
        self.document().children().next()
    }

    /// Size of the owned source buffer in bytes.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// Build the node tree. Returns the spans that still hold escaped text.
    fn index(&mut self) -> Result<Vec<u32>, EpubError> {
        let buf = core::mem::take(&mut self.buf);
        let result = self.index_buffer(&buf);
        self.buf = buf;
        result
    }

    fn index_buffer(&mut self, buf: &[u8]) -> Result<Vec<u32>, EpubError> {
        let mut reader = Reader::from_reader(buf);
        reader.config_mut().trim_text(false);
        reader.config_mut().expand_empty_elements = false;

        let mut escaped = Vec::new();
        let mut stack: Vec<u32> = Vec::new();
        let mut pending: Option<Span> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                EpubError::Parse(format!(
                    "XML error at byte {}: {}",
                    reader.error_position(),
                    e
                ))
            })?;
            let parent = stack.last().copied().unwrap_or(0);

            match event {
                Event::Text(e) => {
                    if let Some(span) = span_in(buf, &e) {
                        pending = Some(extend(pending, span));
                    }
                    continue;
                }
                Event::GeneralRef(e) => {
                    if let Some(name) = span_in(buf, &e) {
                        // Include the surrounding '&' and ';'.
                        let span = Span {
                            start: name.start.saturating_sub(1),
                            len: name.len + 2,
                        };
                        pending = Some(extend(pending, span));
                    }
                    continue;
                }
                _ => {}
            }

            if let Some(span) = pending.take() {
                if !buf[span.range()].iter().all(|b| b.is_ascii_whitespace()) {
                    let idx = self.append(parent, NodeKind::Text, span);
                    escaped.push(idx);
                }
            }

            match event {
                Event::Start(e) => {
                    let idx = self.open_element(buf, parent, &e)?;
                    stack.push(idx);
                }
                Event::Empty(e) => {
                    self.open_element(buf, parent, &e)?;
                }
                Event::End(_) => {
                    if stack.pop().is_none() {
                        return Err(EpubError::Parse(String::from("unbalanced end tag")));
                    }
                }
                Event::CData(e) => {
                    if let Some(span) = span_in(buf, &e) {
                        self.append(parent, NodeKind::Text, span);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(EpubError::Parse(format!(
                "{} element(s) left unclosed",
                stack.len()
            )));
        }
        if self.nodes[0].first_child == NONE {
            return Err(EpubError::Parse(String::from("document has no elements")));
        }
        Ok(escaped)
    }

    fn open_element(
        &mut self,
        buf: &[u8],
        parent: u32,
        e: &quick_xml::events::BytesStart<'_>,
    ) -> Result<u32, EpubError> {
        let name = e.name();
        let name_span = span_in(buf, name.as_ref())
            .ok_or_else(|| EpubError::Parse(String::from("element name outside buffer")))?;
        let idx = self.append(parent, NodeKind::Element, name_span);

        let attr_start = self.attrs.len() as u32;
        for attr in e.attributes().with_checks(false).flatten() {
            let key = span_in(buf, attr.key.as_ref());
            let value = span_in(buf, attr.value.as_ref());
            if let (Some(name), Some(value)) = (key, value) {
                self.attrs.push(AttrData { name, value });
            }
        }
        let node = &mut self.nodes[idx as usize];
        node.attr_start = attr_start;
        node.attr_count = self.attrs.len() as u32 - attr_start;
        Ok(idx)
    }

    fn append(&mut self, parent: u32, kind: NodeKind, span: Span) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(NodeData::new(kind, span, parent));
        let prev_last = self.nodes[parent as usize].last_child;
        if prev_last == NONE {
            self.nodes[parent as usize].first_child = idx;
        } else {
            self.nodes[prev_last as usize].next_sibling = idx;
        }
        self.nodes[parent as usize].last_child = idx;
        idx
    }

    /// Unescape text nodes and attribute values, shrinking their spans.
    fn unescape_spans(&mut self, text_nodes: &[u32]) {
        for &idx in text_nodes {
            let span = self.nodes[idx as usize].span;
            self.nodes[idx as usize].span = unescape_in_place(&mut self.buf, span);
        }
        for i in 0..self.attrs.len() {
            let span = self.attrs[i].value;
            self.attrs[i].value = unescape_in_place(&mut self.buf, span);
        }
    }

    fn str_at(&self, span: Span) -> &str {
        self.buf
            .get(span.range())
            .and_then(|b| core::str::from_utf8(b).ok())
            .unwrap_or_default()
    }
}

impl NodeData {
    fn new(kind: NodeKind, span: Span, parent: u32) -> Self {
        Self {
            kind,
            span,
            attr_start: 0,
            attr_count: 0,
            parent,
            first_child: NONE,
            last_child: NONE,
            next_sibling: NONE,
        }
    }
}

fn extend(pending: Option<Span>, next: Span) -> Span {
    match pending {
        Some(span) => Span {
            start: span.start,
            len: next.start + next.len - span.start,
        },
        None => next,
    }
}

/// Locate `part` inside `buf` by address.
fn span_in(buf: &[u8], part: &[u8]) -> Option<Span> {
    if part.is_empty() {
        return Some(Span::default());
    }
    let start = (part.as_ptr() as usize).checked_sub(buf.as_ptr() as usize)?;
    if start + part.len() > buf.len() {
        return None;
    }
    Some(Span {
        start: start as u32,
        len: part.len() as u32,
    })
}

fn unescape_in_place(buf: &mut [u8], span: Span) -> Span {
    let Some(raw) = buf
        .get(span.range())
        .and_then(|b| core::str::from_utf8(b).ok())
    else {
        return span;
    };
    if !raw.contains('&') {
        return span;
    }
    let decoded = match quick_xml::escape::unescape_with(raw, resolve_common_entity) {
        Ok(Cow::Owned(s)) if s.len() <= span.len as usize => s,
        _ => return span,
    };
    let start = span.start as usize;
    buf[start..start + decoded.len()].copy_from_slice(decoded.as_bytes());
    Span {
        start: span.start,
        len: decoded.len() as u32,
    }
}

fn resolve_common_entity(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        "nbsp" => Some("\u{a0}"),
        "shy" => Some("\u{ad}"),
        "ndash" => Some("\u{2013}"),
        "mdash" => Some("\u{2014}"),
        "lsquo" => Some("\u{2018}"),
        "rsquo" => Some("\u{2019}"),
        "ldquo" => Some("\u{201c}"),
        "rdquo" => Some("\u{201d}"),
        "hellip" => Some("\u{2026}"),
        "copy" => Some("\u{a9}"),
        _ => None,
    }
}

/// Borrowed view of one node in an [`XmlDocument`].
#[derive(Clone, Copy, Debug)]
pub struct Node<'d> {
    doc: &'d XmlDocument,
    idx: u32,
}

impl<'d> Node<'d> {
    fn data(&self) -> &'d NodeData {
        &self.doc.nodes[self.idx as usize]
    }

    /// Whether this is an element node.
    pub fn is_element(&self) -> bool {
        self.data().kind == NodeKind::Element
    }

    /// Qualified element name, empty for non-elements.
    pub fn name(&self) -> &'d str {
        if self.is_element() {
            self.doc.str_at(self.data().span)
        } else {
            ""
        }
    }

    /// Element name without any namespace prefix.
    pub fn local_name(&self) -> &'d str {
        let name = self.name();
        name.rsplit(':').next().unwrap_or(name)
    }

    /// Attribute value by qualified name.
    pub fn attr(&self, name: &str) -> Option<&'d str> {
        self.attrs().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    /// All attributes in document order.
    pub fn attrs(&self) -> impl Iterator<Item = (&'d str, &'d str)> + 'd {
        let data = self.data();
        let doc = self.doc;
        let start = data.attr_start as usize;
        let end = start + data.attr_count as usize;
        doc.attrs[start..end]
            .iter()
            .map(move |a| (doc.str_at(a.name), doc.str_at(a.value)))
    }

    /// Parent node, `None` at the document node.
    pub fn parent(&self) -> Option<Node<'d>> {
        if self.idx == 0 {
            None
        } else {
            Some(Node {
                doc: self.doc,
                idx: self.data().parent,
            })
        }
    }

    fn all_children(&self) -> Siblings<'d> {
        Siblings {
            doc: self.doc,
            next: self.data().first_child,
        }
    }

    /// Element children in document order.
    pub fn children(&self) -> impl Iterator<Item = Node<'d>> + 'd {
        self.all_children().filter(|n| n.is_element())
    }

    /// Element children with the given qualified name.
    pub fn children_named<'n>(&self, name: &'n str) -> impl Iterator<Item = Node<'d>> + 'n
    where
        'd: 'n,
    {
        self.children().filter(move |n| n.name() == name)
    }

    /// First element child with the given qualified name.
    pub fn child(&self, name: &str) -> Option<Node<'d>> {
        self.children().find(|n| n.name() == name)
    }

    /// First child named `name`, else first child named `alternate`.
    pub fn child_either(&self, name: &str, alternate: &str) -> Option<Node<'d>> {
        self.child(name).or_else(|| self.child(alternate))
    }

    /// First element child named `name` whose `attr` equals `value`.
    pub fn child_with_attr(&self, name: &str, attr: &str, value: &str) -> Option<Node<'d>> {
        self.children()
            .find(|n| n.name() == name && n.attr(attr) == Some(value))
    }

    /// Following element siblings with the same name as this node.
    pub fn next_sibling_same_name(&self) -> Option<Node<'d>> {
        let name = self.name();
        let mut next = self.data().next_sibling;
        while next != NONE {
            let node = Node {
                doc: self.doc,
                idx: next,
            };
            if node.is_element() && node.name() == name {
                return Some(node);
            }
            next = node.data().next_sibling;
        }
        None
    }

    /// First text child, as stored.
    pub fn text(&self) -> Option<&'d str> {
        self.all_children()
            .find(|n| n.data().kind == NodeKind::Text)
            .map(|n| self.doc.str_at(n.data().span))
    }

    /// Concatenation of every descendant text node.
    pub fn text_content(&self) -> Cow<'d, str> {
        let mut parts: Vec<&'d str> = Vec::new();
        let mut stack: Vec<Node<'d>> = self.all_children().collect();
        stack.reverse();
        while let Some(node) = stack.pop() {
            match node.data().kind {
                NodeKind::Text => parts.push(self.doc.str_at(node.data().span)),
                _ => {
                    let mut kids: Vec<Node<'d>> = node.all_children().collect();
                    kids.reverse();
                    stack.extend(kids);
                }
            }
        }
        match parts.len() {
            0 => Cow::Borrowed(""),
            1 => Cow::Borrowed(parts[0]),
            _ => Cow::Owned(parts.concat()),
        }
    }

    /// Descendant elements in document order, without recursion.
    pub fn descendants(&self) -> impl Iterator<Item = Node<'d>> + 'd {
        let mut stack: Vec<Node<'d>> = self.all_children().collect();
        stack.reverse();
        core::iter::from_fn(move || {
            while let Some(node) = stack.pop() {
                let mut kids: Vec<Node<'d>> = node.all_children().collect();
                kids.reverse();
                stack.extend(kids);
                if node.is_element() {
                    return Some(node);
                }
            }
            None
        })
    }
}

struct Siblings<'d> {
    doc: &'d XmlDocument,
    next: u32,
}

impl<'d> Iterator for Siblings<'d> {
    type Item = Node<'d>;

    fn next(&mut self) -> Option<Node<'d>> {
        if self.next == NONE {
            return None;
        }
        let node = Node {
            doc: self.doc,
            idx: self.next,
        };
        self.next = node.data().next_sibling;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree_and_attributes() {
        let doc = XmlDocument::parse_str(
            r#"<?xml version="1.0"?><package version="2.0"><metadata><dc:title>Book</dc:title></metadata><manifest><item id="a" href="a.xhtml"/></manifest></package>"#,
        )
        .unwrap();
        let root = doc.root().unwrap();
        assert_eq!(root.name(), "package");
        assert_eq!(root.attr("version"), Some("2.0"));
        let title = root.child("metadata").unwrap().child("dc:title").unwrap();
        assert_eq!(title.text(), Some("Book"));
        assert_eq!(title.local_name(), "title");
        let item = root.child("manifest").unwrap().child("item").unwrap();
        assert_eq!(item.attr("href"), Some("a.xhtml"));
        assert_eq!(item.attr("missing"), None);
    }

    #[test]
    fn test_entities_unescaped_in_place() {
        let doc =
            XmlDocument::parse_str(r#"<a t="x &amp; y"><b>Tom &amp; Jerry&#33; &nbsp;ok</b></a>"#)
                .unwrap();
        let a = doc.root().unwrap();
        assert_eq!(a.attr("t"), Some("x & y"));
        assert_eq!(a.child("b").unwrap().text(), Some("Tom & Jerry! \u{a0}ok"));
    }

    #[test]
    fn test_unknown_entity_left_raw() {
        let doc = XmlDocument::parse_str("<a>x &foo; y</a>").unwrap();
        assert_eq!(doc.root().unwrap().text(), Some("x &foo; y"));
    }

    #[test]
    fn test_cdata_and_text_content() {
        let doc =
            XmlDocument::parse_str("<style>\n  <![CDATA[  p { color: red } ]]>  \n</style>").unwrap();
        let style = doc.root().unwrap();
        assert_eq!(style.text_content().trim(), "p { color: red }");
    }

    #[test]
    fn test_child_either_prefers_bare_name() {
        let doc = XmlDocument::parse_str("<r><opf:item id='p'/><item id='b'/></r>").unwrap();
        let r = doc.root().unwrap();
        assert_eq!(r.child_either("item", "opf:item").unwrap().attr("id"), Some("b"));
        let doc = XmlDocument::parse_str("<r><opf:item id='p'/></r>").unwrap();
        let r = doc.root().unwrap();
        assert_eq!(r.child_either("item", "opf:item").unwrap().attr("id"), Some("p"));
    }

    #[test]
    fn test_sibling_walk_and_descendants() {
        let doc = XmlDocument::parse_str("<r><p n='1'/><q/><p n='2'><p n='3'/></p></r>").unwrap();
        let first = doc.root().unwrap().child("p").unwrap();
        let second = first.next_sibling_same_name().unwrap();
        assert_eq!(second.attr("n"), Some("2"));
        assert!(second.next_sibling_same_name().is_none());
        let order: Vec<&str> = doc
            .root()
            .unwrap()
            .descendants()
            .filter_map(|n| n.attr("n"))
            .collect();
        assert_eq!(order, vec!["1", "2", "3"]);
        assert_eq!(second.parent().unwrap().name(), "r");
    }

    #[test]
    fn test_malformed_document_rejected() {
        assert!(XmlDocument::parse_str("<a><b></a>").is_err());
        assert!(XmlDocument::parse_str("<a>").is_err());
        assert!(XmlDocument::parse_str("   ").is_err());
    }

    #[test]
    fn test_whitespace_text_dropped() {
        let doc = XmlDocument::parse_str("<a>\n  <b/>\n</a>").unwrap();
        assert_eq!(doc.root().unwrap().text(), None);
    }
}
