//! CSS subset parser for book stylesheets
//!
//! Parses the subset of CSS the reader honours:
//! - Font properties: `font-size`, `font-family`, `font-weight`, `font-style`
//! - Text: `text-align`, `line-height`, `text-indent`
//! - Spacing: `margin-top`, `margin-bottom`
//! - Selectors: tag, class, `tag.class`, `*` and comma lists; for compound
//!   selectors such as `div p` only the last component is kept
//! - `@font-face` rules, collected separately for font loading
//!
//! Other at-rules (`@media`, `@page`, `@import`, ...) are skipped whole.

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::EpubError;

/// Line height value
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum LineHeight {
    /// Absolute height in pixels
    Px(f32),
    /// Multiplier relative to font size (e.g., 1.5 = 1.5x)
    Multiplier(f32),
}

/// Font size value
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum FontSize {
    /// Absolute size in pixels
    Px(f32),
    /// Relative size in em units
    Em(f32),
    /// Percentage of the parent size
    Percent(f32),
}

/// Font weight
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[non_exhaustive]
pub enum FontWeight {
    /// Normal weight (400)
    #[default]
    Normal,
    /// Bold weight (600 and up)
    Bold,
}

/// Font style
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[non_exhaustive]
pub enum FontStyle {
    /// Upright text
    #[default]
    Normal,
    /// Italic or oblique text
    Italic,
}

/// Text alignment
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[non_exhaustive]
pub enum TextAlign {
    /// Left-aligned (default for LTR)
    #[default]
    Left,
    /// Centered
    Center,
    /// Right-aligned
    Right,
    /// Justified
    Justify,
}

/// A set of CSS property values
///
/// `None` means "not specified".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CssStyle {
    /// Font size
    pub font_size: Option<FontSize>,
    /// First font family name
    pub font_family: Option<String>,
    /// Font weight
    pub font_weight: Option<FontWeight>,
    /// Font style
    pub font_style: Option<FontStyle>,
    /// Text alignment
    pub text_align: Option<TextAlign>,
    /// Line height
    pub line_height: Option<LineHeight>,
    /// First-line indent in pixels or em, as written
    pub text_indent: Option<FontSize>,
    /// Top margin in pixels
    pub margin_top: Option<f32>,
    /// Bottom margin in pixels
    pub margin_bottom: Option<f32>,
}

impl CssStyle {
    /// Create an empty style (all properties unset)
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if any property is set
    pub fn is_empty(&self) -> bool {
        *self == CssStyle::default()
    }

    /// Merge another style into this one (other's values take precedence)
    pub fn merge(&mut self, other: &CssStyle) {
        if other.font_size.is_some() {
            self.font_size = other.font_size;
        }
        if other.font_family.is_some() {
            self.font_family = other.font_family.clone();
        }
        if other.font_weight.is_some() {
            self.font_weight = other.font_weight;
        }
        if other.font_style.is_some() {
            self.font_style = other.font_style;
        }
        if other.text_align.is_some() {
            self.text_align = other.text_align;
        }
        if other.line_height.is_some() {
            self.line_height = other.line_height.clone();
        }
        if other.text_indent.is_some() {
            self.text_indent = other.text_indent;
        }
        if other.margin_top.is_some() {
            self.margin_top = other.margin_top;
        }
        if other.margin_bottom.is_some() {
            self.margin_bottom = other.margin_bottom;
        }
    }
}

/// A CSS selector (subset)
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum CssSelector {
    /// Universal selector `*`
    Any,
    /// Tag selector (e.g., `p`, `h1`)
    Tag(String),
    /// Class selector (e.g., `.chapter-title`)
    Class(String),
    /// Tag + class selector (e.g., `p.intro`)
    TagClass(String, String),
}

impl CssSelector {
    /// Check if this selector matches a given tag name and class list
    pub fn matches(&self, tag: &str, classes: &[&str]) -> bool {
        match self {
            CssSelector::Any => true,
            CssSelector::Tag(t) => t.eq_ignore_ascii_case(tag),
            CssSelector::Class(c) => classes.contains(&c.as_str()),
            CssSelector::TagClass(t, c) => {
                t.eq_ignore_ascii_case(tag) && classes.contains(&c.as_str())
            }
        }
    }
}

/// A single CSS rule (selector + declarations)
#[derive(Clone, Debug, PartialEq)]
pub struct CssRule {
    /// The selector for this rule
    pub selector: CssSelector,
    /// The style declarations
    pub style: CssStyle,
}

/// An `@font-face` declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct FontFaceRule {
    /// Declared family name, unquoted
    pub family: String,
    /// Declared weight, normal when absent
    pub weight: FontWeight,
    /// Declared style, normal when absent
    pub style: FontStyle,
    /// Preferred `url(...)` from `src`, relative to the stylesheet
    pub src: String,
}

/// A parsed CSS stylesheet
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stylesheet {
    /// All rules in document order
    pub rules: Vec<CssRule>,
    /// `@font-face` rules in document order
    pub font_faces: Vec<FontFaceRule>,
}

impl Stylesheet {
    /// Create an empty stylesheet
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the computed style for an element given its tag and classes
    ///
    /// Applies matching rules in document order (later rules override).
    pub fn resolve(&self, tag: &str, classes: &[&str]) -> CssStyle {
        let mut style = CssStyle::new();
        for rule in &self.rules {
            if rule.selector.matches(tag, classes) {
                style.merge(&rule.style);
            }
        }
        style
    }

    /// Append another sheet's rules after this sheet's rules.
    pub fn extend_from(&mut self, other: &Stylesheet) {
        self.rules.extend(other.rules.iter().cloned());
    }

    /// Get the number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if the stylesheet is empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.font_faces.is_empty()
    }
}

/// Parse a CSS stylesheet string into a `Stylesheet`
///
/// Rules with selectors outside the subset are dropped; an unclosed block is
/// an error.
pub fn parse_stylesheet(css: &str) -> Result<Stylesheet, EpubError> {
    let mut stylesheet = Stylesheet::new();
    let mut pos = 0;
    let bytes = css.as_bytes();

    while pos < bytes.len() {
        pos = skip_whitespace_and_comments(css, pos);
        if pos >= bytes.len() {
            break;
        }

        if bytes[pos] == b'@' {
            pos = parse_at_rule(css, pos, &mut stylesheet)?;
            continue;
        }

        let brace_start = match css[pos..].find('{') {
            Some(i) => pos + i,
            None => break,
        };
        let brace_end = match css[brace_start + 1..].find('}') {
            Some(i) => brace_start + 1 + i,
            None => return Err(EpubError::Css("Unclosed CSS rule block".into())),
        };

        let style = parse_declarations(&css[brace_start + 1..brace_end]);
        if !style.is_empty() {
            for selector in css[pos..brace_start].split(',').filter_map(parse_selector) {
                stylesheet.rules.push(CssRule {
                    selector,
                    style: style.clone(),
                });
            }
        }

        pos = brace_end + 1;
    }

    Ok(stylesheet)
}

/// Parse an inline `style` attribute value into a `CssStyle`
///
/// Example: `"font-weight: bold; margin-top: 10px"`
pub fn parse_inline_style(style_attr: &str) -> CssStyle {
    parse_declarations(style_attr)
}

// -- Internal parsing helpers -------------------------------------------------

/// Skip whitespace, CSS comments and stray HTML comment markers
fn skip_whitespace_and_comments(css: &str, mut pos: usize) -> usize {
    let bytes = css.as_bytes();
    while pos < bytes.len() {
        if bytes[pos].is_ascii_whitespace() {
            pos += 1;
        } else if css[pos..].starts_with("/*") {
            match css[pos + 2..].find("*/") {
                Some(end) => pos = pos + 2 + end + 2,
                None => return bytes.len(),
            }
        } else if css[pos..].starts_with("<!--") {
            pos += 4;
        } else if css[pos..].starts_with("-->") {
            pos += 3;
        } else {
            break;
        }
    }
    pos
}

/// Handle an at-rule starting at `pos`; returns the position after it.
fn parse_at_rule(css: &str, pos: usize, sheet: &mut Stylesheet) -> Result<usize, EpubError> {
    let rest = &css[pos..];
    let brace = rest.find('{');
    let semi = rest.find(';');

    // Statement at-rules such as @import or @charset end at ';'.
    if let Some(semi) = semi {
        if brace.map_or(true, |b| semi < b) {
            return Ok(pos + semi + 1);
        }
    }
    let Some(brace) = brace else {
        return Ok(css.len());
    };

    let block_start = pos + brace + 1;
    let block_end = matching_brace(css, block_start)
        .ok_or_else(|| EpubError::Css("Unclosed CSS at-rule block".into()))?;

    let keyword = rest[1..brace].trim().to_ascii_lowercase();
    if keyword == "font-face" {
        if let Some(face) = parse_font_face(&css[block_start..block_end]) {
            sheet.font_faces.push(face);
        }
    }
    Ok(block_end + 1)
}

/// Index of the `}` closing a block whose body starts at `start`.
fn matching_brace(css: &str, start: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, b) in css.as_bytes()[start..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_font_face(block: &str) -> Option<FontFaceRule> {
    let mut family = None;
    let mut weight = FontWeight::Normal;
    let mut style = FontStyle::Normal;
    let mut src = None;

    for (property, value) in declarations(block) {
        match property.as_str() {
            "font-family" => {
                let name = unquote(value);
                if !name.is_empty() {
                    family = Some(name.to_string());
                }
            }
            "font-weight" => weight = parse_font_weight(value).unwrap_or_default(),
            "font-style" => style = parse_font_style(value).unwrap_or_default(),
            "src" => src = preferred_font_src(value),
            _ => {}
        }
    }

    Some(FontFaceRule {
        family: family?,
        weight,
        style,
        src: src?,
    })
}

/// Pick the most usable `url(...)` in a `src` list, preferring TrueType/OpenType.
fn preferred_font_src(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let mut search_from = 0usize;
    let mut best: Option<(u8, String)> = None;

    while let Some(idx) = lower[search_from..].find("url(") {
        let start = search_from + idx + 4;
        let Some(end) = value[start..].find(')') else {
            break;
        };
        let raw = unquote(&value[start..start + end]);
        if !raw.is_empty() && !raw.starts_with("data:") {
            let rank = font_src_rank(raw);
            match &best {
                Some((best_rank, _)) if *best_rank >= rank => {}
                _ => best = Some((rank, raw.to_string())),
            }
        }
        search_from = start + end + 1;
    }

    best.map(|(_, src)| src)
}

fn font_src_rank(src: &str) -> u8 {
    let lower = src.to_ascii_lowercase();
    if lower.ends_with(".ttf") || lower.ends_with(".otf") {
        2
    } else {
        1
    }
}

fn unquote(value: &str) -> &str {
    value
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .trim()
}

/// Parse a single CSS selector, keeping only its last compound component.
fn parse_selector(s: &str) -> Option<CssSelector> {
    let s = s.trim();
    let last = s
        .rsplit(|c: char| c.is_ascii_whitespace() || c == '>' || c == '+' || c == '~')
        .find(|part| !part.is_empty())?;
    if last.contains(':') || last.contains('[') || last.contains('#') {
        return None;
    }

    if last == "*" {
        return Some(CssSelector::Any);
    }
    if let Some(class) = last.strip_prefix('.') {
        let class = class.split('.').next().unwrap_or_default();
        return (!class.is_empty()).then(|| CssSelector::Class(class.into()));
    }
    if let Some(dot_pos) = last.find('.') {
        let tag = &last[..dot_pos];
        let class = last[dot_pos + 1..].split('.').next().unwrap_or_default();
        if tag.is_empty() || class.is_empty() {
            return None;
        }
        return Some(CssSelector::TagClass(
            tag.to_ascii_lowercase(),
            class.into(),
        ));
    }
    Some(CssSelector::Tag(last.to_ascii_lowercase()))
}

fn declarations(block: &str) -> impl Iterator<Item = (String, &str)> {
    block.split(';').filter_map(|decl| {
        let decl = decl.trim();
        let colon = decl.find(':')?;
        let property = decl[..colon].trim().to_ascii_lowercase();
        let value = decl[colon + 1..].trim();
        let value = value
            .strip_suffix("!important")
            .map(str::trim)
            .unwrap_or(value);
        Some((property, value))
    })
}

/// Parse CSS declarations (the part inside `{ ... }`)
fn parse_declarations(block: &str) -> CssStyle {
    let mut style = CssStyle::new();

    for (property, value) in declarations(block) {
        match property.as_str() {
            "font-size" => style.font_size = parse_length(value),
            "font-family" => {
                let first = value.split(',').next().map(unquote).unwrap_or_default();
                if !first.is_empty() {
                    style.font_family = Some(first.into());
                }
            }
            "font-weight" => style.font_weight = parse_font_weight(value),
            "font-style" => style.font_style = parse_font_style(value),
            "text-align" => {
                style.text_align = match value.to_ascii_lowercase().as_str() {
                    "left" | "start" => Some(TextAlign::Left),
                    "center" => Some(TextAlign::Center),
                    "right" | "end" => Some(TextAlign::Right),
                    "justify" => Some(TextAlign::Justify),
                    _ => None,
                };
            }
            "line-height" => style.line_height = parse_line_height(value),
            "text-indent" => style.text_indent = parse_length(value),
            "margin-top" => style.margin_top = parse_px_value(value),
            "margin-bottom" => style.margin_bottom = parse_px_value(value),
            "margin" => {
                let parts: Vec<&str> = value.split_ascii_whitespace().collect();
                let (top, bottom) = match parts.as_slice() {
                    [all] => (*all, *all),
                    [vertical, _] => (*vertical, *vertical),
                    [top, _, bottom] | [top, _, bottom, _] => (*top, *bottom),
                    _ => continue,
                };
                style.margin_top = parse_px_value(top);
                style.margin_bottom = parse_px_value(bottom);
            }
            _ => {}
        }
    }

    style
}

fn parse_font_weight(value: &str) -> Option<FontWeight> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "bold" | "bolder" => Some(FontWeight::Bold),
        "normal" | "lighter" => Some(FontWeight::Normal),
        numeric => numeric.parse::<u16>().ok().map(|w| {
            if w >= 600 {
                FontWeight::Bold
            } else {
                FontWeight::Normal
            }
        }),
    }
}

fn parse_font_style(value: &str) -> Option<FontStyle> {
    match value.trim().to_ascii_lowercase().as_str() {
        "italic" | "oblique" => Some(FontStyle::Italic),
        "normal" => Some(FontStyle::Normal),
        _ => None,
    }
}

/// Parse a length value (px, em or %)
fn parse_length(value: &str) -> Option<FontSize> {
    let value = value.trim().to_ascii_lowercase();
    if let Some(px) = value.strip_suffix("px") {
        px.trim().parse::<f32>().ok().map(FontSize::Px)
    } else if let Some(em) = value.strip_suffix("em") {
        em.trim().parse::<f32>().ok().map(FontSize::Em)
    } else if let Some(pct) = value.strip_suffix('%') {
        pct.trim().parse::<f32>().ok().map(FontSize::Percent)
    } else if value == "0" {
        Some(FontSize::Px(0.0))
    } else {
        None
    }
}

/// Parse a line-height value (px or unitless multiplier)
fn parse_line_height(value: &str) -> Option<LineHeight> {
    let value = value.trim().to_ascii_lowercase();
    if let Some(px_str) = value.strip_suffix("px") {
        px_str.trim().parse::<f32>().ok().map(LineHeight::Px)
    } else if let Some(em_str) = value.strip_suffix("em") {
        em_str.trim().parse::<f32>().ok().map(LineHeight::Multiplier)
    } else if let Some(pct) = value.strip_suffix('%') {
        pct.trim()
            .parse::<f32>()
            .ok()
            .map(|p| LineHeight::Multiplier(p / 100.0))
    } else if value == "normal" {
        None
    } else {
        value.parse::<f32>().ok().map(LineHeight::Multiplier)
    }
}

/// Parse a pixel value (e.g., "10px" -> Some(10.0))
fn parse_px_value(value: &str) -> Option<f32> {
    let value = value.trim().to_ascii_lowercase();
    if let Some(px_str) = value.strip_suffix("px") {
        px_str.trim().parse::<f32>().ok()
    } else {
        value.parse::<f32>().ok()
    }
}
