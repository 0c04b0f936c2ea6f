//! Embedded font registry
//!
//! Holds the deobfuscated font programs pulled in by `@font-face` rules,
//! keyed by family and face style. The total size is capped; the first load
//! that would cross the cap trips a flag that stays set until the book is
//! closed, and every later load is refused.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::css::{FontStyle, FontWeight};
use crate::error::EpubError;

/// Default cumulative font budget in bytes.
pub const DEFAULT_FONT_BUDGET: usize = 800_000;

/// Face variant of a font family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaceStyle {
    /// Regular
    Normal,
    /// Bold
    Bold,
    /// Italic
    Italic,
    /// Bold italic
    BoldItalic,
}

impl FaceStyle {
    /// Face for a declared weight and style.
    pub fn from_css(weight: FontWeight, style: FontStyle) -> Self {
        match (weight, style) {
            (FontWeight::Bold, FontStyle::Italic) => FaceStyle::BoldItalic,
            (FontWeight::Bold, _) => FaceStyle::Bold,
            (_, FontStyle::Italic) => FaceStyle::Italic,
            _ => FaceStyle::Normal,
        }
    }
}

/// A font program ready for the rasterizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedFont {
    /// Family name as declared
    pub family: String,
    /// Face variant
    pub style: FaceStyle,
    /// Archive path it was read from
    pub path: String,
    /// Deobfuscated font bytes
    pub data: Vec<u8>,
}

/// Fonts loaded for the open book.
#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<LoadedFont>,
    total: usize,
    budget: usize,
    too_large: bool,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FONT_BUDGET)
    }
}

impl FontRegistry {
    /// Empty registry with the given byte budget.
    pub fn new(budget: usize) -> Self {
        Self {
            fonts: Vec::new(),
            total: 0,
            budget,
            too_large: false,
        }
    }

    /// Whether `family`/`style` is already registered.
    pub fn contains(&self, family: &str, style: FaceStyle) -> bool {
        self.get(family, style).is_some()
    }

    /// Registered font for `family`/`style`; family compares case-insensitively.
    pub fn get(&self, family: &str, style: FaceStyle) -> Option<&LoadedFont> {
        self.fonts
            .iter()
            .find(|f| f.style == style && f.family.eq_ignore_ascii_case(family))
    }

    /// Reserve room for a font of `size` bytes.
    ///
    /// Fails once the budget has been exceeded, and trips that state when
    /// `size` does not fit.
    pub fn admit(&mut self, size: usize) -> Result<(), EpubError> {
        if !self.too_large && self.total + size <= self.budget {
            return Ok(());
        }
        self.too_large = true;
        Err(EpubError::BudgetExceeded {
            used: self.total,
            requested: size,
            budget: self.budget,
        })
    }

    /// Register a font that was admitted.
    pub fn insert(&mut self, font: LoadedFont) {
        self.total += font.data.len();
        self.fonts.push(font);
    }

    /// Loaded fonts in load order.
    pub fn fonts(&self) -> &[LoadedFont] {
        &self.fonts
    }

    /// Bytes held.
    pub fn total_size(&self) -> usize {
        self.total
    }

    /// Whether the budget was exceeded during this session.
    pub fn too_large(&self) -> bool {
        self.too_large
    }
}
