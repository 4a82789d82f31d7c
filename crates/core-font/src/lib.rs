//! The font contract the rendering pipeline consumes.
//!
//! Rasterisation itself is an external collaborator: the bar only needs
//! metrics (ascent/descent), per-codepoint glyphs, optional kerning, and,
//! where the provider supports it, whole-run shaping. Glyph images come in
//! two forms, mirroring what rasterisers actually hand back: an alpha mask
//! to be tinted with the foreground color, or a pre-multiplied BGRA image
//! (color emoji) composited as-is.
//!
//! [`FixedFont`] is the deterministic, raster-free implementation used by
//! tests and headless runs: every glyph is an empty image whose advance is
//! the Unicode display width times a configurable cell width. Layout and
//! hit-testing become exact arithmetic over it.

use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

/// A glyph image, positioned relative to the baseline via `x`/`y` bearings.
#[derive(Debug, Clone)]
pub struct Glyph {
    pub image: GlyphImage,
    /// Horizontal bearing: left edge of the image relative to the pen.
    pub x: i32,
    /// Vertical bearing: top edge of the image above the baseline.
    pub y: i32,
    /// Pen advance after this glyph.
    pub advance: i32,
}

#[derive(Debug, Clone)]
pub enum GlyphImage {
    /// 8-bit coverage, row-major, `width * height` bytes. Tinted with the
    /// particle foreground at composite time.
    Mask {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    /// Pre-multiplied BGRA, row-major, `4 * width * height` bytes.
    Bgra {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
}

impl GlyphImage {
    pub fn empty() -> Self {
        GlyphImage::Mask {
            width: 0,
            height: 0,
            data: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            GlyphImage::Mask { width, .. } | GlyphImage::Bgra { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            GlyphImage::Mask { height, .. } | GlyphImage::Bgra { height, .. } => *height,
        }
    }
}

/// A shaped sequence of glyphs for a whole string.
#[derive(Debug, Clone, Default)]
pub struct ShapedRun {
    pub glyphs: Vec<Glyph>,
}

impl ShapedRun {
    pub fn advance(&self) -> i32 {
        self.glyphs.iter().map(|g| g.advance).sum()
    }
}

/// Whether a string particle asks the font for whole-run shaping or walks
/// grapheme clusters itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shaping {
    #[default]
    Full,
    None,
}

/// An opaque font with metrics and rasterisation entry points.
pub trait Font: Send + Sync {
    /// Pixels above the baseline.
    fn ascent(&self) -> i32;
    /// Pixels below the baseline. May be negative for fonts that report a
    /// baseline-relative descent; consumers must tolerate that.
    fn descent(&self) -> i32;

    /// Rasterise a single codepoint. `None` means the glyph is missing and
    /// is drawn as zero width.
    fn rasterize(&self, ch: char) -> Option<Glyph>;

    /// Kerning adjustment between two codepoints, in pixels.
    fn kerning(&self, _left: char, _right: char) -> i32 {
        0
    }

    /// Shape a whole string, where the provider supports it. `None` makes
    /// the caller fall back to per-cluster rasterisation.
    fn rasterize_run(&self, _text: &str) -> Option<ShapedRun> {
        None
    }
}

pub type FontHandle = Arc<dyn Font>;

/// Resolves a configuration font spec (e.g. `"Dina:pixelsize=9"`) to a
/// loaded font. The actual resolver is supplied by the embedding binary.
pub trait FontProvider: Send + Sync {
    fn load(&self, spec: &str) -> anyhow::Result<FontHandle>;
}

/// Fixed-metrics font: no raster output, exact arithmetic advances.
#[derive(Debug, Clone)]
pub struct FixedFont {
    cell_width: i32,
    ascent: i32,
    descent: i32,
}

impl FixedFont {
    pub fn new(cell_width: i32, ascent: i32, descent: i32) -> Self {
        Self {
            cell_width,
            ascent,
            descent,
        }
    }

    /// 8px cell, 12/4 vertical metrics; the conventional test instance.
    pub fn standard() -> FontHandle {
        Arc::new(Self::new(8, 12, 4))
    }

    fn advance_of(&self, cluster: &str) -> i32 {
        self.cell_width * cluster.width() as i32
    }
}

impl Font for FixedFont {
    fn ascent(&self) -> i32 {
        self.ascent
    }

    fn descent(&self) -> i32 {
        self.descent
    }

    fn rasterize(&self, ch: char) -> Option<Glyph> {
        let mut buf = [0u8; 4];
        let advance = self.advance_of(ch.encode_utf8(&mut buf));
        Some(Glyph {
            image: GlyphImage::empty(),
            x: 0,
            y: 0,
            advance,
        })
    }

    fn rasterize_run(&self, text: &str) -> Option<ShapedRun> {
        let glyphs = text
            .graphemes(true)
            .map(|cluster| Glyph {
                image: GlyphImage::empty(),
                x: 0,
                y: 0,
                advance: self.advance_of(cluster),
            })
            .collect();
        Some(ShapedRun { glyphs })
    }
}

/// Provider that hands out one [`FixedFont`] regardless of spec. Used by
/// tests and by headless runs where no rasteriser is wired in.
pub struct FixedFontProvider {
    font: FontHandle,
}

impl Default for FixedFontProvider {
    fn default() -> Self {
        Self {
            font: FixedFont::standard(),
        }
    }
}

impl FontProvider for FixedFontProvider {
    fn load(&self, _spec: &str) -> anyhow::Result<FontHandle> {
        Ok(self.font.clone())
    }
}
