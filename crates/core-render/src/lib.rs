//! Software compositing for the bar surface.
//!
//! A [`Surface`] is an owned RGBA pixmap the render pipeline draws into:
//! the background is painted with SRC semantics (replacing whatever was
//! there), everything else (border, decorations, glyphs) composites with
//! OVER. Backends pull the finished frame out in the `argb8888` byte order
//! their protocol wants via [`Surface::write_argb8888`].

use core_font::{Glyph, GlyphImage};
use tiny_skia::{
    BlendMode, Paint, Pixmap, PixmapPaint, PremultipliedColorU8, Rect, Transform,
};

mod color;

pub use color::Color;

pub struct Surface {
    pixmap: Pixmap,
}

impl Surface {
    /// Allocate a surface. Zero dimensions are clamped to 1 so a surface
    /// always exists; backends never commit such a frame.
    pub fn new(width: u32, height: u32) -> Self {
        let pixmap = Pixmap::new(width.max(1), height.max(1)).expect("non-zero dimensions");
        Self { pixmap }
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Reallocate when the backend's buffer size changed.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width() != width.max(1) || self.height() != height.max(1) {
            *self = Surface::new(width, height);
        }
    }

    /// Paint the whole surface with `color`, SRC operator.
    pub fn fill_all(&mut self, color: Color) {
        self.pixmap.fill(color.to_skia());
    }

    /// Fill a rectangle with `color`, OVER operator. Degenerate rectangles
    /// are ignored.
    pub fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: Color) {
        if width <= 0 || height <= 0 {
            return;
        }
        let Some(rect) = Rect::from_xywh(x as f32, y as f32, width as f32, height as f32) else {
            return;
        };

        let mut paint = Paint::default();
        paint.set_color(color.to_skia());
        paint.blend_mode = BlendMode::SourceOver;
        paint.anti_alias = false;

        self.pixmap
            .fill_rect(rect, &paint, Transform::identity(), None);
    }

    /// Composite a glyph with its baseline pen at `(pen_x, baseline)`.
    /// Alpha masks are tinted with `foreground`; BGRA images are drawn
    /// as-is. Empty images (missing/zero-width glyphs) do nothing.
    pub fn draw_glyph(&mut self, pen_x: i32, baseline: i32, glyph: &Glyph, foreground: Color) {
        let x = pen_x + glyph.x;
        let y = baseline - glyph.y;

        match &glyph.image {
            GlyphImage::Mask {
                width,
                height,
                data,
            } => {
                if *width == 0 || *height == 0 {
                    return;
                }
                if let Some(tinted) = tint_mask(*width, *height, data, foreground) {
                    self.draw_pixmap_over(x, y, &tinted);
                }
            }
            GlyphImage::Bgra {
                width,
                height,
                data,
            } => {
                if *width == 0 || *height == 0 {
                    return;
                }
                if let Some(image) = bgra_to_pixmap(*width, *height, data) {
                    self.draw_pixmap_over(x, y, &image);
                }
            }
        }
    }

    fn draw_pixmap_over(&mut self, x: i32, y: i32, src: &Pixmap) {
        let paint = PixmapPaint {
            blend_mode: BlendMode::SourceOver,
            ..PixmapPaint::default()
        };
        self.pixmap
            .draw_pixmap(x, y, src.as_ref(), &paint, Transform::identity(), None);
    }

    /// Copy the frame out in little-endian `argb8888` (B, G, R, A byte
    /// order), the format both the wayland SHM pool and the X11 pixmap
    /// expect. `out` must hold `width * height * 4` bytes.
    pub fn write_argb8888(&self, out: &mut [u8]) {
        let data = self.pixmap.data();
        assert!(out.len() >= data.len());
        for (src, dst) in data.chunks_exact(4).zip(out.chunks_exact_mut(4)) {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
            dst[3] = src[3];
        }
    }

    /// Premultiplied pixel at `(x, y)` as (r, g, b, a); test support.
    pub fn pixel(&self, x: u32, y: u32) -> Option<(u8, u8, u8, u8)> {
        let idx = (y.checked_mul(self.width())? + x) as usize * 4;
        let data = self.pixmap.data();
        if x >= self.width() || idx + 3 >= data.len() {
            return None;
        }
        Some((data[idx], data[idx + 1], data[idx + 2], data[idx + 3]))
    }
}

fn tint_mask(width: u32, height: u32, coverage: &[u8], color: Color) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(width, height)?;
    let pixels = pixmap.pixels_mut();
    for (px, &cov) in pixels.iter_mut().zip(coverage.iter()) {
        let alpha = (cov as u16 * color.a as u16 / 255) as u8;
        let r = (color.r as u16 * alpha as u16 / 255) as u8;
        let g = (color.g as u16 * alpha as u16 / 255) as u8;
        let b = (color.b as u16 * alpha as u16 / 255) as u8;
        *px = PremultipliedColorU8::from_rgba(r, g, b, alpha)
            .unwrap_or(PremultipliedColorU8::TRANSPARENT);
    }
    Some(pixmap)
}

fn bgra_to_pixmap(width: u32, height: u32, data: &[u8]) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(width, height)?;
    let pixels = pixmap.pixels_mut();
    for (px, src) in pixels.iter_mut().zip(data.chunks_exact(4)) {
        // BGRA -> RGBA, both premultiplied.
        *px = PremultipliedColorU8::from_rgba(src[2], src[1], src[0], src[3])
            .unwrap_or(PremultipliedColorU8::TRANSPARENT);
    }
    Some(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_all_replaces() {
        let mut surf = Surface::new(4, 2);
        surf.fill_all(Color::rgba(10, 20, 30, 255));
        assert_eq!(surf.pixel(0, 0), Some((10, 20, 30, 255)));
        assert_eq!(surf.pixel(3, 1), Some((10, 20, 30, 255)));
    }

    #[test]
    fn fill_rect_is_clipped_and_over() {
        let mut surf = Surface::new(4, 4);
        surf.fill_all(Color::rgba(0, 0, 0, 255));
        surf.fill_rect(2, 2, 10, 10, Color::rgba(255, 0, 0, 255));
        assert_eq!(surf.pixel(1, 1), Some((0, 0, 0, 255)));
        assert_eq!(surf.pixel(3, 3), Some((255, 0, 0, 255)));
    }

    #[test]
    fn degenerate_rect_is_ignored() {
        let mut surf = Surface::new(4, 4);
        surf.fill_rect(0, 0, 0, 4, Color::rgba(255, 0, 0, 255));
        surf.fill_rect(0, 0, -3, 4, Color::rgba(255, 0, 0, 255));
        assert_eq!(surf.pixel(0, 0), Some((0, 0, 0, 0)));
    }

    #[test]
    fn mask_glyph_is_tinted() {
        let mut surf = Surface::new(2, 2);
        let glyph = Glyph {
            image: GlyphImage::Mask {
                width: 1,
                height: 1,
                data: vec![255],
            },
            x: 0,
            y: 1,
            advance: 1,
        };
        surf.draw_glyph(0, 1, &glyph, Color::rgba(0, 255, 0, 255));
        assert_eq!(surf.pixel(0, 0), Some((0, 255, 0, 255)));
    }

    #[test]
    fn empty_glyph_draws_nothing() {
        let mut surf = Surface::new(2, 2);
        let glyph = Glyph {
            image: GlyphImage::empty(),
            x: 0,
            y: 0,
            advance: 8,
        };
        surf.draw_glyph(0, 1, &glyph, Color::rgba(255, 255, 255, 255));
        assert_eq!(surf.pixel(0, 0), Some((0, 0, 0, 0)));
    }

    #[test]
    fn argb8888_byte_order() {
        let mut surf = Surface::new(1, 1);
        surf.fill_all(Color::rgba(1, 2, 3, 255));
        let mut out = [0u8; 4];
        surf.write_argb8888(&mut out);
        assert_eq!(out, [3, 2, 1, 255]);
    }

    #[test]
    fn resize_reallocates_only_on_change() {
        let mut surf = Surface::new(4, 4);
        surf.fill_all(Color::rgba(9, 9, 9, 255));
        surf.resize(4, 4);
        assert_eq!(surf.pixel(0, 0), Some((9, 9, 9, 255)));
        surf.resize(8, 4);
        assert_eq!(surf.width(), 8);
        assert_eq!(surf.pixel(0, 0), Some((0, 0, 0, 0)));
    }
}
