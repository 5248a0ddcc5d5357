//! Date label painting.
//!
//! The label is a translucent box in the bottom-left corner with the date
//! text on top. Sizes are given at a reference resolution and scaled to the
//! recording resolution so the label keeps the same visual weight at any
//! export size.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use image::{Rgba, RgbaImage};
use maplapse_common::{LabelDefaults, MaplapseError, MaplapseResult};

/// Greyscale coverage of a rendered line of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageMask {
    pub width: u32,
    pub height: u32,
    /// Row-major, one byte per pixel, 255 = fully covered.
    pub coverage: Vec<u8>,
}

impl CoverageMask {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            coverage: Vec::new(),
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.coverage[(y * self.width + x) as usize]
    }
}

/// Text measuring and rasterization.
pub trait LabelFont: Send + Sync {
    /// `(width, height)` of `text` at `px`, in pixels.
    fn measure(&self, text: &str, px: f32) -> (u32, u32);

    /// Rasterize `text` into a mask of exactly `size`, clipping glyphs that
    /// fall outside it.
    fn rasterize(&self, text: &str, px: f32, size: (u32, u32)) -> CoverageMask;
}

type GlyphKey = fontdue::layout::GlyphRasterConfig;

/// Layout scratch space and rasterized glyphs, reused across labels.
struct GlyphCache {
    layout: fontdue::layout::Layout,
    bitmaps: HashMap<GlyphKey, Vec<u8>>,
}

/// [`LabelFont`] backed by a TTF/OTF file.
pub struct FontdueLabelFont {
    font: fontdue::Font,
    cache: Mutex<GlyphCache>,
}

impl FontdueLabelFont {
    pub fn from_bytes(bytes: Vec<u8>) -> MaplapseResult<Self> {
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|e| MaplapseError::render(format!("failed to parse font: {e}")))?;
        let layout =
            fontdue::layout::Layout::new(fontdue::layout::CoordinateSystem::PositiveYDown);
        Ok(Self {
            font,
            cache: Mutex::new(GlyphCache {
                layout,
                bitmaps: HashMap::new(),
            }),
        })
    }

    pub fn load(path: &Path) -> MaplapseResult<Self> {
        if !path.exists() {
            return Err(MaplapseError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }
}

fn lay_out(layout: &mut fontdue::layout::Layout, font: &fontdue::Font, text: &str, px: f32) {
    use fontdue::layout::{LayoutSettings, TextStyle};
    layout.reset(&LayoutSettings::default());
    layout.append(&[font], &TextStyle::new(text, px, 0));
}

impl LabelFont for FontdueLabelFont {
    fn measure(&self, text: &str, px: f32) -> (u32, u32) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        lay_out(&mut cache.layout, &self.font, text, px);
        let width = cache
            .layout
            .glyphs()
            .iter()
            .map(|g| g.x + g.width as f32)
            .fold(0.0f32, f32::max);
        (width.ceil() as u32, cache.layout.height().ceil() as u32)
    }

    fn rasterize(&self, text: &str, px: f32, (width, height): (u32, u32)) -> CoverageMask {
        if width == 0 || height == 0 {
            return CoverageMask::empty();
        }
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let GlyphCache { layout, bitmaps } = &mut *cache;
        lay_out(layout, &self.font, text, px);

        let mut coverage = vec![0u8; (width * height) as usize];
        for glyph in layout.glyphs() {
            if glyph.width == 0 || glyph.height == 0 {
                continue;
            }
            let bitmap = bitmaps
                .entry(glyph.key)
                .or_insert_with(|| self.font.rasterize_config(glyph.key).1);
            let gx = glyph.x.round() as i64;
            let gy = glyph.y.round() as i64;
            for row in 0..glyph.height {
                for col in 0..glyph.width {
                    let x = gx + col as i64;
                    let y = gy + row as i64;
                    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                        continue;
                    }
                    let dst = &mut coverage[(y as u32 * width + x as u32) as usize];
                    *dst = (*dst).max(bitmap[row * glyph.width + col]);
                }
            }
        }
        CoverageMask {
            width,
            height,
            coverage,
        }
    }
}

/// Label geometry and colours.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStyle {
    pub font_px: f32,
    pub padding_px: f32,
    pub margin_px: f32,
    pub text_color: Rgba<u8>,
    pub background: Rgba<u8>,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self::from_defaults(&LabelDefaults::default())
    }
}

impl LabelStyle {
    pub fn from_defaults(defaults: &LabelDefaults) -> Self {
        Self {
            font_px: defaults.font_px,
            padding_px: defaults.padding_px,
            margin_px: defaults.margin_px,
            text_color: Rgba([255, 255, 255, 255]),
            background: Rgba([0, 0, 0, 160]),
        }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            font_px: self.font_px * factor,
            padding_px: self.padding_px * factor,
            margin_px: self.margin_px * factor,
            ..self.clone()
        }
    }
}

/// `min(width / reference_width, height / reference_height)`.
pub fn label_scale(width: u32, height: u32, reference_width: u32, reference_height: u32) -> f32 {
    let sx = width as f32 / reference_width.max(1) as f32;
    let sy = height as f32 / reference_height.max(1) as f32;
    sx.min(sy)
}

/// Draws date labels onto frames using a cached text size.
pub struct LabelPainter {
    font: Option<Arc<dyn LabelFont>>,
    style: LabelStyle,
    text_size: Option<(u32, u32)>,
    warned_missing_font: bool,
}

impl LabelPainter {
    /// `style` must already be scaled to the recording resolution.
    pub fn new(font: Option<Arc<dyn LabelFont>>, style: LabelStyle) -> Self {
        Self {
            font,
            style,
            text_size: None,
            warned_missing_font: false,
        }
    }

    pub fn style(&self) -> &LabelStyle {
        &self.style
    }

    /// Text size measured from the first label drawn.
    pub fn cached_text_size(&self) -> Option<(u32, u32)> {
        self.text_size
    }

    /// Paint `text` onto `frame`. Without a font this is a no-op.
    pub fn draw(&mut self, frame: &mut RgbaImage, text: &str) {
        let Some(font) = self.font.as_ref() else {
            if !self.warned_missing_font {
                tracing::warn!("No label font available; date labels are disabled");
                self.warned_missing_font = true;
            }
            return;
        };

        // Date strings are close to constant width, so one measurement serves every frame.
        let (text_w, text_h) = *self
            .text_size
            .get_or_insert_with(|| font.measure(text, self.style.font_px));
        let mask = font.rasterize(text, self.style.font_px, (text_w, text_h));

        let pad = self.style.padding_px.round() as i64;
        let margin = self.style.margin_px.round() as i64;
        let box_w = text_w as i64 + 2 * pad;
        let box_h = text_h as i64 + 2 * pad;
        let box_x = margin;
        let box_y = frame.height() as i64 - margin - box_h;

        fill_rect(frame, box_x, box_y, box_w, box_h, self.style.background);
        blend_mask(
            frame,
            &mask,
            box_x + pad,
            box_y + pad,
            text_w,
            text_h,
            self.style.text_color,
        );
    }
}

/// Source-over blend of `src` scaled by `coverage` onto `dst`.
pub fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, coverage: u8) {
    let alpha = src[3] as u32 * coverage as u32 / 255;
    if alpha == 0 {
        return;
    }
    let inv = 255 - alpha;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * alpha + dst[c] as u32 * inv + 127) / 255) as u8;
    }
    dst[3] = (alpha + dst[3] as u32 * inv / 255).min(255) as u8;
}

fn fill_rect(frame: &mut RgbaImage, x: i64, y: i64, w: i64, h: i64, color: Rgba<u8>) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w).min(frame.width() as i64);
    let y1 = (y + h).min(frame.height() as i64);
    for py in y0..y1 {
        for px in x0..x1 {
            blend_pixel(frame.get_pixel_mut(px as u32, py as u32), color, 255);
        }
    }
}

/// Blend `mask`, clipped to `clip_w` x `clip_h`, at `(x, y)`.
fn blend_mask(
    frame: &mut RgbaImage,
    mask: &CoverageMask,
    x: i64,
    y: i64,
    clip_w: u32,
    clip_h: u32,
    color: Rgba<u8>,
) {
    for my in 0..mask.height.min(clip_h) {
        let py = y + my as i64;
        if py < 0 || py >= frame.height() as i64 {
            continue;
        }
        for mx in 0..mask.width.min(clip_w) {
            let px = x + mx as i64;
            if px < 0 || px >= frame.width() as i64 {
                continue;
            }
            let coverage = mask.get(mx, my);
            if coverage > 0 {
                blend_pixel(frame.get_pixel_mut(px as u32, py as u32), color, coverage);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_fonts {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{CoverageMask, LabelFont};

    /// Every character is a solid `px/2` x `px` block.
    pub struct BlockFont;

    impl LabelFont for BlockFont {
        fn measure(&self, text: &str, px: f32) -> (u32, u32) {
            ((text.chars().count() as f32 * px / 2.0) as u32, px as u32)
        }

        fn rasterize(&self, text: &str, px: f32, (width, height): (u32, u32)) -> CoverageMask {
            let (text_w, text_h) = self.measure(text, px);
            let mut coverage = vec![0; (width * height) as usize];
            for y in 0..height.min(text_h) {
                for x in 0..width.min(text_w) {
                    coverage[(y * width + x) as usize] = 255;
                }
            }
            CoverageMask {
                width,
                height,
                coverage,
            }
        }
    }

    /// [`BlockFont`] that counts calls.
    #[derive(Default)]
    pub struct CountingFont {
        pub measures: AtomicUsize,
        pub rasterizes: AtomicUsize,
    }

    impl LabelFont for CountingFont {
        fn measure(&self, text: &str, px: f32) -> (u32, u32) {
            self.measures.fetch_add(1, Ordering::SeqCst);
            BlockFont.measure(text, px)
        }

        fn rasterize(&self, text: &str, px: f32, size: (u32, u32)) -> CoverageMask {
            self.rasterizes.fetch_add(1, Ordering::SeqCst);
            BlockFont.rasterize(text, px, size)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::test_fonts::{BlockFont, CountingFont};
    use super::*;

    #[test]
    fn test_label_scale_uses_smaller_axis() {
        assert_eq!(label_scale(1920, 1080, 1920, 1080), 1.0);
        assert_eq!(label_scale(960, 540, 1920, 1080), 0.5);
        // Tall export: width is the limiting axis.
        assert_eq!(label_scale(960, 1080, 1920, 1080), 0.5);
    }

    #[test]
    fn test_blend_opaque_and_transparent() {
        let mut px = Rgba([10, 20, 30, 255]);
        blend_pixel(&mut px, Rgba([200, 100, 50, 255]), 255);
        assert_eq!(px, Rgba([200, 100, 50, 255]));
        let mut px = Rgba([10, 20, 30, 255]);
        blend_pixel(&mut px, Rgba([200, 100, 50, 255]), 0);
        assert_eq!(px, Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_draw_places_label_bottom_left() {
        let style = LabelStyle {
            font_px: 10.0,
            padding_px: 2.0,
            margin_px: 4.0,
            text_color: Rgba([255, 0, 0, 255]),
            background: Rgba([0, 0, 255, 255]),
        };
        let mut painter = LabelPainter::new(Some(Arc::new(BlockFont)), style);
        let mut frame = RgbaImage::from_pixel(100, 50, Rgba([0, 255, 0, 255]));
        painter.draw(&mut frame, "ab");

        // Background 14x14 at (4, 32); text block 10x10 at (6, 34).
        assert_eq!(*frame.get_pixel(6, 34), Rgba([255, 0, 0, 255]));
        assert_eq!(*frame.get_pixel(15, 43), Rgba([255, 0, 0, 255]));
        assert_eq!(*frame.get_pixel(4, 32), Rgba([0, 0, 255, 255]));
        assert_eq!(*frame.get_pixel(17, 45), Rgba([0, 0, 255, 255]));
        assert_eq!(*frame.get_pixel(18, 45), Rgba([0, 255, 0, 255]));
        assert_eq!(*frame.get_pixel(50, 10), Rgba([0, 255, 0, 255]));
        assert_eq!(painter.cached_text_size(), Some((10, 10)));
    }

    #[test]
    fn test_measurement_is_cached() {
        let mut painter = LabelPainter::new(Some(Arc::new(BlockFont)), LabelStyle::default());
        let mut frame = RgbaImage::new(400, 200);
        painter.draw(&mut frame, "1 AD");
        let first = painter.cached_text_size();
        painter.draw(&mut frame, "12 March 1453");
        assert_eq!(painter.cached_text_size(), first);
    }

    #[test]
    fn test_font_is_measured_once_per_painter() {
        let font = Arc::new(CountingFont::default());
        let mut painter = LabelPainter::new(Some(font.clone()), LabelStyle::default());
        let mut frame = RgbaImage::new(640, 200);
        for year in 1000..1024 {
            painter.draw(&mut frame, &format!("1 January {year}"));
        }
        assert_eq!(font.measures.load(Ordering::SeqCst), 1);
        assert_eq!(font.rasterizes.load(Ordering::SeqCst), 24);
    }

    #[test]
    fn test_longer_text_is_clipped_to_cached_size() {
        let style = LabelStyle {
            font_px: 10.0,
            padding_px: 0.0,
            margin_px: 0.0,
            text_color: Rgba([255, 0, 0, 255]),
            background: Rgba([0, 0, 0, 0]),
        };
        let mut painter = LabelPainter::new(Some(Arc::new(BlockFont)), style);
        let mut frame = RgbaImage::from_pixel(100, 20, Rgba([0, 255, 0, 255]));
        painter.draw(&mut frame, "ab");
        painter.draw(&mut frame, "abcdef");
        // Cached 10x10; characters past the second stay unpainted.
        assert_eq!(*frame.get_pixel(9, 10), Rgba([255, 0, 0, 255]));
        assert_eq!(*frame.get_pixel(10, 10), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn test_no_font_leaves_frame_untouched() {
        let mut painter = LabelPainter::new(None, LabelStyle::default());
        let mut frame = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]));
        let before = frame.clone();
        painter.draw(&mut frame, "x");
        painter.draw(&mut frame, "y");
        assert_eq!(frame, before);
    }

    #[test]
    fn test_style_scaling() {
        let style = LabelStyle::default().scaled(0.5);
        assert_eq!(style.font_px, 24.0);
        assert_eq!(style.padding_px, 8.0);
        assert_eq!(style.margin_px, 12.0);
    }

    #[test]
    fn test_missing_font_file() {
        assert!(FontdueLabelFont::load(Path::new("/nonexistent/font.ttf")).is_err());
    }
}
