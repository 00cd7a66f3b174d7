//! Certificate renderer – copies the template, draws one name on it and
//! encodes the result as PNG.
//!
//! Text goes through `rustybuzz` for shaping, `ttf-parser` for glyph outlines
//! and `tiny-skia` for anti-aliased filling.

use std::io::Cursor;

use image::{ImageFormat, RgbaImage};
use tiny_skia::{FillRule, Mask, PathBuilder, Transform};

use crate::error::{BatchError, BatchResult};
use crate::fonts::ResolvedFont;
use crate::settings::RenderSettings;
use crate::template::Template;

/// Fill colour of the name (`#222`).
pub const TEXT_COLOR: [u8; 4] = [0x22, 0x22, 0x22, 0xff];

/// Extension of every rendered entry.
pub const CERTIFICATE_EXTENSION: &str = "png";

/// Renders names onto one template with one set of settings.
///
/// Holds only shared references; [`CertificateRenderer::render`] is a pure
/// function of the template, the settings, the font and the name.
pub struct CertificateRenderer<'a> {
    template: &'a Template,
    settings: &'a RenderSettings,
    font: Option<rustybuzz::Face<'a>>,
    ascender: f32,
}

impl<'a> CertificateRenderer<'a> {
    /// `font` may be `None` when no face is installed at all; certificates are
    /// then the bare template.
    pub fn new(
        template: &'a Template,
        settings: &'a RenderSettings,
        font: Option<&'a ResolvedFont>,
    ) -> Self {
        let ascender = font
            .map(|f| f.ascender_px(settings.font_size))
            .unwrap_or(settings.font_size * 0.75);
        let face = font.and_then(|f| {
            let face = f.face();
            if face.is_none() {
                log::warn!("font {:?} could not be parsed for shaping", f.family);
            }
            face
        });
        Self {
            template,
            settings,
            font: face,
            ascender,
        }
    }

    /// Produce the PNG bytes of one certificate.
    ///
    /// Only pixels covered by the glyphs change; the rest of the template is
    /// copied as is, alpha included.
    pub fn render(&self, name: &str) -> BatchResult<Vec<u8>> {
        let mut image = self.template.image().clone();

        if let Some(face) = &self.font {
            let top = self.settings.text_top();
            let baseline = top + self.ascender;
            if let Some(path) = text_path(face, name, self.settings.font_size, self.settings.x, baseline)
            {
                let mut mask = Mask::new(image.width(), image.height())
                    .ok_or_else(|| BatchError::internal("failed to create text mask"))?;
                mask.fill_path(&path, FillRule::Winding, true, Transform::identity());
                for (px, &coverage) in image.pixels_mut().zip(mask.data()) {
                    if coverage > 0 {
                        px.0 = blend_text(px.0, coverage);
                    }
                }

                let bounds = path.bounds();
                if bounds.right() > image.width() as f32 || bounds.bottom() > image.height() as f32 {
                    log::debug!("name {name:?} overflows the template, drawn anyway");
                }
            }
        }

        encode_png(&image)
    }
}

/// Build one path with every shaped glyph of `text`.
///
/// Returns `None` for text without any visible outline (e.g. only spaces).
fn text_path(
    face: &rustybuzz::Face<'_>,
    text: &str,
    font_size: f32,
    x: f32,
    baseline: f32,
) -> Option<tiny_skia::Path> {
    let mut buffer = rustybuzz::UnicodeBuffer::new();
    buffer.push_str(text);
    buffer.guess_segment_properties();
    let glyphs = rustybuzz::shape(face, &[], buffer);

    let scale = font_size / face.units_per_em() as f32;
    let mut builder = PathBuilder::new();
    let mut pen_x = x;
    let mut pen_y = baseline;

    for (info, pos) in glyphs.glyph_infos().iter().zip(glyphs.glyph_positions()) {
        let mut pen = GlyphPen {
            builder: &mut builder,
            origin_x: pen_x + pos.x_offset as f32 * scale,
            origin_y: pen_y - pos.y_offset as f32 * scale,
            scale,
        };
        face.outline_glyph(ttf_parser::GlyphId(info.glyph_id as u16), &mut pen);
        pen_x += pos.x_advance as f32 * scale;
        pen_y -= pos.y_advance as f32 * scale;
    }

    builder.finish()
}

/// Adapts font-unit outlines (y up) to pixel space (y down).
struct GlyphPen<'b> {
    builder: &'b mut PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPen<'_> {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl ttf_parser::OutlineBuilder for GlyphPen<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

/// Source-over of [`TEXT_COLOR`] at `coverage` onto a straight-alpha pixel.
fn blend_text(dst: [u8; 4], coverage: u8) -> [u8; 4] {
    let src_a = coverage as f32 / 255.0 * TEXT_COLOR[3] as f32 / 255.0;
    let dst_a = dst[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return dst;
    }

    let mut out = [0u8; 4];
    for i in 0..3 {
        let c = (TEXT_COLOR[i] as f32 * src_a + dst[i] as f32 * dst_a * (1.0 - src_a)) / out_a;
        out[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    out
}

fn encode_png(image: &RgbaImage) -> BatchResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| BatchError::internal(format!("PNG encode error: {e}")))?;
    Ok(out.into_inner())
}
