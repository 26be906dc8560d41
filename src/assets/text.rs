//! Text rasterization behind the decoder's measure-then-render contract.
//!
//! The default rasterizer shapes with cosmic-text and paints glyph coverage
//! with its swash cache. The font database is loaded lazily on first use so
//! constructing a gatherer never blocks on a system font scan.

use super::decode::{DecodeError, PixelBuffer, TextStyle};
use cosmic_text::{Attrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, SwashCache};
use log::{debug, info};

/// Line height as a multiple of the font size.
const LINE_HEIGHT_FACTOR: f32 = 1.2;

pub trait TextRasterizer: Send {
    /// Pixel extents of `text` laid out without width or height constraints.
    fn measure(&mut self, style: &TextStyle, text: &str) -> Result<(u32, u32), DecodeError>;

    /// Paints `text` at the canvas origin. The canvas is already cleared and
    /// sized to the extents `measure` returned.
    fn paint(
        &mut self,
        style: &TextStyle,
        text: &str,
        canvas: &mut PixelBuffer,
    ) -> Result<(), DecodeError>;
}

/// Maps generic family names onto fontdb's generic families.
pub fn family_for(name: &str) -> Family<'_> {
    match name.trim().to_ascii_lowercase().as_str() {
        "sans" | "sans-serif" | "sans serif" => Family::SansSerif,
        "serif" => Family::Serif,
        "mono" | "monospace" => Family::Monospace,
        "cursive" => Family::Cursive,
        "fantasy" => Family::Fantasy,
        _ => Family::Name(name),
    }
}

struct Fonts {
    system: FontSystem,
    swash: SwashCache,
}

#[derive(Default)]
pub struct CosmicText {
    fonts: Option<Fonts>,
}

impl CosmicText {
    pub fn new() -> Self {
        Self::default()
    }

    fn fonts(&mut self) -> &mut Fonts {
        self.fonts.get_or_insert_with(|| {
            let system = FontSystem::new();
            info!(
                "Font database loaded: {} faces.",
                system.db().faces().count()
            );
            Fonts {
                system,
                swash: SwashCache::new(),
            }
        })
    }

    /// Number of faces in the font database, loading it if needed.
    pub fn face_count(&mut self) -> usize {
        self.fonts().system.db().faces().count()
    }

    fn layout(system: &mut FontSystem, style: &TextStyle, text: &str) -> (Buffer, Metrics) {
        let metrics = Metrics::new(style.font_size, style.font_size * LINE_HEIGHT_FACTOR);
        let mut buffer = Buffer::new(system, metrics);
        buffer.set_size(system, None, None);
        let attrs = Attrs::new().family(family_for(&style.font_family));
        buffer.set_text(system, text, attrs, Shaping::Advanced);
        buffer.shape_until_scroll(system, false);
        (buffer, metrics)
    }
}

impl TextRasterizer for CosmicText {
    fn measure(&mut self, style: &TextStyle, text: &str) -> Result<(u32, u32), DecodeError> {
        let fonts = self.fonts();
        let (buffer, metrics) = Self::layout(&mut fonts.system, style, text);

        let mut width = 0.0f32;
        let mut height = 0.0f32;
        for run in buffer.layout_runs() {
            width = width.max(run.line_w);
            height = height.max(run.line_top + metrics.line_height);
        }
        let extents = (width.ceil() as u32, height.ceil() as u32);
        debug!(
            "Measured {:?} in '{}' {}px: {}x{}",
            text, style.font_family, style.font_size, extents.0, extents.1
        );
        Ok(extents)
    }

    fn paint(
        &mut self,
        style: &TextStyle,
        text: &str,
        canvas: &mut PixelBuffer,
    ) -> Result<(), DecodeError> {
        let fonts = self.fonts();
        let (buffer, _) = Self::layout(&mut fonts.system, style, text);

        let [r, g, b, a] = style.rgba8();
        buffer.draw(
            &mut fonts.system,
            &mut fonts.swash,
            Color::rgba(r, g, b, a),
            |x, y, w, h, color| {
                canvas.blend_rect(x, y, w, h, [color.r(), color.g(), color.b(), color.a()]);
            },
        );
        Ok(())
    }
}
