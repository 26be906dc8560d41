use super::request::{PreloadRequest, PropertyBag, PropertyError, TargetKind};
use super::text::TextRasterizer;
use image::{DynamicImage, ImageFormat, ImageReader};
use log::{trace, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

// --- Pixel Buffers ---

/// Byte layout of a decoded buffer.
///
/// `Bgra8` is the little-endian ARGB32 layout a software rasterizer produces;
/// the uploader swaps red and blue back when sampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra8,
    Rgb32F,
}

impl PixelFormat {
    #[inline(always)]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra8 => 4,
            Self::Rgb32F => 12,
        }
    }
}

/// Owned, tightly packed pixel data. Released when dropped, which happens
/// right after the uploader has copied it to the GPU.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    format: PixelFormat,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// A fully transparent `Bgra8` canvas.
    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            format: PixelFormat::Bgra8,
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    #[inline(always)]
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    #[inline(always)]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[inline(always)]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// BGRA bytes of one pixel, `None` outside the canvas or for float buffers.
    pub fn pixel_bgra(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if self.format != PixelFormat::Bgra8 || x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.data.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Source-over blend of a straight-alpha RGBA color into a clipped rect.
    pub fn blend_rect(&mut self, x: i32, y: i32, w: u32, h: u32, rgba: [u8; 4]) {
        if self.format != PixelFormat::Bgra8 || rgba[3] == 0 {
            return;
        }
        let x0 = x.max(0) as i64;
        let y0 = y.max(0) as i64;
        let x1 = (i64::from(x) + i64::from(w)).min(i64::from(self.width));
        let y1 = (i64::from(y) + i64::from(h)).min(i64::from(self.height));
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let [r, g, b, a] = rgba.map(u32::from);
        let inv = 255 - a;
        let stride = self.width as usize * 4;
        for py in y0 as usize..y1 as usize {
            let row = &mut self.data[py * stride..(py + 1) * stride];
            for px in row[x0 as usize * 4..x1 as usize * 4].chunks_exact_mut(4) {
                let dst_a = u32::from(px[3]);
                let out_a = a + (dst_a * inv + 127) / 255;
                if out_a == 0 {
                    continue;
                }
                let mix = |src: u32, dst: u8| -> u8 {
                    let num = src * a * 255 + u32::from(dst) * dst_a * inv;
                    ((num + out_a * 255 / 2) / (out_a * 255)).min(255) as u8
                };
                px[0] = mix(b, px[0]);
                px[1] = mix(g, px[1]);
                px[2] = mix(r, px[2]);
                px[3] = out_a.min(255) as u8;
            }
        }
    }
}

/// A decoded buffer waiting for `apply`.
#[derive(Debug)]
pub struct PreloadTarget {
    pub id: String,
    pub kind: TargetKind,
    pub buffer: PixelBuffer,
}

impl PreloadTarget {
    #[inline(always)]
    pub const fn size(&self) -> (u32, u32) {
        (self.buffer.width(), self.buffer.height())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to decode image '{}': {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error("font size must be positive, got {0}")]
    FontSize(i64),
    #[error("text layout for {0:?} has no visible extent")]
    EmptyLayout(String),
    #[error("text layout of {width}x{height} exceeds the {max}px canvas limit", max = MAX_CANVAS_EXTENT)]
    TooLarge { width: u32, height: u32 },
    #[error("unsupported preload kind {0:?}")]
    Unsupported(TargetKind),
}

// --- Image Path ---

fn open_image_fallback(path: &Path) -> image::ImageResult<DynamicImage> {
    let hint = ImageFormat::from_path(path).ok();
    if let Some(fmt) = hint {
        let mut reader = ImageReader::open(path).map_err(image::ImageError::IoError)?;
        reader.set_format(fmt);
        if let Ok(img) = reader.decode() {
            return Ok(img);
        }
    }

    let guessed = ImageReader::open(path)
        .map_err(image::ImageError::IoError)?
        .with_guessed_format()?;
    if let (Some(hint_fmt), Some(real_fmt)) = (hint, guessed.format())
        && hint_fmt != real_fmt
    {
        warn!(
            "Image file '{}' is really {:?}",
            path.to_string_lossy(),
            real_fmt
        );
    }
    guessed.decode()
}

/// Reorders an 8-bit RGBA image into the BGRA layout the uploader expects.
pub fn bgra_from_image(img: DynamicImage) -> PixelBuffer {
    let rgba = img.into_rgba8();
    let (width, height) = rgba.dimensions();
    let mut data = rgba.into_raw();
    for px in data.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    PixelBuffer {
        format: PixelFormat::Bgra8,
        width,
        height,
        data,
    }
}

fn rgb32f_from_image(img: DynamicImage) -> PixelBuffer {
    let rgb = img.into_rgb32f();
    let (width, height) = rgb.dimensions();
    let data = bytemuck::cast_slice::<f32, u8>(rgb.as_raw()).to_vec();
    PixelBuffer {
        format: PixelFormat::Rgb32F,
        width,
        height,
        data,
    }
}

pub fn decode_image(path: &Path) -> Result<PixelBuffer, DecodeError> {
    let img = open_image_fallback(path).map_err(|source| DecodeError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let buffer = match img {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => rgb32f_from_image(img),
        other => bgra_from_image(other),
    };
    trace!(
        "Decoded '{}' as {:?} {}x{}",
        path.display(),
        buffer.format,
        buffer.width,
        buffer.height
    );
    Ok(buffer)
}

// --- Text Path ---

/// Largest text canvas side in pixels.
pub const MAX_CANVAS_EXTENT: u32 = 32767;

fn canvas_bytes(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(PixelFormat::Bgra8.bytes_per_pixel())
}

pub const DEFAULT_FONT_SIZE: i64 = 16;
pub const DEFAULT_FONT_FAMILY: &str = "Sans";
pub const DEFAULT_TEXT_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

#[derive(Clone, Debug, PartialEq)]
pub struct TextStyle {
    pub font_family: String,
    pub font_size: f32,
    pub color: [f32; 4],
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            font_size: DEFAULT_FONT_SIZE as f32,
            color: DEFAULT_TEXT_COLOR,
        }
    }
}

impl TextStyle {
    pub fn from_props(props: &PropertyBag) -> Result<Self, DecodeError> {
        let font_size = props.int("font_size")?.unwrap_or(DEFAULT_FONT_SIZE);
        if font_size <= 0 {
            return Err(DecodeError::FontSize(font_size));
        }
        Ok(Self {
            font_family: props
                .str("font_family")?
                .unwrap_or(DEFAULT_FONT_FAMILY)
                .to_string(),
            font_size: font_size as f32,
            color: props.color("color")?.unwrap_or(DEFAULT_TEXT_COLOR),
        })
    }

    /// Straight-alpha 8-bit color.
    pub fn rgba8(&self) -> [u8; 4] {
        self.color
            .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
    }
}

/// Measure-then-render: the first layout only yields extents, the second
/// paints into a canvas of exactly that size.
pub fn render_text(
    rasterizer: &mut dyn TextRasterizer,
    request: &PreloadRequest,
) -> Result<PreloadTarget, DecodeError> {
    let style = TextStyle::from_props(&request.props)?;

    let (width, height) = rasterizer.measure(&style, &request.asset)?;
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyLayout(request.asset.clone()));
    }
    if width > MAX_CANVAS_EXTENT
        || height > MAX_CANVAS_EXTENT
        || canvas_bytes(width, height).is_none()
    {
        return Err(DecodeError::TooLarge { width, height });
    }

    let mut canvas = PixelBuffer::transparent(width, height);
    canvas.clear();
    rasterizer.paint(&style, &request.asset, &mut canvas)?;

    Ok(PreloadTarget {
        id: request.id.clone(),
        kind: TargetKind::Image,
        buffer: canvas,
    })
}

/// Decoder entry for async requests.
pub fn decode_request(
    rasterizer: &mut dyn TextRasterizer,
    request: &PreloadRequest,
) -> Result<PreloadTarget, DecodeError> {
    match request.kind {
        TargetKind::Text => render_text(rasterizer, request),
        kind => Err(DecodeError::Unsupported(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgb32FImage, Rgba, RgbaImage};

    struct BoxRasterizer {
        measured: u32,
    }

    impl TextRasterizer for BoxRasterizer {
        fn measure(&mut self, style: &TextStyle, text: &str) -> Result<(u32, u32), DecodeError> {
            self.measured += 1;
            let w = (text.chars().count() as f32 * style.font_size * 0.5).ceil() as u32;
            Ok((w, style.font_size.ceil() as u32))
        }

        fn paint(
            &mut self,
            style: &TextStyle,
            _text: &str,
            canvas: &mut PixelBuffer,
        ) -> Result<(), DecodeError> {
            canvas.blend_rect(0, 0, 1, 1, style.rgba8());
            Ok(())
        }
    }

    #[test]
    fn rgba_png_decodes_to_bgra() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bg.png");
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        img.save(&path).expect("write png");

        let buffer = decode_image(&path).expect("png should decode");
        assert_eq!(buffer.format(), PixelFormat::Bgra8);
        assert_eq!((buffer.width(), buffer.height()), (3, 2));
        assert_eq!(buffer.as_bytes().len(), 3 * 2 * 4);
        assert_eq!(buffer.pixel_bgra(0, 0), Some([30, 20, 10, 255]));
    }

    #[test]
    fn float_image_keeps_float_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sky.exr");
        let mut img = Rgb32FImage::new(2, 2);
        img.put_pixel(1, 1, Rgb([2.5, 0.5, 0.25]));
        img.save(&path).expect("write exr");

        let buffer = decode_image(&path).expect("exr should decode");
        assert_eq!(buffer.format(), PixelFormat::Rgb32F);
        assert_eq!(buffer.as_bytes().len(), 2 * 2 * 12);
        let floats = buffer
            .as_bytes()
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect::<Vec<_>>();
        assert_eq!(&floats[9..12], &[2.5, 0.5, 0.25]);
    }

    #[test]
    fn missing_image_is_a_decode_error() {
        let err = decode_image(Path::new("/definitely/not/here.png"))
            .expect_err("missing file must fail");
        assert!(matches!(err, DecodeError::Image { .. }), "got {err:?}");
    }

    #[test]
    fn text_defaults_apply_when_props_absent() {
        let style = TextStyle::from_props(&PropertyBag::new()).expect("defaults");
        assert_eq!(style, TextStyle::default());
        assert_eq!(style.font_family, "Sans");
        assert_eq!(style.font_size, 16.0);
        assert_eq!(style.rgba8(), [255, 255, 255, 255]);
    }

    #[test]
    fn text_target_uses_measured_extents() {
        let mut raster = BoxRasterizer { measured: 0 };
        let rq = PreloadRequest::text("label", "Locked").with_prop("font_size", 24);
        let target = render_text(&mut raster, &rq).expect("render");
        assert_eq!(raster.measured, 1, "measure runs exactly once");
        assert_eq!(target.kind, TargetKind::Image);
        assert_eq!(target.size(), (72, 24));
        assert_eq!(target.buffer.pixel_bgra(0, 0), Some([255, 255, 255, 255]));
        assert_eq!(target.buffer.pixel_bgra(1, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn wrong_typed_prop_fails_only_that_request() {
        let mut raster = BoxRasterizer { measured: 0 };
        let rq = PreloadRequest::text("label", "Locked").with_prop("color", "red");
        let err = render_text(&mut raster, &rq).expect_err("string color is a mismatch");
        assert!(matches!(err, DecodeError::Property(_)), "got {err:?}");
        assert_eq!(raster.measured, 0);
    }

    #[test]
    fn empty_text_has_no_extent() {
        let mut raster = BoxRasterizer { measured: 0 };
        let err = render_text(&mut raster, &PreloadRequest::text("empty", ""))
            .expect_err("empty layout");
        assert!(matches!(err, DecodeError::EmptyLayout(_)), "got {err:?}");
    }

    #[test]
    fn oversized_text_is_rejected_before_allocating() {
        let mut raster = BoxRasterizer { measured: 0 };
        let rq = PreloadRequest::text("big", "Locked").with_prop("font_size", 400_000);
        let err = render_text(&mut raster, &rq).expect_err("canvas over the limit");
        assert!(
            matches!(err, DecodeError::TooLarge { width: 1_200_000, height: 400_000 }),
            "got {err:?}"
        );

        let tall = PreloadRequest::text("tall", "x").with_prop("font_size", 32768);
        let err = render_text(&mut raster, &tall).expect_err("one side over the limit");
        assert!(
            matches!(err, DecodeError::TooLarge { width: 16384, height: 32768 }),
            "got {err:?}"
        );
        assert_eq!(raster.measured, 2, "rejected after measuring, never painted");
    }

    #[test]
    fn image_requests_are_unsupported_async() {
        let mut raster = BoxRasterizer { measured: 0 };
        let mut rq = PreloadRequest::text("img", "x");
        rq.kind = TargetKind::Image;
        let err = decode_request(&mut raster, &rq).expect_err("image is bulk only");
        assert!(matches!(err, DecodeError::Unsupported(TargetKind::Image)));
    }

    #[test]
    fn blend_is_clipped_and_composites_over() {
        let mut canvas = PixelBuffer::transparent(2, 2);
        canvas.blend_rect(-5, -5, 6, 6, [255, 0, 0, 255]);
        assert_eq!(canvas.pixel_bgra(0, 0), Some([0, 0, 255, 255]));
        assert_eq!(canvas.pixel_bgra(1, 1), Some([0, 0, 0, 0]));

        canvas.blend_rect(0, 0, 1, 1, [0, 0, 255, 128]);
        let [b, _, r, a] = canvas.pixel_bgra(0, 0).expect("in bounds");
        assert_eq!(a, 255);
        assert!(b > 100 && r > 100, "half blue over red should mix: b={b} r={r}");
    }
}
