mod backends;

pub use backends::opengl;

use crate::assets::decode::PixelFormat;
use thiserror::Error;

// --- Public Data Contract ---

/// Texel storage on the GPU side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GpuFormat {
    /// 4 channel, 8 bit unsigned normalized.
    Rgba8,
    /// 3 channel, 32 bit float.
    Rgb32F,
}

/// Everything a backend needs to allocate and fill one linearly filtered 2D
/// texture.
#[derive(Clone, Copy, Debug)]
pub struct TextureDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub format: GpuFormat,
    /// Sample red from blue and blue from red.
    pub swizzle_rb: bool,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("texture upload failed: {0}")]
pub struct UploadError(pub String);

/// The GPU texture collaborator. Implementations are tied to the thread that
/// owns the graphics context.
pub trait TextureUploader {
    type Handle;

    fn upload(&mut self, desc: &TextureDesc<'_>) -> Result<Self::Handle, UploadError>;

    fn release(&mut self, handle: Self::Handle);
}

/// GPU format for a decoded buffer, and whether red/blue must be swapped.
#[inline(always)]
pub const fn upload_layout(format: PixelFormat) -> (GpuFormat, bool) {
    match format {
        PixelFormat::Rgb32F => (GpuFormat::Rgb32F, false),
        PixelFormat::Bgra8 => (GpuFormat::Rgba8, true),
    }
}

#[cfg(test)]
mod tests {
    use super::{GpuFormat, upload_layout};
    use crate::assets::decode::PixelFormat;

    #[test]
    fn float_sources_upload_as_rgb32f_without_swizzle() {
        assert_eq!(upload_layout(PixelFormat::Rgb32F), (GpuFormat::Rgb32F, false));
    }

    #[test]
    fn byte_sources_upload_as_rgba8_with_red_blue_swap() {
        assert_eq!(upload_layout(PixelFormat::Bgra8), (GpuFormat::Rgba8, true));
    }
}
