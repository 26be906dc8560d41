use crate::core::gfx::{GpuFormat, TextureDesc, TextureUploader, UploadError};
use glow::{HasContext, PixelUnpackData};
use glutin::{
    config::ConfigTemplateBuilder,
    context::{ContextAttributesBuilder, PossiblyCurrentContext},
    display::{Display, DisplayApiPreference},
    prelude::*,
    surface::{Surface, SurfaceAttributesBuilder, WindowSurface},
};
use log::{debug, info, warn};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::{error::Error, ffi::CStr, num::NonZeroU32};
use winit::window::Window;

// A handle to an OpenGL texture on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture(pub glow::Texture);

/// Uploads through the context current on this thread.
pub struct GlUploader<'gl> {
    gl: &'gl glow::Context,
}

impl<'gl> GlUploader<'gl> {
    pub const fn new(gl: &'gl glow::Context) -> Self {
        Self { gl }
    }
}

impl TextureUploader for GlUploader<'_> {
    type Handle = Texture;

    fn upload(&mut self, desc: &TextureDesc<'_>) -> Result<Texture, UploadError> {
        create_texture(self.gl, desc).map_err(UploadError)
    }

    fn release(&mut self, handle: Texture) {
        unsafe {
            self.gl.delete_texture(handle.0);
        }
    }
}

pub fn create_texture(gl: &glow::Context, desc: &TextureDesc<'_>) -> Result<Texture, String> {
    let (internal, format, ty) = match desc.format {
        GpuFormat::Rgb32F => (glow::RGB32F, glow::RGB, glow::FLOAT),
        GpuFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
    };
    let w = i32::try_from(desc.width).map_err(|_| format!("width {} too large", desc.width))?;
    let h = i32::try_from(desc.height).map_err(|_| format!("height {} too large", desc.height))?;

    unsafe {
        let t = gl.create_texture()?;
        gl.bind_texture(glow::TEXTURE_2D, Some(t));

        gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        gl.pixel_store_i32(glow::UNPACK_ROW_LENGTH, 0);
        gl.pixel_store_i32(glow::UNPACK_SKIP_ROWS, 0);
        gl.pixel_store_i32(glow::UNPACK_SKIP_PIXELS, 0);

        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_BASE_LEVEL, 0);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAX_LEVEL, 0);
        if desc.swizzle_rb {
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_R, glow::BLUE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_B, glow::RED as i32);
        }

        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            internal as i32,
            w,
            h,
            0,
            format,
            ty,
            PixelUnpackData::Slice(Some(desc.data)),
        );

        gl.bind_texture(glow::TEXTURE_2D, None);
        debug!(
            "Uploaded {}x{} {:?} texture (swizzle_rb={})",
            desc.width, desc.height, desc.format, desc.swizzle_rb
        );
        Ok(Texture(t))
    }
}

pub struct State {
    pub gl: glow::Context,
    gl_surface: Surface<WindowSurface>,
    gl_context: PossiblyCurrentContext,
    window_size: (u32, u32),
}

impl State {
    pub const fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    pub fn uploader(&self) -> GlUploader<'_> {
        GlUploader::new(&self.gl)
    }
}

pub fn init(window: &Window, vsync_enabled: bool) -> Result<State, Box<dyn Error>> {
    info!("Initializing OpenGL context...");
    let (gl_surface, gl_context, gl) = create_opengl_context(window, vsync_enabled)?;
    let size = window.inner_size();
    info!("OpenGL context initialized successfully.");
    Ok(State {
        gl,
        gl_surface,
        gl_context,
        window_size: (size.width, size.height),
    })
}

/// Clears to `clear_color` and presents. Nothing is drawn; the demo only
/// exercises the upload path.
pub fn present(state: &mut State, clear_color: [f32; 4]) -> Result<(), Box<dyn Error>> {
    let [r, g, b, a] = clear_color;
    unsafe {
        state.gl.clear_color(r, g, b, a);
        state.gl.clear(glow::COLOR_BUFFER_BIT);
    }
    state.gl_surface.swap_buffers(&state.gl_context)?;
    Ok(())
}

pub fn resize(state: &mut State, width: u32, height: u32) {
    let (Some(w), Some(h)) = (NonZeroU32::new(width), NonZeroU32::new(height)) else {
        warn!("Ignoring resize to zero dimensions.");
        return;
    };

    state.gl_surface.resize(&state.gl_context, w, h);
    unsafe {
        state.gl.viewport(0, 0, width as i32, height as i32);
    }
    state.window_size = (width, height);
}

fn create_opengl_context(
    window: &Window,
    vsync_enabled: bool,
) -> Result<
    (
        Surface<WindowSurface>,
        PossiblyCurrentContext,
        glow::Context,
    ),
    Box<dyn Error>,
> {
    let display_handle = window.display_handle()?.as_raw();

    #[cfg(target_os = "windows")]
    let preference = {
        info!("Using WGL for OpenGL context.");
        DisplayApiPreference::Wgl(None)
    };

    #[cfg(target_os = "macos")]
    let preference = {
        info!("Using CGL for OpenGL context.");
        DisplayApiPreference::Cgl
    };

    #[cfg(all(unix, not(target_os = "macos")))]
    let preference = {
        info!("Using EGL for OpenGL context.");
        DisplayApiPreference::Egl
    };

    let display = unsafe { Display::new(display_handle, preference)? };

    let template = ConfigTemplateBuilder::new()
        .with_alpha_size(8)
        .with_transparency(false)
        .build();

    let config = unsafe { display.find_configs(template)?.next() }
        .ok_or("Failed to find a suitable GL config")?;

    let (width, height): (u32, u32) = window.inner_size().into();
    let (Some(width), Some(height)) = (NonZeroU32::new(width), NonZeroU32::new(height)) else {
        return Err("Window has zero size".into());
    };
    let raw_window_handle = window.window_handle()?.as_raw();
    let surface_attributes =
        SurfaceAttributesBuilder::<WindowSurface>::new().build(raw_window_handle, width, height);
    let surface = unsafe { display.create_window_surface(&config, &surface_attributes)? };

    let context_attributes = ContextAttributesBuilder::new().build(Some(raw_window_handle));
    let context =
        unsafe { display.create_context(&config, &context_attributes)? }.make_current(&surface)?;

    {
        use glutin::surface::SwapInterval;
        let interval = match NonZeroU32::new(1) {
            Some(one) if vsync_enabled => SwapInterval::Wait(one),
            _ => SwapInterval::DontWait,
        };
        if let Err(e) = surface.set_swap_interval(&context, interval) {
            warn!("Failed to set swap interval (VSync): {:?}", e);
        }
    }

    unsafe {
        let gl = glow::Context::from_loader_function_cstr(|s: &CStr| display.get_proc_address(s));
        Ok((surface, context, gl))
    }
}
