//! GPU context management
//!
//! EGL (XCB platform) + OpenGL ES setup

use anyhow::{anyhow, Context, Result};
use glow::HasContext;
use khronos_egl as egl;
use log::{debug, info};
use std::ffi::c_void;

// EGL_EXT_platform_xcb
const EGL_PLATFORM_XCB_EXT: egl::Enum = 0x31DC;
const EGL_PLATFORM_XCB_SCREEN_EXT: egl::Attrib = 0x31DE;

/// EGL instance type (dynamic loading)
type EglInstance = egl::Instance<egl::Dynamic<libloading::Library, egl::EGL1_5>>;

/// EGL context
///
/// Created before the lock window so the window can use the config's
/// native visual; the window surface is attached afterwards.
pub struct EglContext {
    instance: EglInstance,
    display: egl::Display,
    context: egl::Context,
    config: egl::Config,
    surface: Option<egl::Surface>,
}

impl EglContext {
    /// Initialize EGL on an XCB connection
    pub fn new(xcb_connection: *mut c_void, screen: usize) -> Result<Self> {
        // Load EGL library
        let lib = unsafe {
            libloading::Library::new("libEGL.so.1")
                .or_else(|_| libloading::Library::new("libEGL.so"))
                .context("Failed to load EGL library")?
        };

        let instance: EglInstance = unsafe {
            egl::DynamicInstance::<egl::EGL1_5>::load_required_from(lib)
                .context("Failed to create EGL instance")?
        };

        let display = unsafe {
            instance
                .get_platform_display(
                    EGL_PLATFORM_XCB_EXT,
                    xcb_connection,
                    &[EGL_PLATFORM_XCB_SCREEN_EXT, screen, egl::ATTRIB_NONE],
                )
                .context("Failed to get EGL display (EGL_EXT_platform_xcb)")?
        };

        instance
            .initialize(display)
            .context("Failed to initialize EGL")?;

        if let Ok(version_str) = instance.query_string(Some(display), egl::VERSION) {
            info!("EGL version: {}", version_str.to_string_lossy());
        }

        instance
            .bind_api(egl::OPENGL_ES_API)
            .context("Failed to bind OpenGL ES API")?;

        let config = Self::choose_config(&instance, display)?;

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 3, egl::NONE];
        let context = instance
            .create_context(display, config, None, &context_attribs)
            .context("Failed to create OpenGL ES 3 context")?;

        info!("EGL context created");

        Ok(Self {
            instance,
            display,
            context,
            config,
            surface: None,
        })
    }

    fn choose_config(instance: &EglInstance, display: egl::Display) -> Result<egl::Config> {
        let config_attribs = [
            egl::SURFACE_TYPE,
            egl::WINDOW_BIT,
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::DEPTH_SIZE,
            0,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES3_BIT,
            egl::NONE,
        ];

        instance
            .choose_first_config(display, &config_attribs)
            .context("choose_first_config failed")?
            .ok_or_else(|| anyhow!("No suitable EGL config found"))
    }

    /// X visual the lock window must use for this config
    pub fn native_visual_id(&self) -> Result<u32> {
        let id = self
            .instance
            .get_config_attrib(self.display, self.config, egl::NATIVE_VISUAL_ID)
            .context("Failed to query EGL native visual")?;
        debug!("EGL native visual: 0x{:x}", id);
        Ok(id as u32)
    }

    /// Create the window surface for `window` and make the context current
    pub fn attach_window(&mut self, window: u32) -> Result<()> {
        let mut native_window = window;
        let surface = unsafe {
            self.instance
                .create_platform_window_surface(
                    self.display,
                    self.config,
                    &mut native_window as *mut u32 as *mut c_void,
                    &[egl::ATTRIB_NONE],
                )
                .context("Failed to create EGL window surface")?
        };
        self.surface = Some(surface);

        self.instance
            .make_current(self.display, Some(surface), Some(surface), Some(self.context))
            .context("Failed to make EGL context current")?;
        info!("EGL surface attached to window 0x{:x}", window);
        Ok(())
    }

    /// Swap buffers
    pub fn swap_buffers(&self) -> Result<()> {
        let surface = self
            .surface
            .ok_or_else(|| anyhow!("No EGL surface attached"))?;
        self.instance
            .swap_buffers(self.display, surface)
            .context("Failed to swap buffers")?;
        Ok(())
    }

    /// Load GL function pointers
    pub fn get_proc_address(&self, name: &str) -> *const c_void {
        self.instance
            .get_proc_address(name)
            .map(|f| f as *const c_void)
            .unwrap_or(std::ptr::null())
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        let _ = self.instance.make_current(self.display, None, None, None);
        if let Some(surface) = self.surface.take() {
            let _ = self.instance.destroy_surface(self.display, surface);
        }
        let _ = self.instance.destroy_context(self.display, self.context);
        let _ = self.instance.terminate(self.display);
        debug!("EGL context destroyed");
    }
}

/// OpenGL ES renderer
pub struct GlRenderer {
    gl: glow::Context,
}

impl GlRenderer {
    /// Initialize OpenGL ES from the current EGL context
    pub fn new(egl: &EglContext) -> Result<Self> {
        let gl = unsafe { glow::Context::from_loader_function(|name| egl.get_proc_address(name)) };

        unsafe {
            info!("OpenGL ES: {}", gl.get_parameter_string(glow::VERSION));
            info!("Renderer: {}", gl.get_parameter_string(glow::RENDERER));
            info!("Vendor: {}", gl.get_parameter_string(glow::VENDOR));
        }

        Ok(Self { gl })
    }

    /// Clear the bound framebuffer (fill with solid color)
    pub fn clear(&self, r: f32, g: f32, b: f32, a: f32) {
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    /// Set viewport
    pub fn set_viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        unsafe {
            self.gl.viewport(x, y, width, height);
        }
    }

    /// Source-over blending for premultiplied output
    pub fn enable_blending(&self) {
        unsafe {
            self.gl.enable(glow::BLEND);
            self.gl.blend_func(glow::ONE, glow::ONE_MINUS_SRC_ALPHA);
        }
    }

    /// Reference to glow context
    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }
}
