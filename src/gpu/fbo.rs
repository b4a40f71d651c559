//! Offscreen render target
//!
//! Framebuffer with an RGBA8 color texture (sampled by the effect pass) and
//! a 16-bit depth renderbuffer.

use anyhow::{anyhow, Result};
use glow::HasContext;
use log::info;

use super::GlResource;
use super::texture::Texture;

/// Offscreen framebuffer
pub struct RenderTarget {
    framebuffer: glow::Framebuffer,
    depth: glow::Renderbuffer,
    color: Texture,
    width: u32,
    height: u32,
}

impl RenderTarget {
    /// Create a complete render target or fail
    pub fn new(gl: &glow::Context, width: u32, height: u32) -> Result<Self> {
        let color = Texture::empty(gl, width, height)?;
        unsafe {
            let framebuffer = match gl.create_framebuffer() {
                Ok(fb) => fb,
                Err(e) => {
                    color.destroy(gl);
                    return Err(anyhow!("Failed to create FBO: {}", e));
                }
            };
            let depth = match gl.create_renderbuffer() {
                Ok(rb) => rb,
                Err(e) => {
                    gl.delete_framebuffer(framebuffer);
                    color.destroy(gl);
                    return Err(anyhow!("Failed to create depth renderbuffer: {}", e));
                }
            };

            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(depth));
            gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                glow::DEPTH_COMPONENT16,
                width as i32,
                height as i32,
            );
            gl.bind_renderbuffer(glow::RENDERBUFFER, None);

            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(color.raw()),
                0,
            );
            gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::DEPTH_ATTACHMENT,
                glow::RENDERBUFFER,
                Some(depth),
            );

            // Check framebuffer status
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(framebuffer);
                gl.delete_renderbuffer(depth);
                color.destroy(gl);
                return Err(anyhow!("FBO incomplete: status=0x{:x}", status));
            }

            info!("Render target created: {}x{}", width, height);

            Ok(Self {
                framebuffer,
                depth,
                color,
                width,
                height,
            })
        }
    }

    /// Bind for rendering (viewport covers the whole target)
    pub fn bind(&self, gl: &glow::Context) {
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.framebuffer));
            gl.viewport(0, 0, self.width as i32, self.height as i32);
        }
    }

    /// Return to the default framebuffer
    pub fn unbind(&self, gl: &glow::Context) {
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
    }

    /// Color attachment, sampled by the effect pass
    pub fn texture(&self) -> &Texture {
        &self.color
    }

    /// Release resources
    pub fn destroy(&self, gl: &glow::Context) {
        unsafe {
            gl.delete_framebuffer(self.framebuffer);
            gl.delete_renderbuffer(self.depth);
        }
        self.color.destroy(gl);
    }
}

impl GlResource for RenderTarget {
    fn release(&self, gl: &glow::Context) {
        self.destroy(gl);
    }
}
