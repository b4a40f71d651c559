//! 2D textures uploaded from RGBA images

use anyhow::{anyhow, Result};
use glow::HasContext;
use image::RgbaImage;
use log::debug;

use super::GlResource;

/// RGBA8 texture
pub struct Texture {
    texture: glow::Texture,
    width: u32,
    height: u32,
}

impl Texture {
    /// Upload `image` (clamp-to-edge, linear filtering)
    pub fn from_image(gl: &glow::Context, image: &RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        let texture = unsafe {
            let texture = gl
                .create_texture()
                .map_err(|e| anyhow!("Failed to create texture: {}", e))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            set_parameters(gl, glow::LINEAR);
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 4);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                Some(image.as_raw()),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
            texture
        };
        debug!("Texture uploaded: {}x{}", width, height);
        Ok(Self {
            texture,
            width,
            height,
        })
    }

    /// Empty texture used as a render target color attachment
    pub fn empty(gl: &glow::Context, width: u32, height: u32) -> Result<Self> {
        let texture = unsafe {
            let texture = gl
                .create_texture()
                .map_err(|e| anyhow!("Failed to create texture: {}", e))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            set_parameters(gl, glow::NEAREST);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                None,
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
            texture
        };
        Ok(Self {
            texture,
            width,
            height,
        })
    }

    /// Bind to texture unit `unit`
    pub fn bind(&self, gl: &glow::Context, unit: u32) {
        unsafe {
            gl.active_texture(glow::TEXTURE0 + unit);
            gl.bind_texture(glow::TEXTURE_2D, Some(self.texture));
        }
    }

    pub fn unbind(&self, gl: &glow::Context, unit: u32) {
        unsafe {
            gl.active_texture(glow::TEXTURE0 + unit);
            gl.bind_texture(glow::TEXTURE_2D, None);
        }
    }

    pub(super) fn raw(&self) -> glow::Texture {
        self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn destroy(&self, gl: &glow::Context) {
        unsafe {
            gl.delete_texture(self.texture);
        }
    }
}

impl GlResource for Texture {
    fn release(&self, gl: &glow::Context) {
        self.destroy(gl);
    }
}

unsafe fn set_parameters(gl: &glow::Context, filter: u32) {
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter as i32);
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_WRAP_S,
        glow::CLAMP_TO_EDGE as i32,
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_WRAP_T,
        glow::CLAMP_TO_EDGE as i32,
    );
}
