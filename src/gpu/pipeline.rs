//! Two-pass lock screen compositor
//!
//! 1. Capture pass: snapshot -> offscreen target (pass-through shader)
//! 2. Effect pass: target color attachment -> window, through the
//!    time-parameterized distortion shader
//! 3. Optional overlay: image drawn in a centered viewport on top
//!
//! The only per-frame state is the effect's `u_time` uniform.

use anyhow::Result;
use glow::HasContext;
use image::RgbaImage;
use log::info;

use super::context::GlRenderer;
use super::fbo::RenderTarget;
use super::{or_release, release_created, GlResource};
use super::plane::{Plane, INVERTED_PLANE_VERTICES, PLANE_INDICES, PLANE_VERTICES};
use super::shader::ShaderProgram;
use super::texture::Texture;

/// GL viewport rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Viewport of an image's natural size centered on the surface
pub fn centered_viewport(surface: (u32, u32), image: (u32, u32)) -> Viewport {
    let (sw, sh) = (surface.0 as i32, surface.1 as i32);
    let (iw, ih) = (image.0 as i32, image.1 as i32);
    Viewport {
        x: sw / 2 - iw / 2,
        y: sh / 2 - ih / 2,
        width: iw,
        height: ih,
    }
}

struct Overlay {
    texture: Texture,
    plane: Plane,
}

pub struct RenderPipeline {
    passthrough: ShaderProgram,
    effect: ShaderProgram,
    target: RenderTarget,
    capture_texture: Texture,
    capture_plane: Plane,
    effect_plane: Plane,
    overlay: Option<Overlay>,
    u_time: glow::UniformLocation,
    width: u32,
    height: u32,
}

impl RenderPipeline {
    /// Build every GPU resource for a `width`x`height` surface
    pub fn new(
        renderer: &GlRenderer,
        width: u32,
        height: u32,
        capture: &RgbaImage,
        overlay: Option<&RgbaImage>,
    ) -> Result<Self> {
        let gl = renderer.gl();

        // Each step releases what the earlier steps created if it fails
        let passthrough = ShaderProgram::passthrough(gl)?;
        let effect = or_release(gl, &[&passthrough], ShaderProgram::effect(gl))?;
        let programs: [&dyn GlResource; 2] = [&passthrough, &effect];
        let u_time = or_release(gl, &programs, effect.require_uniform(gl, "u_time"))?;
        let u_resolution = or_release(gl, &programs, effect.require_uniform(gl, "u_resolution"))?;

        let target = or_release(gl, &programs, RenderTarget::new(gl, width, height))?;
        let capture_texture = or_release(
            gl,
            &[&passthrough, &effect, &target],
            Texture::from_image(gl, capture),
        )?;
        let capture_plane = or_release(
            gl,
            &[&passthrough, &effect, &target, &capture_texture],
            Plane::new(gl, &PLANE_VERTICES, &PLANE_INDICES),
        )?;
        let effect_plane = or_release(
            gl,
            &[&passthrough, &effect, &target, &capture_texture, &capture_plane],
            Plane::new(gl, &INVERTED_PLANE_VERTICES, &PLANE_INDICES),
        )?;

        let overlay = match overlay {
            Some(image) => {
                let base: [&dyn GlResource; 6] = [
                    &passthrough,
                    &effect,
                    &target,
                    &capture_texture,
                    &capture_plane,
                    &effect_plane,
                ];
                let texture = or_release(gl, &base, Texture::from_image(gl, image))?;
                let plane = Plane::new(gl, &PLANE_VERTICES, &PLANE_INDICES).map_err(|e| {
                    texture.destroy(gl);
                    release_created(gl, &base);
                    e
                })?;
                Some(Overlay { texture, plane })
            }
            None => None,
        };

        // Resolution is fixed for the session
        effect.bind(gl);
        unsafe {
            gl.uniform_2_f32(Some(&u_resolution), width as f32, height as f32);
        }

        renderer.enable_blending();
        renderer.set_viewport(0, 0, width as i32, height as i32);

        info!(
            "Render pipeline ready: {}x{}{}",
            width,
            height,
            if overlay.is_some() { " + overlay" } else { "" }
        );

        Ok(Self {
            passthrough,
            effect,
            target,
            capture_texture,
            capture_plane,
            effect_plane,
            overlay,
            u_time,
            width,
            height,
        })
    }

    /// Draw one frame (`time` in seconds). The caller presents it.
    pub fn render(&self, renderer: &GlRenderer, time: f32) {
        let gl = renderer.gl();

        // Capture pass
        self.target.bind(gl);
        renderer.clear(0.0, 0.0, 0.0, 1.0);
        self.capture_plane
            .draw(gl, &self.passthrough, &[&self.capture_texture]);
        self.target.unbind(gl);

        // Effect pass
        renderer.set_viewport(0, 0, self.width as i32, self.height as i32);
        renderer.clear(0.0, 0.0, 0.0, 1.0);
        self.effect.bind(gl);
        unsafe {
            gl.uniform_1_f32(Some(&self.u_time), time);
        }
        self.effect_plane
            .draw(gl, &self.effect, &[self.target.texture()]);

        // Overlay pass
        if let Some(overlay) = &self.overlay {
            let vp = centered_viewport((self.width, self.height), overlay.texture.size());
            renderer.set_viewport(vp.x, vp.y, vp.width, vp.height);
            overlay
                .plane
                .draw(gl, &self.passthrough, &[&overlay.texture]);
            renderer.set_viewport(0, 0, self.width as i32, self.height as i32);
        }
    }

    /// Release every GPU resource (context must still be current)
    pub fn destroy(&self, gl: &glow::Context) {
        if let Some(overlay) = &self.overlay {
            overlay.plane.destroy(gl);
            overlay.texture.destroy(gl);
        }
        self.effect_plane.destroy(gl);
        self.capture_plane.destroy(gl);
        self.capture_texture.destroy(gl);
        self.target.destroy(gl);
        self.effect.destroy(gl);
        self.passthrough.destroy(gl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_viewport() {
        assert_eq!(
            centered_viewport((1920, 1080), (200, 100)),
            Viewport {
                x: 860,
                y: 490,
                width: 200,
                height: 100
            }
        );
    }

    #[test]
    fn test_centered_viewport_odd_sizes() {
        let vp = centered_viewport((1921, 1081), (201, 101));
        assert_eq!((vp.x, vp.y), (960 - 100, 540 - 50));
        assert_eq!((vp.width, vp.height), (201, 101));
    }

    #[test]
    fn test_overlay_larger_than_surface() {
        let vp = centered_viewport((800, 600), (1000, 600));
        assert_eq!(vp.x, -100);
        assert_eq!(vp.y, 0);
    }
}
