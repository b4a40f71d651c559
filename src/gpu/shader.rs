//! Shader management
//!
//! GLSL ES 3.00 sources and program compilation/linking

use anyhow::{anyhow, Result};
use glow::HasContext;
use log::debug;

use super::GlResource;

/// Plane vertex shader
///
/// Input:
///   a_pos: clip-space position
///   a_uv:  texture coordinates
const PLANE_VERTEX_SHADER: &str = r#"#version 300 es
precision mediump float;

layout(location = 0) in vec3 a_pos;
layout(location = 1) in vec2 a_uv;

out vec2 v_uv;

void main() {
    gl_Position = vec4(a_pos, 1.0);
    v_uv = a_uv;
}
"#;

/// Pass-through fragment shader (capture and overlay planes)
const PASSTHROUGH_FRAGMENT_SHADER: &str = r#"#version 300 es
precision mediump float;

in vec2 v_uv;
uniform sampler2D u_texture0;
out vec4 frag_color;

void main() {
    vec4 c = texture(u_texture0, v_uv);
    // Premultiply so the overlay composites with ONE, ONE_MINUS_SRC_ALPHA
    frag_color = vec4(c.rgb * c.a, c.a);
}
"#;

/// Distortion fragment shader (effect plane)
///
/// Uniform:
///   u_texture0:  offscreen capture
///   u_time:      seconds since start
///   u_resolution: surface size in pixels
const EFFECT_FRAGMENT_SHADER: &str = r#"#version 300 es
precision highp float;

in vec2 v_uv;
uniform sampler2D u_texture0;
uniform float u_time;
uniform vec2 u_resolution;
out vec4 frag_color;

float hash(vec2 p) {
    return fract(sin(dot(p, vec2(12.9898, 78.233))) * 43758.5453);
}

void main() {
    // Coarse pixelation keeps the captured content unreadable
    vec2 block = vec2(12.0) / u_resolution;
    vec2 uv = (floor(v_uv / block) + 0.5) * block;

    // Horizontal band displacement, re-rolled a few times per second
    float step_t = floor(u_time * 6.0);
    float band = floor(v_uv.y * 24.0);
    float r = hash(vec2(band, step_t));
    if (r > 0.8) {
        uv.x += (hash(vec2(step_t, band)) - 0.5) * 0.08;
    }

    // Chromatic split
    float split = 0.004 + 0.003 * sin(u_time * 1.7);
    float red = texture(u_texture0, uv + vec2(split, 0.0)).r;
    float green = texture(u_texture0, uv).g;
    float blue = texture(u_texture0, uv - vec2(split, 0.0)).b;
    vec3 color = vec3(red, green, blue);

    // Scanlines and grain
    color *= 0.85 + 0.15 * sin(v_uv.y * u_resolution.y * 1.5 + u_time * 8.0);
    color += (hash(v_uv * u_resolution + u_time) - 0.5) * 0.06;

    frag_color = vec4(color * 0.8, 1.0);
}
"#;

/// Linked GL program
pub struct ShaderProgram {
    program: glow::Program,
}

impl ShaderProgram {
    /// Compile and link a program
    pub fn new(gl: &glow::Context, name: &str, vertex_src: &str, fragment_src: &str) -> Result<Self> {
        let program = compile_program(gl, name, vertex_src, fragment_src)?;
        debug!("Shader program '{}' linked", name);
        Ok(Self { program })
    }

    /// Program for the capture and overlay planes
    pub fn passthrough(gl: &glow::Context) -> Result<Self> {
        Self::new(gl, "passthrough", PLANE_VERTEX_SHADER, PASSTHROUGH_FRAGMENT_SHADER)
    }

    /// Program for the effect plane
    pub fn effect(gl: &glow::Context) -> Result<Self> {
        Self::new(gl, "effect", PLANE_VERTEX_SHADER, EFFECT_FRAGMENT_SHADER)
    }

    pub fn bind(&self, gl: &glow::Context) {
        unsafe {
            gl.use_program(Some(self.program));
        }
    }

    /// Uniform location; None when the uniform was optimized out
    pub fn uniform(&self, gl: &glow::Context, name: &str) -> Option<glow::UniformLocation> {
        unsafe { gl.get_uniform_location(self.program, name) }
    }

    /// Look up a uniform that must exist
    pub fn require_uniform(&self, gl: &glow::Context, name: &str) -> Result<glow::UniformLocation> {
        self.uniform(gl, name)
            .ok_or_else(|| anyhow!("{} uniform not found", name))
    }

    pub fn destroy(&self, gl: &glow::Context) {
        unsafe {
            gl.delete_program(self.program);
        }
    }
}

impl GlResource for ShaderProgram {
    fn release(&self, gl: &glow::Context) {
        self.destroy(gl);
    }
}

/// Compile shader program
fn compile_program(
    gl: &glow::Context,
    name: &str,
    vertex_src: &str,
    fragment_src: &str,
) -> Result<glow::Program> {
    unsafe {
        let vs = compile_shader(gl, name, glow::VERTEX_SHADER, vertex_src)?;
        let fs = match compile_shader(gl, name, glow::FRAGMENT_SHADER, fragment_src) {
            Ok(fs) => fs,
            Err(e) => {
                gl.delete_shader(vs);
                return Err(e);
            }
        };

        let program = gl
            .create_program()
            .map_err(|e| anyhow!("Failed to create program ({}): {}", name, e))?;

        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);

        let linked = gl.get_program_link_status(program);
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        if !linked {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(anyhow!("Shader link failed ({}): {}", name, log));
        }

        Ok(program)
    }
}

/// Compile individual shader
fn compile_shader(
    gl: &glow::Context,
    name: &str,
    shader_type: u32,
    source: &str,
) -> Result<glow::Shader> {
    unsafe {
        let shader = gl
            .create_shader(shader_type)
            .map_err(|e| anyhow!("Failed to create shader ({}): {}", name, e))?;

        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            let type_name = match shader_type {
                glow::VERTEX_SHADER => "vertex",
                glow::FRAGMENT_SHADER => "fragment",
                _ => "unknown",
            };
            return Err(anyhow!(
                "{} shader compile failed ({}): {}",
                type_name,
                name,
                log
            ));
        }

        Ok(shader)
    }
}
