//! Textured full-viewport quads

use anyhow::{anyhow, Result};
use glow::HasContext;

use super::GlResource;
use super::shader::ShaderProgram;
use super::texture::Texture;

/// Per-vertex data: position(3) + UV(2) = 5 floats
const VERTEX_FLOATS: usize = 5;

/// Quad whose top edge samples image row 0 (uploaded images)
pub const PLANE_VERTICES: [f32; 20] = [
    // x, y, z, u, v
    -1.0, 1.0, 0.0, 0.0, 0.0, //
    1.0, 1.0, 0.0, 1.0, 0.0, //
    1.0, -1.0, 0.0, 1.0, 1.0, //
    -1.0, -1.0, 0.0, 0.0, 1.0,
];

/// Quad with GL texture orientation (render target color attachments)
pub const INVERTED_PLANE_VERTICES: [f32; 20] = [
    -1.0, 1.0, 0.0, 0.0, 1.0, //
    1.0, 1.0, 0.0, 1.0, 1.0, //
    1.0, -1.0, 0.0, 1.0, 0.0, //
    -1.0, -1.0, 0.0, 0.0, 0.0,
];

/// Two triangles
pub const PLANE_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// Indexed quad
pub struct Plane {
    vao: glow::VertexArray,
    vbo: glow::Buffer,
    ebo: glow::Buffer,
    index_count: i32,
}

impl Plane {
    pub fn new(gl: &glow::Context, vertices: &[f32], indices: &[u32]) -> Result<Self> {
        unsafe {
            let vao = gl
                .create_vertex_array()
                .map_err(|e| anyhow!("Failed to create VAO: {}", e))?;
            let vbo = gl
                .create_buffer()
                .map_err(|e| anyhow!("Failed to create VBO: {}", e))?;
            let ebo = gl
                .create_buffer()
                .map_err(|e| anyhow!("Failed to create EBO: {}", e))?;

            gl.bind_vertex_array(Some(vao));

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                cast_slice(vertices),
                glow::STATIC_DRAW,
            );

            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo));
            gl.buffer_data_u8_slice(
                glow::ELEMENT_ARRAY_BUFFER,
                cast_slice(indices),
                glow::STATIC_DRAW,
            );

            let stride = (VERTEX_FLOATS * std::mem::size_of::<f32>()) as i32;
            // a_pos
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(0, 3, glow::FLOAT, false, stride, 0);
            // a_uv
            gl.enable_vertex_attrib_array(1);
            gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, stride, 3 * 4);

            gl.bind_vertex_array(None);

            Ok(Self {
                vao,
                vbo,
                ebo,
                index_count: indices.len() as i32,
            })
        }
    }

    /// Draw with `program`, binding `textures[i]` to unit i / `u_texture{i}`
    pub fn draw(&self, gl: &glow::Context, program: &ShaderProgram, textures: &[&Texture]) {
        program.bind(gl);
        for (unit, texture) in textures.iter().enumerate() {
            texture.bind(gl, unit as u32);
            if let Some(location) = program.uniform(gl, &format!("u_texture{}", unit)) {
                unsafe {
                    gl.uniform_1_i32(Some(&location), unit as i32);
                }
            }
        }
        unsafe {
            gl.bind_vertex_array(Some(self.vao));
            gl.draw_elements(glow::TRIANGLES, self.index_count, glow::UNSIGNED_INT, 0);
            gl.bind_vertex_array(None);
        }
        for (unit, texture) in textures.iter().enumerate() {
            texture.unbind(gl, unit as u32);
        }
    }

    pub fn destroy(&self, gl: &glow::Context) {
        unsafe {
            gl.delete_vertex_array(self.vao);
            gl.delete_buffer(self.vbo);
            gl.delete_buffer(self.ebo);
        }
    }
}

impl GlResource for Plane {
    fn release(&self, gl: &glow::Context) {
        self.destroy(gl);
    }
}

/// View a plain-number slice as bytes
fn cast_slice<T: Copy>(slice: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const u8, std::mem::size_of_val(slice)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(data: &[f32; 20], i: usize) -> &[f32] {
        &data[i * VERTEX_FLOATS..(i + 1) * VERTEX_FLOATS]
    }

    #[test]
    fn test_inverted_plane_flips_only_v() {
        for i in 0..4 {
            let a = vertex(&PLANE_VERTICES, i);
            let b = vertex(&INVERTED_PLANE_VERTICES, i);
            assert_eq!(a[..4], b[..4]);
            assert_eq!(a[4], 1.0 - b[4]);
        }
    }

    #[test]
    fn test_top_edge_samples_first_row() {
        // Vertices at y = 1 (top) must sample v = 0 of an uploaded image
        for i in 0..4 {
            let v = vertex(&PLANE_VERTICES, i);
            if v[1] > 0.0 {
                assert_eq!(v[4], 0.0);
            }
        }
    }

    #[test]
    fn test_indices_reference_all_vertices() {
        for i in 0..4u32 {
            assert!(PLANE_INDICES.contains(&i));
        }
        assert!(PLANE_INDICES.iter().all(|&i| i < 4));
    }
}
