//! Root window capture
//!
//! Reads the whole root window as a ZPixmap and converts it to RGBA. Only
//! 32 bits-per-pixel TrueColor formats (depth 24/32) are supported.

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use log::info;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat, ImageOrder, Setup};

use super::display::Display;
use crate::capture::{CaptureScope, ScreenCapture, Snapshot};

/// Byte layout of a 32-bpp ZPixmap pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// LSB first: B, G, R, X
    Bgrx,
    /// MSB first: X, R, G, B
    Xrgb,
}

impl PixelLayout {
    /// Layout of `depth` images on this server, if it is 32 bpp
    pub fn for_depth(setup: &Setup, depth: u8) -> Option<Self> {
        let format = setup.pixmap_formats.iter().find(|f| f.depth == depth)?;
        if format.bits_per_pixel != 32 {
            return None;
        }
        Some(if setup.image_byte_order == ImageOrder::MSB_FIRST {
            PixelLayout::Xrgb
        } else {
            PixelLayout::Bgrx
        })
    }
}

/// Convert 32-bpp ZPixmap data to opaque RGBA
pub fn zpixmap_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
) -> Option<RgbaImage> {
    let len = width as usize * height as usize * 4;
    let data = data.get(..len)?;
    let mut rgba = Vec::with_capacity(len);
    for px in data.chunks_exact(4) {
        let (r, g, b) = match layout {
            PixelLayout::Bgrx => (px[2], px[1], px[0]),
            PixelLayout::Xrgb => (px[1], px[2], px[3]),
        };
        rgba.extend_from_slice(&[r, g, b, 0xff]);
    }
    RgbaImage::from_raw(width, height, rgba)
}

/// Convert RGBA to 32-bpp ZPixmap data (alpha dropped)
pub fn rgba_to_zpixmap(image: &RgbaImage, layout: PixelLayout) -> Vec<u8> {
    let mut out = Vec::with_capacity(image.as_raw().len());
    for px in image.pixels() {
        let [r, g, b, _] = px.0;
        match layout {
            PixelLayout::Bgrx => out.extend_from_slice(&[b, g, r, 0]),
            PixelLayout::Xrgb => out.extend_from_slice(&[0, r, g, b]),
        }
    }
    out
}

/// Captures the current root window contents
pub struct RootWindowCapture<'a> {
    display: &'a Display,
}

impl<'a> RootWindowCapture<'a> {
    pub fn new(display: &'a Display) -> Self {
        Self { display }
    }
}

impl ScreenCapture for RootWindowCapture<'_> {
    fn capture(&self) -> Result<Snapshot> {
        let conn = self.display.conn();
        let screen = self.display.screen();
        let (width, height) = (screen.width_in_pixels, screen.height_in_pixels);

        let reply = conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                screen.root,
                0,
                0,
                width,
                height,
                u32::MAX,
            )
            .context("GetImage request failed")?
            .reply()
            .context("Failed to read root window")?;

        let layout = PixelLayout::for_depth(conn.setup(), reply.depth)
            .ok_or_else(|| anyhow!("Unsupported root window depth {}", reply.depth))?;
        let image = zpixmap_to_rgba(&reply.data, width as u32, height as u32, layout)
            .ok_or_else(|| anyhow!("Short GetImage reply ({} bytes)", reply.data.len()))?;

        info!("Captured root window: {}x{}", width, height);
        Ok(Snapshot {
            image,
            scope: CaptureScope::RootWindow,
        })
    }
}
