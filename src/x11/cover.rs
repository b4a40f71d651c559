//! Cover windows for secondary displays
//!
//! The lock window only spans the primary monitor. Every other monitor gets
//! an opaque override-redirect window painted with its captured region (or
//! a solid color) so the unlocked desktop never shows there.

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use log::{debug, info, warn};
use std::sync::Arc;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::xproto::{
    ChangeWindowAttributesAux, ConnectionExt as _, CreateGCAux, CreateWindowAux, Cursor,
    EventMask, ImageFormat, Window, WindowClass,
};
use x11rb::xcb_ffi::XCBConnection;

use super::capture::{rgba_to_zpixmap, PixelLayout};
use super::display::Display;
use super::monitor::Monitor;
use super::window::{raise, set_lock_properties};
use crate::config::{CoverConfig, CoverFailurePolicy};

/// Background of a cover window
pub enum CoverFill {
    /// Captured screen region, same size as the monitor
    Image(RgbaImage),
    /// 0x00RRGGBB
    Solid(u32),
}

/// One opaque window over a secondary monitor
pub struct CoverWindow {
    conn: Arc<XCBConnection>,
    window: Window,
}

impl CoverWindow {
    pub fn create(
        display: &Display,
        monitor: &Monitor,
        fill: &CoverFill,
        cursor: Cursor,
    ) -> Result<Self> {
        let conn = display.conn().clone();
        let screen = display.screen();

        let window = conn.generate_id()?;
        let background = match fill {
            CoverFill::Solid(pixel) => *pixel,
            CoverFill::Image(_) => screen.black_pixel,
        };
        let aux = CreateWindowAux::new()
            .background_pixel(background)
            .override_redirect(1)
            .cursor(cursor)
            .event_mask(EventMask::VISIBILITY_CHANGE);
        conn.create_window(
            screen.root_depth,
            window,
            screen.root,
            monitor.x,
            monitor.y,
            monitor.width,
            monitor.height,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &aux,
        )
        .with_context(|| format!("Failed to create cover window for {}", monitor.name))?;

        // From here on Drop destroys the window on any error
        let cover = Self { conn, window };
        set_lock_properties(
            &cover.conn,
            display.atoms(),
            window,
            monitor.width,
            monitor.height,
        )?;

        if let CoverFill::Image(image) = fill {
            cover.paint(display, image)?;
        }

        cover.conn.map_window(window)?;
        raise(&cover.conn, window)?;
        cover.conn.flush()?;

        info!(
            "Cover window 0x{:x} over {} ({}x{}+{}+{})",
            window, monitor.name, monitor.width, monitor.height, monitor.x, monitor.y
        );
        Ok(cover)
    }

    pub fn id(&self) -> Window {
        self.window
    }

    /// Upload `image` into a pixmap and make it the window background
    fn paint(&self, display: &Display, image: &RgbaImage) -> Result<()> {
        let conn = &self.conn;
        let screen = display.screen();
        let layout = PixelLayout::for_depth(conn.setup(), screen.root_depth)
            .ok_or_else(|| anyhow!("Root depth {} is not 32 bpp", screen.root_depth))?;

        let (width, height) = (image.width() as u16, image.height() as u16);
        let pixmap = conn.generate_id()?;
        conn.create_pixmap(screen.root_depth, pixmap, self.window, width, height)?;
        let gc = conn.generate_id()?;
        conn.create_gc(gc, pixmap, &CreateGCAux::new())?;

        let data = rgba_to_zpixmap(image, layout);
        let stride = width as usize * 4;
        // Leave room for the PutImage request header
        let max_bytes = conn.maximum_request_bytes().saturating_sub(64);
        let rows_per_request = (max_bytes / stride.max(1)).max(1);

        let result = (|| -> Result<()> {
            for (chunk, rows) in data.chunks(rows_per_request * stride).enumerate() {
                let y = chunk * rows_per_request;
                conn.put_image(
                    ImageFormat::Z_PIXMAP,
                    pixmap,
                    gc,
                    width,
                    (rows.len() / stride) as u16,
                    0,
                    y as i16,
                    0,
                    screen.root_depth,
                    rows,
                )?;
            }
            conn.change_window_attributes(
                self.window,
                &ChangeWindowAttributesAux::new().background_pixmap(pixmap),
            )?;
            conn.clear_area(false, self.window, 0, 0, 0, 0)?;
            Ok(())
        })();

        // The window keeps its own reference to the background
        let _ = conn.free_gc(gc);
        let _ = conn.free_pixmap(pixmap);
        result.context("Failed to paint cover window")?;

        debug!(
            "Cover 0x{:x} painted ({} rows per request)",
            self.window, rows_per_request
        );
        Ok(())
    }

    fn raise(&self) -> Result<()> {
        raise(&self.conn, self.window)?;
        self.conn.flush()?;
        Ok(())
    }
}

impl Drop for CoverWindow {
    fn drop(&mut self) {
        let _ = self.conn.destroy_window(self.window);
        let _ = self.conn.flush();
        debug!("Cover window 0x{:x} destroyed", self.window);
    }
}

/// Run `create` for every monitor, applying the failure policy.
///
/// With [`CoverFailurePolicy::Skip`] a failed monitor is logged and left
/// uncovered; with [`CoverFailurePolicy::Abort`] the first failure is
/// returned and the covers created so far are dropped.
pub fn cover_displays<T, F>(
    monitors: &[Monitor],
    policy: CoverFailurePolicy,
    mut create: F,
) -> Result<Vec<T>>
where
    F: FnMut(&Monitor) -> Result<T>,
{
    let mut covers = Vec::with_capacity(monitors.len());
    for monitor in monitors {
        match create(monitor) {
            Ok(cover) => covers.push(cover),
            Err(e) => match policy {
                CoverFailurePolicy::Skip => {
                    warn!("Display {} left uncovered: {:#}", monitor.name, e);
                }
                CoverFailurePolicy::Abort => {
                    return Err(e.context(format!("Failed to cover display {}", monitor.name)));
                }
            },
        }
    }
    Ok(covers)
}

/// Owns the cover windows of one session
pub struct CoverWindowManager {
    covers: Vec<CoverWindow>,
}

impl CoverWindowManager {
    /// Cover every monitor in `secondaries`.
    ///
    /// `region` yields the captured image for a monitor, if one is available.
    pub fn raise_all<R>(
        display: &Display,
        secondaries: &[Monitor],
        config: &CoverConfig,
        cursor: Cursor,
        mut region: R,
    ) -> Result<Self>
    where
        R: FnMut(&Monitor) -> Option<RgbaImage>,
    {
        let covers = cover_displays(secondaries, config.on_failure, |monitor| {
            let fill = if config.use_capture {
                region(monitor)
                    .map(CoverFill::Image)
                    .unwrap_or(CoverFill::Solid(config.color_pixel()))
            } else {
                CoverFill::Solid(config.color_pixel())
            };
            CoverWindow::create(display, monitor, &fill, cursor)
        })?;
        if !secondaries.is_empty() {
            info!("{}/{} secondary displays covered", covers.len(), secondaries.len());
        }
        Ok(Self { covers })
    }

    /// Raise `window` again if it is one of ours
    pub fn handle_obscured(&self, window: Window) -> Result<bool> {
        match self.covers.iter().find(|c| c.id() == window) {
            Some(cover) => {
                cover.raise()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Destroy every cover window
    pub fn destroy_all(&mut self) {
        if !self.covers.is_empty() {
            debug!("Destroying {} cover windows", self.covers.len());
        }
        self.covers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(name: &str, x: i16) -> Monitor {
        Monitor {
            name: name.to_string(),
            x,
            y: 0,
            width: 1920,
            height: 1080,
            primary: false,
        }
    }

    fn create(m: &Monitor) -> Result<String> {
        if m.name == "broken" {
            Err(anyhow!("BadAlloc"))
        } else {
            Ok(m.name.clone())
        }
    }

    #[test]
    fn test_skip_policy_degrades() {
        let monitors = vec![monitor("DP-1", 1920), monitor("broken", 3840), monitor("DP-3", 5760)];
        let covers = cover_displays(&monitors, CoverFailurePolicy::Skip, create).unwrap();
        assert_eq!(covers, vec!["DP-1", "DP-3"]);
    }

    #[test]
    fn test_abort_policy_fails() {
        let monitors = vec![monitor("DP-1", 1920), monitor("broken", 3840), monitor("DP-3", 5760)];
        let mut attempted = Vec::new();
        let err = cover_displays(&monitors, CoverFailurePolicy::Abort, |m| {
            attempted.push(m.name.clone());
            create(m)
        })
        .unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
        // Stops at the first failure
        assert_eq!(attempted, vec!["DP-1", "broken"]);
    }

    #[test]
    fn test_no_secondaries() {
        let covers = cover_displays(&[], CoverFailurePolicy::Abort, create).unwrap();
        assert!(covers.is_empty());
    }
}
