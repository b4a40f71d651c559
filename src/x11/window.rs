//! Fullscreen lock window
//!
//! Override-redirect window placed over the primary monitor. It carries the
//! EGL surface, so it is created with the visual chosen by the EGL config.

use anyhow::{Context, Result};
use log::{debug, info};
use std::sync::Arc;
use x11rb::connection::Connection;
use x11rb::properties::WmSizeHints;
use x11rb::protocol::xproto::{
    AtomEnum, ColormapAlloc, ConfigureWindowAux, ConnectionExt as _, CreateWindowAux, Cursor,
    EventMask, PropMode, Screen, StackMode, Visibility, Visualid, Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::xcb_ffi::XCBConnection;

use super::display::{Atoms, Display};
use super::monitor::Monitor;
use crate::constants::WINDOW_NAME;

/// What a window event means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// WM_DELETE_WINDOW or the lock window was destroyed
    CloseRequested,
    /// A window became (partially) obscured and must be raised again
    Obscured(Window),
    Other,
}

/// Classify an event read from the display connection
pub fn classify_event(event: &Event, atoms: &Atoms, lock: Window) -> WindowEvent {
    match event {
        Event::ClientMessage(e)
            if e.window == lock
                && e.format == 32
                && e.type_ == atoms.WM_PROTOCOLS
                && e.data.as_data32()[0] == atoms.WM_DELETE_WINDOW =>
        {
            WindowEvent::CloseRequested
        }
        Event::DestroyNotify(e) if e.window == lock => WindowEvent::CloseRequested,
        Event::VisibilityNotify(e) if e.state != Visibility::UNOBSCURED => {
            WindowEvent::Obscured(e.window)
        }
        _ => WindowEvent::Other,
    }
}

/// Depth of `visual` on `screen`, if the screen supports it
fn visual_depth(screen: &Screen, visual: Visualid) -> Option<u8> {
    screen
        .allowed_depths
        .iter()
        .find(|d| d.visuals.iter().any(|v| v.visual_id == visual))
        .map(|d| d.depth)
}

/// Name, close protocol, fullscreen/above state and fixed size hints
pub(super) fn set_lock_properties(
    conn: &XCBConnection,
    atoms: &Atoms,
    window: Window,
    width: u16,
    height: u16,
) -> Result<()> {
    conn.change_property8(
        PropMode::REPLACE,
        window,
        AtomEnum::WM_NAME,
        AtomEnum::STRING,
        WINDOW_NAME.as_bytes(),
    )?;
    conn.change_property8(
        PropMode::REPLACE,
        window,
        atoms._NET_WM_NAME,
        atoms.UTF8_STRING,
        WINDOW_NAME.as_bytes(),
    )?;
    conn.change_property32(
        PropMode::REPLACE,
        window,
        atoms.WM_PROTOCOLS,
        AtomEnum::ATOM,
        &[atoms.WM_DELETE_WINDOW],
    )?;
    conn.change_property32(
        PropMode::REPLACE,
        window,
        atoms._NET_WM_STATE,
        AtomEnum::ATOM,
        &[atoms._NET_WM_STATE_FULLSCREEN, atoms._NET_WM_STATE_ABOVE],
    )?;

    let mut hints = WmSizeHints::new();
    let size = (width as i32, height as i32);
    hints.min_size = Some(size);
    hints.max_size = Some(size);
    hints
        .set_normal_hints(conn, window)
        .context("Failed to set size hints")?;
    Ok(())
}

/// Stack `window` above every other window
pub(super) fn raise(conn: &XCBConnection, window: Window) -> Result<()> {
    conn.configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
    Ok(())
}

/// Primary lock surface
pub struct LockWindow {
    conn: Arc<XCBConnection>,
    window: Window,
    colormap: u32,
    monitor: Monitor,
    mapped: bool,
}

impl LockWindow {
    /// Create (but do not map) the lock window over `monitor`.
    ///
    /// `visual` is the EGL config's native visual; 0 means the root visual.
    pub fn create(
        display: &Display,
        monitor: &Monitor,
        visual: Visualid,
        cursor: Cursor,
    ) -> Result<Self> {
        let conn = display.conn().clone();
        let screen = display.screen();

        let (visual, depth) = match visual_depth(screen, visual) {
            Some(depth) if visual != 0 => (visual, depth),
            _ => (screen.root_visual, screen.root_depth),
        };

        let colormap = conn.generate_id()?;
        conn.create_colormap(ColormapAlloc::NONE, colormap, screen.root, visual)
            .context("Failed to create colormap")?;

        let window = conn.generate_id()?;
        let aux = CreateWindowAux::new()
            .background_pixel(screen.black_pixel)
            .border_pixel(screen.black_pixel)
            .override_redirect(1)
            .colormap(colormap)
            .cursor(cursor)
            .event_mask(
                EventMask::EXPOSURE | EventMask::VISIBILITY_CHANGE | EventMask::STRUCTURE_NOTIFY,
            );
        conn.create_window(
            depth,
            window,
            screen.root,
            monitor.x,
            monitor.y,
            monitor.width,
            monitor.height,
            0,
            WindowClass::INPUT_OUTPUT,
            visual,
            &aux,
        )
        .context("Failed to create lock window")?;

        set_lock_properties(&conn, display.atoms(), window, monitor.width, monitor.height)?;
        conn.flush()?;

        info!(
            "Lock window 0x{:x}: {}x{}+{}+{} (visual 0x{:x}, depth {})",
            window, monitor.width, monitor.height, monitor.x, monitor.y, visual, depth
        );

        Ok(Self {
            conn,
            window,
            colormap,
            monitor: monitor.clone(),
            mapped: false,
        })
    }

    pub fn id(&self) -> Window {
        self.window
    }

    pub fn size(&self) -> (u32, u32) {
        (self.monitor.width as u32, self.monitor.height as u32)
    }

    /// Map, move into place and raise
    pub fn map(&mut self) -> Result<()> {
        self.conn.map_window(self.window)?;
        // Some window managers move the window after mapping
        self.conn.configure_window(
            self.window,
            &ConfigureWindowAux::new()
                .x(self.monitor.x as i32)
                .y(self.monitor.y as i32)
                .stack_mode(StackMode::ABOVE),
        )?;
        self.conn.flush()?;
        self.mapped = true;
        debug!("Lock window mapped");
        Ok(())
    }

    pub fn raise(&self) -> Result<()> {
        raise(&self.conn, self.window)?;
        self.conn.flush()?;
        Ok(())
    }
}

impl Drop for LockWindow {
    fn drop(&mut self) {
        if self.mapped {
            let _ = self.conn.unmap_window(self.window);
        }
        let _ = self.conn.destroy_window(self.window);
        let _ = self.conn.free_colormap(self.colormap);
        let _ = self.conn.flush();
        debug!("Lock window destroyed");
    }
}
