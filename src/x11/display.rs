//! X server connection
//!
//! Two connections are used per session:
//! - the display connection owns the lock/cover windows, the EGL surface and
//!   the window events pumped by the render loop
//! - the input connection owns the grabs and is read by the password task

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::ffi::c_void;
use std::sync::Arc;
use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::{ConnectionExt as _, Cursor, Screen, Window};
use x11rb::protocol::Event;
use x11rb::xcb_ffi::XCBConnection;

use super::monitor::Monitor;

x11rb::atom_manager! {
    /// Atoms used by the lock and cover windows
    pub Atoms: AtomsCookie {
        WM_PROTOCOLS,
        WM_DELETE_WINDOW,
        _NET_WM_NAME,
        _NET_WM_STATE,
        _NET_WM_STATE_FULLSCREEN,
        _NET_WM_STATE_ABOVE,
        UTF8_STRING,
    }
}

/// Open an XCB connection to $DISPLAY
fn connect() -> Result<(XCBConnection, usize)> {
    XCBConnection::connect(None).context("Failed to connect to X server")
}

/// Display connection
pub struct Display {
    conn: Arc<XCBConnection>,
    screen_num: usize,
    atoms: Atoms,
}

impl Display {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = connect()?;
        let atoms = Atoms::new(&conn)
            .context("Failed to intern atoms")?
            .reply()
            .context("Failed to intern atoms")?;
        let display = Self {
            conn: Arc::new(conn),
            screen_num,
            atoms,
        };
        let screen = display.screen();
        info!(
            "X11 display connected: screen {} ({}x{}, depth {})",
            screen_num, screen.width_in_pixels, screen.height_in_pixels, screen.root_depth
        );
        Ok(display)
    }

    pub fn conn(&self) -> &Arc<XCBConnection> {
        &self.conn
    }

    pub fn screen_num(&self) -> usize {
        self.screen_num
    }

    pub fn screen(&self) -> &Screen {
        &self.conn.setup().roots[self.screen_num]
    }

    pub fn root(&self) -> Window {
        self.screen().root
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    /// Raw `xcb_connection_t*` for EGL
    pub fn raw_xcb_connection(&self) -> *mut c_void {
        self.conn.get_raw_xcb_connection()
    }

    /// Connected monitors from RandR, or one monitor covering the root window
    pub fn monitors(&self) -> Vec<Monitor> {
        match self.randr_monitors() {
            Ok(monitors) if !monitors.is_empty() => monitors,
            Ok(_) => {
                warn!("RandR reported no monitors, using the root window");
                vec![self.root_monitor()]
            }
            Err(e) => {
                warn!("RandR unavailable ({:#}), using the root window", e);
                vec![self.root_monitor()]
            }
        }
    }

    fn root_monitor(&self) -> Monitor {
        let screen = self.screen();
        Monitor::root(screen.width_in_pixels, screen.height_in_pixels)
    }

    fn randr_monitors(&self) -> Result<Vec<Monitor>> {
        let version = self.conn.randr_query_version(1, 5)?.reply()?;
        if (version.major_version, version.minor_version) < (1, 5) {
            return Err(anyhow!(
                "RandR {}.{} has no monitor list",
                version.major_version,
                version.minor_version
            ));
        }
        let reply = self.conn.randr_get_monitors(self.root(), true)?.reply()?;
        let mut monitors = Vec::with_capacity(reply.monitors.len());
        for info in reply.monitors {
            let name = self
                .conn
                .get_atom_name(info.name)?
                .reply()
                .map(|r| String::from_utf8_lossy(&r.name).into_owned())
                .unwrap_or_else(|_| format!("monitor-{}", info.name));
            debug!(
                "Monitor {}: {}x{}+{}+{}{}",
                name,
                info.width,
                info.height,
                info.x,
                info.y,
                if info.primary { " (primary)" } else { "" }
            );
            monitors.push(Monitor {
                name,
                x: info.x,
                y: info.y,
                width: info.width,
                height: info.height,
                primary: info.primary,
            });
        }
        Ok(monitors)
    }

    /// Fully transparent 1x1 cursor
    pub fn invisible_cursor(&self) -> Result<Cursor> {
        let pixmap = self.conn.generate_id()?;
        self.conn.create_pixmap(1, pixmap, self.root(), 1, 1)?;
        let cursor = self.conn.generate_id()?;
        self.conn
            .create_cursor(cursor, pixmap, pixmap, 0, 0, 0, 0, 0, 0, 0, 0)?;
        self.conn.free_pixmap(pixmap)?;
        Ok(cursor)
    }

    pub fn free_cursor(&self, cursor: Cursor) {
        let _ = self.conn.free_cursor(cursor);
        let _ = self.conn.flush();
        debug!("Cursor 0x{:x} freed", cursor);
    }

    /// Drain pending events without blocking
    pub fn poll_events(&self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(event) = self
            .conn
            .poll_for_event()
            .context("X11 display connection lost")?
        {
            events.push(event);
        }
        Ok(events)
    }
}

/// Separate connection for the input grab and key events
pub fn connect_input() -> Result<(Arc<XCBConnection>, Window)> {
    let (conn, screen_num) = connect()?;
    let root = conn.setup().roots[screen_num].root;
    debug!("X11 input connection opened");
    Ok((Arc::new(conn), root))
}
