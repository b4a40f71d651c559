//! X11 keyboard/pointer grab backend

use log::debug;
use std::sync::Arc;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, EventMask, GrabMode, GrabStatus, Window};
use x11rb::xcb_ffi::XCBConnection;
use x11rb::{CURRENT_TIME, NONE};

use crate::input::grab::Device;
use crate::input::{GrabError, InputBackend};

/// Grabs on the root window of the input connection
pub struct X11Grab {
    conn: Arc<XCBConnection>,
    root: Window,
}

impl X11Grab {
    pub fn new(conn: Arc<XCBConnection>, root: Window) -> Self {
        Self { conn, root }
    }
}

fn request_error(device: Device, e: impl std::fmt::Display) -> GrabError {
    GrabError::Request {
        device,
        message: e.to_string(),
    }
}

fn check_status(device: Device, status: GrabStatus) -> Result<(), GrabError> {
    if status == GrabStatus::SUCCESS {
        debug!("{} grabbed", device);
        Ok(())
    } else {
        Err(GrabError::Denied {
            device,
            status: format!("{:?}", status),
        })
    }
}

impl InputBackend for X11Grab {
    fn grab_keyboard(&self) -> Result<(), GrabError> {
        let device = Device::Keyboard;
        let reply = self
            .conn
            .grab_keyboard(false, self.root, CURRENT_TIME, GrabMode::ASYNC, GrabMode::ASYNC)
            .map_err(|e| request_error(device, e))?
            .reply()
            .map_err(|e| request_error(device, e))?;
        check_status(device, reply.status)
    }

    fn grab_pointer(&self) -> Result<(), GrabError> {
        let device = Device::Pointer;
        let reply = self
            .conn
            .grab_pointer(
                false,
                self.root,
                EventMask::NO_EVENT,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                NONE,
                NONE,
                CURRENT_TIME,
            )
            .map_err(|e| request_error(device, e))?
            .reply()
            .map_err(|e| request_error(device, e))?;
        check_status(device, reply.status)
    }

    fn ungrab_keyboard(&self) {
        let _ = self.conn.ungrab_keyboard(CURRENT_TIME);
        let _ = self.conn.flush();
    }

    fn ungrab_pointer(&self) {
        let _ = self.conn.ungrab_pointer(CURRENT_TIME);
        let _ = self.conn.flush();
    }
}
