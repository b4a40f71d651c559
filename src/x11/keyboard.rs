//! xkb-backed key source
//!
//! Reads key events from the grabbed input connection and decodes them with
//! the server's current keymap. The xkb state is not `Send`, so the source
//! must be built on the thread that reads from it.
//!
//! After a reconnect the source owns the new connection's grab; the grab
//! taken at startup died with the old connection.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace};
use std::sync::Arc;
use x11rb::connection::Connection;
use x11rb::protocol::xkb::ConnectionExt as _;
use x11rb::protocol::Event;
use x11rb::xcb_ffi::XCBConnection;
use xkbcommon::xkb;
use zeroize::Zeroizing;

use super::display::connect_input;
use super::grab::X11Grab;
use crate::input::{GrabPolicy, InputError, InputEvent, InputGrab, KeyInput, KeySource};

pub struct XkbKeySource {
    conn: Arc<XCBConnection>,
    state: xkb::State,
    policy: GrabPolicy,
    grab: Option<InputGrab<X11Grab>>,
}

impl XkbKeySource {
    /// Read keys from `conn`, which must already hold the grab.
    /// `policy` is used to grab again after a reconnect.
    pub fn new(conn: Arc<XCBConnection>, policy: GrabPolicy) -> Result<Self> {
        let state = load_state(&conn)?;
        Ok(Self {
            conn,
            state,
            policy,
            grab: None,
        })
    }
}

/// xkb state for the core keyboard of `conn`
fn load_state(conn: &XCBConnection) -> Result<xkb::State> {
    let ext = conn
        .xkb_use_extension(1, 0)
        .context("XKB UseExtension request failed")?
        .reply()
        .context("XKB UseExtension failed")?;
    if !ext.supported {
        return Err(anyhow!(
            "XKB 1.0 not supported by server ({}.{})",
            ext.server_major,
            ext.server_minor
        ));
    }

    let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
    let device_id = xkb::x11::get_core_keyboard_device_id(conn);
    if device_id < 0 {
        return Err(anyhow!("No core keyboard device"));
    }
    let keymap = xkb::x11::keymap_new_from_device(
        &context,
        conn,
        device_id,
        xkb::KEYMAP_COMPILE_NO_FLAGS,
    );
    let state = xkb::x11::state_new_from_device(&keymap, conn, device_id);
    debug!("xkb keymap loaded for device {}", device_id);

    Ok(state)
}

impl KeySource for XkbKeySource {
    fn next_event(&mut self) -> Result<InputEvent, InputError> {
        let event = self
            .conn
            .wait_for_event()
            .map_err(|e| InputError::ConnectionLost(e.to_string()))?;

        match event {
            Event::KeyPress(e) => {
                let keycode = xkb::Keycode::new(e.detail as u32);
                let keysym = self.state.key_get_one_sym(keycode);
                let text = Zeroizing::new(self.state.key_get_utf8(keycode));
                self.state.update_key(keycode, xkb::KeyDirection::Down);
                let key = KeyInput::from_keysym(keysym.raw(), &text);
                trace!("Key press: keycode {}", e.detail);
                Ok(InputEvent::Key(key))
            }
            Event::KeyRelease(e) => {
                let keycode = xkb::Keycode::new(e.detail as u32);
                self.state.update_key(keycode, xkb::KeyDirection::Up);
                Ok(InputEvent::Ignored)
            }
            Event::Error(e) => {
                debug!("X11 error on input connection: {:?}", e);
                Ok(InputEvent::Ignored)
            }
            _ => Ok(InputEvent::Ignored),
        }
    }

    fn reconnect(&mut self) -> Result<(), InputError> {
        let failed = |e: anyhow::Error| InputError::ReconnectFailed(format!("{:#}", e));

        let (conn, root) = connect_input().map_err(failed)?;
        let grab = InputGrab::acquire_with_policy(X11Grab::new(conn.clone(), root), self.policy)
            .map_err(|e| InputError::ReconnectFailed(e.to_string()))?;
        let state = load_state(&conn).map_err(failed)?;

        self.conn = conn;
        self.state = state;
        self.grab = Some(grab);
        info!("Input connection re-established");
        Ok(())
    }
}
