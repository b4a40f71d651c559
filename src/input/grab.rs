//! Exclusive input grab
//!
//! [`InputGrab`] owns the keyboard and pointer grabs for the lifetime of the
//! lock. Acquisition is all-or-nothing: if the pointer is denied after the
//! keyboard was taken, the keyboard grab is released before the error is
//! returned. Dropping the value releases both grabs.

use log::{debug, info, warn};
use std::time::Duration;
use thiserror::Error;

use crate::config::GrabConfig;

/// Device whose grab was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Keyboard,
    Pointer,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Keyboard => write!(f, "keyboard"),
            Device::Pointer => write!(f, "pointer"),
        }
    }
}

/// Grab failure
#[derive(Debug, Error)]
pub enum GrabError {
    /// Another client holds the device, or the server refused the grab
    #[error("could not grab {device}: {status}")]
    Denied { device: Device, status: String },
    /// The grab request itself failed
    #[error("error grabbing {device}: {message}")]
    Request { device: Device, message: String },
}

/// Windowing-system side of a grab
///
/// Release calls must be safe to issue for a device that is not grabbed.
pub trait InputBackend {
    fn grab_keyboard(&self) -> Result<(), GrabError>;
    fn grab_pointer(&self) -> Result<(), GrabError>;
    fn ungrab_keyboard(&self);
    fn ungrab_pointer(&self);
}

impl<B: InputBackend + ?Sized> InputBackend for &B {
    fn grab_keyboard(&self) -> Result<(), GrabError> {
        (**self).grab_keyboard()
    }

    fn grab_pointer(&self) -> Result<(), GrabError> {
        (**self).grab_pointer()
    }

    fn ungrab_keyboard(&self) {
        (**self).ungrab_keyboard()
    }

    fn ungrab_pointer(&self) {
        (**self).ungrab_pointer()
    }
}

/// Retry policy for [`InputGrab::acquire_with_policy`]
#[derive(Debug, Clone, Copy)]
pub struct GrabPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl From<&GrabConfig> for GrabPolicy {
    fn from(cfg: &GrabConfig) -> Self {
        Self {
            attempts: cfg.attempts,
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }
}

/// Held keyboard + pointer grab
pub struct InputGrab<B: InputBackend> {
    backend: B,
    held: bool,
}

impl<B: InputBackend> InputGrab<B> {
    /// Grab keyboard then pointer, rolling back the keyboard on failure
    fn try_grab(backend: &B) -> Result<(), GrabError> {
        backend.grab_keyboard()?;
        if let Err(e) = backend.grab_pointer() {
            backend.ungrab_keyboard();
            debug!("Keyboard grab rolled back after pointer failure");
            return Err(e);
        }
        Ok(())
    }

    /// Take both grabs, trying up to `policy.attempts` times.
    ///
    /// A key held down while the locker starts (e.g. the hotkey that launched
    /// it) makes the server refuse the first grab, so a short retry helps.
    pub fn acquire_with_policy(backend: B, policy: GrabPolicy) -> Result<Self, GrabError> {
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::try_grab(&backend) {
                Ok(()) => {
                    info!("Keyboard and pointer grabbed");
                    return Ok(Self {
                        backend,
                        held: true,
                    });
                }
                Err(e) if attempt < attempts => {
                    warn!("Grab attempt {}/{} failed: {}", attempt, attempts, e);
                    std::thread::sleep(policy.retry_delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Release both grabs (idempotent)
    pub fn release(&mut self) {
        if !self.is_held() {
            return;
        }
        self.backend.ungrab_pointer();
        self.backend.ungrab_keyboard();
        self.held = false;
        info!("Input grab released");
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl<B: InputBackend> Drop for InputGrab<B> {
    fn drop(&mut self) {
        self.release();
    }
}
