//! Cross-thread termination signals
//!
//! - [`CloseFlag`]: shared "should close" flag read once per render-loop
//!   iteration. The first reason to be recorded wins.
//! - [`oneshot`]: single-value completion signal from the password task.
//! - OS interrupt handlers (SIGINT/SIGTERM/SIGHUP) that set the close flag.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, OnceLock};

/// Why the session is ending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseReason {
    /// Correct password entered
    Unlocked = 1,
    /// SIGINT / SIGTERM / SIGHUP
    Interrupted = 2,
    /// Windowing system asked the lock window to close
    WindowClosed = 3,
    /// Input event source failed
    InputFailed = 4,
}

impl CloseReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Unlocked),
            2 => Some(Self::Interrupted),
            3 => Some(Self::WindowClosed),
            4 => Some(Self::InputFailed),
            _ => None,
        }
    }
}

/// Shared "should close" flag
///
/// Each source sets it at most once and the render loop polls it, so relaxed
/// ordering is enough.
#[derive(Clone, Default)]
pub struct CloseFlag {
    reason: Arc<AtomicU8>,
}

impl CloseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a close request. Returns true if this was the first one.
    pub fn request(&self, reason: CloseReason) -> bool {
        self.reason
            .compare_exchange(0, reason as u8, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.reason.load(Ordering::Relaxed) != 0
    }

    /// Reason recorded by the first request
    pub fn reason(&self) -> Option<CloseReason> {
        CloseReason::from_u8(self.reason.load(Ordering::Relaxed))
    }
}

/// Sending half of a one-shot signal. Only the first `fire` is delivered.
pub struct OneShotSender<T> {
    fired: Arc<AtomicBool>,
    tx: SyncSender<T>,
}

impl<T> Clone for OneShotSender<T> {
    fn clone(&self) -> Self {
        Self {
            fired: self.fired.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T> OneShotSender<T> {
    /// Deliver `value` unless something was already fired. Returns true if delivered.
    pub fn fire(&self, value: T) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.try_send(value).is_ok()
    }
}

/// Receiving half of a one-shot signal. Yields at most one value.
pub struct OneShotReceiver<T> {
    rx: Receiver<T>,
    taken: bool,
}

impl<T> OneShotReceiver<T> {
    /// Non-blocking take
    pub fn try_take(&mut self) -> Option<T> {
        if self.taken {
            return None;
        }
        let value = self.rx.try_recv().ok()?;
        self.taken = true;
        Some(value)
    }

    /// Block until the value arrives or every sender is gone
    #[cfg(test)]
    pub fn wait(mut self) -> Option<T> {
        if self.taken {
            return None;
        }
        self.taken = true;
        self.rx.recv().ok()
    }
}

/// Create a one-shot signal
pub fn oneshot<T>() -> (OneShotSender<T>, OneShotReceiver<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (
        OneShotSender {
            fired: Arc::new(AtomicBool::new(false)),
            tx,
        },
        OneShotReceiver { rx, taken: false },
    )
}

/// Close flag targeted by the OS signal handler
static INTERRUPT_TARGET: OnceLock<Arc<AtomicU8>> = OnceLock::new();

/// Route SIGINT, SIGTERM and SIGHUP to `flag` (call once at startup)
pub fn install_interrupt_handlers(flag: &CloseFlag) {
    let _ = INTERRUPT_TARGET.set(flag.reason.clone());
    unsafe {
        libc::signal(
            libc::SIGINT,
            interrupt_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            interrupt_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGHUP,
            interrupt_signal_handler as *const () as libc::sighandler_t,
        );
    }
}

extern "C" fn interrupt_signal_handler(_signo: libc::c_int) {
    if let Some(reason) = INTERRUPT_TARGET.get() {
        let _ = reason.compare_exchange(
            0,
            CloseReason::Interrupted as u8,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }
}
