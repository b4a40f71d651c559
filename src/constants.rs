//! Global constants for gllock
//!
//! Consolidates timing, rendering and X11 constants
//! to eliminate magic numbers throughout the codebase.

// ============================================================================
// Timing Constants
// ============================================================================

/// Inactivity after which a half-typed password is discarded (milliseconds)
pub const PASSWORD_TIMEOUT_MS: u64 = 2000;

/// Bytes reserved for the typed password; keys beyond it are dropped
pub const PASSWORD_CAPACITY: usize = 256;

/// Default frame rate cap for the render loop
pub const DEFAULT_MAX_FPS: u32 = 60;

/// Lowest accepted frame rate cap
pub const MIN_FPS: u32 = 1;

/// Highest accepted frame rate cap
pub const MAX_FPS: u32 = 240;

/// Upper bound on one idle sleep while waiting for the next frame (milliseconds)
pub const DEFAULT_IDLE_SLEEP_MS: u64 = 2;

/// Default number of all-or-nothing grab attempts
pub const DEFAULT_GRAB_ATTEMPTS: u32 = 5;

/// Default pause between grab attempts (milliseconds)
pub const DEFAULT_GRAB_RETRY_DELAY_MS: u64 = 100;

// ============================================================================
// Authentication
// ============================================================================

/// PAM service used when the config does not name one
pub const DEFAULT_PAM_SERVICE: &str = "login";

// ============================================================================
// X11
// ============================================================================

/// WM_NAME / _NET_WM_NAME of the lock and cover windows
pub const WINDOW_NAME: &str = "gllock";
