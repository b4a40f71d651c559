//! Input handling
//!
//! Backend-independent pieces of the lock's input path:
//! - Decoded key model consumed by the password state machine
//! - All-or-nothing exclusive keyboard/pointer grab

pub mod grab;
pub mod keys;

pub use grab::{GrabError, GrabPolicy, InputBackend, InputGrab};
pub use keys::{InputError, InputEvent, KeyInput, KeySource};
