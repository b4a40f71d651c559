//! X11 windowing backend
//!
//! Display connection, monitor enumeration, lock and cover windows, the
//! keyboard/pointer grab, xkb key decoding and root window capture.

pub mod capture;
pub mod cover;
pub mod display;
pub mod grab;
pub mod keyboard;
pub mod monitor;
pub mod window;

pub use capture::RootWindowCapture;
pub use cover::CoverWindowManager;
pub use display::{connect_input, Display};
pub use grab::X11Grab;
pub use keyboard::XkbKeySource;
pub use monitor::{split_primary, Monitor};
pub use window::{classify_event, LockWindow, WindowEvent};
