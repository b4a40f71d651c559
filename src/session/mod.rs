//! Lock session
//!
//! - Cross-thread close flag, one-shot completion signal, OS interrupts
//! - Session state machine with exactly-once teardown
//! - The runner that drives a whole lock from capture to teardown

pub mod lifecycle;
pub mod runner;
pub mod signal;

pub use runner::{run, LockOptions};
pub use signal::CloseReason;
