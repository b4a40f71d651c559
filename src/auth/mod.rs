//! Password entry and credential verification
//!
//! - Password state machine with inactivity timeout
//! - PAM-backed credential oracle

pub mod pam;
pub mod password;

pub use pam::PamAuthenticator;
pub use password::{run_matcher, MatcherExit, PasswordStateMachine};

/// Credential oracle for the current user
///
/// A single synchronous yes/no answer; no retries, no retained state.
pub trait Authenticator {
    fn verify(&self, secret: &str) -> bool;
}
