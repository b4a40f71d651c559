//! Session state machine
//!
//! ```text
//! Initializing ─▶ Grabbing ─▶ Active ─▶ Unlocking ─▶ Terminated
//!       │             │          │                      ▲
//!       └─────────────┴──────────┴──────────────────────┘
//! ```
//!
//! Any state may terminate. Teardown runs exactly once: the first
//! [`Lifecycle::terminate`] call runs it, later calls are no-ops.

use anyhow::{anyhow, Result};
use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Capturing the screen, creating the window and graphics context
    Initializing,
    /// Acquiring the keyboard/pointer grab
    Grabbing,
    /// Locked: covers raised, password task and render loop running
    Active,
    /// Password accepted, about to tear down
    Unlocking,
    /// Resources released
    Terminated,
}

impl SessionState {
    fn can_advance_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Initializing, SessionState::Grabbing)
                | (SessionState::Grabbing, SessionState::Active)
                | (SessionState::Active, SessionState::Unlocking)
        )
    }
}

pub struct Lifecycle {
    state: SessionState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Initializing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move forward along the normal path
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(anyhow!(
                "Invalid session transition {:?} -> {:?}",
                self.state,
                next
            ));
        }
        debug!("Session: {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Enter `Terminated`, running `teardown` if this is the first call.
    /// Returns true if teardown ran.
    pub fn terminate<F: FnOnce()>(&mut self, teardown: F) -> bool {
        if self.is_terminated() {
            return false;
        }
        info!("Session terminating (from {:?})", self.state);
        teardown();
        self.state = SessionState::Terminated;
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::signal::{CloseFlag, CloseReason};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_normal_path() {
        let mut lc = Lifecycle::new();
        assert_eq!(lc.state(), SessionState::Initializing);
        lc.advance(SessionState::Grabbing).unwrap();
        lc.advance(SessionState::Active).unwrap();
        lc.advance(SessionState::Unlocking).unwrap();
        assert!(lc.terminate(|| {}));
        assert!(lc.is_terminated());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut lc = Lifecycle::new();
        assert!(lc.advance(SessionState::Active).is_err());
        assert!(lc.advance(SessionState::Terminated).is_err());
        lc.advance(SessionState::Grabbing).unwrap();
        assert!(lc.advance(SessionState::Grabbing).is_err());
        assert_eq!(lc.state(), SessionState::Grabbing);
    }

    #[test]
    fn test_grab_failure_terminates_from_grabbing() {
        let mut lc = Lifecycle::new();
        lc.advance(SessionState::Grabbing).unwrap();
        let mut ran = 0;
        assert!(lc.terminate(|| ran += 1));
        assert_eq!(ran, 1);
        // Nothing can resume after termination
        assert!(lc.advance(SessionState::Active).is_err());
    }

    #[test]
    fn test_teardown_runs_once() {
        let mut lc = Lifecycle::new();
        let mut runs = 0;
        lc.terminate(|| runs += 1);
        lc.terminate(|| runs += 1);
        lc.terminate(|| runs += 1);
        assert_eq!(runs, 1);
    }

    #[test]
    fn test_concurrent_close_sources_single_teardown() {
        let close = CloseFlag::new();
        let barrier = Arc::new(Barrier::new(2));
        let sources: Vec<_> = [CloseReason::Unlocked, CloseReason::Interrupted]
            .into_iter()
            .map(|reason| {
                let close = close.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    close.request(reason)
                })
            })
            .collect();

        let mut lc = Lifecycle::new();
        lc.advance(SessionState::Grabbing).unwrap();
        lc.advance(SessionState::Active).unwrap();

        // Render loop: poll the flag, tear down when set
        let mut teardowns = 0;
        while !lc.is_terminated() {
            if close.is_set() {
                lc.terminate(|| teardowns += 1);
            }
            thread::yield_now();
        }
        let winners = sources
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        // Drop path calls terminate again
        lc.terminate(|| teardowns += 1);

        assert_eq!(winners, 1);
        assert_eq!(teardowns, 1);
    }
}
