//! Password state machine
//!
//! Consumes decoded key presses, keeps the typed secret in a buffer that is
//! wiped after an inactivity timeout, and asks the [`Authenticator`] when the
//! user submits.
//!
//! ```text
//! Idle ──char──▶ Typing ──Enter──▶ Submitting ──ok──▶ (unlock)
//!  ▲               │                    │
//!  └──timeout/Esc──┘◀────── rejected ───┘
//! ```

use log::{debug, error, info, trace, warn};
use std::time::{Duration, Instant};
use zeroize::{Zeroize, Zeroizing};

use super::Authenticator;
use crate::config::InputErrorPolicy;
use crate::constants::PASSWORD_CAPACITY;
use crate::input::{InputEvent, KeyInput, KeySource};
use crate::session::signal::{CloseFlag, OneShotSender};

/// Entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordState {
    /// Buffer empty
    Idle,
    /// Buffer holds typed characters
    Typing,
    /// Verification in progress
    Submitting,
}

/// Result of feeding one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep listening
    Continue,
    /// Credentials verified
    Unlocked,
}

/// Typed secret with the time of the last key press
struct PasswordBuffer {
    contents: Zeroizing<String>,
    last_input: Instant,
}

impl PasswordBuffer {
    fn new(now: Instant) -> Self {
        Self {
            contents: Zeroizing::new(String::with_capacity(PASSWORD_CAPACITY)),
            last_input: now,
        }
    }

    fn clear(&mut self) {
        self.contents.zeroize();
    }

    /// Append `c` unless that would grow the allocation. A reallocation
    /// would free the old bytes without wiping them.
    fn push(&mut self, c: char) -> bool {
        if self.contents.len() + c.len_utf8() > self.contents.capacity() {
            return false;
        }
        self.contents.push(c);
        true
    }

    fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_input) > timeout
    }
}

/// Password state machine, owned by the matcher task
pub struct PasswordStateMachine<A: Authenticator> {
    buffer: PasswordBuffer,
    state: PasswordState,
    timeout: Duration,
    authenticator: A,
    /// Log buffer contents at debug level
    log_secrets: bool,
}

impl<A: Authenticator> PasswordStateMachine<A> {
    pub fn new(authenticator: A, timeout: Duration, now: Instant) -> Self {
        Self {
            buffer: PasswordBuffer::new(now),
            state: PasswordState::Idle,
            timeout,
            authenticator,
            log_secrets: false,
        }
    }

    /// Opt in to logging typed contents at debug level
    pub fn with_secret_logging(mut self, enabled: bool) -> Self {
        self.log_secrets = enabled;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> PasswordState {
        self.state
    }

    /// Number of typed characters
    pub fn len(&self) -> usize {
        self.buffer.contents.chars().count()
    }

    /// Feed one key press received at `now`
    pub fn handle_key(&mut self, key: KeyInput, now: Instant) -> Outcome {
        // A stale secret is discarded before the new key is applied
        if self.buffer.is_stale(now, self.timeout) && !self.buffer.contents.is_empty() {
            debug!("Timeout reached, clearing password");
            self.reset();
        }
        self.buffer.last_input = now;

        match key {
            KeyInput::Char(c) => {
                if self.buffer.push(c) {
                    self.set_state(PasswordState::Typing);
                } else {
                    trace!("Password buffer full, key dropped");
                }
            }
            KeyInput::Backspace => {
                self.buffer.contents.pop();
                if self.buffer.contents.is_empty() {
                    self.set_state(PasswordState::Idle);
                }
            }
            KeyInput::Clear => self.reset(),
            KeyInput::Submit => return self.submit(),
            KeyInput::Other => {}
        }

        self.trace_buffer();
        Outcome::Continue
    }

    /// Hand the buffer to the authenticator; the buffer is empty afterwards
    fn submit(&mut self) -> Outcome {
        self.set_state(PasswordState::Submitting);
        debug!("Checking password");
        let verified = self.authenticator.verify(&self.buffer.contents);
        self.reset();
        if verified {
            info!("Password accepted");
            Outcome::Unlocked
        } else {
            debug!("Password does not match");
            Outcome::Continue
        }
    }

    /// Drop whatever was typed so far
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.set_state(PasswordState::Idle);
    }

    fn set_state(&mut self, state: PasswordState) {
        if self.state != state {
            trace!("Password state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn trace_buffer(&self) {
        if self.log_secrets {
            debug!("Current password: {}", self.buffer.contents.as_str());
        } else {
            trace!("Password length: {}", self.len());
        }
    }
}

/// How the matcher task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherExit {
    /// Correct password; unlock signal fired
    Unlocked,
    /// Input source failed and could not be restored; signal fired
    InputFailed,
    /// The session was closed by another source
    Cancelled,
}

/// Blocking password-matching loop
///
/// Runs until the password is verified, the input source fails for good, or
/// `close` is set by another source. Completion is reported through `done`,
/// which fires at most once.
///
/// With [`InputErrorPolicy::Reconnect`] a failed source gets one
/// [`KeySource::reconnect`] per failure; the typed buffer is dropped since
/// keys may have gone elsewhere while the grab was gone.
pub fn run_matcher<S, A, C>(
    source: &mut S,
    machine: &mut PasswordStateMachine<A>,
    mut now: C,
    done: &OneShotSender<MatcherExit>,
    close: &CloseFlag,
    on_error: InputErrorPolicy,
) -> MatcherExit
where
    S: KeySource,
    A: Authenticator,
    C: FnMut() -> Instant,
{
    loop {
        let event = source.next_event();
        if close.is_set() {
            debug!("Session closing, password matcher stops");
            return MatcherExit::Cancelled;
        }
        match event {
            Ok(InputEvent::Key(key)) => {
                if machine.handle_key(key, now()) == Outcome::Unlocked {
                    done.fire(MatcherExit::Unlocked);
                    return MatcherExit::Unlocked;
                }
            }
            Ok(InputEvent::Ignored) => {}
            Err(e) => {
                error!("Input source failed: {}", e);
                if on_error == InputErrorPolicy::Reconnect {
                    machine.reset();
                    match source.reconnect() {
                        Ok(()) => {
                            warn!("Input source reconnected, grab restored");
                            continue;
                        }
                        Err(e) => error!("{}", e),
                    }
                }
                done.fire(MatcherExit::InputFailed);
                return MatcherExit::InputFailed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputError;
    use crate::session::signal::oneshot;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Authenticator that records every secret it was asked about
    #[derive(Clone)]
    struct RecordingAuth {
        password: &'static str,
        seen: Rc<RefCell<Vec<String>>>,
    }

    impl RecordingAuth {
        fn new(password: &'static str) -> Self {
            Self {
                password,
                seen: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.borrow().clone()
        }
    }

    impl Authenticator for RecordingAuth {
        fn verify(&self, secret: &str) -> bool {
            self.seen.borrow_mut().push(secret.to_string());
            secret == self.password
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn type_str<A: Authenticator>(
        sm: &mut PasswordStateMachine<A>,
        s: &str,
        start: Instant,
        gap: Duration,
    ) -> Instant {
        let mut t = start;
        for c in s.chars() {
            t += gap;
            assert_eq!(sm.handle_key(KeyInput::Char(c), t), Outcome::Continue);
        }
        t
    }

    #[test]
    fn test_append_and_backspace() {
        let t0 = Instant::now();
        let auth = RecordingAuth::new("ac");
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, t0);
        assert_eq!(sm.state(), PasswordState::Idle);

        let t = type_str(&mut sm, "abc", t0, ms(100));
        assert_eq!(sm.state(), PasswordState::Typing);
        assert_eq!(sm.len(), 3);

        sm.handle_key(KeyInput::Backspace, t + ms(100));
        sm.handle_key(KeyInput::Backspace, t + ms(200));
        sm.handle_key(KeyInput::Char('c'), t + ms(300));
        assert_eq!(
            sm.handle_key(KeyInput::Submit, t + ms(400)),
            Outcome::Unlocked
        );
        assert_eq!(auth.seen(), vec!["ac"]);
    }

    #[test]
    fn test_backspace_on_empty_buffer() {
        let t0 = Instant::now();
        let mut sm = PasswordStateMachine::new(RecordingAuth::new("x"), TIMEOUT, t0);
        sm.handle_key(KeyInput::Backspace, t0 + ms(10));
        assert_eq!(sm.len(), 0);
        assert_eq!(sm.state(), PasswordState::Idle);
        sm.handle_key(KeyInput::Char('x'), t0 + ms(20));
        sm.handle_key(KeyInput::Backspace, t0 + ms(30));
        assert_eq!(sm.state(), PasswordState::Idle);
    }

    #[test]
    fn test_timeout_clears_before_applying_key() {
        let t0 = Instant::now();
        let mut sm = PasswordStateMachine::new(RecordingAuth::new("x"), TIMEOUT, t0);
        let t = type_str(&mut sm, "secret", t0, ms(10));
        sm.handle_key(KeyInput::Char('z'), t + ms(2001));
        assert_eq!(sm.len(), 1);
        // Backspace after timeout acts on the empty buffer
        sm.handle_key(KeyInput::Backspace, t + ms(5000));
        assert_eq!(sm.len(), 0);
    }

    #[test]
    fn test_exactly_timeout_is_not_stale() {
        let t0 = Instant::now();
        let mut sm = PasswordStateMachine::new(RecordingAuth::new("x"), TIMEOUT, t0);
        let t = type_str(&mut sm, "ab", t0, ms(10));
        sm.handle_key(KeyInput::Char('c'), t + TIMEOUT);
        assert_eq!(sm.len(), 3);
    }

    #[test]
    fn test_non_text_keys_refresh_timestamp() {
        let t0 = Instant::now();
        let mut sm = PasswordStateMachine::new(RecordingAuth::new("x"), TIMEOUT, t0);
        let t = type_str(&mut sm, "ab", t0, ms(10));
        sm.handle_key(KeyInput::Other, t + ms(1500));
        sm.handle_key(KeyInput::Char('c'), t + ms(3000));
        assert_eq!(sm.len(), 3);
    }

    #[test]
    fn test_escape_clears() {
        let t0 = Instant::now();
        let auth = RecordingAuth::new("b");
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, t0);
        let t = type_str(&mut sm, "aaa", t0, ms(10));
        sm.handle_key(KeyInput::Clear, t + ms(10));
        assert_eq!(sm.state(), PasswordState::Idle);
        sm.handle_key(KeyInput::Char('b'), t + ms(20));
        assert_eq!(sm.handle_key(KeyInput::Submit, t + ms(30)), Outcome::Unlocked);
        assert_eq!(auth.seen(), vec!["b"]);
    }

    #[test]
    fn test_wrong_password_returns_to_idle() {
        let t0 = Instant::now();
        let auth = RecordingAuth::new("right");
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, t0);
        let t = type_str(&mut sm, "wrong", t0, ms(50));
        assert_eq!(sm.handle_key(KeyInput::Submit, t + ms(50)), Outcome::Continue);
        assert_eq!(sm.state(), PasswordState::Idle);
        assert_eq!(sm.len(), 0);

        let t = type_str(&mut sm, "right", t + ms(50), ms(50));
        assert_eq!(sm.handle_key(KeyInput::Submit, t + ms(50)), Outcome::Unlocked);
        assert_eq!(sm.len(), 0);
        assert_eq!(auth.seen(), vec!["wrong", "right"]);
    }

    #[test]
    fn test_net_effect_of_key_sequence() {
        // Gaps stay under the timeout, so the buffer is the net effect of all edits
        let t0 = Instant::now();
        let auth = RecordingAuth::new("");
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, t0);
        let keys = [
            KeyInput::Char('h'),
            KeyInput::Char('e'),
            KeyInput::Backspace,
            KeyInput::Char('a'),
            KeyInput::Other,
            KeyInput::Char('y'),
            KeyInput::Backspace,
            KeyInput::Backspace,
            KeyInput::Char('i'),
        ];
        let mut expected = String::new();
        let mut t = t0;
        for key in keys {
            t += ms(1999);
            match &key {
                KeyInput::Char(c) => expected.push(*c),
                KeyInput::Backspace => {
                    expected.pop();
                }
                _ => {}
            }
            sm.handle_key(key, t);
        }
        sm.handle_key(KeyInput::Submit, t + ms(1));
        assert_eq!(auth.seen(), vec![expected]);
        assert_eq!(auth.seen(), vec!["hi"]);
    }

    #[test]
    fn test_scenario_quick_typing_unlocks() {
        let t0 = Instant::now();
        let auth = RecordingAuth::new("abc");
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, t0);
        let t = type_str(&mut sm, "abc", t0, ms(500));
        assert_eq!(sm.handle_key(KeyInput::Submit, t + ms(500)), Outcome::Unlocked);
        assert_eq!(sm.len(), 0);
        assert_eq!(auth.seen(), vec!["abc"]);
    }

    #[test]
    fn test_scenario_pause_discards_prefix() {
        let t0 = Instant::now();
        let auth = RecordingAuth::new("ab");
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, t0);
        sm.handle_key(KeyInput::Char('a'), t0);
        sm.handle_key(KeyInput::Char('b'), t0 + ms(3000));
        assert_eq!(sm.handle_key(KeyInput::Submit, t0 + ms(3100)), Outcome::Continue);
        assert_eq!(auth.seen(), vec!["b"]);
    }

    #[test]
    fn test_full_buffer_never_reallocates() {
        let t0 = Instant::now();
        let auth = RecordingAuth::new("x");
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, t0);
        let start = sm.buffer.contents.as_ptr();
        let capacity = sm.buffer.contents.capacity();

        let t = type_str(&mut sm, &"a".repeat(capacity + 44), t0, ms(1));
        assert_eq!(sm.buffer.contents.as_ptr(), start);
        assert_eq!(sm.buffer.contents.capacity(), capacity);
        assert_eq!(sm.len(), capacity);

        // A multi-byte character that no longer fits is dropped too
        sm.handle_key(KeyInput::Backspace, t + ms(1));
        sm.handle_key(KeyInput::Char('é'), t + ms(2));
        assert_eq!(sm.buffer.contents.as_ptr(), start);
        assert_eq!(sm.len(), capacity - 1);

        sm.handle_key(KeyInput::Submit, t + ms(3));
        assert_eq!(auth.seen()[0].len(), capacity - 1);
    }

    // ========== Matcher task ==========

    /// Scripted key source on a simulated clock
    struct ScriptedSource {
        events: VecDeque<(Duration, Result<InputEvent, InputError>)>,
        clock: Rc<Cell<Instant>>,
        /// Outcome of each reconnect; an empty script refuses
        reconnect_results: VecDeque<bool>,
        reconnects: usize,
    }

    impl ScriptedSource {
        fn new(clock: Rc<Cell<Instant>>) -> Self {
            Self {
                events: VecDeque::new(),
                clock,
                reconnect_results: VecDeque::new(),
                reconnects: 0,
            }
        }

        fn on_reconnect(mut self, regrabbed: bool) -> Self {
            self.reconnect_results.push_back(regrabbed);
            self
        }

        fn key(mut self, after: Duration, key: KeyInput) -> Self {
            self.events.push_back((after, Ok(InputEvent::Key(key))));
            self
        }

        fn ignored(mut self, after: Duration) -> Self {
            self.events.push_back((after, Ok(InputEvent::Ignored)));
            self
        }

        fn fail(mut self, after: Duration) -> Self {
            self.events
                .push_back((after, Err(InputError::ConnectionLost("broken pipe".into()))));
            self
        }
    }

    impl KeySource for ScriptedSource {
        fn next_event(&mut self) -> Result<InputEvent, InputError> {
            match self.events.pop_front() {
                Some((after, event)) => {
                    self.clock.set(self.clock.get() + after);
                    event
                }
                None => Err(InputError::ConnectionLost("script exhausted".into())),
            }
        }

        fn reconnect(&mut self) -> Result<(), InputError> {
            self.reconnects += 1;
            match self.reconnect_results.pop_front() {
                Some(true) => Ok(()),
                _ => Err(InputError::ReconnectFailed("AlreadyGrabbed".into())),
            }
        }
    }

    fn setup(password: &'static str) -> (RecordingAuth, Rc<Cell<Instant>>) {
        (RecordingAuth::new(password), Rc::new(Cell::new(Instant::now())))
    }

    #[test]
    fn test_matcher_unlock_fires_once() {
        let (auth, clock) = setup("abc");
        let mut source = ScriptedSource::new(clock.clone())
            .key(ms(100), KeyInput::Char('a'))
            .ignored(ms(10))
            .key(ms(400), KeyInput::Char('b'))
            .key(ms(400), KeyInput::Char('c'))
            .key(ms(400), KeyInput::Submit)
            .key(ms(10), KeyInput::Submit);
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, clock.get());
        let (tx, mut rx) = oneshot();
        let close = CloseFlag::new();
        let c = clock.clone();

        let exit = run_matcher(
            &mut source,
            &mut sm,
            || c.get(),
            &tx,
            &close,
            InputErrorPolicy::Terminate,
        );
        assert_eq!(exit, MatcherExit::Unlocked);
        assert_eq!(rx.try_take(), Some(MatcherExit::Unlocked));
        assert_eq!(rx.try_take(), None);
        assert_eq!(sm.len(), 0);
        assert_eq!(auth.seen(), vec!["abc"]);
        // The trailing Submit was never consumed
        assert_eq!(source.events.len(), 1);
    }

    #[test]
    fn test_matcher_timeout_between_keys() {
        let (auth, clock) = setup("b");
        let mut source = ScriptedSource::new(clock.clone())
            .key(ms(0), KeyInput::Char('a'))
            .key(ms(3000), KeyInput::Char('b'))
            .key(ms(100), KeyInput::Submit);
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, clock.get());
        let (tx, mut rx) = oneshot();
        let c = clock.clone();

        let exit = run_matcher(
            &mut source,
            &mut sm,
            || c.get(),
            &tx,
            &CloseFlag::new(),
            InputErrorPolicy::Terminate,
        );
        assert_eq!(exit, MatcherExit::Unlocked);
        assert_eq!(auth.seen(), vec!["b"]);
        assert_eq!(rx.try_take(), Some(MatcherExit::Unlocked));
    }

    #[test]
    fn test_matcher_input_failure_terminates() {
        let (auth, clock) = setup("abc");
        let mut source = ScriptedSource::new(clock.clone())
            .key(ms(10), KeyInput::Char('a'))
            .fail(ms(10));
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, clock.get());
        let (tx, mut rx) = oneshot();
        let c = clock.clone();

        let exit = run_matcher(
            &mut source,
            &mut sm,
            || c.get(),
            &tx,
            &CloseFlag::new(),
            InputErrorPolicy::Terminate,
        );
        assert_eq!(exit, MatcherExit::InputFailed);
        assert_eq!(rx.try_take(), Some(MatcherExit::InputFailed));
        assert_eq!(source.reconnects, 0);
        assert!(auth.seen().is_empty());
    }

    #[test]
    fn test_matcher_failed_regrab_ends_session() {
        let (auth, clock) = setup("abc");
        let mut source = ScriptedSource::new(clock.clone())
            .key(ms(10), KeyInput::Char('a'))
            .fail(ms(10))
            .key(ms(10), KeyInput::Submit)
            .on_reconnect(false);
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, clock.get());
        let (tx, mut rx) = oneshot();
        let c = clock.clone();

        let exit = run_matcher(
            &mut source,
            &mut sm,
            || c.get(),
            &tx,
            &CloseFlag::new(),
            InputErrorPolicy::Reconnect,
        );
        assert_eq!(exit, MatcherExit::InputFailed);
        assert_eq!(rx.try_take(), Some(MatcherExit::InputFailed));
        assert_eq!(source.reconnects, 1);
        // Nothing was read without the grab
        assert_eq!(source.events.len(), 1);
        assert_eq!(sm.len(), 0);
        assert!(auth.seen().is_empty());
    }

    #[test]
    fn test_matcher_reconnect_resumes_with_empty_buffer() {
        let (auth, clock) = setup("cd");
        let mut source = ScriptedSource::new(clock.clone())
            .key(ms(10), KeyInput::Char('a'))
            .key(ms(10), KeyInput::Char('b'))
            .fail(ms(10))
            .key(ms(10), KeyInput::Char('c'))
            .key(ms(10), KeyInput::Char('d'))
            .key(ms(10), KeyInput::Submit)
            .on_reconnect(true);
        let mut sm = PasswordStateMachine::new(auth.clone(), TIMEOUT, clock.get());
        let (tx, mut rx) = oneshot();
        let c = clock.clone();

        let exit = run_matcher(
            &mut source,
            &mut sm,
            || c.get(),
            &tx,
            &CloseFlag::new(),
            InputErrorPolicy::Reconnect,
        );
        assert_eq!(exit, MatcherExit::Unlocked);
        assert_eq!(rx.try_take(), Some(MatcherExit::Unlocked));
        assert_eq!(source.reconnects, 1);
        // Keys typed before the failure were discarded
        assert_eq!(auth.seen(), vec!["cd"]);
    }

    #[test]
    fn test_matcher_stops_when_session_closed() {
        let (auth, clock) = setup("abc");
        let mut source = ScriptedSource::new(clock.clone())
            .key(ms(10), KeyInput::Char('a'))
            .key(ms(10), KeyInput::Char('b'));
        let mut sm = PasswordStateMachine::new(auth, TIMEOUT, clock.get());
        let (tx, mut rx) = oneshot();
        let close = CloseFlag::new();
        close.request(crate::session::signal::CloseReason::Interrupted);
        let c = clock.clone();

        let exit = run_matcher(
            &mut source,
            &mut sm,
            || c.get(),
            &tx,
            &close,
            InputErrorPolicy::Terminate,
        );
        assert_eq!(exit, MatcherExit::Cancelled);
        assert_eq!(rx.try_take(), None);
        assert_eq!(sm.len(), 0);
    }
}
