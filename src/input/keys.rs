//! Decoded key events
//!
//! The windowing backend turns raw key presses into [`KeyInput`] so that the
//! password state machine never sees keycodes or keysyms.

use thiserror::Error;

/// A decoded key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    /// Printable single character
    Char(char),
    /// Delete the last character
    Backspace,
    /// Return / keypad Enter
    Submit,
    /// Escape: discard the typed buffer
    Clear,
    /// Any other key (modifiers, function keys, multi-char compose output)
    Other,
}

/// One event read from the input source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A key was pressed
    Key(KeyInput),
    /// Anything else (release, pointer motion, mapping change)
    Ignored,
}

/// Input source failure
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input connection lost: {0}")]
    ConnectionLost(String),
    #[error("could not restore input: {0}")]
    ReconnectFailed(String),
}

/// Blocking source of input events
///
/// Implementations block until the next event arrives; they never poll.
pub trait KeySource {
    fn next_event(&mut self) -> Result<InputEvent, InputError>;

    /// Re-open the event source after a failure, including its exclusive
    /// grab. Keys must not be delivered unless the grab is held again.
    fn reconnect(&mut self) -> Result<(), InputError>;
}

impl KeyInput {
    /// Classify xkb output for a key press.
    ///
    /// `utf8` is the text the key produces under the current modifier state,
    /// `keysym` the raw keysym value.
    pub fn from_keysym(keysym: u32, utf8: &str) -> Self {
        use xkbcommon::xkb::keysyms;

        match keysym {
            keysyms::KEY_Return | keysyms::KEY_KP_Enter | keysyms::KEY_ISO_Enter => {
                KeyInput::Submit
            }
            keysyms::KEY_BackSpace => KeyInput::Backspace,
            keysyms::KEY_Escape => KeyInput::Clear,
            _ => {
                let mut chars = utf8.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if !c.is_control() => KeyInput::Char(c),
                    _ => KeyInput::Other,
                }
            }
        }
    }
}
