//! Keyboard shortcut table.
//!
//! Two encodings arrive from the page:
//! - key-down carries navigation key codes (arrows)
//! - key-press carries printable character codes
//!
//! Both decode to a [`SpeedAction`]. The table is built once and only read
//! afterwards.

use serde::{Deserialize, Serialize};

/// Navigation key codes (DOM `keyCode` values).
pub mod codes {
    pub const LEFT: u32 = 37;
    pub const UP: u32 = 38;
    pub const RIGHT: u32 = 39;
    pub const DOWN: u32 = 40;
}

/// Speed adjustment requested by a shortcut or button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedAction {
    Increase,
    Decrease,
}

/// Logical action -> trigger mapping.
///
/// Characters are stored upper-cased; [`KeyBindings::new`] is the only way
/// in, so matching never has to normalise them again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBindings {
    increase_char: char,
    decrease_char: char,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            increase_char: 'S',
            decrease_char: 'A',
        }
    }
}

impl KeyBindings {
    pub fn new(increase_char: char, decrease_char: char) -> Self {
        Self {
            increase_char: increase_char.to_ascii_uppercase(),
            decrease_char: decrease_char.to_ascii_uppercase(),
        }
    }

    /// Character shortcut for faster playback
    pub fn increase_char(&self) -> char {
        self.increase_char
    }

    /// Character shortcut for slower playback
    pub fn decrease_char(&self) -> char {
        self.decrease_char
    }

    /// Decode a key-down code. `None` for anything that is not an arrow.
    pub fn navigation(&self, code: u32) -> Option<SpeedAction> {
        match code {
            codes::UP | codes::RIGHT => Some(SpeedAction::Increase),
            codes::DOWN | codes::LEFT => Some(SpeedAction::Decrease),
            _ => None,
        }
    }

    /// Decode a key-press character code. Zero codes never match.
    pub fn character(&self, code: u32) -> Option<SpeedAction> {
        if code == 0 {
            return None;
        }
        let ch = char::from_u32(code)?.to_ascii_uppercase();
        if ch == self.increase_char {
            Some(SpeedAction::Increase)
        } else if ch == self.decrease_char {
            Some(SpeedAction::Decrease)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrows() {
        let keys = KeyBindings::default();
        assert_eq!(keys.navigation(codes::UP), Some(SpeedAction::Increase));
        assert_eq!(keys.navigation(codes::RIGHT), Some(SpeedAction::Increase));
        assert_eq!(keys.navigation(codes::DOWN), Some(SpeedAction::Decrease));
        assert_eq!(keys.navigation(codes::LEFT), Some(SpeedAction::Decrease));
        assert_eq!(keys.navigation(13), None);
    }

    #[test]
    fn test_characters_case_insensitive() {
        let keys = KeyBindings::default();
        assert_eq!(keys.character('s' as u32), Some(SpeedAction::Increase));
        assert_eq!(keys.character('S' as u32), Some(SpeedAction::Increase));
        assert_eq!(keys.character('a' as u32), Some(SpeedAction::Decrease));
        assert_eq!(keys.character('x' as u32), None);
        assert_eq!(keys.character(0), None);
        // Lone surrogate is not a char
        assert_eq!(keys.character(0xD800), None);
    }

    #[test]
    fn test_custom_bindings() {
        let keys = KeyBindings::new('d', 'q');
        assert_eq!(keys.increase_char(), 'D');
        assert_eq!(keys.decrease_char(), 'Q');
        assert_eq!(keys, KeyBindings::new('D', 'Q'));
        assert_eq!(keys.character('d' as u32), Some(SpeedAction::Increase));
        assert_eq!(keys.character('Q' as u32), Some(SpeedAction::Decrease));
        assert_eq!(keys.character('s' as u32), None);
    }
}
