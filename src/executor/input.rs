// Physical input simulation.
use crate::errors::{PilotError, PilotResult};

/// Backend-neutral key names the model may use in `hotkey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyName {
    Control,
    Shift,
    Alt,
    Meta,
    Return,
    Tab,
    Escape,
    Backspace,
    Delete,
    Space,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    CapsLock,
    F(u8),
    Char(char),
}

/// Resolve a key name as models write it (`"ctrl"`, `"win"`, `"enter"`, `"f5"`, `"c"`).
pub fn parse_key(name: &str) -> PilotResult<KeyName> {
    let lower = name.trim().to_ascii_lowercase();
    let key = match lower.as_str() {
        "ctrl" | "control" | "ctrlleft" | "ctrlright" => KeyName::Control,
        "shift" | "shiftleft" | "shiftright" => KeyName::Shift,
        "alt" | "altleft" | "altright" | "option" => KeyName::Alt,
        "win" | "winleft" | "winright" | "windows" | "super" | "meta" | "cmd" | "command" => {
            KeyName::Meta
        }
        "enter" | "return" => KeyName::Return,
        "tab" => KeyName::Tab,
        "esc" | "escape" => KeyName::Escape,
        "backspace" => KeyName::Backspace,
        "del" | "delete" => KeyName::Delete,
        "space" | "spacebar" => KeyName::Space,
        "up" => KeyName::Up,
        "down" => KeyName::Down,
        "left" => KeyName::Left,
        "right" => KeyName::Right,
        "home" => KeyName::Home,
        "end" => KeyName::End,
        "pageup" | "pgup" => KeyName::PageUp,
        "pagedown" | "pgdn" => KeyName::PageDown,
        "capslock" => KeyName::CapsLock,
        other => {
            if let Some(n) = other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                if (1..=12).contains(&n) {
                    return Ok(KeyName::F(n));
                }
            }
            let mut chars = name.trim().chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyName::Char(c.to_ascii_lowercase()),
                _ => return Err(PilotError::Executor(format!("Unknown key: {name}"))),
            }
        }
    };
    Ok(key)
}

#[cfg(feature = "desktop")]
pub use desktop::EnigoInput;

#[cfg(feature = "desktop")]
mod desktop {
    use std::time::Duration;

    use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

    use super::{parse_key, KeyName};
    use crate::agent_engine::state::MouseButton;
    use crate::errors::{PilotError, PilotResult};
    use crate::executor::text_input::{typing_mode, TypingMode};
    use crate::executor::traits::InputBackend;
    use crate::perception::types::ScreenSize;

    /// Keyboard and mouse through `enigo`. A fresh connection is opened per
    /// primitive so the backend stays `Send + Sync`.
    #[derive(Debug, Default)]
    pub struct EnigoInput;

    impl EnigoInput {
        pub fn new() -> Self {
            Self
        }
    }

    fn connect() -> PilotResult<Enigo> {
        Enigo::new(&Settings::default())
            .map_err(|e| PilotError::Executor(format!("input connection: {e}")))
    }

    fn input_err(e: impl std::fmt::Display) -> PilotError {
        PilotError::Executor(e.to_string())
    }

    fn to_enigo(key: KeyName) -> Key {
        match key {
            KeyName::Control => Key::Control,
            KeyName::Shift => Key::Shift,
            KeyName::Alt => Key::Alt,
            KeyName::Meta => Key::Meta,
            KeyName::Return => Key::Return,
            KeyName::Tab => Key::Tab,
            KeyName::Escape => Key::Escape,
            KeyName::Backspace => Key::Backspace,
            KeyName::Delete => Key::Delete,
            KeyName::Space => Key::Space,
            KeyName::Up => Key::UpArrow,
            KeyName::Down => Key::DownArrow,
            KeyName::Left => Key::LeftArrow,
            KeyName::Right => Key::RightArrow,
            KeyName::Home => Key::Home,
            KeyName::End => Key::End,
            KeyName::PageUp => Key::PageUp,
            KeyName::PageDown => Key::PageDown,
            KeyName::CapsLock => Key::CapsLock,
            KeyName::F(n) => match n {
                1 => Key::F1,
                2 => Key::F2,
                3 => Key::F3,
                4 => Key::F4,
                5 => Key::F5,
                6 => Key::F6,
                7 => Key::F7,
                8 => Key::F8,
                9 => Key::F9,
                10 => Key::F10,
                11 => Key::F11,
                _ => Key::F12,
            },
            KeyName::Char(c) => Key::Unicode(c),
        }
    }

    fn to_button(button: MouseButton) -> Button {
        match button {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
            MouseButton::Middle => Button::Middle,
        }
    }

    impl InputBackend for EnigoInput {
        fn screen_size(&self) -> PilotResult<ScreenSize> {
            let (w, h) = connect()?.main_display().map_err(input_err)?;
            Ok(ScreenSize::new(w.max(0) as u32, h.max(0) as u32))
        }

        fn cursor_position(&self) -> PilotResult<(i32, i32)> {
            connect()?.location().map_err(input_err)
        }

        fn move_to(&self, x: i32, y: i32) -> PilotResult<()> {
            connect()?.move_mouse(x, y, Coordinate::Abs).map_err(input_err)
        }

        fn click(&self, x: i32, y: i32, button: MouseButton, clicks: u32) -> PilotResult<()> {
            let mut enigo = connect()?;
            enigo.move_mouse(x, y, Coordinate::Abs).map_err(input_err)?;
            for _ in 0..clicks.max(1) {
                enigo.button(to_button(button), Direction::Click).map_err(input_err)?;
            }
            Ok(())
        }

        fn type_text(&self, text: &str, interval: Duration) -> PilotResult<()> {
            let mut enigo = connect()?;
            match typing_mode(text, interval) {
                TypingMode::Bulk => enigo.text(text).map_err(input_err),
                TypingMode::PerChar => {
                    let mut buf = [0u8; 4];
                    for c in text.chars() {
                        enigo.text(c.encode_utf8(&mut buf)).map_err(input_err)?;
                        std::thread::sleep(interval);
                    }
                    Ok(())
                }
            }
        }

        fn hotkey(&self, keys: &[String]) -> PilotResult<()> {
            let resolved = keys
                .iter()
                .map(|k| parse_key(k).map(to_enigo))
                .collect::<PilotResult<Vec<_>>>()?;
            let mut enigo = connect()?;
            let mut pressed = Vec::with_capacity(resolved.len());
            let mut outcome = Ok(());
            for key in &resolved {
                if let Err(e) = enigo.key(*key, Direction::Press) {
                    outcome = Err(input_err(e));
                    break;
                }
                pressed.push(*key);
            }
            for key in pressed.iter().rev() {
                if let Err(e) = enigo.key(*key, Direction::Release) {
                    tracing::warn!(error = %e, "key release failed");
                }
            }
            outcome
        }

        fn scroll(&self, amount: i32, at: Option<(i32, i32)>) -> PilotResult<()> {
            let mut enigo = connect()?;
            if let Some((x, y)) = at {
                enigo.move_mouse(x, y, Coordinate::Abs).map_err(input_err)?;
            }
            // enigo scrolls down for positive lengths.
            enigo.scroll(-amount, Axis::Vertical).map_err(input_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_key_names() {
        assert_eq!(parse_key("ctrl").unwrap(), KeyName::Control);
        assert_eq!(parse_key("Win").unwrap(), KeyName::Meta);
        assert_eq!(parse_key("enter").unwrap(), KeyName::Return);
        assert_eq!(parse_key("esc").unwrap(), KeyName::Escape);
        assert_eq!(parse_key("f5").unwrap(), KeyName::F(5));
        assert_eq!(parse_key("R").unwrap(), KeyName::Char('r'));
        assert_eq!(parse_key("1").unwrap(), KeyName::Char('1'));
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        assert!(parse_key("hyper").is_err());
        assert!(parse_key("f13").is_err());
        assert!(parse_key("").is_err());
    }
}
