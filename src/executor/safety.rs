// Fail-safe: parking the cursor in a screen corner aborts input injection.
use crate::errors::{PilotError, PilotResult};
use crate::executor::traits::InputBackend;
use crate::perception::types::ScreenSize;

/// True when `cursor` sits on one of the four corner pixels.
pub fn in_corner(cursor: (i32, i32), screen: ScreenSize) -> bool {
    let max_x = screen.width.saturating_sub(1) as i32;
    let max_y = screen.height.saturating_sub(1) as i32;
    let (x, y) = cursor;
    (x <= 0 || x >= max_x) && (y <= 0 || y >= max_y)
}

/// Refuse to inject input while the fail-safe corner is engaged.
pub fn check_failsafe(backend: &dyn InputBackend) -> PilotResult<()> {
    let cursor = backend.cursor_position()?;
    let screen = backend.screen_size()?;
    if in_corner(cursor, screen) {
        tracing::warn!(x = cursor.0, y = cursor.1, "fail-safe triggered");
        return Err(PilotError::Executor(format!(
            "Fail-safe triggered: cursor at ({}, {}) is in a screen corner",
            cursor.0, cursor.1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corners() {
        let s = ScreenSize::new(1920, 1080);
        assert!(in_corner((0, 0), s));
        assert!(in_corner((1919, 0), s));
        assert!(in_corner((0, 1079), s));
        assert!(in_corner((1919, 1079), s));
        assert!(in_corner((-5, 2000), s));
        assert!(!in_corner((0, 500), s));
        assert!(!in_corner((960, 0), s));
        assert!(!in_corner((960, 540), s));
    }
}
