use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::agent_engine::state::{Action, MouseButton};
use crate::errors::PilotResult;
use crate::perception::types::ScreenSize;

/// Result of performing one action. Failure is a value, not an error: it is
/// recorded on the step and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub ok: bool,
    pub message: String,
}

impl ExecutionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Execution collaborator: performs an action whose coordinates are
/// already in logical screen pixels.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Logical screen size input coordinates are expressed in.
    fn screen_size(&self) -> PilotResult<ScreenSize>;

    async fn execute(&self, action: &Action) -> ExecutionOutcome;
}

/// Blocking input primitives. Called from `spawn_blocking`.
pub trait InputBackend: Send + Sync + 'static {
    fn screen_size(&self) -> PilotResult<ScreenSize>;

    fn cursor_position(&self) -> PilotResult<(i32, i32)>;

    fn move_to(&self, x: i32, y: i32) -> PilotResult<()>;

    fn click(&self, x: i32, y: i32, button: MouseButton, clicks: u32) -> PilotResult<()>;

    fn type_text(&self, text: &str, interval: Duration) -> PilotResult<()>;

    /// Press `keys` in order, release in reverse.
    fn hotkey(&self, keys: &[String]) -> PilotResult<()>;

    /// Positive `amount` scrolls up. Moves to `at` first when given.
    fn scroll(&self, amount: i32, at: Option<(i32, i32)>) -> PilotResult<()>;
}
