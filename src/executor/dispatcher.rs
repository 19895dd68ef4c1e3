use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent_engine::state::Action;
use crate::config::InputConfig;
use crate::errors::{PilotError, PilotResult};
use crate::executor::safety;
use crate::executor::text_input::preview;
use crate::executor::traits::{ActionExecutor, ExecutionOutcome, InputBackend};
use crate::perception::types::ScreenSize;

/// Longest single `wait` the model may request.
pub const MAX_WAIT: Duration = Duration::from_secs(60);
/// Longest per-keystroke interval for `type`.
pub const MAX_TYPE_INTERVAL: Duration = Duration::from_secs(1);
/// Most clicks one `click` action may issue (a triple click).
pub const MAX_CLICKS: u32 = 3;

const TYPED_PREVIEW_CHARS: usize = 50;

/// Routes each validated action to the matching input primitive.
pub struct InputDispatcher<B: InputBackend> {
    backend: Arc<B>,
    pause: Duration,
    failsafe: bool,
}

impl<B: InputBackend> InputDispatcher<B> {
    pub fn new(backend: B, settings: &InputConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            pause: secs_capped(settings.pause_secs, MAX_WAIT),
            failsafe: settings.failsafe,
        }
    }

    /// Run one blocking primitive off the runtime, then pause.
    async fn run_input<F>(&self, op: F) -> PilotResult<()>
    where
        F: FnOnce(&B) -> PilotResult<()> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let failsafe = self.failsafe;
        tokio::task::spawn_blocking(move || {
            if failsafe {
                safety::check_failsafe(backend.as_ref())?;
            }
            op(backend.as_ref())
        })
        .await
        .map_err(|e| PilotError::Executor(format!("input task join: {e}")))??;

        if !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
        Ok(())
    }
}

/// Seconds → `Duration`, clamped to `[0, max]`. NaN becomes zero.
pub fn secs_capped(secs: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(secs)
        .unwrap_or(Duration::ZERO)
        .min(max)
}

#[async_trait]
impl<B: InputBackend> ActionExecutor for InputDispatcher<B> {
    fn screen_size(&self) -> PilotResult<ScreenSize> {
        self.backend.screen_size()
    }

    async fn execute(&self, action: &Action) -> ExecutionOutcome {
        let kind = action.kind();
        let result: PilotResult<String> = match action {
            Action::Click(p) => {
                let (x, y, button) = (p.x, p.y, p.button);
                let clicks = p.clicks.clamp(1, MAX_CLICKS);
                self.run_input(move |b| b.click(x, y, button, clicks))
                    .await
                    .map(|_| format!("Clicked at ({x}, {y})"))
            }
            Action::Move(p) => {
                let (x, y) = (p.x, p.y);
                self.run_input(move |b| b.move_to(x, y))
                    .await
                    .map(|_| format!("Moved to ({x}, {y})"))
            }
            Action::Type(p) => {
                let text = p.text.clone();
                let interval = secs_capped(p.interval, MAX_TYPE_INTERVAL);
                let message = format!("Typed: {}", preview(&p.text, TYPED_PREVIEW_CHARS));
                self.run_input(move |b| b.type_text(&text, interval))
                    .await
                    .map(|_| message)
            }
            Action::Hotkey(p) if p.keys.is_empty() => {
                Err(PilotError::Executor("no keys given".into()))
            }
            Action::Hotkey(p) => {
                let keys = p.keys.clone();
                let message = format!("Pressed: {}", p.keys.join("+"));
                self.run_input(move |b| b.hotkey(&keys))
                    .await
                    .map(|_| message)
            }
            Action::Scroll(p) => {
                let amount = p.amount;
                let at = p.x.zip(p.y);
                self.run_input(move |b| b.scroll(amount, at))
                    .await
                    .map(|_| format!("Scrolled {amount}"))
            }
            Action::Wait(p) => {
                let wait = secs_capped(p.seconds, MAX_WAIT);
                tokio::time::sleep(wait).await;
                Ok(format!("Waited {}s", wait.as_secs_f64()))
            }
            // Every iteration captures a fresh screenshot anyway.
            Action::Screenshot(_) => Ok("Screenshot requested".to_string()),
            Action::Done(p) => Ok(p.message.clone()),
        };

        match result {
            Ok(message) => {
                tracing::info!(kind = %kind, msg = %message, "action executed");
                ExecutionOutcome::ok(message)
            }
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "action failed");
                ExecutionOutcome::failed(format!("{kind} failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::{
        ClickParams, HotkeyParams, MouseButton, MoveParams, ScreenshotParams, ScrollParams,
        TypeParams, WaitParams,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        cursor: Mutex<(i32, i32)>,
        fail_clicks: bool,
    }

    impl Recorder {
        fn at(cursor: (i32, i32)) -> Self {
            Self {
                cursor: Mutex::new(cursor),
                ..Self::default()
            }
        }

        fn log(&self, call: String) -> PilotResult<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    impl InputBackend for Arc<Recorder> {
        fn screen_size(&self) -> PilotResult<ScreenSize> {
            Ok(ScreenSize::new(1920, 1080))
        }
        fn cursor_position(&self) -> PilotResult<(i32, i32)> {
            Ok(*self.cursor.lock().unwrap())
        }
        fn move_to(&self, x: i32, y: i32) -> PilotResult<()> {
            *self.cursor.lock().unwrap() = (x, y);
            self.log(format!("move {x} {y}"))
        }
        fn click(&self, x: i32, y: i32, button: MouseButton, clicks: u32) -> PilotResult<()> {
            if self.fail_clicks {
                return Err(PilotError::Executor("device busy".into()));
            }
            self.log(format!("click {x} {y} {button:?} {clicks}"))
        }
        fn type_text(&self, text: &str, interval: Duration) -> PilotResult<()> {
            self.log(format!("type {text} {}", interval.as_millis()))
        }
        fn hotkey(&self, keys: &[String]) -> PilotResult<()> {
            self.log(format!("hotkey {}", keys.join("+")))
        }
        fn scroll(&self, amount: i32, at: Option<(i32, i32)>) -> PilotResult<()> {
            self.log(format!("scroll {amount} {at:?}"))
        }
    }

    fn dispatcher(rec: &Arc<Recorder>) -> InputDispatcher<Arc<Recorder>> {
        InputDispatcher::new(
            Arc::clone(rec),
            &InputConfig {
                pause_secs: 0.0,
                failsafe: true,
            },
        )
    }

    #[tokio::test]
    async fn test_primitives_and_messages() {
        let rec = Arc::new(Recorder::at((500, 500)));
        let d = dispatcher(&rec);

        let out = d
            .execute(&Action::Click(ClickParams { x: 10, y: 20, button: MouseButton::Right, clicks: 2 }))
            .await;
        assert_eq!(out, ExecutionOutcome::ok("Clicked at (10, 20)"));

        let out = d.execute(&Action::Move(MoveParams { x: 30, y: 40 })).await;
        assert_eq!(out.message, "Moved to (30, 40)");

        let out = d
            .execute(&Action::Type(TypeParams { text: "notepad".into(), interval: 0.02 }))
            .await;
        assert_eq!(out.message, "Typed: notepad");

        let out = d
            .execute(&Action::Hotkey(HotkeyParams { keys: vec!["win".into(), "r".into()] }))
            .await;
        assert_eq!(out.message, "Pressed: win+r");

        let out = d
            .execute(&Action::Scroll(ScrollParams { amount: -3, x: Some(5), y: Some(6) }))
            .await;
        assert_eq!(out.message, "Scrolled -3");

        assert_eq!(
            *rec.calls.lock().unwrap(),
            vec![
                "click 10 20 Right 2".to_string(),
                "move 30 40".to_string(),
                "type notepad 20".to_string(),
                "hotkey win+r".to_string(),
                "scroll -3 Some((5, 6))".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_click_count_is_bounded() {
        let rec = Arc::new(Recorder::at((500, 500)));
        let d = dispatcher(&rec);
        let huge = Action::Click(ClickParams { x: 1, y: 1, button: MouseButton::Left, clicks: 4_000_000_000 });
        assert_eq!(d.execute(&huge).await, ExecutionOutcome::ok("Clicked at (1, 1)"));
        let none = Action::Click(ClickParams { x: 2, y: 2, button: MouseButton::Left, clicks: 0 });
        assert!(d.execute(&none).await.ok);
        assert_eq!(
            *rec.calls.lock().unwrap(),
            vec!["click 1 1 Left 3".to_string(), "click 2 2 Left 1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_non_input_actions() {
        let rec = Arc::new(Recorder::at((500, 500)));
        let d = dispatcher(&rec);
        assert_eq!(
            d.execute(&Action::Screenshot(ScreenshotParams::default())).await,
            ExecutionOutcome::ok("Screenshot requested")
        );
        assert_eq!(d.execute(&Action::done("all good")).await, ExecutionOutcome::ok("all good"));
        assert_eq!(
            d.execute(&Action::Wait(WaitParams { seconds: -4.0 })).await,
            ExecutionOutcome::ok("Waited 0s")
        );
        assert!(rec.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_values() {
        let rec = Arc::new(Recorder { fail_clicks: true, ..Recorder::at((500, 500)) });
        let d = dispatcher(&rec);
        let out = d
            .execute(&Action::Click(ClickParams { x: 1, y: 1, button: MouseButton::Left, clicks: 1 }))
            .await;
        assert!(!out.ok);
        assert_eq!(out.message, "click failed: Executor error: device busy");

        let out = d.execute(&Action::Hotkey(HotkeyParams { keys: vec![] })).await;
        assert!(!out.ok);
    }

    #[tokio::test]
    async fn test_failsafe_blocks_input() {
        let rec = Arc::new(Recorder::at((0, 0)));
        let d = dispatcher(&rec);
        let out = d.execute(&Action::Move(MoveParams { x: 100, y: 100 })).await;
        assert!(!out.ok);
        assert!(out.message.contains("Fail-safe"));
        assert!(rec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_secs_capped() {
        assert_eq!(secs_capped(0.5, MAX_WAIT), Duration::from_millis(500));
        assert_eq!(secs_capped(1e9, MAX_WAIT), MAX_WAIT);
        assert_eq!(secs_capped(f64::NAN, MAX_WAIT), Duration::ZERO);
        assert_eq!(secs_capped(-1.0, MAX_WAIT), Duration::ZERO);
    }
}
