use std::time::Duration;

use crate::agent_engine::state::{Action, AgentTurn, DoneParams, TurnStatus, DEFAULT_DONE_MESSAGE};
use crate::config::AppConfig;

pub const STOPPED_MESSAGE: &str = "Task stopped by user";

/// Read-only knobs of one engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub max_steps: u32,
    /// Pause between iterations. Not applied after the final one.
    pub step_delay: Duration,
    /// Upper bound on one model call.
    pub model_timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_steps: 20,
            step_delay: Duration::from_secs(1),
            model_timeout: Duration::from_secs(120),
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout_secs = config
            .llm
            .providers
            .get(&config.llm.active_provider)
            .map(|p| p.timeout_secs)
            .unwrap_or(120);
        Self {
            max_steps: config.agent.max_steps.max(1),
            step_delay: Duration::try_from_secs_f64(config.agent.step_delay_secs)
                .unwrap_or(Duration::ZERO),
            model_timeout: Duration::from_secs(timeout_secs),
        }
    }
}

/// Outcome of the termination check after a step is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Finish { success: bool, message: String },
}

/// Termination rule for step `step` of `max_steps`.
///
/// A `failed` status ends the run as a failure even when the action is
/// `done`, so every synthetic parse-failure turn terminates unsuccessfully.
pub fn decide(turn: &AgentTurn, step: u32, max_steps: u32) -> Verdict {
    if turn.status == TurnStatus::Failed {
        return Verdict::Finish {
            success: false,
            message: format!("Task failed: {}", turn.thought),
        };
    }

    if turn.status == TurnStatus::Completed || matches!(turn.action, Action::Done(_)) {
        let message = match &turn.action {
            Action::Done(DoneParams { message }) => message.clone(),
            _ => DEFAULT_DONE_MESSAGE.to_string(),
        };
        return Verdict::Finish {
            success: true,
            message,
        };
    }

    if step >= max_steps {
        return Verdict::Finish {
            success: false,
            message: format!("Max steps ({max_steps}) reached without completion"),
        };
    }

    Verdict::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::WaitParams;

    fn turn(action: Action, status: TurnStatus) -> AgentTurn {
        AgentTurn {
            thought: "looking".into(),
            action,
            status,
        }
    }

    fn wait() -> Action {
        Action::Wait(WaitParams { seconds: 1.0 })
    }

    #[test]
    fn test_done_action_finishes_with_its_message() {
        let v = decide(&turn(Action::done("Notepad opened"), TurnStatus::InProgress), 1, 20);
        assert_eq!(v, Verdict::Finish { success: true, message: "Notepad opened".into() });
    }

    #[test]
    fn test_completed_without_done_uses_default_message() {
        let v = decide(&turn(wait(), TurnStatus::Completed), 3, 20);
        assert_eq!(v, Verdict::Finish { success: true, message: "Task completed".into() });
    }

    #[test]
    fn test_failed_status_wins_over_done() {
        let v = decide(&turn(Action::done("Parse error"), TurnStatus::Failed), 1, 20);
        assert_eq!(v, Verdict::Finish { success: false, message: "Task failed: looking".into() });
    }

    #[test]
    fn test_step_cap() {
        assert_eq!(decide(&turn(wait(), TurnStatus::InProgress), 19, 20), Verdict::Continue);
        assert_eq!(
            decide(&turn(wait(), TurnStatus::InProgress), 20, 20),
            Verdict::Finish {
                success: false,
                message: "Max steps (20) reached without completion".into()
            }
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut cfg = AppConfig::default();
        cfg.agent.step_delay_secs = -1.0;
        cfg.agent.max_steps = 0;
        let s = LoopSettings::from_config(&cfg);
        assert_eq!(s.step_delay, Duration::ZERO);
        assert_eq!(s.max_steps, 1);
        assert_eq!(s.model_timeout, Duration::from_secs(120));
    }
}
