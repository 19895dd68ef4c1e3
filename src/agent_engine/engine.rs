use std::sync::Arc;
use std::time::Instant;

use crate::agent_engine::event_bus::{AgentEvent, EventBus, StopHandle};
use crate::agent_engine::history::{ConversationHistory, SessionEntry, SessionLog};
use crate::agent_engine::loop_control::{decide, LoopSettings, Verdict, STOPPED_MESSAGE};
use crate::agent_engine::parser::parse_turn;
use crate::agent_engine::prompt::{self, DEFAULT_SYSTEM_PROMPT};
use crate::agent_engine::state::{LoopPhase, Step, TaskRun, TerminalStatus};
use crate::config::AppConfig;
use crate::errors::PilotResult;
use crate::executor::coordinator::{CoordinateMapper, DisplayScale};
use crate::executor::traits::ActionExecutor;
use crate::llm::provider::{self, ModelRequest, VisionModel};
use crate::perception::traits::ScreenCapture;
use crate::perception::types::{CaptureRequest, ScreenSize};

/// Drives one task at a time through observe → ask → validate → act.
pub struct AgentEngine {
    model: Arc<dyn VisionModel>,
    capture: Arc<dyn ScreenCapture>,
    executor: Arc<dyn ActionExecutor>,
    mapper: CoordinateMapper,
    settings: LoopSettings,
    capture_request: CaptureRequest,
    system_prompt: String,
    events: EventBus,
    stop: StopHandle,
    session_log: Option<SessionLog>,
    phase: LoopPhase,
}

impl AgentEngine {
    pub fn new(
        model: Arc<dyn VisionModel>,
        capture: Arc<dyn ScreenCapture>,
        executor: Arc<dyn ActionExecutor>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            model,
            capture,
            executor,
            mapper: CoordinateMapper::new(Default::default(), DisplayScale::IDENTITY),
            settings,
            capture_request: CaptureRequest::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            events: EventBus::detached(),
            stop: StopHandle::new(),
            session_log: None,
            phase: LoopPhase::Idle,
        }
    }

    /// Wire an engine from configuration. The display scale is measured
    /// here, once, from the capture and input backends.
    pub fn from_config(
        config: &AppConfig,
        model: Arc<dyn VisionModel>,
        capture: Arc<dyn ScreenCapture>,
        executor: Arc<dyn ActionExecutor>,
    ) -> PilotResult<Self> {
        let logical = executor.screen_size()?;
        let scale = match capture.physical_size() {
            Ok(physical) => DisplayScale::from_widths(physical.width, logical.width),
            Err(e) => {
                tracing::warn!(error = %e, "physical screen size unavailable, assuming scale 1.0");
                DisplayScale::IDENTITY
            }
        };
        tracing::info!(
            screen = %format!("{}×{}", logical.width, logical.height),
            scale = scale.factor(),
            coord_format = %config.agent.coord_format,
            "display measured"
        );

        let session_log = if config.agent.session_log {
            match SessionLog::new() {
                Ok(log) => Some(log),
                Err(e) => {
                    tracing::warn!(error = %e, "session log disabled");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::new(model, capture, executor, LoopSettings::from_config(config))
            .with_mapper(CoordinateMapper::new(config.agent.coord_format, scale))
            .with_system_prompt(config.system_prompt()?)
            .with_capture_request(CaptureRequest {
                region: None,
                max_size: Some(ScreenSize::new(
                    config.capture.max_width,
                    config.capture.max_height,
                )),
            })
            .with_session_log(session_log))
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> LoopSettings {
        self.settings
    }

    pub fn with_mapper(mut self, mapper: CoordinateMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_capture_request(mut self, request: CaptureRequest) -> Self {
        self.capture_request = request;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_session_log(mut self, log: Option<SessionLog>) -> Self {
        self.session_log = log;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> &LoopPhase {
        &self.phase
    }

    pub fn model_name(&self) -> &str {
        self.model.model()
    }

    fn set_phase(&mut self, phase: LoopPhase) {
        tracing::debug!(?phase, "phase");
        self.phase = phase.clone();
        self.events.send(AgentEvent::PhaseChanged { phase });
    }

    fn log_session(&self, entry: SessionEntry<'_>) {
        if let Some(log) = &self.session_log {
            if let Err(e) = log.append(&entry) {
                tracing::warn!(error = %e, "session log write failed");
            }
        }
    }

    /// Run `task` to completion. Every path ends in a `TaskRun`; nothing the
    /// model says can make this return early or panic.
    pub async fn run_task(&mut self, task: &str) -> TaskRun {
        let started = Instant::now();
        let mut history = ConversationHistory::new();
        let mut steps: Vec<Step> = Vec::new();

        tracing::info!(task = %task, model = %self.model.model(), "task started");
        self.events.send(AgentEvent::RunStarted {
            task: task.to_string(),
        });
        self.log_session(SessionEntry::Task {
            ts: chrono::Utc::now().timestamp_millis(),
            task,
            model: self.model.model(),
        });

        let (success, message) = match self.executor.screen_size() {
            Ok(screen) => self.drive(task, screen, &mut history, &mut steps).await,
            Err(e) => (false, format!("Cannot read screen size: {e}")),
        };

        let elapsed = started.elapsed();
        self.set_phase(LoopPhase::Done { success });
        if success {
            tracing::info!(steps = steps.len(), msg = %message, "task succeeded");
        } else {
            tracing::warn!(steps = steps.len(), msg = %message, "task failed");
        }
        self.log_session(SessionEntry::Outcome {
            ts: chrono::Utc::now().timestamp_millis(),
            success,
            message: &message,
            steps: steps.len(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
        self.events.send(AgentEvent::RunFinished {
            success,
            message: message.clone(),
            steps: steps.len(),
            elapsed_ms: elapsed.as_millis() as u64,
        });

        TaskRun {
            task: task.to_string(),
            steps,
            terminal_status: if success {
                TerminalStatus::Success
            } else {
                TerminalStatus::Failure
            },
            message,
            elapsed,
        }
    }

    async fn drive(
        &mut self,
        task: &str,
        screen: ScreenSize,
        history: &mut ConversationHistory,
        steps: &mut Vec<Step>,
    ) -> (bool, String) {
        let max_steps = self.settings.max_steps;
        let mut step: u32 = 0;

        loop {
            if self.stop.is_stopped() {
                tracing::info!(step, "stop requested");
                return (false, STOPPED_MESSAGE.to_string());
            }
            step += 1;

            // ── Observe ──────────────────────────────────────────────────
            self.set_phase(LoopPhase::Observing { step });
            let observation = match self.capture.capture(self.capture_request).await {
                Ok(obs) => Arc::new(obs),
                Err(e) => {
                    tracing::error!(step, error = %e, "screen capture failed");
                    return (false, format!("Screen capture failed: {e}"));
                }
            };

            // ── Ask ──────────────────────────────────────────────────────
            self.set_phase(LoopPhase::Requesting { step });
            let instruction = prompt::instruction(task, step);
            let raw = provider::ask(
                self.model.as_ref(),
                ModelRequest {
                    system_prompt: &self.system_prompt,
                    task,
                    instruction: &instruction,
                    image_base64: &observation.image_base64,
                    history: history.turns(),
                },
                self.settings.model_timeout,
            )
            .await;

            // ── Validate ─────────────────────────────────────────────────
            self.set_phase(LoopPhase::Validating { step });
            let turn = parse_turn(&raw);
            tracing::info!(
                step,
                kind = %turn.action.kind(),
                status = ?turn.status,
                thought = %turn.thought,
                "turn decided"
            );

            // ── Act ──────────────────────────────────────────────────────
            self.set_phase(LoopPhase::Executing { step });
            let executed = if turn.action.is_spatial() {
                self.mapper.resolve_action(
                    &turn.action,
                    observation.image_size(),
                    screen,
                    self.model.model(),
                )
            } else {
                turn.action.clone()
            };
            let outcome = self.executor.execute(&executed).await;

            let record = Step {
                index: step,
                observation,
                turn,
                executed,
                executed_ok: outcome.ok,
                result_message: outcome.message,
                timestamp: chrono::Utc::now(),
            };
            self.log_session(SessionEntry::Step {
                ts: record.timestamp.timestamp_millis(),
                raw_response: &raw,
                step: &record,
            });
            self.events.send(AgentEvent::StepRecorded {
                step: record.clone(),
            });
            let verdict = decide(&record.turn, step, max_steps);
            steps.push(record);

            // ── Terminate or continue ────────────────────────────────────
            self.set_phase(LoopPhase::CheckingTermination { step });
            match verdict {
                Verdict::Finish { success, message } => return (success, message),
                Verdict::Continue => {
                    history.push(instruction, raw);
                    if !self.settings.step_delay.is_zero() {
                        tokio::time::sleep(self.settings.step_delay).await;
                    }
                }
            }
        }
    }
}
