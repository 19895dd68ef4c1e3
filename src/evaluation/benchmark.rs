// Benchmark runner: fixed desktop tasks, one fresh engine per task, scored
// on completion, post-run verification and how often the model produced a
// usable turn.
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent_engine::engine::AgentEngine;
use crate::agent_engine::event_bus::{self, AgentEvent, EventBus, StopHandle};
use crate::agent_engine::state::TurnStatus;
use crate::errors::{PilotError, PilotResult};
use crate::evaluation::report::{round_to, BenchmarkReport, TaskScore};

const PROCESS_LIST_TIMEOUT: Duration = Duration::from_secs(5);

fn default_max_steps() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTask {
    pub id: String,
    pub description: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub verify: Option<VerifySpec>,
}

/// Post-run check of the desktop state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerifySpec {
    ProcessRunning {
        process: String,
    },
    ProcessRunningAny {
        processes: Vec<String>,
    },
    WindowExists {
        window_title: String,
    },
    /// Only the window title is checked; window contents are not inspected.
    WindowContainsText {
        #[serde(default)]
        window_title: String,
        #[serde(default)]
        text: Option<String>,
    },
    /// Any other `type`; never passes.
    #[serde(other)]
    Unsupported,
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn process_running(&self, name: &str) -> bool;

    async fn window_exists(&self, title: &str) -> bool;

    async fn verify(&self, spec: &VerifySpec) -> bool {
        match spec {
            VerifySpec::ProcessRunning { process } => self.process_running(process).await,
            VerifySpec::ProcessRunningAny { processes } => {
                for p in processes {
                    if self.process_running(p).await {
                        return true;
                    }
                }
                false
            }
            VerifySpec::WindowExists { window_title }
            | VerifySpec::WindowContainsText { window_title, .. } => {
                self.window_exists(window_title).await
            }
            VerifySpec::Unsupported => false,
        }
    }
}

/// Checks the live system: the process table through the platform tool,
/// window titles through `xcap` when the `desktop` feature is on.
#[derive(Debug, Default)]
pub struct SystemVerifier;

#[async_trait]
impl Verifier for SystemVerifier {
    async fn process_running(&self, name: &str) -> bool {
        let mut command = if cfg!(windows) {
            let mut c = tokio::process::Command::new("tasklist");
            c.args(["/FI", &format!("IMAGENAME eq {name}")]);
            c
        } else {
            let mut c = tokio::process::Command::new("ps");
            c.args(["-A", "-o", "comm="]);
            c
        };
        match tokio::time::timeout(PROCESS_LIST_TIMEOUT, command.output()).await {
            Ok(Ok(out)) => String::from_utf8_lossy(&out.stdout)
                .to_lowercase()
                .contains(&name.to_lowercase()),
            Ok(Err(e)) => {
                tracing::warn!(process = %name, error = %e, "process listing failed");
                false
            }
            Err(_) => {
                tracing::warn!(process = %name, "process listing timed out");
                false
            }
        }
    }

    async fn window_exists(&self, title: &str) -> bool {
        window_titles()
            .await
            .iter()
            .any(|t| t.to_lowercase().contains(&title.to_lowercase()))
    }
}

#[cfg(feature = "desktop")]
async fn window_titles() -> Vec<String> {
    let listed = tokio::task::spawn_blocking(|| {
        xcap::Window::all().map(|windows| {
            windows
                .iter()
                .map(|w| w.title().to_string())
                .collect::<Vec<_>>()
        })
    })
    .await;
    match listed {
        Ok(Ok(titles)) => titles,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "window enumeration failed");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "window enumeration task failed");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "desktop"))]
async fn window_titles() -> Vec<String> {
    tracing::warn!("window checks need the `desktop` feature");
    Vec::new()
}

pub struct Benchmark {
    tasks: Vec<BenchmarkTask>,
    settle: Duration,
}

impl Benchmark {
    pub fn new(tasks: Vec<BenchmarkTask>) -> Self {
        Self {
            tasks,
            settle: Duration::from_secs(1),
        }
    }

    pub fn load(path: &Path) -> PilotResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PilotError::Benchmark(format!("cannot read tasks file {}: {e}", path.display()))
        })?;
        let tasks: Vec<BenchmarkTask> = serde_json::from_str(&content)?;
        tracing::info!(path = %path.display(), tasks = tasks.len(), "benchmark tasks loaded");
        Ok(Self::new(tasks))
    }

    /// Pause between a successful run and its verification.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn tasks(&self) -> &[BenchmarkTask] {
        &self.tasks
    }

    /// Tasks to run: all of them, or those named in `ids` in file order.
    pub fn select(&self, ids: &[String]) -> PilotResult<Vec<&BenchmarkTask>> {
        if ids.is_empty() {
            return Ok(self.tasks.iter().collect());
        }
        if let Some(missing) = ids.iter().find(|id| !self.tasks.iter().any(|t| &t.id == *id)) {
            return Err(PilotError::Benchmark(format!("unknown task id '{missing}'")));
        }
        Ok(self.tasks.iter().filter(|t| ids.contains(&t.id)).collect())
    }

    /// Run one task on the engine built by `make_engine`.
    pub async fn run_task<F>(
        &self,
        task: &BenchmarkTask,
        make_engine: &F,
        verifier: &dyn Verifier,
    ) -> PilotResult<TaskScore>
    where
        F: Fn(&BenchmarkTask, EventBus) -> PilotResult<AgentEngine>,
    {
        let (tx, mut rx) = event_bus::channel();
        let mut engine = make_engine(task, EventBus::new(tx))?;
        let run = engine.run_task(&task.description).await;
        drop(engine);

        let (mut ok, mut total) = (0usize, 0usize);
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::StepRecorded { step } = event {
                total += 1;
                if step.turn.status != TurnStatus::Failed {
                    ok += 1;
                }
            }
        }

        let verified = match (&task.verify, run.success()) {
            (Some(spec), true) => {
                tokio::time::sleep(self.settle).await;
                verifier.verify(spec).await
            }
            _ => false,
        };

        Ok(TaskScore {
            task_id: task.id.clone(),
            description: task.description.clone(),
            completed: run.success(),
            verified,
            steps_used: run.steps.len(),
            max_steps: task.max_steps,
            response_time: round_to(run.elapsed.as_secs_f64(), 2),
            json_parse_rate: if total == 0 {
                0.0
            } else {
                round_to(ok as f64 / total as f64, 4)
            },
        })
    }

    /// Run the selected tasks in order. A stop request skips the rest.
    pub async fn run_all<F>(
        &self,
        ids: &[String],
        make_engine: F,
        verifier: &dyn Verifier,
        stop: &StopHandle,
        model_name: &str,
        provider: &str,
    ) -> PilotResult<BenchmarkReport>
    where
        F: Fn(&BenchmarkTask, EventBus) -> PilotResult<AgentEngine>,
    {
        let mut scores = Vec::new();
        for task in self.select(ids)? {
            if stop.is_stopped() {
                tracing::warn!(task = %task.id, "benchmark stopped, remaining tasks skipped");
                break;
            }
            tracing::info!(task = %task.id, description = %task.description, "benchmark task");
            let score = self.run_task(task, &make_engine, verifier).await?;
            tracing::info!(
                task = %score.task_id,
                completed = score.completed,
                verified = score.verified,
                steps = %format!("{}/{}", score.steps_used, score.max_steps),
                secs = score.response_time,
                "benchmark task scored"
            );
            scores.push(score);
        }
        Ok(BenchmarkReport::new(
            model_name.to_string(),
            provider.to_string(),
            scores,
        ))
    }
}
