use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::agent_engine::state::{LoopPhase, Step};

/// What the engine publishes while it runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    RunStarted {
        task: String,
    },
    PhaseChanged {
        phase: LoopPhase,
    },
    StepRecorded {
        step: Step,
    },
    RunFinished {
        success: bool,
        message: String,
        steps: usize,
        elapsed_ms: u64,
    },
}

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

/// Unbounded so the loop never waits on a slow observer.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Publisher side held by the engine. Without a subscriber events are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    tx: Option<EventSender>,
}

impl EventBus {
    pub fn new(tx: EventSender) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::trace!("event observer gone, event dropped");
            }
        }
    }
}

/// Cooperative stop flag, observed at the top of each iteration.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear before a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
