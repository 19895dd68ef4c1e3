use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::agent_engine::state::Step;
use crate::errors::PilotResult;

/// One completed exchange: what we asked and what the model answered, verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub instruction: String,
    pub response: String,
}

/// Prior (instruction, raw response) pairs of the current run. Append-only.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<HistoryTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, instruction: String, response: String) {
        self.turns.push(HistoryTurn {
            instruction,
            response,
        });
    }

    pub fn turns(&self) -> &[HistoryTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// One line of the session JSONL file.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEntry<'a> {
    Task {
        ts: i64,
        task: &'a str,
        model: &'a str,
    },
    Step {
        ts: i64,
        raw_response: &'a str,
        step: &'a Step,
    },
    Outcome {
        ts: i64,
        success: bool,
        message: &'a str,
        steps: usize,
        elapsed_ms: u64,
    },
}

/// Append-only JSONL record of one run. Screenshots are never written.
pub struct SessionLog {
    pub session_id: String,
    file_path: PathBuf,
}

impl SessionLog {
    /// Log under the platform data directory.
    pub fn new() -> PilotResult<Self> {
        Self::in_dir(&sessions_dir())
    }

    pub fn in_dir(dir: &Path) -> PilotResult<Self> {
        std::fs::create_dir_all(dir)?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        Ok(Self {
            session_id,
            file_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn append(&self, entry: &SessionEntry<'_>) -> PilotResult<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %self.file_path.display(), "session entry flushed");
        Ok(())
    }
}

/// `~/.local/share/screenpilot/sessions` on Linux, `%LOCALAPPDATA%\screenpilot\sessions`
/// on Windows, falling back to the working directory.
fn sessions_dir() -> PathBuf {
    match dirs::data_local_dir() {
        Some(base) => base.join("screenpilot").join("sessions"),
        None => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("sessions"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::{Action, AgentTurn, TurnStatus};
    use crate::perception::types::Observation;
    use std::sync::Arc;

    #[test]
    fn test_history_is_ordered() {
        let mut h = ConversationHistory::new();
        assert!(h.is_empty());
        h.push("first".into(), "{\"a\":1}".into());
        h.push("second".into(), "{\"a\":2}".into());
        assert_eq!(h.len(), 2);
        assert_eq!(h.turns()[0].instruction, "first");
        assert_eq!(h.turns()[1].response, "{\"a\":2}");
    }

    #[test]
    fn test_session_log_writes_jsonl_without_image() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::in_dir(dir.path()).unwrap();

        let step = Step {
            index: 1,
            observation: Arc::new(Observation {
                image_base64: "SECRET_IMAGE_BYTES".into(),
                width: 10,
                height: 10,
                source_width: 10,
                source_height: 10,
                captured_at: chrono::Utc::now(),
            }),
            turn: AgentTurn {
                thought: "done already".into(),
                action: Action::done("ok"),
                status: TurnStatus::Completed,
            },
            executed: Action::done("ok"),
            executed_ok: true,
            result_message: "ok".into(),
            timestamp: chrono::Utc::now(),
        };

        log.append(&SessionEntry::Task { ts: 0, task: "t", model: "m" }).unwrap();
        log.append(&SessionEntry::Step { ts: 1, raw_response: "{}", step: &step }).unwrap();
        log.append(&SessionEntry::Outcome {
            ts: 2,
            success: true,
            message: "ok",
            steps: 1,
            elapsed_ms: 5,
        })
        .unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "task");
        assert_eq!(lines[1]["step"]["turn"]["status"], "completed");
        assert_eq!(lines[2]["success"], true);
        assert!(!content.contains("SECRET_IMAGE_BYTES"));
    }
}
