use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::perception::types::Observation;

/// Lifecycle phases of one task run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Observing { step: u32 },
    Requesting { step: u32 },
    Validating { step: u32 },
    Executing { step: u32 },
    CheckingTermination { step: u32 },
    Done { success: bool },
}

/// Closed set of action tags the model may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Move,
    Type,
    Hotkey,
    Scroll,
    Wait,
    Screenshot,
    Done,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::Click,
        ActionKind::Move,
        ActionKind::Type,
        ActionKind::Hotkey,
        ActionKind::Scroll,
        ActionKind::Wait,
        ActionKind::Screenshot,
        ActionKind::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Move => "move",
            ActionKind::Type => "type",
            ActionKind::Hotkey => "hotkey",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
            ActionKind::Screenshot => "screenshot",
            ActionKind::Done => "done",
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickParams {
    #[serde(deserialize_with = "lenient_int")]
    pub x: i32,
    #[serde(deserialize_with = "lenient_int")]
    pub y: i32,
    #[serde(default)]
    pub button: MouseButton,
    #[serde(default = "default_clicks", deserialize_with = "lenient_int")]
    pub clicks: u32,
}

fn default_clicks() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveParams {
    #[serde(deserialize_with = "lenient_int")]
    pub x: i32,
    #[serde(deserialize_with = "lenient_int")]
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeParams {
    pub text: String,
    /// Seconds between keystrokes.
    #[serde(default = "default_interval")]
    pub interval: f64,
}

fn default_interval() -> f64 {
    0.02
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyParams {
    pub keys: Vec<String>,
}

/// Positive `amount` scrolls up, negative scrolls down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollParams {
    #[serde(deserialize_with = "lenient_int")]
    pub amount: i32,
    #[serde(default, deserialize_with = "lenient_opt_int")]
    pub x: Option<i32>,
    #[serde(default, deserialize_with = "lenient_opt_int")]
    pub y: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitParams {
    #[serde(default = "default_wait_seconds")]
    pub seconds: f64,
}

fn default_wait_seconds() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScreenshotParams {
    /// `[x, y, width, height]`. Not acted on; each step captures the full
    /// screen.
    #[serde(default)]
    pub region: Option<[i32; 4]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneParams {
    #[serde(default = "default_done_message")]
    pub message: String,
}

pub const DEFAULT_DONE_MESSAGE: &str = "Task completed";

fn default_done_message() -> String {
    DEFAULT_DONE_MESSAGE.to_string()
}

impl Default for DoneParams {
    fn default() -> Self {
        Self {
            message: default_done_message(),
        }
    }
}

/// A validated action. Serializes as `{"type": "...", "params": {...}}`,
/// the same shape the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum Action {
    Click(ClickParams),
    Move(MoveParams),
    Type(TypeParams),
    Hotkey(HotkeyParams),
    Scroll(ScrollParams),
    Wait(WaitParams),
    Screenshot(ScreenshotParams),
    Done(DoneParams),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click(_) => ActionKind::Click,
            Action::Move(_) => ActionKind::Move,
            Action::Type(_) => ActionKind::Type,
            Action::Hotkey(_) => ActionKind::Hotkey,
            Action::Scroll(_) => ActionKind::Scroll,
            Action::Wait(_) => ActionKind::Wait,
            Action::Screenshot(_) => ActionKind::Screenshot,
            Action::Done(_) => ActionKind::Done,
        }
    }

    /// Decode `params` against the schema of `kind`, filling defaults.
    pub fn from_params(kind: ActionKind, params: serde_json::Value) -> serde_json::Result<Self> {
        use serde_json::from_value;
        Ok(match kind {
            ActionKind::Click => Action::Click(from_value(params)?),
            ActionKind::Move => Action::Move(from_value(params)?),
            ActionKind::Type => Action::Type(from_value(params)?),
            ActionKind::Hotkey => Action::Hotkey(from_value(params)?),
            ActionKind::Scroll => Action::Scroll(from_value(params)?),
            ActionKind::Wait => Action::Wait(from_value(params)?),
            ActionKind::Screenshot => Action::Screenshot(from_value(params)?),
            ActionKind::Done => Action::Done(from_value(params)?),
        })
    }

    pub fn done(message: impl Into<String>) -> Self {
        Action::Done(DoneParams {
            message: message.into(),
        })
    }

    /// Click, move and positioned scrolls carry screen coordinates.
    pub fn is_spatial(&self) -> bool {
        match self {
            Action::Click(_) | Action::Move(_) => true,
            Action::Scroll(p) => p.x.is_some() && p.y.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
}

impl TurnStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One decoded model turn. Always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTurn {
    pub thought: String,
    pub action: Action,
    pub status: TurnStatus,
}

/// One recorded loop iteration. Never mutated after it is appended.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub index: u32,
    #[serde(skip_serializing)]
    pub observation: Arc<Observation>,
    pub turn: AgentTurn,
    /// The action as executed, coordinates in screen space.
    pub executed: Action,
    pub executed_ok: bool,
    pub result_message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    Failure,
}

/// Outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub task: String,
    pub steps: Vec<Step>,
    pub terminal_status: TerminalStatus,
    pub message: String,
    pub elapsed: std::time::Duration,
}

impl TaskRun {
    pub fn success(&self) -> bool {
        self.terminal_status == TerminalStatus::Success
    }
}

// ── Lenient integer fields ───────────────────────────────────────────────────
// Models emit `100`, `100.0` or `"100"` for the same coordinate. Accept all
// three; reject fractions and anything else.

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl LooseNumber {
    fn to_i64(&self) -> Result<i64, String> {
        match self {
            LooseNumber::Int(v) => Ok(*v),
            LooseNumber::Float(v) if v.fract() == 0.0 && v.is_finite() => Ok(*v as i64),
            LooseNumber::Float(v) => Err(format!("expected an integer, got {v}")),
            LooseNumber::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("expected an integer, got \"{s}\"")),
        }
    }
}

fn lenient_int<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let raw = LooseNumber::deserialize(deserializer)?;
    let value = raw.to_i64().map_err(serde::de::Error::custom)?;
    T::try_from(value).map_err(|_| serde::de::Error::custom(format!("integer {value} out of range")))
}

fn lenient_opt_int<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let raw = Option::<LooseNumber>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(n) => {
            let value = n.to_i64().map_err(serde::de::Error::custom)?;
            T::try_from(value)
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("integer {value} out of range")))
        }
    }
}
