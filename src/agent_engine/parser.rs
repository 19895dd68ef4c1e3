// Raw model text → validated `AgentTurn`.
//
// Extraction isolates one JSON object from whatever the model wrapped it
// in. Validation decodes and schema-checks it. Every failure along the way
// is a `ParseFailure`, and `parse_turn` is the only place that turns a
// failure into the synthetic `done`/failed turn the loop consumes.
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::agent_engine::state::{Action, ActionKind, AgentTurn, TurnStatus};

const NO_THOUGHT: &str = "No thought provided";
const PREVIEW_CHARS: usize = 200;

fn think_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"))
}

fn think_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/no_think|/think").expect("valid regex"))
}

fn step_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:步骤|step)\s*\d+\s*[:：]\s*").expect("valid regex"))
}

fn fenced_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("valid regex"))
}

/// Everything that can go wrong between raw text and a valid turn.
#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error("no JSON object found")]
    Extraction { preview: String },

    #[error("malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response is not a JSON object: {found}")]
    Schema { found: &'static str },

    #[error("invalid action format: {found}")]
    InvalidAction { thought: String, found: &'static str },

    #[error("unknown action type: {kind}")]
    UnknownKind { thought: String, kind: String },

    #[error("invalid params for {kind}: {reason}")]
    InvalidParams {
        thought: String,
        kind: ActionKind,
        reason: String,
    },
}

impl ParseFailure {
    /// The single conversion from a parse failure to a terminal turn.
    pub fn into_turn(self) -> AgentTurn {
        let (thought, message) = match self {
            ParseFailure::Extraction { preview } => (
                format!("Failed to find JSON in response: {preview}"),
                "Parse error: No JSON found".to_string(),
            ),
            ParseFailure::Decode(e) => (
                format!("Failed to parse JSON: {e}"),
                format!("JSON parse error: {e}"),
            ),
            ParseFailure::Schema { found } => (
                format!("Response is not a JSON object: {found}"),
                "Invalid response format".to_string(),
            ),
            ParseFailure::InvalidAction { thought, found } => {
                (thought, format!("Invalid action format: {found}"))
            }
            ParseFailure::UnknownKind { thought, kind } => {
                (thought, format!("Unknown action type: {kind}"))
            }
            ParseFailure::InvalidParams { thought, kind, reason } => {
                (thought, format!("Invalid params: {kind}: {reason}"))
            }
        };
        AgentTurn {
            thought,
            action: Action::done(message),
            status: TurnStatus::Failed,
        }
    }
}

/// Isolate the candidate JSON object in `text`.
///
/// Reasoning blocks and think markers are dropped, then a leading
/// "Step N:" prefix. A fenced block wins over bare objects; otherwise the
/// first balanced `{…}` span is returned.
pub fn extract_json(text: &str) -> Option<String> {
    let cleaned = think_block_re().replace_all(text, "");
    let cleaned = think_marker_re().replace_all(&cleaned, "");
    let cleaned = cleaned.trim();
    let cleaned = step_prefix_re().replace(cleaned, "");
    let cleaned = cleaned.trim();

    if let Some(caps) = fenced_object_re().captures(cleaned) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    first_balanced_object(cleaned).map(str::to_string)
}

/// First `{…}` span whose braces balance. Braces inside JSON string
/// literals are not counted.
fn first_balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            // A stray closer before any opener is noise.
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode and schema-check one candidate.
pub fn validate(candidate: Option<&str>, raw: &str) -> Result<AgentTurn, ParseFailure> {
    let candidate = candidate.ok_or_else(|| ParseFailure::Extraction {
        preview: preview(raw),
    })?;

    let data: Value = serde_json::from_str(candidate)?;
    let Value::Object(mut data) = data else {
        return Err(ParseFailure::Schema {
            found: json_type_name(&data),
        });
    };

    let thought = match data.remove("thought") {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => NO_THOUGHT.to_string(),
        Some(other) => other.to_string(),
    };

    let status = match data.get("status") {
        None | Some(Value::Null) => TurnStatus::InProgress,
        Some(Value::String(s)) => TurnStatus::parse(s).unwrap_or_else(|| {
            tracing::warn!(status = %s, "unrecognised status, treating as in_progress");
            TurnStatus::InProgress
        }),
        Some(other) => {
            tracing::warn!(status = %other, "non-string status, treating as in_progress");
            TurnStatus::InProgress
        }
    };

    let mut action_obj = match data.remove("action") {
        Some(Value::Object(obj)) => obj,
        Some(other) => {
            return Err(ParseFailure::InvalidAction {
                thought,
                found: json_type_name(&other),
            })
        }
        None => {
            return Err(ParseFailure::InvalidAction {
                thought,
                found: "missing",
            })
        }
    };

    let kind = match action_obj.remove("type") {
        Some(Value::String(tag)) => match tag.parse::<ActionKind>() {
            Ok(kind) => kind,
            Err(tag) => return Err(ParseFailure::UnknownKind { thought, kind: tag }),
        },
        Some(other) => {
            return Err(ParseFailure::UnknownKind {
                thought,
                kind: other.to_string(),
            })
        }
        None => {
            return Err(ParseFailure::InvalidAction {
                thought,
                found: "action without type",
            })
        }
    };

    let params = match action_obj.remove("params") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(obj @ Value::Object(_)) => obj,
        Some(other) => {
            return Err(ParseFailure::InvalidParams {
                thought,
                kind,
                reason: format!("params must be an object, got {}", json_type_name(&other)),
            })
        }
    };

    let action = Action::from_params(kind, params).map_err(|e| ParseFailure::InvalidParams {
        thought: thought.clone(),
        kind,
        reason: e.to_string(),
    })?;

    Ok(AgentTurn {
        thought,
        action,
        status,
    })
}

/// Raw model text → turn. Never fails: every error becomes a terminal
/// `done` action with status `failed`.
pub fn parse_turn(raw: &str) -> AgentTurn {
    let candidate = extract_json(raw);
    match validate(candidate.as_deref(), raw) {
        Ok(turn) => {
            tracing::debug!(kind = %turn.action.kind(), status = ?turn.status, "turn validated");
            turn
        }
        Err(failure) => {
            tracing::warn!(error = %failure, "model response rejected");
            failure.into_turn()
        }
    }
}

fn preview(raw: &str) -> String {
    raw.chars().take(PREVIEW_CHARS).collect()
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
