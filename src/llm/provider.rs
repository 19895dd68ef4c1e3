use std::time::Duration;

use async_trait::async_trait;

use crate::agent_engine::history::HistoryTurn;
use crate::errors::{PilotError, PilotResult};

/// Everything one model call needs.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,
    pub task: &'a str,
    pub instruction: &'a str,
    /// Base64 JPEG, no data-URI prefix.
    pub image_base64: &'a str,
    pub history: &'a [HistoryTurn],
}

/// Vision-language model collaborator. Providers implement this trait and
/// are selected through `[llm.providers]` in config.toml.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// The provider's identifier (matches the config.toml key).
    fn name(&self) -> &str;

    /// Model identifier sent with each request.
    fn model(&self) -> &str;

    /// Cheap reachability check.
    async fn ping(&self) -> PilotResult<()>;

    /// Models the endpoint can serve, where the endpoint can tell.
    async fn list_models(&self) -> PilotResult<Vec<String>> {
        Err(PilotError::LlmProvider(format!(
            "provider '{}' cannot list models",
            self.name()
        )))
    }

    /// One multimodal turn: system prompt, prior text-only history, then the
    /// instruction with the screenshot attached.
    async fn chat_with_image(&self, request: ModelRequest<'_>) -> PilotResult<String>;
}

/// Call the model under `timeout`. Never fails: transport errors and
/// timeouts come back as a JSON turn with status `failed`.
pub async fn ask(model: &dyn VisionModel, request: ModelRequest<'_>, timeout: Duration) -> String {
    let outcome = match tokio::time::timeout(timeout, model.chat_with_image(request)).await {
        Ok(result) => result,
        Err(_) => Err(PilotError::Timeout(timeout.as_secs())),
    };
    match outcome {
        Ok(text) => {
            tracing::debug!(provider = %model.name(), len = text.len(), "model responded");
            text
        }
        Err(e) => {
            tracing::error!(provider = %model.name(), error = %e, "model call failed");
            transport_failure_payload(&e)
        }
    }
}

/// The synthetic turn standing in for a response that never arrived.
pub fn transport_failure_payload(error: &PilotError) -> String {
    serde_json::json!({
        "thought": format!("Error communicating with LLM: {error}"),
        "action": {"type": "done", "params": {"message": "LLM error"}},
        "status": "failed",
    })
    .to_string()
}
