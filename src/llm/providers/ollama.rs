use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::{ModelRequest, VisionModel};
use crate::llm::types::{
    OllamaChatRequest, OllamaChatResponse, OllamaMessage, OllamaOptions, OllamaTags,
};

/// Local Ollama server speaking `/api/chat`.
pub struct OllamaProvider {
    id: String,
    api_base: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(
        id: String,
        api_base: String,
        model: String,
        temperature: Option<f64>,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> PilotResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            id,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            temperature,
            max_tokens,
            client,
        })
    }

    pub fn build_request(&self, request: &ModelRequest<'_>) -> OllamaChatRequest {
        let mut messages = Vec::with_capacity(request.history.len() * 2 + 2);
        if !request.system_prompt.is_empty() {
            messages.push(OllamaMessage {
                role: "system".into(),
                content: request.system_prompt.to_string(),
                images: None,
            });
        }
        for turn in request.history {
            messages.push(OllamaMessage {
                role: "user".into(),
                content: turn.instruction.clone(),
                images: None,
            });
            messages.push(OllamaMessage {
                role: "assistant".into(),
                content: turn.response.clone(),
                images: None,
            });
        }
        messages.push(OllamaMessage {
            role: "user".into(),
            content: request.instruction.to_string(),
            images: Some(vec![request.image_base64.to_string()]),
        });

        let options = (self.temperature.is_some() || self.max_tokens.is_some()).then_some(
            OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        );

        OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            options,
        }
    }

    async fn tags(&self, timeout: Duration) -> PilotResult<OllamaTags> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.api_base))
            .timeout(timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PilotError::LlmProvider(format!(
                "{} answered {}",
                self.api_base,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl VisionModel for OllamaProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn ping(&self) -> PilotResult<()> {
        self.tags(Duration::from_secs(5)).await.map(|_| ())
    }

    async fn list_models(&self) -> PilotResult<Vec<String>> {
        let tags = self.tags(Duration::from_secs(10)).await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat_with_image(&self, request: ModelRequest<'_>) -> PilotResult<String> {
        let body = self.build_request(&request);
        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            history = request.history.len(),
            "sending Ollama chat request"
        );

        let response = self
            .client
            .post(format!("{}/api/chat", self.api_base))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::LlmProvider(format!("{status}: {err_body}")));
        }

        let parsed: OllamaChatResponse = response.json().await?;
        let content = parsed.message.map(|m| m.content).unwrap_or_default();
        tracing::info!(content_len = content.len(), "Ollama response received");
        Ok(content)
    }
}
