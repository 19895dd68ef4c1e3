use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::{ModelRequest, VisionModel};
use crate::llm::sse_parser::{self, LineBuffer};
use crate::llm::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ContentPart, ImageUrl,
    MessageContent, StreamChunkKind,
};

/// Any `/chat/completions` endpoint that accepts `image_url` parts
/// (DashScope, SiliconFlow, OpenRouter, vLLM, …).
pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    stream: bool,
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleSettings {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub timeout: Duration,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, settings: OpenAiCompatibleSettings) -> PilotResult<Self> {
        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            id,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key,
            model: settings.model,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            stream: settings.stream,
            client,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    pub fn build_request(&self, request: &ModelRequest<'_>) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.history.len() * 2 + 2);
        if !request.system_prompt.is_empty() {
            messages.push(ChatMessage::text("system", request.system_prompt));
        }
        for turn in request.history {
            messages.push(ChatMessage::text("user", turn.instruction.clone()));
            messages.push(ChatMessage::text("assistant", turn.response.clone()));
        }
        messages.push(ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: request.instruction.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/jpeg;base64,{}", request.image_base64),
                    },
                },
            ]),
        });

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            stream: self.stream,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl VisionModel for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn ping(&self) -> PilotResult<()> {
        let response = self
            .authorized(self.client.get(format!("{}/models", self.api_base)))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(PilotError::LlmProvider(format!(
                "{} answered {}",
                self.api_base,
                response.status()
            )))
        }
    }

    async fn chat_with_image(&self, request: ModelRequest<'_>) -> PilotResult<String> {
        let body = self.build_request(&request);

        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            stream = self.stream,
            history = request.history.len(),
            "sending LLM request"
        );
        tracing::debug!(
            body = %sanitized_body(&body),
            "request body (sanitized, base64 omitted)"
        );

        let response = self
            .authorized(self.client.post(format!("{}/chat/completions", self.api_base)))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::LlmProvider(format!("{status}: {err_body}")));
        }

        if self.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulate `content` deltas of an SSE response. Reasoning deltas are
    /// dropped.
    async fn handle_stream(&self, response: reqwest::Response) -> PilotResult<String> {
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut content = String::new();
        let mut reasoning_len = 0usize;

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            for line in lines.push(&bytes) {
                match sse_parser::parse_sse_line(&line) {
                    Ok(Some(chunk)) => match chunk.kind {
                        StreamChunkKind::Content => content.push_str(&chunk.content),
                        StreamChunkKind::Reasoning => reasoning_len += chunk.content.len(),
                        StreamChunkKind::Done => break 'stream,
                    },
                    Ok(None) => {}
                    Err(e) => tracing::debug!("SSE parse skipped: {e}"),
                }
            }
        }
        if let Some(line) = lines.finish() {
            if let Ok(Some(chunk)) = sse_parser::parse_sse_line(&line) {
                if chunk.kind == StreamChunkKind::Content {
                    content.push_str(&chunk.content);
                }
            }
        }

        tracing::info!(
            content_len = content.len(),
            reasoning_len,
            "LLM stream complete"
        );
        Ok(content)
    }

    async fn handle_json(&self, response: reqwest::Response) -> PilotResult<String> {
        let parsed: ChatCompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        tracing::info!(content_len = content.len(), "LLM JSON response received");
        Ok(content)
    }
}

/// Request body as JSON with every inline image replaced by a placeholder.
fn sanitized_body(body: &ChatCompletionRequest) -> String {
    let mut log_body = body.clone();
    for msg in &mut log_body.messages {
        if let MessageContent::Parts(parts) = &mut msg.content {
            for part in parts {
                if let ContentPart::ImageUrl { image_url } = part {
                    image_url.url = "<omitted_base64_image>".to_string();
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::history::HistoryTurn;

    fn provider(stream: bool) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            "dashscope".into(),
            OpenAiCompatibleSettings {
                api_base: "https://example.invalid/v1/".into(),
                api_key: String::new(),
                model: "qwen3-vl-flash".into(),
                temperature: None,
                max_tokens: Some(1024),
                stream,
                timeout: Duration::from_secs(5),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_request_layout() {
        let history = vec![HistoryTurn {
            instruction: "Task: x".into(),
            response: "{\"a\":1}".into(),
        }];
        let req = ModelRequest {
            system_prompt: "sys",
            task: "x",
            instruction: "Continue",
            image_base64: "QUJD",
            history: &history,
        };
        let body = serde_json::to_value(provider(false).build_request(&req)).unwrap();
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["content"], "Task: x");
        assert_eq!(msgs[2]["role"], "assistant");
        assert_eq!(msgs[3]["content"][0]["type"], "text");
        assert_eq!(msgs[3]["content"][1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
        assert_eq!(body["max_tokens"], 1024);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_sanitized_body_hides_image() {
        let req = ModelRequest {
            system_prompt: "",
            task: "x",
            instruction: "Task: x",
            image_base64: "SECRET",
            history: &[],
        };
        let p = provider(true);
        let logged = sanitized_body(&p.build_request(&req));
        assert!(!logged.contains("SECRET"));
        assert!(logged.contains("<omitted_base64_image>"));
        assert_eq!(p.api_base, "https://example.invalid/v1");
    }
}
