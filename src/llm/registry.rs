use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ProviderEntry, ProviderKind};
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::VisionModel;
use crate::llm::providers::ollama::OllamaProvider;
use crate::llm::providers::openai_compatible::{OpenAiCompatibleProvider, OpenAiCompatibleSettings};

/// Registry of all configured vision models, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn VisionModel>>,
    active: String,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: BTreeMap::new(),
            active,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn VisionModel>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> PilotResult<Arc<dyn VisionModel>> {
        self.get(&self.active)
    }

    pub fn get(&self, name: &str) -> PilotResult<Arc<dyn VisionModel>> {
        self.providers.get(name).cloned().ok_or_else(|| {
            PilotError::Config(format!("Provider '{name}' not found in registry"))
        })
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    pub fn list_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `PILOT_<ID>_API_KEY`,
    /// falling back to `api_key` in the provider entry.
    pub fn from_config(config: &AppConfig) -> PilotResult<Self> {
        let mut registry = Self::new(config.llm.active_provider.clone());
        for (id, entry) in &config.llm.providers {
            registry.register(build_provider(id, entry)?);
        }
        tracing::debug!(
            providers = ?registry.list_names(),
            active = %registry.active,
            "provider registry built"
        );
        Ok(registry)
    }
}

fn api_key_env_var(id: &str) -> String {
    let id: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("PILOT_{id}_API_KEY")
}

fn build_provider(id: &str, entry: &ProviderEntry) -> PilotResult<Arc<dyn VisionModel>> {
    let timeout = Duration::from_secs(entry.timeout_secs.max(1));
    Ok(match entry.kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(
            id.to_string(),
            entry.api_base.clone(),
            entry.model.clone(),
            entry.temperature,
            entry.max_tokens,
            timeout,
        )?),
        ProviderKind::OpenAiCompatible => {
            let api_key = std::env::var(api_key_env_var(id))
                .ok()
                .or_else(|| entry.api_key.clone())
                .unwrap_or_default();
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            Arc::new(OpenAiCompatibleProvider::new(
                id.to_string(),
                OpenAiCompatibleSettings {
                    api_base: entry.api_base.clone(),
                    api_key,
                    model: entry.model.clone(),
                    temperature: entry.temperature,
                    max_tokens: entry.max_tokens,
                    stream: entry.stream,
                    timeout,
                },
            )?)
        }
    })
}
