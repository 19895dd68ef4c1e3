use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::executor::coordinator::CoordFormat;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: BTreeMap<String, ProviderEntry>,
}

impl Default for LlmConfig {
    /// Mirrors the stock setup: a local Ollama gateway plus a hosted
    /// OpenAI-compatible endpoint.
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "ollama".to_string(),
            ProviderEntry {
                kind: ProviderKind::Ollama,
                display_name: "Ollama (local)".into(),
                api_base: "http://localhost:11434".into(),
                model: "qwen3-vl:8b".into(),
                temperature: None,
                max_tokens: None,
                timeout_secs: default_timeout_secs(),
                stream: false,
                api_key: None,
            },
        );
        providers.insert(
            "dashscope".to_string(),
            ProviderEntry {
                kind: ProviderKind::OpenAiCompatible,
                display_name: "Qwen API (DashScope)".into(),
                api_base: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
                model: "qwen3-vl-flash".into(),
                temperature: None,
                max_tokens: Some(1024),
                timeout_secs: default_timeout_secs(),
                stream: false,
                api_key: None,
            },
        );
        Self {
            active_provider: "ollama".into(),
            providers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub kind: ProviderKind,
    #[serde(default)]
    pub display_name: String,
    pub api_base: String,
    pub model: String,
    /// Omitted from the request when unset.
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Only honoured by OpenAI-compatible providers.
    #[serde(default)]
    pub stream: bool,
    /// Falls back to env var PILOT_<ID>_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_step_delay")]
    pub step_delay_secs: f64,
    #[serde(default)]
    pub coord_format: CoordFormat,
    #[serde(default = "default_true")]
    pub session_log: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            step_delay_secs: default_step_delay(),
            coord_format: CoordFormat::default(),
            session_log: true,
        }
    }
}

fn default_max_steps() -> u32 {
    20
}

fn default_step_delay() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            max_height: default_max_height(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_max_width() -> u32 {
    1920
}

fn default_max_height() -> u32 {
    1080
}

fn default_jpeg_quality() -> u8 {
    85
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Pause after every input primitive.
    #[serde(default = "default_pause")]
    pub pause_secs: f64,
    /// Refuse input while the cursor sits in a screen corner.
    #[serde(default = "default_true")]
    pub failsafe: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            pause_secs: default_pause(),
            failsafe: true,
        }
    }
}

fn default_pause() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptsConfig {
    /// Replaces the embedded system prompt when set.
    #[serde(default)]
    pub system_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Apply `PILOT_PROVIDER`, `PILOT_MODEL` and `PILOT_COORD_FORMAT` on top of
    /// the loaded file.
    pub fn apply_env_overrides(&mut self) -> PilotResult<()> {
        if let Ok(provider) = std::env::var("PILOT_PROVIDER") {
            self.llm.active_provider = provider;
        }
        if let Ok(model) = std::env::var("PILOT_MODEL") {
            self.set_model(model)?;
        }
        if let Ok(format) = std::env::var("PILOT_COORD_FORMAT") {
            self.agent.coord_format = format.parse()?;
        }
        Ok(())
    }

    /// Override the model of the active provider.
    pub fn set_model(&mut self, model: String) -> PilotResult<()> {
        let active = self.llm.active_provider.clone();
        let entry = self.llm.providers.get_mut(&active).ok_or_else(|| {
            PilotError::Config(format!("Active provider '{active}' not found in config"))
        })?;
        entry.model = model;
        Ok(())
    }

    /// The embedded prompt unless `[prompts] system_file` points elsewhere.
    pub fn system_prompt(&self) -> PilotResult<String> {
        match &self.prompts.system_file {
            Some(path) => Ok(std::fs::read_to_string(path)?),
            None => Ok(crate::agent_engine::prompt::DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

fn resolve_config_path() -> PilotResult<Option<PathBuf>> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(Some(candidate));
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(Some(candidate));
    }

    Ok(None)
}

/// Load `config.toml` from an explicit path, next to the executable, or the
/// working directory. Falls back to built-in defaults when none exists.
pub fn load_config(explicit: Option<&Path>) -> PilotResult<AppConfig> {
    let path = match explicit {
        Some(p) if !p.exists() => {
            return Err(PilotError::Config(format!(
                "config file {} does not exist",
                p.display()
            )))
        }
        Some(p) => Some(p.to_path_buf()),
        None => resolve_config_path()?,
    };

    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config: AppConfig = toml::from_str(&content)?;
            tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
            config
        }
        None => {
            tracing::info!("no config.toml found, using built-in defaults");
            AppConfig::default()
        }
    };
    config.apply_env_overrides()?;
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> PilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_setup() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.active_provider, "ollama");
        assert_eq!(cfg.agent.max_steps, 20);
        assert_eq!(cfg.agent.step_delay_secs, 1.0);
        assert_eq!(cfg.agent.coord_format, CoordFormat::Auto);
        assert_eq!(cfg.capture.jpeg_quality, 85);
        assert_eq!(cfg.input.pause_secs, 0.5);
        assert!(cfg.input.failsafe);
        assert_eq!(cfg.llm.providers["dashscope"].kind, ProviderKind::OpenAiCompatible);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let toml_src = r#"
            [llm]
            active_provider = "router"

            [llm.providers.router]
            kind = "openai_compatible"
            api_base = "https://openrouter.ai/api/v1"
            model = "qwen/qwen2.5-vl-72b-instruct"
            stream = true

            [agent]
            max_steps = 8
            coord_format = "absolute"
        "#;
        let cfg: AppConfig = toml::from_str(toml_src).unwrap();
        let router = &cfg.llm.providers["router"];
        assert_eq!(router.timeout_secs, 120);
        assert!(router.stream);
        assert!(router.api_key.is_none());
        assert_eq!(cfg.agent.max_steps, 8);
        assert_eq!(cfg.agent.step_delay_secs, 1.0);
        assert_eq!(cfg.agent.coord_format, CoordFormat::Absolute);
        assert_eq!(cfg.capture.max_width, 1920);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.agent.max_steps = 5;
        cfg.agent.coord_format = CoordFormat::Normalized1000;
        save_config(&cfg, &path).unwrap();

        let reloaded: AppConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded.agent.max_steps, 5);
        assert_eq!(reloaded.agent.coord_format, CoordFormat::Normalized1000);
        assert_eq!(reloaded.llm.providers.len(), 2);
    }

    #[test]
    fn test_provider_kind_tags() {
        let written = toml::to_string(&AppConfig::default()).unwrap();
        assert!(written.contains(r#"kind = "openai_compatible""#));
        assert!(written.contains(r#"kind = "ollama""#));
        assert!(!written.contains("open_ai_compatible"));

        let cfg: AppConfig = toml::from_str(&written).unwrap();
        assert_eq!(cfg.llm.providers["dashscope"].kind, ProviderKind::OpenAiCompatible);
    }

    #[test]
    fn test_example_file_parses() {
        let cfg: AppConfig = toml::from_str(include_str!("../config.example.toml")).unwrap();
        assert_eq!(cfg.llm.active_provider, "ollama");
        assert_eq!(cfg.llm.providers["dashscope"].max_tokens, Some(1024));
        assert_eq!(cfg.agent.coord_format, CoordFormat::Auto);
        assert!(cfg.prompts.system_file.is_none());
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let err = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }

    #[test]
    fn test_set_model_requires_active_provider() {
        let mut cfg = AppConfig::default();
        cfg.set_model("llava:13b".into()).unwrap();
        assert_eq!(cfg.llm.providers["ollama"].model, "llava:13b");

        cfg.llm.active_provider = "missing".into();
        assert!(cfg.set_model("x".into()).is_err());
    }
}
