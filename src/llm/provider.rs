//! 厂商配置：厂商 id、默认 base URL、模型、API Key、运行模式
//!
//! 默认值是 id 上的纯函数；`ProviderConfig` 是每次适配器调用时取的不可变快照，
//! `ProviderSettings` 持有可在两轮之间替换的当前配置。

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::llm::LlmError;

/// 线协议族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    OpenAiChat,
    AnthropicMessages,
}

/// 内置厂商；custom 为任意 OpenAI 兼容网关，必须配置 base_url
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    Qwen,
    OpenRouter,
    Ollama,
    Anthropic,
    Custom,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "deepseek" => Some(Self::DeepSeek),
            "qwen" | "dashscope" => Some(Self::Qwen),
            "openrouter" => Some(Self::OpenRouter),
            "ollama" => Some(Self::Ollama),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Qwen => "qwen",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
            Self::Anthropic => "anthropic",
            Self::Custom => "custom",
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Anthropic => Protocol::AnthropicMessages,
            _ => Protocol::OpenAiChat,
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::DeepSeek => Some("https://api.deepseek.com"),
            Self::Qwen => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Ollama => Some("http://127.0.0.1:11434/v1"),
            Self::Anthropic => Some("https://api.anthropic.com"),
            Self::Custom => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi | Self::Custom => "gpt-4o-mini",
            Self::DeepSeek => "deepseek-chat",
            Self::Qwen => "qwen-plus",
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::Ollama => "llama3.1:8b",
            Self::Anthropic => "claude-3-5-sonnet-latest",
        }
    }

    /// 未在配置中给出 API Key 时读取的环境变量
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi | Self::Custom => Some("OPENAI_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Qwen => Some("DASHSCOPE_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Ollama => None,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama | Self::Custom)
    }
}

/// 运行模式：在回答完整度与上下文开销之间取舍
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    #[default]
    Compact,
    Full,
}

/// compact 模式下单个工具结果写回对话前的字节上限
pub const COMPACT_RESULT_BUDGET: usize = 6_000;
/// full 模式下单个工具结果写回对话前的字节上限
pub const FULL_RESULT_BUDGET: usize = 24_000;

impl OperatingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "compact" | "concise" => Some(Self::Compact),
            "full" | "detailed" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn result_budget(&self) -> usize {
        match self {
            Self::Compact => COMPACT_RESULT_BUDGET,
            Self::Full => FULL_RESULT_BUDGET,
        }
    }

    /// 追加到 system prompt 的引导语
    pub fn prompt_guidance(&self) -> &'static str {
        match self {
            Self::Compact => {
                "Operating mode: compact. Keep answers short. Query with small page sizes \
                 (limit 20 or less) and request only the fields you need."
            }
            Self::Full => "Operating mode: full. Give complete answers with relevant details.",
        }
    }
}

/// 一次调用使用的厂商配置快照
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub mode: OperatingMode,
    pub max_tokens: u32,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            base_url: None,
            api_key: None,
            model: kind.default_model().to_string(),
            mode: OperatingMode::default(),
            max_tokens: 4096,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_mode(mut self, mode: OperatingMode) -> Self {
        self.mode = mode;
        self
    }

    /// 调用方给出的 base URL 优先，否则用厂商默认值
    pub fn base_url(&self) -> Result<String, LlmError> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(self.kind.default_base_url())
            .map(|s| s.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                LlmError::Provider(format!(
                    "provider `{}` has no default base URL; set llm.base_url",
                    self.kind.id()
                ))
            })
    }

    /// 返回非占位的 API Key；要求 Key 的厂商缺失时报错
    pub fn api_key(&self) -> Result<Option<&str>, LlmError> {
        let key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !is_placeholder_api_key(k));
        match key {
            None if self.kind.requires_api_key() => {
                Err(LlmError::MissingApiKey(self.kind.id().to_string()))
            }
            other => Ok(other),
        }
    }
}

fn is_placeholder_api_key(value: &str) -> bool {
    value.is_empty()
        || value.eq_ignore_ascii_case("x")
        || value.eq_ignore_ascii_case("placeholder")
        || value == "sk-placeholder"
}

/// 当前厂商配置的共享句柄：引擎每次调用适配器前取快照，调用方可在两轮之间修改
#[derive(Clone)]
pub struct ProviderSettings {
    current: Arc<RwLock<ProviderConfig>>,
}

impl ProviderSettings {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> ProviderConfig {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut ProviderConfig)) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_defaults_and_override() {
        let cfg = ProviderConfig::new(ProviderKind::DeepSeek);
        assert_eq!(cfg.base_url().unwrap(), "https://api.deepseek.com");
        let cfg = cfg.with_base_url("http://gateway.local/v1/");
        assert_eq!(cfg.base_url().unwrap(), "http://gateway.local/v1");
        assert!(ProviderConfig::new(ProviderKind::Custom).base_url().is_err());
    }

    #[test]
    fn test_api_key_rules() {
        let cfg = ProviderConfig::new(ProviderKind::OpenAi).with_api_key("placeholder");
        assert!(matches!(cfg.api_key(), Err(LlmError::MissingApiKey(_))));
        let cfg = ProviderConfig::new(ProviderKind::Ollama);
        assert_eq!(cfg.api_key().unwrap(), None);
        let cfg = ProviderConfig::new(ProviderKind::Anthropic).with_api_key(" sk-ant ");
        assert_eq!(cfg.api_key().unwrap(), Some("sk-ant"));
    }

    #[test]
    fn test_parse_and_protocol() {
        assert_eq!(ProviderKind::parse("Claude"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::Anthropic.protocol(), Protocol::AnthropicMessages);
        assert_eq!(ProviderKind::Qwen.protocol(), Protocol::OpenAiChat);
        assert_eq!(ProviderKind::parse("nope"), None);
        assert_eq!(OperatingMode::parse("FULL"), Some(OperatingMode::Full));
    }

    #[test]
    fn test_budgets_differ_by_mode() {
        assert!(OperatingMode::Compact.result_budget() < OperatingMode::Full.result_budget());
    }

    #[test]
    fn test_settings_update_takes_effect_on_next_snapshot() {
        let settings = ProviderSettings::new(ProviderConfig::new(ProviderKind::OpenAi));
        let before = settings.snapshot();
        settings.update(|c| c.mode = OperatingMode::Full);
        assert_eq!(before.mode, OperatingMode::Compact);
        assert_eq!(settings.snapshot().mode, OperatingMode::Full);
    }
}
