//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CLOUDPILOT__*` 覆盖
//! （双下划线表示嵌套，如 `CLOUDPILOT__LLM__PROVIDER=anthropic`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::cloud::CloudClientOptions;
use crate::core::AgentError;
use crate::engine::{EngineSettings, DEFAULT_MAX_ROUNDS, DEFAULT_SYSTEM_PROMPT};
use crate::llm::{OperatingMode, ProviderConfig, ProviderKind};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub cloud: CloudSection,
    pub agent: AgentSection,
}

/// [llm] 段：厂商、模型、接入点与运行模式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / qwen / openrouter / ollama / anthropic / custom
    pub provider: String,
    /// 未设置时用厂商默认模型
    pub model: Option<String>,
    /// 自建网关或代理；未设置时用厂商默认地址
    pub base_url: Option<String>,
    /// 未设置时读取厂商对应的环境变量（OPENAI_API_KEY 等）
    pub api_key: Option<String>,
    /// compact / full
    pub mode: String,
    /// 连接与单次读取超时（秒）；流式响应中两帧间隔超过该值即视为失败
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            base_url: None,
            api_key: None,
            mode: "compact".to_string(),
            request_timeout_secs: 30,
            max_tokens: 4096,
        }
    }
}

impl LlmSection {
    pub fn provider_config(&self) -> Result<ProviderConfig, AgentError> {
        let kind = ProviderKind::parse(&self.provider)
            .ok_or_else(|| AgentError::Config(format!("unknown llm.provider `{}`", self.provider)))?;
        let mode = OperatingMode::parse(&self.mode)
            .ok_or_else(|| AgentError::Config(format!("unknown llm.mode `{}`", self.mode)))?;

        let base_url = non_empty(self.base_url.as_deref());
        if kind == ProviderKind::Custom && base_url.is_none() {
            return Err(AgentError::Config(
                "llm.provider = \"custom\" requires llm.base_url".to_string(),
            ));
        }

        let mut cfg = ProviderConfig::new(kind).with_mode(mode);
        cfg.max_tokens = self.max_tokens;
        if let Some(model) = non_empty(self.model.as_deref()) {
            cfg = cfg.with_model(model);
        }
        if let Some(url) = base_url {
            cfg = cfg.with_base_url(url);
        }
        let api_key = non_empty(self.api_key.as_deref()).map(str::to_string).or_else(|| {
            kind.api_key_env()
                .and_then(|name| std::env::var(name).ok())
                .filter(|k| !k.trim().is_empty())
        });
        if let Some(key) = api_key {
            cfg = cfg.with_api_key(key);
        }
        Ok(cfg)
    }
}

/// [cloud] 段：资源 API 接入点与账号
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudSection {
    pub endpoint: String,
    pub account: String,
    /// 明文口令只在启动时使用，登录前即转为摘要
    pub password: Option<String>,
    pub request_timeout_secs: u64,
    pub job_poll_interval_ms: u64,
    pub job_timeout_secs: u64,
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            account: "admin".to_string(),
            password: None,
            request_timeout_secs: 30,
            job_poll_interval_ms: 500,
            job_timeout_secs: 300,
        }
    }
}

impl CloudSection {
    pub fn client_options(&self) -> CloudClientOptions {
        CloudClientOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            job_poll_interval: Duration::from_millis(self.job_poll_interval_ms),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
        }
    }
}

/// [agent] 段：轮次与时间预算、system prompt
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_rounds: usize,
    pub time_budget_secs: u64,
    /// 自定义 system prompt 文件；未设置时用内置 prompt
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            time_budget_secs: 300,
            system_prompt_path: None,
        }
    }
}

impl AgentSection {
    pub fn engine_settings(&self) -> Result<EngineSettings, AgentError> {
        let system_prompt = match &self.system_prompt_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                AgentError::Config(format!("cannot read system prompt {}: {e}", path.display()))
            })?,
            None => DEFAULT_SYSTEM_PROMPT.to_string(),
        };
        Ok(EngineSettings {
            max_rounds: self.max_rounds,
            time_budget: Duration::from_secs(self.time_budget_secs),
            system_prompt,
        })
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// 从 config 目录加载配置，环境变量 CLOUDPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CLOUDPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CLOUDPILOT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
