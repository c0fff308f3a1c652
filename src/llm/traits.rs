//! 协议适配器抽象
//!
//! 每个 LLM 线协议族实现 ChatAdapter：输入对话、工具定义与 system prompt，
//! 过程中推送 text / thinking 增量，最终产出统一的 LlmTurn。厂商 JSON 形状的差异全部隔离在适配器内部。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::engine::events::EventSender;
use crate::llm::ProviderConfig;
use crate::memory::{ToolCall, Turn};

/// 适配器内部错误；在适配器边界折叠为 `LlmTurn::ProviderError`
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("missing API key for provider `{0}`")]
    MissingApiKey(String),
}

/// 提供给模型的工具定义（参数为 JSON Schema）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 一次适配器调用的输入
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system_prompt: &'a str,
    pub turns: &'a [Turn],
    pub tools: &'a [ToolDefinition],
}

/// 一次模型调用的统一结果
#[derive(Debug, Clone, PartialEq)]
pub enum LlmTurn {
    /// 最终回答，本次 chat 结束
    FinalText(String),
    /// 需要执行工具；text 为随调用一同产生的文字
    ToolCallBatch { text: String, calls: Vec<ToolCall> },
    /// 取消令牌触发；已累计的部分文本被丢弃
    Aborted,
    ProviderError(String),
}

impl From<Result<LlmTurn, LlmError>> for LlmTurn {
    fn from(result: Result<LlmTurn, LlmError>) -> Self {
        match result {
            Ok(turn) => turn,
            Err(e) => {
                tracing::warn!(error = %e, "provider call failed");
                LlmTurn::ProviderError(e.to_string())
            }
        }
    }
}

impl LlmTurn {
    /// 按是否带工具调用区分最终回答与工具批次
    pub fn from_parts(text: String, calls: Vec<ToolCall>) -> Self {
        if calls.is_empty() {
            LlmTurn::FinalText(text)
        } else {
            LlmTurn::ToolCallBatch { text, calls }
        }
    }
}

/// 协议适配器 trait：配置快照在每次调用时显式传入
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    async fn call(
        &self,
        provider: &ProviderConfig,
        request: ChatRequest<'_>,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> LlmTurn;
}
