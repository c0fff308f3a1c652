//! LLM 层：协议适配器（OpenAI 兼容 / Anthropic）、厂商配置、路由与测试替身

pub mod accumulator;
pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod router;
pub mod traits;
pub mod wire;

pub use accumulator::{parse_arguments, ToolCallAccumulator};
pub use anthropic::AnthropicAdapter;
pub use mock::{ScriptedLlm, StallingLlm};
pub use openai::OpenAiAdapter;
pub use provider::{
    OperatingMode, Protocol, ProviderConfig, ProviderKind, ProviderSettings, COMPACT_RESULT_BUDGET,
    FULL_RESULT_BUDGET,
};
pub use router::ProviderRouter;
pub use traits::{ChatAdapter, ChatRequest, LlmError, LlmTurn, ToolDefinition};
